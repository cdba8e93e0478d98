//! Physiological Channels
//!
//! The monitor samples five channels. Each one has a fixed set of names
//! used on the wire (JSON key, topic segment, resource path) and a tunable
//! [`ChannelProfile`] describing how it is simulated and when it alarms.
//!
//! ## Default Profiles
//!
//! | Channel            | Interval | Bounds   | Step | Alarm band | Unit |
//! |--------------------|----------|----------|------|------------|------|
//! | Heart rate         | 10 s     | 30..200  | 8    | 50 / 120   | bpm  |
//! | Blood pressure     | 11 s     | 60..200  | 6    | 90 / 160   | mmHg |
//! | Temperature        | 22 s     | 34..42   | 1    | 35 / 39    | C    |
//! | Respiration        | 13 s     | 5..40    | 3    | 8 / 25     | bpm  |
//! | Oxygen saturation  | 30 s     | 80..100  | 2    | 90 / 110   | %    |
//!
//! The alarm band is a comfort band: touching either edge already alarms
//! (see [`crate::alarm::alarming`]). Oxygen saturation uses an upper edge
//! above its physical bound so only desaturation alarms.

use alloc::string::{String, ToString};
use serde::{Deserialize, Serialize};

/// One physiological measurement stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Heart rate
    HeartRate,
    /// Systolic blood pressure
    BloodPressure,
    /// Body temperature
    Temperature,
    /// Respiration rate
    Respiration,
    /// Peripheral oxygen saturation
    OxygenSaturation,
}

impl Channel {
    /// Number of channels.
    pub const COUNT: usize = 5;

    /// All channels, in sampling start order.
    pub const ALL: [Channel; Self::COUNT] = [
        Channel::HeartRate,
        Channel::BloodPressure,
        Channel::Temperature,
        Channel::Respiration,
        Channel::OxygenSaturation,
    ];

    /// Dense index into per-channel arrays.
    pub const fn index(self) -> usize {
        match self {
            Channel::HeartRate => 0,
            Channel::BloodPressure => 1,
            Channel::Temperature => 2,
            Channel::Respiration => 3,
            Channel::OxygenSaturation => 4,
        }
    }

    /// Human readable name, used in logs and configuration keys.
    pub const fn name(self) -> &'static str {
        match self {
            Channel::HeartRate => "heart_rate",
            Channel::BloodPressure => "blood_pressure",
            Channel::Temperature => "temperature",
            Channel::Respiration => "respiration",
            Channel::OxygenSaturation => "oxygen_saturation",
        }
    }

    /// Key carrying the sample value in telemetry payloads.
    pub const fn json_key(self) -> &'static str {
        match self {
            Channel::HeartRate => "heartRate",
            Channel::BloodPressure => "bloodPressure",
            Channel::Temperature => "temperature",
            Channel::Respiration => "respiration",
            Channel::OxygenSaturation => "oxygenSaturation",
        }
    }

    /// Last segment of the telemetry topic.
    pub const fn topic_segment(self) -> &'static str {
        match self {
            Channel::HeartRate => "heart-rate",
            Channel::BloodPressure => "blood-pressure",
            Channel::Temperature => "temperature",
            Channel::Respiration => "respiration",
            Channel::OxygenSaturation => "oxygen-saturation",
        }
    }

    /// Path of the resource exposing the latest value.
    pub const fn resource_path(self) -> &'static str {
        match self {
            Channel::HeartRate => "patientState/heartRate",
            Channel::BloodPressure => "patientState/bloodPressure",
            Channel::Temperature => "patientState/temperature",
            Channel::Respiration => "patientState/respiration",
            Channel::OxygenSaturation => "patientState/oxygenSaturation",
        }
    }

    /// Look a channel up by its resource path.
    pub fn from_resource_path(path: &str) -> Option<Channel> {
        Self::ALL.into_iter().find(|c| c.resource_path() == path)
    }

    /// Default simulation and alarm profile.
    pub fn default_profile(self) -> ChannelProfile {
        let (interval_s, lower, upper, deviation, min, max, unit) = match self {
            Channel::HeartRate => (10, 30, 200, 8, 50, 120, "bpm"),
            Channel::BloodPressure => (11, 60, 200, 6, 90, 160, "mmHg"),
            Channel::Temperature => (22, 34, 42, 1, 35, 39, "C"),
            Channel::Respiration => (13, 5, 40, 3, 8, 25, "bpm"),
            Channel::OxygenSaturation => (30, 80, 100, 2, 90, 110, "%"),
        };
        ChannelProfile {
            sampling_interval_ms: interval_s * 1_000,
            lower_bound: lower,
            upper_bound: upper,
            max_deviation: deviation,
            thresholds: Thresholds { min, max },
            unit: unit.to_string(),
        }
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Alarm comfort band of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Values at or below this alarm
    pub min: i32,
    /// Values at or above this alarm
    pub max: i32,
}

impl Thresholds {
    /// True when `value` touches or leaves the band.
    pub fn is_breached(&self, value: i32) -> bool {
        crate::alarm::alarming(self.min, self.max, value)
    }

    /// A band with `min >= max` alarms on every sample.
    pub fn is_degenerate(&self) -> bool {
        self.min >= self.max
    }
}

/// How a channel is simulated and when it alarms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProfile {
    /// Period between two samples
    pub sampling_interval_ms: u64,
    /// Smallest value the simulated sensor can report
    pub lower_bound: i32,
    /// Largest value the simulated sensor can report
    pub upper_bound: i32,
    /// Largest step between two consecutive samples
    pub max_deviation: i32,
    /// Alarm band
    pub thresholds: Thresholds,
    /// Unit label carried in telemetry
    pub unit: String,
}
