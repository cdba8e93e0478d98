//! Monitor Configuration
//!
//! Everything tunable about a monitor lives in [`MonitorConfig`]: which
//! transport binding to use, where the collector is, how each channel is
//! simulated and where it alarms, the timer periods and reset durations, and
//! whether patient ids are synthesized for unattended runs.
//!
//! The struct is plain serde data. Every field has a default, so a
//! configuration source only needs to name what it changes:
//!
//! ```toml
//! binding = "mqtt"
//! automatic_patient_id = true
//!
//! [channels.heart_rate.thresholds]
//! min = 45
//! max = 130
//! ```
//!
//! Call [`MonitorConfig::validate`] before building a session; the session
//! constructor does so itself.

use alloc::string::{String, ToString};
use serde::{Deserialize, Serialize};

use crate::constants::session::{
    DEFAULT_COAP_PORT, DEFAULT_COLLECTOR_HOST, DEFAULT_KEEP_ALIVE_SECS, DEFAULT_MQTT_PORT,
    DEFAULT_REQUEST_TIMEOUT_MS, REGISTRATION_RESOURCE,
};
use crate::constants::{
    Channel, ChannelProfile, ACOUSTIC_SIGNAL_DURATION_MS, QUEUE_RETRY_INTERVAL_MS,
    RESET_ALARM_SECS, RESET_PATIENT_SECS, STATE_CHECK_INTERVAL_MS,
};
use crate::errors::{ConfigError, ConfigResult};

/// Transport binding used to reach the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Binding {
    /// Request/response: blocking registration, values exposed as resources
    #[default]
    Coap,
    /// Publish/subscribe: telemetry pushed to topics through the retry queue
    Mqtt,
}

/// Collector endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Collector or broker host (IPv6 literal or name)
    pub host: String,
    /// Collector CoAP port
    pub coap_port: u16,
    /// Broker MQTT port
    pub mqtt_port: u16,
    /// Resource accepting monitor registrations
    pub registration_resource: String,
    /// MQTT keep-alive in seconds
    pub keep_alive_secs: u16,
    /// Longest the blocking registration may take, retransmissions included
    pub request_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_COLLECTOR_HOST.to_string(),
            coap_port: DEFAULT_COAP_PORT,
            mqtt_port: DEFAULT_MQTT_PORT,
            registration_resource: REGISTRATION_RESOURCE.to_string(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Per-channel profiles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelTable {
    /// Heart rate
    pub heart_rate: ChannelProfile,
    /// Blood pressure
    pub blood_pressure: ChannelProfile,
    /// Temperature
    pub temperature: ChannelProfile,
    /// Respiration
    pub respiration: ChannelProfile,
    /// Oxygen saturation
    pub oxygen_saturation: ChannelProfile,
}

impl ChannelTable {
    /// Profile of `channel`
    pub fn get(&self, channel: Channel) -> &ChannelProfile {
        match channel {
            Channel::HeartRate => &self.heart_rate,
            Channel::BloodPressure => &self.blood_pressure,
            Channel::Temperature => &self.temperature,
            Channel::Respiration => &self.respiration,
            Channel::OxygenSaturation => &self.oxygen_saturation,
        }
    }

    /// Mutable profile of `channel`
    pub fn get_mut(&mut self, channel: Channel) -> &mut ChannelProfile {
        match channel {
            Channel::HeartRate => &mut self.heart_rate,
            Channel::BloodPressure => &mut self.blood_pressure,
            Channel::Temperature => &mut self.temperature,
            Channel::Respiration => &mut self.respiration,
            Channel::OxygenSaturation => &mut self.oxygen_saturation,
        }
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self {
            heart_rate: Channel::HeartRate.default_profile(),
            blood_pressure: Channel::BloodPressure.default_profile(),
            temperature: Channel::Temperature.default_profile(),
            respiration: Channel::Respiration.default_profile(),
            oxygen_saturation: Channel::OxygenSaturation.default_profile(),
        }
    }
}

/// Timer periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Lifecycle state check period
    pub state_check_interval_ms: u64,
    /// Retry queue drain period
    pub queue_retry_interval_ms: u64,
    /// Acoustic signal duration
    pub acoustic_duration_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            state_check_interval_ms: STATE_CHECK_INTERVAL_MS,
            queue_retry_interval_ms: QUEUE_RETRY_INTERVAL_MS,
            acoustic_duration_ms: ACOUSTIC_SIGNAL_DURATION_MS,
        }
    }
}

/// Reset command press durations, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Silences the alarm
    pub alarm_secs: u32,
    /// Silences the alarm and unbinds the patient
    pub patient_secs: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self { alarm_secs: RESET_ALARM_SECS, patient_secs: RESET_PATIENT_SECS }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Transport binding
    pub binding: Binding,
    /// Collector endpoint
    pub collector: CollectorConfig,
    /// Channel profiles
    pub channels: ChannelTable,
    /// Timer periods
    pub timing: TimingConfig,
    /// Reset durations
    pub reset: ResetConfig,
    /// Synthesize a patient id as soon as one is awaited
    pub automatic_patient_id: bool,
    /// Seed of the sample generator; `None` lets the host pick one
    pub seed: Option<u64>,
}

impl MonitorConfig {
    /// Reject configurations the session cannot run with.
    ///
    /// Degenerate alarm bands (`min >= max`) are accepted: they alarm on
    /// every sample, which is sometimes wanted for drills.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.collector.host.trim().is_empty() {
            return Err(ConfigError::MissingCollector);
        }

        for channel in Channel::ALL {
            let profile = self.channels.get(channel);
            if profile.lower_bound > profile.upper_bound {
                return Err(ConfigError::InvalidBounds {
                    channel: channel.name(),
                    lower: profile.lower_bound,
                    upper: profile.upper_bound,
                });
            }
            if profile.max_deviation < 0 {
                return Err(ConfigError::NegativeDeviation {
                    channel: channel.name(),
                    deviation: profile.max_deviation,
                });
            }
            if profile.sampling_interval_ms == 0 {
                return Err(ConfigError::ZeroInterval { name: channel.name() });
            }
            if profile.thresholds.is_degenerate() {
                log::warn!(
                    "{channel}: alarm band [{}, {}] is empty, every sample will alarm",
                    profile.thresholds.min,
                    profile.thresholds.max
                );
            }
        }

        let timers = [
            ("state_check_interval_ms", self.timing.state_check_interval_ms),
            ("queue_retry_interval_ms", self.timing.queue_retry_interval_ms),
            ("acoustic_duration_ms", self.timing.acoustic_duration_ms),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroInterval { name: *name });
        }

        if self.reset.alarm_secs == self.reset.patient_secs {
            return Err(ConfigError::AmbiguousReset { seconds: self.reset.alarm_secs });
        }
        Ok(())
    }
}
