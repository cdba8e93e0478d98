//! Wire Messages and Destinations
//!
//! JSON bodies exchanged with the collector, and the topic names they travel
//! on. The formats are fixed by deployed collectors:
//!
//! ```text
//! telemetry      {"heartRate": 72, "unit": "bpm", "timestamp": 1234}
//! alarm          {"alarm": true}
//! registration   {"monitorID": "fd00::212:4b00:0:1", "registration": true}
//! patient        {"monitorID": "fd00::212:4b00:0:1", "patientID": "p-001"}
//! ```
//!
//! Key order follows the listing above. Telemetry uses a hand-written
//! `Serialize` so the per-channel key comes first.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::alarm::AlarmState;
use crate::constants::Channel;
use crate::errors::EncodeError;
use crate::time::{seconds, Timestamp};

/// Topic collecting monitor registrations
pub const MONITOR_REGISTRATION_TOPIC: &str = "cmd/smartICU/collector/monitor-registration";

/// Topic collecting patient registrations
pub const PATIENT_REGISTRATION_TOPIC: &str = "cmd/smartICU/collector/patient-registration";

/// Resource exposing the alarm state
pub const ALARM_STATE_RESOURCE: &str = "patientState/alarmState";

/// Resource exposing the bound patient
pub const REGISTERED_PATIENT_RESOURCE: &str = "registeredPatient";

/// Encoded message body
pub type Payload = Vec<u8>;

struct Telemetry<'a> {
    channel: Channel,
    value: i32,
    unit: &'a str,
    timestamp: u64,
}

impl Serialize for Telemetry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(self.channel.json_key(), &self.value)?;
        map.serialize_entry("unit", self.unit)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.end()
    }
}

#[derive(Serialize, Deserialize)]
struct AlarmBody {
    alarm: bool,
}

#[derive(Serialize)]
struct DeviceRegistration<'a> {
    #[serde(rename = "monitorID")]
    monitor_id: &'a str,
    registration: bool,
}

#[derive(Serialize)]
struct PatientRegistration<'a> {
    #[serde(rename = "monitorID", skip_serializing_if = "Option::is_none")]
    monitor_id: Option<&'a str>,
    #[serde(rename = "patientID")]
    patient_id: &'a str,
}

fn encode<T: Serialize>(body: &T) -> Result<Payload, EncodeError> {
    serde_json::to_vec(body).map_err(|_| EncodeError)
}

/// Telemetry body for one sample taken at `timestamp`
pub fn telemetry(
    channel: Channel,
    value: i32,
    unit: &str,
    timestamp: Timestamp,
) -> Result<Payload, EncodeError> {
    encode(&Telemetry { channel, value, unit, timestamp: seconds(timestamp) })
}

/// Alarm state body
pub fn alarm_state(state: AlarmState) -> Result<Payload, EncodeError> {
    encode(&AlarmBody { alarm: state.is_on() })
}

/// Monitor registration body
pub fn device_registration(monitor_id: &str) -> Result<Payload, EncodeError> {
    encode(&DeviceRegistration { monitor_id, registration: true })
}

/// Patient registration body; `monitor_id` is omitted when `None`
pub fn patient_registration(
    monitor_id: Option<&str>,
    patient_id: &str,
) -> Result<Payload, EncodeError> {
    encode(&PatientRegistration { monitor_id, patient_id })
}

/// Remote alarm command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmCommand {
    /// `{"alarm": true}`
    Start,
    /// `{"alarm": false}`
    Stop,
}

/// Decode an inbound `{"alarm": true|false}` body.
///
/// Whitespace and a trailing NUL are tolerated; anything else is `None`.
pub fn parse_alarm_command(payload: &[u8]) -> Option<AlarmCommand> {
    let payload = match payload.split_last() {
        Some((&0, rest)) => rest,
        _ => payload,
    };
    let body: AlarmBody = serde_json::from_slice(payload).ok()?;
    Some(if body.alarm { AlarmCommand::Start } else { AlarmCommand::Stop })
}

/// Topics derived from the monitor identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    monitor_id: String,
    alarm_command: String,
    alarm_state: String,
    telemetry: [String; Channel::COUNT],
}

impl Destinations {
    /// Build every topic for `monitor_id`
    pub fn new(monitor_id: &str) -> Self {
        let state = |segment: &str| format!("telemetry/smartICU/{monitor_id}/patient-state/{segment}");
        Self {
            monitor_id: monitor_id.into(),
            alarm_command: format!("cmd/smartICU/{monitor_id}/patient-state/alarm-state"),
            alarm_state: state("alarm-state"),
            telemetry: Channel::ALL.map(|c| state(c.topic_segment())),
        }
    }

    /// Identifier the topics were built from
    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    /// Topic the monitor subscribes to for remote alarm commands
    pub fn alarm_command_topic(&self) -> &str {
        &self.alarm_command
    }

    /// Topic announcing alarm state changes
    pub fn alarm_state_topic(&self) -> &str {
        &self.alarm_state
    }

    /// Topic carrying samples of `channel`
    pub fn telemetry_topic(&self, channel: Channel) -> &str {
        &self.telemetry[channel.index()]
    }

    /// Topic collecting monitor registrations
    pub fn monitor_registration_topic(&self) -> &'static str {
        MONITOR_REGISTRATION_TOPIC
    }

    /// Topic collecting patient registrations
    pub fn patient_registration_topic(&self) -> &'static str {
        PATIENT_REGISTRATION_TOPIC
    }
}
