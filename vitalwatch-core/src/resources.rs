//! Exposed Resources
//!
//! With the request/response binding the collector does not receive pushed
//! telemetry. It reads (and observes) resources on the monitor instead:
//!
//! | Path                            | GET                      | PUT            |
//! |---------------------------------|--------------------------|----------------|
//! | `registeredPatient`             | `{"patientID": "..."}`   | -              |
//! | `patientState/alarmState`       | `{"alarm": bool}`        | alarm command  |
//! | `patientState/heartRate` etc.   | telemetry body           | -              |
//!
//! [`ResourceTable`] is a [`MonitorObserver`]: the session keeps it current,
//! and a server answers requests from it. Channel values read `-1` until
//! the first sample arrives. Every change bumps the resource's observe
//! sequence and marks it changed; the server drains the marks with
//! [`ResourceTable::take_changes`] and notifies that resource's observers.
//!
//! A PUT on the alarm resource is not applied here. It is turned into a
//! [`MonitorEvent`] for the session, which decides whether the command is
//! acceptable in its current state.

use alloc::string::String;
use alloc::vec::Vec;

use crate::alarm::AlarmState;
use crate::constants::{Channel, PATIENT_ID_LEN};
use crate::events::MonitorEvent;
use crate::message::{
    self, parse_alarm_command, AlarmCommand, Payload, ALARM_STATE_RESOURCE,
    REGISTERED_PATIENT_RESOURCE,
};
use crate::observer::MonitorObserver;
use crate::sampling::Sample;
use crate::session::truncate_id;
use crate::time::Timestamp;
use crate::transport::StatusCode;

/// Value shown before the first sample
pub const UNSET_VALUE: i32 = -1;

const RESOURCE_COUNT: usize = Channel::COUNT + 2;
const ALARM_SLOT: usize = Channel::COUNT;
const PATIENT_SLOT: usize = Channel::COUNT + 1;

/// Answer to a resource request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    /// Status code
    pub code: StatusCode,
    /// JSON body, empty for errors
    pub payload: Payload,
}

impl ResourceResponse {
    fn status(code: StatusCode) -> Self {
        Self { code, payload: Vec::new() }
    }

    fn content(payload: Result<Payload, crate::errors::EncodeError>) -> Self {
        match payload {
            Ok(payload) => Self { code: StatusCode::CONTENT, payload },
            Err(_) => Self::status(StatusCode::new(5, 0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reading {
    value: i32,
    timestamp: Timestamp,
}

/// Latest monitor state, readable by path
#[derive(Debug, Clone)]
pub struct ResourceTable {
    units: [String; Channel::COUNT],
    readings: [Reading; Channel::COUNT],
    alarm: AlarmState,
    patient: String,
    sequence: [u32; RESOURCE_COUNT],
    changed: [bool; RESOURCE_COUNT],
}

impl ResourceTable {
    /// Table for channels labelled with `units`, in [`Channel::ALL`] order
    pub fn new(units: [String; Channel::COUNT]) -> Self {
        Self {
            units,
            readings: [Reading { value: UNSET_VALUE, timestamp: 0 }; Channel::COUNT],
            alarm: AlarmState::Off,
            patient: String::new(),
            sequence: [0; RESOURCE_COUNT],
            changed: [false; RESOURCE_COUNT],
        }
    }

    /// Table labelled from a channel configuration
    pub fn from_channels(channels: &crate::config::ChannelTable) -> Self {
        Self::new(Channel::ALL.map(|c| channels.get(c).unit.clone()))
    }

    /// Every path served
    pub fn paths() -> impl Iterator<Item = &'static str> {
        Channel::ALL
            .into_iter()
            .map(Channel::resource_path)
            .chain([ALARM_STATE_RESOURCE, REGISTERED_PATIENT_RESOURCE])
    }

    /// Latest value of `channel`, `-1` before the first sample
    pub fn value(&self, channel: Channel) -> i32 {
        self.readings[channel.index()].value
    }

    /// Alarm state as last notified
    pub fn alarm(&self) -> AlarmState {
        self.alarm
    }

    /// Bound patient, empty when none
    pub fn patient(&self) -> &str {
        &self.patient
    }

    /// Observe sequence of `path`; `None` for unknown paths
    pub fn sequence(&self, path: &str) -> Option<u32> {
        slot(path).map(|i| self.sequence[i])
    }

    /// Paths changed since the last call, in [`ResourceTable::paths`] order
    pub fn take_changes(&mut self) -> Vec<&'static str> {
        let changed = ResourceTable::paths()
            .zip(self.changed)
            .filter_map(|(path, changed)| changed.then_some(path))
            .collect();
        self.changed = [false; RESOURCE_COUNT];
        changed
    }

    /// Serve a GET
    pub fn get(&self, path: &str) -> ResourceResponse {
        let path = normalize(path);
        if let Some(channel) = Channel::from_resource_path(path) {
            let i = channel.index();
            let reading = self.readings[i];
            return ResourceResponse::content(message::telemetry(
                channel,
                reading.value,
                &self.units[i],
                reading.timestamp,
            ));
        }
        match path {
            ALARM_STATE_RESOURCE => ResourceResponse::content(message::alarm_state(self.alarm)),
            REGISTERED_PATIENT_RESOURCE => {
                ResourceResponse::content(message::patient_registration(None, &self.patient))
            }
            _ => ResourceResponse::status(StatusCode::NOT_FOUND),
        }
    }

    /// Serve a PUT. An accepted alarm command comes back as an event.
    pub fn put(&self, path: &str, payload: &[u8]) -> (ResourceResponse, Option<MonitorEvent>) {
        let path = normalize(path);
        if path != ALARM_STATE_RESOURCE {
            let code = if slot(path).is_some() {
                StatusCode::METHOD_NOT_ALLOWED
            } else {
                StatusCode::NOT_FOUND
            };
            return (ResourceResponse::status(code), None);
        }

        match parse_alarm_command(payload) {
            Some(AlarmCommand::Start) => (
                ResourceResponse::status(StatusCode::CREATED),
                Some(MonitorEvent::AlarmCommand(AlarmCommand::Start)),
            ),
            Some(AlarmCommand::Stop) => {
                log::warn!("remote alarm stop is not supported");
                (ResourceResponse::status(StatusCode::NOT_IMPLEMENTED), None)
            }
            None => {
                log::warn!("bad alarm command on {path}");
                (ResourceResponse::status(StatusCode::BAD_REQUEST), None)
            }
        }
    }

    fn touch(&mut self, slot: usize) {
        self.sequence[slot] = self.sequence[slot].wrapping_add(1);
        self.changed[slot] = true;
    }
}

impl MonitorObserver for ResourceTable {
    fn on_sample(&mut self, sample: &Sample) {
        let i = sample.channel.index();
        self.readings[i] = Reading { value: sample.value, timestamp: sample.timestamp };
        self.touch(i);
    }

    fn on_alarm_state_changed(&mut self, state: AlarmState) {
        self.alarm = state;
        self.touch(ALARM_SLOT);
    }

    fn on_patient_changed(&mut self, patient_id: Option<&str>) {
        self.patient = patient_id.map(|id| truncate_id(id, PATIENT_ID_LEN).into()).unwrap_or_default();
        self.touch(PATIENT_SLOT);
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn slot(path: &str) -> Option<usize> {
    let path = normalize(path);
    match path {
        ALARM_STATE_RESOURCE => Some(ALARM_SLOT),
        REGISTERED_PATIENT_RESOURCE => Some(PATIENT_SLOT),
        _ => Channel::from_resource_path(path).map(Channel::index),
    }
}
