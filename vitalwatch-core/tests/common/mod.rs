//! Shared fixtures for session integration tests
//!
//! Scripted stand-ins for the network, the collector and the broker client,
//! plus a configuration whose sensors never move so tests can reason about
//! exact sample values. [`run_until`] replays virtual time on a
//! [`FixedTime`] clock.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv6Addr};

use vitalwatch_core::{
    alarm::AlarmState,
    config::{Binding, MonitorConfig},
    constants::{Channel, MAX_TOPIC_LEN, PAYLOAD_BUFFER_LEN, QUEUE_CAPACITY},
    errors::{PublishError, RequestError},
    observer::MonitorObserver,
    sampling::Sample,
    time::{FixedTime, TimeSource, Timestamp},
    transport::{NetworkInterface, PublishTransport, RequestTransport, StatusCode},
    uplink::{PublishUplink, RequestUplink, Uplink},
    Control, MonitorSession,
};

/// Address every fixture monitor ends up with
pub const MONITOR_ID: &str = "fd00::212:4b00:0:2";

/// Uplink of the publish/subscribe binding at production sizes
pub type MqttUplink = PublishUplink<Broker, QUEUE_CAPACITY, MAX_TOPIC_LEN, PAYLOAD_BUFFER_LEN>;

/// Uplink of the request/response binding
pub type CoapUplink = RequestUplink<Collector>;

/// Network that is either fully up or not at all
pub struct Lan {
    pub address: Option<IpAddr>,
}

impl Lan {
    pub fn up() -> Self {
        Self { address: Some(IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0x212, 0x4b00, 0, 2))) }
    }
}

impl NetworkInterface for Lan {
    fn global_address(&self) -> Option<IpAddr> {
        self.address
    }

    fn has_default_route(&self) -> bool {
        self.address.is_some()
    }
}

/// Collector answering every request with a fixed outcome
pub struct Collector {
    pub reply: Result<StatusCode, RequestError>,
    pub requests: Vec<(String, Vec<u8>)>,
}

impl Collector {
    pub fn replying(reply: Result<StatusCode, RequestError>) -> Self {
        Self { reply, requests: Vec::new() }
    }
}

impl RequestTransport for Collector {
    fn send_request(&mut self, destination: &str, payload: &[u8]) -> Result<StatusCode, RequestError> {
        self.requests.push((destination.to_owned(), payload.to_vec()));
        self.reply
    }
}

/// Broker client whose send buffer can be forced full
#[derive(Default)]
pub struct Broker {
    pub client_id: Option<String>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String)>,
    pub buffer_full: bool,
}

impl Broker {
    pub fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn last_on(&self, topic: &str) -> Option<&str> {
        self.published.iter().rev().find(|(t, _)| t == topic).map(|(_, p)| p.as_str())
    }
}

impl PublishTransport for Broker {
    fn connect(&mut self, client_id: &str) -> Result<(), PublishError> {
        self.client_id = Some(client_id.to_owned());
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError> {
        if self.client_id.is_none() {
            return Err(PublishError::NotConnected);
        }
        self.subscriptions.push(topic.to_owned());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> nb::Result<(), PublishError> {
        if self.buffer_full {
            return Err(nb::Error::WouldBlock);
        }
        self.published
            .push((topic.to_owned(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }
}

/// Observer keeping every notification
#[derive(Default)]
pub struct Recorder {
    pub samples: Vec<Sample>,
    pub alarms: Vec<AlarmState>,
    pub patients: Vec<Option<String>>,
}

impl MonitorObserver for Recorder {
    fn on_sample(&mut self, sample: &Sample) {
        self.samples.push(*sample);
    }

    fn on_alarm_state_changed(&mut self, state: AlarmState) {
        self.alarms.push(state);
    }

    fn on_patient_changed(&mut self, patient_id: Option<&str>) {
        self.patients.push(patient_id.map(str::to_owned));
    }
}

/// Configuration whose sensors sit still at in-band values, heart rate at
/// `heart_rate`. The retry timer is pushed out so tests fire it by hand.
pub fn pinned_config(binding: Binding, heart_rate: i32) -> MonitorConfig {
    let mut config = MonitorConfig { binding, seed: Some(7), ..MonitorConfig::default() };
    for (channel, value) in [
        (Channel::HeartRate, heart_rate),
        (Channel::BloodPressure, 120),
        (Channel::Temperature, 37),
        (Channel::Respiration, 14),
        (Channel::OxygenSaturation, 97),
    ] {
        let profile = config.channels.get_mut(channel);
        profile.lower_bound = value;
        profile.upper_bound = value;
        profile.max_deviation = 0;
    }
    config.timing.queue_retry_interval_ms = 600_000;
    config
}

/// Publish/subscribe session, started at t = 0
pub fn mqtt_session(config: MonitorConfig) -> MonitorSession<Lan, MqttUplink, Recorder> {
    let mut session =
        MonitorSession::new(config, Lan::up(), PublishUplink::new(Broker::default()), Recorder::default())
            .unwrap();
    session.start(0);
    session
}

/// Request/response session, started at t = 0
pub fn coap_session<O: MonitorObserver>(
    config: MonitorConfig,
    collector: Collector,
    observer: O,
) -> MonitorSession<Lan, CoapUplink, O> {
    let mut session = MonitorSession::new(
        config,
        Lan::up(),
        RequestUplink::new(collector, "/registeredMonitors"),
        observer,
    )
    .unwrap();
    session.start(0);
    session
}

/// Fire every timer due up to `until`, stepping `clock` from deadline to
/// deadline. Leaves the clock at `until` unless the session ends first.
pub fn run_until<N, U, O>(
    session: &mut MonitorSession<N, U, O>,
    clock: &mut FixedTime,
    until: Timestamp,
) -> Control
where
    N: NetworkInterface,
    U: Uplink,
    O: MonitorObserver,
{
    while let Some(at) = session.next_deadline().filter(|at| *at <= until) {
        clock.set(at.max(clock.now()));
        let control = session.poll_timers(clock.now());
        if control.is_shutdown() {
            return control;
        }
    }
    clock.set(until);
    Control::Continue
}
