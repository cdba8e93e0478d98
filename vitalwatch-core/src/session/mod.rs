//! Monitor Session Controller
//!
//! ## Overview
//!
//! [`MonitorSession`] is the one owned aggregate of the monitor. It holds
//! the lifecycle state, the alarm, the simulated sensors, the timers and the
//! uplink, and it is the only thing that talks to the collector. The host
//! event loop owns the session and feeds it events one at a time:
//!
//! ```text
//! loop {
//!     wait for: next timer deadline | console line | broker callback | request
//!     control = session.poll_timers(now)   // or session.dispatch(event, now)
//!     if control is Shutdown: exit
//! }
//! ```
//!
//! Nothing is shared and nothing blocks except the single registration
//! request of the request/response binding, which happens once before any
//! telemetry flows.
//!
//! ## Lifecycle
//!
//! The periodic state check drives bring-up. Each tick runs the handler of
//! the current state and falls through to the next one if the state changed,
//! so a monitor with a ready network registers on the same tick it notices
//! the network.
//!
//! - `STARTED`: wait for a global address and a default route.
//! - `NETWORK_READY`: derive the monitor id from the address, build the
//!   topics, open the uplink. Request/response registers (blocking) and goes
//!   straight to `WAITING_PATIENT_ID`; publish/subscribe starts connecting.
//! - `CONNECTED`: subscribe to the alarm command topic.
//! - `SUBSCRIBED`: announce the monitor, start the sensor processes.
//! - `WAITING_PATIENT_ID`: bind the first patient id received.
//! - `OPERATIONAL`: route samples, evaluate alarms, accept reset commands.
//!
//! Registration failure and broker disconnection are fatal: the session
//! tears itself down and every later `dispatch` returns
//! [`Control::Shutdown`].

mod state;

pub use state::{Control, SessionState};

use alloc::format;
use alloc::string::String;
use core::net::IpAddr;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::alarm::{AlarmState, AlarmSystem};
use crate::config::MonitorConfig;
use crate::constants::session::AUTO_PATIENT_ID_PREFIX;
use crate::constants::{Channel, MONITOR_ID_LEN, PATIENT_ID_LEN};
use crate::errors::{ConfigResult, EncodeError, SessionError};
use crate::events::MonitorEvent;
use crate::message::{self, AlarmCommand, Destinations, Payload};
use crate::observer::MonitorObserver;
use crate::sampling::{Sample, SampleGenerator, SubscriberId};
use crate::time::Timestamp;
use crate::timer::{TimerId, TimerWheel};
use crate::transport::NetworkInterface;
use crate::uplink::{Opened, Uplink};

/// Seed used when the configuration does not name one
pub const DEFAULT_SEED: u64 = 0x5EED_0F_7A15;

/// The session is the only subscriber of its own sensors.
const SELF: SubscriberId = SubscriberId(1);

/// Longest prefix of `id` that fits a NUL-terminated buffer of `buffer_len`
/// bytes, cut on a character boundary.
pub fn truncate_id(id: &str, buffer_len: usize) -> &str {
    let max = buffer_len.saturating_sub(1);
    if id.len() <= max {
        return id;
    }
    let mut end = max;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    &id[..end]
}

#[derive(Debug, Clone, Copy)]
enum Route {
    Telemetry(Channel),
    AlarmState,
    MonitorRegistration,
    PatientRegistration,
}

/// The monitor: lifecycle, alarm, sensors, timers and uplink in one place
pub struct MonitorSession<N, U, O> {
    config: MonitorConfig,
    state: SessionState,
    network: N,
    uplink: U,
    observer: O,
    timers: TimerWheel,
    alarm: AlarmSystem,
    generator: SampleGenerator,
    rng: SmallRng,
    address: Option<IpAddr>,
    destinations: Option<Destinations>,
    patient: Option<String>,
    terminated: Option<SessionError>,
}

impl<N, U, O> MonitorSession<N, U, O>
where
    N: NetworkInterface,
    U: Uplink,
    O: MonitorObserver,
{
    /// Build a session in `STARTED`. Fails on an invalid configuration.
    pub fn new(config: MonitorConfig, network: N, uplink: U, observer: O) -> ConfigResult<Self> {
        config.validate()?;
        if config.binding != uplink.binding() {
            log::warn!(
                "configured binding {:?} but running {:?} uplink",
                config.binding,
                uplink.binding()
            );
        }

        let rng = SmallRng::seed_from_u64(config.seed.unwrap_or(DEFAULT_SEED));
        Ok(Self {
            alarm: AlarmSystem::new(config.timing.acoustic_duration_ms),
            generator: SampleGenerator::new(config.channels.clone()),
            config,
            state: SessionState::Started,
            network,
            uplink,
            observer,
            timers: TimerWheel::new(),
            rng,
            address: None,
            destinations: None,
            patient: None,
            terminated: None,
        })
    }

    /// Arm the state check (and the retry timer for queueing uplinks)
    pub fn start(&mut self, now: Timestamp) {
        log::info!("monitor started ({:?} binding)", self.uplink.binding());
        self.timers
            .arm_periodic(TimerId::StateCheck, now, self.config.timing.state_check_interval_ms);
        if self.uplink.retries() {
            self.timers
                .arm_periodic(TimerId::QueueRetry, now, self.config.timing.queue_retry_interval_ms);
        }
    }

    /// Handle one event to completion
    pub fn dispatch(&mut self, event: MonitorEvent, now: Timestamp) -> Control {
        if let Some(reason) = self.terminated {
            log::debug!("session over, {} event ignored", event.kind());
            return Control::Shutdown(reason);
        }

        match event {
            MonitorEvent::Timer(id) => self.on_timer(id, now),
            MonitorEvent::PatientId(id) => self.on_patient_id(&id, now),
            MonitorEvent::Reset { seconds } => self.on_reset(seconds, now),
            MonitorEvent::LinkConnected => self.on_link_connected(),
            MonitorEvent::LinkDisconnected => {
                self.fail(SessionState::Disconnected, SessionError::Disconnected)
            }
            MonitorEvent::Subscribed { success } => self.on_subscribed(success),
            MonitorEvent::Inbound { topic, payload } => self.on_inbound(&topic, &payload, now),
            MonitorEvent::AlarmCommand(command) => self.on_alarm_command(command, now),
            MonitorEvent::Shutdown => self.terminate(SessionError::Stopped),
        }
        self.control()
    }

    /// Fire every timer due at `now`
    pub fn poll_timers(&mut self, now: Timestamp) -> Control {
        for id in self.timers.expire(now) {
            let control = self.dispatch(MonitorEvent::Timer(id), now);
            if control.is_shutdown() {
                return control;
            }
        }
        self.control()
    }

    /// Patient id entry point for input collaborators
    pub fn handle_patient_id(&mut self, patient_id: &str, now: Timestamp) -> Control {
        self.dispatch(MonitorEvent::PatientId(patient_id.into()), now)
    }

    /// Reset button entry point for input collaborators
    pub fn handle_reset_command(&mut self, seconds: u32, now: Timestamp) -> Control {
        self.dispatch(MonitorEvent::Reset { seconds }, now)
    }

    /// Tear down on operator request
    pub fn shutdown(&mut self) -> Control {
        if self.terminated.is_none() {
            self.terminate(SessionError::Stopped);
        }
        self.control()
    }

    // ===== ACCESSORS =====

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bound patient
    pub fn patient_id(&self) -> Option<&str> {
        self.patient.as_deref()
    }

    /// Alarm subsystem
    pub fn alarm(&self) -> &AlarmSystem {
        &self.alarm
    }

    /// Identifier derived from the network address
    pub fn monitor_id(&self) -> Option<&str> {
        self.destinations.as_ref().map(Destinations::monitor_id)
    }

    /// Topics in use, once the monitor id is known
    pub fn destinations(&self) -> Option<&Destinations> {
        self.destinations.as_ref()
    }

    /// Messages parked for retry
    pub fn pending_deliveries(&self) -> usize {
        self.uplink.pending()
    }

    /// Earliest armed timer deadline
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Armed timers
    pub fn timers(&self) -> &TimerWheel {
        &self.timers
    }

    /// Simulated sensors
    pub fn generator(&self) -> &SampleGenerator {
        &self.generator
    }

    /// Active configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable observer
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Uplink
    pub fn uplink(&self) -> &U {
        &self.uplink
    }

    /// Mutable uplink
    pub fn uplink_mut(&mut self) -> &mut U {
        &mut self.uplink
    }

    /// Reason the session ended, if it did
    pub fn termination(&self) -> Option<SessionError> {
        self.terminated
    }

    // ===== LIFECYCLE =====

    fn control(&self) -> Control {
        match self.terminated {
            Some(reason) => Control::Shutdown(reason),
            None => Control::Continue,
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            log::info!("{} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn on_timer(&mut self, id: TimerId, now: Timestamp) {
        match id {
            TimerId::StateCheck => self.check_state(now),
            TimerId::AcousticSignal => self.alarm.on_acoustic_timeout(),
            TimerId::QueueRetry => {
                if let Some(outcome) = self.uplink.retry() {
                    log::debug!("retry outcome {outcome:?}, {} still queued", self.uplink.pending());
                }
            }
            TimerId::Sampling(channel) => self.on_sample_tick(channel, now),
        }
    }

    fn check_state(&mut self, now: Timestamp) {
        if self.state == SessionState::Started {
            self.poll_network();
        }
        if self.state == SessionState::NetworkReady {
            self.open_uplink(now);
        }
        if self.state == SessionState::Connected {
            self.subscribe();
        }
        if self.state == SessionState::Subscribed {
            self.announce_monitor(now);
        }
    }

    fn poll_network(&mut self) {
        match self.network.global_address() {
            Some(address) if self.network.has_default_route() => {
                log::info!("network ready, address {address}");
                self.address = Some(address);
                self.set_state(SessionState::NetworkReady);
            }
            _ => log::debug!("network not ready yet"),
        }
    }

    fn open_uplink(&mut self, now: Timestamp) {
        let Some(address) = self.address else {
            self.set_state(SessionState::Started);
            return;
        };
        let rendered = format!("{address}");
        let monitor_id = truncate_id(&rendered, MONITOR_ID_LEN);
        let destinations = Destinations::new(monitor_id);

        let opened = message::device_registration(monitor_id)
            .map_err(SessionError::from)
            .and_then(|registration| self.uplink.open(monitor_id, &registration));
        self.destinations = Some(destinations);

        match opened {
            Ok(Opened::Registered) => {
                self.generator.start_processes();
                self.enter_waiting_patient_id(now);
            }
            Ok(Opened::Pending) => self.set_state(SessionState::Connecting),
            Err(e @ SessionError::LinkSetup(_)) => self.fail(SessionState::Disconnected, e),
            Err(e) => self.fail(SessionState::RegistrationFailed, e),
        }
    }

    fn on_link_connected(&mut self) {
        if self.state == SessionState::Connecting {
            log::info!("connected to broker");
            self.set_state(SessionState::Connected);
        } else {
            log::debug!("connection event ignored in {}", self.state);
        }
    }

    fn subscribe(&mut self) {
        let Some(destinations) = self.destinations.as_ref() else {
            return;
        };
        match self.uplink.subscribe(destinations.alarm_command_topic()) {
            Ok(()) => self.set_state(SessionState::Subscribing),
            Err(e) => self.fail(SessionState::Disconnected, e),
        }
    }

    fn on_subscribed(&mut self, success: bool) {
        if self.state != SessionState::Subscribing {
            log::debug!("subscription ack ignored in {}", self.state);
            return;
        }
        if success {
            log::info!("subscribed to alarm commands");
            self.set_state(SessionState::Subscribed);
        } else {
            log::error!("subscription refused, retrying");
            self.set_state(SessionState::Connected);
        }
    }

    fn announce_monitor(&mut self, now: Timestamp) {
        let registration = self.monitor_id().map(message::device_registration);
        if let Some(registration) = registration {
            self.send(Route::MonitorRegistration, registration);
        }
        self.generator.start_processes();
        self.enter_waiting_patient_id(now);
    }

    fn enter_waiting_patient_id(&mut self, now: Timestamp) {
        self.set_state(SessionState::WaitingPatientId);
        if self.config.automatic_patient_id {
            let id = format!("{AUTO_PATIENT_ID_PREFIX}{:04x}", self.rng.gen::<u16>());
            log::info!("synthesizing patient id");
            self.on_patient_id(&id, now);
        } else {
            log::info!("waiting for a patient id");
        }
    }

    fn fail(&mut self, state: SessionState, reason: SessionError) {
        log::error!("{reason}");
        self.set_state(state);
        self.terminate(reason);
    }

    fn terminate(&mut self, reason: SessionError) {
        self.teardown();
        self.terminated = Some(reason);
    }

    /// Stop every timer, both sensor levels and the alarm. Idempotent.
    fn teardown(&mut self) {
        self.timers.cancel(TimerId::StateCheck);
        self.timers.cancel(TimerId::QueueRetry);
        self.generator.stop_processes(&mut self.timers);
        self.alarm.stop(&mut self.timers);
        log::info!("monitor stopped in {}", self.state);
    }

    // ===== PATIENT =====

    fn on_patient_id(&mut self, raw: &str, now: Timestamp) {
        if self.state != SessionState::WaitingPatientId {
            log::warn!("patient id ignored in {}", self.state);
            return;
        }
        let id = truncate_id(raw.trim(), PATIENT_ID_LEN);
        if id.is_empty() {
            log::warn!("empty patient id ignored");
            return;
        }

        log::info!("new patient id {id}");
        self.patient = Some(id.into());
        let registration = message::patient_registration(self.monitor_id(), id);
        self.send(Route::PatientRegistration, registration);
        self.observer.on_patient_changed(Some(id));

        self.generator.start_sampling(&mut self.rng, &mut self.timers, now, SELF);
        self.set_state(SessionState::Operational);
    }

    fn on_reset(&mut self, seconds: u32, now: Timestamp) {
        if self.state != SessionState::Operational {
            log::info!("reset of {seconds} s ignored in {}", self.state);
            return;
        }
        let unbind = seconds == self.config.reset.patient_secs;
        if !unbind && seconds != self.config.reset.alarm_secs {
            log::debug!("press of {seconds} s is not a reset");
            return;
        }

        log::info!("resetting the alarm");
        if self.alarm.stop(&mut self.timers).changed() {
            self.announce_alarm();
        }

        if unbind {
            log::info!("resetting the patient id");
            self.uplink.discard_pending();
            self.patient = None;
            self.observer.on_patient_changed(None);
            self.generator.stop_sampling(&mut self.timers);
            self.enter_waiting_patient_id(now);
        }
    }

    // ===== SAMPLES AND ALARM =====

    fn on_sample_tick(&mut self, channel: Channel, now: Timestamp) {
        let Some((subscriber, sample)) = self.generator.on_tick(channel, &mut self.rng, now) else {
            return;
        };
        if subscriber != SELF || self.state != SessionState::Operational {
            log::debug!("{channel} sample dropped in {}", self.state);
            return;
        }
        self.process_sample(sample, now);
    }

    fn process_sample(&mut self, sample: Sample, now: Timestamp) {
        let profile = self.config.channels.get(sample.channel);
        let thresholds = profile.thresholds;
        log::debug!("{}: {} {}", sample.channel, sample.value, profile.unit);
        let body = message::telemetry(sample.channel, sample.value, &profile.unit, sample.timestamp);

        self.send(Route::Telemetry(sample.channel), body);
        self.observer.on_sample(&sample);

        if self.alarm.evaluate(&mut self.timers, now, &thresholds, sample.value).changed() {
            log::warn!(
                "{} value {} outside ({}, {})",
                sample.channel,
                sample.value,
                thresholds.min,
                thresholds.max
            );
            self.announce_alarm();
        }
    }

    fn announce_alarm(&mut self) {
        let state = self.alarm.state();
        self.observer.on_alarm_state_changed(state);
        self.send(Route::AlarmState, message::alarm_state(state));
    }

    fn on_inbound(&mut self, topic: &str, payload: &[u8], now: Timestamp) {
        let expected = self.destinations.as_ref().map(Destinations::alarm_command_topic);
        if expected != Some(topic) {
            log::warn!("message on unexpected topic {topic} discarded");
            return;
        }
        match message::parse_alarm_command(payload) {
            Some(command) => self.on_alarm_command(command, now),
            None => log::warn!("alarm command discarded: bad format"),
        }
    }

    /// Remote commands come from the collector, so they are not echoed back.
    fn on_alarm_command(&mut self, command: AlarmCommand, now: Timestamp) {
        if self.state != SessionState::Operational {
            log::info!("alarm command discarded in {}", self.state);
            return;
        }
        match command {
            AlarmCommand::Start => {
                log::info!("remote alarm start");
                if self.alarm.start(&mut self.timers, now).changed() {
                    self.observer.on_alarm_state_changed(AlarmState::On);
                }
            }
            AlarmCommand::Stop => log::warn!("remote alarm stop is not supported"),
        }
    }

    fn send(&mut self, route: Route, body: Result<Payload, EncodeError>) {
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                log::error!("{route:?}: {e}");
                return;
            }
        };
        let Some(destinations) = self.destinations.as_ref() else {
            return;
        };
        let topic = match route {
            Route::Telemetry(channel) => destinations.telemetry_topic(channel),
            Route::AlarmState => destinations.alarm_state_topic(),
            Route::MonitorRegistration => destinations.monitor_registration_topic(),
            Route::PatientRegistration => destinations.patient_registration_topic(),
        };
        let outcome = self.uplink.deliver(topic, &body);
        log::trace!("{route:?} -> {outcome:?}");
    }
}
