//! Integration tests for the monitor session
//!
//! Drives complete sessions through both bindings with scripted
//! collaborators and virtual time: bring-up, patient binding, sampling,
//! alarms, backpressure and resets.

mod common;

use vitalwatch_core::{
    alarm::{AcousticSignal, AlarmState, AlarmSystem},
    config::Binding,
    constants::{Channel, RESET_ALARM_SECS, RESET_PATIENT_SECS},
    errors::{RequestError, SessionError},
    message::{MONITOR_REGISTRATION_TOPIC, PATIENT_REGISTRATION_TOPIC},
    resources::ResourceTable,
    time::{seconds, FixedTime, TimeSource},
    timer::{TimerId, TimerWheel},
    transport::StatusCode,
    Control, MonitorEvent, MonitorSession, SessionState, Thresholds,
};

use common::{
    coap_session, mqtt_session, pinned_config, run_until, Collector, Lan, MqttUplink, Recorder, MONITOR_ID,
};

/// Walk a publish/subscribe session to WAITING_PATIENT_ID at t = 3000.
fn bring_up(session: &mut MonitorSession<Lan, MqttUplink, Recorder>) {
    session.poll_timers(1_000);
    assert_eq!(session.state(), SessionState::Connecting);
    session.dispatch(MonitorEvent::LinkConnected, 1_500);
    session.poll_timers(2_000);
    assert_eq!(session.state(), SessionState::Subscribing);
    session.dispatch(MonitorEvent::Subscribed { success: true }, 2_500);
    session.poll_timers(3_000);
    assert_eq!(session.state(), SessionState::WaitingPatientId);
}

fn telemetry_topic(channel: Channel) -> String {
    format!("telemetry/smartICU/{MONITOR_ID}/patient-state/{}", channel.topic_segment())
}

fn alarm_topic() -> String {
    format!("telemetry/smartICU/{MONITOR_ID}/patient-state/alarm-state")
}

#[test]
fn test_breach_raises_alarm_once() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 45));
    bring_up(&mut session);
    session.handle_patient_id("p-001", 3_000);

    session.poll_timers(13_000);
    let broker = session.uplink().transport();
    assert_eq!(
        broker.last_on(&telemetry_topic(Channel::HeartRate)),
        Some(r#"{"heartRate":45,"unit":"bpm","timestamp":13}"#)
    );
    assert_eq!(broker.last_on(&alarm_topic()), Some(r#"{"alarm":true}"#));
    assert_eq!(session.observer().alarms, [AlarmState::On]);
    assert_eq!(session.alarm().acoustic(), AcousticSignal::On);

    // Still breaching, no second notification
    session.poll_timers(23_000);
    assert_eq!(session.observer().alarms, [AlarmState::On]);
    let announcements = session.uplink().transport().topics();
    assert_eq!(announcements.iter().filter(|t| **t == alarm_topic()).count(), 1);

    // Acoustic signal ends on its own, the alarm does not
    session.poll_timers(43_000);
    assert_eq!(session.alarm().acoustic(), AcousticSignal::Off);
    assert_eq!(session.alarm().state(), AlarmState::On);
}

#[test]
fn test_telemetry_timestamps_are_whole_seconds() {
    let mut clock = FixedTime::new(0);
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 80));

    run_until(&mut session, &mut clock, 1_200);
    session.dispatch(MonitorEvent::LinkConnected, clock.now());
    run_until(&mut session, &mut clock, 2_200);
    session.dispatch(MonitorEvent::Subscribed { success: true }, clock.now());
    run_until(&mut session, &mut clock, 3_000);
    assert_eq!(session.state(), SessionState::WaitingPatientId);

    // Bound off the second boundary, so every sample lands mid-second
    clock.advance(700);
    session.handle_patient_id("p-002", clock.now());
    assert_eq!(run_until(&mut session, &mut clock, 60_000), Control::Continue);
    assert_eq!(clock.now(), 60_000);

    let samples: Vec<_> =
        session.observer().samples.iter().filter(|s| s.channel == Channel::HeartRate).collect();
    let topic = telemetry_topic(Channel::HeartRate);
    let published: Vec<serde_json::Value> = session
        .uplink()
        .transport()
        .published
        .iter()
        .filter(|(t, _)| *t == topic)
        .map(|(_, payload)| serde_json::from_str(payload).unwrap())
        .collect();

    assert_eq!(samples.len(), 5);
    assert_eq!(published.len(), samples.len());
    for (sample, body) in samples.iter().zip(&published) {
        assert_eq!(sample.timestamp % 1_000, 700);
        assert_eq!(body["timestamp"], seconds(sample.timestamp));
        assert_eq!(body["heartRate"], 80);
    }
}

#[test]
fn test_alarm_stays_on_after_recovery() {
    let mut timers = TimerWheel::new();
    let mut alarm = AlarmSystem::new(30_000);
    let band = Thresholds { min: 50, max: 120 };

    assert!(alarm.evaluate(&mut timers, 0, &band, 45).changed());
    assert!(!alarm.evaluate(&mut timers, 10_000, &band, 60).changed());
    assert_eq!(alarm.state(), AlarmState::On);
}

#[test]
fn test_patient_binding_arms_generators() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 70));
    bring_up(&mut session);

    assert_eq!(session.handle_patient_id("p-001", 3_000), Control::Continue);
    assert_eq!(session.state(), SessionState::Operational);
    assert_eq!(session.patient_id(), Some("p-001"));
    for channel in Channel::ALL {
        assert!(session.generator().is_sampling(channel), "{channel}");
    }
    assert_eq!(session.timers().deadline(TimerId::Sampling(Channel::HeartRate)), Some(13_000));
    assert_eq!(
        session.uplink().transport().last_on(PATIENT_REGISTRATION_TOPIC),
        Some(format!(r#"{{"monitorID":"{MONITOR_ID}","patientID":"p-001"}}"#).as_str())
    );
    assert_eq!(session.observer().patients, [Some("p-001".to_owned())]);
}

#[test]
fn test_full_send_buffer_parks_and_retries_in_order() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 70));
    bring_up(&mut session);
    session.handle_patient_id("p-001", 3_000);
    session.uplink_mut().transport_mut().buffer_full = true;

    session.poll_timers(13_000); // heart rate
    session.poll_timers(14_000); // blood pressure
    assert_eq!(session.pending_deliveries(), 2);
    assert_eq!(session.uplink().queue().insert_index(), 2);

    session.poll_timers(16_000); // respiration, parked in slot 2
    assert_eq!(session.pending_deliveries(), 3);
    assert_eq!(session.uplink().queue().insert_index(), 3);

    session.uplink_mut().transport_mut().buffer_full = false;
    let published_before = session.uplink().transport().published.len();
    for _ in 0..3 {
        session.dispatch(MonitorEvent::Timer(TimerId::QueueRetry), 17_000);
    }

    assert_eq!(session.pending_deliveries(), 0);
    assert_eq!(session.uplink().queue().extract_index(), 3);
    let retried: Vec<&str> = session.uplink().transport().topics()[published_before..].to_vec();
    assert_eq!(
        retried,
        [
            telemetry_topic(Channel::HeartRate).as_str(),
            telemetry_topic(Channel::BloodPressure).as_str(),
            telemetry_topic(Channel::Respiration).as_str(),
        ]
    );
}

#[test]
fn test_full_queue_drops_silently() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 70));
    bring_up(&mut session);
    session.handle_patient_id("p-001", 3_000);
    session.uplink_mut().transport_mut().buffer_full = true;

    let mut now = 3_000;
    while session.uplink().dropped() == 0 {
        now += 1_000;
        assert_eq!(session.poll_timers(now), Control::Continue);
    }
    assert_eq!(session.pending_deliveries(), 10);
    assert_eq!(session.state(), SessionState::Operational);
}

#[test]
fn test_long_reset_unbinds_patient() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 45));
    bring_up(&mut session);
    session.handle_patient_id("p-001", 3_000);
    session.poll_timers(13_000);
    assert_eq!(session.alarm().state(), AlarmState::On);

    session.uplink_mut().transport_mut().buffer_full = true;
    session.poll_timers(14_000);
    assert_eq!(session.pending_deliveries(), 1);
    session.uplink_mut().transport_mut().buffer_full = false;

    session.handle_reset_command(RESET_PATIENT_SECS, 15_000);

    assert_eq!(session.alarm().state(), AlarmState::Off);
    assert_eq!(session.observer().alarms, [AlarmState::On, AlarmState::Off]);
    assert_eq!(session.uplink().transport().last_on(&alarm_topic()), Some(r#"{"alarm":false}"#));
    assert_eq!(session.patient_id(), None);
    assert_eq!(session.observer().patients.last(), Some(&None));
    assert_eq!(session.pending_deliveries(), 0);
    assert_eq!(session.state(), SessionState::WaitingPatientId);
    assert!(!session.timers().is_armed(TimerId::Sampling(Channel::HeartRate)));

    // A new patient can be bound right away
    session.handle_patient_id("p-002", 16_000);
    assert_eq!(session.state(), SessionState::Operational);
}

#[test]
fn test_short_reset_keeps_patient() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 45));
    bring_up(&mut session);
    session.handle_patient_id("p-001", 3_000);
    session.poll_timers(13_000);

    session.handle_reset_command(RESET_ALARM_SECS, 14_000);
    assert_eq!(session.alarm().state(), AlarmState::Off);
    assert_eq!(session.patient_id(), Some("p-001"));
    assert_eq!(session.state(), SessionState::Operational);

    // Next breaching sample raises it again
    session.poll_timers(23_000);
    assert_eq!(session.observer().alarms, [AlarmState::On, AlarmState::Off, AlarmState::On]);
}

#[test]
fn test_publish_bring_up_messages() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 70));
    bring_up(&mut session);

    let broker = session.uplink().transport();
    assert_eq!(broker.client_id.as_deref(), Some(MONITOR_ID));
    assert_eq!(
        broker.subscriptions,
        [format!("cmd/smartICU/{MONITOR_ID}/patient-state/alarm-state")]
    );
    assert_eq!(broker.topics(), [MONITOR_REGISTRATION_TOPIC]);
    assert!(session.timers().is_armed(TimerId::QueueRetry));
}

#[test]
fn test_remote_alarm_command() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 70));
    bring_up(&mut session);
    let topic = format!("cmd/smartICU/{MONITOR_ID}/patient-state/alarm-state");

    // Not operational yet
    session.dispatch(
        MonitorEvent::Inbound { topic: topic.clone(), payload: br#"{"alarm": true}"#.to_vec() },
        3_100,
    );
    assert_eq!(session.alarm().state(), AlarmState::Off);

    session.handle_patient_id("p-001", 3_200);
    session.dispatch(MonitorEvent::Inbound { topic, payload: br#"{"alarm": true}"#.to_vec() }, 3_300);
    assert_eq!(session.alarm().state(), AlarmState::On);
    assert_eq!(session.uplink().transport().last_on(&alarm_topic()), None);
}

#[test]
fn test_disconnect_is_fatal() {
    let mut session = mqtt_session(pinned_config(Binding::Mqtt, 70));
    bring_up(&mut session);
    session.handle_patient_id("p-001", 3_000);

    let control = session.dispatch(MonitorEvent::LinkDisconnected, 4_000);
    assert_eq!(control, Control::Shutdown(SessionError::Disconnected));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.timers().is_empty());
    assert!(!session.generator().processes_running());
    assert_eq!(session.poll_timers(50_000), Control::Shutdown(SessionError::Disconnected));
}

#[test]
fn test_request_binding_serves_resources() {
    let config = pinned_config(Binding::Coap, 70);
    let table = ResourceTable::from_channels(&config.channels);
    let mut session = coap_session(config, Collector::replying(Ok(StatusCode::CREATED)), table);

    session.poll_timers(1_000);
    assert_eq!(session.state(), SessionState::WaitingPatientId);
    let (resource, body) = &session.uplink().transport().requests[0];
    assert_eq!(resource, "/registeredMonitors");
    assert_eq!(
        String::from_utf8_lossy(body),
        format!(r#"{{"monitorID":"{MONITOR_ID}","registration":true}}"#)
    );

    session.handle_patient_id("p-001", 1_000);
    session.poll_timers(11_000);
    assert_eq!(session.observer().value(Channel::HeartRate), 70);
    assert_eq!(session.observer().patient(), "p-001");
    assert_eq!(session.observer().value(Channel::OxygenSaturation), -1);

    let (response, event) = session.observer().put("patientState/alarmState", br#"{"alarm":true}"#);
    assert_eq!(response.code, StatusCode::CREATED);
    session.dispatch(event.unwrap(), 11_500);
    assert_eq!(session.alarm().state(), AlarmState::On);
    assert_eq!(session.observer().alarm(), AlarmState::On);
}

#[test]
fn test_rejected_registration() {
    let mut session = coap_session(
        pinned_config(Binding::Coap, 70),
        Collector::replying(Ok(StatusCode::BAD_REQUEST)),
        Recorder::default(),
    );

    let control = session.poll_timers(1_000);
    assert_eq!(control, Control::Shutdown(SessionError::RegistrationRejected { class: 4, detail: 0 }));
    assert_eq!(session.state(), SessionState::RegistrationFailed);
    assert!(session.timers().is_empty());
}

#[test]
fn test_registration_timeout() {
    let mut session = coap_session(
        pinned_config(Binding::Coap, 70),
        Collector::replying(Err(RequestError::Timeout)),
        Recorder::default(),
    );

    assert_eq!(
        session.poll_timers(1_000),
        Control::Shutdown(SessionError::RegistrationFailed(RequestError::Timeout))
    );
    assert_eq!(session.state(), SessionState::RegistrationFailed);
}

#[test]
fn test_automatic_patient_id_after_reset() {
    let mut config = pinned_config(Binding::Coap, 70);
    config.automatic_patient_id = true;
    let mut session = coap_session(config, Collector::replying(Ok(StatusCode::CREATED)), Recorder::default());

    session.poll_timers(1_000);
    assert_eq!(session.state(), SessionState::Operational);
    assert!(session.patient_id().unwrap().starts_with("auto_"));

    session.handle_reset_command(RESET_PATIENT_SECS, 2_000);
    assert_eq!(session.state(), SessionState::Operational);
    assert_eq!(session.observer().patients.len(), 3);
}
