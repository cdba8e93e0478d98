//! MQTT Binding for the Publish/Subscribe Uplink
//!
//! [`MqttPublisher`] implements the core's `PublishTransport` on top of a
//! `rumqttc` client. Calls from the session never wait:
//!
//! - `connect` creates the client and spawns its event loop task
//! - `subscribe` and `publish` only enqueue requests for that task
//!
//! The client's request channel is the send buffer. When it is full,
//! `publish` answers `WouldBlock` and the session parks the message in its
//! retry queue.
//!
//! Broker traffic comes back as `MonitorEvent`s on an unbounded channel the
//! event loop drains:
//!
//! | Broker packet           | Event                              |
//! |-------------------------|------------------------------------|
//! | CONNACK accepted        | `LinkConnected`                    |
//! | CONNACK refused         | `LinkDisconnected`                 |
//! | SUBACK                  | `Subscribed { success }`           |
//! | PUBLISH                 | `Inbound { topic, payload }`       |
//! | DISCONNECT, I/O error   | `LinkDisconnected` (task ends)     |

use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use vitalwatch_core::config::CollectorConfig;
use vitalwatch_core::constants::session::SEND_BUFFER_CAPACITY;
use vitalwatch_core::errors::PublishError;
use vitalwatch_core::transport::PublishTransport;
use vitalwatch_core::MonitorEvent;

/// Shortest keep-alive sent to the broker
const MIN_KEEP_ALIVE_SECS: u16 = 5;

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Requests the client buffers before `publish` would block
    pub request_capacity: usize,
}

impl MqttConfig {
    /// Settings for the broker named in `collector`
    pub fn from_collector(collector: &CollectorConfig) -> Self {
        Self {
            host: collector.host.clone(),
            port: collector.mqtt_port,
            keep_alive: Duration::from_secs(u64::from(collector.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS))),
            request_capacity: SEND_BUFFER_CAPACITY,
        }
    }
}

/// Non-blocking broker client
#[derive(Debug)]
pub struct MqttPublisher {
    config: MqttConfig,
    events: UnboundedSender<MonitorEvent>,
    client: Option<AsyncClient>,
    task: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    /// Client reporting broker events on `events`. Not connected yet.
    pub fn new(config: MqttConfig, events: UnboundedSender<MonitorEvent>) -> Self {
        Self { config, events, client: None, task: None }
    }

    /// Whether the event loop task is alive
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Ask the broker to close the session and stop the event loop
    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                log::debug!("disconnect not sent: {e}");
            }
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn client(&self) -> Result<&AsyncClient, PublishError> {
        match &self.client {
            Some(client) if self.is_running() => Ok(client),
            _ => Err(PublishError::NotConnected),
        }
    }
}

impl PublishTransport for MqttPublisher {
    fn connect(&mut self, client_id: &str) -> Result<(), PublishError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| PublishError::Client { reason: "no async runtime" })?;

        let mut options = MqttOptions::new(client_id, self.config.host.as_str(), self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        let (client, eventloop) = AsyncClient::new(options, self.config.request_capacity);

        log::info!("connecting to mqtt://{}:{}", self.config.host, self.config.port);
        self.close();
        self.task = Some(runtime.spawn(drive(eventloop, self.events.clone())));
        self.client = Some(client);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError> {
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|_| PublishError::Client { reason: "subscribe request not accepted" })
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> nb::Result<(), PublishError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(nb::Error::Other(PublishError::InvalidMessage { reason: "bad topic" }));
        }
        let client = self.client().map_err(nb::Error::Other)?;
        match client.try_publish(topic, QoS::AtMostOnce, false, payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(ClientError::TryRequest(_)) => Err(nb::Error::WouldBlock),
            Err(ClientError::Request(_)) => Err(nb::Error::Other(PublishError::NotConnected)),
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Map one incoming broker packet to a session event
pub fn translate(packet: Packet) -> Option<MonitorEvent> {
    match packet {
        Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
            Some(MonitorEvent::LinkConnected)
        }
        Packet::ConnAck(ack) => {
            log::error!("broker refused connection: {:?}", ack.code);
            Some(MonitorEvent::LinkDisconnected)
        }
        Packet::SubAck(ack) => {
            let success = !ack.return_codes.is_empty()
                && ack
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
            Some(MonitorEvent::Subscribed { success })
        }
        Packet::Publish(publish) => Some(MonitorEvent::Inbound {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Packet::Disconnect => Some(MonitorEvent::LinkDisconnected),
        _ => None,
    }
}

async fn drive(mut eventloop: EventLoop, events: UnboundedSender<MonitorEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(packet)) => match translate(packet) {
                Some(event) => event,
                None => continue,
            },
            Ok(Event::Outgoing(_)) => continue,
            Err(e) => {
                log::error!("broker connection lost: {e}");
                MonitorEvent::LinkDisconnected
            }
        };

        let last = event == MonitorEvent::LinkDisconnected;
        if events.send(event).is_err() || last {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish, SubAck};
    use tokio::sync::mpsc;

    fn config(port: u16, request_capacity: usize) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".into(),
            port,
            keep_alive: Duration::from_secs(60),
            request_capacity,
        }
    }

    #[test]
    fn test_config_from_collector() {
        let mut collector = CollectorConfig { host: "fd00::1".into(), ..CollectorConfig::default() };
        let mqtt = MqttConfig::from_collector(&collector);
        assert_eq!(mqtt.port, collector.mqtt_port);
        assert_eq!(mqtt.request_capacity, SEND_BUFFER_CAPACITY);
        assert_eq!(mqtt.keep_alive, Duration::from_secs(u64::from(collector.keep_alive_secs)));

        collector.keep_alive_secs = 1;
        let mqtt = MqttConfig::from_collector(&collector);
        assert_eq!(mqtt.keep_alive, Duration::from_secs(u64::from(MIN_KEEP_ALIVE_SECS)));
    }

    #[test]
    fn test_translate_connack() {
        assert_eq!(
            translate(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false))),
            Some(MonitorEvent::LinkConnected)
        );
        assert_eq!(
            translate(Packet::ConnAck(ConnAck::new(ConnectReturnCode::NotAuthorized, false))),
            Some(MonitorEvent::LinkDisconnected)
        );
    }

    #[test]
    fn test_translate_suback() {
        let granted = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtMostOnce)]);
        assert_eq!(translate(Packet::SubAck(granted)), Some(MonitorEvent::Subscribed { success: true }));

        let refused = SubAck::new(2, vec![SubscribeReasonCode::Failure]);
        assert_eq!(translate(Packet::SubAck(refused)), Some(MonitorEvent::Subscribed { success: false }));
    }

    #[test]
    fn test_translate_publish() {
        let publish = Publish::new("cmd/smartICU/fd00::2/patient-state/alarm-state", QoS::AtMostOnce, b"{\"alarm\":true}".to_vec());
        assert_eq!(
            translate(Packet::Publish(publish)),
            Some(MonitorEvent::Inbound {
                topic: "cmd/smartICU/fd00::2/patient-state/alarm-state".into(),
                payload: b"{\"alarm\":true}".to_vec(),
            })
        );
        assert_eq!(translate(Packet::PingResp), None);
    }

    #[test]
    fn test_publish_before_connect() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut publisher = MqttPublisher::new(config(1883, 4), tx);
        assert_eq!(publisher.publish("t", b"x"), Err(nb::Error::Other(PublishError::NotConnected)));
        assert_eq!(publisher.subscribe("t"), Err(PublishError::NotConnected));
    }

    #[test]
    fn test_connect_needs_runtime() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut publisher = MqttPublisher::new(config(1883, 4), tx);
        assert!(publisher.connect("fd00::2").is_err());
    }

    #[tokio::test]
    async fn test_full_request_channel_would_block() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut publisher = MqttPublisher::new(config(1, 2), tx);
        publisher.connect("fd00::2").unwrap();

        // The event loop task has not run yet, nothing drains the channel
        assert_eq!(publisher.publish("a", b"1"), Ok(()));
        assert_eq!(publisher.publish("b", b"2"), Ok(()));
        assert_eq!(publisher.publish("c", b"3"), Err(nb::Error::WouldBlock));
        assert!(matches!(publisher.publish("a/#", b"4"), Err(nb::Error::Other(PublishError::InvalidMessage { .. }))));
    }

    #[tokio::test]
    async fn test_unreachable_broker_disconnects() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut publisher = MqttPublisher::new(config(1, 4), tx);
        publisher.connect("fd00::2").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await.unwrap();
        assert_eq!(event, Some(MonitorEvent::LinkDisconnected));
    }
}
