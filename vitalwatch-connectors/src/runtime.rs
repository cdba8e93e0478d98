//! Monitor event loop
//!
//! One current-thread task owns the session. Each turn of the loop waits for
//! the first of:
//!
//! - the earliest timer deadline of the session
//! - an event from the broker client
//! - a line on the operator console (stdin)
//! - a CoAP request on the resource server
//! - a termination signal
//!
//! and hands exactly that one to the session before waiting again. With the
//! resource server up, resources the turn changed are then pushed to their
//! observers.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use vitalwatch_core::constants::session::{COAP_ACK_TIMEOUT_MS, COAP_MAX_RETRANSMIT, DEFAULT_COAP_PORT};
use vitalwatch_core::constants::{MAX_TOPIC_LEN, PAYLOAD_BUFFER_LEN, QUEUE_CAPACITY};
use vitalwatch_core::time::{MonotonicTime, TimeSource, Timestamp};
use vitalwatch_core::transport::NetworkInterface;
use vitalwatch_core::{
    Binding, Control, MonitorConfig, MonitorEvent, MonitorSession, PublishUplink, RequestUplink,
    ResourceTable, SessionError, Uplink,
};

use crate::coap::{handle_request, CoapConfig, CoapRequestTransport, Observers, ResourceServer, MAX_DATAGRAM};
use crate::console::parse_line;
use crate::mqtt::{MqttConfig, MqttPublisher};
use crate::net::HostNetwork;
use crate::{ConnectorError, ConnectorResult};

/// Host-side options the configuration file does not carry
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Report this address instead of looking one up
    pub address: Option<IpAddr>,
    /// Port of the resource server (request/response binding)
    pub resource_port: u16,
    /// Read operator commands from stdin
    pub console: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { address: None, resource_port: DEFAULT_COAP_PORT, console: true }
    }
}

/// Uplink of the publish/subscribe binding
pub type MqttUplink = PublishUplink<MqttPublisher, QUEUE_CAPACITY, MAX_TOPIC_LEN, PAYLOAD_BUFFER_LEN>;

/// Run a monitor until its session ends.
///
/// A stop request (console, signal) is a clean end; any other termination
/// comes back as [`ConnectorError::Session`].
pub async fn run(config: MonitorConfig, options: RuntimeOptions) -> ConnectorResult<()> {
    let collector_port = match config.binding {
        Binding::Coap => config.collector.coap_port,
        Binding::Mqtt => config.collector.mqtt_port,
    };
    let mut network = HostNetwork::new(&config.collector.host, collector_port)?;
    if let Some(address) = options.address {
        network = network.with_address(address);
    }
    let table = ResourceTable::from_channels(&config.channels);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    match config.binding {
        Binding::Coap => {
            let coap = CoapConfig::new(network.collector())
                .ack_timeout(Duration::from_millis(COAP_ACK_TIMEOUT_MS))
                .max_retransmit(COAP_MAX_RETRANSMIT)
                .request_timeout(Duration::from_millis(config.collector.request_timeout_ms));
            let uplink = RequestUplink::new(
                CoapRequestTransport::new(coap)?,
                config.collector.registration_resource.clone(),
            );
            let listen = match network.collector() {
                SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, options.resource_port)),
                SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, options.resource_port)),
            };
            let server = ResourceServer::bind(listen).await?;

            let mut session = MonitorSession::new(config, network, uplink, table)?;
            // Nothing produces events for this binding; keep the channel open
            let _events_tx = events_tx;
            finish(event_loop(&mut session, events_rx, Some(&server), options.console).await)
        }
        Binding::Mqtt => {
            let publisher = MqttPublisher::new(MqttConfig::from_collector(&config.collector), events_tx);
            let uplink: MqttUplink = PublishUplink::new(publisher);

            let mut session = MonitorSession::new(config, network, uplink, table)?;
            let reason = event_loop(&mut session, events_rx, None, options.console).await;
            session.uplink_mut().transport_mut().close();
            if session.uplink().dropped() > 0 {
                log::warn!("{} messages were dropped on a full retry queue", session.uplink().dropped());
            }
            finish(reason)
        }
    }
}

fn finish(reason: SessionError) -> ConnectorResult<()> {
    match reason {
        SessionError::Stopped => Ok(()),
        reason => Err(ConnectorError::Session(reason)),
    }
}

enum Wake {
    Timers,
    Event(MonitorEvent),
    Console(io::Result<Option<String>>),
    Request(io::Result<(usize, SocketAddr)>),
    Signal,
}

async fn event_loop<N, U>(
    session: &mut MonitorSession<N, U, ResourceTable>,
    mut events: UnboundedReceiver<MonitorEvent>,
    server: Option<&ResourceServer>,
    mut console_open: bool,
) -> SessionError
where
    N: NetworkInterface,
    U: Uplink,
{
    let clock = MonotonicTime::new();
    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut datagram = vec![0u8; MAX_DATAGRAM];
    let mut observers = Observers::new();

    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);

    session.start(clock.now());
    loop {
        let deadline = session.next_deadline().map(|at| instant_at(&clock, at));
        let wake = tokio::select! {
            _ = sleep_until(deadline) => Wake::Timers,
            Some(event) = events.recv() => Wake::Event(event),
            line = console.next_line(), if console_open => Wake::Console(line),
            request = receive(server, &mut datagram) => Wake::Request(request),
            _ = &mut signal => Wake::Signal,
        };

        let now = clock.now();
        let control = match wake {
            Wake::Timers => session.poll_timers(now),
            Wake::Event(event) => session.dispatch(event, now),
            Wake::Console(Ok(Some(line))) => match parse_line(&line) {
                Some(event) => session.dispatch(event, now),
                None => Control::Continue,
            },
            Wake::Console(Ok(None)) => {
                log::info!("console closed");
                console_open = false;
                Control::Continue
            }
            Wake::Console(Err(e)) => {
                log::warn!("console unreadable: {e}");
                console_open = false;
                Control::Continue
            }
            Wake::Request(Ok((len, peer))) => match (
                server,
                handle_request(session.observer(), &mut observers, peer, &datagram[..len]),
            ) {
                (Some(server), Some((response, event))) => {
                    if let Err(e) = server.reply(&response, peer).await {
                        log::warn!("reply to {peer} failed: {e}");
                    }
                    match event {
                        Some(event) => session.dispatch(event, now),
                        None => Control::Continue,
                    }
                }
                _ => Control::Continue,
            },
            Wake::Request(Err(e)) => {
                log::warn!("resource server receive failed: {e}");
                Control::Continue
            }
            Wake::Signal => {
                log::info!("termination signal received");
                session.shutdown()
            }
        };

        if let Control::Shutdown(reason) = control {
            log::info!("session ended in {}: {reason}", session.state());
            return reason;
        }

        let changed = session.observer_mut().take_changes();
        if let Some(server) = server {
            for path in changed {
                for (notification, peer) in observers.notifications(session.observer(), path) {
                    if let Err(e) = server.reply(&notification, peer).await {
                        log::warn!("notification to {peer} failed: {e}");
                    }
                }
            }
        }
    }
}

fn instant_at(clock: &MonotonicTime, at: Timestamp) -> Instant {
    Instant::from_std(clock.origin() + Duration::from_millis(at))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn receive(server: Option<&ResourceServer>, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    match server {
        Some(server) => server.receive(buffer).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
