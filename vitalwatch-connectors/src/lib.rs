//! Host Bindings for the VitalWatch Monitor
//!
//! ## Overview
//!
//! `vitalwatch-core` decides what the monitor does; this crate gives it a
//! network, a clock, an operator console and a collector to talk to. Each
//! binding implements one of the core's transport traits:
//!
//! | Binding | Core trait          | Library     | Outbound                 | Inbound              |
//! |---------|---------------------|-------------|--------------------------|----------------------|
//! | CoAP    | `RequestTransport`  | coap-lite   | registration, notifications | GET/PUT/observe on resources |
//! | MQTT    | `PublishTransport`  | rumqttc     | telemetry, alarm, ids    | alarm command topic  |
//!
//! ### CoAP
//!
//! **When to use:**
//! - Constrained networks (6LoWPAN border routers, lossy radio)
//! - Collector polls or observes the monitor (`Observe` option)
//!
//! **Characteristics:**
//! - Registration is a Confirmable POST, retransmitted with exponential
//!   backoff until acknowledged or given up
//! - Afterwards the monitor answers GET/PUT on its resources and pushes
//!   Non-confirmable notifications to observers of changed resources
//!
//! ### MQTT
//!
//! **When to use:**
//! - A broker is reachable and several consumers want the telemetry
//!
//! **Characteristics:**
//! - Persistent connection, keep-alive 60 s
//! - QoS 0 publishes; a full client request channel is the send-buffer-full
//!   signal the core's retry queue absorbs
//! - Connection loss ends the session
//!
//! ## Event Loop
//!
//! [`runtime::run`] owns the session on a current-thread tokio runtime. Every
//! source (timers, console lines, broker callbacks, CoAP requests, Ctrl-C)
//! becomes one `MonitorEvent` handled to completion before the next, so the
//! core never needs a lock.
//!
//! ## Example Usage
//!
//! ```no_run
//! use vitalwatch_connectors::{runtime, settings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = settings::load(Some("monitor.toml".as_ref()))?;
//! runtime::run(config, runtime::RuntimeOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod console;
pub mod net;
pub mod settings;

#[cfg(feature = "coap")]
pub mod coap;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(all(feature = "mqtt", feature = "coap"))]
pub mod runtime;

// Re-export common types
#[cfg(feature = "coap")]
pub use coap::{CoapConfig, CoapError, CoapRequestTransport, Observers, ResourceServer};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttPublisher};
pub use net::HostNetwork;

use thiserror::Error;

/// Errors raised while setting up or running a binding
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Socket could not be opened or used
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Collector host did not resolve
    #[error("Cannot resolve collector {0}")]
    Resolve(String),

    /// Configuration rejected by the loader or by the core
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session ended for a reason other than a stop request
    #[error("Session ended: {0}")]
    Session(#[from] vitalwatch_core::SessionError),

    /// CoAP endpoint could not be set up
    #[cfg(feature = "coap")]
    #[error("CoAP error: {0}")]
    Coap(#[from] coap::CoapError),
}

impl From<config::ConfigError> for ConnectorError {
    fn from(e: config::ConfigError) -> Self {
        ConnectorError::Config(e.to_string())
    }
}

impl From<vitalwatch_core::ConfigError> for ConnectorError {
    fn from(e: vitalwatch_core::ConfigError) -> Self {
        ConnectorError::Config(e.to_string())
    }
}

/// Result alias for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;
