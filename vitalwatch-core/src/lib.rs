//! Core engine for the VitalWatch bedside monitor
//!
//! Simulates five physiological channels, raises a local alarm when a
//! sample leaves its comfort band, and reports to a central collector over
//! either a request/response or a publish/subscribe binding.
//!
//! Designed for constrained nodes:
//! - Fixed-size delivery queue and timer table, no unbounded buffers
//! - Single-threaded, every event handled to completion
//! - Sockets, clocks and inputs stay behind small traits
//!
//! ```no_run
//! use vitalwatch_core::{
//!     Control, MonitorConfig, MonitorSession, NetworkInterface, RequestTransport,
//!     RequestUplink, RequestError, StatusCode,
//! };
//! use core::net::IpAddr;
//!
//! struct Lan;
//! impl NetworkInterface for Lan {
//!     fn global_address(&self) -> Option<IpAddr> { "fd00::2".parse().ok() }
//!     fn has_default_route(&self) -> bool { true }
//! }
//!
//! struct Collector;
//! impl RequestTransport for Collector {
//!     fn send_request(&mut self, _to: &str, _body: &[u8]) -> Result<StatusCode, RequestError> {
//!         Ok(StatusCode::CREATED)
//!     }
//! }
//!
//! let uplink = RequestUplink::new(Collector, "/registeredMonitors");
//! let mut session = MonitorSession::new(MonitorConfig::default(), Lan, uplink, ()).unwrap();
//! session.start(0);
//!
//! // Registers on the first state check
//! session.poll_timers(1_000);
//! session.handle_patient_id("p-001", 1_200);
//!
//! // Samples flow from here on
//! if let Control::Shutdown(reason) = session.poll_timers(20_000) {
//!     eprintln!("monitor stopped: {reason}");
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

pub mod alarm;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod message;
pub mod observer;
pub mod queue;
pub mod resources;
pub mod sampling;
pub mod session;
pub mod time;
pub mod timer;
pub mod transport;
pub mod uplink;

// Public API
pub use alarm::{AcousticSignal, AlarmState, AlarmSystem};
pub use config::{Binding, ChannelTable, MonitorConfig};
pub use constants::{Channel, ChannelProfile, Thresholds};
pub use errors::{ConfigError, PublishError, RequestError, SessionError};
pub use events::MonitorEvent;
pub use message::{AlarmCommand, Destinations};
pub use observer::MonitorObserver;
pub use queue::{DeliveryQueue, MonitorQueue};
pub use resources::{ResourceResponse, ResourceTable};
pub use sampling::{Sample, SampleGenerator};
pub use session::{Control, MonitorSession, SessionState};
pub use time::{TimeSource, Timestamp};
pub use timer::{TimerId, TimerWheel};
pub use transport::{NetworkInterface, PublishTransport, RequestTransport, StatusCode};
pub use uplink::{Delivery, Opened, PublishUplink, RequestUplink, Uplink};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
