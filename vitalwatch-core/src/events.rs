//! Event Types for the Monitor Event Loop
//!
//! ## Overview
//!
//! The monitor is a single-threaded cooperative program. Everything that can
//! happen to it (a timer firing, a line on the operator console, a button
//! press, a broker callback, a remote command) is one [`MonitorEvent`], and
//! [`MonitorSession::dispatch`](crate::session::MonitorSession::dispatch)
//! handles exactly one of them to completion before the next.
//!
//! ```text
//! timers ──┐
//! console ─┤                    ┌──────────────────┐
//! button ──┼─▶ MonitorEvent ──▶ │ session.dispatch │ ──▶ Control
//! broker ──┤                    └──────────────────┘
//! resources┘
//! ```
//!
//! Tagged variants keep the dispatcher exhaustive: adding an event source
//! means adding a variant, and the compiler points at every match that has to
//! learn about it.

use alloc::string::String;
use alloc::vec::Vec;

use crate::message::AlarmCommand;
use crate::timer::TimerId;

/// Everything the session reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A timer expired
    Timer(TimerId),

    /// Operator entered a patient id
    PatientId(String),

    /// Reset button held for `seconds`
    Reset {
        /// Whole seconds the button was held
        seconds: u32,
    },

    /// Broker accepted the connection
    LinkConnected,

    /// Broker connection lost or refused
    LinkDisconnected,

    /// Broker answered a subscription
    Subscribed {
        /// Whether every requested topic was granted
        success: bool,
    },

    /// Message received on a subscribed topic
    Inbound {
        /// Topic the message arrived on
        topic: String,
        /// Raw body
        payload: Vec<u8>,
    },

    /// Decoded remote alarm command (resource write)
    AlarmCommand(AlarmCommand),

    /// Operator asked the monitor to stop
    Shutdown,
}

impl MonitorEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Timer(_) => "timer",
            MonitorEvent::PatientId(_) => "patient-id",
            MonitorEvent::Reset { .. } => "reset",
            MonitorEvent::LinkConnected => "link-connected",
            MonitorEvent::LinkDisconnected => "link-disconnected",
            MonitorEvent::Subscribed { .. } => "subscribed",
            MonitorEvent::Inbound { .. } => "inbound",
            MonitorEvent::AlarmCommand(_) => "alarm-command",
            MonitorEvent::Shutdown => "shutdown",
        }
    }
}
