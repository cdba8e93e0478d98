//! Session lifecycle states

use core::fmt;

use crate::errors::SessionError;

/// Where the monitor is in its lifecycle
///
/// ```text
/// STARTED ─▶ NETWORK_READY ─┬───────────────────────────────────────────┐
///                           │ publish/subscribe only:                   │
///                           └▶ CONNECTING ─▶ CONNECTED ─▶ SUBSCRIBING ─▶ SUBSCRIBED
///                                               ▲              │ (nack)     │
///                                               └──────────────┘            │
///                                                                           ▼
///            OPERATIONAL ◀──── patient id ──── WAITING_PATIENT_ID ◀─────────┘
///                 └──────────── long reset ───────────▲
///
/// terminal: REGISTRATION_FAILED, DISCONNECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Waiting for an address and a default route
    Started,
    /// Network up, registration or connection next
    NetworkReady,
    /// Broker connection requested
    Connecting,
    /// Broker connection accepted
    Connected,
    /// Subscription requested
    Subscribing,
    /// Subscription acknowledged
    Subscribed,
    /// Registered, no patient bound
    WaitingPatientId,
    /// Patient bound, sampling
    Operational,
    /// Collector refused or never answered the registration
    RegistrationFailed,
    /// Broker link lost
    Disconnected,
}

impl SessionState {
    /// Upper-case name used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionState::Started => "STARTED",
            SessionState::NetworkReady => "NETWORK_READY",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Subscribing => "SUBSCRIBING",
            SessionState::Subscribed => "SUBSCRIBED",
            SessionState::WaitingPatientId => "WAITING_PATIENT_ID",
            SessionState::Operational => "OPERATIONAL",
            SessionState::RegistrationFailed => "REGISTRATION_FAILED",
            SessionState::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the event loop should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep running
    Continue,
    /// Session torn down; exit with this reason
    Shutdown(SessionError),
}

impl Control {
    /// `true` for [`Control::Shutdown`]
    pub fn is_shutdown(self) -> bool {
        matches!(self, Control::Shutdown(_))
    }
}
