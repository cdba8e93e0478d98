//! Error Types for the Monitor Session
//!
//! ## Design Philosophy
//!
//! Errors here follow the failure taxonomy of the monitor:
//!
//! 1. **Fatal**: [`SessionError`] ends the session. Registration was refused
//!    or timed out, or the broker link dropped. The only recovery is a
//!    process restart.
//!
//! 2. **Recoverable-transient**: a full transport send buffer. This is not an
//!    error variant at all; transports report it as `nb::Error::WouldBlock`
//!    and the delivery queue absorbs it.
//!
//! 3. **Reported**: [`PublishError`] and [`RequestError`] describe a single
//!    failed operation. They are logged and the message is discarded.
//!
//! 4. **Startup**: [`ConfigError`] rejects an inconsistent configuration
//!    before the session is built.
//!
//! All variants are `Copy` and carry only `&'static str` context so they can
//! be returned from hot paths without allocating.

use thiserror_no_std::Error;

/// Result type for configuration checks
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reasons a session terminates
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Collector answered the registration with an unexpected status
    #[error("Registration rejected with status {class}.{detail:02}")]
    RegistrationRejected {
        /// Response class (the `2` in `2.01`)
        class: u8,
        /// Response detail (the `01` in `2.01`)
        detail: u8,
    },

    /// Registration request could not be completed
    #[error("Registration failed: {0}")]
    RegistrationFailed(RequestError),

    /// Broker connection could not be opened or subscribed
    #[error("Link setup failed: {0}")]
    LinkSetup(PublishError),

    /// Broker link dropped
    #[error("Disconnected from the collector")]
    Disconnected,

    /// Registration body could not be encoded
    #[error("Registration message could not be encoded")]
    Encode,

    /// Operator asked the monitor to stop
    #[error("Stopped by operator")]
    Stopped,
}

impl From<EncodeError> for SessionError {
    fn from(_: EncodeError) -> Self {
        SessionError::Encode
    }
}

/// Failure of a blocking request/response exchange
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// No response before the deadline
    #[error("Timeout waiting for response")]
    Timeout,

    /// The request never left the device
    #[error("Transport error: {reason}")]
    Transport {
        /// What went wrong
        reason: &'static str,
    },

    /// A response arrived but could not be decoded
    #[error("Malformed response")]
    MalformedResponse,
}

/// Failure of a publish/subscribe operation
///
/// A full send buffer is not listed here; see the module docs.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// No broker connection
    #[error("Not connected")]
    NotConnected,

    /// Topic or payload rejected by the client
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong
        reason: &'static str,
    },

    /// Client failed for another reason
    #[error("Client error: {reason}")]
    Client {
        /// What went wrong
        reason: &'static str,
    },
}

/// Inconsistent monitor configuration
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `lower_bound > upper_bound`
    #[error("Channel {channel}: lower bound {lower} above upper bound {upper}")]
    InvalidBounds {
        /// Channel name
        channel: &'static str,
        /// Configured lower bound
        lower: i32,
        /// Configured upper bound
        upper: i32,
    },

    /// Negative random walk step
    #[error("Channel {channel}: negative deviation {deviation}")]
    NegativeDeviation {
        /// Channel name
        channel: &'static str,
        /// Configured deviation
        deviation: i32,
    },

    /// A timer period or duration of zero
    #[error("Interval {name} must be greater than zero")]
    ZeroInterval {
        /// Which interval
        name: &'static str,
    },

    /// Short and long reset share a press duration
    #[error("Alarm and patient reset both use {seconds} s")]
    AmbiguousReset {
        /// Shared duration
        seconds: u32,
    },

    /// Empty collector host
    #[error("Collector host must not be empty")]
    MissingCollector,
}

/// Failure to encode an outbound message
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Message encoding failed")]
pub struct EncodeError;
