//! Transport Collaborator Traits
//!
//! The session never touches sockets. It talks to three small traits that
//! the host implements:
//!
//! - [`NetworkInterface`]: is the device addressable and routed yet?
//! - [`RequestTransport`]: one blocking request/response exchange
//! - [`PublishTransport`]: non-blocking connect/subscribe/publish
//!
//! Asynchronous publish/subscribe callbacks (connected, subscribed, inbound
//! message, disconnected) do not go through these traits. The host turns
//! them into [`crate::events::MonitorEvent`]s and dispatches them.
//!
//! ## Backpressure
//!
//! `PublishTransport::publish` returns `nb::Result`. `nb::Error::WouldBlock`
//! means the client's send buffer is full right now; it is the only failure
//! the delivery queue absorbs. Everything else is `nb::Error::Other`.

use core::fmt;
use core::net::IpAddr;

use crate::errors::{PublishError, RequestError};

/// Network readiness check
pub trait NetworkInterface {
    /// Routable (non link-local) address, once configured
    fn global_address(&self) -> Option<IpAddr>;

    /// Whether a default route is installed
    fn has_default_route(&self) -> bool;
}

/// Response code of a request/response exchange (`class.detail`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode {
    /// Class digit (2 success, 4 client error, 5 server error)
    pub class: u8,
    /// Two-digit detail
    pub detail: u8,
}

impl StatusCode {
    /// 2.01 Created
    pub const CREATED: StatusCode = StatusCode::new(2, 1);
    /// 2.04 Changed
    pub const CHANGED: StatusCode = StatusCode::new(2, 4);
    /// 2.05 Content
    pub const CONTENT: StatusCode = StatusCode::new(2, 5);
    /// 4.00 Bad Request
    pub const BAD_REQUEST: StatusCode = StatusCode::new(4, 0);
    /// 4.04 Not Found
    pub const NOT_FOUND: StatusCode = StatusCode::new(4, 4);
    /// 4.05 Method Not Allowed
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode::new(4, 5);
    /// 5.01 Not Implemented
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode::new(5, 1);

    /// Build from class and detail
    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// Decode the packed `ccc ddddd` byte used on the wire
    pub const fn from_byte(byte: u8) -> Self {
        Self { class: byte >> 5, detail: byte & 0x1f }
    }

    /// Packed `ccc ddddd` byte
    pub const fn to_byte(self) -> u8 {
        (self.class << 5) | (self.detail & 0x1f)
    }

    /// Class 2
    pub const fn is_success(self) -> bool {
        self.class == 2
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

/// Blocking request/response client
pub trait RequestTransport {
    /// POST `payload` to `destination` and wait for the response status.
    ///
    /// Blocks the whole event loop until a response or the timeout.
    fn send_request(&mut self, destination: &str, payload: &[u8]) -> Result<StatusCode, RequestError>;
}

/// Non-blocking publish/subscribe client
pub trait PublishTransport {
    /// Start connecting as `client_id`. Completion arrives as an event.
    fn connect(&mut self, client_id: &str) -> Result<(), PublishError>;

    /// Request a subscription. The acknowledgement arrives as an event.
    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError>;

    /// Hand a message to the client.
    ///
    /// `WouldBlock` when the send buffer is full.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> nb::Result<(), PublishError>;
}
