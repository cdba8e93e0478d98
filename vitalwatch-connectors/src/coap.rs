//! CoAP Binding for the Request/Response Uplink
//!
//! ## Overview
//!
//! Two halves, both over UDP with `coap-lite` packets:
//!
//! - [`CoapRequestTransport`] is the client side. It performs the one
//!   registration request the session makes: a Confirmable POST, answered
//!   either piggybacked on the ACK or in a separate response.
//! - [`handle_request`] and [`ResourceServer`] are the server side. The
//!   collector reads telemetry, the alarm state and the bound patient from
//!   the session's [`ResourceTable`] and may PUT an alarm command.
//!
//! ## Observe
//!
//! A GET carrying `Observe: 0` registers the requester in [`Observers`];
//! `Observe: 1` cancels. Whenever the table reports a changed resource, every
//! observer of it receives a Non-confirmable 2.05 with the resource's
//! sequence number as the Observe value and the request's token. A Reset in
//! answer to a notification drops that observer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  RequestTransport  ┌──────────────────┐
//! │ MonitorSession  │───────────────────▶│ CoapRequest-     │── POST /registeredMonitors ──▶
//! │                 │                    │ Transport (UDP)  │
//! │   observer:     │                    └──────────────────┘
//! │  ResourceTable  │◀── get/put ──┐     ┌──────────────────┐
//! └─────────────────┘              └─────│ ResourceServer   │◀── GET/PUT patientState/... ──
//!                                        └──────────────────┘
//! ```
//!
//! ## Message Building
//!
//! ```rust
//! use vitalwatch_connectors::coap::{CoapMessage, Code, MessageType};
//!
//! let mut message = CoapMessage::new();
//! message.set_type(MessageType::Confirmable);
//! message.set_code(Code::Post);
//! message.set_message_id(1234);
//! message.add_uri_path("/registeredMonitors");
//! message.set_payload(br#"{"monitorID":"fd00::2","registration":true}"#.to_vec());
//!
//! let bytes = message.to_bytes().unwrap();
//! assert_eq!(CoapMessage::parse(&bytes).unwrap().uri_path(), "registeredMonitors");
//! ```

use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use coap_lite::{
    CoapOption, ContentFormat, MessageClass, MessageType as CoapMessageType, Packet, RequestType,
};
use vitalwatch_core::constants::session::{COAP_ACK_TIMEOUT_MS, COAP_MAX_RETRANSMIT};
use vitalwatch_core::errors::RequestError;
use vitalwatch_core::transport::{RequestTransport, StatusCode};
use vitalwatch_core::{MonitorEvent, ResourceResponse, ResourceTable};

/// Largest datagram read
pub const MAX_DATAGRAM: usize = 1152;

/// Observe value of a registering GET
pub const OBSERVE_REGISTER: u32 = 0;

/// Observe value of a cancelling GET
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Observe values are 24-bit sequence numbers
const OBSERVE_MASK: u32 = 0x00FF_FFFF;

/// CoAP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Confirmable message (requires ACK)
    Confirmable,
    /// Non-confirmable message (fire and forget)
    NonConfirmable,
    /// Acknowledgment
    Acknowledgment,
    /// Reset
    Reset,
}

impl From<MessageType> for CoapMessageType {
    fn from(mt: MessageType) -> Self {
        match mt {
            MessageType::Confirmable => CoapMessageType::Confirmable,
            MessageType::NonConfirmable => CoapMessageType::NonConfirmable,
            MessageType::Acknowledgment => CoapMessageType::Acknowledgement,
            MessageType::Reset => CoapMessageType::Reset,
        }
    }
}

/// Method or response code of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// 0.00, empty ACK or reset
    Empty,
    /// 0.01
    Get,
    /// 0.02
    Post,
    /// 0.03
    Put,
    /// 0.04
    Delete,
    /// Any response (`2.xx`, `4.xx`, `5.xx`)
    Response(StatusCode),
}

impl Code {
    fn to_message_class(self) -> MessageClass {
        match self {
            Code::Empty => MessageClass::Empty,
            Code::Get => MessageClass::Request(RequestType::Get),
            Code::Post => MessageClass::Request(RequestType::Post),
            Code::Put => MessageClass::Request(RequestType::Put),
            Code::Delete => MessageClass::Request(RequestType::Delete),
            Code::Response(status) => MessageClass::from(status.to_byte()),
        }
    }

    fn from_message_class(class: MessageClass) -> Self {
        match class {
            MessageClass::Empty => Code::Empty,
            MessageClass::Request(RequestType::Get) => Code::Get,
            MessageClass::Request(RequestType::Post) => Code::Post,
            MessageClass::Request(RequestType::Put) => Code::Put,
            MessageClass::Request(RequestType::Delete) => Code::Delete,
            other => Code::Response(StatusCode::from_byte(u8::from(other))),
        }
    }
}

/// CoAP errors
#[derive(Debug)]
pub enum CoapError {
    /// Invalid message format
    InvalidMessage,
    /// Socket error
    Network(io::Error),
    /// Maximum retransmissions exceeded
    MaxRetransmissions,
    /// Request timeout elapsed before a response
    Timeout,
}

impl fmt::Display for CoapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoapError::InvalidMessage => write!(f, "Invalid CoAP message format"),
            CoapError::Network(e) => write!(f, "Network error: {}", e),
            CoapError::MaxRetransmissions => write!(f, "Maximum retransmissions exceeded"),
            CoapError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for CoapError {}

impl From<CoapError> for RequestError {
    fn from(e: CoapError) -> Self {
        match e {
            CoapError::MaxRetransmissions | CoapError::Timeout => RequestError::Timeout,
            CoapError::InvalidMessage => RequestError::MalformedResponse,
            CoapError::Network(_) => RequestError::Transport { reason: "socket error" },
        }
    }
}

/// CoAP message builder over a `coap-lite` packet
#[derive(Debug, Clone)]
pub struct CoapMessage {
    packet: Packet,
}

impl CoapMessage {
    /// Create a new CoAP message
    pub fn new() -> Self {
        Self { packet: Packet::new() }
    }

    /// Set message type
    pub fn set_type(&mut self, msg_type: MessageType) {
        self.packet.header.set_type(msg_type.into());
    }

    /// Set message code
    pub fn set_code(&mut self, code: Code) {
        self.packet.header.code = code.to_message_class();
    }

    /// Set message ID
    pub fn set_message_id(&mut self, id: u16) {
        self.packet.header.message_id = id;
    }

    /// Set token for request/response matching
    pub fn set_token(&mut self, token: Vec<u8>) {
        self.packet.set_token(token);
    }

    /// Append one Uri-Path option per segment of `path`
    pub fn add_uri_path(&mut self, path: &str) {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
    }

    /// Mark the payload as JSON
    pub fn set_json(&mut self) {
        self.packet.set_content_format(ContentFormat::ApplicationJSON);
    }

    /// Set payload
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.packet.payload = payload;
    }

    /// Encode the message
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoapError> {
        self.packet.to_bytes().map_err(|_| CoapError::InvalidMessage)
    }

    /// Set the Observe option (24 bits kept, shortest big-endian form)
    pub fn set_observe(&mut self, value: u32) {
        let bytes = (value & OBSERVE_MASK).to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        self.packet.add_option(CoapOption::Observe, bytes[first..].to_vec());
    }

    /// Observe option value, if present and well formed
    pub fn observe(&self) -> Option<u32> {
        let value = self.packet.get_option(CoapOption::Observe)?.front()?;
        if value.len() > 3 {
            return None;
        }
        Some(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }

    /// Parse message from bytes
    pub fn parse(data: &[u8]) -> Result<Self, CoapError> {
        let packet = Packet::from_bytes(data).map_err(|_| CoapError::InvalidMessage)?;
        Ok(Self { packet })
    }

    /// Get message type
    pub fn get_type(&self) -> MessageType {
        match self.packet.header.get_type() {
            CoapMessageType::Confirmable => MessageType::Confirmable,
            CoapMessageType::NonConfirmable => MessageType::NonConfirmable,
            CoapMessageType::Acknowledgement => MessageType::Acknowledgment,
            CoapMessageType::Reset => MessageType::Reset,
        }
    }

    /// Get message code
    pub fn code(&self) -> Code {
        Code::from_message_class(self.packet.header.code)
    }

    /// Get message ID
    pub fn get_message_id(&self) -> u16 {
        self.packet.header.message_id
    }

    /// Get token
    pub fn token(&self) -> &[u8] {
        self.packet.get_token()
    }

    /// Uri-Path options joined with `/`
    pub fn uri_path(&self) -> String {
        self.packet
            .get_option(CoapOption::UriPath)
            .map(|segments| {
                segments
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }

    /// Get payload
    pub fn get_payload(&self) -> &[u8] {
        &self.packet.payload
    }

    /// Empty ACK for a Confirmable message
    pub fn empty_ack(message_id: u16) -> Self {
        let mut ack = Self::new();
        ack.set_type(MessageType::Acknowledgment);
        ack.set_code(Code::Empty);
        ack.set_message_id(message_id);
        ack
    }
}

impl Default for CoapMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct CoapConfig {
    /// Collector endpoint
    pub collector: SocketAddr,
    /// Wait for the first ACK; doubles on every retransmission
    pub ack_timeout: Duration,
    /// Maximum retransmissions
    pub max_retransmit: u8,
    /// Cap on the whole exchange; `None` waits out every retransmission
    pub request_timeout: Option<Duration>,
}

impl CoapConfig {
    /// Create new configuration with endpoint
    pub fn new(collector: SocketAddr) -> Self {
        Self {
            collector,
            ack_timeout: Duration::from_millis(COAP_ACK_TIMEOUT_MS),
            max_retransmit: COAP_MAX_RETRANSMIT,
            request_timeout: None,
        }
    }

    /// Set the initial ACK timeout
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the number of retransmissions
    pub fn max_retransmit(mut self, count: u8) -> Self {
        self.max_retransmit = count;
        self
    }

    /// Give up on the exchange after `timeout`, retransmissions included
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Longest an exchange can take without a request timeout:
    /// `ack_timeout * (2^(max_retransmit + 1) - 1)`
    pub fn retransmission_span(&self) -> Duration {
        let waits = (1u32 << (u32::from(self.max_retransmit) + 1).min(31)) - 1;
        self.ack_timeout.saturating_mul(waits)
    }

    /// `coap://[host]:port` form of the collector endpoint
    pub fn uri(&self) -> String {
        format!("coap://{}", self.collector)
    }
}

/// Blocking CoAP client used for the registration request
#[derive(Debug)]
pub struct CoapRequestTransport {
    config: CoapConfig,
    socket: UdpSocket,
    message_id: u16,
    token: u16,
}

impl CoapRequestTransport {
    /// Open an ephemeral socket towards the collector
    pub fn new(config: CoapConfig) -> Result<Self, CoapError> {
        let bind: SocketAddr = match config.collector {
            SocketAddr::V4(_) => (std::net::Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind).map_err(CoapError::Network)?;

        // Simple pseudo-random message ID based on current time
        let message_id = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            & 0xFFFF) as u16;

        Ok(Self { config, socket, message_id, token: message_id.rotate_left(8) })
    }

    /// Client settings
    pub fn config(&self) -> &CoapConfig {
        &self.config
    }

    /// POST `payload` to `resource` and wait for the response code
    pub fn post(&mut self, resource: &str, payload: &[u8]) -> Result<StatusCode, CoapError> {
        let message_id = self.next_message_id();
        let token = self.next_token();

        let mut request = CoapMessage::new();
        request.set_type(MessageType::Confirmable);
        request.set_code(Code::Post);
        request.set_message_id(message_id);
        request.set_token(token.clone());
        request.add_uri_path(resource);
        request.set_json();
        request.set_payload(payload.to_vec());
        let bytes = request.to_bytes()?;

        let started = Instant::now();
        let limit = self.config.request_timeout;
        let mut timeout = self.config.ack_timeout;
        let mut acknowledged = false;
        for attempt in 0..=self.config.max_retransmit {
            if !acknowledged {
                log::debug!("POST {} to {} (attempt {})", resource, self.config.uri(), attempt + 1);
                self.socket.send_to(&bytes, self.config.collector).map_err(CoapError::Network)?;
            }
            let wait = match limit {
                Some(limit) => timeout.min(limit.saturating_sub(started.elapsed())),
                None => timeout,
            };
            if !wait.is_zero() {
                if let Some(status) = self.await_response(message_id, &token, wait, &mut acknowledged)? {
                    return Ok(status);
                }
            }
            if limit.is_some_and(|limit| started.elapsed() >= limit) {
                return Err(CoapError::Timeout);
            }
            timeout = timeout.saturating_mul(2);
        }

        Err(CoapError::MaxRetransmissions)
    }

    /// Read datagrams until a matching response or `timeout`.
    fn await_response(
        &mut self,
        message_id: u16,
        token: &[u8],
        timeout: Duration,
        acknowledged: &mut bool,
    ) -> Result<Option<StatusCode>, CoapError> {
        self.socket.set_read_timeout(Some(timeout)).map_err(CoapError::Network)?;
        let mut buffer = [0u8; MAX_DATAGRAM];

        loop {
            let n = match self.socket.recv_from(&mut buffer) {
                Ok((n, _)) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) => return Err(CoapError::Network(e)),
            };
            let Ok(response) = CoapMessage::parse(&buffer[..n]) else {
                log::warn!("discarding undecodable datagram");
                continue;
            };

            let piggybacked = response.get_type() == MessageType::Acknowledgment
                && response.get_message_id() == message_id;
            match (piggybacked, response.code()) {
                (true, Code::Empty) => {
                    // Separate response follows
                    *acknowledged = true;
                }
                (true, Code::Response(status)) => return Ok(Some(status)),
                (false, Code::Response(status)) if response.token() == token => {
                    if response.get_type() == MessageType::Confirmable {
                        let ack = CoapMessage::empty_ack(response.get_message_id()).to_bytes()?;
                        self.socket.send_to(&ack, self.config.collector).map_err(CoapError::Network)?;
                    }
                    return Ok(Some(status));
                }
                (_, Code::Empty) if response.get_type() == MessageType::Reset => {
                    if response.get_message_id() == message_id {
                        return Err(CoapError::InvalidMessage);
                    }
                }
                _ => log::debug!("ignoring unrelated message {}", response.get_message_id()),
            }
        }
    }

    fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }

    fn next_token(&mut self) -> Vec<u8> {
        self.token = self.token.wrapping_add(1);
        self.token.to_be_bytes().to_vec()
    }
}

impl RequestTransport for CoapRequestTransport {
    fn send_request(&mut self, destination: &str, payload: &[u8]) -> Result<StatusCode, RequestError> {
        self.post(destination, payload).map_err(|e| {
            log::error!("request to {destination} failed: {e}");
            RequestError::from(e)
        })
    }
}

/// One registered observer of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    path: String,
    peer: SocketAddr,
    token: Vec<u8>,
    last_message_id: Option<u16>,
}

/// Observers of the resource table, keyed by resource and peer
#[derive(Debug, Default)]
pub struct Observers {
    entries: Vec<Observation>,
    message_id: u16,
}

impl Observers {
    /// No observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody observes anything
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Observe `path` for `peer`; a repeated registration replaces the token
    pub fn register(&mut self, path: &str, peer: SocketAddr, token: &[u8]) {
        self.deregister(path, peer);
        log::info!("{peer} observes {path}");
        self.entries.push(Observation {
            path: path.to_owned(),
            peer,
            token: token.to_vec(),
            last_message_id: None,
        });
    }

    /// Stop notifying `peer` about `path`
    pub fn deregister(&mut self, path: &str, peer: SocketAddr) {
        self.entries.retain(|o| !(o.path == path && o.peer == peer));
    }

    /// Drop the observer that answered notification `message_id` with a Reset
    pub fn forget(&mut self, peer: SocketAddr, message_id: u16) {
        let before = self.entries.len();
        self.entries.retain(|o| !(o.peer == peer && o.last_message_id == Some(message_id)));
        if self.entries.len() < before {
            log::info!("{peer} rejected a notification, observation cancelled");
        }
    }

    /// Encoded notifications of `path`'s current state, one per observer
    pub fn notifications(&mut self, table: &ResourceTable, path: &str) -> Vec<(Vec<u8>, SocketAddr)> {
        let sequence = table.sequence(path).unwrap_or_default();
        let mut notifications = Vec::new();
        for index in 0..self.entries.len() {
            if self.entries[index].path != path {
                continue;
            }
            self.message_id = self.message_id.wrapping_add(1);
            let message_id = self.message_id;
            let observation = &mut self.entries[index];

            let response = table.get(path);
            let mut notification = CoapMessage::new();
            notification.set_type(MessageType::NonConfirmable);
            notification.set_code(Code::Response(response.code));
            notification.set_message_id(message_id);
            notification.set_token(observation.token.clone());
            notification.set_observe(sequence);
            notification.set_json();
            notification.set_payload(response.payload);

            match notification.to_bytes() {
                Ok(bytes) => {
                    observation.last_message_id = Some(message_id);
                    notifications.push((bytes, observation.peer));
                }
                Err(e) => log::error!("notification of {path} not encodable: {e}"),
            }
        }
        notifications
    }
}

/// Answer one request datagram from `peer` out of `table`.
///
/// Returns the encoded response, plus the event a PUT produced. Datagrams
/// that are not requests get no answer; a Reset may cancel an observation.
pub fn handle_request(
    table: &ResourceTable,
    observers: &mut Observers,
    peer: SocketAddr,
    datagram: &[u8],
) -> Option<(Vec<u8>, Option<MonitorEvent>)> {
    let request = match CoapMessage::parse(datagram) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("bad request: {e}");
            return None;
        }
    };
    if request.get_type() == MessageType::Reset {
        observers.forget(peer, request.get_message_id());
        return None;
    }

    let path = request.uri_path();
    let mut observe = None;
    let (response, event) = match request.code() {
        Code::Get => {
            let response = table.get(&path);
            match request.observe() {
                Some(OBSERVE_REGISTER) if response.code == StatusCode::CONTENT => {
                    observers.register(&path, peer, request.token());
                    observe = table.sequence(&path);
                }
                Some(OBSERVE_DEREGISTER) => observers.deregister(&path, peer),
                _ => {}
            }
            (response, None)
        }
        Code::Put => table.put(&path, request.get_payload()),
        Code::Post | Code::Delete => {
            let code = match table.sequence(&path) {
                Some(_) => StatusCode::METHOD_NOT_ALLOWED,
                None => StatusCode::NOT_FOUND,
            };
            (ResourceResponse { code, payload: Vec::new() }, None)
        }
        Code::Empty | Code::Response(_) => return None,
    };
    log::debug!("{:?} {} -> {}", request.code(), path, response.code);

    let mut reply = CoapMessage::new();
    reply.set_type(match request.get_type() {
        MessageType::Confirmable => MessageType::Acknowledgment,
        _ => MessageType::NonConfirmable,
    });
    reply.set_code(Code::Response(response.code));
    reply.set_message_id(request.get_message_id());
    reply.set_token(request.token().to_vec());
    if let Some(sequence) = observe {
        reply.set_observe(sequence);
    }
    if !response.payload.is_empty() {
        reply.set_json();
        reply.set_payload(response.payload);
    }

    match reply.to_bytes() {
        Ok(bytes) => Some((bytes, event)),
        Err(e) => {
            log::error!("response to {path} not encodable: {e}");
            None
        }
    }
}

/// UDP endpoint serving the resource table
#[derive(Debug)]
pub struct ResourceServer {
    socket: tokio::net::UdpSocket,
}

impl ResourceServer {
    /// Listen on `address`
    pub async fn bind(address: SocketAddr) -> io::Result<Self> {
        let socket = tokio::net::UdpSocket::bind(address).await?;
        log::info!("serving resources on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    /// Bound address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for the next datagram. Cancel safe.
    pub async fn receive(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buffer).await
    }

    /// Send `response` to `peer`
    pub async fn reply(&self, response: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.socket.send_to(response, peer).await.map(|_| ())
    }
}
