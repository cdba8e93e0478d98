//! Collector Uplinks
//!
//! ## Overview
//!
//! An [`Uplink`] is how the session reaches the collector. Two bindings
//! exist and the session drives both through the same trait:
//!
//! ```text
//!                  open()                 deliver()             retry()
//! RequestUplink    blocking POST,         resources carry       nothing to do
//!                  2.01 => Registered     the data (Skipped)
//!
//! PublishUplink    connect, Pending;      publish; full send    extract one,
//!                  subscribe() later      buffer => queue       deliver again
//! ```
//!
//! ## Publish Path
//!
//! 1. Try the transport directly.
//! 2. `WouldBlock` (send buffer full) parks the message in the
//!    [`DeliveryQueue`](crate::queue::DeliveryQueue). A full queue drops it
//!    with a log line and nothing else.
//! 3. Any other transport error is logged and the message is discarded.
//!
//! The retry path extracts one parked message per tick and pushes it back
//! through step 1. A message that hits a full buffer again goes to the tail.

use alloc::string::String;

use crate::config::Binding;
use crate::errors::{PublishError, SessionError};
use crate::queue::DeliveryQueue;
use crate::transport::{PublishTransport, RequestTransport, StatusCode};

/// Result of opening an uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opened {
    /// Collector accepted the registration
    Registered,
    /// Connection in progress, completion arrives as an event
    Pending,
}

/// What happened to one outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport
    Sent,
    /// Send buffer full, parked for retry
    Queued,
    /// Send buffer and queue both full, message lost
    Dropped,
    /// Transport refused the message
    Failed(PublishError),
    /// Binding has no outbound path for this message
    Skipped,
}

/// Binding-specific route to the collector
pub trait Uplink {
    /// Which binding this is
    fn binding(&self) -> Binding;

    /// Register (request/response) or start connecting (publish/subscribe)
    fn open(&mut self, monitor_id: &str, registration: &[u8]) -> Result<Opened, SessionError>;

    /// Subscribe to the remote command topic
    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    /// Send one message
    fn deliver(&mut self, topic: &str, payload: &[u8]) -> Delivery;

    /// Retry the oldest parked message, if any
    fn retry(&mut self) -> Option<Delivery>;

    /// Forget every parked message
    fn discard_pending(&mut self);

    /// Parked messages
    fn pending(&self) -> usize;

    /// Whether this binding parks messages and needs the retry timer
    fn retries(&self) -> bool;
}

/// Request/response binding
#[derive(Debug)]
pub struct RequestUplink<T> {
    transport: T,
    registration_resource: String,
}

impl<T: RequestTransport> RequestUplink<T> {
    /// Register at `registration_resource` through `transport`
    pub fn new(transport: T, registration_resource: impl Into<String>) -> Self {
        Self { transport, registration_resource: registration_resource.into() }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: RequestTransport> Uplink for RequestUplink<T> {
    fn binding(&self) -> Binding {
        Binding::Coap
    }

    fn open(&mut self, monitor_id: &str, registration: &[u8]) -> Result<Opened, SessionError> {
        log::info!("registering {monitor_id} at {}", self.registration_resource);
        let status = self
            .transport
            .send_request(&self.registration_resource, registration)
            .map_err(SessionError::RegistrationFailed)?;

        if status == StatusCode::CREATED {
            log::info!("registration accepted ({status})");
            Ok(Opened::Registered)
        } else {
            log::error!("registration rejected ({status})");
            Err(SessionError::RegistrationRejected { class: status.class, detail: status.detail })
        }
    }

    fn subscribe(&mut self, _topic: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn deliver(&mut self, _topic: &str, _payload: &[u8]) -> Delivery {
        Delivery::Skipped
    }

    fn retry(&mut self) -> Option<Delivery> {
        None
    }

    fn discard_pending(&mut self) {}

    fn pending(&self) -> usize {
        0
    }

    fn retries(&self) -> bool {
        false
    }
}

/// Publish/subscribe binding with an `N`-slot retry queue
#[derive(Debug)]
pub struct PublishUplink<T, const N: usize, const TOPIC: usize, const PAYLOAD: usize> {
    transport: T,
    queue: DeliveryQueue<N, TOPIC, PAYLOAD>,
    dropped: u32,
}

impl<T, const N: usize, const TOPIC: usize, const PAYLOAD: usize> PublishUplink<T, N, TOPIC, PAYLOAD>
where
    T: PublishTransport,
{
    /// Wrap `transport` with an empty queue
    pub fn new(transport: T) -> Self {
        Self { transport, queue: DeliveryQueue::new(), dropped: 0 }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The retry queue
    pub fn queue(&self) -> &DeliveryQueue<N, TOPIC, PAYLOAD> {
        &self.queue
    }

    /// Messages lost because the queue was full
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl<T, const N: usize, const TOPIC: usize, const PAYLOAD: usize> Uplink
    for PublishUplink<T, N, TOPIC, PAYLOAD>
where
    T: PublishTransport,
{
    fn binding(&self) -> Binding {
        Binding::Mqtt
    }

    fn open(&mut self, monitor_id: &str, _registration: &[u8]) -> Result<Opened, SessionError> {
        log::info!("connecting to broker as {monitor_id}");
        self.transport.connect(monitor_id).map_err(SessionError::LinkSetup)?;
        Ok(Opened::Pending)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        log::info!("subscribing to {topic}");
        self.transport.subscribe(topic).map_err(SessionError::LinkSetup)
    }

    fn deliver(&mut self, topic: &str, payload: &[u8]) -> Delivery {
        match self.transport.publish(topic, payload) {
            Ok(()) => {
                log::debug!("published to {topic}");
                Delivery::Sent
            }
            Err(nb::Error::WouldBlock) => {
                if self.queue.insert(topic, payload) {
                    log::debug!("send buffer full, queued for {topic} ({} pending)", self.queue.len());
                    Delivery::Queued
                } else {
                    self.dropped += 1;
                    log::warn!("send buffer and retry queue full, dropped message for {topic}");
                    Delivery::Dropped
                }
            }
            Err(nb::Error::Other(e)) => {
                log::error!("publish to {topic} failed: {e}");
                Delivery::Failed(e)
            }
        }
    }

    fn retry(&mut self) -> Option<Delivery> {
        let entry = self.queue.extract()?;
        log::debug!("retrying message for {}", entry.topic());
        Some(self.deliver(entry.topic(), entry.payload()))
    }

    fn discard_pending(&mut self) {
        if !self.queue.is_empty() {
            log::info!("discarding {} queued messages", self.queue.len());
        }
        self.queue.clear();
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn retries(&self) -> bool {
        true
    }
}
