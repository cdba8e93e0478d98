//! Constants for VitalWatch Core
//!
//! Centralized values shared by the session controller, the delivery queue
//! and the simulated sensors. Every size here is a hard bound on a fixed
//! buffer somewhere in the crate, so changing one changes memory layout.
//!
//! ## Organization
//!
//! - **Channels**: the five physiological channels and their default profiles
//! - **Session**: identifier lengths, buffer sizes, timer intervals, reset
//!   durations and collector endpoints

/// Physiological channels and their default sampling/alarm profiles.
pub mod channels;

/// Buffer sizes, timer intervals and collector endpoints.
pub mod session;

pub use channels::{Channel, ChannelProfile, Thresholds};
pub use session::{
    ACOUSTIC_SIGNAL_DURATION_MS, MAX_TOPIC_LEN, MONITOR_ID_LEN, PATIENT_ID_LEN,
    PAYLOAD_BUFFER_LEN, QUEUE_CAPACITY, QUEUE_RETRY_INTERVAL_MS, RESET_ALARM_SECS,
    RESET_PATIENT_SECS, STATE_CHECK_INTERVAL_MS,
};
