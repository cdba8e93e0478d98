//! Session Constants
//!
//! Sizes of the fixed buffers the monitor works with and the default
//! intervals of its timers. Lengths include the trailing NUL the wire
//! buffers reserve, matching what collectors already expect.

// ===== IDENTIFIERS =====

/// Monitor identifier buffer length.
///
/// Fits the longest textual IPv6 address (45 characters) plus terminator.
pub const MONITOR_ID_LEN: usize = 46;

/// Patient identifier buffer length.
///
/// Patient ids longer than `PATIENT_ID_LEN - 1` bytes are truncated.
pub const PATIENT_ID_LEN: usize = 10;

/// Prefix of synthesized patient ids in unattended mode.
pub const AUTO_PATIENT_ID_PREFIX: &str = "auto_";

// ===== DELIVERY BUFFERS =====

/// Maximum stored topic length, terminator included.
pub const MAX_TOPIC_LEN: usize = 128;

/// Maximum stored payload length, terminator included.
pub const PAYLOAD_BUFFER_LEN: usize = 256;

/// Number of messages the retry queue holds before dropping.
pub const QUEUE_CAPACITY: usize = 10;

/// Outbound messages the broker client buffers before it reports a full
/// send buffer.
pub const SEND_BUFFER_CAPACITY: usize = QUEUE_CAPACITY;

// ===== TIMERS =====

/// Period of the lifecycle state check (1 s).
pub const STATE_CHECK_INTERVAL_MS: u64 = 1_000;

/// Period of the retry queue drain (5 s).
pub const QUEUE_RETRY_INTERVAL_MS: u64 = 5_000;

/// How long the acoustic signal sounds after an alarm starts (30 s).
pub const ACOUSTIC_SIGNAL_DURATION_MS: u64 = 30_000;

// ===== RESET COMMANDS =====

/// Press duration that silences the alarm.
pub const RESET_ALARM_SECS: u32 = 5;

/// Press duration that silences the alarm and unbinds the patient.
pub const RESET_PATIENT_SECS: u32 = 10;

// ===== COLLECTOR =====

/// Default collector / broker host.
pub const DEFAULT_COLLECTOR_HOST: &str = "fd00::1";

/// Default CoAP port of the collector.
pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// MQTT keep-alive in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;

/// Collector resource that accepts monitor registrations.
pub const REGISTRATION_RESOURCE: &str = "/registeredMonitors";

/// Upper bound on the whole blocking registration exchange,
/// retransmissions included.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Wait for the first CoAP acknowledgement; doubles per retransmission.
pub const COAP_ACK_TIMEOUT_MS: u64 = 2_000;

/// CoAP retransmissions of the registration before giving up.
pub const COAP_MAX_RETRANSMIT: u8 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_durations_are_distinct() {
        assert!(RESET_ALARM_SECS < RESET_PATIENT_SECS);
    }

    #[test]
    fn auto_prefix_fits_patient_id() {
        // prefix plus four hex digits, NUL terminator left over
        assert!(AUTO_PATIENT_ID_PREFIX.len() + 4 <= PATIENT_ID_LEN - 1);
    }
}
