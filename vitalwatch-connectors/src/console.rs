//! Operator console
//!
//! Stands in for the bedside keypad and reset button. One command per line:
//!
//! ```text
//! p-001        bind patient "p-001"
//! reset 5      reset button held 5 s (silences the alarm)
//! reset 10     reset button held 10 s (also unbinds the patient)
//! quit         stop the monitor
//! ```

use vitalwatch_core::MonitorEvent;

/// Turn one console line into an event; blank lines yield nothing.
pub fn parse_line(line: &str) -> Option<MonitorEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("reset"), Some(seconds), None) => match seconds.parse() {
            Ok(seconds) => Some(MonitorEvent::Reset { seconds }),
            Err(_) => {
                log::warn!("reset needs a whole number of seconds, got {seconds:?}");
                None
            }
        },
        (Some("quit" | "exit"), None, None) => Some(MonitorEvent::Shutdown),
        _ => Some(MonitorEvent::PatientId(line.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_ids() {
        assert_eq!(parse_line("p-001\n"), Some(MonitorEvent::PatientId("p-001".into())));
        assert_eq!(parse_line("  bed 4  "), Some(MonitorEvent::PatientId("bed 4".into())));
    }

    #[test]
    fn test_reset_commands() {
        assert_eq!(parse_line("reset 5"), Some(MonitorEvent::Reset { seconds: 5 }));
        assert_eq!(parse_line("reset   10"), Some(MonitorEvent::Reset { seconds: 10 }));
        assert_eq!(parse_line("reset soon"), None);
        assert_eq!(parse_line("reset -1"), None);
    }

    #[test]
    fn test_quit_and_blank() {
        assert_eq!(parse_line("quit"), Some(MonitorEvent::Shutdown));
        assert_eq!(parse_line("   "), None);
    }
}
