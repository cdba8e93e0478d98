//! Alarm Subsystem
//!
//! ## Overview
//!
//! The alarm is global to the monitor, not per channel. Any sample that
//! breaches its channel's comfort band turns it on; only an explicit reset
//! turns it off again. Turning it on also sounds an acoustic signal that
//! silences itself after a fixed duration without clearing the alarm.
//!
//! ```text
//!              start()                       stop()
//!   ┌─────┐ ───────────▶ ┌────────────────┐ ──────────▶ ┌─────┐
//!   │ OFF │              │ ON, acoustic ON │             │ OFF │
//!   └─────┘              └───────┬────────┘             └─────┘
//!                                │ acoustic timer
//!                                ▼
//!                        ┌────────────────┐  stop()
//!                        │ ON, acoustic OFF│ ─────────▶ OFF
//!                        └────────────────┘
//! ```
//!
//! `start` and `stop` report whether anything changed. Callers notify
//! observers only on [`AlarmTransition::Changed`], which keeps a stream of
//! breaching samples from re-announcing an alarm that is already on.

use crate::constants::Thresholds;
use crate::time::Timestamp;
use crate::timer::{TimerId, TimerWheel};

/// True iff `sample` touches or leaves the `(min, max)` comfort band.
///
/// With `min >= max` the band is empty and every sample alarms.
pub fn alarming(min: i32, max: i32, sample: i32) -> bool {
    sample <= min || sample >= max
}

/// Logical alarm state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlarmState {
    /// No unacknowledged breach
    #[default]
    Off,
    /// At least one breach since the last reset
    On,
}

impl AlarmState {
    /// `true` for [`AlarmState::On`]
    pub fn is_on(self) -> bool {
        self == AlarmState::On
    }
}

/// Acoustic sub-indicator of the alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcousticSignal {
    /// Silent
    #[default]
    Off,
    /// Sounding
    On,
}

/// Outcome of a start/stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmTransition {
    /// State flipped, observers must be told
    Changed,
    /// Already in the requested state
    Unchanged,
}

impl AlarmTransition {
    /// `true` for [`AlarmTransition::Changed`]
    pub fn changed(self) -> bool {
        self == AlarmTransition::Changed
    }
}

/// Alarm state plus its timed acoustic signal
#[derive(Debug, Clone)]
pub struct AlarmSystem {
    state: AlarmState,
    acoustic: AcousticSignal,
    acoustic_duration_ms: u64,
}

impl AlarmSystem {
    /// Alarm off; the acoustic signal lasts `acoustic_duration_ms` once started
    pub fn new(acoustic_duration_ms: u64) -> Self {
        Self {
            state: AlarmState::Off,
            acoustic: AcousticSignal::Off,
            acoustic_duration_ms,
        }
    }

    /// Current logical state
    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Current acoustic signal
    pub fn acoustic(&self) -> AcousticSignal {
        self.acoustic
    }

    /// Turn the alarm on and sound the acoustic signal
    pub fn start(&mut self, timers: &mut TimerWheel, now: Timestamp) -> AlarmTransition {
        if self.state.is_on() {
            return AlarmTransition::Unchanged;
        }
        self.state = AlarmState::On;
        self.acoustic = AcousticSignal::On;
        timers.arm_once(TimerId::AcousticSignal, now, self.acoustic_duration_ms);
        log::warn!("alarm started, acoustic signal for {} ms", self.acoustic_duration_ms);
        AlarmTransition::Changed
    }

    /// Turn the alarm and the acoustic signal off.
    ///
    /// The acoustic timer is cancelled even when the alarm was already off.
    pub fn stop(&mut self, timers: &mut TimerWheel) -> AlarmTransition {
        timers.cancel(TimerId::AcousticSignal);
        self.acoustic = AcousticSignal::Off;
        if !self.state.is_on() {
            return AlarmTransition::Unchanged;
        }
        self.state = AlarmState::Off;
        log::info!("alarm stopped");
        AlarmTransition::Changed
    }

    /// Acoustic timer fired. The logical alarm is left untouched.
    pub fn on_acoustic_timeout(&mut self) {
        if self.acoustic == AcousticSignal::On {
            log::info!("acoustic signal off");
        }
        self.acoustic = AcousticSignal::Off;
    }

    /// Start the alarm if `value` breaches `thresholds`
    pub fn evaluate(
        &mut self,
        timers: &mut TimerWheel,
        now: Timestamp,
        thresholds: &Thresholds,
        value: i32,
    ) -> AlarmTransition {
        if thresholds.is_breached(value) {
            self.start(timers, now)
        } else {
            AlarmTransition::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ACOUSTIC_SIGNAL_DURATION_MS;
    use proptest::prelude::*;

    fn system() -> (AlarmSystem, TimerWheel) {
        (AlarmSystem::new(ACOUSTIC_SIGNAL_DURATION_MS), TimerWheel::new())
    }

    #[test]
    fn bounds_are_inclusive_breaches() {
        assert!(alarming(50, 120, 50));
        assert!(alarming(50, 120, 120));
        assert!(!alarming(50, 120, 51));
        assert!(!alarming(50, 120, 119));
    }

    #[test]
    fn start_then_start_again() {
        let (mut alarm, mut timers) = system();

        assert_eq!(alarm.start(&mut timers, 0), AlarmTransition::Changed);
        assert_eq!(alarm.state(), AlarmState::On);
        assert_eq!(alarm.acoustic(), AcousticSignal::On);
        assert_eq!(timers.deadline(TimerId::AcousticSignal), Some(ACOUSTIC_SIGNAL_DURATION_MS));

        assert_eq!(alarm.start(&mut timers, 10), AlarmTransition::Unchanged);
        assert_eq!(timers.deadline(TimerId::AcousticSignal), Some(ACOUSTIC_SIGNAL_DURATION_MS));
    }

    #[test]
    fn stop_clears_everything() {
        let (mut alarm, mut timers) = system();
        alarm.start(&mut timers, 0);

        assert_eq!(alarm.stop(&mut timers), AlarmTransition::Changed);
        assert_eq!(alarm.state(), AlarmState::Off);
        assert_eq!(alarm.acoustic(), AcousticSignal::Off);
        assert!(!timers.is_armed(TimerId::AcousticSignal));

        assert_eq!(alarm.stop(&mut timers), AlarmTransition::Unchanged);
    }

    #[test]
    fn acoustic_timeout_keeps_alarm_on() {
        let (mut alarm, mut timers) = system();
        alarm.start(&mut timers, 0);

        for id in timers.expire(ACOUSTIC_SIGNAL_DURATION_MS) {
            assert_eq!(id, TimerId::AcousticSignal);
            alarm.on_acoustic_timeout();
        }
        assert_eq!(alarm.acoustic(), AcousticSignal::Off);
        assert_eq!(alarm.state(), AlarmState::On);

        // Stop after the timer already fired is still fine.
        assert_eq!(alarm.stop(&mut timers), AlarmTransition::Changed);
    }

    #[test]
    fn evaluate_gates_notifications() {
        let (mut alarm, mut timers) = system();
        let band = Thresholds { min: 50, max: 120 };

        assert_eq!(alarm.evaluate(&mut timers, 0, &band, 45), AlarmTransition::Changed);
        assert_eq!(alarm.evaluate(&mut timers, 1, &band, 60), AlarmTransition::Unchanged);
        assert_eq!(alarm.evaluate(&mut timers, 2, &band, 130), AlarmTransition::Unchanged);
        assert!(alarm.state().is_on());
    }

    proptest! {
        #[test]
        fn alarming_matches_definition(min: i32, max: i32, s: i32) {
            prop_assert_eq!(alarming(min, max, s), s <= min || s >= max);
        }

        #[test]
        fn empty_band_always_alarms(min: i32, delta in 0i32..1_000, s: i32) {
            let max = min.saturating_sub(delta);
            prop_assert!(alarming(min, max, s));
        }
    }
}
