//! Timer Service
//!
//! ## Overview
//!
//! The monitor needs a handful of independent timers: the lifecycle state
//! check, the one-shot acoustic signal, the retry queue drain and one
//! periodic timer per sampled channel. [`TimerWheel`] keeps them all in a
//! fixed table keyed by [`TimerId`] and runs on virtual time: the caller
//! passes `now` in, and [`TimerWheel::expire`] hands back whatever fired.
//!
//! ```text
//!  event loop                      TimerWheel
//!      │  next_deadline() ───────────▶ │
//!      │  sleep until deadline         │
//!      │  expire(now) ───────────────▶ │── one-shot: removed
//!      │ ◀─────────── [ids in order]   │── periodic: deadline += period
//!      │  dispatch(Timer(id)) ...      │
//! ```
//!
//! ## Semantics
//!
//! - Each id is armed at most once; arming again replaces the old entry.
//! - `cancel` is idempotent. Cancelling a timer that already fired or was
//!   never armed is a no-op.
//! - Periodic timers re-arm from their previous deadline, not from `now`, so
//!   a late `expire` call does not make the period drift.

use heapless::Vec;

use crate::constants::Channel;
use crate::time::Timestamp;

/// Number of distinct timer ids
pub const MAX_TIMERS: usize = 3 + Channel::COUNT;

/// Identity of a monitor timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Lifecycle poll
    StateCheck,
    /// Acoustic signal auto-off
    AcousticSignal,
    /// Retry queue drain
    QueueRetry,
    /// Sample tick of one channel
    Sampling(Channel),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: TimerId,
    deadline: Timestamp,
    period: Option<u64>,
}

/// Fixed table of one-shot and periodic timers
#[derive(Debug, Default)]
pub struct TimerWheel {
    entries: Vec<Entry, MAX_TIMERS>,
}

impl TimerWheel {
    /// Empty wheel
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Fire `id` once, `after` ms from `now`
    pub fn arm_once(&mut self, id: TimerId, now: Timestamp, after: u64) {
        self.arm(Entry { id, deadline: now.saturating_add(after), period: None });
    }

    /// Fire `id` every `every` ms, first at `now + every`
    pub fn arm_periodic(&mut self, id: TimerId, now: Timestamp, every: u64) {
        let every = every.max(1);
        self.arm(Entry { id, deadline: now.saturating_add(every), period: Some(every) });
    }

    fn arm(&mut self, entry: Entry) {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            *slot = entry;
            return;
        }
        if self.entries.push(entry).is_err() {
            // Unreachable while every TimerId has its own slot.
            log::error!("timer table full, {:?} not armed", entry.id);
        }
    }

    /// Disarm `id`. Returns whether it was armed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Whether `id` is currently armed
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Deadline of `id`, if armed
    pub fn deadline(&self, id: TimerId) -> Option<Timestamp> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.deadline)
    }

    /// Earliest deadline of all armed timers
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No timer armed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect every timer due at `now`, earliest deadline first.
    ///
    /// One-shot timers are removed, periodic ones advance by one period.
    /// Each id appears at most once per call.
    pub fn expire(&mut self, now: Timestamp) -> Vec<TimerId, MAX_TIMERS> {
        let mut due: Vec<(Timestamp, TimerId), MAX_TIMERS> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.deadline <= now) {
            // Same capacity as `entries`, cannot overflow.
            let _ = due.push((entry.deadline, entry.id));
        }
        due.sort_unstable_by_key(|(deadline, _)| *deadline);

        self.entries.retain(|e| e.deadline > now || e.period.is_some());
        for entry in self.entries.iter_mut().filter(|e| e.deadline <= now) {
            if let Some(period) = entry.period {
                entry.deadline = entry.deadline.saturating_add(period);
            }
        }

        due.into_iter().map(|(_, id)| id).collect()
    }
}
