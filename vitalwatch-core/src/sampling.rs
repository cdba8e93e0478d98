//! Simulated Sensors
//!
//! Each channel is a bounded random walk:
//!
//! ```text
//! next = clamp(previous + uniform(-max_deviation, max_deviation), lower, upper)
//! ```
//!
//! A channel process has two levels of activity. The process itself is
//! started once the monitor has registered with its collector and stopped on
//! teardown. While the process runs, sampling is started when a patient is
//! bound and stopped when the patient is reset. Sampling draws a fresh
//! starting value from `[lower, upper]`, arms the channel's periodic timer and
//! then produces one [`Sample`] per tick for the subscriber that started it.
//!
//! All randomness comes from a caller-supplied [`Rng`], so a seeded generator
//! replays the same sequence.

use rand::Rng;

use crate::config::ChannelTable;
use crate::constants::Channel;
use crate::time::Timestamp;
use crate::timer::{TimerId, TimerWheel};

/// Identity of whoever receives a channel's samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(pub u32);

/// One generated measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Source channel
    pub channel: Channel,
    /// Value within the channel bounds
    pub value: i32,
    /// Generation time
    pub timestamp: Timestamp,
}

/// One random walk step, clamped to `[lower, upper]`.
///
/// Swapped bounds are treated as the same interval. The step magnitude is
/// `|max_deviation|`.
pub fn generate<R: Rng>(
    rng: &mut R,
    previous: i32,
    max_deviation: i32,
    lower: i32,
    upper: i32,
) -> i32 {
    let (lo, hi) = ordered(lower, upper);
    let deviation = i64::from(max_deviation.unsigned_abs());
    let step = if deviation == 0 { 0 } else { rng.gen_range(-deviation..=deviation) };
    (i64::from(previous) + step).clamp(i64::from(lo), i64::from(hi)) as i32
}

/// Uniform starting value in `[lower, upper]`
pub fn initial<R: Rng>(rng: &mut R, lower: i32, upper: i32) -> i32 {
    let (lo, hi) = ordered(lower, upper);
    rng.gen_range(lo..=hi)
}

fn ordered(a: i32, b: i32) -> (i32, i32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SamplerState {
    Idle,
    Sampling { last: i32, subscriber: SubscriberId },
}

/// The five simulated sensor processes
#[derive(Debug)]
pub struct SampleGenerator {
    channels: ChannelTable,
    running: bool,
    samplers: [SamplerState; Channel::COUNT],
}

impl SampleGenerator {
    /// Processes for the given channel profiles, not yet running
    pub fn new(channels: ChannelTable) -> Self {
        Self {
            channels,
            running: false,
            samplers: [SamplerState::Idle; Channel::COUNT],
        }
    }

    /// Start the sensor processes in idle mode
    pub fn start_processes(&mut self) {
        if !self.running {
            log::debug!("sensor processes started");
            self.running = true;
        }
    }

    /// Stop sampling and the processes themselves
    pub fn stop_processes(&mut self, timers: &mut TimerWheel) {
        self.stop_sampling(timers);
        if self.running {
            log::debug!("sensor processes stopped");
            self.running = false;
        }
    }

    /// Whether the processes accept start commands
    pub fn processes_running(&self) -> bool {
        self.running
    }

    /// Start every idle channel for `subscriber`. Returns how many started.
    ///
    /// Channels already sampling keep their current walk.
    pub fn start_sampling<R: Rng>(
        &mut self,
        rng: &mut R,
        timers: &mut TimerWheel,
        now: Timestamp,
        subscriber: SubscriberId,
    ) -> usize {
        if !self.running {
            log::warn!("start sampling ignored: sensor processes not running");
            return 0;
        }

        let mut started = 0;
        for channel in Channel::ALL {
            let slot = &mut self.samplers[channel.index()];
            if *slot != SamplerState::Idle {
                continue;
            }
            let profile = self.channels.get(channel);
            let first = initial(rng, profile.lower_bound, profile.upper_bound);
            *slot = SamplerState::Sampling { last: first, subscriber };
            timers.arm_periodic(TimerId::Sampling(channel), now, profile.sampling_interval_ms);
            log::debug!("{channel} sampling every {} ms from {first}", profile.sampling_interval_ms);
            started += 1;
        }
        started
    }

    /// Return every channel to idle and disarm its timer
    pub fn stop_sampling(&mut self, timers: &mut TimerWheel) {
        for channel in Channel::ALL {
            timers.cancel(TimerId::Sampling(channel));
            self.samplers[channel.index()] = SamplerState::Idle;
        }
    }

    /// Whether `channel` is producing samples
    pub fn is_sampling(&self, channel: Channel) -> bool {
        matches!(self.samplers[channel.index()], SamplerState::Sampling { .. })
    }

    /// Latest value of `channel`, if sampling
    pub fn last_value(&self, channel: Channel) -> Option<i32> {
        match self.samplers[channel.index()] {
            SamplerState::Sampling { last, .. } => Some(last),
            SamplerState::Idle => None,
        }
    }

    /// Advance `channel` by one step.
    ///
    /// Ticks for idle channels are stale timer fires and yield nothing.
    pub fn on_tick<R: Rng>(
        &mut self,
        channel: Channel,
        rng: &mut R,
        now: Timestamp,
    ) -> Option<(SubscriberId, Sample)> {
        let profile = self.channels.get(channel);
        let slot = &mut self.samplers[channel.index()];
        let SamplerState::Sampling { last, subscriber } = *slot else {
            return None;
        };

        let value = generate(rng, last, profile.max_deviation, profile.lower_bound, profile.upper_bound);
        *slot = SamplerState::Sampling { last: value, subscriber };
        Some((subscriber, Sample { channel, value, timestamp: now }))
    }
}
