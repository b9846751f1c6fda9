use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A granted slot in both rate windows. Pass it back to
/// [`RateLimiter::rollback`] to release exactly this slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    seq: u64,
    at: Instant,
}

impl Admission {
    pub fn at(&self) -> Instant {
        self.at
    }
}

/// Snapshot of how much of each window is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateUsage {
    pub hourly: usize,
    pub max_per_hour: usize,
    pub daily: usize,
    pub max_per_day: usize,
}

impl fmt::Display for RateUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} hourly, {}/{} daily",
            self.hourly, self.max_per_hour, self.daily, self.max_per_day
        )
    }
}

/// Sliding window of admissions over a fixed horizon.
#[derive(Debug)]
struct Window {
    horizon: Duration,
    max: usize,
    entries: VecDeque<(u64, Instant)>,
}

impl Window {
    fn new(horizon: Duration, max: usize) -> Self {
        Self {
            horizon,
            max,
            entries: VecDeque::new(),
        }
    }

    /// Drop every entry that is no longer strictly inside the horizon.
    fn prune(&mut self, now: Instant) {
        while self
            .entries
            .front()
            .is_some_and(|(_, t)| now.duration_since(*t) >= self.horizon)
        {
            self.entries.pop_front();
        }
    }

    /// `None` when there is spare capacity, otherwise how long until the
    /// oldest entry leaves the window.
    fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.entries.len() < self.max {
            return None;
        }
        let oldest = self.entries.front().map(|(_, t)| *t).unwrap_or(now);
        Some((oldest + self.horizon).saturating_duration_since(now))
    }

    fn remove(&mut self, seq: u64) -> bool {
        match self.entries.iter().position(|(s, _)| *s == seq) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct Windows {
    hourly: Window,
    daily: Window,
    next_seq: u64,
}

/// Two-horizon sliding-window rate limiter shared by every outbound post.
///
/// Check-and-record happens under one lock, so concurrent callers can never
/// push a window past its ceiling. The lock is released while waiting.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(max_per_hour: usize, max_per_day: usize) -> Self {
        Self {
            state: Mutex::new(Windows {
                hourly: Window::new(HOUR, max_per_hour),
                daily: Window::new(DAY, max_per_day),
                next_seq: 0,
            }),
        }
    }

    /// Wait until both windows have room, then record one admission in each.
    pub async fn admit(&self) -> Admission {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.hourly.prune(now);
                state.daily.prune(now);

                match (state.hourly.wait_time(now), state.daily.wait_time(now)) {
                    (None, None) => {
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.hourly.entries.push_back((seq, now));
                        state.daily.entries.push_back((seq, now));
                        debug!(
                            "Admission {} recorded: {}/{} hourly, {}/{} daily",
                            seq,
                            state.hourly.entries.len(),
                            state.hourly.max,
                            state.daily.entries.len(),
                            state.daily.max
                        );
                        return Admission { seq, at: now };
                    }
                    (hourly, daily) => hourly.unwrap_or_default().max(daily.unwrap_or_default()),
                }
            };

            info!(
                "Rate limit reached, waiting {} seconds before the next post",
                wait.as_secs().max(1)
            );
            sleep(wait).await;
        }
    }

    /// Release the slot held by `admission`, e.g. after its send failed.
    /// Returns false when the entry had already expired from both windows.
    pub async fn rollback(&self, admission: Admission) -> bool {
        let mut state = self.state.lock().await;
        let in_hourly = state.hourly.remove(admission.seq);
        let in_daily = state.daily.remove(admission.seq);
        debug!(
            "Rolled back admission {} (hourly: {}, daily: {})",
            admission.seq, in_hourly, in_daily
        );
        in_hourly || in_daily
    }

    pub async fn usage(&self) -> RateUsage {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.hourly.prune(now);
        state.daily.prune(now);
        RateUsage {
            hourly: state.hourly.entries.len(),
            max_per_hour: state.hourly.max,
            daily: state.daily.entries.len(),
            max_per_day: state.daily.max,
        }
    }
}
