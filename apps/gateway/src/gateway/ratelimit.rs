//! Sliding-window admission control for chat-class events.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Admits at most `max_events` within any `window`.
///
/// Owned by a single connection task; no synchronisation needed.
#[derive(Debug)]
pub struct SlidingWindow {
    max_events: usize,
    window: Duration,
    accepted: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events,
            window,
            accepted: VecDeque::with_capacity(max_events),
        }
    }

    /// Admit or reject an event at `now`. Rejected events are not recorded.
    pub fn admit_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.accepted.len() >= self.max_events {
            return false;
        }
        self.accepted.push_back(now);
        true
    }

    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Time until the oldest recorded event leaves the window.
    pub fn retry_after_at(&self, now: Instant) -> Duration {
        match self.accepted.front() {
            Some(oldest) if self.accepted.len() >= self.max_events => {
                (*oldest + self.window).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        }
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after_at(Instant::now())
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.accepted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.accepted.pop_front();
            } else {
                break;
            }
        }
    }
}
