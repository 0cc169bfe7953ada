//! Display-frame scheduling.
//!
//! A scheduler hands out one token per requested paint cycle. The driver
//! collects due tokens and passes them back to whoever scheduled them; a token
//! that was unscheduled is never returned.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameToken(u64);

impl FrameToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub trait FrameScheduler {
    /// Request a callback on the next paint cycle.
    fn schedule(&mut self) -> FrameToken;

    /// Drop a pending request. Unknown tokens are ignored.
    fn unschedule(&mut self, token: FrameToken);

    /// Tokens whose paint cycle has arrived at `now`. Returned tokens are no
    /// longer pending.
    fn due(&mut self, now: Instant) -> Vec<FrameToken>;

    /// When the next paint cycle is expected, if anything is pending.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn pending(&self) -> usize;
}

/// Deterministic scheduler: every call to `due` is one paint cycle.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: Vec<FrameToken>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameScheduler for ManualScheduler {
    fn schedule(&mut self) -> FrameToken {
        self.next_id += 1;
        let token = FrameToken(self.next_id);
        self.pending.push(token);
        token
    }

    fn unschedule(&mut self, token: FrameToken) {
        self.pending.retain(|pending| *pending != token);
    }

    fn due(&mut self, _now: Instant) -> Vec<FrameToken> {
        std::mem::take(&mut self.pending)
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Paces paint cycles at a fixed refresh rate. Requests made within one
/// refresh interval share the same cycle; while hidden no cycle fires and
/// pending requests wait until the scheduler is visible again.
#[derive(Debug)]
pub struct IntervalScheduler {
    interval: Duration,
    next_id: u64,
    pending: Vec<FrameToken>,
    last_cycle: Option<Instant>,
    visible: bool,
}

impl IntervalScheduler {
    pub fn new(refresh_hz: u32) -> Self {
        let hz = refresh_hz.max(1);
        Self {
            interval: Duration::from_secs_f64(1.0 / hz as f64),
            next_id: 0,
            pending: Vec::new(),
            last_cycle: None,
            visible: true,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    fn cycle_at(&self) -> Option<Instant> {
        if self.pending.is_empty() || !self.visible {
            return None;
        }
        Some(match self.last_cycle {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }
}

impl FrameScheduler for IntervalScheduler {
    fn schedule(&mut self) -> FrameToken {
        self.next_id += 1;
        let token = FrameToken(self.next_id);
        self.pending.push(token);
        token
    }

    fn unschedule(&mut self, token: FrameToken) {
        self.pending.retain(|pending| *pending != token);
    }

    fn due(&mut self, now: Instant) -> Vec<FrameToken> {
        if !self.visible || self.pending.is_empty() {
            return Vec::new();
        }
        if let Some(last) = self.last_cycle {
            if now < last + self.interval {
                return Vec::new();
            }
        }
        self.last_cycle = Some(now);
        std::mem::take(&mut self.pending)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.cycle_at()
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}
