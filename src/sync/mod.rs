//! Overlay synchronization with media playback.
//!
//! The synchronizer keeps exactly one paint-cycle request pending while it
//! runs. Each cycle reads the media clock (not wall time), looks the position
//! up in the session timeline and redraws the overlay. The clock, timeline and
//! overlay belong to the session and are lent to each call.

pub mod clock;
pub mod scheduler;

use crate::model::Detection;
use crate::timeline::Timeline;
use crate::webcam::DecodedFrame;

pub use clock::{MediaClock, PlaybackClock};
pub use scheduler::{FrameScheduler, FrameToken, IntervalScheduler, ManualScheduler};

/// Presentation collaborator that renders detection boxes.
pub trait Overlay {
    /// Clear the overlay and draw `detections`. An empty slice clears it.
    fn draw(&mut self, detections: &[Detection]);

    /// Paint a decoded camera image underneath the boxes.
    fn paint_frame(&mut self, _frame: &DecodedFrame) {}

    fn clear(&mut self) {
        self.draw(&[]);
    }
}

#[derive(Debug, Default)]
pub struct RenderSynchronizer {
    pending: Option<FrameToken>,
    cycles: u64,
}

impl RenderSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin (or restart) the per-cycle loop. Any pending request is dropped
    /// first so only one is ever outstanding.
    pub fn start(&mut self, scheduler: &mut dyn FrameScheduler) {
        if let Some(token) = self.pending.take() {
            scheduler.unschedule(token);
        }
        self.pending = Some(scheduler.schedule());
    }

    /// Cancel the pending request. No-op when already stopped.
    pub fn stop(&mut self, scheduler: &mut dyn FrameScheduler) {
        if let Some(token) = self.pending.take() {
            scheduler.unschedule(token);
        }
    }

    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Handle a due paint cycle. Tokens this synchronizer is not waiting on
    /// are ignored. Returns true when the cycle was ours.
    pub fn on_display_frame(
        &mut self,
        token: FrameToken,
        scheduler: &mut dyn FrameScheduler,
        clock: &dyn PlaybackClock,
        timeline: &Timeline,
        overlay: &mut dyn Overlay,
    ) -> bool {
        if self.pending != Some(token) {
            log::debug!("ignoring stale paint token {}", token.id());
            return false;
        }
        self.pending = None;
        self.cycles += 1;
        if clock.is_playing() {
            draw_position(clock.position(), timeline, overlay);
        }
        self.pending = Some(scheduler.schedule());
        true
    }

    /// Immediate lookup-and-draw outside the cycle cadence, used after seeks
    /// and when a stream completes.
    pub fn sync_now(&self, clock: &dyn PlaybackClock, timeline: &Timeline, overlay: &mut dyn Overlay) {
        draw_position(clock.position(), timeline, overlay);
    }
}

fn draw_position(position: f64, timeline: &Timeline, overlay: &mut dyn Overlay) {
    match timeline.find_at_or_before(position) {
        Some(frame) => overlay.draw(&frame.detections),
        None => overlay.draw(&[]),
    }
}
