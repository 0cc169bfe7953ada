//! Timestamp-ordered index of streamed frames.
//!
//! Frames arrive in network order, which is not timestamp order. Lookups made
//! while the stream is still running scan linearly; once the stream completes
//! the timeline is sorted a single time and every later lookup is a binary
//! search. Both paths resolve ties on equal timestamps to the frame that comes
//! last in arrival order, so results do not change across `finalize`.

use anyhow::{anyhow, Result};

use crate::model::FrameRecord;

#[derive(Clone, Debug, Default)]
pub struct Timeline {
    frames: Vec<FrameRecord>,
    finalized: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a frame in arrival order. Rejected once the timeline is finalized.
    pub fn append(&mut self, frame: FrameRecord) -> Result<()> {
        if self.finalized {
            return Err(anyhow!(
                "timeline is finalized; frame at t={} rejected",
                frame.timestamp
            ));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Sort by timestamp. The sort is stable, so equal timestamps keep their
    /// arrival order. Calling it again is a no-op.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.frames
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    /// Last frame whose timestamp is `<= time`.
    pub fn find_at_or_before(&self, time: f64) -> Option<&FrameRecord> {
        if time.is_nan() {
            return None;
        }
        if self.finalized {
            let idx = self.frames.partition_point(|f| f.timestamp <= time);
            idx.checked_sub(1).map(|i| &self.frames[i])
        } else {
            self.scan_at_or_before(time)
        }
    }

    fn scan_at_or_before(&self, time: f64) -> Option<&FrameRecord> {
        let mut best: Option<&FrameRecord> = None;
        for frame in &self.frames {
            if frame.timestamp > time {
                continue;
            }
            match best {
                Some(current) if frame.timestamp < current.timestamp => {}
                _ => best = Some(frame),
            }
        }
        best
    }

    /// Earliest and latest timestamps seen so far.
    pub fn span(&self) -> Option<(f64, f64)> {
        if self.finalized {
            let first = self.frames.first()?;
            let last = self.frames.last()?;
            return Some((first.timestamp, last.timestamp));
        }
        self.frames.iter().fold(None, |acc, f| match acc {
            None => Some((f.timestamp, f.timestamp)),
            Some((lo, hi)) => Some((lo.min(f.timestamp), hi.max(f.timestamp))),
        })
    }
}
