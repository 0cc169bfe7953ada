//! Live camera frames.
//!
//! Camera frames may carry an inline base64 JPEG. Decoding happens on a
//! worker thread; completed images are painted, followed by their boxes, when
//! the owning session drains the queue. Each job carries the session's
//! `Liveness` as captured when the frame arrived, so an image finishing after
//! its session stopped is discarded instead of repainting a dead session.
//! Frames are numbered on arrival; a decode finishing after a newer frame was
//! already drawn is discarded too, so the overlay never steps back in time.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::GenericImageView;

use crate::model::Detection;
use crate::sync::Overlay;

/// Decoded RGB8 image.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame>;
}

/// JPEG decoding through the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegDecoder;

impl ImageDecoder for JpegDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        let (width, height) = image.dimensions();
        let rgb = image.into_rgb8();
        Ok(DecodedFrame {
            width,
            height,
            rgb: rgb.into_raw(),
        })
    }
}

/// "Is this session still active" flag. Clones share the flag; a new session
/// gets a fresh one.
#[derive(Clone, Debug)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// A flag that was never alive, for sessions without a live feed.
    pub fn dead() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

struct DecodeJob {
    seq: u64,
    liveness: Liveness,
    payload: String,
    detections: Vec<Detection>,
}

struct DecodeOutcome {
    seq: u64,
    liveness: Liveness,
    frame: Result<DecodedFrame>,
    detections: Vec<Detection>,
}

/// Sequential off-thread image decoding. Completions come back in
/// submission order.
pub struct DecodeQueue {
    jobs: Option<Sender<DecodeJob>>,
    done: Receiver<DecodeOutcome>,
    worker: Option<JoinHandle<()>>,
    in_flight: usize,
    next_seq: u64,
    /// Arrival number of the newest frame on screen.
    last_drawn: u64,
}

impl DecodeQueue {
    pub fn new(decoder: Arc<dyn ImageDecoder>) -> Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<DecodeJob>();
        let (done_tx, done_rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("frame-decode".to_string())
            .spawn(move || {
                for job in jobs_rx {
                    // Skip work for sessions that already ended.
                    let frame = if job.liveness.is_alive() {
                        decode_payload(decoder.as_ref(), &job.payload)
                    } else {
                        Err(anyhow!("session ended before decode"))
                    };
                    let outcome = DecodeOutcome {
                        seq: job.seq,
                        liveness: job.liveness,
                        frame,
                        detections: job.detections,
                    };
                    if done_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })
            .context("spawn frame decode worker")?;
        Ok(Self {
            jobs: Some(jobs_tx),
            done: done_rx,
            worker: Some(worker),
            in_flight: 0,
            next_seq: 0,
            last_drawn: 0,
        })
    }

    /// Queue an inline image for decoding under the given session liveness.
    pub fn submit(&mut self, liveness: Liveness, payload: String, detections: Vec<Detection>) {
        if self.jobs.is_none() {
            return;
        }
        let seq = self.arrival();
        let Some(jobs) = self.jobs.as_ref() else {
            return;
        };
        let job = DecodeJob {
            seq,
            liveness,
            payload,
            detections,
        };
        if jobs.send(job).is_ok() {
            self.in_flight += 1;
        } else {
            log::warn!("frame decode worker is gone; dropping camera image");
        }
    }

    /// Record a frame that was drawn without going through the queue.
    /// Decodes of earlier frames still in flight are dropped on completion.
    pub fn mark_drawn(&mut self) {
        self.last_drawn = self.arrival();
    }

    fn arrival(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Paint every completed decode whose session is still alive. Returns the
    /// number of frames painted.
    pub fn drain(&mut self, overlay: &mut dyn Overlay) -> usize {
        let mut painted = 0;
        while let Ok(outcome) = self.done.try_recv() {
            painted += self.complete(outcome, overlay);
        }
        painted
    }

    /// Wait up to `timeout` for one completion, then drain the rest.
    pub fn drain_timeout(&mut self, overlay: &mut dyn Overlay, timeout: Duration) -> usize {
        if self.in_flight == 0 {
            return 0;
        }
        let first = match self.done.recv_timeout(timeout) {
            Ok(outcome) => self.complete(outcome, overlay),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
        };
        first + self.drain(overlay)
    }

    fn complete(&mut self, outcome: DecodeOutcome, overlay: &mut dyn Overlay) -> usize {
        self.in_flight = self.in_flight.saturating_sub(1);
        if !outcome.liveness.is_alive() {
            log::debug!("discarding camera image decoded after its session stopped");
            return 0;
        }
        if outcome.seq < self.last_drawn {
            log::debug!(
                "discarding camera image {} superseded by frame {}",
                outcome.seq,
                self.last_drawn
            );
            return 0;
        }
        match outcome.frame {
            Ok(frame) => {
                self.last_drawn = outcome.seq;
                overlay.paint_frame(&frame);
                overlay.draw(&outcome.detections);
                1
            }
            Err(err) => {
                log::debug!("dropping undecodable camera image: {:#}", err);
                0
            }
        }
    }
}

impl Drop for DecodeQueue {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn decode_payload(decoder: &dyn ImageDecoder, payload: &str) -> Result<DecodedFrame> {
    let bytes = BASE64_STANDARD
        .decode(payload.trim())
        .context("inline image is not valid base64")?;
    decoder.decode(&bytes)
}
