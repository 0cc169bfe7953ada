//! Detection overlay client
//!
//! Streams object-detection results from the analysis backend and keeps a
//! bounding-box overlay in step with media playback.
//!
//! # Module Structure
//!
//! - `ingest`: backend streams (SSE framing, cancellation, reader threads)
//! - `timeline`: time-ordered detection frames with at-or-before lookup
//! - `sync`: per-paint-cycle overlay synchronization against a media clock
//! - `webcam`: live camera frames, off-thread image decoding, liveness guard
//! - `controller`: the single active session and its lifecycle
//! - `present`, `ui`: status/results contract and the terminal front end
//! - `config`: file + environment configuration

pub mod config;
pub mod controller;
pub mod ingest;
pub mod model;
pub mod present;
pub mod sync;
pub mod timeline;
pub mod ui;
pub mod webcam;

pub use config::{CameraSettings, OverlayConfig};
pub use controller::{Controller, SessionKind};
pub use ingest::{
    open_stream, CameraRequest, HttpTransport, SessionState, StreamError, StreamHandle,
    StreamObserver, StreamSession, StreamSource, Transport, Upload,
};
pub use model::{BoundingBox, Detection, FrameRecord};
pub use present::{Locale, Messages, Presenter};
pub use sync::{
    FrameScheduler, IntervalScheduler, ManualScheduler, MediaClock, Overlay, PlaybackClock,
    RenderSynchronizer,
};
pub use timeline::Timeline;
pub use webcam::{DecodeQueue, DecodedFrame, ImageDecoder, JpegDecoder, Liveness};
