//! Stream ingestion.
//!
//! A `StreamSession` owns one in-flight backend stream:
//! - a reader thread performs the blocking network reads and decodes events
//! - decoded events cross a channel and are dispatched to a `StreamObserver`
//!   only from `pump`, on the thread that owns the session
//! - the cancelled flag is checked before every dispatch, so nothing reaches
//!   the observer once `cancel` has returned
//!
//! Sessions move through `Idle -> Streaming -> {Completed | Failed | Cancelled}`
//! and dispatch nothing after reaching a terminal state.

pub mod decoder;
pub mod transport;

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::model::FrameRecord;

pub use decoder::{EventDecoder, StreamEvent, Utf8Chunker};
pub use transport::{CameraRequest, HttpTransport, StreamError, StreamSource, Transport, Upload};

const READ_CHUNK_BYTES: usize = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Cancellation handle shared by a session, its reader thread and callers.
#[derive(Clone, Debug, Default)]
pub struct StreamHandle {
    cancelled: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Receives the outcome of a stream session.
pub trait StreamObserver {
    fn on_frame(&mut self, frame: FrameRecord);
    fn on_done(&mut self);
    fn on_error(&mut self, error: &StreamError);
}

enum IngestMessage {
    Event(StreamEvent),
    /// Clean end of the byte stream without a completion marker.
    Ended,
    Failed(StreamError),
}

pub struct StreamSession {
    kind: &'static str,
    handle: StreamHandle,
    state: SessionState,
    rx: Receiver<IngestMessage>,
    worker: Option<JoinHandle<()>>,
    frames_delivered: u64,
}

/// Start streaming `source` on a reader thread.
pub fn open_stream(transport: Arc<dyn Transport>, source: StreamSource) -> StreamSession {
    let handle = StreamHandle::new();
    let (tx, rx) = mpsc::channel();
    let kind = source.kind();
    let mut session = StreamSession {
        kind,
        handle: handle.clone(),
        state: SessionState::Idle,
        rx,
        worker: None,
        frames_delivered: 0,
    };

    let reader_handle = handle.clone();
    let reader_tx = tx.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("{}-stream", kind))
        .spawn(move || run_reader(transport, source, reader_handle, reader_tx));
    match spawned {
        Ok(worker) => {
            session.worker = Some(worker);
            session.state = SessionState::Streaming;
            log::info!("{} stream started", kind);
        }
        Err(err) => {
            let _ = tx.send(IngestMessage::Failed(StreamError::Transport(format!(
                "spawn stream reader: {}",
                err
            ))));
            session.state = SessionState::Streaming;
        }
    }
    session
}

fn run_reader(
    transport: Arc<dyn Transport>,
    source: StreamSource,
    handle: StreamHandle,
    tx: Sender<IngestMessage>,
) {
    let fail = |err: StreamError| {
        if !handle.is_cancelled() && !err.is_cancelled() {
            let _ = tx.send(IngestMessage::Failed(err));
        }
    };

    let mut reader = match transport.open_stream(&source) {
        Ok(reader) => reader,
        Err(err) => return fail(err),
    };
    let mut decoder = EventDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        if handle.is_cancelled() {
            return;
        }
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            // Read timeouts only wake the reader to re-check cancellation.
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                continue
            }
            Err(err) => return fail(StreamError::Transport(err.to_string())),
        };
        for event in decoder.push(&chunk[..read]) {
            if tx.send(IngestMessage::Event(event)).is_err() {
                return;
            }
        }
        if decoder.is_finished() {
            log_decoder_stats(source.kind(), &decoder);
            return;
        }
    }

    for event in decoder.finish() {
        if tx.send(IngestMessage::Event(event)).is_err() {
            return;
        }
    }
    log_decoder_stats(source.kind(), &decoder);
    if !decoder.is_finished() {
        let _ = tx.send(IngestMessage::Ended);
    }
}

fn log_decoder_stats(kind: &str, decoder: &EventDecoder) {
    log::debug!(
        "{} stream reader finished: frames={} malformed={}",
        kind,
        decoder.frames_decoded(),
        decoder.malformed_records()
    );
}

impl StreamSession {
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        if self.handle.is_cancelled() && !self.state.is_terminal() {
            return SessionState::Cancelled;
        }
        self.state
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    pub fn cancel(&mut self) {
        self.handle.cancel();
        if !self.state.is_terminal() {
            self.state = SessionState::Cancelled;
            log::info!("{} stream cancelled", self.kind);
        }
    }

    /// Dispatch every event received so far without blocking.
    pub fn pump(&mut self, observer: &mut dyn StreamObserver) -> SessionState {
        while !self.settle().is_terminal() {
            match self.rx.try_recv() {
                Ok(message) => self.dispatch(message, observer),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.worker_lost(observer),
            }
        }
        self.state
    }

    /// Wait up to `timeout` for the next event, then drain what is pending.
    pub fn pump_timeout(
        &mut self,
        observer: &mut dyn StreamObserver,
        timeout: Duration,
    ) -> SessionState {
        if self.settle().is_terminal() {
            return self.state;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(message) => self.dispatch(message, observer),
            Err(RecvTimeoutError::Timeout) => return self.settle(),
            Err(RecvTimeoutError::Disconnected) => self.worker_lost(observer),
        }
        self.pump(observer)
    }

    fn settle(&mut self) -> SessionState {
        self.state = self.state();
        self.state
    }

    fn dispatch(&mut self, message: IngestMessage, observer: &mut dyn StreamObserver) {
        if self.settle().is_terminal() {
            return;
        }
        match message {
            IngestMessage::Event(StreamEvent::Frame(frame)) => {
                self.frames_delivered += 1;
                observer.on_frame(frame);
            }
            IngestMessage::Event(StreamEvent::Done) => {
                self.state = SessionState::Completed;
                log::info!(
                    "{} stream completed after {} frames",
                    self.kind,
                    self.frames_delivered
                );
                observer.on_done();
            }
            IngestMessage::Ended => {
                self.state = SessionState::Completed;
                log::warn!(
                    "{} stream closed without completion marker after {} frames",
                    self.kind,
                    self.frames_delivered
                );
                observer.on_done();
            }
            IngestMessage::Failed(err) => {
                self.state = SessionState::Failed;
                log::error!("{} stream failed: {}", self.kind, err);
                observer.on_error(&err);
            }
        }
    }

    fn worker_lost(&mut self, observer: &mut dyn StreamObserver) {
        self.dispatch(
            IngestMessage::Failed(StreamError::Transport(
                "stream reader stopped unexpectedly".to_string(),
            )),
            observer,
        );
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // The reader may be parked in a blocking read; it exits on its next
        // data or read timeout instead of being joined here.
        self.handle.cancel();
        self.worker.take();
    }
}
