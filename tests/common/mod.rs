#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use detection_overlay::{
    Controller, DecodedFrame, Detection, ImageDecoder, Locale, ManualScheduler, Messages,
    Overlay, PlaybackClock, Presenter, StreamError, StreamSource, Transport, Upload,
};

/// What the fake backend does when a stream of a given kind is opened.
pub enum Script {
    /// Serve these chunks, one per read, then end.
    Chunks(Vec<Vec<u8>>),
    /// Serve these chunks, then fail the connection.
    Broken(Vec<Vec<u8>>),
    /// Time out before every chunk and keep timing out after the last one,
    /// like a silent backend behind a socket read timeout.
    Stalling(Vec<Vec<u8>>),
    /// Serve chunks as the test sends them; end when the sender is dropped.
    Gated(Receiver<Vec<u8>>),
    Fail(StreamError),
}

/// In-memory backend keyed by stream kind ("video", "remote", "camera").
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<&'static str, Script>>,
    image: Mutex<Option<Result<Vec<Detection>, StreamError>>>,
    opened: Mutex<Vec<&'static str>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, kind: &'static str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(kind, script);
        self
    }

    /// Stream whose chunks the test feeds through the returned sender.
    pub fn gated(self, kind: &'static str) -> (Self, Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        (self.script(kind, Script::Gated(rx)), tx)
    }

    pub fn image_result(self, result: Result<Vec<Detection>, StreamError>) -> Self {
        *self.image.lock().unwrap() = Some(result);
        self
    }

    pub fn opened(&self) -> Vec<&'static str> {
        self.opened.lock().unwrap().clone()
    }

    /// Number of stream readers dropped so far.
    pub fn readers_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn open_stream(&self, source: &StreamSource) -> Result<Box<dyn Read + Send>, StreamError> {
        self.opened.lock().unwrap().push(source.kind());
        let script = self.scripts.lock().unwrap().remove(source.kind());
        let release = ReleaseGuard(Arc::clone(&self.released));
        match script {
            Some(Script::Chunks(chunks)) => {
                Ok(Box::new(ChunkReader::new(chunks, ChunkEnd::Eof, release)))
            }
            Some(Script::Broken(chunks)) => {
                Ok(Box::new(ChunkReader::new(chunks, ChunkEnd::Broken, release)))
            }
            Some(Script::Stalling(chunks)) => {
                Ok(Box::new(ChunkReader::new(chunks, ChunkEnd::Stall, release)))
            }
            Some(Script::Gated(rx)) => Ok(Box::new(GatedReader::new(rx, release))),
            Some(Script::Fail(err)) => Err(err),
            None => Err(StreamError::Transport(format!(
                "no script for {} stream",
                source.kind()
            ))),
        }
    }

    fn predict_image(&self, _upload: &Upload) -> Result<Vec<Detection>, StreamError> {
        self.image.lock().unwrap().take().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Counts a reader as released when it is dropped.
pub struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum ChunkEnd {
    Eof,
    Broken,
    Stall,
}

fn read_timed_out() -> io::Error {
    std::thread::sleep(Duration::from_millis(2));
    io::Error::new(ErrorKind::TimedOut, "timed out reading response")
}

/// Serves one queued chunk per `read` call.
pub struct ChunkReader {
    chunks: Vec<Vec<u8>>,
    current: Vec<u8>,
    end: ChunkEnd,
    stalled: bool,
    _release: ReleaseGuard,
}

impl ChunkReader {
    pub fn new(mut chunks: Vec<Vec<u8>>, end: ChunkEnd, release: ReleaseGuard) -> Self {
        chunks.reverse();
        Self {
            chunks,
            current: Vec::new(),
            end,
            stalled: false,
            _release: release,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.current.is_empty() {
            if self.end == ChunkEnd::Stall && !self.stalled {
                self.stalled = true;
                return Err(read_timed_out());
            }
            match self.chunks.pop() {
                Some(chunk) => {
                    self.current = chunk;
                    self.stalled = false;
                }
                None => {
                    return match self.end {
                        ChunkEnd::Eof => Ok(0),
                        ChunkEnd::Broken => Err(io::Error::new(
                            ErrorKind::ConnectionReset,
                            "connection reset by peer",
                        )),
                        ChunkEnd::Stall => {
                            self.stalled = false;
                            Err(read_timed_out())
                        }
                    };
                }
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.drain(..n);
        Ok(n)
    }
}

/// Blocks until the test releases the next chunk.
pub struct GatedReader {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    _release: ReleaseGuard,
}

impl GatedReader {
    pub fn new(rx: Receiver<Vec<u8>>, release: ReleaseGuard) -> Self {
        Self {
            rx,
            current: Vec::new(),
            _release: release,
        }
    }
}

impl Read for GatedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.current = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.drain(..n);
        Ok(n)
    }
}

/// One SSE record for a frame.
pub fn frame_event(t: f64, classes: &[&str]) -> String {
    let detections: Vec<String> = classes
        .iter()
        .map(|class| {
            format!(
                r#"{{"class":"{}","confidence":0.9,"bbox":[1,2,30,40]}}"#,
                class
            )
        })
        .collect();
    format!("data: {{\"t\":{},\"detections\":[{}]}}\n\n", t, detections.join(","))
}

pub fn camera_event(t: f64, classes: &[&str], frame: Option<&str>) -> String {
    let base = frame_event(t, classes);
    match frame {
        Some(frame) => base.replacen(
            "\"detections\"",
            &format!("\"frame\":\"{}\",\"detections\"", frame),
            1,
        ),
        None => base,
    }
}

pub const DONE_EVENT: &str = "data: {\"done\":true}\n\n";

/// Records what the overlay was asked to draw, as class lists.
#[derive(Default)]
pub struct RecordingOverlay {
    pub draws: Vec<Vec<String>>,
    pub paints: Vec<(u32, u32)>,
}

impl RecordingOverlay {
    pub fn last(&self) -> Option<&Vec<String>> {
        self.draws.last()
    }
}

impl Overlay for RecordingOverlay {
    fn draw(&mut self, detections: &[Detection]) {
        self.draws
            .push(detections.iter().map(|d| d.class.clone()).collect());
    }

    fn paint_frame(&mut self, frame: &DecodedFrame) {
        self.paints.push((frame.width, frame.height));
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    pub statuses: Vec<(String, bool)>,
    pub errors: Vec<String>,
    pub notices: Vec<String>,
    pub detection_batches: usize,
    pub live: bool,
}

impl RecordingPresenter {
    pub fn last_status(&self) -> Option<&str> {
        self.statuses.last().map(|(text, _)| text.as_str())
    }
}

impl Presenter for RecordingPresenter {
    fn set_status(&mut self, text: &str, loading: bool) {
        self.statuses.push((text.to_string(), loading));
    }

    fn show_detections(&mut self, _detections: &[Detection]) {
        self.detection_batches += 1;
    }

    fn show_notice(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }

    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    fn clear_results(&mut self) {}

    fn set_live(&mut self, live: bool) {
        self.live = live;
    }
}

/// Treats the decoded payload bytes as a 1xN strip.
pub struct StripDecoder;

impl ImageDecoder for StripDecoder {
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<DecodedFrame> {
        Ok(DecodedFrame {
            width: bytes.len() as u32,
            height: 1,
            rgb: bytes.iter().flat_map(|b| [*b, *b, *b]).collect(),
        })
    }
}

#[derive(Debug, Default)]
pub struct ClockState {
    pub position: f64,
    pub paused: bool,
    pub ended: bool,
    pub duration_hint: Option<f64>,
    pub seeks: Vec<f64>,
}

/// Clock the test moves by hand while the controller owns it.
#[derive(Clone, Default)]
pub struct SharedClock(pub Rc<RefCell<ClockState>>);

impl SharedClock {
    pub fn set_position(&self, position: f64) {
        self.0.borrow_mut().position = position;
    }

    pub fn set_paused(&self, paused: bool) {
        self.0.borrow_mut().paused = paused;
    }

    pub fn boxed(&self) -> Box<dyn PlaybackClock> {
        Box::new(self.clone())
    }
}

impl PlaybackClock for SharedClock {
    fn position(&self) -> f64 {
        self.0.borrow().position
    }

    fn is_paused(&self) -> bool {
        self.0.borrow().paused
    }

    fn is_ended(&self) -> bool {
        self.0.borrow().ended
    }

    fn seek(&mut self, position: f64) {
        let mut state = self.0.borrow_mut();
        state.position = position;
        state.seeks.push(position);
        state.ended = state.duration_hint.map_or(false, |end| position >= end);
    }

    /// Like a media element, a position already past the duration ends playback.
    fn set_duration_hint(&mut self, duration: f64) {
        let mut state = self.0.borrow_mut();
        state.duration_hint = Some(duration);
        state.ended = state.position >= duration;
    }
}

pub type TestController = Controller<ManualScheduler, RecordingOverlay, RecordingPresenter>;

pub fn controller(transport: ScriptedTransport) -> (TestController, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport);
    let controller = Controller::new(
        transport.clone(),
        ManualScheduler::new(),
        RecordingOverlay::default(),
        RecordingPresenter::default(),
        Arc::new(StripDecoder),
        Messages::new(Locale::En),
    )
    .expect("controller");
    (controller, transport)
}

/// Run the controller until `done` holds or the deadline passes.
pub fn run_until(
    controller: &mut TestController,
    mut done: impl FnMut(&TestController) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        controller.run_once(Duration::from_millis(20));
        if done(controller) {
            return true;
        }
    }
    false
}

pub fn video_upload() -> Upload {
    Upload::new("clip.mp4", "video/mp4", b"fake video".to_vec())
}
