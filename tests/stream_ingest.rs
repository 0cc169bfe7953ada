mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use detection_overlay::{
    open_stream, FrameRecord, SessionState, StreamError, StreamObserver, StreamSession,
    StreamSource,
};

use common::{camera_event, frame_event, video_upload, Script, ScriptedTransport, DONE_EVENT};

#[derive(Default)]
struct Collector {
    frames: Vec<FrameRecord>,
    done: usize,
    errors: Vec<String>,
}

impl StreamObserver for Collector {
    fn on_frame(&mut self, frame: FrameRecord) {
        self.frames.push(frame);
    }

    fn on_done(&mut self) {
        self.done += 1;
    }

    fn on_error(&mut self, error: &StreamError) {
        self.errors.push(error.to_string());
    }
}

impl Collector {
    fn timestamps(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.timestamp).collect()
    }
}

fn pump_to_end(session: &mut StreamSession, observer: &mut Collector) -> SessionState {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let state = session.pump_timeout(observer, Duration::from_millis(50));
        if state.is_terminal() {
            return state;
        }
    }
    session.state()
}

fn video_stream(transport: ScriptedTransport) -> StreamSession {
    open_stream(Arc::new(transport), StreamSource::Video(video_upload()))
}

#[test]
fn malformed_record_between_valid_frames_is_skipped() {
    let body = format!(
        "{}data: {{\"t\": 0.2, \"detections\": [\n\n{}{}",
        frame_event(0.1, &["fire"]),
        frame_event(0.3, &["smoke"]),
        DONE_EVENT
    );
    let transport =
        ScriptedTransport::new().script("video", Script::Chunks(vec![body.into_bytes()]));
    let mut session = video_stream(transport);
    let mut observer = Collector::default();

    assert_eq!(pump_to_end(&mut session, &mut observer), SessionState::Completed);
    assert_eq!(observer.timestamps(), vec![0.1, 0.3]);
    assert_eq!(observer.done, 1);
    assert!(observer.errors.is_empty());
}

#[test]
fn events_split_across_reads_are_reassembled() {
    let body = format!(
        "{}{}{}",
        frame_event(0.5, &["fire"]),
        frame_event(1.0, &[]),
        DONE_EVENT
    )
    .into_bytes();
    let chunks: Vec<Vec<u8>> = body.chunks(7).map(|c| c.to_vec()).collect();
    let transport = ScriptedTransport::new().script("video", Script::Chunks(chunks));
    let mut session = video_stream(transport);
    let mut observer = Collector::default();

    assert_eq!(pump_to_end(&mut session, &mut observer), SessionState::Completed);
    assert_eq!(observer.timestamps(), vec![0.5, 1.0]);
    assert_eq!(session.frames_delivered(), 2);
}

#[test]
fn frame_before_sentinel_in_same_chunk_is_delivered() {
    let body = format!(
        "{}{}{}",
        frame_event(0.1, &["fire"]),
        DONE_EVENT,
        frame_event(0.2, &["smoke"])
    );
    let transport =
        ScriptedTransport::new().script("video", Script::Chunks(vec![body.into_bytes()]));
    let mut session = video_stream(transport);
    let mut observer = Collector::default();

    assert_eq!(pump_to_end(&mut session, &mut observer), SessionState::Completed);
    assert_eq!(observer.timestamps(), vec![0.1]);
    assert_eq!(observer.done, 1);

    // Nothing more is ever dispatched after completion.
    session.pump(&mut observer);
    assert_eq!(observer.frames.len(), 1);
    assert_eq!(observer.done, 1);
}

#[test]
fn end_of_stream_without_sentinel_completes_once() {
    let body = frame_event(0.1, &["fire"]);
    let transport =
        ScriptedTransport::new().script("video", Script::Chunks(vec![body.into_bytes()]));
    let mut session = video_stream(transport);
    let mut observer = Collector::default();

    assert_eq!(pump_to_end(&mut session, &mut observer), SessionState::Completed);
    session.pump(&mut observer);
    assert_eq!(observer.timestamps(), vec![0.1]);
    assert_eq!(observer.done, 1);
    assert!(observer.errors.is_empty());
}

#[test]
fn backend_failure_reports_one_error_and_no_done() {
    let transport = ScriptedTransport::new().script(
        "camera",
        Script::Fail(StreamError::Backend {
            status: 409,
            detail: Some("camera busy".to_string()),
        }),
    );
    let mut session = open_stream(
        Arc::new(transport),
        StreamSource::Camera(Default::default()),
    );
    let mut observer = Collector::default();

    assert_eq!(pump_to_end(&mut session, &mut observer), SessionState::Failed);
    session.pump(&mut observer);
    assert_eq!(observer.errors, vec!["backend returned status 409".to_string()]);
    assert_eq!(observer.done, 0);
    assert!(observer.frames.is_empty());
}

#[test]
fn cancel_stops_dispatch_even_with_events_queued() {
    let (transport, feed) = ScriptedTransport::new().gated("camera");
    let mut session = open_stream(
        Arc::new(transport),
        StreamSource::Camera(Default::default()),
    );
    let handle = session.handle();
    let mut observer = Collector::default();

    feed.send(camera_event(0.1, &["person"], None).into_bytes())
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while observer.frames.is_empty() && Instant::now() < deadline {
        session.pump_timeout(&mut observer, Duration::from_millis(20));
    }
    assert_eq!(observer.frames.len(), 1);

    // Frames already read but not yet dispatched must not surface.
    feed.send(camera_event(0.2, &["person"], None).into_bytes())
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    handle.cancel();
    assert!(handle.is_cancelled());

    feed.send(DONE_EVENT.as_bytes().to_vec()).ok();
    session.pump_timeout(&mut observer, Duration::from_millis(50));
    session.pump(&mut observer);

    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(observer.frames.len(), 1);
    assert_eq!(observer.done, 0);
    assert!(observer.errors.is_empty());
}

#[test]
fn cancelled_session_reports_no_error_when_reader_dies() {
    let (transport, feed) = ScriptedTransport::new().gated("remote");
    let source = StreamSource::remote("https://www.youtube.com/watch?v=abc").unwrap();
    let mut session = open_stream(Arc::new(transport), source);
    let mut observer = Collector::default();

    session.cancel();
    drop(feed);
    std::thread::sleep(Duration::from_millis(50));
    session.pump(&mut observer);
    session.pump_timeout(&mut observer, Duration::from_millis(20));

    assert_eq!(session.state(), SessionState::Cancelled);
    assert!(observer.errors.is_empty());
    assert_eq!(observer.done, 0);
}

#[test]
fn connection_lost_after_frames_fails_once() {
    let transport = ScriptedTransport::new().script(
        "video",
        Script::Broken(vec![frame_event(0.4, &["fire"]).into_bytes()]),
    );
    let mut session = video_stream(transport);
    let mut observer = Collector::default();

    assert_eq!(pump_to_end(&mut session, &mut observer), SessionState::Failed);
    session.pump(&mut observer);
    assert_eq!(observer.timestamps(), vec![0.4]);
    assert_eq!(observer.done, 0);
    assert_eq!(observer.errors.len(), 1);
    assert!(observer.errors[0].starts_with("transport failure"));
}

#[test]
fn read_timeouts_do_not_fail_the_stream() {
    let transport = ScriptedTransport::new().script(
        "camera",
        Script::Stalling(vec![
            camera_event(0.0, &["person"], None).into_bytes(),
            camera_event(0.1, &[], None).into_bytes(),
            DONE_EVENT.as_bytes().to_vec(),
        ]),
    );
    let mut session = open_stream(
        Arc::new(transport),
        StreamSource::Camera(Default::default()),
    );
    let mut observer = Collector::default();

    assert_eq!(pump_to_end(&mut session, &mut observer), SessionState::Completed);
    assert_eq!(observer.timestamps(), vec![0.0, 0.1]);
    assert_eq!(observer.done, 1);
    assert!(observer.errors.is_empty());
}

#[test]
fn cancelled_silent_stream_releases_its_connection() {
    let transport = Arc::new(ScriptedTransport::new().script(
        "camera",
        Script::Stalling(vec![camera_event(0.0, &["person"], None).into_bytes()]),
    ));
    let mut session = open_stream(transport.clone(), StreamSource::Camera(Default::default()));
    let mut observer = Collector::default();

    let deadline = Instant::now() + Duration::from_secs(5);
    while observer.frames.is_empty() && Instant::now() < deadline {
        session.pump_timeout(&mut observer, Duration::from_millis(20));
    }
    assert_eq!(observer.frames.len(), 1);
    assert_eq!(transport.readers_released(), 0);

    // The backend sends nothing more; only the cancel can end the reader.
    session.cancel();
    let deadline = Instant::now() + Duration::from_secs(5);
    while transport.readers_released() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(transport.readers_released(), 1);

    session.pump(&mut observer);
    assert_eq!(session.state(), SessionState::Cancelled);
    assert!(observer.errors.is_empty());
    assert_eq!(observer.done, 0);
}
