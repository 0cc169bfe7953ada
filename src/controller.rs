//! Session controller.
//!
//! The controller owns the single active session: its stream, timeline,
//! media clock and liveness flag. Starting any new source tears the previous
//! session down first (cancel the stream, drop the timeline, stop the
//! synchronizer, revoke liveness, clear the overlay), so a stale stream can
//! never draw over the new one.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ingest::{
    open_stream, CameraRequest, SessionState, StreamError, StreamHandle, StreamObserver,
    StreamSession, StreamSource, Transport, Upload,
};
use crate::model::{Detection, FrameRecord};
use crate::present::{Messages, Presenter};
use crate::sync::{FrameScheduler, Overlay, PlaybackClock, RenderSynchronizer};
use crate::timeline::Timeline;
use crate::webcam::{DecodeQueue, ImageDecoder, Liveness};

/// A "no detections" notice is shown every this many empty camera frames.
const CAMERA_NOTICE_EVERY: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    Video,
    Remote,
    Camera,
}

/// State shared by the ingestor and the synchronizer for one session.
struct SessionContext {
    kind: SessionKind,
    timeline: Timeline,
    clock: Option<Box<dyn PlaybackClock>>,
    liveness: Liveness,
    frames_received: u64,
    done: bool,
}

impl SessionContext {
    fn new(kind: SessionKind, clock: Option<Box<dyn PlaybackClock>>, liveness: Liveness) -> Self {
        Self {
            kind,
            timeline: Timeline::new(),
            clock,
            liveness,
            frames_received: 0,
            done: false,
        }
    }
}

struct Session {
    stream: StreamSession,
    ctx: SessionContext,
}

pub struct Controller<S, O, P> {
    transport: Arc<dyn Transport>,
    scheduler: S,
    overlay: O,
    presenter: P,
    decoder: DecodeQueue,
    synchronizer: RenderSynchronizer,
    messages: Messages,
    session: Option<Session>,
}

impl<S, O, P> Controller<S, O, P>
where
    S: FrameScheduler,
    O: Overlay,
    P: Presenter,
{
    pub fn new(
        transport: Arc<dyn Transport>,
        scheduler: S,
        overlay: O,
        presenter: P,
        image_decoder: Arc<dyn ImageDecoder>,
        messages: Messages,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            scheduler,
            overlay,
            presenter,
            decoder: DecodeQueue::new(image_decoder)?,
            synchronizer: RenderSynchronizer::new(),
            messages,
            session: None,
        })
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn synchronizer(&self) -> &RenderSynchronizer {
        &self.synchronizer
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn session_kind(&self) -> Option<SessionKind> {
        self.session.as_ref().map(|session| session.ctx.kind)
    }

    pub fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, |session| session.stream.state())
    }

    pub fn stream_handle(&self) -> Option<StreamHandle> {
        self.session.as_ref().map(|session| session.stream.handle())
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.session.as_ref().map(|session| &session.ctx.timeline)
    }

    pub fn frames_received(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |session| session.ctx.frames_received)
    }

    /// Camera images still being decoded.
    pub fn images_in_flight(&self) -> usize {
        self.decoder.in_flight()
    }

    pub fn is_camera_active(&self) -> bool {
        self.session.as_ref().map_or(false, |session| {
            session.ctx.kind == SessionKind::Camera && session.ctx.liveness.is_alive()
        })
    }

    /// True once the stream reached a terminal state and the media, if any,
    /// has played to its end.
    pub fn is_finished(&self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return true;
        };
        if !session.stream.state().is_terminal() {
            return false;
        }
        if session.stream.state() != SessionState::Completed {
            return true;
        }
        match (&session.ctx.kind, session.ctx.clock.as_deref()) {
            (SessionKind::Camera, _) | (_, None) => true,
            (_, Some(clock)) => clock.is_ended(),
        }
    }

    /// Route a local file to image or video analysis by its type.
    pub fn handle_upload(
        &mut self,
        upload: Upload,
        clock: impl FnOnce() -> Box<dyn PlaybackClock>,
    ) -> Result<()> {
        if upload.is_video() {
            self.start_video(upload, clock());
            Ok(())
        } else if upload.is_image() {
            self.analyze_image(&upload).map(|_| ())
        } else {
            self.presenter
                .set_status(self.messages.unsupported_format(), false);
            Err(anyhow!("unsupported file type for {}", upload.file_name))
        }
    }

    /// One-shot analysis of a single image.
    pub fn analyze_image(&mut self, upload: &Upload) -> Result<Vec<Detection>> {
        self.teardown();
        self.presenter.set_status(self.messages.analyzing_image(), true);
        self.presenter.clear_results();

        match self.transport.predict_image(upload) {
            Ok(detections) => {
                if detections.is_empty() {
                    self.presenter.show_notice(self.messages.no_detections());
                } else {
                    self.presenter.show_detections(&detections);
                }
                self.overlay.draw(&detections);
                self.presenter.set_status(self.messages.image_done(), false);
                log::info!(
                    "image {} analyzed: {} detections",
                    upload.file_name,
                    detections.len()
                );
                Ok(detections)
            }
            Err(err) => {
                log::error!("image {} failed: {}", upload.file_name, err);
                self.presenter.show_error(self.messages.image_error());
                self.presenter.set_status(self.messages.image_failed(), false);
                self.overlay.clear();
                Err(anyhow::Error::new(err).context("image analysis failed"))
            }
        }
    }

    /// Upload a video and overlay its detections while `clock` plays.
    pub fn start_video(&mut self, upload: Upload, clock: Box<dyn PlaybackClock>) -> StreamHandle {
        self.teardown();
        self.presenter.clear_results();
        self.presenter.set_status(self.messages.uploading_video(), true);
        log::info!("analyzing video {}", upload.file_name);

        let ctx = SessionContext::new(SessionKind::Video, Some(clock), Liveness::dead());
        let handle = self.begin(StreamSource::Video(upload), ctx);
        // Draw while the upload is still streaming results.
        self.synchronizer.start(&mut self.scheduler);
        handle
    }

    /// Analyze a remote video by URL. Blank input is ignored.
    pub fn start_remote(
        &mut self,
        url: &str,
        clock: Option<Box<dyn PlaybackClock>>,
    ) -> Result<Option<StreamHandle>> {
        if url.trim().is_empty() {
            return Ok(None);
        }
        let source = StreamSource::remote(url)?;
        self.teardown();
        self.presenter.clear_results();
        self.presenter
            .set_status(self.messages.downloading_remote(), true);

        let has_clock = clock.is_some();
        let ctx = SessionContext::new(SessionKind::Remote, clock, Liveness::dead());
        let handle = self.begin(source, ctx);
        if has_clock {
            self.synchronizer.start(&mut self.scheduler);
        }
        Ok(Some(handle))
    }

    /// Start the live camera, or stop it when it is already running.
    /// Returns the new stream handle when a camera session was started.
    pub fn toggle_camera(&mut self, request: CameraRequest) -> Option<StreamHandle> {
        if self.is_camera_active() {
            self.teardown();
            self.presenter
                .set_status(self.messages.camera_stopped(), false);
            return None;
        }

        self.teardown();
        // Marked active only once the previous session is fully gone.
        let liveness = Liveness::new();
        self.presenter.clear_results();
        self.presenter.set_live(true);
        self.presenter
            .set_status(self.messages.camera_connecting(), true);
        log::info!(
            "starting camera device={} max_fps={} include_frame={}",
            request.device_index,
            request.max_fps,
            request.include_frame
        );

        let ctx = SessionContext::new(SessionKind::Camera, None, liveness);
        Some(self.begin(StreamSource::Camera(request), ctx))
    }

    /// Tear down the active session, if any. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.teardown();
    }

    /// Out-of-band position change: seek and redraw immediately.
    pub fn seek(&mut self, position: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let ctx = &mut session.ctx;
        if let Some(clock) = ctx.clock.as_deref_mut() {
            clock.seek(position);
            self.synchronizer
                .sync_now(&*clock, &ctx.timeline, &mut self.overlay);
        }
    }

    /// Process everything that is ready at `now`: stream events, finished
    /// image decodes and due paint cycles.
    pub fn tick(&mut self, now: Instant) {
        self.pump_stream(None);
        self.decoder.drain(&mut self.overlay);
        self.run_display_cycles(now);
    }

    /// Block for at most `max_wait` (less when a paint cycle is due sooner)
    /// waiting for work, then `tick`.
    pub fn run_once(&mut self, max_wait: Duration) {
        let now = Instant::now();
        let wait = match self.scheduler.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(max_wait),
            None => max_wait,
        };
        let streaming = self
            .session
            .as_ref()
            .map_or(false, |session| !session.stream.state().is_terminal());
        if streaming {
            self.pump_stream(Some(wait));
        } else if self.decoder.in_flight() > 0 {
            self.decoder.drain_timeout(&mut self.overlay, wait);
        } else if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        self.tick(Instant::now());
    }

    fn begin(&mut self, source: StreamSource, ctx: SessionContext) -> StreamHandle {
        let stream = open_stream(Arc::clone(&self.transport), source);
        let handle = stream.handle();
        self.session = Some(Session { stream, ctx });
        handle
    }

    fn teardown(&mut self) {
        self.synchronizer.stop(&mut self.scheduler);
        if let Some(mut session) = self.session.take() {
            session.stream.cancel();
            session.ctx.liveness.revoke();
            if session.ctx.kind == SessionKind::Camera {
                self.presenter.set_live(false);
            }
            log::debug!(
                "{} session torn down after {} frames",
                session.stream.kind(),
                session.ctx.frames_received
            );
        }
        self.overlay.clear();
    }

    fn pump_stream(&mut self, timeout: Option<Duration>) -> SessionState {
        let Some(session) = self.session.as_mut() else {
            return SessionState::Idle;
        };
        let mut observer = SessionObserver {
            ctx: &mut session.ctx,
            overlay: &mut self.overlay,
            presenter: &mut self.presenter,
            decoder: &mut self.decoder,
            synchronizer: &mut self.synchronizer,
            scheduler: &mut self.scheduler,
            messages: &self.messages,
        };
        match timeout {
            Some(timeout) => session.stream.pump_timeout(&mut observer, timeout),
            None => session.stream.pump(&mut observer),
        }
    }

    fn run_display_cycles(&mut self, now: Instant) {
        for token in self.scheduler.due(now) {
            let Some(session) = self.session.as_ref() else {
                continue;
            };
            let Some(clock) = session.ctx.clock.as_deref() else {
                continue;
            };
            self.synchronizer.on_display_frame(
                token,
                &mut self.scheduler,
                clock,
                &session.ctx.timeline,
                &mut self.overlay,
            );
        }
    }
}

/// Stream callbacks for the active session, borrowing the controller parts
/// they touch for the duration of one pump.
struct SessionObserver<'a, S, O, P> {
    ctx: &'a mut SessionContext,
    overlay: &'a mut O,
    presenter: &'a mut P,
    decoder: &'a mut DecodeQueue,
    synchronizer: &'a mut RenderSynchronizer,
    scheduler: &'a mut S,
    messages: &'a Messages,
}

impl<S, O, P> SessionObserver<'_, S, O, P>
where
    S: FrameScheduler,
    O: Overlay,
    P: Presenter,
{
    fn video_frame(&mut self, frame: FrameRecord) {
        self.ctx.frames_received += 1;
        if !self.ctx.done {
            self.presenter.set_status(
                &self.messages.frames_progress(self.ctx.frames_received),
                true,
            );
            if !frame.detections.is_empty() {
                self.presenter.show_detections(&frame.detections);
            }
        }
        if let Err(err) = self.ctx.timeline.append(frame) {
            log::warn!("{:#}", err);
        }
    }

    fn camera_frame(&mut self, frame: FrameRecord) {
        if !self.ctx.liveness.is_alive() {
            return;
        }
        self.ctx.frames_received += 1;
        let frames = self.ctx.frames_received;
        self.presenter
            .set_status(&self.messages.camera_active(frames), true);

        let FrameRecord {
            detections, frame, ..
        } = frame;
        if !detections.is_empty() {
            self.presenter.show_detections(&detections);
        } else if frames % CAMERA_NOTICE_EVERY == 0 {
            self.presenter.show_notice(self.messages.no_detections());
        }
        match frame {
            // The boxes are drawn once their image has been painted.
            Some(payload) => self
                .decoder
                .submit(self.ctx.liveness.clone(), payload, detections),
            None => {
                self.decoder.mark_drawn();
                self.overlay.draw(&detections);
            }
        }
    }

    fn error_text(&self, error: &StreamError) -> String {
        match (self.ctx.kind, error.detail()) {
            (_, Some(detail)) => detail.to_string(),
            (SessionKind::Video, None) => self.messages.video_error().to_string(),
            (_, None) => self.messages.stream_error(error),
        }
    }
}

impl<S, O, P> StreamObserver for SessionObserver<'_, S, O, P>
where
    S: FrameScheduler,
    O: Overlay,
    P: Presenter,
{
    fn on_frame(&mut self, frame: FrameRecord) {
        match self.ctx.kind {
            SessionKind::Camera => self.camera_frame(frame),
            SessionKind::Video | SessionKind::Remote => self.video_frame(frame),
        }
    }

    fn on_done(&mut self) {
        let frames = self.ctx.frames_received;
        match self.ctx.kind {
            SessionKind::Camera => {
                self.presenter.set_live(false);
                self.presenter
                    .set_status(&self.messages.camera_finished(frames), false);
                self.ctx.liveness.revoke();
            }
            SessionKind::Video | SessionKind::Remote => {
                self.ctx.done = true;
                self.ctx.timeline.finalize();
                self.presenter
                    .set_status(&self.messages.video_done(frames), false);
                let span = self.ctx.timeline.span();
                match self.ctx.clock.as_deref_mut() {
                    Some(clock) => {
                        if let Some((_, last)) = span {
                            let was_ended = clock.is_ended();
                            clock.set_duration_hint(last);
                            if !was_ended && clock.is_ended() {
                                // Playback outran the analysis; replay from the start.
                                clock.seek(0.0);
                            }
                        }
                        self.synchronizer
                            .sync_now(&*clock, &self.ctx.timeline, &mut *self.overlay);
                        self.synchronizer.start(&mut *self.scheduler);
                    }
                    None => self.overlay.clear(),
                }
            }
        }
    }

    fn on_error(&mut self, error: &StreamError) {
        let text = self.error_text(error);
        self.presenter.show_error(&text);
        match self.ctx.kind {
            SessionKind::Camera => {
                self.presenter.set_live(false);
                self.presenter
                    .set_status(self.messages.camera_failed(), false);
                self.ctx.liveness.revoke();
            }
            SessionKind::Video | SessionKind::Remote => {
                self.presenter
                    .set_status(self.messages.video_failed(), false);
            }
        }
        self.synchronizer.stop(&mut *self.scheduler);
        self.overlay.clear();
    }
}
