//! overlay_view - terminal front end for the detection backend
//!
//! Analyzes a local image or video, a remote video URL, or the live camera,
//! and prints the detection overlay as it follows playback.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use detection_overlay::config::OverlayConfig;
use detection_overlay::ui::{TerminalOverlay, TerminalPresenter, UiMode};
use detection_overlay::{
    CameraRequest, Controller, HttpTransport, IntervalScheduler, JpegDecoder, Locale, MediaClock,
    Messages, PlaybackClock, SessionState, Upload,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Overlay backend detections on images, videos and the live camera"
)]
struct Args {
    /// Backend base URL. Overrides OVERLAY_API_URL and the config file.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Message language (es or en). Overrides OVERLAY_LOCALE.
    #[arg(long, global = true)]
    locale: Option<Locale>,

    /// Output mode: auto, plain or pretty.
    #[arg(long, global = true, env = "OVERLAY_UI", default_value = "auto")]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a local image or video file.
    File {
        path: PathBuf,

        /// Playback rate for the simulated video clock.
        #[arg(long, default_value_t = 1.0)]
        rate: f64,
    },
    /// Analyze a remote (YouTube) video by URL.
    Url {
        url: String,

        #[arg(long, default_value_t = 1.0)]
        rate: f64,
    },
    /// Stream detections from the backend's camera.
    Camera {
        /// Camera device index. Defaults to OVERLAY_CAMERA_DEVICE_INDEX or 0.
        #[arg(long)]
        device: Option<u32>,

        /// Frame rate cap, at most 30.
        #[arg(long)]
        max_fps: Option<f32>,

        /// Ask the backend not to send the camera image with each frame.
        #[arg(long)]
        no_frames: bool,

        /// Stop the camera after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = OverlayConfig::load()?;
    if let Some(url) = &args.api_url {
        config.api_url = url.trim().to_string();
    }
    if let Some(locale) = args.locale {
        config.locale = locale;
    }
    config.validate()?;

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let presenter =
        TerminalPresenter::new(UiMode::from_flag(Some(&args.ui)), is_tty, !stdout_is_tty);

    let transport = Arc::new(HttpTransport::new(&config.api_url, config.connect_timeout)?);
    let messages = Messages::new(config.locale);
    let mut controller = Controller::new(
        transport,
        IntervalScheduler::new(config.refresh_hz),
        TerminalOverlay::new(),
        presenter,
        Arc::new(JpegDecoder),
        messages,
    )?;
    log::info!(
        "overlay_view using backend {} (locale={}, refresh={}Hz)",
        config.api_url,
        config.locale,
        config.refresh_hz
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    match args.command {
        Command::File { path, rate } => {
            let upload = Upload::from_path(&path)?;
            controller.handle_upload(upload, || playing_clock(rate))?;
        }
        Command::Url { url, rate } => {
            if controller.start_remote(&url, Some(playing_clock(rate)))?.is_none() {
                return Err(anyhow!("no URL given"));
            }
        }
        Command::Camera {
            device,
            max_fps,
            no_frames,
            duration,
        } => {
            let mut request: CameraRequest = config.camera.request();
            if let Some(device) = device {
                request.device_index = device;
            }
            if let Some(max_fps) = max_fps {
                request.max_fps = max_fps;
            }
            if no_frames {
                request.include_frame = false;
            }
            let stop_after = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
            controller.toggle_camera(request.clone());
            run(&mut controller, &interrupted, stop_after)?;
            if controller.is_camera_active() {
                // Second toggle stops the camera.
                controller.toggle_camera(request);
            }
            return finish(&controller);
        }
    }

    run(&mut controller, &interrupted, None)?;
    finish(&controller)
}

fn playing_clock(rate: f64) -> Box<dyn PlaybackClock> {
    let mut clock = MediaClock::new(rate);
    clock.play();
    Box::new(clock)
}

fn run(
    controller: &mut Controller<IntervalScheduler, TerminalOverlay, TerminalPresenter>,
    interrupted: &AtomicBool,
    stop_after: Option<Instant>,
) -> Result<()> {
    while !controller.is_finished() {
        if interrupted.load(Ordering::SeqCst) {
            log::info!("interrupted, stopping session");
            if !controller.is_camera_active() {
                controller.stop();
            }
            return Ok(());
        }
        if stop_after.map_or(false, |deadline| Instant::now() >= deadline) {
            log::info!("camera duration reached");
            return Ok(());
        }
        controller.run_once(POLL_INTERVAL);
    }
    Ok(())
}

fn finish(
    controller: &Controller<IntervalScheduler, TerminalOverlay, TerminalPresenter>,
) -> Result<()> {
    log::info!(
        "{} frames received, {} overlay redraws",
        controller.frames_received(),
        controller.overlay().redraws()
    );
    match controller.session_state() {
        SessionState::Failed => Err(anyhow!("stream failed")),
        _ => Ok(()),
    }
}
