use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::model::Detection;
use crate::present::Presenter;
use crate::sync::Overlay;
use crate::webcam::DecodedFrame;

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }

    fn use_pretty(self, is_tty: bool, disable_pretty: bool) -> bool {
        is_tty
            && match self {
                UiMode::Pretty => true,
                UiMode::Auto => !disable_pretty,
                UiMode::Plain => false,
            }
    }
}

/// Status line and results panel on stderr. While a status is "loading" and
/// the terminal supports it, the status is shown as a spinner.
pub struct TerminalPresenter {
    pretty: bool,
    spinner: Option<ProgressBar>,
    last_status: String,
    live: bool,
}

impl TerminalPresenter {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            pretty: mode.use_pretty(is_tty, disable_pretty),
            spinner: None,
            last_status: String::new(),
            live: false,
        }
    }

    fn println(&self, line: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(line),
            None => eprintln!("{}", line),
        }
    }

    fn spinner(&mut self) -> &ProgressBar {
        self.spinner.get_or_insert_with(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner
        })
    }

    fn status_line(&self, text: &str) -> String {
        if self.live {
            format!("● {}", text)
        } else {
            text.to_string()
        }
    }
}

impl Presenter for TerminalPresenter {
    fn set_status(&mut self, text: &str, loading: bool) {
        let line = self.status_line(text);
        if self.pretty && loading {
            self.spinner().set_message(line);
        } else {
            if let Some(spinner) = self.spinner.take() {
                spinner.finish_and_clear();
            }
            if line != self.last_status {
                eprintln!("==> {}", line);
            }
        }
        self.last_status = self.status_line(text);
    }

    fn show_detections(&mut self, detections: &[Detection]) {
        for detection in detections {
            self.println(&format!(
                "  {:<10} {:>5.1}%",
                detection.class,
                detection.confidence * 100.0
            ));
        }
    }

    fn show_notice(&mut self, text: &str) {
        self.println(&format!("  {}", text));
    }

    fn show_error(&mut self, message: &str) {
        self.println(&format!("✘ {}", message));
    }

    fn clear_results(&mut self) {}

    fn set_live(&mut self, live: bool) {
        self.live = live;
    }
}

impl Drop for TerminalPresenter {
    fn drop(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

/// Prints the overlay contents to stdout whenever they change.
#[derive(Debug, Default)]
pub struct TerminalOverlay {
    shown: Vec<Detection>,
    frame_size: Option<(u32, u32)>,
    redraws: u64,
}

impl TerminalOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redraws(&self) -> u64 {
        self.redraws
    }
}

impl Overlay for TerminalOverlay {
    fn draw(&mut self, detections: &[Detection]) {
        if self.shown.as_slice() == detections {
            return;
        }
        self.shown = detections.to_vec();
        self.redraws += 1;
        if detections.is_empty() {
            println!("[overlay] cleared");
            return;
        }
        let boxes: Vec<String> = detections
            .iter()
            .map(|d| {
                format!(
                    "{} {} ({:.0},{:.0} {:.0}x{:.0})",
                    d.label(),
                    d.color(),
                    d.bbox.x1,
                    d.bbox.y1,
                    d.bbox.width(),
                    d.bbox.height()
                )
            })
            .collect();
        match self.frame_size {
            Some((w, h)) => println!("[overlay {}x{}] {}", w, h, boxes.join(" | ")),
            None => println!("[overlay] {}", boxes.join(" | ")),
        }
    }

    fn paint_frame(&mut self, frame: &DecodedFrame) {
        if self.frame_size != Some((frame.width, frame.height)) {
            log::info!("camera frame size {}x{}", frame.width, frame.height);
        }
        self.frame_size = Some((frame.width, frame.height));
    }
}
