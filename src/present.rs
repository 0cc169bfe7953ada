//! Presentation contract and user-facing messages.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::ingest::StreamError;
use crate::model::Detection;

/// Status line, results panel and live badge of the front end.
pub trait Presenter {
    fn set_status(&mut self, text: &str, loading: bool);

    fn show_detections(&mut self, detections: &[Detection]);

    /// Informational line in the results panel (e.g. "no detections").
    fn show_notice(&mut self, text: &str);

    fn show_error(&mut self, message: &str);

    fn clear_results(&mut self);

    fn set_live(&mut self, _live: bool) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Es,
    En,
}

impl FromStr for Locale {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "es" => Ok(Locale::Es),
            "en" => Ok(Locale::En),
            other => Err(anyhow!("unsupported locale '{}'; expected es or en", other)),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::Es => write!(f, "es"),
            Locale::En => write!(f, "en"),
        }
    }
}

/// Message catalog for one locale.
#[derive(Clone, Copy, Debug, Default)]
pub struct Messages {
    locale: Locale,
}

impl Messages {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    fn pick(&self, es: &'static str, en: &'static str) -> &'static str {
        match self.locale {
            Locale::Es => es,
            Locale::En => en,
        }
    }

    pub fn waiting(&self) -> &'static str {
        self.pick("Esperando archivo...", "Waiting for a file...")
    }

    pub fn unsupported_format(&self) -> &'static str {
        self.pick("Formato no soportado", "Unsupported format")
    }

    pub fn analyzing_image(&self) -> &'static str {
        self.pick("Analizando imagen...", "Analyzing image...")
    }

    pub fn image_done(&self) -> &'static str {
        self.pick("Análisis completado", "Analysis complete")
    }

    pub fn image_failed(&self) -> &'static str {
        self.pick("Fallo al analizar", "Analysis failed")
    }

    pub fn image_error(&self) -> &'static str {
        self.pick(
            "No se pudo procesar la imagen.",
            "The image could not be processed.",
        )
    }

    pub fn uploading_video(&self) -> &'static str {
        self.pick(
            "Subiendo video y analizando...",
            "Uploading video and analyzing...",
        )
    }

    pub fn downloading_remote(&self) -> &'static str {
        self.pick(
            "Descargando y analizando video de YouTube...",
            "Downloading and analyzing YouTube video...",
        )
    }

    pub fn frames_progress(&self, frames: u64) -> String {
        match self.locale {
            Locale::Es => format!("Analizando... {} fotogramas procesados", frames),
            Locale::En => format!("Analyzing... {} frames processed", frames),
        }
    }

    pub fn video_done(&self, frames: u64) -> String {
        match self.locale {
            Locale::Es => format!("Video analizado — {} fotogramas", frames),
            Locale::En => format!("Video analyzed — {} frames", frames),
        }
    }

    pub fn video_failed(&self) -> &'static str {
        self.pick("Fallo al analizar video", "Video analysis failed")
    }

    pub fn video_error(&self) -> &'static str {
        self.pick(
            "No se pudo procesar el video.",
            "The video could not be processed.",
        )
    }

    pub fn camera_connecting(&self) -> &'static str {
        self.pick("Conectando camara...", "Connecting camera...")
    }

    pub fn camera_active(&self, frames: u64) -> String {
        match self.locale {
            Locale::Es => format!("Camara activa · {} frames", frames),
            Locale::En => format!("Camera live · {} frames", frames),
        }
    }

    pub fn camera_stopped(&self) -> &'static str {
        self.pick("Camara detenida.", "Camera stopped.")
    }

    pub fn camera_finished(&self, frames: u64) -> String {
        match self.locale {
            Locale::Es => format!("Camara finalizada · {} frames", frames),
            Locale::En => format!("Camera finished · {} frames", frames),
        }
    }

    pub fn camera_failed(&self) -> &'static str {
        self.pick("Fallo al conectar camara", "Camera connection failed")
    }

    pub fn no_detections(&self) -> &'static str {
        self.pick("Sin detecciones.", "No detections.")
    }

    pub fn server_error(&self, status: u16) -> String {
        match self.locale {
            Locale::Es => format!("Error del servidor ({})", status),
            Locale::En => format!("Server error ({})", status),
        }
    }

    pub fn connection_error(&self) -> &'static str {
        self.pick(
            "No se pudo conectar con el servidor.",
            "Could not reach the server.",
        )
    }

    /// Error text for a failed stream: the backend detail when present,
    /// otherwise a generic message for the failure class.
    pub fn stream_error(&self, error: &StreamError) -> String {
        match error {
            StreamError::Backend {
                detail: Some(detail),
                ..
            } => detail.clone(),
            StreamError::Backend { status, .. } => self.server_error(*status),
            StreamError::Transport(_) | StreamError::Cancelled => {
                self.connection_error().to_string()
            }
        }
    }
}
