use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::ingest::CameraRequest;
use crate::present::Locale;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_REFRESH_HZ: u32 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CAMERA_DEVICE_INDEX: u32 = 0;
const DEFAULT_CAMERA_MAX_FPS: f32 = 10.0;
const MAX_CAMERA_FPS: f32 = 30.0;
const MAX_REFRESH_HZ: u32 = 240;

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    api_url: Option<String>,
    locale: Option<Locale>,
    refresh_hz: Option<u32>,
    connect_timeout_secs: Option<u64>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device_index: Option<u32>,
    max_fps: Option<f32>,
    include_frame: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub api_url: String,
    pub locale: Locale,
    pub refresh_hz: u32,
    pub connect_timeout: Duration,
    pub camera: CameraSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub device_index: u32,
    pub max_fps: f32,
    pub include_frame: bool,
}

impl CameraSettings {
    pub fn request(&self) -> CameraRequest {
        CameraRequest {
            device_index: self.device_index,
            max_fps: self.max_fps,
            include_frame: self.include_frame,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self::from_file(OverlayConfigFile::default())
    }
}

impl OverlayConfig {
    /// Defaults, then the file named by `OVERLAY_CONFIG`, then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Self {
        let camera = CameraSettings {
            device_index: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device_index)
                .unwrap_or(DEFAULT_CAMERA_DEVICE_INDEX),
            max_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.max_fps)
                .unwrap_or(DEFAULT_CAMERA_MAX_FPS),
            include_frame: file
                .camera
                .as_ref()
                .and_then(|camera| camera.include_frame)
                .unwrap_or(true),
        };
        Self {
            api_url: file
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            locale: file.locale.unwrap_or_default(),
            refresh_hz: file.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            connect_timeout: Duration::from_secs(
                file.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            camera,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("OVERLAY_API_URL") {
            if !url.trim().is_empty() {
                self.api_url = url.trim().to_string();
            }
        }
        if let Ok(locale) = std::env::var("OVERLAY_LOCALE") {
            if !locale.trim().is_empty() {
                self.locale = locale.parse()?;
            }
        }
        if let Ok(hz) = std::env::var("OVERLAY_REFRESH_HZ") {
            self.refresh_hz = hz
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_REFRESH_HZ must be an integer"))?;
        }
        if let Ok(index) = std::env::var("OVERLAY_CAMERA_DEVICE_INDEX") {
            self.camera.device_index = index
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_CAMERA_DEVICE_INDEX must be a non-negative integer"))?;
        }
        if let Ok(fps) = std::env::var("OVERLAY_CAMERA_MAX_FPS") {
            self.camera.max_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_CAMERA_MAX_FPS must be a number"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_url)
            .map_err(|e| anyhow!("invalid api_url '{}': {}", self.api_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "api_url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if !(self.camera.max_fps > 0.0 && self.camera.max_fps <= MAX_CAMERA_FPS) {
            return Err(anyhow!(
                "camera max_fps must be in (0, {}], got {}",
                MAX_CAMERA_FPS,
                self.camera.max_fps
            ));
        }
        if self.refresh_hz == 0 || self.refresh_hz > MAX_REFRESH_HZ {
            return Err(anyhow!(
                "refresh_hz must be between 1 and {}, got {}",
                MAX_REFRESH_HZ,
                self.refresh_hz
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
