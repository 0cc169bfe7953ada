//! HTTP plumbing towards the detection backend.
//!
//! `Transport` is the seam between session logic and the network: the
//! production implementation talks to the backend with `ureq`, tests swap in
//! scripted readers.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::model::{Detection, PredictionResponse};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "mpeg", "mpg"];
const MULTIPART_FIELD: &str = "file";

/// Failure of a backend request or stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The caller cancelled the session; never surfaced to the user.
    #[error("stream cancelled")]
    Cancelled,
    /// Non-2xx response, with the backend's `detail` when it sent one.
    #[error("backend returned status {status}")]
    Backend { status: u16, detail: Option<String> },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl StreamError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }

    /// Server-provided explanation, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            StreamError::Backend { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// A local file queued for upload.
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read upload {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("upload path {} has no file name", path.display()))?
            .to_string();
        let content_type = content_type_for(&file_name).to_string();
        Ok(Self::new(file_name, content_type, bytes))
    }

    pub fn is_video(&self) -> bool {
        self.content_type.starts_with("video/")
            || VIDEO_EXTENSIONS.contains(&extension(&self.file_name).as_str())
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

/// Content type the backend expects for a given file name.
pub fn content_type_for(file_name: &str) -> &'static str {
    match extension(file_name).as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mpeg" | "mpg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}

/// Live camera request parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraRequest {
    pub device_index: u32,
    pub max_fps: f32,
    pub include_frame: bool,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            device_index: 0,
            max_fps: 10.0,
            include_frame: true,
        }
    }
}

/// What a stream session analyzes.
#[derive(Clone, Debug)]
pub enum StreamSource {
    Video(Upload),
    Remote { url: String },
    Camera(CameraRequest),
}

impl StreamSource {
    /// Remote source from user input. Blank input is rejected; URLs the
    /// backend is unlikely to accept are only warned about.
    pub fn remote(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(anyhow!("remote url is empty"));
        }
        if !is_supported_remote_url(url) {
            log::warn!("'{}' does not look like a YouTube url; forwarding anyway", url);
        }
        Ok(StreamSource::Remote {
            url: url.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamSource::Video(_) => "video",
            StreamSource::Remote { .. } => "remote",
            StreamSource::Camera(_) => "camera",
        }
    }
}

pub fn is_supported_remote_url(url: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(https?://)?(www\.)?(youtube\.com/watch\?v=|youtu\.be/)[\w-]+").ok()
        })
        .as_ref()
        .map_or(true, |re| re.is_match(url))
}

/// Backend access used by sessions.
pub trait Transport: Send + Sync {
    /// Open a long-lived event stream for `source`.
    fn open_stream(&self, source: &StreamSource) -> Result<Box<dyn Read + Send>, StreamError>;

    /// One-shot single image analysis.
    fn predict_image(&self, upload: &Upload) -> Result<Vec<Detection>, StreamError>;
}

/// `ureq` backed transport.
pub struct HttpTransport {
    base: Url,
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(api_url: &str, connect_timeout: Duration) -> Result<Self> {
        let base = Url::parse(api_url).with_context(|| format!("parse api url {}", api_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported api scheme '{}'; expected http(s)",
                base.scheme()
            ));
        }
        // Only the connect phase is bounded; stream lifetime follows the backend.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .build();
        // Upload and camera streams answer as soon as the file is stored or
        // the camera is open. Their read timeout only wakes the reader so a
        // cancelled session drops its connection; remote downloads may hold
        // the response headers for minutes and use the plain agent.
        let stream_agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(connect_timeout)
            .build();
        Ok(Self {
            base,
            agent,
            stream_agent,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        endpoint(&self.base, path)
    }

    fn request(&self, source: &StreamSource) -> Result<ureq::Response, StreamError> {
        let result = match source {
            StreamSource::Video(upload) => {
                let url = self.url_for("predict/video")?;
                let (content_type, body) = multipart_body(MULTIPART_FIELD, upload);
                self.stream_agent
                    .post(url.as_str())
                    .set("Content-Type", &content_type)
                    .set("Accept", "text/event-stream")
                    .send_bytes(&body)
            }
            StreamSource::Remote { url: remote } => {
                let url = self.url_for("predict/youtube")?;
                let body = serde_json::to_vec(&serde_json::json!({ "url": remote }))
                    .map_err(|e| StreamError::Transport(format!("encode request: {}", e)))?;
                self.agent
                    .post(url.as_str())
                    .set("Content-Type", "application/json")
                    .set("Accept", "text/event-stream")
                    .send_bytes(&body)
            }
            StreamSource::Camera(camera) => {
                let url = self.url_for("predict/webcam")?;
                self.stream_agent
                    .get(url.as_str())
                    .query("device_index", &camera.device_index.to_string())
                    .query("max_fps", &camera.max_fps.to_string())
                    .query("include_frame", if camera.include_frame { "true" } else { "false" })
                    .set("Accept", "text/event-stream")
                    .call()
            }
        };
        result.map_err(map_ureq_error)
    }

    fn url_for(&self, path: &str) -> Result<Url, StreamError> {
        self.endpoint(path)
            .map_err(|e| StreamError::Transport(format!("{:#}", e)))
    }
}

impl Transport for HttpTransport {
    fn open_stream(&self, source: &StreamSource) -> Result<Box<dyn Read + Send>, StreamError> {
        let response = self.request(source)?;
        log::debug!(
            "{} stream opened ({} {})",
            source.kind(),
            response.status(),
            response.content_type()
        );
        Ok(response.into_reader())
    }

    fn predict_image(&self, upload: &Upload) -> Result<Vec<Detection>, StreamError> {
        let url = self.url_for("predict")?;
        let (content_type, body) = multipart_body(MULTIPART_FIELD, upload);
        let response = self
            .agent
            .post(url.as_str())
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(map_ureq_error)?;
        let text = response
            .into_string()
            .map_err(|e| StreamError::Transport(format!("read prediction: {}", e)))?;
        parse_prediction(&text)
    }
}

fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .with_context(|| format!("join endpoint {} onto {}", path, base))
}

fn map_ureq_error(err: ureq::Error) -> StreamError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            StreamError::Backend {
                status,
                detail: backend_detail(&body),
            }
        }
        ureq::Error::Transport(transport) => StreamError::Transport(transport.to_string()),
    }
}

/// Extract the `detail` string of an error body.
pub fn backend_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) if !detail.trim().is_empty() => Some(detail.clone()),
        _ => None,
    }
}

pub fn parse_prediction(body: &str) -> Result<Vec<Detection>, StreamError> {
    let response: PredictionResponse = serde_json::from_str(body)
        .map_err(|e| StreamError::Transport(format!("invalid prediction response: {}", e)))?;
    Ok(response
        .detections
        .into_iter()
        .filter(|detection| match detection.validate() {
            Ok(()) => true,
            Err(err) => {
                log::debug!("dropping invalid detection: {}", err);
                false
            }
        })
        .collect())
}

/// Encode a single-file `multipart/form-data` body.
/// Returns the content type (with boundary) and the body bytes.
pub fn multipart_body(field: &str, upload: &Upload) -> (String, Vec<u8>) {
    let boundary = format!("----detection-overlay-{:016x}", rand::random::<u64>());
    let mut body = Vec::with_capacity(upload.bytes.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field,
            upload.file_name.replace('"', "_")
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", upload.content_type).as_bytes());
    body.extend_from_slice(&upload.bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}
