//! Wire records exchanged with the detection backend.
//!
//! Field names follow the backend JSON: a detection is
//! `{"class": "fire", "confidence": 0.91, "bbox": [x1, y1, x2, y2]}` and a
//! streamed frame is `{"t": 1.24, "detections": [...]}`, optionally with an
//! inline base64 JPEG under `frame` when it comes from a live camera.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width clamped to one pixel so degenerate boxes stay visible.
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(1.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(1.0)
    }

    fn validate(&self) -> Result<()> {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(anyhow!("bbox has non-finite coordinates"));
        }
        if self.x2 < self.x1 || self.y2 < self.y1 {
            return Err(anyhow!(
                "bbox is inverted ({}, {}, {}, {})",
                self.x1,
                self.y1,
                self.x2,
                self.y2
            ));
        }
        Ok(())
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(raw: [f32; 4]) -> Self {
        Self::new(raw[0], raw[1], raw[2], raw[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

/// One classified box within a frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class: class.into(),
            confidence,
            bbox,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.class.trim().is_empty() {
            return Err(anyhow!("detection class is empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence {} outside [0, 1] for class '{}'",
                self.confidence,
                self.class
            ));
        }
        self.bbox.validate()
    }

    /// Overlay label, e.g. `fire 87%`.
    pub fn label(&self) -> String {
        format!("{} {:.0}%", self.class, self.confidence * 100.0)
    }

    /// Display color used by overlay renderers.
    pub fn color(&self) -> &'static str {
        color_for_class(&self.class)
    }
}

pub fn color_for_class(class: &str) -> &'static str {
    match class {
        "fire" => "#fb7185",
        "smoke" => "#94a3b8",
        _ => "#34d399",
    }
}

/// One analyzed video frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    #[serde(rename = "t")]
    pub timestamp: f64,
    pub detections: Vec<Detection>,
    /// Inline base64 JPEG, only sent by live camera streams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl FrameRecord {
    pub fn new(timestamp: f64, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            detections,
            frame: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.timestamp.is_finite() {
            return Err(anyhow!("frame timestamp is not finite"));
        }
        for detection in &self.detections {
            detection.validate()?;
        }
        Ok(())
    }
}

/// Response body of the single-image endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct PredictionResponse {
    #[serde(default)]
    pub detections: Vec<Detection>,
}
