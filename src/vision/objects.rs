//! Result objects emitted by the text detector

use serde::{Deserialize, Serialize};

/// Category label of a detected object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    /// A region of recognized text
    Text,
}

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from a quad ordered top-left, top-right, bottom-right, bottom-left.
    ///
    /// Uses the first point as (x1, y1) and the third as (x2, y2).
    pub fn from_quad(quad: &[(f32, f32); 4]) -> Self {
        let (x1, y1) = quad[0];
        let (x2, y2) = quad[2];
        Self::new(x1 as f64, y1 as f64, x2 as f64, y2 as f64)
    }

    /// Map a box measured on a resized image back to the source image
    pub fn unscale(self, ratio: f64) -> Self {
        Self::new(
            self.x1 / ratio,
            self.y1 / ratio,
            self.x2 / ratio,
            self.y2 / ratio,
        )
    }
}

/// A single detection tied to one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleObject {
    pub class: ObjectClass,
    pub frame_number: u64,
    pub bounding_box: BoundingBox,
    pub text: String,
}

impl SingleObject {
    /// Text object for `frame_number`; the text is stored lower-cased
    pub fn text(frame_number: u64, bounding_box: BoundingBox, text: &str) -> Self {
        Self {
            class: ObjectClass::Text,
            frame_number,
            bounding_box,
            text: text.to_lowercase(),
        }
    }
}
