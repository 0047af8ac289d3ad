//! Vision/OCR Layer
//!
//! Runs text detection on individual frames and reports every recognized
//! text region as a [`SingleObject`] in the frame's own coordinates.

pub mod models;
pub mod objects;
pub mod ocr;
pub mod postprocess;
pub mod preprocess;

use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, info};

use crate::capture::frame::FrameFetcher;
use crate::config::AppConfig;

pub use models::ModelManager;
pub use objects::{BoundingBox, ObjectClass, SingleObject};
pub use ocr::{Detection, OcrEngine, OcrLanguage, PaddleOcrEngine};

/// Frames larger than these are downscaled before OCR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCap {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for SizeCap {
    fn default() -> Self {
        Self {
            max_width: 640,
            max_height: 480,
        }
    }
}

/// Per-frame text detector.
///
/// Owns one OCR engine for its whole lifetime; each `predict` call is
/// independent of every other.
pub struct TextDetector {
    engine: Box<dyn OcrEngine>,
    cap: SizeCap,
}

impl TextDetector {
    /// Initialize the OCR engine described by `config`.
    ///
    /// Downloads missing models; any failure here is fatal for the caller.
    pub fn setup(config: &AppConfig) -> Result<Self> {
        let language = OcrLanguage::from_codes(&config.vision.languages)
            .context("Invalid OCR language configuration")?;

        let manager = ModelManager::for_settings(&config.vision)?;

        let engine = PaddleOcrEngine::new(
            &manager,
            language,
            &config.vision,
            config.detection.clone(),
            config.recognition.clone(),
        )
        .context("Failed to initialize OCR engine")?;

        let cap = SizeCap {
            max_width: config.vision.max_width,
            max_height: config.vision.max_height,
        };
        Ok(Self::with_engine(engine, cap))
    }

    /// Wrap an already constructed engine
    pub fn with_engine(engine: impl OcrEngine + 'static, cap: SizeCap) -> Self {
        info!(
            "Text detector using {} engine, frames capped at {}x{}",
            engine.name(),
            cap.max_width,
            cap.max_height
        );
        Self {
            engine: Box::new(engine),
            cap,
        }
    }

    /// Detect text in the current frame of `frame`.
    ///
    /// Returns one object per engine detection, boxes in original frame
    /// coordinates. Engine errors are returned unchanged.
    pub fn predict(&self, frame: &impl FrameFetcher) -> Result<Vec<SingleObject>> {
        let start = Instant::now();
        let frame_number = frame.get_current_frame_number();
        let pixels = frame.get_frame();

        let (width, height) = pixels.dimensions();

        let rgb = preprocess::bgr_to_rgb(pixels)?;
        let ratio =
            preprocess::downscale_ratio(width, height, self.cap.max_width, self.cap.max_height);
        let image = preprocess::resize_by_ratio(&rgb, ratio);

        debug!(
            "Predicting text on frame #{} with shape {}x{}x3",
            frame_number,
            image.height(),
            image.width()
        );
        let detections = self.engine.read_text(&image)?;

        let objects: Vec<SingleObject> = detections
            .iter()
            .map(|detection| {
                let bounding_box = BoundingBox::from_quad(&detection.quad).unscale(ratio);
                SingleObject::text(frame_number, bounding_box, &detection.text)
            })
            .collect();

        debug!(
            "Frame #{}: {} text regions in {:?}",
            frame_number,
            objects.len(),
            start.elapsed()
        );
        Ok(objects)
    }
}
