//! OCR (Optical Character Recognition) module
//!
//! Defines the engine seam used by the text detector and the PaddleOCR
//! implementation running on ONNX Runtime.

use anyhow::{Context, Result};
use image::RgbImage;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use super::models::{ModelManager, ModelType, OnnxSession};
use super::postprocess::{boxes_from_probability_map, ctc_greedy_decode, parse_charset, TextBox};
use super::preprocess::{crop_region, preprocess_for_detection, preprocess_for_recognition};
use crate::config::{DetectionSettings, RecognitionSettings, VisionSettings};

/// Single OCR detection as reported by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Corners ordered top-left, top-right, bottom-right, bottom-left
    pub quad: [(f32, f32); 4],
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Common interface for OCR engines
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Detect and recognize all text in an RGB image.
    ///
    /// Engines whose models expect another channel order convert internally.
    fn read_text(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LanguageError {
    #[error("unsupported OCR language '{0}'")]
    Unsupported(String),
    #[error("no OCR language configured")]
    Empty,
    #[error("one recognition model per engine, got languages {0:?}")]
    Multiple(Vec<String>),
}

/// Languages with a recognition model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrLanguage {
    English,
}

impl OcrLanguage {
    /// Short language code
    pub fn code(&self) -> &'static str {
        match self {
            OcrLanguage::English => "en",
        }
    }

    /// Directory name of the recognition model in the model repository
    pub fn model_family(&self) -> &'static str {
        match self {
            OcrLanguage::English => "english",
        }
    }

    /// Resolve configured language codes to the single recognition language
    pub fn from_codes(codes: &[String]) -> Result<Self, LanguageError> {
        let mut selected: Option<OcrLanguage> = None;
        for code in codes {
            let language: OcrLanguage = code.parse()?;
            match selected {
                Some(existing) if existing != language => {
                    return Err(LanguageError::Multiple(codes.to_vec()));
                }
                _ => selected = Some(language),
            }
        }
        selected.ok_or(LanguageError::Empty)
    }
}

impl FromStr for OcrLanguage {
    type Err = LanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "eng" | "english" => Ok(OcrLanguage::English),
            _ => Err(LanguageError::Unsupported(s.to_string())),
        }
    }
}

impl fmt::Display for OcrLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct PaddleOcrEngine {
    detector: OnnxSession,
    recognizer: OnnxSession,
    charset: Vec<String>,
    detection: DetectionSettings,
    recognition: RecognitionSettings,
}

impl PaddleOcrEngine {
    /// Load (downloading if needed) the models for `language`
    pub fn new(
        manager: &ModelManager,
        language: OcrLanguage,
        vision: &VisionSettings,
        detection: DetectionSettings,
        recognition: RecognitionSettings,
    ) -> Result<Self> {
        info!("Initializing PaddleOCR engine for language '{}'", language);

        let det_path = manager.ensure_model(ModelType::Detection)?;
        let rec_path = manager.ensure_model(ModelType::Recognition(language))?;
        let dict_path = manager.ensure_model(ModelType::Dictionary(language))?;

        let dictionary = std::fs::read_to_string(&dict_path)
            .with_context(|| format!("Failed to read dictionary {:?}", dict_path))?;
        let charset = parse_charset(&dictionary);
        debug!("Loaded {} recognition symbols", charset.len());

        let detector = OnnxSession::new(&det_path, vision.use_gpu)?;
        let recognizer = OnnxSession::new(&rec_path, vision.use_gpu)?;

        info!("PaddleOCR initialized successfully");
        Ok(Self {
            detector,
            recognizer,
            charset,
            detection,
            recognition,
        })
    }

    /// Locate text regions, returned in image coordinates
    fn detect(&self, image: &RgbImage) -> Result<Vec<TextBox>> {
        let (tensor, scale_x, scale_y) = preprocess_for_detection(image, &self.detection);
        let (shape, data) = self.detector.run(tensor)?;

        let &[.., height, width] = shape.as_slice() else {
            anyhow::bail!("Unexpected detection output shape {:?}", shape);
        };

        let boxes = boxes_from_probability_map(&data, width, height, &self.detection)
            .into_iter()
            .map(|b| b.unscale(scale_x, scale_y))
            .collect();
        Ok(boxes)
    }

    /// Recognize the text in a single cropped region
    fn recognize(&self, crop: &RgbImage) -> Result<(String, f32)> {
        let tensor = preprocess_for_recognition(crop, &self.recognition);
        let (shape, data) = self.recognizer.run(tensor)?;

        let &[.., steps, classes] = shape.as_slice() else {
            anyhow::bail!("Unexpected recognition output shape {:?}", shape);
        };
        if classes == 0 {
            anyhow::bail!("Recognition output has no classes: {:?}", shape);
        }

        Ok(ctc_greedy_decode(&data, steps, classes, &self.charset))
    }
}

impl OcrEngine for PaddleOcrEngine {
    fn name(&self) -> &'static str {
        "paddle_ocr"
    }

    fn read_text(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let boxes = self.detect(image)?;
        debug!("{} candidate text regions", boxes.len());

        recognize_regions(image, boxes, |crop| self.recognize(crop))
    }
}

/// Crop each box out of `image` and recognize it.
///
/// Boxes that crop to nothing and regions whose text is blank are skipped;
/// recognition errors abort the whole image.
fn recognize_regions<F>(
    image: &RgbImage,
    boxes: Vec<TextBox>,
    mut recognize: F,
) -> Result<Vec<Detection>>
where
    F: FnMut(&RgbImage) -> Result<(String, f32)>,
{
    let mut detections = Vec::with_capacity(boxes.len());
    for text_box in boxes {
        let Some(crop) = crop_region(image, text_box.x1, text_box.y1, text_box.x2, text_box.y2)
        else {
            debug!("Skipping empty region {:?}", text_box);
            continue;
        };

        let (text, confidence) = recognize(&crop)?;
        if text.trim().is_empty() {
            debug!("Dropping region with no text (box score {:.2})", text_box.score);
            continue;
        }

        detections.push(Detection {
            quad: text_box.quad(),
            text,
            confidence,
        });
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!("en".parse::<OcrLanguage>(), Ok(OcrLanguage::English));
        assert_eq!(" English ".parse::<OcrLanguage>(), Ok(OcrLanguage::English));
        assert_eq!(
            "xx".parse::<OcrLanguage>(),
            Err(LanguageError::Unsupported("xx".to_string()))
        );
    }

    #[test]
    fn test_language_from_codes() {
        let codes = vec!["en".to_string(), "english".to_string()];
        assert_eq!(OcrLanguage::from_codes(&codes), Ok(OcrLanguage::English));
        assert_eq!(OcrLanguage::from_codes(&[]), Err(LanguageError::Empty));

        let bad = vec!["en".to_string(), "klingon".to_string()];
        assert_eq!(
            OcrLanguage::from_codes(&bad),
            Err(LanguageError::Unsupported("klingon".to_string()))
        );
    }

    #[test]
    fn test_language_codes_must_agree() {
        let codes = vec!["EN".to_string(), "eng".to_string()];
        assert_eq!(OcrLanguage::from_codes(&codes), Ok(OcrLanguage::English));
    }

    #[test]
    fn test_language_display() {
        assert_eq!(OcrLanguage::English.to_string(), "en");
        assert_eq!(OcrLanguage::English.model_family(), "english");
    }

    fn text_box(x1: f32, y1: f32, x2: f32, y2: f32) -> TextBox {
        TextBox {
            x1,
            y1,
            x2,
            y2,
            score: 0.9,
        }
    }

    #[test]
    fn test_regions_are_cropped_and_recognized() {
        let image = RgbImage::new(100, 40);
        let boxes = vec![text_box(0.0, 0.0, 30.0, 20.0), text_box(40.0, 10.0, 90.0, 30.0)];

        let mut crop_sizes = Vec::new();
        let detections = recognize_regions(&image, boxes, |crop| {
            crop_sizes.push(crop.dimensions());
            Ok((format!("word{}", crop_sizes.len()), 0.8))
        })
        .unwrap();

        assert_eq!(crop_sizes, vec![(30, 20), (50, 20)]);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].text, "word1");
        assert_eq!(
            detections[1].quad,
            [(40.0, 10.0), (90.0, 10.0), (90.0, 30.0), (40.0, 30.0)]
        );
        assert_eq!(detections[1].confidence, 0.8);
    }

    #[test]
    fn test_blank_text_is_dropped() {
        let image = RgbImage::new(50, 50);
        let boxes = vec![
            text_box(0.0, 0.0, 10.0, 10.0),
            text_box(10.0, 10.0, 20.0, 20.0),
            text_box(20.0, 20.0, 30.0, 30.0),
        ];
        let mut texts = vec!["", "   ", "ok"].into_iter();

        let detections =
            recognize_regions(&image, boxes, |_| Ok((texts.next().unwrap().to_string(), 0.5)))
                .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].text, "ok");
    }

    #[test]
    fn test_degenerate_boxes_are_skipped() {
        let image = RgbImage::new(50, 50);
        let boxes = vec![
            text_box(10.0, 10.0, 10.0, 30.0),
            text_box(60.0, 60.0, 80.0, 80.0),
            text_box(5.0, 5.0, 15.0, 15.0),
        ];

        let mut calls = 0;
        let detections = recognize_regions(&image, boxes, |_| {
            calls += 1;
            Ok(("text".to_string(), 1.0))
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn test_recognition_error_propagates() {
        let image = RgbImage::new(20, 20);
        let boxes = vec![text_box(0.0, 0.0, 10.0, 10.0)];

        let result = recognize_regions(&image, boxes, |_| anyhow::bail!("model failed"));

        assert!(result.unwrap_err().to_string().contains("model failed"));
    }
}
