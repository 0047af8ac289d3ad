//! Image preprocessing for the text detector and OCR models
//!
//! Handles color conversion, frame downscaling, normalization and tensor
//! conversion for PaddleOCR models.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4};

use crate::capture::frame::Frame;
use crate::config::{DetectionSettings, RecognitionSettings};

/// Detection model normalization, indexed by tensor channel.
///
/// PaddleOCR models are trained on BGR input and apply these per channel
/// in that order.
const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The recognition model expects pixel / 127.5 - 1.0, mapping [0, 255] -> [-1, 1]
const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Detection input sides must be multiples of this
const DET_SIZE_MULTIPLE: u32 = 32;

/// Convert a BGR frame into an RGB image
pub fn bgr_to_rgb(frame: &Frame) -> Result<RgbImage> {
    let mut data = frame.data().to_vec();
    for pixel in data.chunks_exact_mut(3) {
        pixel.swap(0, 2); // Swap B and R
    }

    RgbImage::from_raw(frame.width(), frame.height(), data)
        .context("Failed to create image from BGR frame data")
}

/// Uniform scale that fits (width, height) inside the cap.
///
/// Returns 1.0 when the frame already fits; frames are never upscaled.
pub fn downscale_ratio(width: u32, height: u32, max_width: u32, max_height: u32) -> f64 {
    if width > max_width || height > max_height {
        let height_ratio = max_height as f64 / height as f64;
        let width_ratio = max_width as f64 / width as f64;
        height_ratio.min(width_ratio)
    } else {
        1.0
    }
}

/// Resize both sides by `ratio`, rounding to the nearest pixel
pub fn resize_by_ratio(image: &RgbImage, ratio: f64) -> RgbImage {
    if ratio == 1.0 {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);

    imageops::resize(image, new_width, new_height, FilterType::Triangle)
}

/// Convert an RGB image to an HWC f32 array in 0-1 with channels in BGR order
pub fn to_bgr_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[2 - c] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    Array3::from_shape_fn((h, w, 3), |(y, x, c)| (image[[y, x, c]] - mean[c]) / std[c])
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Resize for the detection model: longest side at most `limit_side_len`,
/// both sides rounded to a multiple of 32.
///
/// Returns (resized_image, scale_x, scale_y) where scale maps original
/// coordinates to resized ones.
pub fn resize_for_detection(image: &RgbImage, limit_side_len: u32) -> (RgbImage, f32, f32) {
    let (width, height) = image.dimensions();
    let longest = width.max(height);

    let scale = if longest > limit_side_len {
        limit_side_len as f32 / longest as f32
    } else {
        1.0
    };

    let round_to_multiple = |side: u32| -> u32 {
        let scaled = side as f32 * scale / DET_SIZE_MULTIPLE as f32;
        (scaled.round() as u32).max(1) * DET_SIZE_MULTIPLE
    };
    let new_width = round_to_multiple(width);
    let new_height = round_to_multiple(height);

    let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);
    let scale_x = new_width as f32 / width as f32;
    let scale_y = new_height as f32 / height as f32;

    (resized, scale_x, scale_y)
}

/// Resize for the recognition model (fixed height, variable width)
pub fn resize_for_recognition(image: &RgbImage, target_height: u32, max_width: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let aspect = width as f32 / height.max(1) as f32;
    let new_width = ((target_height as f32 * aspect).ceil() as u32).clamp(1, max_width.max(1));

    imageops::resize(image, new_width, target_height, FilterType::Triangle)
}

/// Crop an axis-aligned region, clamped to the image bounds
pub fn crop_region(image: &RgbImage, x1: f32, y1: f32, x2: f32, y2: f32) -> Option<RgbImage> {
    let (img_w, img_h) = image.dimensions();

    let left = (x1.floor().max(0.0) as u32).min(img_w);
    let top = (y1.floor().max(0.0) as u32).min(img_h);
    let right = (x2.ceil().max(0.0) as u32).min(img_w);
    let bottom = (y2.ceil().max(0.0) as u32).min(img_h);

    if right <= left || bottom <= top {
        return None;
    }

    Some(imageops::crop_imm(image, left, top, right - left, bottom - top).to_image())
}

/// Full preprocessing pipeline for detection.
///
/// Returns the NCHW tensor and the (scale_x, scale_y) applied.
pub fn preprocess_for_detection(
    image: &RgbImage,
    settings: &DetectionSettings,
) -> (Array4<f32>, f32, f32) {
    let (resized, scale_x, scale_y) = resize_for_detection(image, settings.limit_side_len);
    let normalized = normalize(&to_bgr_f32(&resized), &DET_MEAN, &DET_STD);
    (hwc_to_nchw(&normalized), scale_x, scale_y)
}

/// Full preprocessing pipeline for recognition
pub fn preprocess_for_recognition(crop: &RgbImage, settings: &RecognitionSettings) -> Array4<f32> {
    let resized = resize_for_recognition(crop, settings.target_height, settings.max_width);
    let normalized = normalize(&to_bgr_f32(&resized), &REC_MEAN, &REC_STD);
    hwc_to_nchw(&normalized)
}
