//! Frame data structures handed to the text detector

use image::RgbImage;
use thiserror::Error;

/// Channels per pixel in a BGR frame
pub const BGR_CHANNELS: usize = 3;

/// Errors raised when a pixel buffer does not describe a valid frame
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} BGR")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A 3-channel frame with pixels stored in BGR order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap a raw BGR buffer, validating its length against the dimensions
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }

        let expected = width as usize * height as usize * BGR_CHANNELS;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Build a BGR frame from a decoded RGB image
    pub fn from_rgb_image(image: &RgbImage) -> Result<Self, FrameError> {
        let (width, height) = image.dimensions();
        let mut data = image.as_raw().clone();
        for pixel in data.chunks_exact_mut(BGR_CHANNELS) {
            pixel.swap(0, 2);
        }
        Self::from_bgr(data, width, height)
    }

    /// Raw BGR pixel data, row-major without padding
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Access to the current frame of a video being analyzed
pub trait FrameFetcher {
    /// Pixel data of the current frame
    fn get_frame(&self) -> &Frame;

    /// Sequence index of the current frame
    fn get_current_frame_number(&self) -> u64;
}

/// A frame paired with its position in the sequence
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Pixel data
    pub frame: Frame,
    /// Index of this frame within its sequence
    pub frame_number: u64,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(frame: Frame, frame_number: u64) -> Self {
        Self {
            frame,
            frame_number,
        }
    }
}

impl FrameFetcher for CapturedFrame {
    fn get_frame(&self) -> &Frame {
        &self.frame
    }

    fn get_current_frame_number(&self) -> u64 {
        self.frame_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bgr_accepts_exact_buffer() {
        let frame = Frame::from_bgr(vec![0; 4 * 2 * 3], 4, 2).unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.data().len(), 24);
    }

    #[test]
    fn test_from_bgr_rejects_short_buffer() {
        let err = Frame::from_bgr(vec![0; 10], 4, 2).unwrap_err();
        assert_eq!(
            err,
            FrameError::BufferSize {
                width: 4,
                height: 2,
                expected: 24,
                actual: 10,
            }
        );
    }

    #[test]
    fn test_from_bgr_rejects_zero_area() {
        let err = Frame::from_bgr(Vec::new(), 0, 5).unwrap_err();
        assert_eq!(err, FrameError::Empty { width: 0, height: 5 });
    }

    #[test]
    fn test_from_rgb_image_swaps_channels() {
        let image = RgbImage::from_raw(2, 1, vec![255, 10, 0, 1, 2, 3]).unwrap();
        let frame = Frame::from_rgb_image(&image).unwrap();
        assert_eq!(frame.data(), &[0, 10, 255, 3, 2, 1]);
    }

    #[test]
    fn test_captured_frame_fetcher() {
        let frame = Frame::from_bgr(vec![7; 3], 1, 1).unwrap();
        let captured = CapturedFrame::new(frame.clone(), 42);
        assert_eq!(captured.get_current_frame_number(), 42);
        assert_eq!(captured.get_frame(), &frame);
    }
}
