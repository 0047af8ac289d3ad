//! Frame Source Layer
//!
//! Reads still images from disk and hands them out as numbered BGR frames,
//! standing in for a decoded video stream.

pub mod frame;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use self::frame::{CapturedFrame, Frame};

/// File extensions recognized as frame images
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];

/// Image sequence configuration
#[derive(Debug, Clone, Default)]
pub struct SequenceConfig {
    /// Frame number assigned to the first image
    pub start_frame: u64,
}

/// Ordered list of image files read one frame at a time
#[derive(Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    position: usize,
    config: SequenceConfig,
}

impl ImageSequence {
    /// Build a sequence from files and directories.
    ///
    /// Directories expand to their image files sorted by name; explicit files
    /// keep the order they were given in.
    pub fn from_inputs(inputs: &[PathBuf], config: SequenceConfig) -> Result<Self> {
        let mut paths = Vec::new();

        for input in inputs {
            if input.is_dir() {
                let mut entries = list_images(input)?;
                entries.sort();
                debug!("{} frame images found in {:?}", entries.len(), input);
                paths.extend(entries);
            } else if input.is_file() {
                paths.push(input.clone());
            } else {
                anyhow::bail!("Input does not exist: {:?}", input);
            }
        }

        info!(
            "Image sequence ready: {} frames starting at #{}",
            paths.len(),
            config.start_frame
        );

        Ok(Self {
            paths,
            position: 0,
            config,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn load(&self, path: &Path, frame_number: u64) -> Result<CapturedFrame> {
        let image = image::open(path)
            .with_context(|| format!("Failed to load frame image: {:?}", path))?
            .to_rgb8();
        let frame = Frame::from_rgb_image(&image)
            .with_context(|| format!("Invalid frame image: {:?}", path))?;
        Ok(CapturedFrame::new(frame, frame_number))
    }
}

impl Iterator for ImageSequence {
    type Item = Result<CapturedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.get(self.position)?.clone();
        let frame_number = self.config.start_frame + self.position as u64;
        self.position += 1;
        Some(self.load(&path, frame_number))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            images.push(path);
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameFetcher;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_image(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(4, 3, Rgb(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_directory_expands_sorted_images() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "b.png", [0, 0, 255]);
        write_image(dir.path(), "a.png", [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let sequence =
            ImageSequence::from_inputs(&[dir.path().to_path_buf()], SequenceConfig::default())
                .unwrap();
        assert_eq!(sequence.len(), 2);

        let frames: Vec<_> = sequence.map(|f| f.unwrap()).collect();
        assert_eq!(frames[0].get_current_frame_number(), 0);
        assert_eq!(frames[1].get_current_frame_number(), 1);
        // a.png is red, stored as BGR
        assert_eq!(&frames[0].get_frame().data()[..3], &[0, 0, 255]);
        assert_eq!(frames[0].get_frame().dimensions(), (4, 3));
    }

    #[test]
    fn test_start_frame_offsets_numbers() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "only.png", [1, 2, 3]);

        let mut sequence =
            ImageSequence::from_inputs(&[path], SequenceConfig { start_frame: 100 }).unwrap();
        let frame = sequence.next().unwrap().unwrap();
        assert_eq!(frame.get_current_frame_number(), 100);
        assert!(sequence.next().is_none());
    }

    #[test]
    fn test_missing_input_is_error() {
        let result = ImageSequence::from_inputs(
            &[PathBuf::from("/nonexistent/frames")],
            SequenceConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("frame.PNG")));
        assert!(is_image_file(Path::new("frame.jpeg")));
        assert!(!is_image_file(Path::new("frame.txt")));
        assert!(!is_image_file(Path::new("frame")));
    }
}
