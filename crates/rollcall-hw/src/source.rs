//! Frame sources: anything the kiosk can pull frames from.

use crate::camera::CameraError;
use crate::frame::Frame;
use image::RgbImage;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Frames returned by one capture call.
#[derive(Debug, Default)]
pub struct CaptureBatch {
    pub frames: Vec<Frame>,
    /// Frames discarded as too dark.
    pub dark_skipped: usize,
}

/// A source of RGB frames.
pub trait FrameSource: Send {
    /// Capture up to `count` usable frames.
    fn capture(&mut self, count: usize) -> Result<CaptureBatch, CameraError>;

    /// Human-readable description for logs and status output.
    fn describe(&self) -> String;
}

/// Serves still photos round-robin, one per requested frame.
///
/// Lets a kiosk run from photos taken elsewhere (or from fixtures).
pub struct StillImageSource {
    label: String,
    images: Vec<RgbImage>,
    next: usize,
    sequence: u32,
}

impl StillImageSource {
    /// Load one image file, or every image in a directory (sorted by name).
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        let files = if path.is_dir() {
            image_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let images = files
            .iter()
            .map(|f| {
                image::open(f)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| CameraError::Image(format!("{}: {e}", f.display())))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if images.is_empty() {
            return Err(CameraError::Image(format!("no images found in {}", path.display())));
        }

        tracing::info!(path = %path.display(), count = images.len(), "loaded still images");
        Ok(Self::from_images(path.display().to_string(), images))
    }

    pub fn from_images(label: impl Into<String>, images: Vec<RgbImage>) -> Self {
        Self {
            label: label.into(),
            images,
            next: 0,
            sequence: 0,
        }
    }
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>, CameraError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CameraError::Image(format!("{}: {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

impl FrameSource for StillImageSource {
    fn capture(&mut self, count: usize) -> Result<CaptureBatch, CameraError> {
        let mut batch = CaptureBatch::default();
        if self.images.is_empty() {
            return Ok(batch);
        }
        for _ in 0..count {
            let image = self.images[self.next].clone();
            self.next = (self.next + 1) % self.images.len();
            self.sequence = self.sequence.wrapping_add(1);

            let frame = Frame::new(image, self.sequence);
            if frame.is_dark {
                batch.dark_skipped += 1;
            } else {
                batch.frames.push(frame);
            }
        }
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("still images {} ({} loaded)", self.label, self.images.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_still_source_round_robin() {
        let images = vec![
            RgbImage::from_pixel(2, 2, Rgb([100, 0, 0])),
            RgbImage::from_pixel(2, 2, Rgb([0, 200, 0])),
        ];
        let mut source = StillImageSource::from_images("fixtures", images);

        let batch = source.capture(3).unwrap();
        let reds: Vec<u8> = batch.frames.iter().map(|f| f.image.get_pixel(0, 0)[0]).collect();
        assert_eq!(reds, vec![100, 0, 100]);
        assert_eq!(batch.frames[2].sequence, 3);
    }

    #[test]
    fn test_still_source_skips_dark() {
        let images = vec![RgbImage::new(2, 2), RgbImage::from_pixel(2, 2, Rgb([90, 90, 90]))];
        let mut source = StillImageSource::from_images("fixtures", images);
        let batch = source.capture(2).unwrap();
        assert_eq!(batch.frames.len(), 1);
        assert_eq!(batch.dark_skipped, 1);
    }

    #[test]
    fn test_still_source_missing_path() {
        let err = StillImageSource::open(Path::new("/nonexistent/photo.jpg"));
        assert!(matches!(err, Err(CameraError::Image(_))));
    }

    #[test]
    fn test_still_source_empty_list() {
        let mut source = StillImageSource::from_images("none", vec![]);
        assert!(source.capture(2).unwrap().frames.is_empty());
    }
}
