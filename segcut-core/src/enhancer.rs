//! Frame enhancement hook (super-resolution and similar per-frame models).
//!
//! The model itself lives outside this crate; the pipeline only needs
//! something that turns one RGB frame into another.

use anyhow::Result;
use image::RgbImage;
use serde_json::Value;
use std::path::Path;

use crate::ffmpeg_wrapper::list_frames;
use crate::interpolation::{load_frame, save_frame_to};
use crate::progress::{ProgressPhase, ProgressUpdate, SharedProgress};

pub trait FrameEnhancer: Send + Sync {
    /// Enhance one frame. The metadata is opaque to the pipeline and only logged.
    fn enhance(&self, frame: &RgbImage) -> Result<(RgbImage, Value)>;

    /// Integer upscaling factor applied by `enhance`
    fn scale(&self) -> u32;
}

/// Enhance every `frame_*.png` in `dir` in place. Returns the number of frames processed.
pub fn enhance_frames(
    dir: &Path,
    enhancer: &dyn FrameEnhancer,
    progress: &SharedProgress,
) -> Result<usize> {
    let frames = list_frames(dir)?;
    let total = frames.len() as u64;
    log::info!("Enhancing {} frames (x{})", total, enhancer.scale());

    for (i, path) in frames.iter().enumerate() {
        let frame = load_frame(path)?;
        let (enhanced, metadata) = enhancer.enhance(&frame)?;
        if i == 0 {
            log::debug!(
                "Enhancer output {}x{} -> {}x{}: {}",
                frame.width(),
                frame.height(),
                enhanced.width(),
                enhanced.height(),
                metadata
            );
        }
        save_frame_to(path, &enhanced)?;
        progress.report(ProgressUpdate::new(
            i as u64 + 1,
            total,
            format!("Enhanced frame {}/{}", i + 1, total),
            ProgressPhase::Enhancing,
        ));
    }
    Ok(frames.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg_wrapper::frame_file_name;
    use crate::progress::null_progress;
    use image::Rgb;

    /// Nearest-neighbour doubling
    struct Doubler;

    impl FrameEnhancer for Doubler {
        fn enhance(&self, frame: &RgbImage) -> Result<(RgbImage, Value)> {
            let out = image::imageops::resize(
                frame,
                frame.width() * 2,
                frame.height() * 2,
                image::imageops::FilterType::Nearest,
            );
            Ok((out, serde_json::json!({"model": "nearest"})))
        }

        fn scale(&self) -> u32 {
            2
        }
    }

    #[test]
    fn test_enhance_in_place() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=3 {
            let frame = RgbImage::from_pixel(4, 3, Rgb([i as u8 * 10, 0, 0]));
            frame.save(dir.path().join(frame_file_name(i))).unwrap();
        }

        let count = enhance_frames(dir.path(), &Doubler, &null_progress()).unwrap();
        assert_eq!(count, 3);

        let second = image::open(dir.path().join(frame_file_name(2)))
            .unwrap()
            .to_rgb8();
        assert_eq!(second.dimensions(), (8, 6));
        assert_eq!(second.get_pixel(7, 5), &Rgb([20, 0, 0]));
    }
}
