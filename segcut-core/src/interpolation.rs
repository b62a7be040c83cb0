//! AI frame interpolation for slow-motion segments.
//!
//! Each [`InterpolationBackend`] has its own strategy object. Failures
//! never propagate: the engine cleans up and reports `false`, and the
//! caller renders the segment with the CPU `minterpolate` filter instead.

use anyhow::{Context, Result};
use image::{RgbImage, imageops};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::InterpolationBackend;
use crate::capabilities::GpuCapabilities;
use crate::error::ExportError;
use crate::ffmpeg_wrapper::{frame_file_name, list_frames, run_monitored};
use crate::progress::{ProgressPhase, ProgressUpdate, SharedProgress};

/// Model inputs are padded so both sides are a multiple of this.
pub const MODEL_ALIGNMENT: u32 = 32;

/// rife-ncnn-vulkan prints one `... done` line per written frame.
static DONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdone\b").expect("valid interpolator progress regex"));

/// A frame interpolation network running on the primary GPU.
pub trait InterpolationModel: Send + Sync {
    /// Synthesize the frame at `timestep` (0.0 = `first`, 1.0 = `second`).
    ///
    /// Inputs are already padded to [`MODEL_ALIGNMENT`].
    fn infer(&self, first: &RgbImage, second: &RgbImage, timestep: f32) -> Result<RgbImage>;

    /// Synchronize the device and drop cached allocations.
    fn release(&self) {}
}

/// Builds the model on first use.
pub type ModelLoader = Arc<dyn Fn() -> Result<Box<dyn InterpolationModel>> + Send + Sync>;

/// Strategy for one interpolation backend.
pub trait FrameInterpolator: Send + Sync {
    fn backend(&self) -> InterpolationBackend;

    fn interpolate(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        multiplier: u32,
        progress: &SharedProgress,
    ) -> Result<()>;

    fn release(&self) {}
}

/// Pad `frame` with black to the next multiple of `alignment` on each side.
pub fn pad_to_multiple(frame: &RgbImage, alignment: u32) -> RgbImage {
    let (w, h) = frame.dimensions();
    let pw = w.div_ceil(alignment) * alignment;
    let ph = h.div_ceil(alignment) * alignment;
    if (pw, ph) == (w, h) {
        return frame.clone();
    }
    let mut padded = RgbImage::new(pw, ph);
    imageops::replace(&mut padded, frame, 0, 0);
    padded
}

pub fn crop_to(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    imageops::crop_imm(frame, 0, 0, width, height).to_image()
}

fn save_frame(dir: &Path, index: u64, frame: &RgbImage) -> Result<()> {
    save_frame_to(&dir.join(frame_file_name(index as usize)), frame)
}

pub(crate) fn save_frame_to(path: &Path, frame: &RgbImage) -> Result<()> {
    frame
        .save(path)
        .with_context(|| format!("Failed to write frame {:?}", path))
}

pub(crate) fn load_frame(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("Failed to read frame {:?}", path))?
        .to_rgb8())
}

/// In-process model on the CUDA device
pub struct PrimaryGpuInterpolator {
    loader: Option<ModelLoader>,
    model: OnceCell<Box<dyn InterpolationModel>>,
}

impl PrimaryGpuInterpolator {
    pub fn new(loader: Option<ModelLoader>) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
        }
    }

    fn model(&self) -> Result<&dyn InterpolationModel> {
        let model = self.model.get_or_try_init(|| {
            let loader = self
                .loader
                .as_ref()
                .ok_or_else(|| ExportError::BackendUnavailable("no interpolation model registered".into()))?;
            log::info!("Loading primary GPU interpolation model");
            loader()
        })?;
        Ok(model.as_ref())
    }
}

impl FrameInterpolator for PrimaryGpuInterpolator {
    fn backend(&self) -> InterpolationBackend {
        InterpolationBackend::PrimaryGpu
    }

    fn interpolate(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        multiplier: u32,
        progress: &SharedProgress,
    ) -> Result<()> {
        let frames = list_frames(input_dir)?;
        let Some((first, rest)) = frames.split_first() else {
            anyhow::bail!("No frames in {:?}", input_dir);
        };
        let model = self.model()?;
        std::fs::create_dir_all(output_dir)?;

        let total = (rest.len() as u64) * multiplier as u64 + 1;
        let mut written: u64 = 0;

        let mut prev = load_frame(first)?;
        for next_path in rest {
            let next = load_frame(next_path)?;
            let (w, h) = prev.dimensions();
            if next.dimensions() != (w, h) {
                anyhow::bail!("Frame size changed at {:?}", next_path);
            }

            written += 1;
            save_frame(output_dir, written, &prev)?;
            let padded_prev = pad_to_multiple(&prev, MODEL_ALIGNMENT);
            let padded_next = pad_to_multiple(&next, MODEL_ALIGNMENT);
            for step in 1..multiplier {
                let timestep = step as f32 / multiplier as f32;
                let mid = model.infer(&padded_prev, &padded_next, timestep)?;
                written += 1;
                save_frame(output_dir, written, &crop_to(&mid, w, h))?;
            }

            progress.report(ProgressUpdate::new(
                written,
                total,
                format!("Interpolating frames ({}x)", multiplier),
                ProgressPhase::Interpolating,
            ));
            prev = next;
        }
        save_frame(output_dir, written + 1, &prev)?;

        Ok(())
    }

    fn release(&self) {
        if let Some(model) = self.model.get() {
            model.release();
        }
    }
}

/// rife-ncnn-vulkan on any Vulkan device
pub struct SecondaryGpuInterpolator {
    binary: PathBuf,
}

impl SecondaryGpuInterpolator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl FrameInterpolator for SecondaryGpuInterpolator {
    fn backend(&self) -> InterpolationBackend {
        InterpolationBackend::SecondaryGpu
    }

    fn interpolate(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        multiplier: u32,
        progress: &SharedProgress,
    ) -> Result<()> {
        let input_frames = list_frames(input_dir)?.len() as u64;
        if input_frames == 0 {
            anyhow::bail!("No frames in {:?}", input_dir);
        }
        std::fs::create_dir_all(output_dir)?;
        let total = input_frames.saturating_sub(1) * multiplier as u64 + 1;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-i")
            .arg(input_dir)
            .arg("-o")
            .arg(output_dir)
            .arg("-n")
            .arg((multiplier - 1).to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        log::info!("Executing interpolator: {:?}", cmd);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", self.binary))?;

        let progress = progress.clone();
        let done = Arc::new(AtomicU64::new(0));
        let counter = done.clone();
        let output = run_monitored(child, move |line| {
            if DONE_REGEX.is_match(line) {
                let current = counter.fetch_add(1, Ordering::Relaxed) + 1;
                progress.report(ProgressUpdate::new(
                    current.min(total),
                    total,
                    "Interpolating frames (Vulkan)",
                    ProgressPhase::Interpolating,
                ));
            }
        })?;

        if !output.success() {
            log::error!("Interpolator failed with output:\n{}", output.diagnostics);
            anyhow::bail!(
                "Interpolator failed with exit code: {:?}",
                output.status.code()
            );
        }

        let written = renumber_frames(output_dir)?;
        if written == 0 {
            anyhow::bail!("Interpolator produced no frames in {:?}", output_dir);
        }
        log::debug!(
            "Interpolator wrote {} frames ({} progress lines)",
            written,
            done.load(Ordering::Relaxed)
        );
        Ok(())
    }
}

/// Rename every PNG in `dir` to the sequential `frame_%06d.png` scheme.
fn renumber_frames(dir: &Path) -> Result<usize> {
    let mut pngs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    pngs.sort();
    for (i, path) in pngs.iter().enumerate() {
        let target = dir.join(frame_file_name(i + 1));
        if *path != target {
            std::fs::rename(path, &target)?;
        }
    }
    Ok(pngs.len())
}

/// Signals the caller to use `minterpolate`
#[derive(Debug, Default)]
pub struct CpuFallbackInterpolator;

impl FrameInterpolator for CpuFallbackInterpolator {
    fn backend(&self) -> InterpolationBackend {
        InterpolationBackend::CpuFallback
    }

    fn interpolate(&self, _: &Path, _: &Path, _: u32, _: &SharedProgress) -> Result<()> {
        Err(ExportError::BackendUnavailable(
            "CPU interpolation runs inside the filter graph".into(),
        )
        .into())
    }
}

pub struct FrameInterpolationEngine {
    primary: PrimaryGpuInterpolator,
    secondary: Option<SecondaryGpuInterpolator>,
    fallback: CpuFallbackInterpolator,
}

impl FrameInterpolationEngine {
    pub fn new(caps: &GpuCapabilities, loader: Option<ModelLoader>) -> Self {
        Self {
            primary: PrimaryGpuInterpolator::new(loader),
            secondary: caps
                .secondary_binary
                .as_ref()
                .map(SecondaryGpuInterpolator::new),
            fallback: CpuFallbackInterpolator,
        }
    }

    /// An engine that can only fall back to the CPU
    pub fn cpu_only() -> Self {
        Self {
            primary: PrimaryGpuInterpolator::new(None),
            secondary: None,
            fallback: CpuFallbackInterpolator,
        }
    }

    pub fn strategy(&self, backend: InterpolationBackend) -> &dyn FrameInterpolator {
        match backend {
            InterpolationBackend::PrimaryGpu => &self.primary,
            InterpolationBackend::SecondaryGpu => match self.secondary {
                Some(ref secondary) => secondary,
                None => &self.fallback,
            },
            InterpolationBackend::CpuFallback => &self.fallback,
        }
    }

    /// Synthesize `multiplier - 1` frames between each input pair into `output_dir`.
    ///
    /// Returns `false` when nothing usable was written; the caller then uses
    /// the CPU filter. A partially written `output_dir` is removed.
    pub fn interpolate(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        multiplier: u32,
        backend: InterpolationBackend,
        progress: &SharedProgress,
    ) -> bool {
        if multiplier < 2 {
            log::debug!("Multiplier {} needs no synthesized frames", multiplier);
            return false;
        }

        let strategy = self.strategy(backend);
        match strategy.interpolate(input_dir, output_dir, multiplier, progress) {
            Ok(()) => {
                log::info!(
                    "Interpolated {:?} at {}x with {}",
                    input_dir,
                    multiplier,
                    strategy.backend()
                );
                true
            }
            Err(e) => {
                if strategy.backend().is_fallback() {
                    log::debug!("{:#}", e);
                } else {
                    log::warn!(
                        "{} interpolation failed, falling back to CPU: {:#}",
                        strategy.backend(),
                        e
                    );
                }
                if output_dir.exists()
                    && let Err(cleanup) = std::fs::remove_dir_all(output_dir)
                {
                    log::warn!("Failed to remove {:?}: {}", output_dir, cleanup);
                }
                false
            }
        }
    }

    /// Free model memory between clips
    pub fn release(&self) {
        self.primary.release();
        self.secondary.iter().for_each(|s| s.release());
        self.fallback.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::null_progress;
    use image::Rgb;
    use std::sync::atomic::AtomicUsize;

    /// Blends the two inputs, recording the padded sizes it was given.
    struct BlendModel {
        calls: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl InterpolationModel for BlendModel {
        fn infer(&self, first: &RgbImage, second: &RgbImage, timestep: f32) -> Result<RgbImage> {
            assert_eq!(first.width() % MODEL_ALIGNMENT, 0);
            assert_eq!(first.height() % MODEL_ALIGNMENT, 0);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = first.clone();
            for (o, s) in out.pixels_mut().zip(second.pixels()) {
                for c in 0..3 {
                    let a = o[c] as f32;
                    let b = s[c] as f32;
                    o[c] = (a + (b - a) * timestep).round() as u8;
                }
            }
            Ok(out)
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn write_solid_frames(dir: &Path, values: &[u8]) {
        std::fs::create_dir_all(dir).unwrap();
        for (i, v) in values.iter().enumerate() {
            RgbImage::from_pixel(50, 30, Rgb([*v, *v, *v]))
                .save(dir.join(frame_file_name(i + 1)))
                .unwrap();
        }
    }

    fn blend_loader(calls: Arc<AtomicUsize>, releases: Arc<AtomicUsize>) -> ModelLoader {
        Arc::new(move || {
            Ok(Box::new(BlendModel {
                calls: calls.clone(),
                releases: releases.clone(),
            }) as Box<dyn InterpolationModel>)
        })
    }

    #[test]
    fn test_pad_and_crop() {
        let frame = RgbImage::from_pixel(50, 30, Rgb([200, 10, 10]));
        let padded = pad_to_multiple(&frame, 32);
        assert_eq!(padded.dimensions(), (64, 32));
        assert_eq!(padded.get_pixel(49, 29), &Rgb([200, 10, 10]));
        assert_eq!(padded.get_pixel(63, 31), &Rgb([0, 0, 0]));
        assert_eq!(crop_to(&padded, 50, 30), frame);

        let aligned = RgbImage::new(64, 64);
        assert_eq!(pad_to_multiple(&aligned, 32).dimensions(), (64, 64));
    }

    #[test]
    fn test_primary_doubles_frames() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_solid_frames(&input, &[0, 100, 200]);

        let calls = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let caps = GpuCapabilities::none();
        let engine =
            FrameInterpolationEngine::new(&caps, Some(blend_loader(calls.clone(), releases.clone())));

        let ok = engine.interpolate(
            &input,
            &output,
            2,
            InterpolationBackend::PrimaryGpu,
            &null_progress(),
        );
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let frames = list_frames(&output).unwrap();
        assert_eq!(frames.len(), 5);
        let values: Vec<u8> = frames
            .iter()
            .map(|p| image::open(p).unwrap().to_rgb8().get_pixel(10, 10)[0])
            .collect();
        assert_eq!(values, vec![0, 50, 100, 150, 200]);
        let first = image::open(&frames[1]).unwrap();
        assert_eq!((first.width(), first.height()), (50, 30));

        engine.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_primary_quadruples_with_even_timesteps() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_solid_frames(&input, &[0, 200]);

        let engine = FrameInterpolationEngine::new(
            &GpuCapabilities::none(),
            Some(blend_loader(Arc::default(), Arc::default())),
        );
        assert!(engine.interpolate(
            &input,
            &output,
            4,
            InterpolationBackend::PrimaryGpu,
            &null_progress()
        ));
        let values: Vec<u8> = list_frames(&output)
            .unwrap()
            .iter()
            .map(|p| image::open(p).unwrap().to_rgb8().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(values, vec![0, 50, 100, 150, 200]);
    }

    #[test]
    fn test_missing_model_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_solid_frames(&input, &[0, 100]);
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("partial.png"), b"junk").unwrap();

        let engine = FrameInterpolationEngine::new(&GpuCapabilities::none(), None);
        let ok = engine.interpolate(
            &input,
            &output,
            2,
            InterpolationBackend::PrimaryGpu,
            &null_progress(),
        );
        assert!(!ok);
        assert!(!output.exists());
    }

    #[test]
    fn test_multiplier_below_two_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let engine = FrameInterpolationEngine::cpu_only();
        assert!(!engine.interpolate(
            dir.path(),
            &output,
            1,
            InterpolationBackend::PrimaryGpu,
            &null_progress()
        ));
        assert!(!output.exists());
    }

    #[test]
    fn test_cpu_fallback_signals_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FrameInterpolationEngine::cpu_only();
        assert_eq!(
            engine.strategy(InterpolationBackend::SecondaryGpu).backend(),
            InterpolationBackend::CpuFallback
        );
        assert!(!engine.interpolate(
            dir.path(),
            &dir.path().join("out"),
            2,
            InterpolationBackend::CpuFallback,
            &null_progress()
        ));
    }

    #[test]
    fn test_secondary_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_solid_frames(&input, &[0, 100]);

        let caps = GpuCapabilities {
            secondary_binary: Some(dir.path().join("no-such-interpolator")),
            ..GpuCapabilities::default()
        };
        let engine = FrameInterpolationEngine::new(&caps, None);
        assert!(!engine.interpolate(
            &input,
            &output,
            2,
            InterpolationBackend::SecondaryGpu,
            &null_progress()
        ));
        assert!(!output.exists());
    }

    #[test]
    fn test_renumber_frames() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["00000002.png", "00000001.png", "00000003.png"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        assert_eq!(renumber_frames(dir.path()).unwrap(), 3);
        let content = std::fs::read_to_string(dir.path().join(frame_file_name(1))).unwrap();
        assert_eq!(content, "00000001.png");
    }
}
