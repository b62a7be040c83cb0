//! Staged export of one clip.
//!
//! ```text
//! Init --save--> Saved --configure--> Configured --check_cache--> CacheChecked
//!      --process--> Processed --store--> Cached
//! ```
//!
//! Every stage checks that the pipeline is exactly where it must be and
//! fails with [`ExportError::PipelineOrderingViolation`] otherwise. The
//! only re-entrant stages are `process` and `store`, which return the
//! existing result once the clip has been rendered.

use once_cell::sync::OnceCell;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{BackendInfo, BackendSelector, InterpolationBackend};
use crate::cache::{ContentAddressedCache, content_identity};
use crate::capabilities::{CapabilityContext, CapabilityDetector, GpuCapabilities};
use crate::config::ExportConfig;
use crate::descriptor::{ClipEditDescriptor, NormalizedEdit};
use crate::encoder::{EncodeInput, EncodeJob, Encoder, EncodingOrchestrator};
use crate::enhancer::{FrameEnhancer, enhance_frames};
use crate::error::{ExportError, PipelineStage, Result};
use crate::ffmpeg_wrapper::{self, VideoInfo, frame_file_name, list_frames};
use crate::filter_graph::{CompileRequest, SynthesizedSegment, crop_filter};
use crate::interpolation::{FrameInterpolationEngine, ModelLoader};
use crate::presets::CodecParams;
use crate::progress::{ProgressPhase, ProgressUpdate, SharedProgress, null_progress};

/// Cache namespace for rendered exports
pub const EXPORT_CACHE_TYPE: &str = "export";

/// Media inspection and decoding used by the pipeline
pub trait MediaTools: Send + Sync {
    fn probe(&self, path: &Path) -> anyhow::Result<VideoInfo>;

    /// Decode `duration` seconds from `start` into `frame_%06d.png` files in
    /// `dir`, through `video_filter` if given. Returns the frame count.
    fn extract_frames(
        &self,
        input: &Path,
        dir: &Path,
        start: f64,
        duration: Option<f64>,
        video_filter: Option<&str>,
    ) -> anyhow::Result<usize>;
}

/// [`MediaTools`] backed by the `ffprobe` and `ffmpeg` binaries
#[derive(Debug, Clone, Copy, Default)]
pub struct FFmpegTools;

impl MediaTools for FFmpegTools {
    fn probe(&self, path: &Path) -> anyhow::Result<VideoInfo> {
        ffmpeg_wrapper::get_video_info(path)
    }

    fn extract_frames(
        &self,
        input: &Path,
        dir: &Path,
        start: f64,
        duration: Option<f64>,
        video_filter: Option<&str>,
    ) -> anyhow::Result<usize> {
        ffmpeg_wrapper::extract_frames(input, dir, start, duration, video_filter)
    }
}

/// Collaborators shared by every pipeline of a process. Cloning is cheap.
#[derive(Clone)]
pub struct PipelineEnv {
    pub config: ExportConfig,
    pub cache: ContentAddressedCache,
    pub capabilities: CapabilityContext,
    pub encoder: Arc<dyn Encoder>,
    pub media: Arc<dyn MediaTools>,
    pub enhancer: Option<Arc<dyn FrameEnhancer>>,
    model_loader: Option<ModelLoader>,
    engine: Arc<OnceCell<FrameInterpolationEngine>>,
}

impl PipelineEnv {
    /// Environment backed by FFmpeg and host capability detection
    pub fn new(config: ExportConfig) -> Result<Self> {
        let cache = ContentAddressedCache::new(&config.cache_dir)?;
        let capabilities = CapabilityContext::new(CapabilityDetector::new(config.detector.clone()));
        let encoder = Arc::new(EncodingOrchestrator::new(&config));
        Ok(Self {
            config,
            cache,
            capabilities,
            encoder,
            media: Arc::new(FFmpegTools),
            enhancer: None,
            model_loader: None,
            engine: Arc::new(OnceCell::new()),
        })
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityContext) -> Self {
        self.capabilities = capabilities;
        self.engine = Arc::new(OnceCell::new());
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_media_tools(mut self, media: Arc<dyn MediaTools>) -> Self {
        self.media = media;
        self
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn FrameEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Register the model used by the primary GPU interpolator
    pub fn with_model_loader(mut self, loader: ModelLoader) -> Self {
        self.model_loader = Some(loader);
        self.engine = Arc::new(OnceCell::new());
        self
    }

    /// Host capabilities narrowed to what this environment can drive.
    ///
    /// Installed model weights only make the primary tier usable once a
    /// model loader is registered.
    pub fn usable_capabilities(&self) -> GpuCapabilities {
        let mut caps = self.capabilities.capabilities().clone();
        if caps.ai_primary_available && self.model_loader.is_none() {
            log::debug!("Primary interpolation model found but no loader is registered");
            caps.ai_primary_available = false;
        }
        caps
    }

    /// Interpolation backend used for slow-motion segments
    pub fn backend(&self) -> InterpolationBackend {
        BackendSelector::select(&self.usable_capabilities())
    }

    pub fn backend_info(&self) -> BackendInfo {
        BackendInfo::from_capabilities(&self.usable_capabilities())
    }

    /// The interpolation engine, built on first use from the capability snapshot
    pub fn engine(&self) -> &FrameInterpolationEngine {
        self.engine.get_or_init(|| {
            FrameInterpolationEngine::new(&self.usable_capabilities(), self.model_loader.clone())
        })
    }

    fn release_engine(&self) {
        if let Some(engine) = self.engine.get() {
            engine.release();
        }
    }
}

impl std::fmt::Debug for PipelineEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEnv")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("capabilities", &self.capabilities)
            .field("enhancer", &self.enhancer.as_ref().map(|e| e.scale()))
            .finish_non_exhaustive()
    }
}

/// Data accumulated by the stages of one pipeline
#[derive(Debug, Default)]
pub struct ProcessingContext {
    pub input_path: Option<PathBuf>,
    pub content_identity: Option<String>,
    pub edit: Option<NormalizedEdit>,
    pub cache_key: Option<String>,
    pub cache_hit: bool,
    /// Encoder output in the scratch directory, stored into the cache on success
    pub rendered_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
}

pub struct ProcessingPipeline {
    env: PipelineEnv,
    output: PathBuf,
    progress: SharedProgress,
    stage: PipelineStage,
    context: ProcessingContext,
    scratch: Option<tempfile::TempDir>,
}

impl ProcessingPipeline {
    /// A pipeline that leaves its result at `output`
    pub fn new(env: PipelineEnv, output: impl Into<PathBuf>) -> Self {
        Self {
            env,
            output: output.into(),
            progress: null_progress(),
            stage: PipelineStage::Init,
            context: ProcessingContext::default(),
            scratch: None,
        }
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn context(&self) -> &ProcessingContext {
        &self.context
    }

    fn require(&self, required: PipelineStage) -> Result<()> {
        if self.stage != required {
            return Err(ExportError::PipelineOrderingViolation {
                required,
                actual: self.stage,
            });
        }
        Ok(())
    }

    fn advance(&mut self, next: PipelineStage) {
        log::debug!("Pipeline {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn scratch_dir(&self) -> Result<&Path> {
        self.scratch
            .as_ref()
            .map(|dir| dir.path())
            .ok_or(ExportError::PipelineOrderingViolation {
                required: PipelineStage::Saved,
                actual: self.stage,
            })
    }

    /// Write the raw input into a fresh scratch directory
    pub fn save(&mut self, bytes: &[u8]) -> Result<PathBuf> {
        self.require(PipelineStage::Init)?;

        std::fs::create_dir_all(&self.env.config.work_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix("segcut-")
            .tempdir_in(&self.env.config.work_dir)?;
        let input = scratch.path().join("source");
        std::fs::write(&input, bytes)?;

        let identity = content_identity(bytes);
        log::info!("Saved {} input bytes (identity {})", bytes.len(), identity);

        self.scratch = Some(scratch);
        self.context.input_path = Some(input.clone());
        self.context.content_identity = Some(identity);
        self.advance(PipelineStage::Saved);
        Ok(input)
    }

    /// Validate and normalize the edit
    pub fn configure(&mut self, descriptor: &ClipEditDescriptor) -> Result<&NormalizedEdit> {
        self.require(PipelineStage::Saved)?;
        let edit = descriptor.normalize()?;
        log::info!(
            "Configured {} segment(s), {} crop keyframe(s), {} fps, {:?} mode",
            edit.segments.len(),
            edit.keyframes.len(),
            edit.target_fps,
            edit.export_mode
        );
        self.advance(PipelineStage::Configured);
        Ok(self.context.edit.insert(edit))
    }

    /// Digest over everything that influences the rendered bytes
    pub fn cache_key(&self) -> Result<String> {
        let (Some(identity), Some(edit)) = (&self.context.content_identity, &self.context.edit)
        else {
            return Err(ExportError::PipelineOrderingViolation {
                required: PipelineStage::Configured,
                actual: self.stage,
            });
        };
        let params = json!({
            "content_identity": identity,
            "keyframes": edit.keyframes,
            "segments": edit.segments,
            "trim": edit.trim,
            "target_fps": edit.target_fps,
            "export_mode": edit.export_mode,
            "include_audio": edit.include_audio,
            "codec": self.env.config.codec,
            "enhancer_scale": self.env.enhancer.as_ref().map(|e| e.scale()),
        });
        Ok(ContentAddressedCache::key(EXPORT_CACHE_TYPE, &params))
    }

    /// Look the edit up in the cache; a hit is copied to the output path
    pub fn check_cache(&mut self) -> Result<bool> {
        self.require(PipelineStage::Configured)?;
        let key = self.cache_key()?;

        if let Some(cached) = self.env.cache.get(&key) {
            log::info!("Cache hit for {} ({:?})", key, cached);
            copy_to(&cached, &self.output)?;
            self.context.cache_hit = true;
            self.context.output_path = Some(self.output.clone());
        } else {
            log::info!("Cache miss for {}", key);
        }

        self.context.cache_key = Some(key);
        self.advance(PipelineStage::CacheChecked);
        Ok(self.context.cache_hit)
    }

    /// Render the clip on a cache miss. Returns the output path.
    ///
    /// Calling this again after it succeeded returns the same path without re-encoding.
    pub fn process(&mut self) -> Result<PathBuf> {
        if self.stage >= PipelineStage::Processed
            && let Some(ref output) = self.context.output_path
        {
            return Ok(output.clone());
        }
        self.require(PipelineStage::CacheChecked)?;

        if !self.context.cache_hit {
            let result = self.render();
            self.env.release_engine();
            let rendered = result?;
            copy_to(&rendered, &self.output)?;
            self.context.rendered_path = Some(rendered);
            self.context.output_path = Some(self.output.clone());
        }

        self.advance(PipelineStage::Processed);
        Ok(self.output.clone())
    }

    /// Put a freshly rendered result into the cache. Failures are logged, not returned.
    pub fn store(&mut self) -> Result<()> {
        if self.stage == PipelineStage::Cached {
            return Ok(());
        }
        self.require(PipelineStage::Processed)?;

        if !self.context.cache_hit
            && let (Some(rendered), Some(key)) =
                (&self.context.rendered_path, &self.context.cache_key)
            && let Err(e) = self.env.cache.put(rendered, key)
        {
            let error = ExportError::CacheWriteFailure {
                digest: key.clone(),
                reason: e.to_string(),
            };
            log::warn!("{}", error);
        }

        self.advance(PipelineStage::Cached);
        Ok(())
    }

    /// Run every stage for `descriptor` over `bytes`
    pub fn run(&mut self, descriptor: &ClipEditDescriptor, bytes: &[u8]) -> Result<PathBuf> {
        self.save(bytes)?;
        self.configure(descriptor)?;
        self.check_cache()?;
        let output = self.process()?;
        self.store()?;
        self.progress.report(ProgressUpdate::new(
            1,
            1,
            format!("Exported {}", output.display()),
            ProgressPhase::Finished,
        ));
        Ok(output)
    }

    fn render(&self) -> Result<PathBuf> {
        let scratch = self.scratch_dir()?;
        let (Some(input), Some(edit), Some(key)) = (
            &self.context.input_path,
            &self.context.edit,
            &self.context.cache_key,
        ) else {
            return Err(ExportError::PipelineOrderingViolation {
                required: PipelineStage::CacheChecked,
                actual: self.stage,
            });
        };

        let info = self
            .env
            .media
            .probe(input)
            .map_err(|e| ExportError::Probe(format!("{e:#}")))?;
        if !(info.fps > 0.0) {
            return Err(ExportError::Probe(format!(
                "source reports no usable frame rate ({})",
                info.fps
            )));
        }
        log::info!(
            "Source: {}x{} @ {:.3} fps, {:.3}s, audio: {}",
            info.width,
            info.height,
            info.fps,
            info.duration,
            info.has_audio
        );

        let include_audio = edit.include_audio && info.has_audio;
        let backend = if edit.has_slow_motion() {
            self.env.backend()
        } else {
            InterpolationBackend::CpuFallback
        };
        let synthesize = !backend.is_fallback();
        let codec = CodecParams::resolve(edit.export_mode, self.env.config.codec);

        let (inputs, request) = if self.env.enhancer.is_some() || synthesize {
            self.prepare_frames(scratch, input, edit, &info, backend, include_audio)?
        } else {
            let inputs = vec![EncodeInput::File(input.clone())];
            let request = CompileRequest::new(info.fps, edit.target_fps, info.duration)
                .segments(&edit.segments)
                .trim(edit.trim)
                .video_input(0)
                .audio_input(include_audio.then_some(0))
                .crop(crop_filter(&edit.keyframes, 0.0));
            (inputs, request)
        };

        let graph = request.compile()?;
        log::info!(
            "Compiled filter graph: {} expected frames, interpolation {}",
            graph.expected_frames,
            if graph.needs_interpolation {
                format!("x{:.3}", graph.ratio)
            } else {
                "off".to_string()
            }
        );
        log::debug!("Filter graph: {}", graph.graph);

        let output = scratch.join(format!("{key}.{}", codec.extension()));
        let job = EncodeJob {
            inputs,
            graph,
            codec,
            target_fps: edit.target_fps,
            output: output.clone(),
        };
        self.env.encoder.encode(&job, &self.progress)?;

        if !output.exists() {
            return Err(ExportError::EncodingFailure {
                code: None,
                diagnostics: format!("encoder reported success but {:?} is missing", output),
            });
        }
        Ok(output)
    }

    /// Decode the (trimmed, cropped) source to frames, enhance them, and
    /// synthesize slow-motion segments on the GPU where possible.
    fn prepare_frames(
        &self,
        scratch: &Path,
        input: &Path,
        edit: &NormalizedEdit,
        info: &VideoInfo,
        backend: InterpolationBackend,
        include_audio: bool,
    ) -> Result<(Vec<EncodeInput>, CompileRequest)> {
        let fs = info.fps;
        let (start, duration) = match edit.trim {
            Some(trim) => (trim.start, Some(trim.duration())),
            None => (0.0, None),
        };
        let frames_dir = scratch.join("frames");
        let crop = crop_filter(&edit.keyframes, start);

        self.progress.report(ProgressUpdate::new(
            0,
            1,
            "Extracting frames",
            ProgressPhase::Extracting,
        ));
        let count = self
            .env
            .media
            .extract_frames(input, &frames_dir, start, duration, crop.as_deref())
            .map_err(|e| ExportError::Probe(format!("{e:#}")))?;
        log::info!("Extracted {} frames to {:?}", count, frames_dir);

        if let Some(ref enhancer) = self.env.enhancer {
            enhance_frames(&frames_dir, enhancer.as_ref(), &self.progress)
                .map_err(|e| ExportError::Enhancement(format!("{e:#}")))?;
        }

        let mut inputs = vec![EncodeInput::ImageSequence {
            dir: frames_dir.clone(),
            fps: fs,
        }];
        let audio_input = include_audio.then(|| {
            inputs.push(EncodeInput::File(input.to_path_buf()));
            inputs.len() - 1
        });

        let mut request = CompileRequest::new(fs, edit.target_fps, count as f64 / fs)
            .segments(&edit.segments)
            .trim(edit.trim)
            .frames_pre_trimmed(true)
            .video_input(0)
            .audio_input(audio_input);

        if backend.is_fallback() {
            return Ok((inputs, request));
        }

        let frames = list_frames(&frames_dir).map_err(|e| ExportError::Probe(format!("{e:#}")))?;
        for (i, segment) in edit.segments.iter().enumerate() {
            let multiplier = segment.multiplier();
            if multiplier < 2 {
                continue;
            }

            let first = ((segment.start - start).max(0.0) * fs).round() as usize;
            let last = (((segment.end - start) * fs).round() as usize).min(frames.len());
            if last <= first + 1 {
                continue;
            }

            let segment_in = scratch.join(format!("segment_{i}_in"));
            let segment_out = scratch.join(format!("segment_{i}_out"));
            link_frames(&frames[first..last], &segment_in)?;

            let synthesized = self.env.engine().interpolate(
                &segment_in,
                &segment_out,
                multiplier,
                backend,
                &self.progress,
            );
            if !synthesized {
                log::info!("Segment {} uses CPU motion interpolation", i);
                continue;
            }

            inputs.push(EncodeInput::ImageSequence {
                dir: segment_out,
                fps: fs * f64::from(multiplier) * segment.speed,
            });
            request = request.synthesized(
                i,
                SynthesizedSegment {
                    input_index: inputs.len() - 1,
                    multiplier,
                },
            );
        }

        Ok((inputs, request))
    }
}

/// Copy (or hard-link) `frames` into `dir` renumbered from 1
fn link_frames(frames: &[PathBuf], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for (i, frame) in frames.iter().enumerate() {
        let target = dir.join(frame_file_name(i + 1));
        if std::fs::hard_link(frame, &target).is_err() {
            std::fs::copy(frame, &target)?;
        }
    }
    Ok(())
}

fn copy_to(source: &Path, target: &Path) -> Result<()> {
    if source == target {
        return Ok(());
    }
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, target)?;
    log::debug!("Copied {:?} to {:?}", source, target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubMedia;

    impl MediaTools for StubMedia {
        fn probe(&self, _path: &Path) -> anyhow::Result<VideoInfo> {
            Ok(VideoInfo {
                duration: 10.0,
                width: 640,
                height: 360,
                fps: 30.0,
                rotation: 0,
                has_audio: true,
            })
        }

        fn extract_frames(
            &self,
            _input: &Path,
            _dir: &Path,
            _start: f64,
            _duration: Option<f64>,
            _video_filter: Option<&str>,
        ) -> anyhow::Result<usize> {
            anyhow::bail!("frame extraction not expected")
        }
    }

    #[derive(Default)]
    struct RecordingEncoder {
        jobs: Mutex<Vec<EncodeJob>>,
    }

    impl Encoder for RecordingEncoder {
        fn encode(&self, job: &EncodeJob, _progress: &SharedProgress) -> Result<()> {
            std::fs::write(&job.output, b"rendered")?;
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn env(dir: &Path, encoder: Arc<RecordingEncoder>) -> PipelineEnv {
        let config = ExportConfig {
            work_dir: dir.join("work"),
            cache_dir: dir.join("cache"),
            ..ExportConfig::default()
        };
        PipelineEnv::new(config)
            .unwrap()
            .with_capabilities(CapabilityContext::from_capabilities(GpuCapabilities::none()))
            .with_media_tools(Arc::new(StubMedia))
            .with_encoder(encoder)
    }

    #[test]
    fn test_stage_order_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::default());
        let mut pipeline = ProcessingPipeline::new(env(dir.path(), encoder), dir.path().join("out.mp4"));

        match pipeline.check_cache() {
            Err(ExportError::PipelineOrderingViolation { required, actual }) => {
                assert_eq!(required, PipelineStage::Configured);
                assert_eq!(actual, PipelineStage::Init);
            }
            other => panic!("expected ordering violation, got {:?}", other),
        }

        pipeline.save(b"video bytes").unwrap();
        assert!(matches!(
            pipeline.process(),
            Err(ExportError::PipelineOrderingViolation {
                required: PipelineStage::CacheChecked,
                actual: PipelineStage::Saved,
            })
        ));
        assert!(matches!(
            pipeline.save(b"again"),
            Err(ExportError::PipelineOrderingViolation { .. })
        ));
        assert_eq!(pipeline.stage(), PipelineStage::Saved);
    }

    #[test]
    fn test_invalid_descriptor_keeps_stage() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::default());
        let mut pipeline = ProcessingPipeline::new(env(dir.path(), encoder), dir.path().join("out.mp4"));
        pipeline.save(b"video").unwrap();

        let bad = ClipEditDescriptor::new(30.0).segment(0.0, 2.0, 1.0).segment(1.0, 3.0, 0.5);
        assert!(matches!(
            pipeline.configure(&bad),
            Err(ExportError::FilterGraphConstruction(_))
        ));
        assert_eq!(pipeline.stage(), PipelineStage::Saved);
    }

    #[test]
    fn test_process_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::default());
        let out = dir.path().join("exports/out.mp4");
        let mut pipeline = ProcessingPipeline::new(env(dir.path(), encoder.clone()), &out);

        let descriptor = ClipEditDescriptor::new(30.0).segment(0.0, 4.0, 1.0).segment(4.0, 6.0, 2.0);
        pipeline.save(b"video").unwrap();
        pipeline.configure(&descriptor).unwrap();
        assert!(!pipeline.check_cache().unwrap());

        let first = pipeline.process().unwrap();
        let second = pipeline.process().unwrap();
        assert_eq!(first, out);
        assert_eq!(first, second);
        assert_eq!(encoder.jobs.lock().unwrap().len(), 1);

        pipeline.store().unwrap();
        pipeline.store().unwrap();
        assert_eq!(pipeline.stage(), PipelineStage::Cached);
        assert_eq!(pipeline.process().unwrap(), out);

        let key = pipeline.context().cache_key.clone().unwrap();
        assert!(pipeline.env.cache.get(&key).is_some());
    }

    #[test]
    fn test_primary_tier_requires_a_model_loader() {
        let dir = tempfile::tempdir().unwrap();
        let caps = GpuCapabilities {
            primary_compute_available: true,
            secondary_graphics_available: true,
            ai_primary_available: true,
            ai_secondary_available: true,
            secondary_binary: Some(PathBuf::from("/usr/bin/rife-ncnn-vulkan")),
            ..GpuCapabilities::default()
        };
        let base = env(dir.path(), Arc::new(RecordingEncoder::default()))
            .with_capabilities(CapabilityContext::from_capabilities(caps));

        assert_eq!(base.backend(), InterpolationBackend::SecondaryGpu);
        let info = base.backend_info();
        assert_eq!(info.backend, InterpolationBackend::SecondaryGpu);
        assert!(!info.is_fallback);
        assert!(base.capabilities.capabilities().ai_primary_available);

        let loader: ModelLoader =
            Arc::new(|| -> anyhow::Result<Box<dyn crate::interpolation::InterpolationModel>> {
                anyhow::bail!("no weights in tests")
            });
        let with_model = base.with_model_loader(loader);
        assert_eq!(with_model.backend(), InterpolationBackend::PrimaryGpu);
    }

    #[test]
    fn test_cache_key_covers_codec_and_audio() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = ClipEditDescriptor::new(30.0);

        let key_for = |env: PipelineEnv, descriptor: &ClipEditDescriptor| {
            let mut pipeline = ProcessingPipeline::new(env, dir.path().join("out.mp4"));
            pipeline.save(b"same bytes").unwrap();
            pipeline.configure(descriptor).unwrap();
            pipeline.cache_key().unwrap()
        };

        let base = env(dir.path(), Arc::new(RecordingEncoder::default()));
        let h264 = key_for(base.clone(), &descriptor);
        assert_eq!(h264, key_for(base.clone(), &descriptor));

        let mut vp9_env = base.clone();
        vp9_env.config.codec = crate::CodecFamily::Vp9;
        assert_ne!(h264, key_for(vp9_env, &descriptor));

        let silent = descriptor.clone().include_audio(false);
        assert_ne!(h264, key_for(base, &silent));
    }
}
