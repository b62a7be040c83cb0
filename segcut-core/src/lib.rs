//! Segcut Core - segment-aware video export compiler built on the FFmpeg CLI
//!
//! This library turns a declarative clip edit into a rendered video:
//! - Per-segment speed changes with audio tempo kept in step with video
//! - Frame rate upconversion and slow motion via motion interpolation
//! - AI frame synthesis on CUDA or Vulkan hosts, with CPU fallback
//! - Animated crop keyframes
//! - Single and two-pass encoding (H.264, VP9)
//! - A content-addressed cache so each unique edit renders once

pub mod backend;
pub mod cache;
pub mod capabilities;
pub mod config;
pub mod descriptor;
pub mod encoder;
pub mod enhancer;
pub mod error;
pub mod ffmpeg_wrapper;
pub mod filter_graph;
pub mod interpolation;
pub mod job;
pub mod pipeline;
pub mod presets;
pub mod progress;
pub mod storage;

// Re-export commonly used types at the crate root
pub use backend::{BackendInfo, BackendSelector, InterpolationBackend};
pub use cache::ContentAddressedCache;
pub use capabilities::{CapabilityContext, CapabilityDetector, GpuCapabilities};
pub use config::ExportConfig;
pub use descriptor::{ClipEditDescriptor, CropKeyframe, Segment, TrimRange};
pub use encoder::{Encoder, EncodingOrchestrator};
pub use error::{ExportError, PipelineStage, Result};
pub use ffmpeg_wrapper::{FFmpegCommand, VideoInfo, check_ffmpeg, get_video_info};
pub use filter_graph::{CompileRequest, CompiledGraph, FilterGraphCompiler};
pub use job::{ClipRequest, ExportJob, spawn_export, spawn_exports};
pub use pipeline::{PipelineEnv, ProcessingPipeline};
pub use presets::{CodecFamily, CodecParams};
pub use progress::{ProgressPhase, ProgressSink, ProgressUpdate};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Speed/quality trade-off of an export
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Fast encoder settings, single pass
    #[default]
    Fast,
    /// Slower settings; two-pass where the codec supports it
    Quality,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Fast => "fast",
            ExportMode::Quality => "quality",
        }
    }
}
