//! Runs the compiled filter graph through FFmpeg.
//!
//! H.264 exports are a single pass. VP9 quality exports run an analysis
//! pass writing to the null muxer, then the real encode, sharing one
//! pass-log prefix. Nothing here retries; a failed encode removes its
//! partial output and pass logs before the error is returned.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::ffmpeg_wrapper::{FFmpegCommand, FFmpegOutput};
use crate::filter_graph::CompiledGraph;
use crate::presets::CodecParams;
use crate::progress::{ProgressPhase, ProgressUpdate, SharedProgress};

static FRAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"frame=\s*(\d+)").expect("valid frame progress regex"));

const NULL_SINK: &str = if cfg!(windows) { "NUL" } else { "/dev/null" };

/// One `-i` entry of an encode, in input-index order
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeInput {
    /// A media file, used for its video, audio, or both
    File(PathBuf),
    /// A `frame_%06d.png` directory read at a fixed rate
    ImageSequence { dir: PathBuf, fps: f64 },
}

#[derive(Debug, Clone)]
pub struct EncodeJob {
    /// Inputs in the order the filter graph refers to them
    pub inputs: Vec<EncodeInput>,
    pub graph: CompiledGraph,
    pub codec: CodecParams,
    pub target_fps: f64,
    pub output: PathBuf,
}

impl EncodeJob {
    /// Prefix FFmpeg derives pass-log file names from
    pub fn pass_log_prefix(&self) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "encode".to_string());
        self.output.with_file_name(format!("{stem}-passlog"))
    }
}

pub trait Encoder: Send + Sync {
    fn encode(&self, job: &EncodeJob, progress: &SharedProgress) -> Result<()>;
}

/// Tracks the highest `frame=` value seen in encoder output.
#[derive(Debug, Default)]
pub struct FrameCounter {
    last: u64,
}

impl FrameCounter {
    /// The new frame number if `line` advances it
    pub fn observe(&mut self, line: &str) -> Option<u64> {
        let frame = FRAME_REGEX
            .captures(line)
            .and_then(|caps| caps[1].parse::<u64>().ok())?;
        if frame > self.last {
            self.last = frame;
            Some(frame)
        } else {
            None
        }
    }
}

/// Last `max_bytes` of `text`, cut on a character boundary
pub fn diagnostic_tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[derive(Debug, Clone)]
pub struct EncodingOrchestrator {
    ffmpeg: PathBuf,
    threads: Option<usize>,
    max_diagnostic_bytes: usize,
}

impl EncodingOrchestrator {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            threads: config.threads,
            max_diagnostic_bytes: config.max_diagnostic_bytes,
        }
    }

    /// The FFmpeg invocations for `job`, in execution order
    pub fn commands(&self, job: &EncodeJob) -> Vec<FFmpegCommand> {
        if !job.codec.two_pass {
            return vec![self.encode_command(job, None)];
        }

        let prefix = job.pass_log_prefix();
        let analysis = self
            .base_command(job, Path::new(NULL_SINK))
            .pass(1, &prefix)
            .no_audio()
            .format("null");
        vec![analysis, self.encode_command(job, Some(&prefix))]
    }

    fn base_command(&self, job: &EncodeJob, output: &Path) -> FFmpegCommand {
        let mut cmd = FFmpegCommand::new(output)
            .program(&self.ffmpeg)
            .overwrite();
        for input in &job.inputs {
            cmd = match input {
                EncodeInput::File(path) => cmd.input(path),
                EncodeInput::ImageSequence { dir, fps } => cmd.image_sequence(dir, *fps),
            };
        }

        cmd = cmd
            .filter_complex(&job.graph.graph)
            .map_label(&job.graph.video_label)
            .video_codec(job.codec.video_codec)
            .quality(job.codec.crf)
            .frame_rate(job.target_fps)
            .custom_args(job.codec.extra_args.clone());
        if let Some(preset) = job.codec.preset {
            cmd = cmd.preset(preset);
        }
        if let Some(threads) = self.threads {
            cmd = cmd.threads(threads);
        }
        cmd
    }

    fn encode_command(&self, job: &EncodeJob, pass_log: Option<&Path>) -> FFmpegCommand {
        let mut cmd = self.base_command(job, &job.output);
        if let Some(prefix) = pass_log {
            cmd = cmd.pass(2, prefix);
        }
        match job.graph.audio_label {
            Some(ref label) => cmd.map_label(label).audio_codec(job.codec.audio_codec),
            None => cmd.no_audio(),
        }
    }

    fn run_pass(
        &self,
        cmd: &FFmpegCommand,
        phase: ProgressPhase,
        total: u64,
        progress: &SharedProgress,
    ) -> Result<FFmpegOutput> {
        let sink = progress.clone();
        let mut counter = FrameCounter::default();
        let output = cmd
            .execute(move |line| {
                if let Some(frame) = counter.observe(line) {
                    sink.report(ProgressUpdate::new(
                        frame.min(total),
                        total,
                        format!("{phase} frame {frame}/{total}"),
                        phase,
                    ));
                }
            })
            .map_err(|e| ExportError::EncodingFailure {
                code: None,
                diagnostics: format!("{e:#}"),
            })?;

        if !output.success() {
            log::error!("Encoder failed:\n{}", output.diagnostics);
            return Err(ExportError::EncodingFailure {
                code: output.status.code(),
                diagnostics: diagnostic_tail(&output.diagnostics, self.max_diagnostic_bytes),
            });
        }
        Ok(output)
    }
}

impl Encoder for EncodingOrchestrator {
    fn encode(&self, job: &EncodeJob, progress: &SharedProgress) -> Result<()> {
        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let commands = self.commands(job);
        let pass_count = commands.len();
        let total = job.graph.expected_frames;
        log::info!(
            "Encoding {:?} with {} ({} pass{}, ~{} frames)",
            job.output,
            job.codec.video_codec,
            pass_count,
            if pass_count == 1 { "" } else { "es" },
            total
        );

        let mut result = Ok(());
        for (i, cmd) in commands.iter().enumerate() {
            let phase = if i + 1 < pass_count {
                ProgressPhase::Analyzing
            } else {
                ProgressPhase::Encoding
            };
            if let Err(e) = self.run_pass(cmd, phase, total, progress) {
                result = Err(e);
                break;
            }
        }

        if job.codec.two_pass {
            remove_pass_logs(&job.pass_log_prefix());
        }
        if result.is_err() && job.output.exists() {
            log::warn!("Removing partial output {:?}", job.output);
            let _ = std::fs::remove_file(&job.output);
        }
        result
    }
}

fn remove_pass_logs(prefix: &Path) {
    let (Some(dir), Some(name)) = (prefix.parent(), prefix.file_name()) else {
        return;
    };
    let name = name.to_string_lossy();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(name.as_ref()))
        {
            let _ = std::fs::remove_file(&path);
        }
    }
}
