//! Export jobs on the async runtime.
//!
//! The pipeline is blocking (FFmpeg children, frame I/O), so it runs on the
//! blocking pool. Progress crosses back through a bounded channel that the
//! caller drains; updates that do not fit are dropped.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::descriptor::ClipEditDescriptor;
use crate::error::{ExportError, Result};
use crate::pipeline::{PipelineEnv, ProcessingPipeline};
use crate::progress::{ChannelProgress, ProgressUpdate, SharedProgress};

/// Progress updates buffered per job before new ones are dropped
pub const DEFAULT_PROGRESS_CAPACITY: usize = 64;

/// One clip to export
#[derive(Debug, Clone)]
pub struct ClipRequest {
    pub descriptor: ClipEditDescriptor,
    pub input: Vec<u8>,
    pub output: PathBuf,
}

/// Handle to a running export. Owned by the caller; there is no global registry.
#[derive(Debug)]
pub struct ExportJob {
    pub progress: mpsc::Receiver<ProgressUpdate>,
    pub handle: JoinHandle<Result<PathBuf>>,
}

impl ExportJob {
    /// Wait for the export, discarding any progress still queued
    pub async fn finish(self) -> Result<PathBuf> {
        drop(self.progress);
        join(self.handle).await
    }
}

async fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(ExportError::Io(std::io::Error::other(format!(
            "export task failed: {e}"
        )))),
    }
}

/// Start exporting one clip on the blocking pool.
///
/// Must be called from within a tokio runtime.
pub fn spawn_export(env: PipelineEnv, clip: ClipRequest) -> ExportJob {
    let (sink, progress) = ChannelProgress::bounded(DEFAULT_PROGRESS_CAPACITY);
    let sink: SharedProgress = Arc::new(sink);

    let handle = tokio::task::spawn_blocking(move || {
        ProcessingPipeline::new(env, clip.output)
            .with_progress(sink)
            .run(&clip.descriptor, &clip.input)
    });

    ExportJob { progress, handle }
}

/// Export `clips` one after another on a single blocking worker.
///
/// Clips run sequentially so GPU memory is released between them. The
/// first failure stops the batch.
pub fn spawn_exports(env: PipelineEnv, clips: Vec<ClipRequest>) -> BatchJob {
    let (sink, progress) = ChannelProgress::bounded(DEFAULT_PROGRESS_CAPACITY);
    let sink: SharedProgress = Arc::new(sink);

    let handle = tokio::task::spawn_blocking(move || {
        let mut outputs = Vec::with_capacity(clips.len());
        for (i, clip) in clips.into_iter().enumerate() {
            log::info!("Exporting clip {} to {:?}", i + 1, clip.output);
            let mut pipeline =
                ProcessingPipeline::new(env.clone(), clip.output).with_progress(sink.clone());
            outputs.push(pipeline.run(&clip.descriptor, &clip.input)?);
        }
        Ok(outputs)
    });

    BatchJob { progress, handle }
}

/// Handle to a sequential multi-clip export
#[derive(Debug)]
pub struct BatchJob {
    pub progress: mpsc::Receiver<ProgressUpdate>,
    pub handle: JoinHandle<Result<Vec<PathBuf>>>,
}

impl BatchJob {
    pub async fn finish(self) -> Result<Vec<PathBuf>> {
        drop(self.progress);
        join(self.handle).await
    }
}
