//! Progress reporting across the worker/scheduler boundary.
//!
//! Delivery is best effort: sinks never block the reporting thread, and a
//! full channel drops the update.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Extracting,
    Enhancing,
    Interpolating,
    Analyzing,
    Encoding,
    Finished,
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProgressPhase::Extracting => "extracting",
            ProgressPhase::Enhancing => "enhancing",
            ProgressPhase::Interpolating => "interpolating",
            ProgressPhase::Analyzing => "analyzing",
            ProgressPhase::Encoding => "encoding",
            ProgressPhase::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub phase: ProgressPhase,
}

impl ProgressUpdate {
    pub fn new(current: u64, total: u64, message: impl Into<String>, phase: ProgressPhase) -> Self {
        Self {
            current,
            total,
            message: message.into(),
            phase,
        }
    }

    /// Completion in percent, clamped to 100
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

pub type SharedProgress = Arc<dyn ProgressSink>;

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

pub fn null_progress() -> SharedProgress {
    Arc::new(NullProgress)
}

/// Forwards updates into a bounded channel drained by the async side
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiver that drains it
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, update: ProgressUpdate) {
        if let Err(mpsc::error::TrySendError::Full(update)) = self.tx.try_send(update) {
            log::trace!("Progress channel full, dropping update at {}", update.current);
        }
    }
}
