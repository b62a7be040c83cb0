use std::fmt;

use thiserror::Error;

/// Result alias used across the export core.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Stages of a [`ProcessingPipeline`](crate::ProcessingPipeline), in the order they must be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Init,
    Saved,
    Configured,
    CacheChecked,
    Processed,
    Cached,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Init => "init",
            PipelineStage::Saved => "saved",
            PipelineStage::Configured => "configured",
            PipelineStage::CacheChecked => "cache_checked",
            PipelineStage::Processed => "processed",
            PipelineStage::Cached => "cached",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// An acceleration backend could not be used. Callers downgrade instead of failing.
    #[error("interpolation backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The segment list cannot be turned into a filter graph.
    #[error("invalid filter graph: {0}")]
    FilterGraphConstruction(String),

    /// The descriptor itself is malformed (bad fps, bad trim, bad keyframes).
    #[error("invalid edit descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("encoder exited with code {code:?}: {diagnostics}")]
    EncodingFailure {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("failed to write cache entry {digest}: {reason}")]
    CacheWriteFailure { digest: String, reason: String },

    #[error("pipeline stage '{required}' required, but pipeline is at '{actual}'")]
    PipelineOrderingViolation {
        required: PipelineStage,
        actual: PipelineStage,
    },

    #[error("failed to probe media: {0}")]
    Probe(String),

    #[error("frame enhancement failed: {0}")]
    Enhancement(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExportError {
    /// Whether retrying the same request may succeed.
    ///
    /// Configuration errors need different inputs; encoding and I/O errors may be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExportError::EncodingFailure { .. }
                | ExportError::Io(_)
                | ExportError::Probe(_)
                | ExportError::CacheWriteFailure { .. }
        )
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ExportError::FilterGraphConstruction(_) | ExportError::InvalidDescriptor(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(PipelineStage::Init < PipelineStage::Saved);
        assert!(PipelineStage::CacheChecked < PipelineStage::Processed);
        assert!(PipelineStage::Processed < PipelineStage::Cached);
    }

    #[test]
    fn test_error_classification() {
        let encode = ExportError::EncodingFailure {
            code: Some(1),
            diagnostics: "boom".into(),
        };
        assert!(encode.is_retryable());
        assert!(!encode.is_invalid_input());

        let graph = ExportError::FilterGraphConstruction("overlap".into());
        assert!(graph.is_invalid_input());
        assert!(!graph.is_retryable());
    }

    #[test]
    fn test_ordering_violation_message_names_required_stage() {
        let err = ExportError::PipelineOrderingViolation {
            required: PipelineStage::Configured,
            actual: PipelineStage::Saved,
        };
        let msg = err.to_string();
        assert!(msg.contains("configured"));
        assert!(msg.contains("saved"));
    }
}
