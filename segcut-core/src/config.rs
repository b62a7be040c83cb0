//! Export configuration.
//!
//! Every field has a default so a partial JSON file (or none at all) is a
//! valid configuration. The CLI overrides individual fields from flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::CodecFamily;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Scratch space for saved inputs, frame sequences and encoder outputs
    pub work_dir: PathBuf,
    /// Content-addressed artifact store
    pub cache_dir: PathBuf,
    pub codec: CodecFamily,
    /// FFmpeg executable that runs the encode passes
    pub ffmpeg: PathBuf,
    /// Encoder thread count, FFmpeg decides when unset
    pub threads: Option<usize>,
    /// Bytes of encoder stderr kept in error reports
    pub max_diagnostic_bytes: usize,
    pub cache: CacheLimits,
    pub detector: DetectorConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("segcut");
        Self {
            work_dir: base.join("work"),
            cache_dir: base.join("cache"),
            codec: CodecFamily::default(),
            ffmpeg: PathBuf::from("ffmpeg"),
            threads: None,
            max_diagnostic_bytes: 4096,
            cache: CacheLimits::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl ExportConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config file {:?}", path))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    pub max_age_days: u64,
    pub max_total_size_mb: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_age_days: 7,
            max_total_size_mb: 10 * 1024,
        }
    }
}

impl CacheLimits {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }

    pub fn max_total_size(&self) -> u64 {
        self.max_total_size_mb * 1024 * 1024
    }
}

/// Where capability detection looks for interpolation tooling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Executable name of the Vulkan interpolator
    pub secondary_binary: String,
    /// Install locations checked when the binary is not on PATH
    pub secondary_search_paths: Vec<PathBuf>,
    /// Model weight files that enable the CUDA interpolator
    pub primary_model_paths: Vec<PathBuf>,
    /// Python package whose importability also enables the CUDA interpolator
    pub primary_python_module: Option<String>,
    pub python: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let mut secondary_search_paths = vec![
            PathBuf::from("/usr/local/bin/rife-ncnn-vulkan"),
            PathBuf::from("/opt/rife-ncnn-vulkan/rife-ncnn-vulkan"),
            PathBuf::from("/opt/svp/rife/rife-ncnn-vulkan"),
        ];
        let mut primary_model_paths = vec![PathBuf::from("/opt/segcut/models/rife.pth")];
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            secondary_search_paths.push(home.join(".local/bin/rife-ncnn-vulkan"));
            secondary_search_paths.push(home.join("rife-ncnn-vulkan/rife-ncnn-vulkan"));
            primary_model_paths.push(home.join(".cache/segcut/models/rife.pth"));
        }

        Self {
            secondary_binary: "rife-ncnn-vulkan".to_string(),
            secondary_search_paths,
            primary_model_paths,
            primary_python_module: Some("rife".to_string()),
            python: "python3".to_string(),
        }
    }
}
