//! Host acceleration detection.
//!
//! Detection shells out to vendor tools, which is slow, so the snapshot is
//! computed once and shared through a [`CapabilityContext`]. Nothing here
//! fails: a missing tool just leaves the corresponding flag unset.

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::backend::{BackendInfo, BackendSelector, InterpolationBackend};
use crate::config::DetectorConfig;

const NVIDIA_PROC_DIR: &str = "/proc/driver/nvidia/gpus";

/// Software rasterizers report as Vulkan devices but cannot run interpolation.
const SOFTWARE_VULKAN_DEVICES: &[&str] = &["llvmpipe", "SwiftShader", "lavapipe"];

static DRIVER_MODEL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Model:\s*(.+?)\s*$").expect("valid driver model regex"));

static VULKAN_DEVICE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)deviceName\s*=\s*(.+?)\s*$").expect("valid vulkaninfo device regex")
});

static INTERPOLATOR_DEVICE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\[(\d+) (.+?)\]\s+queue").expect("valid interpolator device regex")
});

/// Immutable snapshot of what this host can accelerate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuCapabilities {
    pub primary_compute_available: bool,
    pub secondary_graphics_available: bool,
    pub ai_primary_available: bool,
    pub ai_secondary_available: bool,
    pub primary_device_names: Vec<String>,
    pub secondary_device_names: Vec<String>,
    /// Resolved path of the Vulkan interpolator, when found
    pub secondary_binary: Option<PathBuf>,
}

impl GpuCapabilities {
    /// A host with no acceleration at all
    pub fn none() -> Self {
        Self::default()
    }

    pub fn device_names(&self) -> Vec<String> {
        let mut names = self.primary_device_names.clone();
        for name in &self.secondary_device_names {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// Captured result of a probe command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Host access used by detection, so tests can stand in for real hardware.
pub trait HostProbe: Send + Sync {
    /// Run `program`; `None` when it cannot be started at all.
    fn run(&self, program: &Path, args: &[&str]) -> Option<CommandOutput>;
    fn which(&self, program: &str) -> Option<PathBuf>;
    fn exists(&self, path: &Path) -> bool;
    fn read_to_string(&self, path: &Path) -> Option<String>;
    fn list_dir(&self, path: &Path) -> Vec<PathBuf>;
}

/// [`HostProbe`] backed by the real filesystem and process table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn run(&self, program: &Path, args: &[&str]) -> Option<CommandOutput> {
        let output = Command::new(program).args(args).output().ok()?;
        Some(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }

    fn list_dir(&self, path: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(path)
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }
}

pub struct CapabilityDetector {
    probe: Arc<dyn HostProbe>,
    config: DetectorConfig,
}

impl CapabilityDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemProbe))
    }

    pub fn with_probe(config: DetectorConfig, probe: Arc<dyn HostProbe>) -> Self {
        Self { probe, config }
    }

    /// Probe the host. Each step only lowers the selectable tier on failure.
    pub fn detect(&self) -> GpuCapabilities {
        let mut caps = GpuCapabilities::none();

        caps.primary_device_names = self.primary_devices_from_driver();
        if caps.primary_device_names.is_empty() {
            caps.primary_device_names = self.primary_devices_from_smi();
        }
        caps.primary_compute_available = !caps.primary_device_names.is_empty();

        caps.secondary_binary = self.find_secondary_binary();

        caps.secondary_device_names = self.vulkan_devices();
        if caps.secondary_device_names.is_empty()
            && let Some(ref binary) = caps.secondary_binary
        {
            caps.secondary_device_names = self.devices_from_interpolator(binary);
        }
        caps.secondary_graphics_available = !caps.secondary_device_names.is_empty();

        caps.ai_primary_available = caps.primary_compute_available && self.primary_model_installed();
        caps.ai_secondary_available =
            caps.secondary_graphics_available && caps.secondary_binary.is_some();

        log::debug!("Detected capabilities: {:?}", caps);
        caps
    }

    /// Ask the NVIDIA kernel driver directly.
    fn primary_devices_from_driver(&self) -> Vec<String> {
        let mut gpus = self.probe.list_dir(Path::new(NVIDIA_PROC_DIR));
        gpus.sort();
        gpus.iter()
            .filter_map(|gpu| self.probe.read_to_string(&gpu.join("information")))
            .filter_map(|info| DRIVER_MODEL_REGEX.captures(&info).map(|c| c[1].to_string()))
            .collect()
    }

    fn primary_devices_from_smi(&self) -> Vec<String> {
        self.probe
            .run(
                Path::new("nvidia-smi"),
                &["--query-gpu=name", "--format=csv,noheader"],
            )
            .filter(|o| o.success)
            .map(|o| {
                o.stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn vulkan_devices(&self) -> Vec<String> {
        let Some(output) = self
            .probe
            .run(Path::new("vulkaninfo"), &["--summary"])
            .filter(|o| o.success)
        else {
            return Vec::new();
        };
        let mut names: Vec<String> = VULKAN_DEVICE_REGEX
            .captures_iter(&output.stdout)
            .map(|c| c[1].to_string())
            .filter(|name| !SOFTWARE_VULKAN_DEVICES.iter().any(|sw| name.contains(sw)))
            .collect();
        names.dedup();
        names
    }

    /// rife-ncnn-vulkan prints `[0 Device Name]  queueC=...` for every GPU it can use.
    fn devices_from_interpolator(&self, binary: &Path) -> Vec<String> {
        let Some(output) = self.probe.run(binary, &["-h"]) else {
            return Vec::new();
        };
        let text = format!("{}\n{}", output.stdout, output.stderr);
        let mut names: Vec<String> = INTERPOLATOR_DEVICE_REGEX
            .captures_iter(&text)
            .map(|c| c[2].to_string())
            .filter(|name| !SOFTWARE_VULKAN_DEVICES.iter().any(|sw| name.contains(sw)))
            .collect();
        names.dedup();
        names
    }

    fn primary_model_installed(&self) -> bool {
        if let Some(path) = self
            .config
            .primary_model_paths
            .iter()
            .find(|p| self.probe.exists(p))
        {
            log::debug!("Found primary interpolation model at {:?}", path);
            return true;
        }

        let Some(ref module) = self.config.primary_python_module else {
            return false;
        };
        let script = format!("import torch, {module}; assert torch.cuda.is_available()");
        self.probe
            .run(Path::new(&self.config.python), &["-c", &script])
            .is_some_and(|o| o.success)
    }

    fn find_secondary_binary(&self) -> Option<PathBuf> {
        self.probe
            .which(&self.config.secondary_binary)
            .or_else(|| {
                self.config
                    .secondary_search_paths
                    .iter()
                    .find(|p| self.probe.exists(p))
                    .cloned()
            })
    }
}

struct ContextInner {
    detector: Option<CapabilityDetector>,
    caps: OnceCell<GpuCapabilities>,
}

/// Shared, lazily-initialized capability snapshot.
///
/// Clones share one snapshot. Concurrent first callers block on the same
/// initialization, so the host is probed at most once.
#[derive(Clone)]
pub struct CapabilityContext {
    inner: Arc<ContextInner>,
}

impl CapabilityContext {
    pub fn new(detector: CapabilityDetector) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                detector: Some(detector),
                caps: OnceCell::new(),
            }),
        }
    }

    /// A context with a fixed snapshot and no probing
    pub fn from_capabilities(caps: GpuCapabilities) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                detector: None,
                caps: OnceCell::with_value(caps),
            }),
        }
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        self.inner.caps.get_or_init(|| {
            let caps = match self.inner.detector {
                Some(ref detector) => detector.detect(),
                None => GpuCapabilities::none(),
            };
            BackendSelector::log_selection(&caps);
            caps
        })
    }

    pub fn backend(&self) -> InterpolationBackend {
        BackendSelector::select(self.capabilities())
    }

    pub fn backend_info(&self) -> BackendInfo {
        BackendInfo::from_capabilities(self.capabilities())
    }
}

impl std::fmt::Debug for CapabilityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityContext")
            .field("caps", &self.inner.caps.get())
            .finish()
    }
}
