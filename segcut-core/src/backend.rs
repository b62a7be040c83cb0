//! Interpolation backend tiers and the total mapping from capabilities to a tier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capabilities::GpuCapabilities;

/// Frame interpolation backends, ordered by output quality.
///
/// Variant order matters: the derived `Ord` makes `PrimaryGpu` the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationBackend {
    /// FFmpeg `minterpolate` on the CPU
    CpuFallback,
    /// RIFE-NCNN on Vulkan
    SecondaryGpu,
    /// In-process RIFE model on the CUDA device
    PrimaryGpu,
}

impl InterpolationBackend {
    pub fn quality_tier(&self) -> u8 {
        match self {
            InterpolationBackend::PrimaryGpu => 3,
            InterpolationBackend::SecondaryGpu => 2,
            InterpolationBackend::CpuFallback => 1,
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == InterpolationBackend::CpuFallback
    }

    pub fn description(&self) -> &'static str {
        match self {
            InterpolationBackend::PrimaryGpu => "AI interpolation on CUDA",
            InterpolationBackend::SecondaryGpu => "AI interpolation on Vulkan (rife-ncnn-vulkan)",
            InterpolationBackend::CpuFallback => "FFmpeg minterpolate (CPU)",
        }
    }
}

impl fmt::Display for InterpolationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterpolationBackend::PrimaryGpu => "primary_gpu",
            InterpolationBackend::SecondaryGpu => "secondary_gpu",
            InterpolationBackend::CpuFallback => "cpu_fallback",
        };
        f.write_str(name)
    }
}

pub struct BackendSelector;

impl BackendSelector {
    /// Pick the best backend the capabilities allow. Never fails.
    pub fn select(caps: &GpuCapabilities) -> InterpolationBackend {
        if caps.ai_primary_available {
            InterpolationBackend::PrimaryGpu
        } else if caps.ai_secondary_available {
            InterpolationBackend::SecondaryGpu
        } else {
            InterpolationBackend::CpuFallback
        }
    }

    /// What is missing for a better tier, and how to get it.
    pub fn missing_capability_hint(caps: &GpuCapabilities) -> Option<String> {
        if caps.ai_primary_available {
            return None;
        }

        let primary = if caps.primary_compute_available {
            "CUDA device found but no RIFE model is installed; install the model weights to enable primary GPU interpolation"
        } else {
            "no CUDA device detected; an NVIDIA GPU with drivers is required for primary GPU interpolation"
        };

        if caps.ai_secondary_available {
            return Some(format!("{primary} (using rife-ncnn-vulkan instead)"));
        }

        let secondary = if caps.secondary_graphics_available {
            "Vulkan is available but rife-ncnn-vulkan was not found; install it on PATH to enable Vulkan interpolation"
        } else if caps.secondary_binary.is_some() {
            "rife-ncnn-vulkan found but no Vulkan device is usable; install Vulkan drivers"
        } else {
            "no Vulkan device and no rife-ncnn-vulkan binary; install both to enable Vulkan interpolation"
        };

        Some(format!(
            "{primary}; {secondary}. Slow motion falls back to CPU minterpolate"
        ))
    }

    /// Log the selection with what is missing. Selection never blocks processing.
    pub fn log_selection(caps: &GpuCapabilities) -> InterpolationBackend {
        let backend = Self::select(caps);
        log::info!(
            "Interpolation backend: {} ({})",
            backend,
            backend.description()
        );
        if let Some(hint) = Self::missing_capability_hint(caps) {
            if backend.is_fallback() {
                log::warn!("{}", hint);
            } else {
                log::info!("{}", hint);
            }
        }
        backend
    }
}

/// Backend status for diagnostic surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub backend: InterpolationBackend,
    pub is_fallback: bool,
    pub quality_tier: u8,
    pub device_names: Vec<String>,
}

impl BackendInfo {
    pub fn from_capabilities(caps: &GpuCapabilities) -> Self {
        let backend = BackendSelector::select(caps);
        Self {
            backend,
            is_fallback: backend.is_fallback(),
            quality_tier: backend.quality_tier(),
            device_names: caps.device_names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_ordering() {
        assert!(InterpolationBackend::PrimaryGpu > InterpolationBackend::SecondaryGpu);
        assert!(InterpolationBackend::SecondaryGpu > InterpolationBackend::CpuFallback);
        assert_eq!(
            [
                InterpolationBackend::SecondaryGpu,
                InterpolationBackend::PrimaryGpu,
                InterpolationBackend::CpuFallback
            ]
            .iter()
            .max(),
            Some(&InterpolationBackend::PrimaryGpu)
        );
    }

    #[test]
    fn test_select_prefers_primary() {
        let caps = GpuCapabilities {
            primary_compute_available: true,
            ai_primary_available: true,
            secondary_graphics_available: true,
            ai_secondary_available: true,
            ..GpuCapabilities::default()
        };
        assert_eq!(BackendSelector::select(&caps), InterpolationBackend::PrimaryGpu);
        assert!(BackendSelector::missing_capability_hint(&caps).is_none());
    }

    #[test]
    fn test_select_secondary_without_primary_model() {
        let caps = GpuCapabilities {
            primary_compute_available: true,
            secondary_graphics_available: true,
            ai_secondary_available: true,
            ..GpuCapabilities::default()
        };
        assert_eq!(BackendSelector::select(&caps), InterpolationBackend::SecondaryGpu);
        let hint = BackendSelector::missing_capability_hint(&caps).unwrap();
        assert!(hint.contains("RIFE model"));
    }

    #[test]
    fn test_no_ai_capability_falls_back() {
        // GPUs without an AI interpolator still select the CPU path.
        let caps = GpuCapabilities {
            primary_compute_available: true,
            secondary_graphics_available: true,
            ..GpuCapabilities::default()
        };
        assert_eq!(BackendSelector::select(&caps), InterpolationBackend::CpuFallback);

        let info = BackendInfo::from_capabilities(&GpuCapabilities::default());
        assert_eq!(info.backend, InterpolationBackend::CpuFallback);
        assert!(info.is_fallback);
        assert_eq!(info.quality_tier, 1);
        let hint = BackendSelector::missing_capability_hint(&caps).unwrap();
        assert!(hint.contains("rife-ncnn-vulkan was not found"));
    }

    #[test]
    fn test_backend_info_serializes() {
        let info = BackendInfo::from_capabilities(&GpuCapabilities::default());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["backend"], "cpu_fallback");
        assert_eq!(json["is_fallback"], true);
    }
}
