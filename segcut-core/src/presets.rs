use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ExportMode;

/// Output codec family
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFamily {
    /// H.264 in MP4, always encoded in a single pass
    #[default]
    H264,
    /// VP9 in WebM, two-pass in quality mode
    Vp9,
}

impl CodecFamily {
    pub fn extension(&self) -> &'static str {
        match self {
            CodecFamily::H264 => "mp4",
            CodecFamily::Vp9 => "webm",
        }
    }

    /// Get description of the codec family
    pub fn description(&self) -> &'static str {
        match self {
            CodecFamily::H264 => "H.264 + AAC in MP4 (single pass)",
            CodecFamily::Vp9 => "VP9 + Opus in WebM (two-pass for quality exports)",
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodecFamily::H264 => "h264",
            CodecFamily::Vp9 => "vp9",
        })
    }
}

/// Encoder settings resolved from an export mode and codec family
#[derive(Clone, Debug, PartialEq)]
pub struct CodecParams {
    pub family: CodecFamily,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub crf: u8,
    pub preset: Option<&'static str>,
    /// Encoder-specific flags appended after the common options
    pub extra_args: Vec<String>,
    pub two_pass: bool,
}

impl CodecParams {
    pub fn resolve(mode: ExportMode, family: CodecFamily) -> Self {
        match (family, mode) {
            (CodecFamily::H264, ExportMode::Fast) => Self::h264(23, "veryfast"),
            (CodecFamily::H264, ExportMode::Quality) => Self::h264(18, "slow"),
            (CodecFamily::Vp9, ExportMode::Fast) => Self {
                family,
                video_codec: "libvpx-vp9",
                audio_codec: "libopus",
                crf: 33,
                preset: None,
                extra_args: vp9_args("realtime", 8),
                two_pass: false,
            },
            (CodecFamily::Vp9, ExportMode::Quality) => Self {
                family,
                video_codec: "libvpx-vp9",
                audio_codec: "libopus",
                crf: 24,
                preset: None,
                extra_args: vp9_args("good", 1),
                two_pass: true,
            },
        }
    }

    fn h264(crf: u8, preset: &'static str) -> Self {
        Self {
            family: CodecFamily::H264,
            video_codec: "libx264",
            audio_codec: "aac",
            crf,
            preset: Some(preset),
            extra_args: vec![
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-movflags".to_string(),
                "+faststart".to_string(),
            ],
            two_pass: false,
        }
    }

    pub fn extension(&self) -> &'static str {
        self.family.extension()
    }
}

// Constant quality mode needs an explicit zero bitrate.
fn vp9_args(deadline: &str, cpu_used: u8) -> Vec<String> {
    vec![
        "-b:v".to_string(),
        "0".to_string(),
        "-deadline".to_string(),
        deadline.to_string(),
        "-cpu-used".to_string(),
        cpu_used.to_string(),
        "-row-mt".to_string(),
        "1".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]
}

/// List all available codec families
pub fn list_all() -> Vec<(&'static str, &'static str)> {
    vec![
        ("h264", CodecFamily::H264.description()),
        ("vp9", CodecFamily::Vp9.description()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_is_single_pass() {
        for mode in [ExportMode::Fast, ExportMode::Quality] {
            let params = CodecParams::resolve(mode, CodecFamily::H264);
            assert!(!params.two_pass);
            assert_eq!(params.video_codec, "libx264");
            assert_eq!(params.extension(), "mp4");
        }
        assert_eq!(CodecParams::resolve(ExportMode::Quality, CodecFamily::H264).crf, 18);
        assert_eq!(
            CodecParams::resolve(ExportMode::Fast, CodecFamily::H264).preset,
            Some("veryfast")
        );
    }

    #[test]
    fn test_vp9_two_pass_only_in_quality() {
        assert!(!CodecParams::resolve(ExportMode::Fast, CodecFamily::Vp9).two_pass);
        let quality = CodecParams::resolve(ExportMode::Quality, CodecFamily::Vp9);
        assert!(quality.two_pass);
        assert_eq!(quality.extension(), "webm");
        assert!(quality.extra_args.windows(2).any(|w| w == ["-b:v", "0"]));
    }

    #[test]
    fn test_codec_family_names() {
        assert_eq!(CodecFamily::Vp9.to_string(), "vp9");
        let parsed: CodecFamily = serde_json::from_str("\"vp9\"").unwrap();
        assert_eq!(parsed, CodecFamily::Vp9);
        assert_eq!(list_all().len(), 2);
    }
}
