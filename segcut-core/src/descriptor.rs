//! Declarative per-clip edit descriptions and their canonical form.
//!
//! A [`ClipEditDescriptor`] is what callers hand to the pipeline; it is
//! validated and normalized into a [`NormalizedEdit`] during the
//! `configure` stage. Only the normalized form feeds the cache key and the
//! filter graph compiler, so two descriptors that differ only in keyframe
//! order or float noise render (and cache) identically.

use serde::{Deserialize, Serialize};

use crate::ExportMode;
use crate::error::{ExportError, Result};
use crate::filter_graph::validate_segments;

/// Times are rounded to milliseconds when normalizing.
const TIME_PRECISION: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropKeyframe {
    pub time: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A contiguous source-time interval played back at `speed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub speed: f64,
}

impl Segment {
    pub fn new(start: f64, end: f64, speed: f64) -> Self {
        Self { start, end, speed }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_slow_motion(&self) -> bool {
        self.speed < 1.0
    }

    /// Frame multiplier for AI frame synthesis, `floor(1/speed)`.
    pub fn multiplier(&self) -> u32 {
        slow_motion_multiplier(self.speed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl TrimRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

fn default_include_audio() -> bool {
    true
}

/// Edit description for one clip, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipEditDescriptor {
    #[serde(default)]
    pub crop_keyframes: Vec<CropKeyframe>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub trim: Option<TrimRange>,
    pub target_fps: f64,
    #[serde(default)]
    pub export_mode: ExportMode,
    #[serde(default = "default_include_audio")]
    pub include_audio: bool,
}

impl ClipEditDescriptor {
    pub fn new(target_fps: f64) -> Self {
        Self {
            crop_keyframes: Vec::new(),
            segments: Vec::new(),
            trim: None,
            target_fps,
            export_mode: ExportMode::default(),
            include_audio: true,
        }
    }

    pub fn segment(mut self, start: f64, end: f64, speed: f64) -> Self {
        self.segments.push(Segment::new(start, end, speed));
        self
    }

    pub fn trim(mut self, start: f64, end: f64) -> Self {
        self.trim = Some(TrimRange::new(start, end));
        self
    }

    pub fn crop(mut self, keyframe: CropKeyframe) -> Self {
        self.crop_keyframes.push(keyframe);
        self
    }

    pub fn export_mode(mut self, mode: ExportMode) -> Self {
        self.export_mode = mode;
        self
    }

    pub fn include_audio(mut self, enabled: bool) -> Self {
        self.include_audio = enabled;
        self
    }

    /// Load a descriptor from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate and convert into the canonical form used for caching and compilation.
    pub fn normalize(&self) -> Result<NormalizedEdit> {
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(ExportError::InvalidDescriptor(format!(
                "target fps must be positive, got {}",
                self.target_fps
            )));
        }

        let trim = match self.trim {
            Some(trim) => {
                let trim = TrimRange::new(round_time(trim.start), round_time(trim.end));
                if trim.start < 0.0 || trim.end <= trim.start {
                    return Err(ExportError::InvalidDescriptor(format!(
                        "trim range [{}, {}] is empty or negative",
                        trim.start, trim.end
                    )));
                }
                Some(trim)
            }
            None => None,
        };

        let keyframes = normalize_keyframes(&self.crop_keyframes)?;

        let mut segments: Vec<Segment> = self
            .segments
            .iter()
            .map(|s| Segment::new(round_time(s.start), round_time(s.end), s.speed))
            .collect();
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        validate_segments(&segments, trim.as_ref())?;

        Ok(NormalizedEdit {
            keyframes,
            segments,
            trim,
            target_fps: self.target_fps,
            export_mode: self.export_mode,
            include_audio: self.include_audio,
        })
    }
}

/// Canonical, validated edit data produced by the `configure` stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEdit {
    pub keyframes: Vec<CropKeyframe>,
    pub segments: Vec<Segment>,
    pub trim: Option<TrimRange>,
    pub target_fps: f64,
    pub export_mode: ExportMode,
    pub include_audio: bool,
}

impl NormalizedEdit {
    pub fn has_slow_motion(&self) -> bool {
        self.segments.iter().any(Segment::is_slow_motion)
    }
}

/// `floor(1/speed)` for slow-motion speeds, `1` otherwise.
///
/// `0.5` maps to 2 and `0.34` maps to 2 (not 3): only whole multiples of the
/// source frame count are synthesized.
pub fn slow_motion_multiplier(speed: f64) -> u32 {
    if speed <= 0.0 || speed >= 1.0 {
        return 1;
    }
    // Guard against 1/0.2 == 4.999..
    (1.0 / speed + 1e-9).floor() as u32
}

fn round_time(t: f64) -> f64 {
    (t * TIME_PRECISION).round() / TIME_PRECISION
}

fn normalize_keyframes(keyframes: &[CropKeyframe]) -> Result<Vec<CropKeyframe>> {
    let mut out: Vec<CropKeyframe> = Vec::with_capacity(keyframes.len());
    for kf in keyframes {
        if !(kf.width > 0.0 && kf.height > 0.0) || kf.time < 0.0 {
            return Err(ExportError::InvalidDescriptor(format!(
                "crop keyframe at t={} has invalid geometry {}x{}",
                kf.time, kf.width, kf.height
            )));
        }
        out.push(CropKeyframe {
            time: round_time(kf.time),
            x: kf.x.max(0.0).round(),
            y: kf.y.max(0.0).round(),
            width: kf.width.round(),
            height: kf.height.round(),
        });
    }

    // Stable sort, then keep the last keyframe for any repeated timestamp.
    out.sort_by(|a, b| a.time.total_cmp(&b.time));
    let mut deduped: Vec<CropKeyframe> = Vec::with_capacity(out.len());
    for kf in out {
        match deduped.last_mut() {
            Some(last) if last.time == kf.time => *last = kf,
            _ => deduped.push(kf),
        }
    }
    Ok(deduped)
}
