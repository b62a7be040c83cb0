//! Segment-aware filter graph compiler.
//!
//! Turns a segment list (trim boundaries + per-segment speed) and a
//! source/target frame-rate pair into an FFmpeg `-filter_complex` string
//! and a predicted output frame count. Video and audio chains are built
//! segment by segment so that every segment's audio duration matches its
//! video duration after the speed change, then concatenated.

use std::collections::BTreeMap;

use crate::descriptor::{CropKeyframe, Segment, TrimRange};
use crate::error::{ExportError, Result};

/// Frame rates within this distance are treated as equal (29.97 vs 30).
pub const INTERPOLATION_TOLERANCE: f64 = 0.5;

/// Segment boundaries closer than this are considered touching.
pub const SEGMENT_TOLERANCE: f64 = 1e-3;

const SPEED_EPSILON: f64 = 1e-6;

/// Whether the output needs motion-compensated frame-rate upconversion.
pub fn needs_interpolation(source_fps: f64, target_fps: f64) -> bool {
    target_fps > source_fps + INTERPOLATION_TOLERANCE
}

pub fn interpolation_ratio(source_fps: f64, target_fps: f64) -> f64 {
    if needs_interpolation(source_fps, target_fps) {
        target_fps / source_fps
    } else {
        1.0
    }
}

/// Build an `atempo` chain for `speed`.
///
/// A single atempo stage only accepts 0.5..=2.0, so more extreme speeds are
/// factored into repeated 2.0 or 0.5 stages plus a remainder.
pub fn build_atempo(speed: f64) -> String {
    if (speed - 1.0).abs() < SPEED_EPSILON {
        return String::new();
    }
    if (0.5..=2.0).contains(&speed) {
        return format!("atempo={}", fmt_float(speed));
    }

    let mut stages = Vec::new();
    let mut remaining = speed;
    while remaining > 2.0 {
        stages.push("atempo=2.0".to_string());
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push("atempo=0.5".to_string());
        remaining /= 0.5;
    }
    if (remaining - 1.0).abs() >= SPEED_EPSILON {
        stages.push(format!("atempo={}", fmt_float(remaining)));
    }
    stages.join(",")
}

/// CPU motion-compensated interpolation filter targeting `fps`.
pub fn minterpolate_filter(fps: f64) -> String {
    format!(
        "minterpolate=fps={}:mi_mode=mci:mc_mode=aobmc:me_mode=bidir:vsbmc=1:scd=fdiff",
        fmt_float(fps)
    )
}

/// Check that segments are ordered, non-empty, non-overlapping and gap-free.
///
/// With a trim range the segments must also start and end on the trim bounds;
/// without one the first segment must start at 0.
pub fn validate_segments(segments: &[Segment], trim: Option<&TrimRange>) -> Result<()> {
    for (i, seg) in segments.iter().enumerate() {
        if !seg.speed.is_finite() || seg.speed <= 0.0 {
            return Err(ExportError::FilterGraphConstruction(format!(
                "segment {i} has non-positive speed {}",
                seg.speed
            )));
        }
        if !(seg.duration() > SEGMENT_TOLERANCE) {
            return Err(ExportError::FilterGraphConstruction(format!(
                "segment {i} [{}, {}] has zero length",
                seg.start, seg.end
            )));
        }
    }

    for (i, pair) in segments.windows(2).enumerate() {
        let (prev, next) = (pair[0], pair[1]);
        if next.start < prev.end - SEGMENT_TOLERANCE {
            return Err(ExportError::FilterGraphConstruction(format!(
                "segment {} [{}, {}] overlaps segment {} [{}, {}]",
                i + 1,
                next.start,
                next.end,
                i,
                prev.start,
                prev.end
            )));
        }
        if next.start > prev.end + SEGMENT_TOLERANCE {
            return Err(ExportError::FilterGraphConstruction(format!(
                "gap between segment {} (ends {}) and segment {} (starts {})",
                i,
                prev.end,
                i + 1,
                next.start
            )));
        }
    }

    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return Ok(());
    };
    match trim {
        Some(trim)
            if (first.start - trim.start).abs() > SEGMENT_TOLERANCE
                || (last.end - trim.end).abs() > SEGMENT_TOLERANCE =>
        {
            return Err(ExportError::FilterGraphConstruction(format!(
                "segments [{}, {}] do not tile trim range [{}, {}]",
                first.start, last.end, trim.start, trim.end
            )));
        }
        None if first.start.abs() > SEGMENT_TOLERANCE => {
            return Err(ExportError::FilterGraphConstruction(format!(
                "first segment starts at {} but the timeline starts at 0",
                first.start
            )));
        }
        _ => {}
    }

    Ok(())
}

/// Compile crop keyframes into a `crop` filter.
///
/// The output size is fixed to the first keyframe (rounded down to even);
/// the offsets are linearly interpolated between keyframes over `t`, which
/// is shifted by `time_offset` when the frame sequence was pre-trimmed.
pub fn crop_filter(keyframes: &[CropKeyframe], time_offset: f64) -> Option<String> {
    let first = keyframes.first()?;
    let width = even(first.width);
    let height = even(first.height);

    let times: Vec<f64> = keyframes
        .iter()
        .map(|kf| (kf.time - time_offset).max(0.0))
        .collect();
    let xs: Vec<f64> = keyframes.iter().map(|kf| kf.x).collect();
    let ys: Vec<f64> = keyframes.iter().map(|kf| kf.y).collect();

    Some(format!(
        "crop=w={}:h={}:x={}:y={}",
        width,
        height,
        piecewise_linear(&times, &xs),
        piecewise_linear(&times, &ys)
    ))
}

fn piecewise_linear(times: &[f64], values: &[f64]) -> String {
    let constant = values.windows(2).all(|w| w[0] == w[1]);
    if constant || values.len() == 1 {
        return fmt_float(values[0]);
    }

    let last = values.len() - 1;
    let mut expr = fmt_float(values[last]);
    for i in (1..=last).rev() {
        let (t0, t1) = (times[i - 1], times[i]);
        let (v0, v1) = (values[i - 1], values[i]);
        let span = (t1 - t0).max(SEGMENT_TOLERANCE);
        let lerp = format!(
            "{}+({})*(t-{})/{}",
            fmt_float(v0),
            fmt_float(v1 - v0),
            fmt_float(t0),
            fmt_float(span)
        );
        expr = format!("if(lt(t,{}),{},{})", fmt_float(t1), lerp, expr);
    }
    format!("'if(lt(t,{}),{},{})'", fmt_float(times[0]), fmt_float(values[0]), expr)
}

fn even(v: f64) -> u32 {
    let v = v.max(2.0) as u32;
    v - v % 2
}

/// Format a float the way FFmpeg option values are written in this crate:
/// at most 6 decimals, always with a fractional part ("2.0", "0.75").
pub fn fmt_float(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    format!("{rounded:?}")
}

fn frames_in(duration: f64, fps: f64) -> u64 {
    (duration * fps + 1e-6).floor().max(0.0) as u64
}

fn is_half_speed(speed: f64) -> bool {
    (speed - 0.5).abs() < SPEED_EPSILON
}

fn is_unit_speed(speed: f64) -> bool {
    (speed - 1.0).abs() < SPEED_EPSILON
}

/// A slow-motion segment whose frames were already synthesized by an AI
/// backend and are provided as a separate image-sequence input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesizedSegment {
    pub input_index: usize,
    pub multiplier: u32,
}

/// Everything the compiler needs to know about one export.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    segments: Vec<Segment>,
    trim: Option<TrimRange>,
    source_fps: f64,
    target_fps: f64,
    total_duration: f64,
    frames_pre_trimmed: bool,
    video_input: usize,
    audio_input: Option<usize>,
    crop: Option<String>,
    synthesized: BTreeMap<usize, SynthesizedSegment>,
}

impl CompileRequest {
    /// `total_duration` is the duration of the video input (the frame
    /// sequence when frames were pre-trimmed, the source otherwise).
    pub fn new(source_fps: f64, target_fps: f64, total_duration: f64) -> Self {
        Self {
            segments: Vec::new(),
            trim: None,
            source_fps,
            target_fps,
            total_duration,
            frames_pre_trimmed: false,
            video_input: 0,
            audio_input: None,
            crop: None,
            synthesized: BTreeMap::new(),
        }
    }

    pub fn segments(mut self, segments: &[Segment]) -> Self {
        self.segments = segments.to_vec();
        self
    }

    pub fn trim(mut self, trim: Option<TrimRange>) -> Self {
        self.trim = trim;
        self
    }

    pub fn frames_pre_trimmed(mut self, pre_trimmed: bool) -> Self {
        self.frames_pre_trimmed = pre_trimmed;
        self
    }

    pub fn video_input(mut self, index: usize) -> Self {
        self.video_input = index;
        self
    }

    /// Include audio, read from input `index`.
    pub fn audio_input(mut self, index: Option<usize>) -> Self {
        self.audio_input = index;
        self
    }

    pub fn crop(mut self, filter: Option<String>) -> Self {
        self.crop = filter;
        self
    }

    /// Mark segment `segment_index` as provided by a synthesized input.
    pub fn synthesized(mut self, segment_index: usize, segment: SynthesizedSegment) -> Self {
        self.synthesized.insert(segment_index, segment);
        self
    }

    pub fn compile(&self) -> Result<CompiledGraph> {
        FilterGraphCompiler::compile(self)
    }
}

/// Output of the compiler: the graph, the labels to map, and the predicted frame count.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGraph {
    pub graph: String,
    pub video_label: String,
    pub audio_label: Option<String>,
    pub expected_frames: u64,
    pub needs_interpolation: bool,
    pub ratio: f64,
    /// Per emitted segment, frames before frame-rate upconversion.
    pub segment_frames: Vec<u64>,
}

pub struct FilterGraphCompiler;

impl FilterGraphCompiler {
    pub fn compile(req: &CompileRequest) -> Result<CompiledGraph> {
        if !(req.source_fps > 0.0) || !(req.target_fps > 0.0) {
            return Err(ExportError::FilterGraphConstruction(format!(
                "frame rates must be positive (source {}, target {})",
                req.source_fps, req.target_fps
            )));
        }

        let needs = needs_interpolation(req.source_fps, req.target_fps);
        let ratio = interpolation_ratio(req.source_fps, req.target_fps);

        if req.segments.is_empty() {
            Self::compile_single(req, needs, ratio)
        } else {
            validate_segments(&req.segments, req.trim.as_ref())?;
            Self::compile_segments(req, needs, ratio)
        }
    }

    fn compile_segments(req: &CompileRequest, needs: bool, ratio: f64) -> Result<CompiledGraph> {
        let fs = req.source_fps;
        let ft = req.target_fps;
        let offset = match (req.frames_pre_trimmed, req.trim) {
            (true, Some(trim)) => trim.start,
            _ => 0.0,
        };

        let mut chains = Vec::new();
        let mut segment_frames = Vec::new();
        // Synthesized segments reach the concat already resampled to the
        // target rate, so only the rest is scaled by the upconversion ratio.
        let mut source_rate_frames = 0u64;
        let mut target_rate_frames = 0u64;

        for (i, seg) in req.segments.iter().enumerate() {
            let start = (seg.start - offset).clamp(0.0, req.total_duration);
            let end = (seg.end - offset).clamp(0.0, req.total_duration);
            if end - start <= SEGMENT_TOLERANCE {
                log::debug!(
                    "Skipping segment {} [{:.3}, {:.3}]: empty after clamping to {:.3}s",
                    i,
                    seg.start,
                    seg.end,
                    req.total_duration
                );
                continue;
            }
            let duration = end - start;
            let n = segment_frames.len();

            let (video, frames) = if let Some(syn) = req.synthesized.get(&i) {
                target_rate_frames += frames_in(duration / seg.speed, ft);
                (
                    format!(
                        "[{}:v]fps={},setpts=PTS-STARTPTS[v{n}]",
                        syn.input_index,
                        fmt_float(ft)
                    ),
                    frames_in(duration / seg.speed, fs),
                )
            } else {
                let mut filters = vec![format!(
                    "trim=start={}:end={}",
                    fmt_float(start),
                    fmt_float(end)
                )];
                if let Some(ref crop) = req.crop {
                    filters.push(crop.clone());
                }
                let frames = if is_half_speed(seg.speed) {
                    filters.push("setpts=PTS-STARTPTS".to_string());
                    filters.push(minterpolate_filter(2.0 * ft));
                    filters.push("setpts=2.0*PTS".to_string());
                    2 * frames_in(duration, fs)
                } else if is_unit_speed(seg.speed) {
                    filters.push("setpts=PTS-STARTPTS".to_string());
                    frames_in(duration, fs)
                } else {
                    filters.push(format!("setpts=(PTS-STARTPTS)/{}", fmt_float(seg.speed)));
                    frames_in(duration / seg.speed, fs)
                };
                source_rate_frames += frames;
                (
                    format!("[{}:v]{}[v{n}]", req.video_input, filters.join(",")),
                    frames,
                )
            };
            chains.push(video);

            if let Some(audio_input) = req.audio_input {
                // Audio always comes from the untouched source: map the clamped
                // video window back to source times.
                let mut filters = vec![
                    format!(
                        "atrim=start={}:end={}",
                        fmt_float(start + offset),
                        fmt_float(end + offset)
                    ),
                    "asetpts=PTS-STARTPTS".to_string(),
                ];
                let tempo = build_atempo(seg.speed);
                if !tempo.is_empty() {
                    filters.push(tempo);
                }
                chains.push(format!("[{audio_input}:a]{}[a{n}]", filters.join(",")));
            }

            segment_frames.push(frames);
        }

        let count = segment_frames.len();
        if count == 0 {
            return Err(ExportError::FilterGraphConstruction(format!(
                "no segment overlaps the {:.3}s frame sequence",
                req.total_duration
            )));
        }

        let video_inputs: String = (0..count).map(|n| format!("[v{n}]")).collect();
        chains.push(format!("{video_inputs}concat=n={count}:v=1:a=0[vcat]"));

        let audio_label = req.audio_input.map(|_| {
            let audio_inputs: String = (0..count).map(|n| format!("[a{n}]")).collect();
            chains.push(format!("{audio_inputs}concat=n={count}:v=0:a=1[aout]"));
            "aout".to_string()
        });

        let video_label = if needs {
            chains.push(format!("[vcat]{}[vout]", minterpolate_filter(ft)));
            "vout"
        } else {
            "vcat"
        };

        Ok(CompiledGraph {
            graph: chains.join(";"),
            video_label: video_label.to_string(),
            audio_label,
            expected_frames: scale_frames(source_rate_frames, ratio) + target_rate_frames,
            needs_interpolation: needs,
            ratio,
            segment_frames,
        })
    }

    fn compile_single(req: &CompileRequest, needs: bool, ratio: f64) -> Result<CompiledGraph> {
        let mut chains = Vec::new();
        let mut filters = Vec::new();

        let duration = match req.trim {
            Some(trim) if req.frames_pre_trimmed => trim.duration().min(req.total_duration),
            Some(trim) => {
                filters.push(format!(
                    "trim=start={}:end={}",
                    fmt_float(trim.start),
                    fmt_float(trim.end)
                ));
                filters.push("setpts=PTS-STARTPTS".to_string());
                let end = if req.total_duration > 0.0 {
                    trim.end.min(req.total_duration)
                } else {
                    trim.end
                };
                (end - trim.start).max(0.0)
            }
            None => req.total_duration,
        };

        if let Some(ref crop) = req.crop {
            filters.push(crop.clone());
        }
        if needs {
            filters.push(minterpolate_filter(req.target_fps));
        }
        if filters.is_empty() {
            filters.push("null".to_string());
        }
        chains.push(format!("[{}:v]{}[vout]", req.video_input, filters.join(",")));

        let audio_label = req.audio_input.map(|audio_input| {
            let audio = match req.trim {
                Some(trim) => format!(
                    "atrim=start={}:end={},asetpts=PTS-STARTPTS",
                    fmt_float(trim.start),
                    fmt_float(trim.end)
                ),
                None => "anull".to_string(),
            };
            chains.push(format!("[{audio_input}:a]{audio}[aout]"));
            "aout".to_string()
        });

        let frames = frames_in(duration, req.source_fps);
        Ok(CompiledGraph {
            graph: chains.join(";"),
            video_label: "vout".to_string(),
            audio_label,
            expected_frames: scale_frames(frames, ratio),
            needs_interpolation: needs,
            ratio,
            segment_frames: vec![frames],
        })
    }
}

fn scale_frames(frames: u64, ratio: f64) -> u64 {
    (frames as f64 * ratio + 1e-6).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_atempo() {
        assert_eq!(build_atempo(1.0), "");
        assert_eq!(build_atempo(0.5), "atempo=0.5");
        assert_eq!(build_atempo(1.5), "atempo=1.5");
        assert_eq!(build_atempo(2.0), "atempo=2.0");
        assert_eq!(build_atempo(4.0), "atempo=2.0,atempo=2.0");
        assert_eq!(build_atempo(0.25), "atempo=0.5,atempo=0.5");
        assert_eq!(build_atempo(3.0), "atempo=2.0,atempo=1.5");
        assert_eq!(build_atempo(8.0), "atempo=2.0,atempo=2.0,atempo=2.0");
        assert_eq!(build_atempo(0.3), "atempo=0.5,atempo=0.6");
    }

    #[test]
    fn test_atempo_stages_stay_in_range() {
        for speed in [0.1, 0.2, 0.33, 0.75, 1.25, 2.5, 5.0, 10.0, 16.0] {
            let chain = build_atempo(speed);
            let mut product = 1.0;
            for stage in chain.split(',') {
                let value: f64 = stage.trim_start_matches("atempo=").parse().unwrap();
                assert!((0.5..=2.0).contains(&value), "{speed}: {chain}");
                product *= value;
            }
            assert!((product - speed).abs() < 1e-4, "{speed}: {chain}");
        }
    }

    #[test]
    fn test_needs_interpolation() {
        assert!(!needs_interpolation(29.97, 30.0));
        assert!(!needs_interpolation(30.0, 30.0));
        assert!(!needs_interpolation(60.0, 30.0));
        assert!(needs_interpolation(30.0, 60.0));
        assert_eq!(interpolation_ratio(30.0, 60.0), 2.0);
        assert_eq!(interpolation_ratio(29.97, 30.0), 1.0);
    }

    #[test]
    fn test_slow_motion_segment_frames() {
        let segments = [Segment::new(0.0, 0.54, 1.0), Segment::new(0.54, 6.0, 0.5)];
        let graph = CompileRequest::new(30.0, 30.0, 6.0)
            .segments(&segments)
            .audio_input(Some(0))
            .compile()
            .unwrap();

        assert_eq!(graph.segment_frames, vec![16, 326]);
        assert_eq!(graph.expected_frames, 342);
        assert!(!graph.needs_interpolation);
        assert_eq!(graph.video_label, "vcat");
        assert_eq!(graph.audio_label.as_deref(), Some("aout"));
        assert!(graph.graph.contains(
            "[0:v]trim=start=0.54:end=6.0,setpts=PTS-STARTPTS,minterpolate=fps=60.0"
        ));
        assert!(graph.graph.contains("setpts=2.0*PTS[v1]"));
        assert!(graph.graph.contains(
            "[0:a]atrim=start=0.54:end=6.0,asetpts=PTS-STARTPTS,atempo=0.5[a1]"
        ));
        // Unit-speed audio gets no tempo stage.
        assert!(graph.graph.contains("[0:a]atrim=start=0.0:end=0.54,asetpts=PTS-STARTPTS[a0]"));
        assert!(graph.graph.contains("[v0][v1]concat=n=2:v=1:a=0[vcat]"));
        assert!(graph.graph.contains("[a0][a1]concat=n=2:v=0:a=1[aout]"));
    }

    #[test]
    fn test_trim_only_with_upconversion() {
        let graph = CompileRequest::new(30.0, 60.0, 20.0)
            .trim(Some(TrimRange::new(2.0, 12.0)))
            .audio_input(Some(0))
            .compile()
            .unwrap();

        assert!(graph.needs_interpolation);
        assert_eq!(graph.ratio, 2.0);
        assert_eq!(graph.expected_frames, 600);
        assert!(graph.graph.starts_with(
            "[0:v]trim=start=2.0:end=12.0,setpts=PTS-STARTPTS,minterpolate=fps=60.0"
        ));
        assert!(graph.graph.contains("[0:a]atrim=start=2.0:end=12.0,asetpts=PTS-STARTPTS[aout]"));
    }

    #[test]
    fn test_pre_trimmed_frames_skip_video_trim() {
        let graph = CompileRequest::new(30.0, 30.0, 10.0)
            .trim(Some(TrimRange::new(2.0, 12.0)))
            .frames_pre_trimmed(true)
            .audio_input(Some(1))
            .compile()
            .unwrap();

        assert!(graph.graph.starts_with("[0:v]null[vout]"));
        assert!(graph.graph.contains("[1:a]atrim=start=2.0:end=12.0"));
        assert_eq!(graph.expected_frames, 300);
    }

    #[test]
    fn test_pre_trimmed_segments_are_translated_but_audio_is_not() {
        let segments = [Segment::new(2.0, 5.0, 1.0), Segment::new(5.0, 8.0, 2.0)];
        let graph = CompileRequest::new(30.0, 30.0, 6.0)
            .segments(&segments)
            .trim(Some(TrimRange::new(2.0, 8.0)))
            .frames_pre_trimmed(true)
            .audio_input(Some(1))
            .compile()
            .unwrap();

        assert!(graph.graph.contains("[0:v]trim=start=0.0:end=3.0"));
        assert!(graph.graph.contains("[0:v]trim=start=3.0:end=6.0,setpts=(PTS-STARTPTS)/2.0[v1]"));
        assert!(graph.graph.contains("[1:a]atrim=start=5.0:end=8.0,asetpts=PTS-STARTPTS,atempo=2.0[a1]"));
        assert_eq!(graph.segment_frames, vec![90, 45]);
    }

    #[test]
    fn test_segments_outside_sequence_are_skipped() {
        let segments = [Segment::new(0.0, 4.0, 1.0), Segment::new(4.0, 9.0, 1.0)];
        let graph = CompileRequest::new(30.0, 30.0, 4.0)
            .segments(&segments)
            .compile()
            .unwrap();

        assert_eq!(graph.segment_frames, vec![120]);
        assert!(graph.graph.contains("[v0]concat=n=1:v=1:a=0[vcat]"));
        assert!(graph.audio_label.is_none());
        assert!(!graph.graph.contains(":a]"));
    }

    #[test]
    fn test_synthesized_segment_uses_its_own_input() {
        let segments = [Segment::new(0.0, 2.0, 1.0), Segment::new(2.0, 4.0, 0.25)];
        let graph = CompileRequest::new(30.0, 30.0, 4.0)
            .segments(&segments)
            .synthesized(
                1,
                SynthesizedSegment {
                    input_index: 2,
                    multiplier: 4,
                },
            )
            .compile()
            .unwrap();

        assert!(graph.graph.contains("[2:v]fps=30.0,setpts=PTS-STARTPTS[v1]"));
        assert_eq!(graph.segment_frames, vec![60, 240]);
    }

    #[test]
    fn test_synthesized_segment_is_not_upconverted_twice() {
        let segments = [Segment::new(0.0, 2.0, 1.0), Segment::new(2.0, 4.0, 0.5)];
        let graph = CompileRequest::new(30.0, 60.0, 4.0)
            .segments(&segments)
            .synthesized(
                1,
                SynthesizedSegment {
                    input_index: 2,
                    multiplier: 2,
                },
            )
            .compile()
            .unwrap();

        assert!(graph.needs_interpolation);
        assert!(graph.graph.contains("[2:v]fps=60.0,setpts=PTS-STARTPTS[v1]"));
        assert_eq!(graph.segment_frames, vec![60, 120]);
        // 2s at 60 fps plus 4s of slowed playback at 60 fps.
        assert_eq!(graph.expected_frames, 120 + 240);
    }

    #[test]
    fn test_clamped_segment_audio_matches_video() {
        let segments = [Segment::new(2.0, 5.0, 1.0), Segment::new(5.0, 8.0, 1.0)];
        let graph = CompileRequest::new(30.0, 30.0, 5.5)
            .segments(&segments)
            .trim(Some(TrimRange::new(2.0, 8.0)))
            .frames_pre_trimmed(true)
            .audio_input(Some(1))
            .compile()
            .unwrap();

        assert!(graph.graph.contains("[0:v]trim=start=3.0:end=5.5"));
        assert!(graph.graph.contains("[1:a]atrim=start=5.0:end=7.5,asetpts=PTS-STARTPTS[a1]"));
        assert_eq!(graph.segment_frames, vec![90, 75]);
    }

    #[test]
    fn test_untrimmed_segments_must_start_at_zero() {
        let late = [Segment::new(1.0, 3.0, 1.0), Segment::new(3.0, 4.0, 0.5)];
        let err = CompileRequest::new(30.0, 30.0, 4.0)
            .segments(&late)
            .compile()
            .unwrap_err();
        assert!(matches!(err, ExportError::FilterGraphConstruction(_)));
        assert!(validate_segments(&late, None).is_err());
        assert!(validate_segments(&late, Some(&TrimRange::new(1.0, 4.0))).is_ok());
    }

    #[test]
    fn test_rejects_malformed_segments() {
        let overlapping = [Segment::new(0.0, 3.0, 1.0), Segment::new(2.0, 4.0, 1.0)];
        let err = CompileRequest::new(30.0, 30.0, 4.0)
            .segments(&overlapping)
            .compile()
            .unwrap_err();
        assert!(matches!(err, ExportError::FilterGraphConstruction(_)));

        let empty = [Segment::new(1.0, 1.0, 1.0)];
        assert!(CompileRequest::new(30.0, 30.0, 4.0).segments(&empty).compile().is_err());

        let stopped = [Segment::new(0.0, 1.0, 0.0)];
        assert!(CompileRequest::new(30.0, 30.0, 4.0).segments(&stopped).compile().is_err());
    }

    #[test]
    fn test_validate_segments_against_trim() {
        let segments = [Segment::new(1.0, 3.0, 1.0), Segment::new(3.0, 5.0, 0.5)];
        assert!(validate_segments(&segments, Some(&TrimRange::new(1.0, 5.0))).is_ok());
        assert!(validate_segments(&segments, Some(&TrimRange::new(0.0, 5.0))).is_err());

        let gap = [Segment::new(0.0, 1.0, 1.0), Segment::new(1.5, 2.0, 1.0)];
        assert!(validate_segments(&gap, None).is_err());
    }

    #[test]
    fn test_crop_filter() {
        assert_eq!(crop_filter(&[], 0.0), None);

        let kf = |time, x| CropKeyframe {
            time,
            x,
            y: 20.0,
            width: 641.0,
            height: 360.0,
        };
        let fixed = crop_filter(&[kf(0.0, 100.0)], 0.0).unwrap();
        assert_eq!(fixed, "crop=w=640:h=360:x=100.0:y=20.0");

        let moving = crop_filter(&[kf(1.0, 0.0), kf(3.0, 100.0)], 0.0).unwrap();
        assert_eq!(
            moving,
            "crop=w=640:h=360:x='if(lt(t,1.0),0.0,if(lt(t,3.0),0.0+(100.0)*(t-1.0)/2.0,100.0))':y=20.0"
        );
    }
}
