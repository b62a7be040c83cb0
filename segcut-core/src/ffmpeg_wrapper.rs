use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

/// Name pattern for every PNG frame sequence this crate reads or writes.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// File name of the `index`-th frame (1-based) in a sequence.
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{index:06}.png")
}

/// One `-i` input together with the options that precede it.
#[derive(Debug, Clone)]
struct FFmpegInput {
    options: Vec<OsString>,
    path: PathBuf,
}

/// FFmpeg command builder with fluent interface
#[derive(Debug, Clone)]
pub struct FFmpegCommand {
    program: PathBuf,
    inputs: Vec<FFmpegInput>,
    output: PathBuf,
    filter_complex: Option<String>,
    maps: Vec<String>,
    video_codec: Option<String>,
    audio_codec: Option<String>,
    quality: Option<u8>,
    preset: Option<String>,
    threads: Option<usize>,
    frame_rate: Option<f64>,
    pass: Option<(u8, PathBuf)>,
    format: Option<String>,
    no_audio: bool,
    overwrite: bool,
    extra_args: Vec<String>,
}

impl FFmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            filter_complex: None,
            maps: Vec::new(),
            video_codec: None,
            audio_codec: None,
            quality: None,
            preset: None,
            threads: None,
            frame_rate: None,
            pass: None,
            format: None,
            no_audio: false,
            overwrite: false,
            extra_args: Vec::new(),
        }
    }

    /// Run `program` instead of `ffmpeg` from PATH
    pub fn program(mut self, program: impl AsRef<Path>) -> Self {
        self.program = program.as_ref().to_path_buf();
        self
    }

    /// Add a plain input file
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(path, Vec::<String>::new())
    }

    /// Add an input preceded by input options (e.g. `-ss`, `-framerate`)
    pub fn input_with<I, S>(mut self, path: impl AsRef<Path>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.inputs.push(FFmpegInput {
            options: options.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    /// Add a numbered PNG frame sequence read at `fps`
    pub fn image_sequence(self, dir: impl AsRef<Path>, fps: f64) -> Self {
        let fps = crate::filter_graph::fmt_float(fps);
        self.input_with(
            dir.as_ref().join(FRAME_PATTERN),
            ["-framerate", fps.as_str(), "-start_number", "1"],
        )
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Set the complete filter graph
    pub fn filter_complex(mut self, graph: &str) -> Self {
        self.filter_complex = Some(graph.to_string());
        self
    }

    /// Map a filter graph output label
    pub fn map_label(mut self, label: &str) -> Self {
        self.maps.push(format!("[{}]", label));
        self
    }

    /// Set video codec
    pub fn video_codec(mut self, codec: &str) -> Self {
        self.video_codec = Some(codec.to_string());
        self
    }

    /// Set audio codec
    pub fn audio_codec(mut self, codec: &str) -> Self {
        self.audio_codec = Some(codec.to_string());
        self
    }

    /// Set quality (CRF value)
    pub fn quality(mut self, crf: u8) -> Self {
        self.quality = Some(crf);
        self
    }

    /// Set encoding preset (ultrafast, fast, medium, slow, veryslow)
    pub fn preset(mut self, preset: &str) -> Self {
        self.preset = Some(preset.to_string());
        self
    }

    /// Set number of threads
    pub fn threads(mut self, count: usize) -> Self {
        self.threads = Some(count);
        self
    }

    /// Set the output frame rate
    pub fn frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Select pass `number` of a two-pass encode sharing `log_prefix`
    pub fn pass(mut self, number: u8, log_prefix: impl AsRef<Path>) -> Self {
        self.pass = Some((number, log_prefix.as_ref().to_path_buf()));
        self
    }

    /// Force the output container format
    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    /// Drop audio from the output
    pub fn no_audio(mut self) -> Self {
        self.no_audio = true;
        self
    }

    /// Enable overwrite without asking
    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    /// Add custom FFmpeg arguments
    pub fn custom_args(mut self, args: Vec<String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    /// Full argument list, without the program name
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into()];

        if self.overwrite {
            args.push("-y".into());
        }

        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".into());
            args.push(input.path.clone().into_os_string());
        }

        if let Some(ref graph) = self.filter_complex {
            args.push("-filter_complex".into());
            args.push(graph.into());
        }

        for map in &self.maps {
            args.push("-map".into());
            args.push(map.into());
        }

        if let Some(ref codec) = self.video_codec {
            args.push("-c:v".into());
            args.push(codec.into());
        }

        if self.no_audio {
            args.push("-an".into());
        } else if let Some(ref codec) = self.audio_codec {
            args.push("-c:a".into());
            args.push(codec.into());
        }

        if let Some(crf) = self.quality {
            args.push("-crf".into());
            args.push(crf.to_string().into());
        }

        if let Some(ref preset) = self.preset {
            args.push("-preset".into());
            args.push(preset.into());
        }

        if let Some(threads) = self.threads {
            args.push("-threads".into());
            args.push(threads.to_string().into());
        }

        if let Some(fps) = self.frame_rate {
            args.push("-r".into());
            args.push(crate::filter_graph::fmt_float(fps).into());
        }

        if let Some((number, ref log_prefix)) = self.pass {
            args.push("-pass".into());
            args.push(number.to_string().into());
            args.push("-passlogfile".into());
            args.push(log_prefix.clone().into_os_string());
        }

        for arg in &self.extra_args {
            args.push(arg.into());
        }

        if let Some(ref format) = self.format {
            args.push("-f".into());
            args.push(format.into());
        }

        args.push(self.output.clone().into_os_string());
        args
    }

    /// Build the FFmpeg command
    pub fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args());
        cmd
    }

    /// Run FFmpeg, handing every stderr line to `on_line` as it arrives.
    ///
    /// The child is killed if this function returns early with an error.
    pub fn execute<F>(&self, on_line: F) -> Result<FFmpegOutput>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let mut cmd = self.build();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        log::info!("Executing FFmpeg command: {:?}", cmd);

        let child = cmd.spawn().context("Failed to spawn FFmpeg process")?;
        run_monitored(child, on_line)
    }
}

/// Exit status and captured stderr of a finished FFmpeg run
#[derive(Debug, Clone)]
pub struct FFmpegOutput {
    pub status: ExitStatus,
    pub diagnostics: String,
}

impl FFmpegOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Kills the wrapped child on drop unless it was waited on successfully.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn wait(&mut self) -> Result<ExitStatus> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Process already reaped"))?;
        let status = child.wait().context("Failed to wait for FFmpeg process")?;
        self.child = None;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            log::warn!("Killing FFmpeg process {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Stream a child's stderr through `on_line` on a reader thread, collecting it for diagnostics.
pub(crate) fn run_monitored<F>(mut child: Child, mut on_line: F) -> Result<FFmpegOutput>
where
    F: FnMut(&str) + Send + 'static,
{
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stderr"))?;
    let mut guard = ChildGuard { child: Some(child) };

    let reader_thread = thread::spawn(move || {
        let reader = BufReader::new(stderr);
        let mut all_output = String::new();
        // FFmpeg separates progress updates with '\r', not '\n'.
        for chunk in reader.split(b'\r').map_while(Result::ok) {
            let text = String::from_utf8_lossy(&chunk);
            for line in text.lines() {
                all_output.push_str(line);
                all_output.push('\n');
                on_line(line);
            }
        }
        all_output
    });

    let status = guard.wait()?;

    let diagnostics = reader_thread
        .join()
        .map_err(|_| anyhow::anyhow!("FFmpeg output reader panicked"))?;

    Ok(FFmpegOutput {
        status,
        diagnostics,
    })
}

/// Check if FFmpeg is available and return version info
pub fn check_ffmpeg() -> Result<String> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .context("FFmpeg not found. Please install FFmpeg.")?;

    let version = String::from_utf8_lossy(&output.stdout);

    let version_regex = Regex::new(r"ffmpeg version (\S+)")?;
    if let Some(caps) = version_regex.captures(&version) {
        Ok(caps[1].to_string())
    } else {
        Ok("unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub rotation: i32,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den != 0.0 && num > 0.0).then(|| num / den)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
pub fn parse_video_info(json: &str) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_str(json).context("Invalid ffprobe JSON")?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow::anyhow!("No video stream found"))?;

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);

    let rotation = video
        .tags
        .get("rotate")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse().ok())
        .or_else(|| {
            video
                .side_data_list
                .iter()
                .find_map(|sd| sd.get("rotation").and_then(|r| r.as_i64()))
                .map(|r| r as i32)
        })
        .unwrap_or(0);

    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoInfo {
        duration,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps,
        rotation,
        has_audio,
    })
}

/// Get video metadata using ffprobe
pub fn get_video_info(path: impl AsRef<Path>) -> Result<VideoInfo> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path.as_ref())
        .output()
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed on {:?} with exit code {:?}",
            path.as_ref(),
            output.status.code()
        );
    }

    parse_video_info(&String::from_utf8_lossy(&output.stdout))
}

/// Decode `duration` seconds of `input` starting at `start` into a PNG
/// sequence in `dir`, optionally through `video_filter`. Returns the number
/// of frames written.
pub fn extract_frames(
    input: impl AsRef<Path>,
    dir: impl AsRef<Path>,
    start: f64,
    duration: Option<f64>,
    video_filter: Option<&str>,
) -> Result<usize> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create frame directory {:?}", dir))?;

    let mut input_options = vec!["-ss".to_string(), crate::filter_graph::fmt_float(start)];
    if let Some(duration) = duration {
        input_options.push("-t".to_string());
        input_options.push(crate::filter_graph::fmt_float(duration));
    }

    let mut extra = vec!["-fps_mode".to_string(), "passthrough".to_string()];
    if let Some(filter) = video_filter {
        extra.push("-vf".to_string());
        extra.push(filter.to_string());
    }

    let cmd = FFmpegCommand::new(dir.join(FRAME_PATTERN))
        .input_with(input.as_ref(), input_options)
        .no_audio()
        .overwrite()
        .custom_args(extra);

    let output = cmd.execute(|_| {})?;
    if !output.success() {
        log::error!("Frame extraction failed:\n{}", output.diagnostics);
        anyhow::bail!(
            "Frame extraction failed with exit code: {:?}",
            output.status.code()
        );
    }

    count_frames(dir)
}

/// Number of `frame_*.png` files in `dir`
pub fn count_frames(dir: impl AsRef<Path>) -> Result<usize> {
    Ok(list_frames(dir)?.len())
}

/// Sorted `frame_*.png` paths in `dir`
pub fn list_frames(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read frame directory {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("frame_") && n.ends_with(".png"))
        })
        .collect();
    frames.sort();
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &FFmpegCommand) -> Vec<String> {
        cmd.args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_multi_input_command() {
        let cmd = FFmpegCommand::new("/tmp/out.mp4")
            .image_sequence("/tmp/frames", 30.0)
            .input("/tmp/source.mp4")
            .filter_complex("[0:v]null[vout];[1:a]anull[aout]")
            .map_label("vout")
            .map_label("aout")
            .video_codec("libx264")
            .audio_codec("aac")
            .quality(18)
            .preset("slow")
            .frame_rate(30.0)
            .overwrite();

        let args = args_of(&cmd);
        let joined = args.join(" ");
        assert!(joined.starts_with("-hide_banner -nostdin -y -framerate 30.0 -start_number 1 -i /tmp/frames/frame_%06d.png -i /tmp/source.mp4"));
        assert!(joined.contains("-filter_complex [0:v]null[vout];[1:a]anull[aout]"));
        assert!(joined.contains("-map [vout] -map [aout]"));
        assert!(joined.contains("-c:v libx264 -c:a aac -crf 18 -preset slow -r 30.0"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        assert_eq!(cmd.input_count(), 2);
    }

    #[test]
    fn test_analysis_pass_command() {
        let cmd = FFmpegCommand::new("/dev/null")
            .input("in.mp4")
            .video_codec("libvpx-vp9")
            .audio_codec("libopus")
            .no_audio()
            .pass(1, "/tmp/passlog")
            .format("null");
        let joined = args_of(&cmd).join(" ");
        assert!(joined.contains("-an"));
        assert!(!joined.contains("libopus"));
        assert!(joined.contains("-pass 1 -passlogfile /tmp/passlog -f null /dev/null"));
    }

    #[test]
    fn test_parse_video_info() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "r_frame_rate": "30000/1001", "avg_frame_rate": "30000/1001",
                 "side_data_list": [{"rotation": -90}]},
                {"codec_type": "audio"}
            ],
            "format": {"duration": "12.500000"}
        }"#;
        let info = parse_video_info(json).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.duration, 12.5);
        assert_eq!(info.rotation, -90);
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_video_info_without_video() {
        assert!(parse_video_info(r#"{"streams": [{"codec_type": "audio"}]}"#).is_err());
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
    }

    #[test]
    fn test_frame_file_name_matches_pattern() {
        assert_eq!(frame_file_name(1), "frame_000001.png");
        assert_eq!(frame_file_name(123456), "frame_123456.png");
    }
}
