use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::display::Geometry;

const EVEN_SIZE_FILTER: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

/// Platform grabber the encoder reads the screen from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputBackend {
    Gdigrab,
    X11grab,
    Avfoundation,
}

impl InputBackend {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            InputBackend::Gdigrab
        } else if cfg!(target_os = "macos") {
            InputBackend::Avfoundation
        } else {
            InputBackend::X11grab
        }
    }
}

impl Default for InputBackend {
    fn default() -> Self {
        Self::platform_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    #[default]
    Mkv,
    Webm,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Webm => "webm",
        }
    }

    pub fn muxer(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mkv => "matroska",
            OutputFormat::Webm => "webm",
        }
    }
}

/// How to invoke the external encoder. Shared by capture, screenshot,
/// concatenation and the version probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: String,
    /// Prepended to every invocation, e.g. a wrapper script.
    pub leading_args: Vec<String>,
    pub input: InputBackend,
    pub x11_display: String,
    pub avfoundation_device: String,
    pub grace_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            leading_args: Vec::new(),
            input: InputBackend::platform_default(),
            x11_display: ":0.0".to_string(),
            avfoundation_device: "1:none".to_string(),
            grace_ms: 5000,
        }
    }
}

impl EncoderConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Full argument vector for one invocation.
    pub fn command_args(&self, args: Vec<String>) -> Vec<String> {
        let mut full = self.leading_args.clone();
        full.extend(args);
        full
    }
}

/// Immutable settings snapshot for one bounded (or open-ended) capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureJobSpec {
    pub geometry: Option<Geometry>,
    pub frame_rate: u32,
    pub bit_rate_kbps: u32,
    pub duration_cap: Option<Duration>,
    pub format: OutputFormat,
    pub output_path: PathBuf,
}

fn input_args(
    encoder: &EncoderConfig,
    geometry: Option<Geometry>,
    frame_rate: Option<u32>,
) -> (Vec<String>, String) {
    let mut args: Vec<String> = Vec::new();
    let mut filter = EVEN_SIZE_FILTER.to_string();

    match encoder.input {
        InputBackend::Gdigrab => {
            args.extend([s("-f"), s("gdigrab")]);
            if let Some(fps) = frame_rate {
                args.extend([s("-framerate"), fps.to_string()]);
            }
            if let Some(g) = geometry {
                args.extend([
                    s("-offset_x"),
                    g.x.to_string(),
                    s("-offset_y"),
                    g.y.to_string(),
                    s("-video_size"),
                    format!("{}x{}", g.width, g.height),
                ]);
            }
            args.extend([s("-i"), s("desktop")]);
        }
        InputBackend::X11grab => {
            args.extend([s("-f"), s("x11grab")]);
            if let Some(fps) = frame_rate {
                args.extend([s("-framerate"), fps.to_string()]);
            }
            let source = match geometry {
                Some(g) => {
                    args.extend([s("-video_size"), format!("{}x{}", g.width, g.height)]);
                    format!("{}+{},{}", encoder.x11_display, g.x, g.y)
                }
                None => encoder.x11_display.clone(),
            };
            args.extend([s("-i"), source]);
        }
        InputBackend::Avfoundation => {
            args.extend([s("-f"), s("avfoundation")]);
            if let Some(fps) = frame_rate {
                args.extend([s("-framerate"), fps.to_string()]);
            }
            args.extend([s("-i"), encoder.avfoundation_device.clone()]);
            // avfoundation grabs the whole screen, crop in the filter chain
            if let Some(g) = geometry {
                filter = format!("crop={}:{}:{}:{},{}", g.width, g.height, g.x, g.y, filter);
            }
        }
    }

    (args, filter)
}

pub fn capture_args(encoder: &EncoderConfig, job: &CaptureJobSpec) -> Vec<String> {
    let (mut args, filter) = input_args(encoder, job.geometry, Some(job.frame_rate));

    args.extend([s("-vf"), filter]);

    match job.format {
        OutputFormat::Webm => {
            args.extend([
                s("-c:v"),
                s("libvpx-vp9"),
                s("-deadline"),
                s("realtime"),
            ]);
        }
        OutputFormat::Mp4 | OutputFormat::Mkv => {
            args.extend([
                s("-c:v"),
                s("libx264"),
                s("-preset"),
                s("ultrafast"),
            ]);
        }
    }

    args.extend([
        s("-pix_fmt"),
        s("yuv420p"),
        s("-b:v"),
        format!("{}k", job.bit_rate_kbps),
        s("-bufsize"),
        format!("{}k", job.bit_rate_kbps.saturating_mul(2)),
        s("-g"),
        job.frame_rate.saturating_mul(2).to_string(),
        s("-f"),
        s(job.format.muxer()),
    ]);

    if let Some(cap) = job.duration_cap {
        args.extend([s("-t"), format_secs(cap)]);
    }

    args.extend([s("-y"), job.output_path.to_string_lossy().into_owned()]);
    args
}

pub fn screenshot_args(
    encoder: &EncoderConfig,
    geometry: Option<Geometry>,
    output: &Path,
) -> Vec<String> {
    let (mut args, filter) = input_args(encoder, geometry, None);
    if encoder.input == InputBackend::Avfoundation && geometry.is_some() {
        args.extend([s("-vf"), filter]);
    }
    args.extend([
        s("-vframes"),
        s("1"),
        s("-y"),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Stream-copy concatenation of the files named in `list`.
pub fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        s("-f"),
        s("concat"),
        s("-safe"),
        s("0"),
        s("-i"),
        list.to_string_lossy().into_owned(),
        s("-c"),
        s("copy"),
        s("-y"),
        output.to_string_lossy().into_owned(),
    ]
}

/// Body of a concat demuxer list file, one `file '<path>'` line per entry.
pub fn concat_list(paths: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in paths {
        let escaped = path.to_string_lossy().replace('\'', "'\\''");
        out.push_str(&format!("file '{}'\n", escaped));
    }
    out
}

pub fn version_args() -> Vec<String> {
    vec![s("-version")]
}

fn s(value: &str) -> String {
    value.to_string()
}

fn format_secs(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.3}", duration.as_secs_f64())
    }
}
