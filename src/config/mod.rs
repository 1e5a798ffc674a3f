use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use crate::display::DisplayInfo;
use crate::process::encoder::{EncoderConfig, OutputFormat};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Logical display id; empty captures the whole virtual desktop.
    pub screen_id: String,
    pub frame_rate: u32,
    pub bit_rate_kbps: u32,
    pub format: OutputFormat,
    pub save_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub window_secs: u64,
    pub eviction_margin_secs: u64,
    pub segment_secs: u64,
    pub debounce_ms: u64,
    pub max_backoff_ms: u64,
    pub max_bit_rate_kbps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    pub autostart: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub encoder: EncoderConfig,
    pub capture: CaptureSettings,
    pub replay: ReplayConfig,
    pub api: ApiConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub displays: Vec<DisplayInfo>,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("cannot read config {}", path))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("cannot parse config {}", path))?;
        config.validate().context("config validation failed")?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Scratch directory for replay segments, `<save_dir>/replay_temp` unless
    /// configured.
    pub fn scratch_dir(&self) -> PathBuf {
        self.replay
            .scratch_dir
            .clone()
            .unwrap_or_else(|| self.capture.save_dir.join("replay_temp"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.encoder.program.trim().is_empty() {
            bail!("encoder.program must not be empty");
        }

        self.capture.validate()?;

        let replay = &self.replay;
        if replay.window_secs == 0 {
            bail!("replay.window_secs must be > 0");
        }
        if replay.segment_secs == 0 {
            bail!("replay.segment_secs must be > 0");
        }
        if replay.max_bit_rate_kbps == 0 {
            bail!("replay.max_bit_rate_kbps must be > 0");
        }
        if replay.debounce_ms > replay.max_backoff_ms {
            bail!("replay.debounce_ms must not exceed replay.max_backoff_ms");
        }

        if self.api.bind.parse::<SocketAddr>().is_err() {
            bail!("api.bind '{}' is not a socket address", self.api.bind);
        }

        let mut ids = HashSet::new();
        for display in &self.displays {
            if display.id.trim().is_empty() {
                bail!("display id must not be empty");
            }
            if !ids.insert(display.id.as_str()) {
                bail!("duplicate display id '{}'", display.id);
            }
            if display.width == 0 || display.height == 0 {
                bail!("display '{}' size must be > 0", display.id);
            }
            if !display.scale_factor.is_finite() || display.scale_factor <= 0.0 {
                bail!("display '{}' scale_factor must be > 0", display.id);
            }
        }

        Ok(())
    }
}

impl CaptureSettings {
    fn validate(&self) -> anyhow::Result<()> {
        if self.frame_rate == 0 {
            bail!("capture.frame_rate must be > 0");
        }
        if self.bit_rate_kbps == 0 {
            bail!("capture.bit_rate_kbps must be > 0");
        }
        if self.save_dir.as_os_str().is_empty() {
            bail!("capture.save_dir must not be empty");
        }
        Ok(())
    }

    pub fn apply_patch(&mut self, patch: &CapturePatch) -> anyhow::Result<()> {
        let mut next = self.clone();
        patch.apply_to(&mut next);
        next.validate()?;
        *self = next;
        Ok(())
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            screen_id: String::new(),
            frame_rate: 60,
            bit_rate_kbps: 50_000,
            format: OutputFormat::Mkv,
            save_dir: PathBuf::from("recordings"),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            window_secs: 120,
            eviction_margin_secs: 60,
            segment_secs: 10,
            debounce_ms: 100,
            max_backoff_ms: 5000,
            max_bit_rate_kbps: 25_000,
            scratch_dir: None,
            autostart: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:3017".to_string(),
        }
    }
}

/// Partial update of the capture settings; absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CapturePatch {
    pub screen_id: Option<String>,
    pub frame_rate: Option<u32>,
    pub bit_rate_kbps: Option<u32>,
    pub format: Option<OutputFormat>,
}

impl CapturePatch {
    fn apply_to(&self, target: &mut CaptureSettings) {
        if let Some(ref screen_id) = self.screen_id {
            target.screen_id = screen_id.trim().to_string();
        }
        if let Some(frame_rate) = self.frame_rate {
            target.frame_rate = frame_rate;
        }
        if let Some(bit_rate) = self.bit_rate_kbps {
            target.bit_rate_kbps = bit_rate;
        }
        if let Some(format) = self.format {
            target.format = format;
        }
    }
}
