use anyhow::{Context, Result};
use faceline_vision::face::{ChannelOrder, DetectorSettings, EncoderSettings};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACELINE_CONFIG_PATH").unwrap_or("/usr/local/etc/faceline/config.toml"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACELINE_MODEL_PREFIX").unwrap_or("/usr/local/share/faceline/models"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_root: PathBuf,
    pub spool_dir: PathBuf,
    pub work_dir: PathBuf,
    pub frames_container: String,
    pub results_container: String,
    pub data_container: String,
    pub reference_key: String,
    pub frame_prefix: String,
    pub decoder: DecoderConfig,
    pub detector: DetectorConfig,
    pub encoder: EncoderConfig,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("/var/lib/faceline/store"),
            spool_dir: PathBuf::from("/var/lib/faceline/spool"),
            work_dir: PathBuf::from("/tmp/faceline"),
            frames_container: "frames".to_string(),
            results_container: "results".to_string(),
            data_container: "data".to_string(),
            reference_key: "reference.bin".to_string(),
            frame_prefix: "test".to_string(),
            decoder: DecoderConfig::default(),
            detector: DetectorConfig::default(),
            encoder: EncoderConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ffmpeg"),
            timeout_secs: 60,
        }
    }
}

impl DecoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub min_face_size: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let settings = DetectorSettings::default();
        Self {
            model: MODEL_PREFIX.join("face_detection_yunet_2023mar.onnx"),
            score_threshold: settings.score_threshold,
            nms_threshold: settings.nms_threshold,
            min_face_size: settings.min_face_size,
        }
    }
}

impl DetectorConfig {
    pub fn settings(&self) -> DetectorSettings {
        DetectorSettings {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
            min_face_size: self.min_face_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrderConfig {
    Rgb,
    Bgr,
}

impl From<ChannelOrderConfig> for ChannelOrder {
    fn from(value: ChannelOrderConfig) -> Self {
        match value {
            ChannelOrderConfig::Rgb => ChannelOrder::Rgb,
            ChannelOrderConfig::Bgr => ChannelOrder::Bgr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub model: PathBuf,
    pub input_size: u32,
    pub channel_order: ChannelOrderConfig,
    pub mean: f32,
    pub scale: f32,
    pub l2_normalize: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model: MODEL_PREFIX.join("face_recognition_sface_2021dec.onnx"),
            input_size: 112,
            channel_order: ChannelOrderConfig::Bgr,
            mean: 0.0,
            scale: 1.0,
            l2_normalize: true,
        }
    }
}

impl EncoderConfig {
    pub fn settings(&self) -> EncoderSettings {
        EncoderSettings {
            input_size: self.input_size,
            channel_order: self.channel_order.into(),
            mean: self.mean,
            scale: self.scale,
            l2_normalize: self.l2_normalize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub backoff_coefficient: u32,
    pub maximum_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 200,
            backoff_coefficient: 2,
            maximum_interval_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff_coefficient,
            Duration::from_millis(self.initial_interval_ms),
            Some(Duration::from_millis(self.maximum_interval_ms)),
        )
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.encoder.input_size == 0 {
            anyhow::bail!("encoder.input_size must be positive");
        }
        if self.detector.min_face_size < 0.0 {
            anyhow::bail!("detector.min_face_size must not be negative");
        }
        for (name, value) in [
            ("frames_container", &self.frames_container),
            ("results_container", &self.results_container),
            ("data_container", &self.data_container),
            ("reference_key", &self.reference_key),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
