use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_MAX_PIXELS: u64 = 50_000_000;

/// 引擎构造后不可变
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawClassifierConfig")]
pub struct ClassifierConfig {
    confidence_threshold: f32,
    max_pixels: u64,
}

#[derive(Deserialize)]
struct RawClassifierConfig {
    confidence_threshold: f32,
    #[serde(default = "default_max_pixels")]
    max_pixels: u64,
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

impl TryFrom<RawClassifierConfig> for ClassifierConfig {
    type Error = ConfigError;

    fn try_from(raw: RawClassifierConfig) -> Result<Self, Self::Error> {
        Ok(Self::new(raw.confidence_threshold)?.with_max_pixels(raw.max_pixels))
    }
}

impl ClassifierConfig {
    pub fn new(confidence_threshold: f32) -> Result<Self, ConfigError> {
        // NaN 也会在这里被拒绝
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(confidence_threshold));
        }
        Ok(Self {
            confidence_threshold,
            max_pixels: DEFAULT_MAX_PIXELS,
        })
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub labels: Option<PathBuf>,
    #[serde(default)]
    pub softmax: bool,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    /// Used when the model declares dynamic spatial dimensions.
    #[serde(default)]
    pub input_size: Option<(u32, u32)>,
}

fn default_mean() -> [f32; 3] {
    [0.; 3]
}

fn default_std() -> [f32; 3] {
    [1.; 3]
}

impl ModelConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            labels: None,
            softmax: false,
            mean: default_mean(),
            std: default_std(),
            input_size: None,
        }
    }
}

/// Settings file read by the command line front end.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub classifier: ClassifierConfig,
    pub model: ModelConfig,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }
}

/// 标签文件每行一个标签，忽略空行
pub fn load_labels(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}
