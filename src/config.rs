/*!
Pipeline tuning.

Every value defaults to the constant the pipeline was designed around, so an empty `{}` file is
a valid configuration.
*/

use std::{fmt::Display, path::Path};

use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        error: std::io::Error,
    },
    Parse {
        path: String,
        error: serde_json::Error,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, error } => write!(f, "Unable to read config {path}: {error}"),
            Self::Parse { path, error } => write!(f, "Unable to parse config {path}: {error}"),
            Self::Invalid(v) => write!(f, "Invalid config: {v}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Number of samples per analysis window. Must be a power of two.
    pub fft_size: usize,
    pub sample_rate: u32,
    /// Applied to the RMS so normal speech registers above 0.1.
    pub gain: f32,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub low_band_hz: f32,
    pub mid_band_hz: f32,
    pub high_band_hz: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            sample_rate: 48_000,
            gain: 3.0,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            low_band_hz: 250.0,
            mid_band_hz: 2000.0,
            high_band_hz: 8000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisemeConfig {
    pub silence_threshold: f32,
    pub min_hold_frames: u32,
    pub transition_ms: u64,
    pub history_len: usize,
    pub intensity_gain: f32,
}

impl Default for VisemeConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.05,
            min_hold_frames: 2,
            transition_ms: 100,
            history_len: 5,
            intensity_gain: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Speech counts as stopped when no recognition event arrived for this long.
    pub decay_ms: u64,
    /// Full FV/O cycle of the filler viseme.
    pub filler_period_ms: u64,
    pub filler_intensity: f32,
    /// Only volumes below this are corrected.
    pub quiet_threshold: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            decay_ms: 300,
            filler_period_ms: 300,
            filler_intensity: 0.4,
            quiet_threshold: 0.05,
        }
    }
}

/// Per-channel low-pass factors, 0.0 freezes a channel and 1.0 disables smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub rotation: f32,
    pub mouth: f32,
    pub eyes: f32,
    pub eyebrows: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            rotation: 0.15,
            mouth: 0.3,
            eyes: 0.2,
            eyebrows: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio: AudioConfig,
    pub viseme: VisemeConfig,
    pub speech: SpeechConfig,
    pub smoothing: SmoothingConfig,
    /// Volume above which audio overrides the geometric mouth for viseme-unaware consumers.
    pub legacy_mouth_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            viseme: VisemeConfig::default(),
            speech: SpeechConfig::default(),
            smoothing: SmoothingConfig::default(),
            legacy_mouth_threshold: 0.08,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        debug!("Loading config from {display}");

        let data = std::fs::read(path).map_err(|error| ConfigError::Io {
            path: display.clone(),
            error,
        })?;

        Self::from_slice(&data).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: display,
                error,
            },
            e => e,
        })
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ConfigError> {
        let config =
            serde_json::from_slice::<Self>(data).map_err(|error| ConfigError::Parse {
                path: String::new(),
                error,
            })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.audio.fft_size.is_power_of_two() || self.audio.fft_size < 32 {
            return Err(ConfigError::Invalid(format!(
                "fft_size must be a power of two >= 32, found {}",
                self.audio.fft_size
            )));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.audio.max_decibels <= self.audio.min_decibels {
            return Err(ConfigError::Invalid(
                "max_decibels must be greater than min_decibels".into(),
            ));
        }
        if !(self.audio.low_band_hz < self.audio.mid_band_hz
            && self.audio.mid_band_hz < self.audio.high_band_hz)
        {
            return Err(ConfigError::Invalid(
                "band edges must be strictly increasing".into(),
            ));
        }
        if self.viseme.history_len == 0 {
            return Err(ConfigError::Invalid("history_len must be positive".into()));
        }

        let s = &self.smoothing;
        for (name, v) in [
            ("rotation", s.rotation),
            ("mouth", s.mouth),
            ("eyes", s.eyes),
            ("eyebrows", s.eyebrows),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!(
                    "smoothing.{name} must be within 0.0-1.0, found {v}"
                )));
            }
        }

        Ok(())
    }
}
