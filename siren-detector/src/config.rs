/// Detector configuration
///
/// All tuning values live here instead of being scattered as literals: the
/// threshold, hysteresis bound and slice length are tied to one trained model
/// and one microphone, so they have to stay easy to adjust.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default capture rate (Hz), dictated by the model
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Default model input length in samples (one second at 16kHz)
pub const DEFAULT_RAW_SAMPLE_COUNT: usize = 16000;

/// Default slice period: four inferences per second
pub const DEFAULT_SLICE_LENGTH_MS: u32 = 250;

pub const DEFAULT_MONITORED_LABEL: usize = 2;
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.1;
pub const DEFAULT_HYSTERESIS_MAX: u8 = 4;

/// Largest accepted window, about four minutes at 16kHz
pub const MAX_RAW_SAMPLE_COUNT: usize = 1 << 22;

/// BCM numbering
pub const DEFAULT_GPIO_PIN: u8 = 26;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How window samples are presented to the inference engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleScaling {
    /// `sample / 32768.0`, in [-1.0, 1.0)
    #[default]
    Normalized,

    /// Plain cast, keeps the i16 magnitude
    Raw,
}

impl SampleScaling {
    #[inline]
    pub fn convert(self, sample: i16) -> f32 {
        match self {
            SampleScaling::Normalized => sample as f32 / 32768.0,
            SampleScaling::Raw => sample as f32,
        }
    }
}

/// Configuration for the siren detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Capture sample rate (must match the model)
    pub sample_rate: u32,

    /// Model input length in samples (size of the sliding window)
    pub raw_sample_count: usize,

    /// Length of one captured slice in milliseconds
    pub slice_length_ms: u32,

    /// Index of the label checked by the decision rule
    pub monitored_label: usize,

    /// Confidence strictly below this counts as "detected"
    pub detection_threshold: f32,

    /// Saturation bound of the hysteresis counter
    pub hysteresis_max: u8,

    /// GPIO line driven by the detection signal
    pub gpio_pin: u8,

    pub sample_scaling: SampleScaling,

    /// Smooth per-label confidences over half a window of slices
    pub moving_average: bool,

    /// Where to dump the window that raised the line (disabled when unset)
    pub record_dir: Option<PathBuf>,

    /// Ask the engine for verbose output
    pub debug: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            raw_sample_count: DEFAULT_RAW_SAMPLE_COUNT,
            slice_length_ms: DEFAULT_SLICE_LENGTH_MS,
            monitored_label: DEFAULT_MONITORED_LABEL,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            hysteresis_max: DEFAULT_HYSTERESIS_MAX,
            gpio_pin: DEFAULT_GPIO_PIN,
            sample_scaling: SampleScaling::default(),
            moving_average: false,
            record_dir: None,
            debug: false,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Number of samples captured per slice
    pub fn slice_length_values(&self) -> usize {
        self.raw_sample_count.saturating_mul(self.slice_length_ms as usize) / 1000
    }

    /// Slices needed before the window holds only captured audio
    pub fn warmup_slices(&self) -> usize {
        self.raw_sample_count.div_ceil(self.slice_length_values().max(1))
    }

    /// Size of the moving-average filter, half a window of slices
    pub fn moving_average_size(&self) -> usize {
        (self.warmup_slices() / 2).max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample_rate must be greater than 0".to_string()
            ));
        }

        if self.raw_sample_count == 0 || self.raw_sample_count > MAX_RAW_SAMPLE_COUNT {
            return Err(ConfigError::Invalid(format!(
                "raw_sample_count must be between 1 and {}",
                MAX_RAW_SAMPLE_COUNT
            )));
        }

        if self.slice_length_ms == 0 || self.slice_length_ms > 1000 {
            return Err(ConfigError::Invalid(
                "slice_length_ms must be between 1 and 1000".to_string()
            ));
        }

        let slice = self
            .raw_sample_count
            .checked_mul(self.slice_length_ms as usize)
            .map(|product| product / 1000)
            .ok_or_else(|| {
                ConfigError::Invalid("raw_sample_count * slice_length_ms overflows".to_string())
            })?;
        if slice == 0 || slice > self.raw_sample_count {
            return Err(ConfigError::Invalid(format!(
                "slice of {} ms gives {} samples, need 1..={}",
                self.slice_length_ms, slice, self.raw_sample_count
            )));
        }

        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(ConfigError::Invalid(
                "detection_threshold must be between 0.0 and 1.0".to_string()
            ));
        }

        if self.hysteresis_max == 0 {
            return Err(ConfigError::Invalid(
                "hysteresis_max must be greater than 0".to_string()
            ));
        }

        Ok(())
    }
}
