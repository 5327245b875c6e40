/// Siren detector library
///
/// This library streams microphone audio through an audio classifier over a
/// sliding window, debounces the per-slice results and drives a GPIO line
/// while a siren is detected.

pub mod capture;
pub mod classifier;
pub mod config;
#[cfg(feature = "edge-impulse")]
pub mod edge_impulse;
pub mod hysteresis;
pub mod inference;
pub mod output;
pub mod pipeline;
pub mod recorder;
pub mod smoothing;
pub mod window;

// Re-export main types
pub use capture::{list_input_devices, AudioDevice, AudioSource, CaptureError, CpalCapture};
pub use classifier::{ClassifierError, SlidingAudioClassifier};
pub use config::{ConfigError, DetectorConfig, SampleScaling};
pub use hysteresis::{DetectionSignal, DetectionState};
pub use inference::{
    default_engine, Classification, ClassificationResult, EnergyEngine, InferenceEngine,
    InferenceError, InferenceTiming, SignalError, SignalSource,
};
pub use output::{DetectionOutput, GpioOutput, LogOutput, OutputError};
pub use pipeline::{Pipeline, PipelineError, PipelineStats};
pub use recorder::{RecorderError, WindowRecorder};
pub use smoothing::MovingAverage;
pub use window::{AudioSample, SampleWindow, WindowError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
