/// Inference engine interface
///
/// The engine never sees the sample window directly. It pulls the ranges it
/// needs through [`SignalSource`], the same way the Edge Impulse SDK asks its
/// `signal_t` for `[offset, offset + length)` chunks of floats.
///
/// Two back-ends exist:
///   1. [`EnergyEngine`] (default build), a loudness heuristic so the rest of
///      the service can be developed and tested without the C++ SDK.
///   2. `EdgeImpulseEngine`, enabled with the `edge-impulse` feature, which
///      calls the compiled classifier through the shim built by `build.rs`.

use crate::config::{DetectorConfig, SampleScaling};
use std::fmt::Write as _;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Range {offset}+{length} out of bounds for signal of {total} samples")]
    OutOfRange {
        offset: usize,
        length: usize,
        total: usize,
    },
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Signal access failed: {0}")]
    Signal(#[from] SignalError),

    #[error("Classifier returned error code {0}")]
    Engine(i32),

    #[error("Model expects {expected} samples, signal has {actual}")]
    InputLength { expected: usize, actual: usize },

    #[error("Engine initialization failed: {0}")]
    Init(String),
}

/// Data source the engine pulls samples from
pub trait SignalSource {
    /// Total number of samples in the signal
    fn total_length(&self) -> usize;

    /// Fill `out` with the samples at `[offset, offset + out.len())`
    fn read_range(&self, offset: usize, out: &mut [f32]) -> Result<(), SignalError>;
}

/// Confidence for a single label
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub value: f32,
}

/// Time spent in each stage of one inference, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferenceTiming {
    pub dsp_ms: u32,
    pub classification_ms: u32,
    pub anomaly_ms: u32,
}

/// Output of one inference pass
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    classifications: Vec<Classification>,
    timing: InferenceTiming,
    anomaly: Option<f32>,
}

impl ClassificationResult {
    pub fn new(classifications: Vec<Classification>, timing: InferenceTiming) -> Self {
        Self {
            classifications,
            timing,
            anomaly: None,
        }
    }

    /// Build from `(label, value)` pairs in model output order
    pub fn from_pairs<L: Into<String>>(
        pairs: impl IntoIterator<Item = (L, f32)>,
        timing: InferenceTiming,
    ) -> Self {
        let classifications = pairs
            .into_iter()
            .map(|(label, value)| Classification {
                label: label.into(),
                value,
            })
            .collect();
        Self::new(classifications, timing)
    }

    pub fn with_anomaly(mut self, anomaly: f32) -> Self {
        self.anomaly = Some(anomaly);
        self
    }

    pub fn classifications(&self) -> &[Classification] {
        &self.classifications
    }

    /// Confidence of the label at `index`
    pub fn value(&self, index: usize) -> Option<f32> {
        self.classifications.get(index).map(|c| c.value)
    }

    /// Confidence of the label named `label`
    pub fn label_value(&self, label: &str) -> Option<f32> {
        self.classifications
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.value)
    }

    pub fn timing(&self) -> InferenceTiming {
        self.timing
    }

    pub fn anomaly(&self) -> Option<f32> {
        self.anomaly
    }

    /// One-line report, e.g. `12 ms. background: 0.91000, siren: 0.02000`
    pub fn summary(&self) -> String {
        let mut line = format!("{} ms. ", self.timing.dsp_ms + self.timing.classification_ms);
        for (ix, c) in self.classifications.iter().enumerate() {
            if ix > 0 {
                line.push_str(", ");
            }
            let _ = write!(line, "{}: {:.5}", c.label, c.value);
        }
        if let Some(anomaly) = self.anomaly {
            let _ = write!(line, ", anomaly: {:.3}", anomaly);
        }
        line
    }
}

/// A classifier that can run over a [`SignalSource`]
pub trait InferenceEngine {
    fn run(&mut self, signal: &dyn SignalSource) -> Result<ClassificationResult, InferenceError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn run(&mut self, signal: &dyn SignalSource) -> Result<ClassificationResult, InferenceError> {
        (**self).run(signal)
    }
}

/// Labels reported by [`EnergyEngine`], in output order
pub const ENERGY_ENGINE_LABELS: [&str; 3] = ["background", "noise", "siren"];

/// Loudness heuristic standing in for a trained model
///
/// Reads the signal in chunks, computes its RMS level relative to full scale
/// and spreads the confidence over [`ENERGY_ENGINE_LABELS`]: quiet audio is
/// `background`, loud audio is `siren`. Scores always sum to 1.
pub struct EnergyEngine {
    full_scale: f32,
    chunk: Vec<f32>,
}

impl EnergyEngine {
    const CHUNK_SIZE: usize = 1024;

    /// Loud enough to score as pure siren
    const SATURATION_RMS: f32 = 0.25;

    pub fn new(scaling: SampleScaling) -> Self {
        let full_scale = match scaling {
            SampleScaling::Normalized => 1.0,
            SampleScaling::Raw => 32768.0,
        };

        Self {
            full_scale,
            chunk: vec![0.0; Self::CHUNK_SIZE],
        }
    }

    fn rms(&mut self, signal: &dyn SignalSource) -> Result<f32, InferenceError> {
        let total = signal.total_length();
        let full_scale = self.full_scale;
        let mut sum_squares = 0.0f64;
        let mut offset = 0;

        while offset < total {
            let len = Self::CHUNK_SIZE.min(total - offset);
            let chunk = &mut self.chunk[..len];
            signal.read_range(offset, chunk)?;

            sum_squares += chunk
                .iter()
                .map(|&v| {
                    let normalized = (v / full_scale) as f64;
                    normalized * normalized
                })
                .sum::<f64>();
            offset += len;
        }

        Ok((sum_squares / total as f64).sqrt() as f32)
    }
}

impl InferenceEngine for EnergyEngine {
    fn run(&mut self, signal: &dyn SignalSource) -> Result<ClassificationResult, InferenceError> {
        let total = signal.total_length();
        if total == 0 {
            return Err(InferenceError::InputLength {
                expected: 1,
                actual: 0,
            });
        }

        let started = Instant::now();
        let rms = self.rms(signal)?;
        let level = (rms / Self::SATURATION_RMS).clamp(0.0, 1.0);

        let siren = level * level;
        let background = 1.0 - level;
        let noise = level - siren;

        debug!("Energy engine: rms={:.4}, level={:.3}", rms, level);

        let timing = InferenceTiming {
            classification_ms: started.elapsed().as_millis() as u32,
            ..Default::default()
        };

        Ok(ClassificationResult::from_pairs(
            ENERGY_ENGINE_LABELS.into_iter().zip([background, noise, siren]),
            timing,
        ))
    }
}

/// Engine selected at build time
pub fn default_engine(config: &DetectorConfig) -> Result<Box<dyn InferenceEngine>, InferenceError> {
    #[cfg(feature = "edge-impulse")]
    {
        let engine = crate::edge_impulse::EdgeImpulseEngine::new(config)?;
        Ok(Box::new(engine))
    }

    #[cfg(not(feature = "edge-impulse"))]
    {
        tracing::warn!("Built without the edge-impulse feature, using the energy heuristic engine");
        Ok(Box::new(EnergyEngine::new(config.sample_scaling)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct ConstSignal {
        value: f32,
        len: usize,
    }

    impl SignalSource for ConstSignal {
        fn total_length(&self) -> usize {
            self.len
        }

        fn read_range(&self, offset: usize, out: &mut [f32]) -> Result<(), SignalError> {
            if offset + out.len() > self.len {
                return Err(SignalError::OutOfRange {
                    offset,
                    length: out.len(),
                    total: self.len,
                });
            }
            out.fill(self.value);
            Ok(())
        }
    }

    #[test]
    fn test_silence_is_background() {
        let mut engine = EnergyEngine::new(SampleScaling::Normalized);
        let result = engine
            .run(&ConstSignal { value: 0.0, len: 3000 })
            .unwrap();

        assert_eq!(result.classifications().len(), 3);
        assert_relative_eq!(result.label_value("background").unwrap(), 1.0);
        assert_relative_eq!(result.value(2).unwrap(), 0.0);
    }

    #[test]
    fn test_loud_signal_is_siren() {
        let mut engine = EnergyEngine::new(SampleScaling::Raw);
        let result = engine
            .run(&ConstSignal { value: 20000.0, len: 2500 })
            .unwrap();

        assert_relative_eq!(result.label_value("siren").unwrap(), 1.0);
        let total: f32 = result.classifications().iter().map(|c| c.value).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_signal_rejected() {
        let mut engine = EnergyEngine::new(SampleScaling::Normalized);
        let err = engine.run(&ConstSignal { value: 0.0, len: 0 }).unwrap_err();
        assert!(matches!(err, InferenceError::InputLength { .. }));
    }

    #[test]
    fn test_summary_format() {
        let result = ClassificationResult::from_pairs(
            [("background", 0.9f32), ("siren", 0.1)],
            InferenceTiming {
                dsp_ms: 3,
                classification_ms: 9,
                anomaly_ms: 0,
            },
        );

        assert_eq!(result.summary(), "12 ms. background: 0.90000, siren: 0.10000");
        assert_eq!(result.value(5), None);
        assert_eq!(result.label_value("dog"), None);
    }
}
