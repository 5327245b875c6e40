/// Sliding audio classifier
///
/// Owns the sample window, the warm-up counter and the detection state.
/// Slices go in through [`SlidingAudioClassifier::ingest`]; once the window
/// holds only captured audio every slice can be classified and the result fed
/// through the hysteresis counter.
///
/// The decision rule treats a *low* confidence on the monitored label as the
/// detection condition. This matches the model the service was tuned against
/// and is kept literally; check the label order before reusing it with a
/// different model.

use crate::config::{ConfigError, DetectorConfig};
use crate::hysteresis::{DetectionSignal, DetectionState};
use crate::inference::{ClassificationResult, InferenceEngine, InferenceError};
use crate::smoothing::MovingAverage;
use crate::window::{AudioSample, SampleWindow, WindowError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Slice has {got} samples, expected {expected}")]
    SliceLength { expected: usize, got: usize },

    #[error("Window not ready: {ingested} of {required} warm-up slices ingested")]
    NotReady { ingested: usize, required: usize },

    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),
}

pub struct SlidingAudioClassifier<E: InferenceEngine> {
    engine: E,
    window: SampleWindow,
    slice_length: usize,
    warmup_slices: usize,
    /// Stops counting once warm-up is reached
    slices_ingested: usize,
    state: DetectionState,
    monitored_label: usize,
    threshold: f32,
    smoother: Option<MovingAverage>,
}

impl<E: InferenceEngine> SlidingAudioClassifier<E> {
    pub fn new(config: &DetectorConfig, engine: E) -> Result<Self, ClassifierError> {
        config.validate()?;

        let window = SampleWindow::new(config.raw_sample_count, config.sample_scaling)?;
        let smoother = config
            .moving_average
            .then(|| MovingAverage::new(config.moving_average_size()));

        info!(
            "Classifier: window={} samples, slice={} samples, warm-up={} slices",
            config.raw_sample_count,
            config.slice_length_values(),
            config.warmup_slices()
        );
        info!(
            "Detection rule: label[{}] < {} for {} consecutive slices",
            config.monitored_label, config.detection_threshold, config.hysteresis_max
        );

        Ok(Self {
            engine,
            window,
            slice_length: config.slice_length_values(),
            warmup_slices: config.warmup_slices(),
            slices_ingested: 0,
            state: DetectionState::new(config.hysteresis_max),
            monitored_label: config.monitored_label,
            threshold: config.detection_threshold,
            smoother,
        })
    }

    /// Advance the window by one slice
    pub fn ingest(&mut self, slice: &[AudioSample]) -> Result<(), ClassifierError> {
        if slice.len() != self.slice_length {
            return Err(ClassifierError::SliceLength {
                expected: self.slice_length,
                got: slice.len(),
            });
        }

        self.window.push_slice(slice)?;

        if self.slices_ingested < self.warmup_slices {
            self.slices_ingested += 1;
            if self.slices_ingested == self.warmup_slices {
                debug!("Warm-up complete after {} slices", self.slices_ingested);
            }
        }

        Ok(())
    }

    /// True once the window no longer contains startup zero-fill
    pub fn should_classify(&self) -> bool {
        self.slices_ingested >= self.warmup_slices
    }

    /// Run the engine over the current window
    pub fn classify(&mut self) -> Result<ClassificationResult, ClassifierError> {
        if !self.should_classify() {
            return Err(ClassifierError::NotReady {
                ingested: self.slices_ingested,
                required: self.warmup_slices,
            });
        }

        let result = self.engine.run(&self.window)?;

        Ok(match self.smoother.as_mut() {
            Some(smoother) => smoother.apply(&result),
            None => result,
        })
    }

    /// Whether `result` satisfies the detection condition
    pub fn is_detected(&self, result: &ClassificationResult) -> bool {
        match result.value(self.monitored_label) {
            Some(value) => value < self.threshold,
            None => {
                warn!(
                    "Result has {} labels, monitored label index is {}",
                    result.classifications().len(),
                    self.monitored_label
                );
                false
            }
        }
    }

    /// Feed one result through the hysteresis counter
    ///
    /// Returns the signal to assert when the counter sits on a bound.
    pub fn update_detection(&mut self, result: &ClassificationResult) -> Option<DetectionSignal> {
        let detected = self.is_detected(result);
        let signal = self.state.update(detected);

        debug!(
            "Detected: {}, counter: {}/{}",
            detected,
            self.state.counter(),
            self.state.max()
        );

        signal
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn detection_state(&self) -> &DetectionState {
        &self.state
    }

    pub fn slice_length(&self) -> usize {
        self.slice_length
    }

    pub fn warmup_slices(&self) -> usize {
        self.warmup_slices
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceTiming, SignalSource};

    /// Returns `value` for label 2 and records the window it was shown
    struct FixedEngine {
        value: f32,
        calls: usize,
        last_window: Vec<f32>,
    }

    impl FixedEngine {
        fn new(value: f32) -> Self {
            Self {
                value,
                calls: 0,
                last_window: Vec::new(),
            }
        }
    }

    impl InferenceEngine for FixedEngine {
        fn run(
            &mut self,
            signal: &dyn SignalSource,
        ) -> Result<ClassificationResult, InferenceError> {
            self.calls += 1;
            self.last_window = vec![0.0; signal.total_length()];
            signal.read_range(0, &mut self.last_window)?;

            Ok(ClassificationResult::from_pairs(
                [("a", 0.5), ("b", 0.5 - self.value), ("c", self.value)],
                InferenceTiming::default(),
            ))
        }
    }

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            raw_sample_count: 16,
            slice_length_ms: 250, // 4 samples per slice
            sample_scaling: crate::config::SampleScaling::Raw,
            ..Default::default()
        }
    }

    #[test]
    fn test_warmup_gate() {
        let mut classifier =
            SlidingAudioClassifier::new(&small_config(), FixedEngine::new(0.5)).unwrap();
        assert_eq!(classifier.warmup_slices(), 4);

        for n in 1..=3 {
            classifier.ingest(&[n; 4]).unwrap();
            assert!(!classifier.should_classify());
            assert!(matches!(
                classifier.classify(),
                Err(ClassifierError::NotReady { required: 4, .. })
            ));
        }

        for n in 4..20 {
            classifier.ingest(&[n; 4]).unwrap();
            assert!(classifier.should_classify());
        }
    }

    #[test]
    fn test_slice_length_checked() {
        let mut classifier =
            SlidingAudioClassifier::new(&small_config(), FixedEngine::new(0.5)).unwrap();
        let err = classifier.ingest(&[0; 3]).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::SliceLength { expected: 4, got: 3 }
        ));
        assert!(!classifier.should_classify());
    }

    #[test]
    fn test_engine_sees_chronological_window() {
        let mut classifier =
            SlidingAudioClassifier::new(&small_config(), FixedEngine::new(0.5)).unwrap();
        for n in 1..=5i16 {
            classifier.ingest(&[n; 4]).unwrap();
        }

        classifier.classify().unwrap();
        let expected: Vec<f32> = [2.0, 3.0, 4.0, 5.0]
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(4))
            .collect();
        assert_eq!(classifier.engine().last_window, expected);
        assert_eq!(classifier.engine().calls, 1);
    }

    #[test]
    fn test_low_confidence_counts_as_detected() {
        let classifier =
            SlidingAudioClassifier::new(&small_config(), FixedEngine::new(0.5)).unwrap();
        let low = ClassificationResult::from_pairs(
            [("a", 0.9), ("b", 0.05), ("c", 0.05)],
            InferenceTiming::default(),
        );
        let high = ClassificationResult::from_pairs(
            [("a", 0.0), ("b", 0.0), ("c", 1.0)],
            InferenceTiming::default(),
        );
        let at_threshold = ClassificationResult::from_pairs(
            [("a", 0.0), ("b", 0.9), ("c", 0.1)],
            InferenceTiming::default(),
        );
        let short = ClassificationResult::from_pairs([("a", 0.0)], InferenceTiming::default());

        assert!(classifier.is_detected(&low));
        assert!(!classifier.is_detected(&high));
        assert!(!classifier.is_detected(&at_threshold));
        assert!(!classifier.is_detected(&short));
    }

    #[test]
    fn test_update_detection_drives_state() {
        let mut classifier =
            SlidingAudioClassifier::new(&small_config(), FixedEngine::new(0.02)).unwrap();
        for _ in 0..4 {
            classifier.ingest(&[0; 4]).unwrap();
        }

        let mut signals = Vec::new();
        for _ in 0..4 {
            let result = classifier.classify().unwrap();
            signals.push(classifier.update_detection(&result));
        }

        assert_eq!(signals, vec![None, None, None, Some(DetectionSignal::Active)]);
        assert_eq!(classifier.detection_state().counter(), 4);
    }

    #[test]
    fn test_moving_average_applied() {
        let config = DetectorConfig {
            moving_average: true,
            ..small_config()
        };
        let mut classifier = SlidingAudioClassifier::new(&config, FixedEngine::new(0.2)).unwrap();
        for _ in 0..4 {
            classifier.ingest(&[0; 4]).unwrap();
        }

        let result = classifier.classify().unwrap();
        assert_eq!(result.value(2), Some(0.2));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DetectorConfig {
            hysteresis_max: 0,
            ..small_config()
        };
        assert!(matches!(
            SlidingAudioClassifier::new(&config, FixedEngine::new(0.5)),
            Err(ClassifierError::Config(_))
        ));
    }
}
