/// Detection pipeline
///
/// Single-threaded loop: blocking slice read, ingest, classify once warmed
/// up, debounce, write the output on transitions. The pipeline owns every
/// hardware handle, so they are released when it is dropped no matter how
/// the loop ended.
///
/// Failure policy: a short read or an output failure ends the loop with an
/// error; an inference failure is logged and that slice's detection update
/// is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::capture::{AudioSource, CaptureError};
use crate::classifier::{ClassifierError, SlidingAudioClassifier};
use crate::config::ConfigError;
use crate::hysteresis::DetectionSignal;
use crate::inference::{InferenceEngine, InferenceError};
use crate::output::{DetectionOutput, OutputError};
use crate::recorder::{RecorderError, WindowRecorder};
use crate::window::AudioSample;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Inference engine error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Failed to read audio data: expected {expected} samples, got {got}")]
    ShortRead { expected: usize, got: usize },
}

/// Pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub slices_read: u64,
    pub classifications: u64,
    pub inference_failures: u64,
    pub activations: u64,
    pub dropped_samples: u64,
}

pub struct Pipeline<S, E, O>
where
    S: AudioSource,
    E: InferenceEngine,
    O: DetectionOutput,
{
    source: S,
    classifier: SlidingAudioClassifier<E>,
    output: O,
    recorder: Option<WindowRecorder>,
    shutdown: Arc<AtomicBool>,
    stats: PipelineStats,
}

impl<S, E, O> Pipeline<S, E, O>
where
    S: AudioSource,
    E: InferenceEngine,
    O: DetectionOutput,
{
    /// Assemble the pipeline and drive the output to `Inactive`
    pub fn new(
        source: S,
        classifier: SlidingAudioClassifier<E>,
        mut output: O,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        output.set(DetectionSignal::Inactive)?;

        Ok(Self {
            source,
            classifier,
            output,
            recorder: None,
            shutdown,
            stats: PipelineStats::default(),
        })
    }

    /// Dump the window to WAV whenever the output goes active
    pub fn with_recorder(mut self, recorder: WindowRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Run until shutdown is requested or a fatal error occurs
    pub fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        let mut slice: Vec<AudioSample> = vec![0; self.classifier.slice_length()];
        info!("Pipeline running ({} samples per slice)", slice.len());

        while !self.shutdown_requested() {
            let got = self.source.read_slice(&mut slice)?;

            if got != slice.len() {
                if self.shutdown_requested() {
                    debug!("Discarding partial slice of {} samples on shutdown", got);
                    break;
                }
                error!("Failed to read audio data ({} of {})", got, slice.len());
                return Err(PipelineError::ShortRead {
                    expected: slice.len(),
                    got,
                });
            }

            self.process_slice(&slice)?;
        }

        self.stats.dropped_samples = self.source.dropped_samples();
        info!("Pipeline stopped: {:?}", self.stats);
        Ok(self.stats.clone())
    }

    /// Handle one full slice
    ///
    /// Returns the signal written to the output, if the slice caused a
    /// transition.
    pub fn process_slice(
        &mut self,
        slice: &[AudioSample],
    ) -> Result<Option<DetectionSignal>, PipelineError> {
        self.classifier.ingest(slice)?;
        self.stats.slices_read += 1;

        if !self.classifier.should_classify() {
            trace!(
                "Warming up: {} of {} slices",
                self.stats.slices_read,
                self.classifier.warmup_slices()
            );
            return Ok(None);
        }

        let result = match self.classifier.classify() {
            Ok(result) => result,
            Err(ClassifierError::Inference(e)) => {
                error!("ERR: Failed to run classifier ({})", e);
                self.stats.inference_failures += 1;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.stats.classifications += 1;
        info!("{}", result.summary());

        let previous = self.classifier.detection_state().output();
        let signal = match self.classifier.update_detection(&result) {
            Some(signal) if signal != previous => signal,
            _ => return Ok(None),
        };

        self.output.set(signal)?;

        match signal {
            DetectionSignal::Active => {
                self.stats.activations += 1;
                info!("Signal sent!");
                self.record_activation();
            }
            DetectionSignal::Inactive => info!("Signal cleared"),
        }

        Ok(Some(signal))
    }

    fn record_activation(&self) {
        if let Some(recorder) = &self.recorder {
            match recorder.save(self.classifier.window()) {
                Ok(path) => info!("Saved activation window to {}", path.display()),
                Err(e) => warn!("Failed to save activation window: {}", e),
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn classifier(&self) -> &SlidingAudioClassifier<E> {
        &self.classifier
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, SampleScaling};
    use crate::inference::{ClassificationResult, InferenceTiming, SignalSource};
    use crate::output::MockDetectionOutput;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::collections::VecDeque;

    /// Serves queued slices, then requests shutdown
    struct QueueSource {
        slices: VecDeque<Vec<AudioSample>>,
        shutdown: Arc<AtomicBool>,
    }

    impl AudioSource for QueueSource {
        fn read_slice(&mut self, out: &mut [AudioSample]) -> Result<usize, CaptureError> {
            match self.slices.pop_front() {
                Some(slice) => {
                    let n = slice.len().min(out.len());
                    out[..n].copy_from_slice(&slice[..n]);
                    Ok(n)
                }
                None => {
                    self.shutdown.store(true, Ordering::Release);
                    Ok(0)
                }
            }
        }
    }

    /// Pops one scripted label-2 value per run; `None` fails the run
    struct ScriptEngine {
        script: VecDeque<Option<f32>>,
    }

    impl InferenceEngine for ScriptEngine {
        fn run(
            &mut self,
            _signal: &dyn SignalSource,
        ) -> Result<ClassificationResult, InferenceError> {
            match self.script.pop_front().flatten() {
                Some(value) => Ok(ClassificationResult::from_pairs(
                    [("background", 1.0 - value), ("noise", 0.0), ("siren", value)],
                    InferenceTiming::default(),
                )),
                None => Err(InferenceError::Engine(-5)),
            }
        }
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            raw_sample_count: 16,
            slice_length_ms: 250,
            sample_scaling: SampleScaling::Raw,
            ..Default::default()
        }
    }

    fn source(count: usize, shutdown: &Arc<AtomicBool>) -> QueueSource {
        QueueSource {
            slices: (0..count).map(|n| vec![n as i16; 4]).collect(),
            shutdown: Arc::clone(shutdown),
        }
    }

    fn classifier(script: &[Option<f32>]) -> SlidingAudioClassifier<ScriptEngine> {
        let engine = ScriptEngine {
            script: script.iter().copied().collect(),
        };
        SlidingAudioClassifier::new(&config(), engine).unwrap()
    }

    #[test]
    fn test_output_written_on_transitions_only() {
        let mut seq = Sequence::new();
        let mut output = MockDetectionOutput::new();
        output
            .expect_set()
            .with(eq(DetectionSignal::Inactive))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        output
            .expect_set()
            .with(eq(DetectionSignal::Active))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        output
            .expect_set()
            .with(eq(DetectionSignal::Inactive))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        // 4 detections raise the line, 2 more hold it, 4 misses drop it
        let mut script = vec![Some(0.01); 6];
        script.extend(vec![Some(0.9); 4]);

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pipeline = Pipeline::new(
            source(3 + script.len(), &shutdown),
            classifier(&script),
            output,
            Arc::clone(&shutdown),
        )
        .unwrap();

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.slices_read, 13);
        assert_eq!(stats.classifications, 10);
        assert_eq!(stats.activations, 1);
    }

    #[test]
    fn test_inference_failure_skips_update() {
        let mut output = MockDetectionOutput::new();
        output.expect_set().returning(|_| Ok(()));

        let shutdown = Arc::new(AtomicBool::new(false));
        let script = [Some(0.01), None, Some(0.01)];
        let mut pipeline = Pipeline::new(
            source(6, &shutdown),
            classifier(&script),
            output,
            Arc::clone(&shutdown),
        )
        .unwrap();

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.classifications, 2);
        assert_eq!(stats.inference_failures, 1);
        assert_eq!(pipeline.classifier().detection_state().counter(), 2);
    }

    #[test]
    fn test_output_failure_is_fatal() {
        let mut output = MockDetectionOutput::new();
        output
            .expect_set()
            .with(eq(DetectionSignal::Inactive))
            .returning(|_| Ok(()));
        output
            .expect_set()
            .with(eq(DetectionSignal::Active))
            .returning(|_| Err(OutputError::Write("line stuck".to_string())));

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pipeline = Pipeline::new(
            source(10, &shutdown),
            classifier(&[Some(0.0); 7]),
            output,
            Arc::clone(&shutdown),
        )
        .unwrap();

        assert!(matches!(pipeline.run(), Err(PipelineError::Output(_))));
    }

    #[test]
    fn test_stops_when_shutdown_already_requested() {
        let mut output = MockDetectionOutput::new();
        output.expect_set().times(1).returning(|_| Ok(()));

        let shutdown = Arc::new(AtomicBool::new(true));
        let mut pipeline = Pipeline::new(
            source(10, &shutdown),
            classifier(&[]),
            output,
            Arc::clone(&shutdown),
        )
        .unwrap();

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.slices_read, 0);
    }
}
