/// Activation recorder
///
/// Saves the window that raised the detection line as a mono 16-bit WAV, so
/// false positives can be reviewed against what the model actually heard.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

use crate::window::SampleWindow;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

pub struct WindowRecorder {
    dir: PathBuf,
    sample_rate: u32,
}

impl WindowRecorder {
    /// Create the recorder, creating `dir` if needed
    pub fn new(dir: impl AsRef<Path>, sample_rate: u32) -> Result<Self, RecorderError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!("Recording activations to {}", dir.display());

        Ok(Self { dir, sample_rate })
    }

    /// Write `window` to `activation-<unix millis>.wav` and return the path
    pub fn save(&self, window: &SampleWindow) -> Result<PathBuf, RecorderError> {
        let path = self.next_path();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in window.iter() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        debug!("Saved {} samples to {}", window.len(), path.display());
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_path(&self) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut path = self.dir.join(format!("activation-{}.wav", millis));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("activation-{}-{}.wav", millis, n));
            n += 1;
        }
        path
    }
}
