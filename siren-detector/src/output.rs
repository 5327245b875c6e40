/// Detection output
///
/// The debounced signal leaves the service on a single GPIO line: high while
/// a siren is being detected, low otherwise.

use rppal::gpio::{Gpio, OutputPin};
use thiserror::Error;
use tracing::{debug, info};

use crate::hysteresis::DetectionSignal;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("Output write failed: {0}")]
    Write(String),
}

/// Sink for detection signals
#[cfg_attr(test, mockall::automock)]
pub trait DetectionOutput {
    fn set(&mut self, signal: DetectionSignal) -> Result<(), OutputError>;
}

impl<O: DetectionOutput + ?Sized> DetectionOutput for Box<O> {
    fn set(&mut self, signal: DetectionSignal) -> Result<(), OutputError> {
        (**self).set(signal)
    }
}

/// GPIO line driven by the detection signal
///
/// The pin is configured as an output and driven low on open, and reset to
/// its previous mode when dropped.
pub struct GpioOutput {
    pin: OutputPin,
}

impl GpioOutput {
    /// Open BCM pin `bcm` as an output, initially low
    pub fn open(bcm: u8) -> Result<Self, OutputError> {
        let pin = Gpio::new()?.get(bcm)?.into_output_low();
        info!("GPIO {} configured as output (low)", bcm);
        Ok(Self { pin })
    }
}

impl DetectionOutput for GpioOutput {
    fn set(&mut self, signal: DetectionSignal) -> Result<(), OutputError> {
        match signal {
            DetectionSignal::Active => self.pin.set_high(),
            DetectionSignal::Inactive => self.pin.set_low(),
        }
        debug!("GPIO {} <- {:?}", self.pin.pin(), signal);
        Ok(())
    }
}

impl Drop for GpioOutput {
    fn drop(&mut self) {
        self.pin.set_low();
        info!("GPIO {} released", self.pin.pin());
    }
}

/// Output that only logs, for running without GPIO hardware
#[derive(Debug, Default)]
pub struct LogOutput {
    history: Vec<DetectionSignal>,
}

impl LogOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every signal written so far, oldest first
    pub fn history(&self) -> &[DetectionSignal] {
        &self.history
    }
}

impl DetectionOutput for LogOutput {
    fn set(&mut self, signal: DetectionSignal) -> Result<(), OutputError> {
        info!("Detection output <- {:?}", signal);
        self.history.push(signal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_output_records_history() {
        let mut output = LogOutput::new();
        output.set(DetectionSignal::Inactive).unwrap();
        output.set(DetectionSignal::Active).unwrap();

        assert_eq!(
            output.history(),
            &[DetectionSignal::Inactive, DetectionSignal::Active]
        );
    }

    #[test]
    fn test_boxed_output_forwards() {
        let mut output: Box<dyn DetectionOutput> = Box::new(LogOutput::new());
        assert!(output.set(DetectionSignal::Active).is_ok());
    }
}
