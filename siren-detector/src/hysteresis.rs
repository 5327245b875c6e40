/// Detection debounce
///
/// Turns noisy per-slice classification outcomes into a stable binary signal.
/// A bounded counter moves one step per outcome; the output only flips once
/// the counter is driven all the way to one of its saturation bounds.

use tracing::debug;

/// Binary detection output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSignal {
    /// Counter saturated at its upper bound; line driven high
    Active,

    /// Counter drained to zero; line driven low
    Inactive,
}

impl DetectionSignal {
    pub fn is_active(self) -> bool {
        matches!(self, DetectionSignal::Active)
    }
}

/// Hysteresis counter in `[0, max]` plus the last emitted signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionState {
    counter: u8,
    max: u8,
    output: DetectionSignal,
}

impl DetectionState {
    /// Zero counter, output `Inactive`
    pub fn new(max: u8) -> Self {
        Self::with_counter(max, 0)
    }

    /// Start from an arbitrary counter value (clamped to `max`)
    pub fn with_counter(max: u8, counter: u8) -> Self {
        let counter = counter.min(max);
        let output = if max > 0 && counter == max {
            DetectionSignal::Active
        } else {
            DetectionSignal::Inactive
        };

        Self { counter, max, output }
    }

    /// Feed one classification outcome
    ///
    /// Returns the signal to assert when the counter sits on a bound,
    /// `None` while it is strictly between bounds.
    pub fn update(&mut self, detected: bool) -> Option<DetectionSignal> {
        if detected {
            self.counter = self.counter.saturating_add(1).min(self.max);
            if self.counter >= self.max {
                return Some(self.emit(DetectionSignal::Active));
            }
        } else {
            self.counter = self.counter.saturating_sub(1);
            if self.counter == 0 {
                return Some(self.emit(DetectionSignal::Inactive));
            }
        }

        None
    }

    fn emit(&mut self, signal: DetectionSignal) -> DetectionSignal {
        if self.output != signal {
            debug!("Detection: {:?} -> {:?}", self.output, signal);
        }
        self.output = signal;
        signal
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    /// Last emitted signal
    pub fn output(&self) -> DetectionSignal {
        self.output
    }
}
