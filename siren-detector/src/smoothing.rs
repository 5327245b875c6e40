/// Moving-average filter over classification results
///
/// Averages each label's confidence over the last `size` results, which
/// suppresses single-slice spikes when slices overlap heavily.

use crate::inference::{Classification, ClassificationResult};
use std::collections::VecDeque;
use tracing::debug;

pub struct MovingAverage {
    size: usize,
    history: VecDeque<Vec<f32>>,
}

impl MovingAverage {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        debug!("Moving-average filter over {} results", size);

        Self {
            size,
            history: VecDeque::with_capacity(size),
        }
    }

    /// Push `result` into the history and return the averaged result
    pub fn apply(&mut self, result: &ClassificationResult) -> ClassificationResult {
        let values: Vec<f32> = result.classifications().iter().map(|c| c.value).collect();

        // A different label count means a different model; old history is meaningless
        if self
            .history
            .front()
            .is_some_and(|prev| prev.len() != values.len())
        {
            self.history.clear();
        }

        if self.history.len() == self.size {
            self.history.pop_front();
        }
        self.history.push_back(values);

        let count = self.history.len() as f32;
        let classifications = result
            .classifications()
            .iter()
            .enumerate()
            .map(|(ix, c)| Classification {
                label: c.label.clone(),
                value: self.history.iter().map(|h| h[ix]).sum::<f32>() / count,
            })
            .collect();

        let smoothed = ClassificationResult::new(classifications, result.timing());
        match result.anomaly() {
            Some(anomaly) => smoothed.with_anomaly(anomaly),
            None => smoothed,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
