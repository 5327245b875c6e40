/// Sliding sample window
///
/// Fixed-capacity circular buffer holding the most recent `raw_sample_count`
/// samples in chronological order. New slices displace the oldest data; the
/// buffer is zero-filled at creation and never resized.

use crate::config::SampleScaling;
use crate::inference::{SignalError, SignalSource};
use thiserror::Error;
use tracing::trace;

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("Invalid window size: {0}")]
    InvalidSize(usize),

    #[error("Slice of {0} samples does not fit a window of {1}")]
    SliceTooLong(usize, usize),
}

pub struct SampleWindow {
    samples: Box<[AudioSample]>,
    /// Physical index of the oldest sample, which is also the next write position
    head: usize,
    scaling: SampleScaling,
}

impl SampleWindow {
    /// Create a zero-filled window of `capacity` samples
    pub fn new(capacity: usize, scaling: SampleScaling) -> Result<Self, WindowError> {
        if capacity == 0 {
            return Err(WindowError::InvalidSize(capacity));
        }

        Ok(Self {
            samples: vec![0; capacity].into_boxed_slice(),
            head: 0,
            scaling,
        })
    }

    /// Append a slice, discarding the same number of oldest samples
    pub fn push_slice(&mut self, slice: &[AudioSample]) -> Result<(), WindowError> {
        let capacity = self.samples.len();
        if slice.len() > capacity {
            return Err(WindowError::SliceTooLong(slice.len(), capacity));
        }

        let first = (capacity - self.head).min(slice.len());
        self.samples[self.head..self.head + first].copy_from_slice(&slice[..first]);
        self.samples[..slice.len() - first].copy_from_slice(&slice[first..]);
        self.head = (self.head + slice.len()) % capacity;

        trace!("Window advanced by {} samples (head={})", slice.len(), self.head);
        Ok(())
    }

    /// Sample at chronological position `index` (0 = oldest)
    pub fn get(&self, index: usize) -> Option<AudioSample> {
        if index >= self.samples.len() {
            return None;
        }
        Some(self.samples[(self.head + index) % self.samples.len()])
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = AudioSample> + '_ {
        let (newer, older) = self.samples.split_at(self.head);
        older.iter().chain(newer.iter()).copied()
    }

    pub fn to_vec(&self) -> Vec<AudioSample> {
        self.iter().collect()
    }

    /// The `count` most recent samples, oldest first
    pub fn latest(&self, count: usize) -> Vec<AudioSample> {
        let count = count.min(self.samples.len());
        self.iter().skip(self.samples.len() - count).collect()
    }

    /// Window length; always equal to the capacity
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SignalSource for SampleWindow {
    fn total_length(&self) -> usize {
        self.samples.len()
    }

    /// Converts only the requested range; the window itself is never copied.
    fn read_range(&self, offset: usize, out: &mut [f32]) -> Result<(), SignalError> {
        let capacity = self.samples.len();
        let end = offset
            .checked_add(out.len())
            .filter(|&end| end <= capacity)
            .ok_or(SignalError::OutOfRange {
                offset,
                length: out.len(),
                total: capacity,
            })?;

        if offset == end {
            return Ok(());
        }

        let start = (self.head + offset) % capacity;
        let first = (capacity - start).min(out.len());
        let (out_first, out_rest) = out.split_at_mut(first);

        for (dst, &src) in out_first.iter_mut().zip(&self.samples[start..start + first]) {
            *dst = self.scaling.convert(src);
        }
        for (dst, &src) in out_rest.iter_mut().zip(self.samples.iter()) {
            *dst = self.scaling.convert(src);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn window(capacity: usize) -> SampleWindow {
        SampleWindow::new(capacity, SampleScaling::Raw).unwrap()
    }

    #[test]
    fn test_window_creation() {
        let w = window(8);
        assert_eq!(w.len(), 8);
        assert!(w.iter().all(|s| s == 0));
        assert!(SampleWindow::new(0, SampleScaling::Raw).is_err());
    }

    #[test]
    fn test_trailing_samples_match_latest_slice() {
        let mut w = window(10);
        let slices: Vec<Vec<i16>> = (0..7)
            .map(|n| (0..3).map(|i| (n * 10 + i) as i16).collect())
            .collect();

        for slice in &slices {
            w.push_slice(slice).unwrap();
            assert_eq!(w.len(), 10);
            assert_eq!(w.latest(3), *slice);
        }
    }

    #[test]
    fn test_chronological_order_after_wrap() {
        let mut w = window(6);
        w.push_slice(&[1, 2, 3, 4]).unwrap();
        w.push_slice(&[5, 6, 7, 8]).unwrap();

        assert_eq!(w.to_vec(), vec![3, 4, 5, 6, 7, 8]);
        assert_eq!(w.get(0), Some(3));
        assert_eq!(w.get(5), Some(8));
        assert_eq!(w.get(6), None);
    }

    #[test]
    fn test_full_length_slice_replaces_window() {
        let mut w = window(4);
        w.push_slice(&[1, 1]).unwrap();
        w.push_slice(&[9, 8, 7, 6]).unwrap();
        assert_eq!(w.to_vec(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_slice_too_long() {
        let mut w = window(4);
        assert_eq!(
            w.push_slice(&[0; 5]),
            Err(WindowError::SliceTooLong(5, 4))
        );
    }

    #[test]
    fn test_read_range_spans_wrap_point() {
        let mut w = window(6);
        w.push_slice(&[1, 2, 3, 4]).unwrap();
        w.push_slice(&[5, 6, 7, 8]).unwrap();

        let mut out = [0.0f32; 4];
        w.read_range(1, &mut out).unwrap();
        assert_eq!(out, [4.0, 5.0, 6.0, 7.0]);

        let mut all = vec![0.0f32; w.total_length()];
        w.read_range(0, &mut all).unwrap();
        assert_eq!(all, vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_read_range_out_of_bounds() {
        let w = window(6);
        let mut out = [0.0f32; 4];
        assert_eq!(
            w.read_range(3, &mut out),
            Err(SignalError::OutOfRange { offset: 3, length: 4, total: 6 })
        );
        assert!(w.read_range(usize::MAX, &mut out).is_err());
        assert!(w.read_range(6, &mut []).is_ok());
    }

    #[test]
    fn test_read_range_normalizes() {
        let mut w = SampleWindow::new(2, SampleScaling::Normalized).unwrap();
        w.push_slice(&[16384, -32768]).unwrap();

        let mut out = [0.0f32; 2];
        w.read_range(0, &mut out).unwrap();
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[1], -1.0);
    }
}
