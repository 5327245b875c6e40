/// Edge Impulse back-end
///
/// Calls the exported C++ classifier through the C ABI shim in
/// `ffi/ei_shim.cpp`. The SDK's `signal_t` callback is routed back into a
/// [`SignalSource`] via an opaque context pointer, so no process-wide buffer
/// is needed.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::mem::MaybeUninit;
use std::slice;
use tracing::{debug, info, warn};

use crate::config::{DetectorConfig, SampleScaling};
use crate::inference::{
    Classification, ClassificationResult, InferenceEngine, InferenceError, InferenceTiming,
    SignalSource,
};

/// Must match `EI_SHIM_MAX_LABELS` in the shim
const MAX_LABELS: usize = 32;

#[repr(C)]
struct ShimResult {
    label_count: usize,
    labels: [*const c_char; MAX_LABELS],
    values: [f32; MAX_LABELS],
    anomaly: f32,
    has_anomaly: bool,
    dsp_ms: c_int,
    classification_ms: c_int,
    anomaly_ms: c_int,
}

type GetDataFn =
    unsafe extern "C" fn(ctx: *mut c_void, offset: usize, length: usize, out: *mut f32) -> c_int;

extern "C" {
    fn ei_shim_raw_sample_count() -> usize;
    fn ei_shim_frequency() -> u32;
    fn ei_shim_run_classifier(
        ctx: *mut c_void,
        get_data: GetDataFn,
        total_length: usize,
        result: *mut ShimResult,
        debug: bool,
    ) -> c_int;
}

/// `ctx` points at a `&dyn SignalSource` living on the caller's stack for the
/// duration of `ei_shim_run_classifier`.
unsafe extern "C" fn get_data(
    ctx: *mut c_void,
    offset: usize,
    length: usize,
    out: *mut f32,
) -> c_int {
    if ctx.is_null() || out.is_null() {
        return -1;
    }

    let source = unsafe { &*(ctx as *const &dyn SignalSource) };
    let out = unsafe { slice::from_raw_parts_mut(out, length) };

    match source.read_range(offset, out) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// The SDK's `int16_to_float` casts without normalizing, so exported models
/// are trained on raw int16 magnitudes
fn scaling_warning(scaling: SampleScaling) -> Option<&'static str> {
    match scaling {
        SampleScaling::Raw => None,
        SampleScaling::Normalized => Some(
            "sample_scaling is \"normalized\" but Edge Impulse models expect raw int16 \
             values; set \"sample_scaling\": \"raw\" unless the model was trained on \
             normalized audio",
        ),
    }
}

pub struct EdgeImpulseEngine {
    raw_sample_count: usize,
    debug: bool,
}

impl EdgeImpulseEngine {
    /// Check the configuration against the compiled model
    pub fn new(config: &DetectorConfig) -> Result<Self, InferenceError> {
        // SAFETY: plain getters over compile-time model constants.
        let (raw_sample_count, frequency) =
            unsafe { (ei_shim_raw_sample_count(), ei_shim_frequency()) };

        if raw_sample_count != config.raw_sample_count {
            return Err(InferenceError::Init(format!(
                "model input is {} samples, raw_sample_count is {}",
                raw_sample_count, config.raw_sample_count
            )));
        }

        if frequency != config.sample_rate {
            return Err(InferenceError::Init(format!(
                "model expects {} Hz, sample_rate is {}",
                frequency, config.sample_rate
            )));
        }

        if let Some(message) = scaling_warning(config.sample_scaling) {
            warn!("{}", message);
        }

        info!(
            "Edge Impulse model: {} samples at {} Hz",
            raw_sample_count, frequency
        );

        Ok(Self {
            raw_sample_count,
            debug: config.debug,
        })
    }
}

impl InferenceEngine for EdgeImpulseEngine {
    fn run(&mut self, signal: &dyn SignalSource) -> Result<ClassificationResult, InferenceError> {
        let total = signal.total_length();
        if total != self.raw_sample_count {
            return Err(InferenceError::InputLength {
                expected: self.raw_sample_count,
                actual: total,
            });
        }

        let mut source: &dyn SignalSource = signal;
        let ctx = &mut source as *mut &dyn SignalSource as *mut c_void;
        let mut raw = MaybeUninit::<ShimResult>::zeroed();

        // SAFETY: `ctx` outlives the call and the shim writes a complete
        // `ShimResult` before returning 0.
        let code = unsafe {
            ei_shim_run_classifier(ctx, get_data, total, raw.as_mut_ptr(), self.debug)
        };
        if code != 0 {
            return Err(InferenceError::Engine(code));
        }
        let raw = unsafe { raw.assume_init() };

        let count = raw.label_count.min(MAX_LABELS);
        let classifications = (0..count)
            .map(|ix| {
                let label = if raw.labels[ix].is_null() {
                    format!("label{}", ix)
                } else {
                    // SAFETY: labels point at static strings inside the model.
                    unsafe { CStr::from_ptr(raw.labels[ix]) }
                        .to_string_lossy()
                        .into_owned()
                };
                Classification {
                    label,
                    value: raw.values[ix],
                }
            })
            .collect();

        let timing = InferenceTiming {
            dsp_ms: raw.dsp_ms.max(0) as u32,
            classification_ms: raw.classification_ms.max(0) as u32,
            anomaly_ms: raw.anomaly_ms.max(0) as u32,
        };

        let result = ClassificationResult::new(classifications, timing);
        debug!("Edge Impulse result: {:?}", result);

        Ok(if raw.has_anomaly {
            result.with_anomaly(raw.anomaly)
        } else {
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_scaling_warns() {
        assert!(scaling_warning(SampleScaling::Normalized).is_some());
        assert!(scaling_warning(SampleScaling::Raw).is_none());
    }
}
