use crate::analysis::hilbert_envelope;
use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::Result;
use crate::filters::filter::{Filter, FilterConfig, FilterDomain, ProgressLock};
use ndarray::{Axis, Zip};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Replaces every impulse response by its envelope, which makes echoes independent of their sign.
#[derive(Clone, Debug)]
pub struct HilbertEnvelope;

impl Filter for HilbertEnvelope {
    fn new() -> Self
    where
        Self: Sized,
    {
        HilbertEnvelope
    }

    fn configure(&mut self, _settings: &DeconvolutionSettings) {}

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Hilbert Envelope".to_string(),
            description: "Replaces the impulse responses by the magnitude of their analytic signal."
                .to_string(),
            hyperlink: None,
            domain: FilterDomain::TimeAfterFFT,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        _progress_lock: &ProgressLock,
        _abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        let mut output_data = input_data.clone();
        Zip::from(output_data.impulse.lanes_mut(Axis(2))).par_for_each(|mut trace| {
            let envelope = hilbert_envelope(trace.view());
            trace.assign(&envelope);
        });
        Ok(output_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_envelope_is_positive() {
        let n = 64;
        let input = FilterData {
            impulse: Array3::from_shape_fn((2, 2, n), |(x, y, i)| {
                let t = i as f32 - 32.0;
                -((x + y + 1) as f32) * (-(t * t) / 8.0).exp() * (t * 0.8).cos()
            }),
            ..Default::default()
        };
        let output = HilbertEnvelope::new()
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(output.impulse.iter().all(|v| *v >= 0.0));
        assert!(output.impulse[[1, 1, 32]] > 2.5);
    }
}
