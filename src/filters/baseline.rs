use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::filters::filter::{Filter, FilterConfig, FilterDomain, ProgressLock};
use ndarray::{ArrayView1, Axis, Zip};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Subtracts the mean of the pre-pulse region from the reference and from every pixel.
#[derive(Clone, Debug)]
pub struct BaselineRemoval {
    /// Length of the pre-pulse region (ps).
    pub window: f32,
}

/// Number of samples within `window` of the first time step, at least one.
fn pre_pulse_samples(time: ArrayView1<f32>, window: f32) -> usize {
    let Some(first) = time.first() else {
        return 0;
    };
    time.iter()
        .take_while(|t| **t <= first + window)
        .count()
        .max(1)
}

fn mean(values: ArrayView1<f32>) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.sum() / values.len() as f32
    }
}

impl Filter for BaselineRemoval {
    fn new() -> Self
    where
        Self: Sized,
    {
        BaselineRemoval { window: 2.0 }
    }

    fn configure(&mut self, settings: &DeconvolutionSettings) {
        self.window = settings.baseline.window;
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Baseline Removal".to_string(),
            description: "Removes the DC offset of the reference and of all sample traces. \
                          The offset is the mean of the pre-pulse region."
                .to_string(),
            hyperlink: None,
            domain: FilterDomain::TimeBeforeFFTPrioFirst,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        _progress_lock: &ProgressLock,
        _abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        if self.window < 0.0 {
            return Err(DeconvolutionError::config("baseline window must be >= 0"));
        }
        let mut output_data = input_data.clone();
        let n = pre_pulse_samples(output_data.time.view(), self.window);
        if n == 0 {
            return Ok(output_data);
        }

        let offset = mean(output_data.reference.slice(ndarray::s![..n]));
        output_data.reference -= offset;

        Zip::from(output_data.data.lanes_mut(Axis(2))).par_for_each(|mut trace| {
            let offset = mean(trace.slice(ndarray::s![..n]));
            trace -= offset;
        });

        log::debug!("removed baseline using {n} pre-pulse samples");
        Ok(output_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array3};

    #[test]
    fn test_offsets_are_removed() {
        let n = 40;
        let time = Array1::linspace(0.0, 3.9, n);
        let pulse = |t: f32| (-(t - 3.0).powi(2) / 0.01).exp();
        let input = FilterData {
            reference: time.mapv(|t| pulse(t) + 0.5),
            data: Array3::from_shape_fn((2, 1, n), |(x, _, i)| pulse(time[i]) - x as f32),
            time,
            ..Default::default()
        };

        let mut filter = BaselineRemoval::new();
        filter.window = 1.0;
        let output = filter
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();

        assert_abs_diff_eq!(output.reference[0], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(output.data[[0, 0, 5]], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(output.data[[1, 0, 5]], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(output.data[[1, 0, 30]], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_zero_window_uses_first_sample() {
        let time = Array1::linspace(0.0, 0.4, 5);
        assert_eq!(pre_pulse_samples(time.view(), 0.0), 1);
        assert_eq!(pre_pulse_samples(time.view(), 0.25), 3);
    }
}
