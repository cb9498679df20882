use crate::config::DeconvolutionSettings;
use crate::data_container::{FilterData, MIN_SAMPLES};
use crate::error::Result;
use crate::filters::filter::{Filter, FilterConfig, FilterDomain, ProgressLock};
use crate::math_tools::{apply_window, FftWindowType};
use ndarray::{s, Axis, Zip};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Crops all traces to `[low, high]` and applies a window function to the cropped traces.
#[derive(Clone, Debug)]
pub struct TimeWindow {
    pub low: f32,
    pub high: f32,
    pub window_width: f32,
    pub window_type: FftWindowType,
}

impl TimeWindow {
    /// Index range selected by the window, the full trace if the bounds are unset or too narrow.
    fn bounds(&self, time: &ndarray::Array1<f32>) -> (usize, usize) {
        let full = (0, time.len());
        if self.low == 0.0 && self.high == 0.0 {
            log::debug!("time window not set, keeping the full trace");
            return full;
        }
        if self.low >= self.high {
            log::warn!(
                "time window [{}, {}] ps is empty, keeping the full trace",
                self.low,
                self.high
            );
            return full;
        }
        let lower = time
            .iter()
            .position(|&t| t >= self.low)
            .unwrap_or(time.len());
        let upper = time
            .iter()
            .rposition(|&t| t <= self.high)
            .map_or(0, |i| i + 1);
        if upper <= lower || upper - lower < MIN_SAMPLES {
            log::warn!(
                "time window [{}, {}] ps selects fewer than {MIN_SAMPLES} samples, \
                 keeping the full trace",
                self.low,
                self.high
            );
            return full;
        }
        (lower, upper)
    }
}

impl Filter for TimeWindow {
    fn new() -> Self
    where
        Self: Sized,
    {
        TimeWindow {
            low: 0.0,
            high: 0.0,
            window_width: 2.0,
            window_type: FftWindowType::AdaptedBlackman,
        }
    }

    fn configure(&mut self, settings: &DeconvolutionSettings) {
        let s = &settings.time_window;
        self.low = s.low;
        self.high = s.high;
        self.window_width = s.window_width;
        self.window_type = s.window_type;
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Time Window".to_string(),
            description: "Crops reference and sample traces to a time range and tapers them \
                          with a window function to suppress artifacts of the FFT."
                .to_string(),
            hyperlink: None,
            domain: FilterDomain::TimeBeforeFFT,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        _progress_lock: &ProgressLock,
        _abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        let mut output_data = input_data.clone();
        let (lower, upper) = self.bounds(&input_data.time);

        output_data.time = input_data.time.slice(s![lower..upper]).to_owned();
        output_data.reference = input_data.reference.slice(s![lower..upper]).to_owned();
        output_data.data = input_data.data.slice(s![.., .., lower..upper]).to_owned();

        let time = output_data.time.clone();
        let window_type = self.window_type;
        let edge = self.window_width;
        apply_window(
            window_type,
            &mut output_data.reference.view_mut(),
            &time,
            edge,
        );
        Zip::from(output_data.data.lanes_mut(Axis(2))).par_for_each(|mut trace| {
            apply_window(window_type, &mut trace, &time, edge);
        });

        // the spectra have to be planned for the new length
        output_data.plan = None;
        log::debug!(
            "time window selected samples {lower}..{upper} ({} samples)",
            upper - lower
        );
        Ok(output_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};

    fn input(n: usize) -> FilterData {
        let time = Array1::linspace(0.0, (n - 1) as f32 * 0.1, n);
        FilterData {
            reference: Array1::ones(n),
            data: Array3::ones((2, 2, n)),
            time,
            ..Default::default()
        }
    }

    fn run(filter: &mut TimeWindow, data: &FilterData) -> FilterData {
        filter
            .filter(
                data,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap()
    }

    #[test]
    fn test_crops_all_traces() {
        let mut filter = TimeWindow::new();
        filter.low = 0.95;
        filter.high = 2.95;
        filter.window_width = 0.3;
        let output = run(&mut filter, &input(50));
        assert_eq!(output.time.len(), 20);
        assert_eq!(output.reference.len(), 20);
        assert_eq!(output.data.dim(), (2, 2, 20));
        assert!(output.plan.is_none());
        // tapered edges, untouched center
        assert!(output.reference[0] < 1e-3);
        assert!((output.data[[1, 1, 10]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unset_bounds_keep_full_trace() {
        let mut filter = TimeWindow::new();
        filter.window_width = 0.5;
        let output = run(&mut filter, &input(50));
        assert_eq!(output.time.len(), 50);
        assert!(output.data[[0, 0, 49]] < 1e-3);
    }

    #[test]
    fn test_too_narrow_window_keeps_full_trace() {
        let mut filter = TimeWindow::new();
        filter.low = 0.95;
        filter.high = 1.15;
        let output = run(&mut filter, &input(50));
        assert_eq!(output.time.len(), 50);
    }

    #[test]
    fn test_window_outside_the_trace_keeps_full_trace() {
        let time = input(50).time;
        let mut filter = TimeWindow::new();
        filter.low = 10.0;
        filter.high = 12.0;
        assert_eq!(filter.bounds(&time), (0, 50));
        filter.low = -3.0;
        filter.high = -1.0;
        assert_eq!(filter.bounds(&time), (0, 50));
        filter.low = 2.0;
        filter.high = 1.0;
        assert_eq!(filter.bounds(&time), (0, 50));
    }
}
