use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::filters::filter::{Filter, FilterConfig, FilterDomain, ProgressLock};
use crate::math_tools::apply_adapted_blackman_window;
use ndarray::{s, Array1, Axis, Zip};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct FrequencyBandPass {
    pub low: f32,  // Low cutoff frequency
    pub high: f32, // High cutoff frequency
    pub window_width: f32,
}

impl FrequencyBandPass {
    /// Spectral window: zero outside `[low, high]`, tapered edges of `window_width` inside.
    fn window(&self, frequency: &Array1<f32>) -> Array1<f32> {
        let mut freq_window = Array1::<f32>::zeros(frequency.len());
        let safe_low = self.low.max(0.0);
        let safe_high = self
            .high
            .min(frequency.last().copied().unwrap_or(self.high));

        let lower = frequency
            .iter()
            .position(|&f| f >= safe_low)
            .unwrap_or(frequency.len());
        let upper = frequency
            .iter()
            .rposition(|&f| f <= safe_high)
            .map(|i| i + 1) // rposition is inclusive, so add 1 for slicing
            .unwrap_or(0);
        if upper <= lower {
            return freq_window;
        }

        let mut band = freq_window.slice_mut(s![lower..upper]);
        band.fill(1.0);
        apply_adapted_blackman_window(
            &mut band,
            &frequency.slice(s![lower..upper]).to_owned(),
            &self.window_width,
            &self.window_width,
        );
        freq_window
    }
}

impl Filter for FrequencyBandPass {
    fn new() -> Self
    where
        Self: Sized,
    {
        FrequencyBandPass {
            low: 0.1,
            high: 3.0,
            window_width: 0.1,
        }
    }

    fn configure(&mut self, settings: &DeconvolutionSettings) {
        self.low = settings.band_pass.low;
        self.high = settings.band_pass.high;
        self.window_width = settings.band_pass.window_width;
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Frequency Band Pass".to_string(),
            description: "Restricts the sample spectra to a frequency band with tapered edges."
                .to_string(),
            hyperlink: None,
            domain: FilterDomain::Frequency,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        _progress_lock: &ProgressLock,
        _abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        if input_data.frequency.len() != input_data.fft.len_of(Axis(2)) {
            return Err(DeconvolutionError::config(
                "the band pass needs the sample spectra",
            ));
        }
        let mut output_data = input_data.clone();
        let freq_window = self.window(&input_data.frequency);

        Zip::from(output_data.fft.lanes_mut(Axis(2))).par_for_each(|mut spectrum| {
            Zip::from(&mut spectrum)
                .and(&freq_window)
                .for_each(|c, w| *c *= *w);
        });

        Ok(output_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::frequency_axis;
    use ndarray::Array3;
    use num_complex::Complex32;

    #[test]
    fn test_window_shape() {
        let frequency = frequency_axis(200, 0.05); // 0.1 THz steps
        let filter = FrequencyBandPass {
            low: 0.45,
            high: 3.05,
            window_width: 0.2,
        };
        let window = filter.window(&frequency);
        assert_eq!(window[0], 0.0);
        assert_eq!(window[4], 0.0);
        assert!(window[5] < 1e-3);
        assert_eq!(window[15], 1.0);
        assert_eq!(window[31], 0.0);
    }

    #[test]
    fn test_spectra_are_filtered() {
        let n = 64;
        let frequency = frequency_axis(n, 0.1);
        let nf = frequency.len();
        let input = FilterData {
            fft: Array3::from_elem((1, 2, nf), Complex32::new(1.0, 1.0)),
            frequency,
            ..Default::default()
        };
        let mut filter = FrequencyBandPass::new();
        filter.low = 1.0;
        filter.high = 2.0;
        let output = filter
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert_eq!(output.fft[[0, 1, 0]], Complex32::new(0.0, 0.0));
        assert_eq!(output.fft[[0, 1, nf - 1]], Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_missing_spectra_are_rejected() {
        let input = FilterData {
            frequency: Array1::linspace(0.0, 1.0, 5),
            ..Default::default()
        };
        assert!(FrequencyBandPass::new()
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .is_err());
    }
}
