use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::filters::deconvolution::{deconvolve_bins, reference_peak};
use crate::filters::filter::{Filter, FilterConfig, FilterDomain, ProgressLock};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Wiener deconvolution `H = S·conj(R) / (|R|² + noise_level·max|R|²)`.
#[derive(Clone, Debug)]
pub struct Wiener {
    pub noise_level: f32,
}

impl Filter for Wiener {
    fn new() -> Self
    where
        Self: Sized,
    {
        Wiener { noise_level: 1e-3 }
    }

    fn configure(&mut self, settings: &DeconvolutionSettings) {
        self.noise_level = settings.wiener.noise_level;
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Wiener Deconvolution".to_string(),
            description: "Deconvolves the sample spectra with a Wiener filter. The noise level \
                          is relative to the peak power of the reference."
                .to_string(),
            hyperlink: Some((
                Some("Wiener deconvolution".to_string()),
                "https://en.wikipedia.org/wiki/Wiener_deconvolution".to_string(),
            )),
            domain: FilterDomain::Deconvolution,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        _progress_lock: &ProgressLock,
        _abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        if self.noise_level < 0.0 {
            return Err(DeconvolutionError::config("wiener noise level must be >= 0"));
        }
        let peak = reference_peak(input_data)?;
        let regularisation = self.noise_level * peak * peak;

        deconvolve_bins(input_data, |_, s, r| {
            let denominator = r.norm_sqr() + regularisation;
            if denominator > 0.0 {
                s * r.conj() / denominator
            } else {
                num_complex::Complex32::new(0.0, 0.0)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::{forward_all, frequency_axis};
    use crate::math_tools::abs_argmax;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array3};

    fn prepared(n: usize, dt: f32, shift: usize, scale: f32) -> FilterData {
        let time = Array1::from_iter((0..n).map(|i| i as f32 * dt));
        let reference = time.mapv(|t| -(t - 1.0) * (-(t - 1.0).powi(2) / 0.02).exp());
        let data = Array3::from_shape_fn((2, 1, n), |(x, _, i)| {
            scale * (x + 1) as f32 * reference[(i + n - shift) % n]
        });
        let mut input = FilterData {
            time,
            reference,
            data,
            ..Default::default()
        };
        let plan = input.plan();
        input.frequency = frequency_axis(n, dt);
        input.reference_fft = plan.forward(input.reference.view()).unwrap();
        input.fft = forward_all(&plan, &input.data).unwrap();
        input
    }

    #[test]
    fn test_recovers_delay_and_amplitude() {
        let input = prepared(256, 0.05, 30, 0.5);
        let mut filter = Wiener::new();
        filter.noise_level = 1e-6;
        let output = filter
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();

        let mut peaks = vec![];
        for x in 0..2 {
            let impulse = output.impulse.slice(ndarray::s![x, 0, ..]);
            let (index, value) = abs_argmax(impulse.iter()).unwrap();
            assert_eq!(index, 30);
            assert!(value > 0.0);
            peaks.push(value);
        }
        // the impulse response scales with the sample amplitude
        assert_abs_diff_eq!(peaks[1] / peaks[0], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_stronger_regularisation_lowers_the_peak() {
        let input = prepared(128, 0.05, 10, 1.0);
        let run = |noise_level: f32| {
            let mut filter = Wiener { noise_level };
            let output = filter
                .filter(
                    &input,
                    &Arc::new(Default::default()),
                    &Arc::new(AtomicBool::new(false)),
                )
                .unwrap();
            abs_argmax(output.impulse.iter()).unwrap().1.abs()
        };
        assert!(run(1.0) < run(1e-4));
    }
}
