use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::filters::deconvolution::{deconvolve_bins, reference_peak};
use crate::filters::filter::{Filter, FilterConfig, FilterDomain, ProgressLock};
use num_complex::Complex32;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Inverse filter `H = S / R` regularised by a double Gaussian band pass.
///
/// The band pass `exp(-(f/high)²) - exp(-(f/low)²)` suppresses the DC component and the noisy
/// high frequencies. Bins where the reference is weaker than `floor * max|R|` are set to zero.
#[derive(Clone, Debug)]
pub struct DoubleGaussian {
    pub low_cutoff: f32,
    pub high_cutoff: f32,
    pub floor: f32,
}

/// The double Gaussian band pass at frequency `f`.
pub fn double_gaussian_filter(f: f32, low_cutoff: f32, high_cutoff: f32) -> f32 {
    (-(f / high_cutoff).powi(2)).exp() - (-(f / low_cutoff).powi(2)).exp()
}

impl Filter for DoubleGaussian {
    fn new() -> Self
    where
        Self: Sized,
    {
        DoubleGaussian {
            low_cutoff: 0.1,
            high_cutoff: 2.0,
            floor: 1e-3,
        }
    }

    fn configure(&mut self, settings: &DeconvolutionSettings) {
        self.low_cutoff = settings.double_gaussian.low_cutoff;
        self.high_cutoff = settings.double_gaussian.high_cutoff;
        self.floor = settings.double_gaussian.floor;
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Double Gaussian Deconvolution".to_string(),
            description: "Divides the sample spectra by the reference spectrum and applies a \
                          double Gaussian band pass to the quotient."
                .to_string(),
            hyperlink: None,
            domain: FilterDomain::Deconvolution,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        _progress_lock: &ProgressLock,
        _abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        if self.low_cutoff <= 0.0 || self.high_cutoff <= self.low_cutoff {
            return Err(DeconvolutionError::config(
                "double gaussian cutoffs must satisfy 0 < low < high",
            ));
        }
        let threshold = self.floor.max(0.0) * reference_peak(input_data)?;
        let frequency = &input_data.frequency;
        let (low, high) = (self.low_cutoff, self.high_cutoff);

        deconvolve_bins(input_data, |k, s, r| {
            if r.norm() < threshold || r.norm() == 0.0 {
                Complex32::new(0.0, 0.0)
            } else {
                s / r * double_gaussian_filter(frequency[k], low, high)
            }
        })
    }
}
