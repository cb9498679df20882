//! Frequency domain deconvolution shared by the Double Gaussian and Wiener filters.
//!
//! Both filters compute the transfer function of every pixel bin by bin from the sample
//! spectrum `S` and the reference spectrum `R`; the impulse response follows by inverse FFT.

use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::fft::{inverse_all, SpectralPlan};
use ndarray::{Array3, Axis, Zip};
use num_complex::Complex32;

/// Checks that the spectra are available and returns the matching plan.
pub(crate) fn spectral_plan(input_data: &FilterData) -> Result<SpectralPlan> {
    let plan = input_data
        .plan
        .clone()
        .ok_or_else(|| DeconvolutionError::config("the deconvolution needs the spectra"))?;
    if plan.len() != input_data.time.len()
        || input_data.reference_fft.len() != plan.spectrum_len()
        || input_data.fft.len_of(Axis(2)) != plan.spectrum_len()
    {
        return Err(DeconvolutionError::config(
            "spectra do not match the time axis",
        ));
    }
    Ok(plan)
}

/// Largest magnitude of the reference spectrum, an error for an all-zero reference.
pub(crate) fn reference_peak(input_data: &FilterData) -> Result<f32> {
    let peak = input_data
        .reference_fft
        .iter()
        .fold(0.0_f32, |acc, c| acc.max(c.norm()));
    if peak > 0.0 && peak.is_finite() {
        Ok(peak)
    } else {
        Err(DeconvolutionError::invalid_trace(
            "the reference spectrum is zero",
        ))
    }
}

/// Computes `transfer(k, S[k], R[k])` for every bin of every pixel and the impulse responses.
pub(crate) fn deconvolve_bins<F>(input_data: &FilterData, transfer: F) -> Result<FilterData>
where
    F: Fn(usize, Complex32, Complex32) -> Complex32 + Sync + Send,
{
    let plan = spectral_plan(input_data)?;
    let mut output_data = input_data.clone();
    let reference_fft = &input_data.reference_fft;

    let mut transfer_functions = Array3::<Complex32>::zeros(input_data.fft.raw_dim());
    Zip::from(transfer_functions.lanes_mut(Axis(2)))
        .and(input_data.fft.lanes(Axis(2)))
        .par_for_each(|mut h, s| {
            for (k, value) in h.iter_mut().enumerate() {
                let r = reference_fft[k];
                *value = transfer(k, s[k], r);
            }
        });

    output_data.impulse = inverse_all(&plan, &transfer_functions)?;
    output_data.transfer = transfer_functions;
    Ok(output_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_missing_spectra() {
        let input = FilterData {
            time: Array1::linspace(0.0, 1.0, 8),
            ..Default::default()
        };
        assert!(spectral_plan(&input).is_err());
    }

    #[test]
    fn test_zero_reference() {
        let input = FilterData {
            reference_fft: Array1::zeros(5),
            ..Default::default()
        };
        assert!(matches!(
            reference_peak(&input),
            Err(DeconvolutionError::InvalidTrace { .. })
        ));
    }

    #[test]
    fn test_identity_transfer_restores_traces() {
        let n = 16;
        let mut input = FilterData {
            time: Array1::linspace(0.0, 1.5, n),
            reference: Array1::ones(n),
            data: Array3::from_shape_fn((1, 1, n), |(_, _, i)| (i as f32 * 0.7).sin()),
            ..Default::default()
        };
        let plan = input.plan();
        input.reference_fft = plan.forward(input.reference.view()).unwrap();
        input.fft = crate::fft::forward_all(&plan, &input.data).unwrap();

        let output = deconvolve_bins(&input, |_, s, _| s).unwrap();
        for (a, b) in output.impulse.iter().zip(input.data.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
