//! Real-valued FFT plans for time traces.

use crate::error::Result;
use ndarray::{s, Array1, Array3, ArrayView1, Axis};
use num_complex::Complex32;
use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Forward and inverse real FFT plans for traces of a fixed length.
///
/// The forward transform is unnormalised, the inverse transform is scaled by `1/n`, so that
/// `inverse(forward(x)) == x`.
#[derive(Clone)]
pub struct SpectralPlan {
    n: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
}

impl Debug for SpectralPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralPlan").field("n", &self.n).finish()
    }
}

impl SpectralPlan {
    pub fn new(n: usize) -> Self {
        let mut real_planner = RealFftPlanner::<f32>::new();
        let r2c = real_planner.plan_fft_forward(n);
        let c2r = real_planner.plan_fft_inverse(n);
        SpectralPlan { n, r2c, c2r }
    }

    /// Number of time samples.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Number of frequency bins, `n / 2 + 1`.
    pub fn spectrum_len(&self) -> usize {
        self.n / 2 + 1
    }

    pub fn forward(&self, signal: ArrayView1<f32>) -> Result<Array1<Complex32>> {
        let mut input = signal.to_vec();
        let mut spectrum = self.r2c.make_output_vec();
        self.r2c.process(&mut input, &mut spectrum)?;
        Ok(Array1::from_vec(spectrum))
    }

    pub fn inverse(&self, spectrum: ArrayView1<Complex32>) -> Result<Array1<f32>> {
        let mut input = spectrum.to_vec();
        // the imaginary parts of DC and Nyquist do not exist for a real signal
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if self.n % 2 == 0 {
            if let Some(last) = input.last_mut() {
                last.im = 0.0;
            }
        }
        let mut output = self.c2r.make_output_vec();
        self.c2r.process(&mut input, &mut output)?;
        let scale = 1.0 / self.n as f32;
        Ok(Array1::from_vec(output).mapv(|v| v * scale))
    }
}

/// Computes the spectra of all pixels of a `(width, height, time)` cube in parallel.
pub fn forward_all(plan: &SpectralPlan, data: &Array3<f32>) -> Result<Array3<Complex32>> {
    let (width, height, _) = data.dim();
    let spectra: Vec<Array1<Complex32>> = (0..width * height)
        .into_par_iter()
        .map(|p| plan.forward(data.slice(s![p / height, p % height, ..])))
        .collect::<Result<_>>()?;
    let mut output = Array3::zeros((width, height, plan.spectrum_len()));
    for (p, spectrum) in spectra.into_iter().enumerate() {
        output.slice_mut(s![p / height, p % height, ..]).assign(&spectrum);
    }
    Ok(output)
}

/// Transforms the spectra of all pixels of a `(width, height, frequency)` cube back into the
/// time domain in parallel.
pub fn inverse_all(plan: &SpectralPlan, spectra: &Array3<Complex32>) -> Result<Array3<f32>> {
    let (width, height, _) = spectra.dim();
    let traces: Vec<Array1<f32>> = (0..width * height)
        .into_par_iter()
        .map(|p| plan.inverse(spectra.slice(s![p / height, p % height, ..])))
        .collect::<Result<_>>()?;
    let mut output = Array3::zeros((width, height, plan.len()));
    for (mut lane, trace) in output.lanes_mut(Axis(2)).into_iter().zip(traces) {
        lane.assign(&trace);
    }
    Ok(output)
}

/// Frequency axis in THz for `n` samples spaced by `dt` ps.
pub fn frequency_axis(n: usize, dt: f32) -> Array1<f32> {
    let df = 1.0 / (n as f32 * dt);
    Array1::from_iter((0..n / 2 + 1).map(|k| k as f32 * df))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_inverse_restores_signal() {
        for n in [64, 65] {
            let plan = SpectralPlan::new(n);
            let signal = Array1::from_iter((0..n).map(|i| ((i as f32) * 0.3).sin() + 0.1));
            let spectrum = plan.forward(signal.view()).unwrap();
            assert_eq!(spectrum.len(), plan.spectrum_len());
            let restored = plan.inverse(spectrum.view()).unwrap();
            for (a, b) in signal.iter().zip(restored.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_cube_transforms_match_single_traces() {
        let n = 32;
        let plan = SpectralPlan::new(n);
        let data = Array3::from_shape_fn((2, 3, n), |(x, y, t)| {
            ((t as f32) * 0.2 * (x + 1) as f32).cos() + y as f32
        });
        let spectra = forward_all(&plan, &data).unwrap();
        assert_eq!(spectra.dim(), (2, 3, plan.spectrum_len()));
        let single = plan.forward(data.slice(s![1, 2, ..])).unwrap();
        for (a, b) in spectra.slice(s![1, 2, ..]).iter().zip(single.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-4);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-4);
        }
        let restored = inverse_all(&plan, &spectra).unwrap();
        for (a, b) in data.iter().zip(restored.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_frequency_axis() {
        let f = frequency_axis(100, 0.05);
        assert_eq!(f.len(), 51);
        assert_abs_diff_eq!(f[1], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(f[50], 10.0, epsilon = 1e-4);
    }
}
