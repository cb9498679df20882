//! Sparse deconvolution of THz traces.
//!
//! The impulse response `h` of every pixel minimizes
//!
//! ```text
//! ½‖r ⊛ h − s‖² + μ‖h‖₁
//! ```
//!
//! where `⊛` is the circular convolution. The problem is solved with FISTA (fast iterative
//! shrinkage-thresholding), all convolutions are evaluated in the frequency domain. The L1
//! weight is `μ = λ·max|r ⋆ s|` so that `λ` is independent of the signal amplitude.

use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::fft::SpectralPlan;
use crate::filters::deconvolution::{reference_peak, spectral_plan};
use crate::filters::filter::{set_progress, Filter, FilterConfig, FilterDomain, ProgressLock};
use crate::math_tools::soft_threshold;
use cancellable_loops::{for_each_cancellable_while, par_map_cancellable, LoopOutcome};
use ndarray::{s, Array1, Array3, ArrayView1, Zip};
use num_complex::Complex32;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SparseDeconvolution {
    pub lambda: f32,
    pub n_iterations: usize,
    pub tolerance: f32,
}

/// Result of the iteration for a single trace.
#[derive(Debug, Clone)]
pub struct SparseSolution {
    pub impulse: Array1<f32>,
    pub iterations: usize,
    pub converged: bool,
}

/// Solves the L1 regularized deconvolution of a single trace.
///
/// `reference_fft` and `sample_fft` are the (unnormalised) spectra computed with `plan`,
/// `lipschitz` is `max|R|²`. Returns `Ok(None)` if the abort flag was set.
#[allow(clippy::too_many_arguments)]
pub fn fista(
    plan: &SpectralPlan,
    reference_fft: ArrayView1<Complex32>,
    sample_fft: ArrayView1<Complex32>,
    lipschitz: f32,
    lambda: f32,
    n_iterations: usize,
    tolerance: f32,
    abort_flag: &AtomicBool,
    mut on_iteration: impl FnMut(usize),
) -> Result<Option<SparseSolution>> {
    let n = plan.len();

    // A^T s, its maximum sets the scale of the L1 weight
    let correlation_fft = Zip::from(&sample_fft)
        .and(&reference_fft)
        .map_collect(|s, r| s * r.conj());
    let correlation = plan.inverse(correlation_fft.view())?;
    let mu = lambda * correlation.iter().fold(0.0_f32, |acc, v| acc.max(v.abs()));
    let step = 1.0 / lipschitz;
    let shrink = mu * step;

    let mut x = Array1::<f32>::zeros(n);
    let mut x_prev = Array1::<f32>::zeros(n);
    let mut y = Array1::<f32>::zeros(n);
    let mut t = 1.0_f32;
    let mut iterations = 0;
    let mut converged = false;
    let mut error = None;

    let outcome = for_each_cancellable_while(0..n_iterations, abort_flag, |k| {
        // gradient A^T (A y - s) = IFFT(conj(R) (R Y - S))
        let y_fft = match plan.forward(y.view()) {
            Ok(spectrum) => spectrum,
            Err(err) => {
                error = Some(err);
                return false;
            }
        };
        let gradient_fft = Zip::from(&y_fft)
            .and(&reference_fft)
            .and(&sample_fft)
            .map_collect(|y, r, s| r.conj() * (r * y - s));
        let gradient = match plan.inverse(gradient_fft.view()) {
            Ok(gradient) => gradient,
            Err(err) => {
                error = Some(err);
                return false;
            }
        };

        Zip::from(&mut x)
            .and(&y)
            .and(&gradient)
            .for_each(|x, y, g| *x = soft_threshold(y - step * g, shrink));

        let t_next = (1.0 + (1.0 + 4.0 * t * t).sqrt()) / 2.0;
        let momentum = (t - 1.0) / t_next;
        Zip::from(&mut y)
            .and(&x)
            .and(&x_prev)
            .for_each(|y, x, xp| *y = x + momentum * (x - xp));
        t = t_next;

        let change = x
            .iter()
            .zip(x_prev.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt();
        let norm = x.iter().map(|a| a * a).sum::<f32>().sqrt();
        x_prev.assign(&x);
        iterations = k + 1;
        on_iteration(iterations);

        if k > 0 && change <= tolerance * norm.max(f32::EPSILON) {
            converged = true;
            return false;
        }
        true
    });

    if let Some(err) = error {
        return Err(err);
    }
    if outcome == LoopOutcome::Aborted {
        return Ok(None);
    }
    Ok(Some(SparseSolution {
        impulse: x,
        iterations,
        converged,
    }))
}

impl Filter for SparseDeconvolution {
    fn new() -> Self
    where
        Self: Sized,
    {
        SparseDeconvolution {
            lambda: 0.05,
            n_iterations: 500,
            tolerance: 1e-6,
        }
    }

    fn configure(&mut self, settings: &DeconvolutionSettings) {
        self.lambda = settings.sparse.lambda;
        self.n_iterations = settings.sparse.n_iterations;
        self.tolerance = settings.sparse.tolerance;
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Sparse Deconvolution".to_string(),
            description: "Finds the sparsest impulse response that reproduces the sample \
                          traces (L1 regularized least squares, solved with FISTA)."
                .to_string(),
            hyperlink: Some((
                Some("Beck & Teboulle 2009".to_string()),
                "https://doi.org/10.1137/080716542".to_string(),
            )),
            domain: FilterDomain::Deconvolution,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        progress_lock: &ProgressLock,
        abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        if self.lambda < 0.0 {
            return Err(DeconvolutionError::config("sparse lambda must be >= 0"));
        }
        let plan = spectral_plan(input_data)?;
        let peak = reference_peak(input_data)?;
        let lipschitz = peak * peak;

        let (width, height, _) = input_data.fft.dim();
        let n_pixels = width * height;
        let n_iterations = self.n_iterations;
        let done = AtomicUsize::new(0);
        set_progress(progress_lock, Some(0.0));

        let solutions = par_map_cancellable(0..n_pixels, abort_flag, |p| {
            let (x, y) = (p / height, p % height);
            let solution = fista(
                &plan,
                input_data.reference_fft.view(),
                input_data.fft.slice(s![x, y, ..]),
                lipschitz,
                self.lambda,
                n_iterations,
                self.tolerance,
                abort_flag,
                |iteration| {
                    if n_pixels == 1 && n_iterations > 0 {
                        set_progress(progress_lock, Some(iteration as f32 / n_iterations as f32));
                    }
                },
            );
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if n_pixels > 1 {
                set_progress(progress_lock, Some(finished as f32 / n_pixels as f32));
            }
            solution
        })
        .ok_or(DeconvolutionError::Aborted)?;

        let mut output_data = input_data.clone();
        let mut impulse = Array3::<f32>::zeros((width, height, plan.len()));
        let mut not_converged = 0;
        let mut total_iterations = 0;
        for (p, solution) in solutions.into_iter().enumerate() {
            let solution = solution?.ok_or(DeconvolutionError::Aborted)?;
            if !solution.converged {
                not_converged += 1;
            }
            total_iterations += solution.iterations;
            impulse
                .slice_mut(s![p / height, p % height, ..])
                .assign(&solution.impulse);
        }
        log::debug!(
            "sparse deconvolution: {:.1} iterations per pixel on average",
            total_iterations as f32 / n_pixels.max(1) as f32
        );
        if not_converged > 0 {
            log::warn!(
                "sparse deconvolution did not converge within {} iterations for {not_converged} of {n_pixels} pixels",
                self.n_iterations
            );
        }

        output_data.transfer = crate::fft::forward_all(&plan, &impulse)?;
        output_data.impulse = impulse;
        set_progress(progress_lock, None);
        Ok(output_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::{forward_all, frequency_axis};

    fn prepared(n: usize, shifts: &[(usize, f32)]) -> FilterData {
        let dt = 0.05;
        let time = Array1::from_iter((0..n).map(|i| i as f32 * dt));
        let reference = time.mapv(|t| -(t - 1.0) * (-(t - 1.0).powi(2) / 0.02).exp());
        let data = Array3::from_shape_fn((1, 1, n), |(_, _, i)| {
            shifts
                .iter()
                .map(|(shift, a)| a * reference[(i + n - shift) % n])
                .sum::<f32>()
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
    fn test_recovers_sparse_echoes() {
        let input = prepared(128, &[(20, 0.5), (60, -0.3)]);
        let mut filter = SparseDeconvolution::new();
        filter.lambda = 0.01;
        filter.n_iterations = 3000;
        filter.tolerance = 1e-7;
        let output = filter
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();

        let impulse: ArrayView1<f32> = output.impulse.slice(s![0, 0, ..]);
        let (index, value) = crate::math_tools::abs_argmax(impulse.iter()).unwrap();
        assert_eq!(index, 20);
        assert!(value > 0.3);
        assert!(impulse[60] < -0.1);
        // most samples are exactly zero
        let zeros = impulse.iter().filter(|v| **v == 0.0).count();
        assert!(zeros > 64);
    }

    #[test]
    fn test_abort_returns_error() {
        let input = prepared(64, &[(10, 1.0)]);
        let result = SparseDeconvolution::new().filter(
            &input,
            &Arc::new(Default::default()),
            &Arc::new(AtomicBool::new(true)),
        );
        assert!(matches!(result, Err(DeconvolutionError::Aborted)));
    }

    #[test]
    fn test_zero_sample_gives_zero_impulse() {
        let mut input = prepared(64, &[(10, 1.0)]);
        input.fft.fill(Complex32::new(0.0, 0.0));
        let output = SparseDeconvolution::new()
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(output.impulse.iter().all(|v| *v == 0.0));
    }
}
