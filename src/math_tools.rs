//! Window functions and numerical helpers shared by the deconvolution filters.
//!
//! The windows follow the numpy definitions and are applied in place on a time (or frequency)
//! axis. Additionally the module contains the phase unwrapping used for transfer functions and
//! a direct 2D convolution used by the spatial Richardson-Lucy deconvolution.

use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut, Axis, Ix1, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt::{Display, Formatter};

/// Enum representing the different window functions supported for time windowing.
#[derive(Serialize, Deserialize, PartialEq, Clone, Copy, Debug)]
pub enum FftWindowType {
    /// Adapted Blackman window with only the beginning and ending being altered.
    AdaptedBlackman,
    /// Original Blackman window
    Blackman,
    /// Hanning window
    Hanning,
    /// Hamming window
    Hamming,
    /// FlatTop
    FlatTop,
}

impl Display for FftWindowType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FftWindowType::AdaptedBlackman => write!(f, "Adapted Blackman"),
            FftWindowType::Blackman => write!(f, "Blackman"),
            FftWindowType::Hanning => write!(f, "Hanning"),
            FftWindowType::Hamming => write!(f, "Hamming"),
            FftWindowType::FlatTop => write!(f, "Flat Top"),
        }
    }
}

/// Computes the Blackman window value for a given sample.
///
/// The implementation follows the mathematical definition as used by Python's numpy library.
/// The value is clamped to [0.0, 1.0], a degenerate width yields 1.0.
fn blackman_window(n: f32, m: f32) -> f32 {
    let res = 0.42 - 0.5 * (2.0 * PI * n / m).cos() + 0.08 * (4.0 * PI * n / m).cos();
    if res.is_nan() {
        1.0
    } else {
        res.clamp(0.0, 1.0)
    }
}

/// Applies the adapted Blackman window to a signal.
///
/// Only the first `lower_bound` and the last `upper_bound` (in units of `time`) are tapered
/// with the rising and falling half of a Blackman window, the rest of the signal is untouched.
pub fn apply_adapted_blackman_window(
    signal: &mut ArrayViewMut<f32, Ix1>,
    time: &Array1<f32>,
    lower_bound: &f32,
    upper_bound: &f32,
) {
    if time.is_empty() {
        return;
    }
    let first = time[0];
    let last = time[time.len() - 1];
    for (s, t) in signal.iter_mut().zip(time.iter()) {
        if *t <= lower_bound + first {
            *s *= blackman_window(t - first, 2.0 * lower_bound);
        } else if *t >= last - upper_bound {
            *s *= blackman_window(t - (last - upper_bound * 2.0), 2.0 * upper_bound);
        }
    }
}

/// Normalizes an axis to the range [0, 1].
fn normalize_time(time: &Array1<f32>) -> Array1<f32> {
    let min = time.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let max = time.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    if max > min {
        time.mapv(|t| (t - min) / (max - min))
    } else {
        Array1::zeros(time.len())
    }
}

/// Applies the Hamming window to the given signal.
pub fn apply_hamming(signal: &mut ArrayViewMut<f32, Ix1>, time: &Array1<f32>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 0.54 - 0.46 * (2.0 * PI * t).cos();
    });
}

/// Applies the Hanning (Hann) window to the given signal.
pub fn apply_hanning(signal: &mut ArrayViewMut<f32, Ix1>, time: &Array1<f32>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 0.5 * (1.0 - (2.0 * PI * t).cos());
    });
}

/// Applies the Blackman window to the given signal.
pub fn apply_blackman(signal: &mut ArrayViewMut<f32, Ix1>, time: &Array1<f32>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 0.42 - 0.5 * (2.0 * PI * t).cos() + 0.08 * (4.0 * PI * t).cos();
    });
}

/// Applies the Flat Top window to the given signal.
pub fn apply_flat_top(signal: &mut ArrayViewMut<f32, Ix1>, time: &Array1<f32>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 1.0 - 1.93 * (2.0 * PI * t).cos() + 1.29 * (4.0 * PI * t).cos()
            - 0.388 * (6.0 * PI * t).cos()
            + 0.028 * (8.0 * PI * t).cos();
    });
}

/// Applies the window of the given type. `edge_width` is only used by the adapted Blackman
/// window, where it is the tapered width at both ends.
pub fn apply_window(
    window_type: FftWindowType,
    signal: &mut ArrayViewMut<f32, Ix1>,
    time: &Array1<f32>,
    edge_width: f32,
) {
    match window_type {
        FftWindowType::AdaptedBlackman => {
            apply_adapted_blackman_window(signal, time, &edge_width, &edge_width)
        }
        FftWindowType::Blackman => apply_blackman(signal, time),
        FftWindowType::Hanning => apply_hanning(signal, time),
        FftWindowType::Hamming => apply_hamming(signal, time),
        FftWindowType::FlatTop => apply_flat_top(signal, time),
    }
}

/// Unwraps a periodic signal's values based on the provided period.
///
/// If no period is provided, it is estimated from the mean difference of the signal.
pub fn numpy_unwrap(x: &[f32], period: Option<f32>) -> Vec<f32> {
    if x.len() < 2 {
        return x.to_vec();
    }
    let period = period.unwrap_or_else(|| {
        let diff_mean = x[1..]
            .iter()
            .zip(x.iter())
            .map(|(&a, &b)| a - b)
            .sum::<f32>()
            / (x.len() - 1) as f32;
        2.0 * PI / diff_mean
    });
    let mut unwrapped = x.to_owned();
    let mut prev_val = x[0];
    let mut prev_unwrapped = x[0];
    for (val, out) in x.iter().zip(unwrapped.iter_mut()).skip(1) {
        let mut diff = val - prev_val;
        if diff > period / 2.0 {
            diff -= period;
        } else if diff < -period / 2.0 {
            diff += period;
        }
        prev_val = *val;
        prev_unwrapped += diff;
        *out = prev_unwrapped;
    }
    unwrapped
}

/// Soft thresholding operator, the proximal map of `threshold * |x|`.
pub fn soft_threshold<T: Float>(x: T, threshold: T) -> T {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        T::zero()
    }
}

/// Index and value of the sample with the largest magnitude.
pub fn abs_argmax<'a>(values: impl IntoIterator<Item = &'a f32>) -> Option<(usize, f32)> {
    values
        .into_iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(i, v)| (i, *v))
}

/// Direct 2D convolution returning an array of the same shape as `image`.
///
/// The kernel is centered, pixels outside the image are treated as zero.
pub fn convolve_2d_same(image: &ArrayView2<f32>, kernel: &ArrayView2<f32>) -> Array2<f32> {
    let (w, h) = image.dim();
    let (kw, kh) = kernel.dim();
    let cx = (kw / 2) as isize;
    let cy = (kh / 2) as isize;
    let mut output = Array2::zeros((w, h));
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            for j in 0..h {
                let mut acc = 0.0;
                for ki in 0..kw {
                    let x = i as isize + cx - ki as isize;
                    if x < 0 || x >= w as isize {
                        continue;
                    }
                    for kj in 0..kh {
                        let y = j as isize + cy - kj as isize;
                        if y < 0 || y >= h as isize {
                            continue;
                        }
                        acc += image[(x as usize, y as usize)] * kernel[(ki, kj)];
                    }
                }
                row[j] = acc;
            }
        });
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_adapted_blackman_only_tapers_edges() {
        let time = Array1::linspace(0.0, 10.0, 101);
        let mut signal = Array1::<f32>::ones(101);
        apply_adapted_blackman_window(&mut signal.view_mut(), &time, &2.0, &2.0);
        assert_abs_diff_eq!(signal[50], 1.0);
        assert!(signal[1] < 0.05);
        assert!(signal[99] < 0.05);
        assert_abs_diff_eq!(signal[20], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_hanning_vanishes_at_edges() {
        let time = Array1::linspace(0.0, 1.0, 11);
        let mut signal = Array1::<f32>::ones(11);
        apply_window(FftWindowType::Hanning, &mut signal.view_mut(), &time, 0.0);
        assert_abs_diff_eq!(signal[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(signal[5], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unwrap_removes_jumps() {
        let wrapped: Vec<f32> = (0..20)
            .map(|i| {
                let phase = -0.5 * i as f32;
                (phase + PI).rem_euclid(2.0 * PI) - PI
            })
            .collect();
        let unwrapped = numpy_unwrap(&wrapped, Some(2.0 * PI));
        for (i, p) in unwrapped.iter().enumerate() {
            assert_abs_diff_eq!(*p, -0.5 * i as f32, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(3.0_f32, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0_f32, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5_f32, 1.0), 0.0);
    }

    #[test]
    fn test_convolve_with_delta_kernel_is_identity() {
        let image = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let kernel = array![[0.0_f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        let out = convolve_2d_same(&image.view(), &kernel.view());
        assert_eq!(out, image);
    }

    #[test]
    fn test_abs_argmax_uses_magnitude() {
        let values = [0.1_f32, -2.0, 1.5];
        assert_eq!(abs_argmax(values.iter()), Some((1, -2.0)));
    }
}
