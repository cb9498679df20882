//! Post-processing of deconvolved impulse responses.
//!
//! Reflections at layer interfaces appear as peaks ("echoes") in the impulse response. The
//! delay between two echoes together with the group refractive index gives the thickness of
//! the layer in between.

use ndarray::{Array1, ArrayView1};
use num_complex::Complex32;
use rustfft::FftPlanner;

/// Speed of light in mm/ps.
pub const SPEED_OF_LIGHT: f32 = 0.299_792_458;

/// A peak of the impulse response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Echo {
    pub index: usize,
    /// Delay (ps).
    pub time: f32,
    /// Signed amplitude of the impulse response at the peak.
    pub amplitude: f32,
}

/// Magnitude of the analytic signal.
///
/// The analytic signal is computed with the FFT: positive frequencies are doubled, negative
/// frequencies removed, DC and Nyquist kept.
pub fn hilbert_envelope(signal: ArrayView1<f32>) -> Array1<f32> {
    let n = signal.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex32> = signal.iter().map(|&v| Complex32::new(v, 0.0)).collect();
    fft.process(&mut buffer);
    for (k, c) in buffer.iter_mut().enumerate() {
        let factor = if k == 0 || (n % 2 == 0 && k == n / 2) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *c *= factor;
    }
    ifft.process(&mut buffer);

    let scale = 1.0 / n as f32;
    Array1::from_iter(buffer.iter().map(|c| c.norm() * scale))
}

/// Finds the echoes of an impulse response.
///
/// Candidates are local maxima of `|h|` above `threshold * max|h|`. Starting with the strongest,
/// candidates closer than `min_separation` (ps) to an accepted echo are discarded. The echoes
/// are returned sorted by time.
pub fn find_echoes(
    time: ArrayView1<f32>,
    impulse: ArrayView1<f32>,
    threshold: f32,
    min_separation: f32,
) -> Vec<Echo> {
    let n = impulse.len().min(time.len());
    let magnitude: Vec<f32> = impulse.iter().take(n).map(|v| v.abs()).collect();
    let peak = magnitude.iter().cloned().fold(0.0_f32, f32::max);
    if peak <= 0.0 {
        return vec![];
    }
    let limit = threshold * peak;

    let mut candidates: Vec<usize> = (0..n)
        .filter(|&i| {
            let m = magnitude[i];
            let left = if i > 0 { magnitude[i - 1] } else { f32::NEG_INFINITY };
            let right = if i + 1 < n { magnitude[i + 1] } else { f32::NEG_INFINITY };
            m >= limit && m > 0.0 && m >= left && m > right
        })
        .collect();
    candidates.sort_by(|a, b| magnitude[*b].total_cmp(&magnitude[*a]));

    let mut echoes: Vec<Echo> = vec![];
    for i in candidates {
        if echoes
            .iter()
            .all(|e| (time[i] - e.time).abs() >= min_separation)
        {
            echoes.push(Echo {
                index: i,
                time: time[i],
                amplitude: impulse[i],
            });
        }
    }
    echoes.sort_by(|a, b| a.time.total_cmp(&b.time));
    echoes
}

/// Thicknesses (mm) of the layers between consecutive echoes.
pub fn layer_thicknesses(echoes: &[Echo], refractive_index: f32) -> Vec<f32> {
    echoes
        .windows(2)
        .map(|pair| SPEED_OF_LIGHT * (pair[1].time - pair[0].time) / (2.0 * refractive_index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    #[test]
    fn test_envelope_of_cosine_is_flat() {
        for n in [64, 63] {
            let cycles = 5.0;
            let signal = Array1::from_iter(
                (0..n).map(|i| 2.0 * (2.0 * PI * cycles * i as f32 / n as f32).cos()),
            );
            let envelope = hilbert_envelope(signal.view());
            for v in envelope.iter() {
                assert_abs_diff_eq!(*v, 2.0, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_envelope_of_empty_signal() {
        assert_eq!(hilbert_envelope(Array1::zeros(0).view()).len(), 0);
    }

    #[test]
    fn test_find_echoes() {
        let time = Array1::linspace(0.0, 9.9, 100);
        let mut impulse = Array1::<f32>::zeros(100);
        impulse[10] = 1.0;
        impulse[11] = 0.6; // shoulder of the first echo
        impulse[40] = -0.5;
        impulse[70] = 0.05; // below threshold
        let echoes = find_echoes(time.view(), impulse.view(), 0.2, 0.5);
        assert_eq!(echoes.len(), 2);
        assert_eq!(echoes[0].index, 10);
        assert_eq!(echoes[1].index, 40);
        assert_abs_diff_eq!(echoes[1].amplitude, -0.5);
    }

    #[test]
    fn test_close_echoes_are_merged() {
        let time = Array1::linspace(0.0, 9.9, 100);
        let mut impulse = Array1::<f32>::zeros(100);
        impulse[10] = 1.0;
        impulse[13] = 0.8;
        let echoes = find_echoes(time.view(), impulse.view(), 0.1, 0.5);
        assert_eq!(echoes.len(), 1);
        assert_eq!(echoes[0].index, 10);
        let echoes = find_echoes(time.view(), impulse.view(), 0.1, 0.2);
        assert_eq!(echoes.len(), 2);
    }

    #[test]
    fn test_layer_thickness() {
        let echoes = [
            Echo {
                index: 0,
                time: 1.0,
                amplitude: 1.0,
            },
            Echo {
                index: 20,
                time: 3.0,
                amplitude: -0.4,
            },
        ];
        let thicknesses = layer_thicknesses(&echoes, 1.5);
        assert_eq!(thicknesses.len(), 1);
        assert_abs_diff_eq!(thicknesses[0], 0.299_792_458 * 2.0 / 3.0, epsilon = 1e-6);
        assert!(layer_thicknesses(&echoes[..1], 1.5).is_empty());
    }
}
