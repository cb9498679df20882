use crate::data_container::interpolator;
use crate::error::{DeconvolutionError, Result};
use crate::io::npz_array_f32;
use ndarray::{Array1, Array2};
use ndarray_npy::NpzReader;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Cubic spline interpolation coefficients for a single curve
#[derive(Serialize, Deserialize, Default, PartialEq, Debug, Clone)]
pub struct CubicSplineCoeffs {
    pub knots: Array1<f32>,   // x values (knots)
    pub values: Array1<f32>,  // y values at knots
    pub coeff_a: Array1<f32>, // a coefficient for each segment
    pub coeff_b: Array1<f32>, // b coefficient for each segment
    pub coeff_c: Array1<f32>, // c coefficient for each segment
    pub coeff_d: Array1<f32>, // d coefficient for each segment
}

impl CubicSplineCoeffs {
    /// Fits a natural cubic spline (zero curvature at both ends) through the given points.
    pub fn natural(knots: Array1<f32>, values: Array1<f32>) -> Result<CubicSplineCoeffs> {
        let n = knots.len();
        if n < 2 || values.len() != n {
            return Err(DeconvolutionError::Interpolation {
                message: format!(
                    "a spline needs at least two knots with one value each, got {} knots and {} values",
                    n,
                    values.len()
                ),
            });
        }
        let h: Vec<f32> = (0..n - 1).map(|i| knots[i + 1] - knots[i]).collect();
        if h.iter().any(|&hi| hi <= 0.0) {
            return Err(DeconvolutionError::Interpolation {
                message: "spline knots must be strictly increasing".to_string(),
            });
        }

        // tridiagonal system for the second derivatives (Thomas algorithm)
        let mut m = vec![0.0_f32; n];
        if n > 2 {
            let mut diag = vec![0.0_f32; n];
            let mut rhs = vec![0.0_f32; n];
            for i in 1..n - 1 {
                diag[i] = 2.0 * (h[i - 1] + h[i]);
                rhs[i] = 6.0
                    * ((values[i + 1] - values[i]) / h[i] - (values[i] - values[i - 1]) / h[i - 1]);
            }
            for i in 2..n - 1 {
                let w = h[i - 1] / diag[i - 1];
                diag[i] -= w * h[i - 1];
                rhs[i] -= w * rhs[i - 1];
            }
            m[n - 2] = rhs[n - 2] / diag[n - 2];
            for i in (1..n - 2).rev() {
                m[i] = (rhs[i] - h[i] * m[i + 1]) / diag[i];
            }
        }

        let segments = n - 1;
        let mut coeff_a = Array1::zeros(segments);
        let mut coeff_b = Array1::zeros(segments);
        let mut coeff_c = Array1::zeros(segments);
        let mut coeff_d = Array1::zeros(segments);
        for i in 0..segments {
            coeff_a[i] = values[i];
            coeff_b[i] = (values[i + 1] - values[i]) / h[i] - h[i] * (2.0 * m[i] + m[i + 1]) / 6.0;
            coeff_c[i] = m[i] / 2.0;
            coeff_d[i] = (m[i + 1] - m[i]) / (6.0 * h[i]);
        }
        Ok(CubicSplineCoeffs {
            knots,
            values,
            coeff_a,
            coeff_b,
            coeff_c,
            coeff_d,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    /// Evaluate spline at a single point with constrained extrapolation
    pub fn eval_single(&self, x: f32) -> f32 {
        let n = self.knots.len();

        if n == 0 {
            return 0.0;
        }
        if n == 1 {
            return self.values[0];
        }

        // Linear continuation based on the endpoint tangent, kept positive for beam widths
        if x < self.knots[0] {
            let dx = x - self.knots[0];
            let y_extrap = self.coeff_a[0] + self.coeff_b[0] * dx;
            return y_extrap.max(1e-6);
        }

        if x > self.knots[n - 1] {
            let i = n - 2;
            let dx_end = self.knots[n - 1] - self.knots[i];
            let y_end = self.coeff_a[i]
                + self.coeff_b[i] * dx_end
                + self.coeff_c[i] * dx_end * dx_end
                + self.coeff_d[i] * dx_end * dx_end * dx_end;
            let slope_end = self.coeff_b[i]
                + 2.0 * self.coeff_c[i] * dx_end
                + 3.0 * self.coeff_d[i] * dx_end * dx_end;
            let y_extrap = y_end + slope_end * (x - self.knots[n - 1]);
            return y_extrap.max(1e-6);
        }

        // binary search for the segment
        let mut left = 0;
        let mut right = n - 1;
        while right - left > 1 {
            let mid = (left + right) / 2;
            if self.knots[mid] > x {
                right = mid;
            } else {
                left = mid;
            }
        }

        let dx = x - self.knots[left];
        self.coeff_a[left]
            + self.coeff_b[left] * dx
            + self.coeff_c[left] * dx * dx
            + self.coeff_d[left] * dx * dx * dx
    }
}

/// Beam parameters at a single frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    pub wx: f32,
    pub wy: f32,
    pub x0: f32,
    pub y0: f32,
}

/// Represents the Point Spread Function (PSF) of the focused THz beam.
///
/// The beam widths and centers are stored as cubic splines over frequency (THz), so that the
/// PSF can be evaluated at any frequency used for the spatial deconvolution.
///
/// # Fields
/// - `wx_spline`, `wy_spline`: Beam width in X and Y direction.
/// - `x0_spline`, `y0_spline`: Beam center in X and Y direction.
#[derive(Serialize, Deserialize, Default, PartialEq, Debug, Clone)]
pub struct PSF {
    pub wx_spline: CubicSplineCoeffs,
    pub wy_spline: CubicSplineCoeffs,
    pub x0_spline: CubicSplineCoeffs,
    pub y0_spline: CubicSplineCoeffs,
}

impl PSF {
    pub fn is_empty(&self) -> bool {
        self.wx_spline.is_empty() || self.wy_spline.is_empty()
    }

    /// Fits the splines through beam parameters measured at the given frequencies.
    pub fn from_measurements(
        frequencies: &Array1<f32>,
        wx: &Array1<f32>,
        wy: &Array1<f32>,
        x0: &Array1<f32>,
        y0: &Array1<f32>,
    ) -> Result<PSF> {
        Ok(PSF {
            wx_spline: CubicSplineCoeffs::natural(frequencies.clone(), wx.clone())?,
            wy_spline: CubicSplineCoeffs::natural(frequencies.clone(), wy.clone())?,
            x0_spline: CubicSplineCoeffs::natural(frequencies.clone(), x0.clone())?,
            y0_spline: CubicSplineCoeffs::natural(frequencies.clone(), y0.clone())?,
        })
    }

    /// Loads a PSF from an `.npz` file with the arrays `frequencies`, `wx`, `wy`, `x0` and `y0`.
    pub fn load_npz(path: &Path) -> Result<PSF> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let frequencies: Array1<f32> = npz_array_f32(&mut npz, "frequencies")?;
        let wx: Array1<f32> = npz_array_f32(&mut npz, "wx")?;
        let wy: Array1<f32> = npz_array_f32(&mut npz, "wy")?;
        let x0: Array1<f32> = npz_array_f32(&mut npz, "x0")?;
        let y0: Array1<f32> = npz_array_f32(&mut npz, "y0")?;
        PSF::from_measurements(&frequencies, &wx, &wy, &x0, &y0)
    }

    pub fn beam_at(&self, frequency: f32) -> Beam {
        Beam {
            wx: self.wx_spline.eval_single(frequency),
            wy: self.wy_spline.eval_single(frequency),
            x0: self.x0_spline.eval_single(frequency),
            y0: self.y0_spline.eval_single(frequency),
        }
    }
}

/// Creates a 2D PSF on the scan grid from two 1D beam profiles.
///
/// The profiles `psf_x` / `psf_y` are given on the (sorted) coordinates `x` / `y` and are
/// linearly interpolated onto a grid with the step sizes `dx` / `dy` that covers the largest
/// absolute coordinate. Values outside of the given profiles are zero. The result is the outer
/// product of both profiles normalized to unit sum.
pub fn create_psf_2d(
    psf_x: &[f32],
    psf_y: &[f32],
    x: &[f32],
    y: &[f32],
    dx: f32,
    dy: f32,
) -> Result<Array2<f32>> {
    if psf_x.len() != x.len() || psf_y.len() != y.len() || x.len() < 2 || y.len() < 2 {
        return Err(DeconvolutionError::Interpolation {
            message: "beam profiles and coordinates must have the same length (>= 2)".to_string(),
        });
    }
    if dx <= 0.0 || dy <= 0.0 {
        return Err(DeconvolutionError::config("PSF grid steps must be positive"));
    }

    let profile = |p: &[f32], c: &[f32], step: f32| -> Result<Vec<f32>> {
        let c_min = c.iter().cloned().fold(f32::INFINITY, f32::min);
        let c_max = c.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let extent = c_min.abs().max(c_max.abs());
        let n_steps = (extent / step).floor() as i32;
        let interp = interpolator(c.to_vec(), p.to_vec())?;
        Ok((-n_steps..=n_steps)
            .map(|i| {
                let v = i as f32 * step;
                if v < c_min || v > c_max {
                    0.0
                } else {
                    interp.interpolate(v)
                }
            })
            .collect())
    };

    let profile_x = profile(psf_x, x, dx)?;
    let profile_y = profile(psf_y, y, dy)?;

    let mut psf_2d = Array2::from_shape_fn((profile_x.len(), profile_y.len()), |(i, j)| {
        profile_x[i] * profile_y[j]
    });
    let total = psf_2d.sum();
    if total <= 0.0 {
        return Err(DeconvolutionError::Interpolation {
            message: "PSF has no positive weight on the scan grid".to_string(),
        });
    }
    psf_2d /= total;
    Ok(psf_2d)
}

/// Computes a Gaussian beam profile.
///
/// # Arguments
/// - `x`: The coordinates.
/// - `params`: `params[0]` is the center, `params[1]` the beam width (1/e² radius).
pub fn gaussian(x: &Array1<f32>, params: &[f32]) -> Array1<f32> {
    let x0 = params[0];
    let w = params[1];
    x.mapv(|xi| {
        (2.0 / std::f32::consts::PI).sqrt() * (-2.0 * (xi - x0).powf(2.0) / (w * w)).exp() / w
    })
}

/// Builds the Gaussian PSF of a beam on a scan grid with step sizes `dx` and `dy`.
///
/// The PSF extends over three times the beam width plus the center offset, but at least
/// 2.5 grid steps.
pub fn gaussian_psf(beam: &Beam, dx: f32, dy: f32) -> Result<Array2<f32>> {
    let axis = |w: f32, c: f32, step: f32| -> Array1<f32> {
        let range = ((w + c.abs()) * 3.0).max(2.5 * step);
        let n = (range / step).floor() as i32;
        Array1::from_iter((-n..=n).map(|i| i as f32 * step))
    };
    let x = axis(beam.wx, beam.x0, dx);
    let y = axis(beam.wy, beam.y0, dy);
    let psf_x = gaussian(&x, &[beam.x0, beam.wx]);
    let psf_y = gaussian(&y, &[beam.y0, beam.wy]);
    create_psf_2d(
        &psf_x.to_vec(),
        &psf_y.to_vec(),
        &x.to_vec(),
        &y.to_vec(),
        dx,
        dy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_natural_spline_passes_through_knots() {
        let knots = array![0.5_f32, 1.0, 1.5, 2.0, 3.0];
        let values = array![2.0_f32, 1.5, 1.2, 1.0, 0.8];
        let spline = CubicSplineCoeffs::natural(knots.clone(), values.clone()).unwrap();
        for (k, v) in knots.iter().zip(values.iter()) {
            assert_abs_diff_eq!(spline.eval_single(*k), *v, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_spline_of_line_is_exact() {
        let knots = array![0.0_f32, 1.0, 2.0, 4.0];
        let values = knots.mapv(|k| 3.0 * k + 1.0);
        let spline = CubicSplineCoeffs::natural(knots, values).unwrap();
        assert_abs_diff_eq!(spline.eval_single(2.5), 8.5, epsilon = 1e-4);
        // linear extrapolation on both sides
        assert_abs_diff_eq!(spline.eval_single(5.0), 16.0, epsilon = 1e-4);
        assert_abs_diff_eq!(spline.eval_single(-0.2), 0.4, epsilon = 1e-4);
    }

    #[test]
    fn test_extrapolation_stays_positive() {
        let knots = array![1.0_f32, 2.0];
        let values = array![1.0_f32, 0.1];
        let spline = CubicSplineCoeffs::natural(knots, values).unwrap();
        assert_abs_diff_eq!(spline.eval_single(10.0), 1e-6);
    }

    #[test]
    fn test_spline_rejects_unsorted_knots() {
        let knots = array![1.0_f32, 0.5, 2.0];
        let values = array![1.0_f32, 1.0, 1.0];
        assert!(CubicSplineCoeffs::natural(knots, values).is_err());
    }

    #[test]
    fn test_gaussian_psf_is_normalized_and_centered() {
        let beam = Beam {
            wx: 1.0,
            wy: 2.0,
            x0: 0.0,
            y0: 0.0,
        };
        let psf = gaussian_psf(&beam, 0.5, 0.5).unwrap();
        assert_abs_diff_eq!(psf.sum(), 1.0, epsilon = 1e-5);
        let (w, h) = psf.dim();
        assert_eq!(w % 2, 1);
        assert_eq!(h % 2, 1);
        assert!(h > w);
        let center = psf[(w / 2, h / 2)];
        assert!(psf.iter().all(|v| *v <= center));
    }

    #[test]
    fn test_beam_at_uses_splines() {
        let f = array![0.5_f32, 1.0, 2.0];
        let psf = PSF::from_measurements(
            &f,
            &array![3.0, 2.0, 1.0],
            &array![3.0, 2.0, 1.0],
            &array![0.0, 0.0, 0.0],
            &array![0.0, 0.0, 0.0],
        )
        .unwrap();
        let beam = psf.beam_at(1.0);
        assert_abs_diff_eq!(beam.wx, 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(beam.y0, 0.0, epsilon = 1e-6);
        assert!(!psf.is_empty());
    }

    fn write_psf_npz<A>(path: &Path, frequencies: Array1<A>, wx: Array1<A>, wy: Array1<A>)
    where
        A: ndarray_npy::WritableElement + Clone + num_traits::Zero,
    {
        let zeros = Array1::<A>::zeros(frequencies.len());
        let mut npz = ndarray_npy::NpzWriter::new(File::create(path).unwrap());
        npz.add_array("frequencies", &frequencies).unwrap();
        npz.add_array("wx", &wx).unwrap();
        npz.add_array("wy", &wy).unwrap();
        npz.add_array("x0", &zeros).unwrap();
        npz.add_array("y0", &zeros).unwrap();
        npz.finish().unwrap();
    }

    #[test]
    fn test_load_npz_f64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psf64.npz");
        write_psf_npz(
            &path,
            array![0.5_f64, 1.0, 2.0],
            array![3.0_f64, 2.0, 1.0],
            array![1.5_f64, 1.0, 0.5],
        );
        let psf = PSF::load_npz(&path).unwrap();
        let beam = psf.beam_at(1.0);
        assert_abs_diff_eq!(beam.wx, 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(beam.wy, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(beam.x0, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_load_npz_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psf32.npz");
        write_psf_npz(
            &path,
            array![0.5_f32, 1.0, 2.0],
            array![3.0_f32, 2.0, 1.0],
            array![1.5_f32, 1.0, 0.5],
        );
        let psf = PSF::load_npz(&path).unwrap();
        assert_abs_diff_eq!(psf.beam_at(2.0).wx, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(psf.beam_at(0.5).wy, 1.5, epsilon = 1e-5);
    }

    #[test]
    fn test_load_npz_missing_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incomplete.npz");
        let mut npz = ndarray_npy::NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("frequencies", &array![0.5_f32, 1.0]).unwrap();
        npz.finish().unwrap();
        assert!(PSF::load_npz(&path).is_err());
    }
}
