//! This module defines the data structures for THz time-domain traces, raster scans and the
//! data handed from filter to filter during a deconvolution run.

use crate::error::{DeconvolutionError, Result};
use crate::fft::SpectralPlan;
use crate::math_tools::{abs_argmax, numpy_unwrap};
use chrono::{DateTime, Utc};
use interp1d::Interp1d;
use ndarray::{s, Array1, Array2, Array3};
use num_complex::Complex32;
use std::f32::consts::PI;
use std::time::Duration;

/// Minimum number of samples in a trace.
pub const MIN_SAMPLES: usize = 4;

/// Maximum relative deviation of a time step from the mean step.
const UNIFORM_TOLERANCE: f32 = 0.01;

/// A single time-domain waveform.
///
/// # Fields
/// - `time`: Time axis in ps, strictly increasing and uniformly sampled.
/// - `signal`: Measured amplitude (arbitrary units).
#[derive(Clone, Debug, PartialEq)]
pub struct Trace {
    pub time: Array1<f32>,
    pub signal: Array1<f32>,
}

impl Trace {
    pub fn new(time: Array1<f32>, signal: Array1<f32>) -> Result<Trace> {
        if time.len() != signal.len() {
            return Err(DeconvolutionError::invalid_trace(format!(
                "time axis has {} samples but signal has {}",
                time.len(),
                signal.len()
            )));
        }
        check_time_axis(&time)?;
        if signal.iter().any(|v| !v.is_finite()) {
            return Err(DeconvolutionError::invalid_trace(
                "signal contains non-finite values",
            ));
        }
        Ok(Trace { time, signal })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Mean sampling interval in ps.
    pub fn dt(&self) -> f32 {
        self.duration() / (self.len() - 1) as f32
    }

    pub fn duration(&self) -> f32 {
        self.time[self.len() - 1] - self.time[0]
    }

    /// Index, time and value of the sample with the largest magnitude.
    pub fn peak(&self) -> (usize, f32, f32) {
        let (i, v) = abs_argmax(self.signal.iter()).unwrap_or((0, 0.0));
        (i, self.time[i], v)
    }

    /// Linearly interpolates the trace onto another time axis. Samples outside of the
    /// original time range are zero.
    pub fn resample(&self, time: &Array1<f32>) -> Result<Trace> {
        let interp = interpolator(self.time.to_vec(), self.signal.to_vec())?;
        let first = self.time[0];
        let last = self.time[self.len() - 1];
        let signal = time.mapv(|t| {
            if t < first || t > last {
                0.0
            } else {
                interp.interpolate(t)
            }
        });
        Trace::new(time.clone(), signal)
    }
}

pub(crate) fn interpolator(x: Vec<f32>, y: Vec<f32>) -> Result<Interp1d<f32, f32>> {
    Interp1d::new_unsorted(x, y)
        .into_iter()
        .next()
        .ok_or_else(|| DeconvolutionError::Interpolation {
            message: "could not create interpolator".to_string(),
        })
}

/// Checks that a time axis is long enough, finite, strictly increasing and uniform.
pub fn check_time_axis(time: &Array1<f32>) -> Result<()> {
    if time.len() < MIN_SAMPLES {
        return Err(DeconvolutionError::invalid_trace(format!(
            "at least {MIN_SAMPLES} samples are required, got {}",
            time.len()
        )));
    }
    if time.iter().any(|t| !t.is_finite()) {
        return Err(DeconvolutionError::invalid_trace(
            "time axis contains non-finite values",
        ));
    }
    let mean_dt = (time[time.len() - 1] - time[0]) / (time.len() - 1) as f32;
    if mean_dt <= 0.0 {
        return Err(DeconvolutionError::invalid_trace(
            "time axis is not increasing",
        ));
    }
    // f32 resolves an absolute time only to a few ulps, e.g. 2.4e-4 ps around 2000 ps
    let magnitude = time[0].abs().max(time[time.len() - 1].abs());
    let tolerance = UNIFORM_TOLERANCE * mean_dt + 4.0 * f32::EPSILON * magnitude;
    for (a, b) in time.iter().zip(time.iter().skip(1)) {
        let step = b - a;
        if step <= 0.0 {
            return Err(DeconvolutionError::invalid_trace(
                "time axis is not strictly increasing",
            ));
        }
        if (step - mean_dt).abs() > tolerance {
            return Err(DeconvolutionError::invalid_trace(
                "time axis is not uniformly sampled",
            ));
        }
    }
    Ok(())
}

/// Represents a raster scan with one time trace per pixel.
///
/// # Fields
/// - `x_min`, `dx`: Minimum x value and resolution in the x-direction (mm).
/// - `y_min`, `dy`: Minimum y value and resolution in the y-direction (mm).
/// - `width`, `height`: Dimensions of the image in pixels.
/// - `time`: Common time axis of all traces.
/// - `data`: Traces with shape `(width, height, time)`.
#[derive(Clone, Debug)]
pub struct ScannedImage {
    pub x_min: Option<f32>,
    pub dx: Option<f32>,
    pub y_min: Option<f32>,
    pub dy: Option<f32>,
    pub width: usize,
    pub height: usize,
    pub time: Array1<f32>,
    pub data: Array3<f32>,
}

impl ScannedImage {
    pub fn new(time: Array1<f32>, data: Array3<f32>) -> Result<ScannedImage> {
        check_time_axis(&time)?;
        let (width, height, n) = data.dim();
        if n != time.len() {
            return Err(DeconvolutionError::invalid_trace(format!(
                "scan traces have {n} samples but the time axis has {}",
                time.len()
            )));
        }
        if width == 0 || height == 0 {
            return Err(DeconvolutionError::invalid_trace("scan contains no pixels"));
        }
        Ok(ScannedImage {
            x_min: None,
            dx: None,
            y_min: None,
            dy: None,
            width,
            height,
            time,
            data,
        })
    }

    /// Sets the spatial axes of the scan.
    pub fn with_axes(mut self, x_min: f32, dx: f32, y_min: f32, dy: f32) -> ScannedImage {
        self.x_min = Some(x_min);
        self.dx = Some(dx);
        self.y_min = Some(y_min);
        self.dy = Some(dy);
        self
    }

    /// A 1x1 scan holding a single trace.
    pub fn from_trace(trace: &Trace) -> ScannedImage {
        let n = trace.len();
        let mut data = Array3::zeros((1, 1, n));
        data.slice_mut(s![0, 0, ..]).assign(&trace.signal);
        ScannedImage {
            x_min: None,
            dx: None,
            y_min: None,
            dy: None,
            width: 1,
            height: 1,
            time: trace.time.clone(),
            data,
        }
    }

    pub fn trace(&self, x: usize, y: usize) -> Option<Trace> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(Trace {
            time: self.time.clone(),
            signal: self.data.slice(s![x, y, ..]).to_owned(),
        })
    }
}

/// The working set passed from filter to filter.
///
/// Time domain filters work on `time`, `reference` and `data`. Once the spectra are computed,
/// frequency filters work on `fft` and `reference_fft` and the deconvolution filter fills
/// `transfer` and `impulse`. Filters running after the deconvolution work on `impulse` and the
/// intensity image `img`.
#[derive(Default, Clone, Debug)]
pub struct FilterData {
    pub dx: Option<f32>,
    pub dy: Option<f32>,
    pub plan: Option<SpectralPlan>,
    pub time: Array1<f32>,
    pub reference: Array1<f32>,
    pub data: Array3<f32>,
    pub frequency: Array1<f32>,
    pub reference_fft: Array1<Complex32>,
    pub fft: Array3<Complex32>,
    pub transfer: Array3<Complex32>,
    pub impulse: Array3<f32>,
    pub img: Array2<f32>,
}

impl FilterData {
    /// Sampling interval of the current time axis.
    pub fn dt(&self) -> f32 {
        if self.time.len() < 2 {
            return 0.0;
        }
        (self.time[self.time.len() - 1] - self.time[0]) / (self.time.len() - 1) as f32
    }

    /// Returns the FFT plan for the current time axis, creating a new one if the length changed.
    pub fn plan(&mut self) -> SpectralPlan {
        match &self.plan {
            Some(plan) if plan.len() == self.time.len() => plan.clone(),
            _ => {
                let plan = SpectralPlan::new(self.time.len());
                self.plan = Some(plan.clone());
                plan
            }
        }
    }

    /// Computes the intensity image as the sum of the squared impulse response of each pixel.
    pub fn update_intensity_image(&mut self) {
        self.img = self.impulse.map_axis(ndarray::Axis(2), |trace| {
            trace.iter().map(|v| v * v).sum::<f32>()
        });
    }
}

/// Output of a deconvolution run.
///
/// # Fields
/// - `time`: Time axis of the impulse responses.
/// - `frequency`: Frequency axis of the transfer functions (THz).
/// - `impulse`: Deconvolved impulse responses, `(width, height, time)`.
/// - `transfer`: Deconvolved (filtered) transfer functions, `(width, height, frequency)`.
/// - `img`: Intensity image after all filters.
/// - `timings`: Computation time of each filter.
/// - `created`: Time at which the result was produced.
#[derive(Clone, Debug)]
pub struct DeconvolutionResult {
    pub time: Array1<f32>,
    pub frequency: Array1<f32>,
    pub impulse: Array3<f32>,
    pub transfer: Array3<Complex32>,
    pub img: Array2<f32>,
    pub timings: Vec<(String, Duration)>,
    pub created: DateTime<Utc>,
}

impl DeconvolutionResult {
    pub fn impulse_trace(&self, x: usize, y: usize) -> Option<Array1<f32>> {
        let (w, h, _) = self.impulse.dim();
        (x < w && y < h).then(|| self.impulse.slice(s![x, y, ..]).to_owned())
    }

    pub fn transfer_amplitude(&self, x: usize, y: usize) -> Option<Array1<f32>> {
        let (w, h, _) = self.transfer.dim();
        (x < w && y < h).then(|| self.transfer.slice(s![x, y, ..]).mapv(|c| c.norm()))
    }

    /// Unwrapped phase of the transfer function in rad.
    pub fn transfer_phase(&self, x: usize, y: usize) -> Option<Array1<f32>> {
        let (w, h, _) = self.transfer.dim();
        if x >= w || y >= h {
            return None;
        }
        let phase: Vec<f32> = self
            .transfer
            .slice(s![x, y, ..])
            .iter()
            .map(|c| c.arg())
            .collect();
        Some(Array1::from_vec(numpy_unwrap(&phase, Some(2.0 * PI))))
    }
}
