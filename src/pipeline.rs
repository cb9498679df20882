//! Runs the configured filters on a reference and a sample scan.
//!
//! The filters are executed in the order of their `FilterDomain`. The spectra are computed
//! right before the first frequency domain filter, the intensity image right before the first
//! filter working on it. Every pipeline contains exactly one deconvolution filter.

use crate::config::DeconvolutionSettings;
use crate::data_container::{DeconvolutionResult, FilterData, ScannedImage, Trace};
use crate::error::{DeconvolutionError, Result};
use crate::fft::{forward_all, frequency_axis};
use crate::filters::filter::{
    instantiate_filter, set_progress, Filter, FilterDomain, ProgressLock,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Relative tolerance below which two time axes are considered identical.
const AXIS_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct Pipeline {
    filters: Vec<Box<dyn Filter>>,
}

impl Pipeline {
    /// Builds the pipeline from the enabled filters and the deconvolution method.
    pub fn from_settings(settings: &DeconvolutionSettings) -> Result<Pipeline> {
        settings.validate()?;
        let mut names: Vec<&str> = settings.filters.iter().map(String::as_str).collect();
        if !names.contains(&settings.method.as_str()) {
            names.push(settings.method.as_str());
        }

        let mut filters = Vec::with_capacity(names.len());
        for name in names {
            let mut filter = instantiate_filter(name)?;
            filter.configure(settings);
            filters.push(filter);
        }
        // stable: filters of the same domain keep the configured order
        filters.sort_by_key(|f| f.config().domain);

        let deconvolution_filters: Vec<String> = filters
            .iter()
            .map(|f| f.config())
            .filter(|c| c.domain == FilterDomain::Deconvolution)
            .map(|c| c.name)
            .collect();
        if deconvolution_filters.len() != 1 {
            return Err(DeconvolutionError::config(format!(
                "exactly one deconvolution method must be selected, got {deconvolution_filters:?}"
            )));
        }
        Ok(Pipeline { filters })
    }

    /// Names of the filters in execution order.
    pub fn filter_names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.config().name).collect()
    }

    /// Deconvolves every pixel of `sample` with `reference`.
    ///
    /// The reference is resampled onto the time axis of the sample if the axes differ. The
    /// progress lock is reset to `None` when the run ends, also on errors.
    pub fn run(
        &mut self,
        reference: &Trace,
        sample: &ScannedImage,
        progress_lock: &ProgressLock,
        abort_flag: &Arc<AtomicBool>,
    ) -> Result<DeconvolutionResult> {
        let result = self.run_filters(reference, sample, progress_lock, abort_flag);
        set_progress(progress_lock, None);
        result
    }

    fn run_filters(
        &mut self,
        reference: &Trace,
        sample: &ScannedImage,
        progress_lock: &ProgressLock,
        abort_flag: &Arc<AtomicBool>,
    ) -> Result<DeconvolutionResult> {
        let start = Instant::now();
        let reference = if same_axis(&reference.time, &sample.time) {
            reference.signal.clone()
        } else {
            log::info!(
                "resampling reference ({} samples) onto the sample time axis ({} samples)",
                reference.len(),
                sample.time.len()
            );
            reference.resample(&sample.time)?.signal
        };

        let mut data = FilterData {
            dx: sample.dx,
            dy: sample.dy,
            time: sample.time.clone(),
            reference,
            data: sample.data.clone(),
            ..Default::default()
        };

        let mut timings = Vec::with_capacity(self.filters.len());
        let mut spectra_ready = false;
        let mut image_ready = false;
        for filter in self.filters.iter_mut() {
            if abort_flag.load(Ordering::Relaxed) {
                log::info!("deconvolution aborted");
                return Err(DeconvolutionError::Aborted);
            }
            let config = filter.config();
            if config.domain >= FilterDomain::Frequency && !spectra_ready {
                compute_spectra(&mut data)?;
                spectra_ready = true;
            }
            if config.domain == FilterDomain::TimeAfterFFTPrioLast && !image_ready {
                data.update_intensity_image();
                image_ready = true;
            }

            let filter_start = Instant::now();
            data = filter.filter(&data, progress_lock, abort_flag)?;
            set_progress(progress_lock, None);
            let elapsed = filter_start.elapsed();
            log::info!("{} took {:?}", config.name, elapsed);
            timings.push((config.name, elapsed));
        }
        if !image_ready {
            data.update_intensity_image();
        }
        log::info!(
            "deconvolved {} x {} pixels in {:?}",
            sample.width,
            sample.height,
            start.elapsed()
        );

        Ok(DeconvolutionResult {
            time: data.time,
            frequency: data.frequency,
            impulse: data.impulse,
            transfer: data.transfer,
            img: data.img,
            timings,
            created: Utc::now(),
        })
    }
}

fn same_axis(a: &ndarray::Array1<f32>, b: &ndarray::Array1<f32>) -> bool {
    if a.len() != b.len() || a.len() < 2 {
        return false;
    }
    let dt = (b[b.len() - 1] - b[0]).abs() / (b.len() - 1) as f32;
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| (x - y).abs() <= AXIS_TOLERANCE * dt + 2.0 * f32::EPSILON * y.abs())
}

/// Computes the frequency axis and the spectra of the reference and all pixels.
fn compute_spectra(data: &mut FilterData) -> Result<()> {
    let plan = data.plan();
    data.frequency = frequency_axis(data.time.len(), data.dt());
    data.reference_fft = plan.forward(data.reference.view())?;
    data.fft = forward_all(&plan, &data.data)?;
    Ok(())
}

/// Deconvolves a single sample trace, returning the impulse response on the (possibly
/// windowed) time axis.
pub fn deconvolve(
    reference: &Trace,
    sample: &Trace,
    settings: &DeconvolutionSettings,
) -> Result<Trace> {
    let mut pipeline = Pipeline::from_settings(settings)?;
    let image = ScannedImage::from_trace(sample);
    let progress_lock = Arc::new(RwLock::new(None));
    let abort_flag = Arc::new(AtomicBool::new(false));
    let result = pipeline.run(reference, &image, &progress_lock, &abort_flag)?;
    let impulse = result
        .impulse_trace(0, 0)
        .ok_or_else(|| DeconvolutionError::invalid_trace("the deconvolution returned no trace"))?;
    Trace::new(result.time, impulse)
}
