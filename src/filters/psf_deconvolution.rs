//! Spatial deconvolution of the intensity image.
//!
//! The focused THz beam blurs the image with its point spread function. The PSF is a
//! Gaussian with the beam widths either interpolated from a measured `PSF` at the selected
//! frequency or given explicitly. The image is restored with the Richardson-Lucy algorithm:
//!
//! ```text
//! u ← u · ((d / (u ⊛ p)) ⊛ p*)
//! ```
//!
//! where `d` is the measured image, `p` the PSF and `p*` the flipped PSF.

use crate::config::DeconvolutionSettings;
use crate::data_container::FilterData;
use crate::error::{DeconvolutionError, Result};
use crate::filters::filter::{set_progress, Filter, FilterConfig, FilterDomain, ProgressLock};
use crate::math_tools::convolve_2d_same;
use crate::psf::{gaussian_psf, Beam, PSF};
use cancellable_loops::for_each_cancellable_with_progress;
use ndarray::{s, Array2, ArrayView2, Zip};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct PsfDeconvolution {
    pub n_iterations: usize,
    /// Frequency at which the PSF is evaluated (THz).
    pub frequency: f32,
    pub beam_width_x: f32,
    pub beam_width_y: f32,
    pub psf: PSF,
}

impl PsfDeconvolution {
    /// Beam used for the deconvolution, from the PSF if one is loaded.
    pub fn beam(&self) -> Beam {
        if self.psf.is_empty() {
            Beam {
                wx: self.beam_width_x,
                wy: self.beam_width_y,
                x0: 0.0,
                y0: 0.0,
            }
        } else {
            self.psf.beam_at(self.frequency)
        }
    }
}

/// Richardson-Lucy deconvolution of a non-negative image.
///
/// Returns `None` if the abort flag was set.
pub fn richardson_lucy(
    image: ArrayView2<f32>,
    psf: ArrayView2<f32>,
    n_iterations: usize,
    abort_flag: &AtomicBool,
    on_progress: impl FnMut(f32),
) -> Option<Array2<f32>> {
    let observed = image.mapv(|v| v.max(0.0));
    let n = observed.len().max(1) as f32;
    let mean = observed.sum() / n;
    let mut estimate = Array2::from_elem(observed.raw_dim(), mean);
    if mean <= 0.0 {
        return Some(estimate);
    }
    let psf_flipped = psf.slice(s![..;-1, ..;-1]).to_owned();

    let completed = for_each_cancellable_with_progress(
        0..n_iterations,
        abort_flag,
        on_progress,
        |_| {
            let blurred = convolve_2d_same(&estimate.view(), &psf);
            let ratio = Zip::from(&observed)
                .and(&blurred)
                .map_collect(|d, b| if *b > f32::EPSILON { d / b } else { 0.0 });
            let correction = convolve_2d_same(&ratio.view(), &psf_flipped.view());
            estimate *= &correction;
        },
    );
    completed.then_some(estimate)
}

impl Filter for PsfDeconvolution {
    fn new() -> Self
    where
        Self: Sized,
    {
        PsfDeconvolution {
            n_iterations: 10,
            frequency: 1.0,
            beam_width_x: 1.0,
            beam_width_y: 1.0,
            psf: PSF::default(),
        }
    }

    fn configure(&mut self, settings: &DeconvolutionSettings) {
        let rl = &settings.richardson_lucy;
        self.n_iterations = rl.n_iterations;
        self.frequency = rl.frequency;
        self.beam_width_x = rl.beam_width_x;
        self.beam_width_y = rl.beam_width_y;
        self.psf = settings.psf.clone();
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "PSF Deconvolution".to_string(),
            description: "Sharpens the intensity image with a Richardson-Lucy deconvolution \
                          using the Gaussian point spread function of the beam."
                .to_string(),
            hyperlink: Some((
                Some("Richardson-Lucy deconvolution".to_string()),
                "https://en.wikipedia.org/wiki/Richardson%E2%80%93Lucy_deconvolution".to_string(),
            )),
            domain: FilterDomain::TimeAfterFFTPrioLast,
        }
    }

    fn filter(
        &mut self,
        input_data: &FilterData,
        progress_lock: &ProgressLock,
        abort_flag: &Arc<AtomicBool>,
    ) -> Result<FilterData> {
        let (Some(dx), Some(dy)) = (input_data.dx, input_data.dy) else {
            log::warn!("the scan has no pixel size, skipping the PSF deconvolution");
            return Ok(input_data.clone());
        };
        let (dx, dy) = (dx.abs(), dy.abs());
        let beam = self.beam();
        if !(beam.wx > 0.0 && beam.wy > 0.0) {
            return Err(DeconvolutionError::config(format!(
                "beam widths must be positive, got {} x {} mm",
                beam.wx, beam.wy
            )));
        }
        let kernel = gaussian_psf(&beam, dx, dy)?;
        log::debug!(
            "PSF at {} THz: w = {:.3} x {:.3} mm, kernel {:?}",
            self.frequency,
            beam.wx,
            beam.wy,
            kernel.dim()
        );

        set_progress(progress_lock, Some(0.0));
        let restored = richardson_lucy(
            input_data.img.view(),
            kernel.view(),
            self.n_iterations,
            abort_flag,
            |p| set_progress(progress_lock, Some(p)),
        )
        .ok_or(DeconvolutionError::Aborted)?;
        set_progress(progress_lock, None);

        let mut output_data = input_data.clone();
        output_data.img = restored;
        Ok(output_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blurred_point(dx: f32) -> (Array2<f32>, Array2<f32>) {
        let beam = Beam {
            wx: 1.0,
            wy: 1.0,
            x0: 0.0,
            y0: 0.0,
        };
        let kernel = gaussian_psf(&beam, dx, dx).unwrap();
        let mut image = Array2::<f32>::zeros((31, 31));
        image[[15, 15]] = 1.0;
        let blurred = convolve_2d_same(&image.view(), &kernel.view());
        (blurred, kernel)
    }

    #[test]
    fn test_richardson_lucy_sharpens_point() {
        let (blurred, kernel) = blurred_point(0.25);
        let restored = richardson_lucy(
            blurred.view(),
            kernel.view(),
            30,
            &AtomicBool::new(false),
            |_| {},
        )
        .unwrap();
        assert!(restored[[15, 15]] > 2.0 * blurred[[15, 15]]);
        assert!(restored.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_missing_pixel_size_is_skipped() {
        let (blurred, _) = blurred_point(0.25);
        let input = FilterData {
            img: blurred.clone(),
            ..Default::default()
        };
        let output = PsfDeconvolution::new()
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert_eq!(output.img, blurred);
    }

    #[test]
    fn test_filter_uses_explicit_beam_widths() {
        let (blurred, _) = blurred_point(0.25);
        let input = FilterData {
            dx: Some(0.25),
            dy: Some(0.25),
            img: blurred.clone(),
            ..Default::default()
        };
        let mut filter = PsfDeconvolution::new();
        filter.n_iterations = 20;
        let output = filter
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(output.img[[15, 15]] > blurred[[15, 15]]);
    }

    #[test]
    fn test_abort() {
        let (blurred, kernel) = blurred_point(0.25);
        assert!(richardson_lucy(
            blurred.view(),
            kernel.view(),
            5,
            &AtomicBool::new(true),
            |_| {}
        )
        .is_none());
    }

    #[test]
    fn test_negative_pixel_steps_are_accepted() {
        let (blurred, _) = blurred_point(0.25);
        let input = FilterData {
            dx: Some(-0.25),
            dy: Some(0.25),
            img: blurred.clone(),
            ..Default::default()
        };
        let mut filter = PsfDeconvolution::new();
        filter.n_iterations = 20;
        let output = filter
            .filter(
                &input,
                &Arc::new(Default::default()),
                &Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(output.img[[15, 15]] > blurred[[15, 15]]);
    }
}
