//! Settings of the deconvolution pipeline.
//!
//! The settings are persisted with the `preferences` crate, every filter reads its own section
//! in `Filter::configure`.

use crate::error::{DeconvolutionError, Result};
use crate::math_tools::FftWindowType;
use crate::psf::PSF;
use preferences::{AppInfo, Preferences};
use serde::{Deserialize, Serialize};

pub const APP_INFO: AppInfo = AppInfo {
    name: "THz Deconvolution",
    author: "Arnaud Demion",
};

/// Key under which the settings are stored.
pub const SETTINGS_KEY: &str = "config/deconvolution";

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct BaselineSettings {
    /// Length of the pre-pulse region used to estimate the offset (ps).
    pub window: f32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TimeWindowSettings {
    /// Lower bound of the time window (ps).
    pub low: f32,
    /// Upper bound of the time window (ps). `low >= high` selects the full trace.
    pub high: f32,
    /// Width of the tapered edges of the adapted Blackman window (ps).
    pub window_width: f32,
    pub window_type: FftWindowType,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct BandPassSettings {
    /// Lower cutoff frequency (THz).
    pub low: f32,
    /// Upper cutoff frequency (THz).
    pub high: f32,
    /// Width of the tapered band edges (THz).
    pub window_width: f32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct DoubleGaussianSettings {
    /// Low frequency cutoff of the filter (THz).
    pub low_cutoff: f32,
    /// High frequency cutoff of the filter (THz).
    pub high_cutoff: f32,
    /// Reference bins below `floor * max|R|` are discarded.
    pub floor: f32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct WienerSettings {
    /// Regularisation relative to the peak reference power.
    pub noise_level: f32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct SparseSettings {
    /// L1 weight relative to the largest cross-correlation of reference and sample.
    pub lambda: f32,
    pub n_iterations: usize,
    /// Relative change of the estimate below which the iteration stops.
    pub tolerance: f32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RichardsonLucySettings {
    pub n_iterations: usize,
    /// Frequency at which the beam profile is evaluated (THz).
    pub frequency: f32,
    /// Beam width in x (mm), used when no PSF is loaded.
    pub beam_width_x: f32,
    /// Beam width in y (mm), used when no PSF is loaded.
    pub beam_width_y: f32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EchoSettings {
    /// Echoes below `threshold * max|h|` are ignored.
    pub threshold: f32,
    /// Minimum time between two echoes (ps).
    pub min_separation: f32,
    /// Group refractive index used to convert echo delays into thicknesses.
    pub refractive_index: f32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct DeconvolutionSettings {
    /// Names of the enabled pre- and post-processing filters.
    pub filters: Vec<String>,
    /// Name of the deconvolution filter.
    pub method: String,
    pub baseline: BaselineSettings,
    pub time_window: TimeWindowSettings,
    pub band_pass: BandPassSettings,
    pub double_gaussian: DoubleGaussianSettings,
    pub wiener: WienerSettings,
    pub sparse: SparseSettings,
    pub richardson_lucy: RichardsonLucySettings,
    pub psf: PSF,
    pub echoes: EchoSettings,
}

impl Default for DeconvolutionSettings {
    fn default() -> Self {
        DeconvolutionSettings {
            filters: vec!["Baseline Removal".to_string(), "Time Window".to_string()],
            method: "Wiener Deconvolution".to_string(),
            baseline: BaselineSettings { window: 2.0 },
            time_window: TimeWindowSettings {
                low: 0.0,
                high: 0.0,
                window_width: 2.0,
                window_type: FftWindowType::AdaptedBlackman,
            },
            band_pass: BandPassSettings {
                low: 0.1,
                high: 3.0,
                window_width: 0.1,
            },
            double_gaussian: DoubleGaussianSettings {
                low_cutoff: 0.1,
                high_cutoff: 2.0,
                floor: 1e-3,
            },
            wiener: WienerSettings { noise_level: 1e-3 },
            sparse: SparseSettings {
                lambda: 0.05,
                n_iterations: 500,
                tolerance: 1e-6,
            },
            richardson_lucy: RichardsonLucySettings {
                n_iterations: 10,
                frequency: 1.0,
                beam_width_x: 1.0,
                beam_width_y: 1.0,
            },
            psf: PSF::default(),
            echoes: EchoSettings {
                threshold: 0.2,
                min_separation: 0.5,
                refractive_index: 1.0,
            },
        }
    }
}

impl DeconvolutionSettings {
    /// Loads the stored settings. If none can be loaded, the defaults are stored and returned.
    pub fn load_or_default(key: &str) -> DeconvolutionSettings {
        match DeconvolutionSettings::load(&APP_INFO, key) {
            Ok(settings) => settings,
            Err(err) => {
                log::info!("no stored settings found ({err:?}), using defaults");
                let settings = DeconvolutionSettings::default();
                if let Err(err) = settings.store(key) {
                    log::error!("error in saving settings: {err}");
                }
                settings
            }
        }
    }

    pub fn store(&self, key: &str) -> Result<()> {
        self.save(&APP_INFO, key)
            .map_err(|err| DeconvolutionError::config(format!("failed to save settings: {err:?}")))
    }

    /// Checks parameter ranges that would otherwise produce meaningless results.
    pub fn validate(&self) -> Result<()> {
        if self.wiener.noise_level < 0.0 {
            return Err(DeconvolutionError::config("wiener noise level must be >= 0"));
        }
        if self.sparse.lambda < 0.0 {
            return Err(DeconvolutionError::config("sparse lambda must be >= 0"));
        }
        let dg = &self.double_gaussian;
        if dg.low_cutoff <= 0.0 || dg.high_cutoff <= dg.low_cutoff {
            return Err(DeconvolutionError::config(
                "double gaussian cutoffs must satisfy 0 < low < high",
            ));
        }
        if self.band_pass.high <= self.band_pass.low {
            return Err(DeconvolutionError::config(
                "band pass upper cutoff must be above the lower cutoff",
            ));
        }
        if self.echoes.refractive_index <= 0.0 {
            return Err(DeconvolutionError::config("refractive index must be > 0"));
        }
        Ok(())
    }
}
