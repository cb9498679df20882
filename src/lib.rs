//! Deconvolution of terahertz time-domain spectroscopy (THz-TDS) measurements.
//!
//! A measured sample trace is the convolution of the reference pulse with the impulse
//! response of the sample. This crate recovers the impulse response of single traces and of
//! raster scans with one trace per pixel.
//!
//! ```no_run
//! use std::path::Path;
//! use thz_deconvolution::{config::DeconvolutionSettings, io::load_trace, pipeline::deconvolve};
//!
//! let reference = load_trace(Path::new("reference.csv"))?;
//! let sample = load_trace(Path::new("sample.csv"))?;
//! let impulse = deconvolve(&reference, &sample, &DeconvolutionSettings::default())?;
//! println!("strongest echo at {} ps", impulse.peak().1);
//! # Ok::<(), thz_deconvolution::error::DeconvolutionError>(())
//! ```

/// Echo detection and layer thicknesses.
pub mod analysis;
pub mod config;
/// Traces, raster scans and the working set of the filters.
pub mod data_container;
pub mod error;
pub mod fft;
/// Processing steps of the deconvolution and their registry.
pub mod filters;
/// Loading traces and scans, exporting results.
pub mod io;
#[cfg(feature = "cli")]
pub mod logger;
pub mod manifest;
pub mod math_tools;
pub mod pipeline;
/// Point spread function of the focused beam.
pub mod psf;
pub mod worker;

pub use data_container::{DeconvolutionResult, ScannedImage, Trace};
pub use error::{DeconvolutionError, Result};
pub use pipeline::{deconvolve, Pipeline};
