//! Processing steps of a THz-TDS deconvolution run.
//!
//! Every step implements the `Filter` trait defined in the `filter` module. Filters are
//! organized by their domain of operation, which also defines the processing order.
//!
//! # Filter Categories
//!
//! * **Time Domain Filters (Pre-FFT)**: Applied to the raw reference and sample traces.
//!
//! * **Frequency Domain Filters**: Applied to the sample spectra.
//!
//! * **Deconvolution**: Computes the transfer function and the impulse response. Exactly one
//!   deconvolution filter is part of a pipeline.
//!
//! * **Time Domain Filters (Post-FFT)**: Applied to the impulse responses and the intensity image.

/// Frequency domain bandpass filter for isolating specific frequency ranges.
pub mod band_pass;

/// Removes the DC offset of the traces using the pre-pulse region.
pub mod baseline;

/// Shared frequency domain deconvolution helpers.
mod deconvolution;

/// Inverse filtering with a double Gaussian band pass.
pub mod double_gaussian;

/// Replaces the impulse response by its Hilbert envelope.
pub mod envelope;

/// Core filter interfaces, shared components and the filter registry.
pub mod filter;

/// Spatial Richardson-Lucy deconvolution of the intensity image with the beam PSF.
pub mod psf_deconvolution;

/// Sparse (L1 regularized) deconvolution solved with FISTA.
pub mod sparse;

/// Time domain window selecting and tapering the pulse region.
pub mod time_window;

/// Wiener deconvolution.
pub mod wiener;
