use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeconvolutionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read npy file: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("failed to read npz file: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    #[error("failed to write npz file: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    #[error("FFT error: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("manifest parse error: {0}")]
    ManifestParse(#[from] toml::de::Error),

    #[error("invalid version: {0}")]
    Version(#[from] semver::Error),

    #[error("invalid trace: {message}")]
    InvalidTrace { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("interpolation error: {message}")]
    Interpolation { message: String },

    #[error("worker error: {message}")]
    Worker { message: String },

    #[error("invalid manifest: {message}")]
    Manifest { message: String },

    #[error("calculation aborted")]
    Aborted,
}

impl DeconvolutionError {
    pub fn invalid_trace(message: impl Into<String>) -> Self {
        DeconvolutionError::InvalidTrace {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        DeconvolutionError::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeconvolutionError>;
