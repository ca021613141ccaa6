// src/error.rs
//! Error kinds shared by every stage of the overlay pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the acquisition, calibration and geometry stages.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The source did not deliver a synchronized pair within the timeout.
    #[error("acquisition timed out after {waited:?}")]
    AcquisitionTimeout { waited: Duration },

    /// The device or recording is unusable (disconnect, corrupt file, too many drops).
    #[error("acquisition fault: {0}")]
    AcquisitionFault(String),

    /// Calibration data is missing or malformed.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A depth sample or transform cannot be used for geometry.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The controller was asked to do something its current state forbids.
    #[error("invalid state: cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MirrorError {
    pub fn fault(reason: impl Into<String>) -> Self {
        Self::AcquisitionFault(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::ConfigurationError(reason.into())
    }

    pub fn geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry(reason.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
