//! Crate error type.
//!
//! Every component returns `HyscanResult`. Errors are turned into UI
//! notifications where a thread of control ends (protocol loop, worker
//! threads, the console front end); nothing below that boundary panics.

use std::path::PathBuf;

use thiserror::Error;

use crate::module::device::CameraError;

/// Convenience alias for results using the crate error type.
pub type HyscanResult<T> = std::result::Result<T, HyscanError>;

#[derive(Error, Debug)]
pub enum HyscanError {
    #[error("Camera is not connected")]
    CameraAbsent,

    #[error("{0} cameras detected, only one is supported")]
    MultipleCameras(usize),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("{0} cube has no pixels")]
    EmptyCube(String),

    #[error("No axis of shape {shape:?} matches the band count {bands}")]
    BandAxis { shape: Vec<usize>, bands: usize },

    #[error("Reference spectrum not found: {0}")]
    ReferenceMissing(PathBuf),

    #[error("Pixel classifier is not loaded")]
    ClassifierUnavailable,

    #[error("Model error: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read array: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("Failed to write array: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<ort::OrtError> for HyscanError {
    fn from(e: ort::OrtError) -> Self {
        HyscanError::Model(e.to_string())
    }
}

impl From<ndarray::ShapeError> for HyscanError {
    fn from(e: ndarray::ShapeError) -> Self {
        HyscanError::Model(format!("shape: {e}"))
    }
}
