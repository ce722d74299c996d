//! Face detector seam.
//!
//! The pipeline only needs "grayscale image in, candidate boxes out". The
//! production backend lives in [`crate::scrfd`]; anything else (a stub in
//! tests, a different model) can be plugged in through [`FaceDetector`].

use crate::types::FaceBox;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pluggable frontal-face detector.
///
/// Implementations must be safe to call from several threads at once: either
/// re-entrant or internally serialized.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a luminance image. Order is backend-defined; the head
    /// locator uses the first candidate as-is.
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, DetectorError>;
}
