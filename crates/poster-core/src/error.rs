use crate::detector::DetectorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected")]
    FaceNotDetected,
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
