//! poster-core — Head detection, circular crop and poster compositing.
//!
//! A photo goes through a [`FaceDetector`], the [`HeadLocator`] cuts a
//! circular crop around the first detected head, and the [`PosterComposer`]
//! pastes that crop onto a [`PosterTemplate`]. The SCRFD detector (ONNX
//! Runtime) is available behind the `onnx` feature.

pub mod codec;
pub mod composer;
pub mod detector;
pub mod error;
pub mod locator;
pub mod record;
#[cfg(feature = "onnx")]
pub mod scrfd;
pub mod template;
pub mod types;

pub use composer::{
    CompositionResult, Failure, FailureKind, PosterComposer, FACE_NOT_DETECTED_REMARK,
    MISSING_INPUT_REMARK,
};
pub use detector::{DetectorError, FaceDetector};
pub use error::PipelineError;
pub use locator::HeadLocator;
pub use record::{should_regenerate, PhotoFingerprint, PosterRecord};
#[cfg(feature = "onnx")]
pub use scrfd::{shared_detector, ScrfdDetector};
pub use template::{PosterTemplate, TemplateError, TemplateRegistry};
pub use types::{CircleSpec, FaceBox};
