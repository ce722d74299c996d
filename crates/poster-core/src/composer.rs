//! Head-onto-template compositing.
//!
//! [`PosterComposer::compose`] is the pipeline boundary: every outcome,
//! including decode errors and panics inside image code, comes back as a
//! [`CompositionResult`].

use crate::codec;
use crate::detector::FaceDetector;
use crate::error::PipelineError;
use crate::locator::HeadLocator;
use crate::template::PosterTemplate;
use crate::types::in_inscribed_circle;
use image::imageops;
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Share of the photo width used as the head circle diameter. One value for
/// every template keeps framing uniform across posters.
const HEAD_DIAMETER_FRACTION: f32 = 0.5;

pub const FACE_NOT_DETECTED_REMARK: &str =
    "Face not detected in the uploaded photo. Please upload a photo with a clear face.";
pub const MISSING_INPUT_REMARK: &str =
    "Profile photo or poster template not provided. Please upload a profile photo.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FaceNotDetected,
    MissingInput,
    Unexpected,
}

/// Why a poster was not generated, with the remark shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub remark: String,
}

impl Failure {
    pub fn unexpected(remark: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unexpected,
            remark: remark.into(),
        }
    }
}

impl From<&PipelineError> for Failure {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::FaceNotDetected => Self {
                kind: FailureKind::FaceNotDetected,
                remark: FACE_NOT_DETECTED_REMARK.to_string(),
            },
            PipelineError::MissingInput(_) => Self {
                kind: FailureKind::MissingInput,
                remark: MISSING_INPUT_REMARK.to_string(),
            },
            other => Self::unexpected(other.to_string()),
        }
    }
}

/// Outcome of one composition: a poster or a failure, never both.
#[derive(Debug, Clone)]
pub enum CompositionResult {
    Succeeded(RgbaImage),
    Failed(Failure),
}

impl CompositionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        match self {
            Self::Succeeded(image) => Some(image),
            Self::Failed(_) => None,
        }
    }

    pub fn remark(&self) -> Option<&str> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(failure) => Some(&failure.remark),
        }
    }

    pub fn into_result(self) -> Result<RgbaImage, Failure> {
        match self {
            Self::Succeeded(image) => Ok(image),
            Self::Failed(failure) => Err(failure),
        }
    }
}

/// Pastes circular head crops onto poster templates.
#[derive(Clone)]
pub struct PosterComposer {
    locator: HeadLocator,
}

impl PosterComposer {
    pub fn new(locator: HeadLocator) -> Self {
        Self { locator }
    }

    pub fn with_detector(detector: Arc<dyn FaceDetector>) -> Self {
        Self::new(HeadLocator::new(detector))
    }

    /// Compose a poster from encoded photo bytes.
    ///
    /// A missing template, a missing or empty photo, no detectable face and
    /// any other failure all come back as [`CompositionResult::Failed`].
    pub fn compose(&self, template: Option<&PosterTemplate>, photo: Option<&[u8]>) -> CompositionResult {
        let photo = photo.filter(|bytes| !bytes.is_empty());
        let (Some(template), Some(photo)) = (template, photo) else {
            tracing::info!(
                template = template.is_some(),
                photo = photo.is_some(),
                "poster not composed: missing input"
            );
            return CompositionResult::Failed(Failure::from(&PipelineError::MissingInput(
                "profile photo or poster template",
            )));
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let image = codec::decode_photo(photo)?;
            self.compose_image(template, &image)
        }));

        match outcome {
            Ok(Ok(poster)) => {
                tracing::info!(template = template.name(), "poster composed");
                CompositionResult::Succeeded(poster)
            }
            Ok(Err(err)) => {
                tracing::warn!(template = template.name(), error = %err, "poster composition failed");
                CompositionResult::Failed(Failure::from(&err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(template = template.name(), %message, "poster composition panicked");
                CompositionResult::Failed(Failure::unexpected(message))
            }
        }
    }

    /// Compose a poster from an already decoded photo.
    pub fn compose_image(
        &self,
        template: &PosterTemplate,
        photo: &DynamicImage,
    ) -> Result<RgbaImage, PipelineError> {
        let head = self.locator.locate_and_crop(
            photo,
            HEAD_DIAMETER_FRACTION,
            Some(template.circle_diameter()),
        )?;

        // Binary alpha makes the "over" blend a plain replace inside the
        // circle; overlay clips whatever runs past the base edge.
        let (ox, oy) = template.placement_offset();
        let mut poster = template.base().clone();
        imageops::overlay(&mut poster, &with_circle_alpha(&head), i64::from(ox), i64::from(oy));
        Ok(poster)
    }
}

/// Give the head crop a hard-edged alpha: opaque inside its inscribed circle,
/// transparent outside.
fn with_circle_alpha(head: &RgbImage) -> RgbaImage {
    let (width, height) = head.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        let [r, g, b] = head.get_pixel(x, y).0;
        let alpha = if in_inscribed_circle(x, y, width, height) { 255 } else { 0 };
        Rgba([r, g, b, alpha])
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected error while composing poster".to_string()
    }
}
