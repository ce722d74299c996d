//! Regeneration trigger and the storable generation record.
//!
//! Callers decide whether to compose by comparing the fingerprint of the photo
//! they already generated from with the one they have now.

use crate::composer::{CompositionResult, FailureKind};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// SHA-256 of the encoded photo bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhotoFingerprint([u8; 32]);

impl PhotoFingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }
}

impl fmt::Display for PhotoFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl fmt::Debug for PhotoFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhotoFingerprint({self})")
    }
}

impl Serialize for PhotoFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether a poster must be (re)generated: a photo is present and it is not
/// the one the current poster was made from.
pub fn should_regenerate(old: Option<&PhotoFingerprint>, new: Option<&PhotoFingerprint>) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => old != new,
    }
}

/// What the persistence layer stores for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PosterRecord {
    pub is_generated: bool,
    pub remarks: Option<String>,
    /// Machine-readable reason behind `remarks`.
    pub failure: Option<FailureKind>,
    /// Where the poster was written, when it was.
    pub poster: Option<PathBuf>,
    /// Photo the attempt was made from.
    pub photo: Option<PhotoFingerprint>,
}

impl PosterRecord {
    pub fn from_result(
        result: &CompositionResult,
        photo: Option<PhotoFingerprint>,
        poster: Option<PathBuf>,
    ) -> Self {
        match result {
            CompositionResult::Succeeded(_) => Self {
                is_generated: true,
                remarks: None,
                failure: None,
                poster,
                photo,
            },
            CompositionResult::Failed(failure) => Self {
                is_generated: false,
                remarks: Some(failure.remark.clone()),
                failure: Some(failure.kind),
                poster: None,
                photo,
            },
        }
    }
}
