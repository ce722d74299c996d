//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the luminance image into the 640×640 model input, decodes the
//! three anchor-free stride heads and suppresses overlaps with NMS. Landmark
//! heads are ignored; the pipeline only needs boxes.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

static SHARED: OnceLock<(PathBuf, Arc<ScrfdDetector>)> = OnceLock::new();

/// Process-wide detector, loaded on first use and reused read-only afterwards.
///
/// The first successfully loaded `model_path` wins for the life of the
/// process; later calls with a different path get the cached model and a
/// warning. Two threads racing the first call may both load the model; only
/// one instance is kept.
pub fn shared_detector(model_path: &Path) -> Result<Arc<ScrfdDetector>, DetectorError> {
    cached_or_load(&SHARED, model_path, ScrfdDetector::load)
}

fn cached_or_load<T>(
    cell: &OnceLock<(PathBuf, Arc<T>)>,
    model_path: &Path,
    load: impl FnOnce(&Path) -> Result<T, DetectorError>,
) -> Result<Arc<T>, DetectorError> {
    let (loaded_from, detector) = match cell.get() {
        Some(cached) => cached,
        None => {
            let loaded = Arc::new(load(model_path)?);
            cell.get_or_init(|| (model_path.to_path_buf(), loaded))
        }
    };
    if loaded_from.as_path() != model_path {
        tracing::warn!(
            requested = %model_path.display(),
            loaded = %loaded_from.display(),
            "face detector already loaded from another model; reusing it"
        );
    }
    Ok(Arc::clone(detector))
}

/// Letterbox geometry used to map boxes back to source coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// (score, bbox) output tensor indices for one stride.
type StrideOutputs = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    /// `Session::run` needs `&mut`; the lock keeps concurrent detections apart.
    session: Mutex<Session>,
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model (`det_10g.onnx`) from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_outputs = discover_outputs(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output mapping");

        Ok(Self {
            session: Mutex::new(session),
            stride_outputs,
        })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = preprocess(gray);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("detector session poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection finished");
        Ok(faces)
    }
}

/// Fit the image into the square model input and normalize to a 3-channel
/// NCHW tensor. Padding uses the mean so it normalizes to zero.
fn preprocess(gray: &GrayImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = gray.dimensions();
    let side = SCRFD_INPUT_SIZE as f32;
    let scale = (side / width as f32).min(side / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let pad_x = (SCRFD_INPUT_SIZE - new_w) / 2;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) / 2;

    let resized = imageops::resize(gray, new_w, new_h, FilterType::Triangle);
    let size = SCRFD_INPUT_SIZE as usize;

    let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        let (x, y) = (x as u32, y as u32);
        let inside = x >= pad_x && x < pad_x + new_w && y >= pad_y && y < pad_y + new_h;
        let pixel = if inside {
            f32::from(resized.get_pixel(x - pad_x, y - pad_y)[0])
        } else {
            SCRFD_MEAN
        };
        (pixel - SCRFD_MEAN) / SCRFD_STD
    });

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

/// Map stride heads to output tensors.
///
/// Named exports ("score_8", "bbox_8", ...) are matched by name; anything else
/// uses the usual positional layout `[0-2]` scores, `[3-5]` boxes.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0, 0); 3];
    for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => named[pos] = (score, bbox),
            _ => {
                tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    named
}

/// Decode the boxes of one stride head above the confidence threshold.
fn decode_stride(scores: &[f32], bboxes: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<FaceBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied().unwrap_or(0.0);
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                return None;
            }
            let offsets = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid) as f32 * step;
            let anchor_y = (cell / grid) as f32 * step;

            let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
            let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;
            let x1 = unmap_x(anchor_x - offsets[0] * step);
            let y1 = unmap_y(anchor_y - offsets[1] * step);
            let x2 = unmap_x(anchor_x + offsets[2] * step);
            let y2 = unmap_y(anchor_y + offsets[3] * step);

            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-maximum suppression. Output is sorted by descending confidence.
fn nms(mut faces: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(faces.len());
    for face in faces {
        if keep.iter().all(|kept| iou(kept, &face) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> FaceBox {
        FaceBox {
            confidence,
            ..FaceBox::new(x, y, w, h)
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = FaceBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_and_partial() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(iou(&a, &FaceBox::new(20.0, 20.0, 10.0, 10.0)).abs() < 1e-6);
        let half = FaceBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlap() {
        let faces = vec![
            scored(5.0, 5.0, 100.0, 100.0, 0.8),
            scored(200.0, 200.0, 50.0, 50.0, 0.7),
            scored(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = nms(faces, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_discover_outputs_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_outputs(&names), [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_outputs(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_preprocess_letterbox_geometry() {
        let gray = GrayImage::from_pixel(320, 160, image::Luma([200]));
        let (tensor, letterbox) = preprocess(&gray);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 160.0);

        // padding normalizes to zero, content does not
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let expected = (200.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 320, 320]] - expected).abs() < 0.01);
    }

    #[test]
    fn test_decode_stride_maps_back_to_source() {
        let letterbox = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 160.0 };
        let grid = 640 / 32;
        let mut scores = vec![0.0f32; grid * grid * 2];
        let mut bboxes = vec![0.0f32; grid * grid * 2 * 4];
        // anchor cell (x=10, y=10), first anchor
        let idx = (10 * grid + 10) * 2;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let faces = decode_stride(&scores, &bboxes, 32, &letterbox);
        assert_eq!(faces.len(), 1);
        let f = faces[0];
        // letterboxed box 288..352 on both axes
        assert!((f.x - 144.0).abs() < 1e-4);
        assert!((f.y - 64.0).abs() < 1e-4);
        assert!((f.width - 32.0).abs() < 1e-4);
        assert!((f.height - 32.0).abs() < 1e-4);
    }

    #[test]
    fn test_cached_detector_first_path_wins() {
        let cell = OnceLock::new();
        let first = cached_or_load(&cell, Path::new("a.onnx"), |_| Ok(1u8)).unwrap();
        let second = cached_or_load(&cell, Path::new("b.onnx"), |_| -> Result<u8, DetectorError> {
            panic!("model must not be reloaded")
        })
        .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cell.get().unwrap().0, PathBuf::from("a.onnx"));
    }

    #[test]
    fn test_cached_detector_failed_load_is_not_cached() {
        let cell: OnceLock<(PathBuf, Arc<u8>)> = OnceLock::new();
        let err = cached_or_load(&cell, Path::new("gone.onnx"), |p| {
            Err(DetectorError::ModelNotFound(p.display().to_string()))
        });
        assert!(matches!(err, Err(DetectorError::ModelNotFound(_))));
        assert!(cell.get().is_none());

        let loaded = cached_or_load(&cell, Path::new("late.onnx"), |_| Ok(7u8)).unwrap();
        assert_eq!(*loaded, 7);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ScrfdDetector::load(Path::new("/nonexistent/det_10g.onnx"))
            .err()
            .expect("missing model must fail");
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
