//! Head location and circular crop.

use crate::detector::FaceDetector;
use crate::error::PipelineError;
use crate::types::CircleSpec;
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;

/// Finds a head in a photo and cuts a circular, square-framed crop around it.
#[derive(Clone)]
pub struct HeadLocator {
    detector: Arc<dyn FaceDetector>,
}

impl HeadLocator {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }

    /// Detect the head and place the crop circle on `image`.
    ///
    /// Uses the first candidate the detector returns.
    pub fn locate(&self, image: &DynamicImage, diameter_fraction: f32) -> Result<CircleSpec, PipelineError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidParameter("image has zero dimensions".into()));
        }
        if !(diameter_fraction > 0.0 && diameter_fraction <= 1.0) {
            return Err(PipelineError::InvalidParameter(format!(
                "diameter fraction must be in (0, 1], got {diameter_fraction}"
            )));
        }

        let gray = image.to_luma8();
        let faces = self.detector.detect(&gray)?;
        let face = faces.first().ok_or(PipelineError::FaceNotDetected)?;

        let circle = CircleSpec::around_face(face, width, height, diameter_fraction);
        tracing::debug!(
            candidates = faces.len(),
            face = ?face,
            cx = circle.cx,
            cy = circle.cy,
            radius = circle.radius,
            "head located"
        );
        Ok(circle)
    }

    /// Circular head crop, optionally resized to `target_size × target_size`.
    ///
    /// Pixels outside the circle are black. Without a target size the result
    /// is `2 * radius` pixels square.
    pub fn locate_and_crop(
        &self,
        image: &DynamicImage,
        diameter_fraction: f32,
        target_size: Option<u32>,
    ) -> Result<RgbImage, PipelineError> {
        if target_size == Some(0) {
            return Err(PipelineError::InvalidParameter("target size must be positive".into()));
        }

        let circle = self.locate(image, diameter_fraction)?;
        let cropped = crop_circle(&image.to_rgb8(), &circle);

        Ok(match target_size {
            Some(size) => resize_area(&cropped, size, size),
            None => cropped,
        })
    }
}

/// Cut the bounding square of `circle` out of `source`, zeroing everything
/// outside the circle. Square pixels that fall off the source are zero too.
pub fn crop_circle(source: &RgbImage, circle: &CircleSpec) -> RgbImage {
    let side = circle.diameter();
    let (left, top) = circle.origin();
    let (width, height) = (i64::from(source.width()), i64::from(source.height()));

    RgbImage::from_fn(side, side, |x, y| {
        let sx = left + i64::from(x);
        let sy = top + i64::from(y);
        let on_canvas = sx >= 0 && sy >= 0 && sx < width && sy < height;
        if on_canvas && circle.contains(sx, sy) {
            *source.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Resize by area averaging: every output pixel is the coverage-weighted mean
/// of the source pixels under its footprint.
pub fn resize_area(source: &RgbImage, width: u32, height: u32) -> RgbImage {
    if source.dimensions() == (width, height) {
        return source.clone();
    }

    let src_w = source.width() as usize;
    let src_h = source.height() as usize;
    let out_w = width as usize;
    let cols = area_weights(source.width(), width);
    let rows = area_weights(source.height(), height);

    // Horizontal pass: src_h rows of out_w pixels.
    let raw = source.as_raw();
    let mut horizontal = vec![0.0f32; src_h * out_w * 3];
    for y in 0..src_h {
        for (x, taps) in cols.iter().enumerate() {
            let dst = (y * out_w + x) * 3;
            for &(sx, weight) in taps {
                let src = (y * src_w + sx) * 3;
                for c in 0..3 {
                    horizontal[dst + c] += f32::from(raw[src + c]) * weight;
                }
            }
        }
    }

    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0.0f32; 3];
        for &(sy, weight) in &rows[y as usize] {
            let src = (sy * out_w + x as usize) * 3;
            for c in 0..3 {
                acc[c] += horizontal[src + c] * weight;
            }
        }
        Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}

/// For each destination index, the source indices it covers and their
/// normalized coverage weights.
fn area_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f32)>> {
    let scale = f64::from(src_len) / f64::from(dst_len);

    (0..dst_len)
        .map(|i| {
            let start = f64::from(i) * scale;
            let end = f64::from(i + 1) * scale;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src_len as usize);

            (first..last)
                .filter_map(|j| {
                    let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
                    (overlap > 1e-9).then(|| (j, (overlap / scale) as f32))
                })
                .collect()
        })
        .collect()
}
