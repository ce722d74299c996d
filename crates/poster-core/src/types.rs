use serde::Serialize;

/// Bounding box of a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    /// Integer centroid of the box (floored).
    pub fn centroid(&self) -> (i64, i64) {
        (
            (self.x + self.width / 2.0).floor() as i64,
            (self.y + self.height / 2.0).floor() as i64,
        )
    }
}

/// Circle placed on a source image, centered on a head.
///
/// `(cx, cy)` sits on a pixel boundary, so the bounding square
/// `[cx - r, cx + r) × [cy - r, cy + r)` is exactly `2r` pixels wide and the
/// circle is inscribed in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircleSpec {
    pub cx: i64,
    pub cy: i64,
    pub radius: u32,
}

impl CircleSpec {
    /// Build the head circle for `face` on a `width × height` image.
    ///
    /// The radius is `floor(width * diameter_fraction / 2)` (at least one
    /// pixel). The center starts on the face centroid and is shifted the
    /// minimum amount needed to keep the circle on-canvas; the radius is never
    /// reduced. An axis shorter than the diameter cannot hold the circle, so the
    /// center goes to the middle of that axis and the crop is zero-padded.
    pub fn around_face(face: &FaceBox, width: u32, height: u32, diameter_fraction: f32) -> Self {
        let radius = ((f64::from(width) * f64::from(diameter_fraction) / 2.0).floor() as u32).max(1);
        let (fx, fy) = face.centroid();

        Self {
            cx: clamp_axis(fx, radius, width),
            cy: clamp_axis(fy, radius, height),
            radius,
        }
    }

    /// Side length of the bounding square.
    pub fn diameter(&self) -> u32 {
        self.radius * 2
    }

    /// Top-left corner of the bounding square (may be negative when padded).
    pub fn origin(&self) -> (i64, i64) {
        let r = i64::from(self.radius);
        (self.cx - r, self.cy - r)
    }

    /// Whether the pixel at `(x, y)` is inside the circle (pixel-center test).
    pub fn contains(&self, x: i64, y: i64) -> bool {
        let dx = x as f64 + 0.5 - self.cx as f64;
        let dy = y as f64 + 0.5 - self.cy as f64;
        let r = f64::from(self.radius);
        dx * dx + dy * dy <= r * r
    }

    /// True when every edge of a `width × height` image is at least `radius`
    /// away from the center.
    pub fn is_inscribed(&self, width: u32, height: u32) -> bool {
        let r = i64::from(self.radius);
        self.cx - r >= 0
            && self.cy - r >= 0
            && self.cx + r <= i64::from(width)
            && self.cy + r <= i64::from(height)
    }
}

fn clamp_axis(center: i64, radius: u32, extent: u32) -> i64 {
    let r = i64::from(radius);
    let extent = i64::from(extent);
    if 2 * r > extent {
        return extent / 2;
    }
    center.clamp(r, extent - r)
}

/// Whether pixel `(x, y)` of a `width × height` image lies inside the circle
/// inscribed in that image.
pub fn in_inscribed_circle(x: u32, y: u32, width: u32, height: u32) -> bool {
    let cx = f64::from(width) / 2.0;
    let cy = f64::from(height) / 2.0;
    let r = f64::from(width.min(height)) / 2.0;
    let dx = f64::from(x) + 0.5 - cx;
    let dy = f64::from(y) + 0.5 - cy;
    dx * dx + dy * dy <= r * r
}
