//! Geometric primitives: points, index triangles, and the per-triangle affine
//! solver that drives piecewise warping.

use crate::mesh::NUM_CORNERS;

/// A point in pixel coordinates of the square working surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Linear interpolation between two points at parameter `t`.
    pub fn lerp(a: Point, b: Point, t: f32) -> Point {
        Point {
            x: (1.0 - t) * a.x + t * b.x,
            y: (1.0 - t) * a.y + t * b.y,
        }
    }
}

/// Index triple into a mesh point set. The topology is computed once per
/// image pair and reused for every frame; only vertex positions move as the
/// blend parameter varies.
pub type Triangle = [usize; 3];

/// Column-major 2x3 affine transform:
/// `(x, y) -> (a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

/// Denominator threshold below which a source triangle counts as collinear.
const DEGENERATE_EPSILON: f64 = 1e-10;

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// The unique affine sending each vertex of `src` to the corresponding
    /// vertex of `dest`, solved from the three point correspondences. The
    /// denominator is twice the signed area of the source triangle; a
    /// near-degenerate (collinear) source yields the identity instead of
    /// failing, so NaNs never propagate into the compositor.
    pub fn between(src: &[Point; 3], dest: &[Point; 3]) -> Affine {
        let (u0, v0) = (f64::from(src[0].x), f64::from(src[0].y));
        let (u1, v1) = (f64::from(src[1].x), f64::from(src[1].y));
        let (u2, v2) = (f64::from(src[2].x), f64::from(src[2].y));
        let (x0, y0) = (f64::from(dest[0].x), f64::from(dest[0].y));
        let (x1, y1) = (f64::from(dest[1].x), f64::from(dest[1].y));
        let (x2, y2) = (f64::from(dest[2].x), f64::from(dest[2].y));

        let den = u0 * (v1 - v2) - v0 * (u1 - u2) + (u1 * v2 - u2 * v1);
        if den.abs() < DEGENERATE_EPSILON {
            return Affine::IDENTITY;
        }

        let a = (x0 * (v1 - v2) - x1 * (v0 - v2) + x2 * (v0 - v1)) / den;
        let b = (y0 * (v1 - v2) - y1 * (v0 - v2) + y2 * (v0 - v1)) / den;
        let c = (x0 * (u2 - u1) - x1 * (u2 - u0) + x2 * (u1 - u0)) / den;
        let d = (y0 * (u2 - u1) - y1 * (u2 - u0) + y2 * (u1 - u0)) / den;
        let e = (x0 * (u1 * v2 - u2 * v1) - x1 * (u0 * v2 - u2 * v0) + x2 * (u0 * v1 - u1 * v0))
            / den;
        let f = (y0 * (u1 * v2 - u2 * v1) - y1 * (u0 * v2 - u2 * v0) + y2 * (u0 * v1 - u1 * v0))
            / den;

        Affine {
            a: a as f32,
            b: b as f32,
            c: c as f32,
            d: d as f32,
            e: e as f32,
            f: f as f32,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.c * p.y + self.e,
            y: self.b * p.x + self.d * p.y + self.f,
        }
    }
}

/// Scale a triangle's vertices away from its own centroid. Expanded clip
/// regions of adjacent triangles overlap slightly, which hides the shared
/// edge in the CPU compositing path.
pub fn expand_triangle(tri: &[Point; 3], scale: f32) -> [Point; 3] {
    let cx = (tri[0].x + tri[1].x + tri[2].x) / 3.0;
    let cy = (tri[0].y + tri[1].y + tri[2].y) / 3.0;
    [
        Point::new(cx + (tri[0].x - cx) * scale, cy + (tri[0].y - cy) * scale),
        Point::new(cx + (tri[1].x - cx) * scale, cy + (tri[1].y - cy) * scale),
        Point::new(cx + (tri[2].x - cx) * scale, cy + (tri[2].y - cy) * scale),
    ]
}

/// Centroid of the face points of a mesh point set (corners excluded).
/// `None` when the set holds corners only.
pub fn face_centroid(points: &[Point]) -> Option<Point> {
    let n = points.len().saturating_sub(NUM_CORNERS);
    if n == 0 {
        return None;
    }
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in &points[..n] {
        cx += p.x;
        cy += p.y;
    }
    Some(Point::new(cx / n as f32, cy / n as f32))
}

/// A source crop rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Full-height crop rect horizontally centred on the face, clamped to the
/// image so the crop always fills the frame with no empty bands.
pub fn face_center_crop_x(points: &[Point], w: u32, h: u32, crop_factor: f32) -> CropRect {
    let Some(center) = face_centroid(points) else {
        return CropRect {
            x: 0,
            y: 0,
            width: w,
            height: h,
        };
    };
    let sw = ((w as f32 * crop_factor).round() as u32).max(1).min(w);
    let sx = (center.x - sw as f32 * 0.5).round().clamp(0.0, (w - sw) as f32) as u32;
    CropRect {
        x: sx,
        y: 0,
        width: sw,
        height: h,
    }
}
