//! Procedural "horse" distortion field.
//!
//! Deforms a face mesh toward a canonical equine silhouette: one coherent
//! deformation field built from smooth vertical band weights (top of head,
//! eye band, upper/lower halves) that blend three behaviors per point — a
//! vertical retarget toward canonical anchor heights, a horizontal narrowing
//! of the offset from the face centroid (with an eye-band widening
//! counter-effect), and a global strength gated by the distortion amount.
//! Every weight is a cubic or quintic Hermite blend; hard thresholds would
//! tear the mesh. A final light Laplacian pass removes local shear where
//! adjacent band weights disagree.

use crate::geometry::{Point, Triangle};
use crate::mesh::{build_neighbors, NUM_CORNERS};

// Canonical anchor geometry of the target silhouette, as fractions of the
// frame, independent of the input face proportions.
const EYE_LEFT_X: f32 = 0.333;
const EYE_RIGHT_X: f32 = 0.635;
const EYE_Y: f32 = 0.413;
const EYE_SPREAD: f32 = 0.28; // push eyes apart (scale away from center)
const TOP_Y: f32 = 0.161;
const TOP_LEFT_X: f32 = 0.36;
const TOP_RIGHT_X: f32 = 0.609;
const CHEEK_LEFT_X: f32 = 0.383;
const CHEEK_RIGHT_X: f32 = 0.584;
const CHIN_LEFT_X: f32 = 0.41;
const CHIN_RIGHT_X: f32 = 0.569;
const NOSE_Y: f32 = 0.737;
const JAW_Y: f32 = 0.845;
const HEAD_NARROW: f32 = 0.14; // extra horizontal narrowing for the whole head

/// Horizontal scale factor never collapses below this.
const MIN_X_FACTOR: f32 = 0.28;

/// Relaxation factor of the post-deformation Laplacian pass.
const SMOOTH_LAMBDA: f32 = 0.28;

/// Cubic Hermite blend of `x` over `[a, b]`, clamped. A degenerate interval
/// evaluates to 0.
pub fn smoothstep(a: f32, b: f32, x: f32) -> f32 {
    let t = if b - a != 0.0 {
        ((x - a) / (b - a)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    t * t * (3.0 - 2.0 * t)
}

/// Quintic Hermite blend for softer falloffs at band edges.
pub fn smootherstep(a: f32, b: f32, x: f32) -> f32 {
    let t = if b - a != 0.0 {
        ((x - a) / (b - a)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

/// Light Laplacian smoothing: each face point relaxes toward the centroid of
/// its mesh neighbors. Corners are untouched, both as smoothed points and as
/// neighbor sources.
fn laplacian_smooth(
    points: &[Point],
    face_count: usize,
    triangles: &[Triangle],
    lambda: f32,
) -> Vec<Point> {
    let neighbors = build_neighbors(face_count, triangles);
    let mut out = points.to_vec();
    for i in 0..face_count {
        let adjacent = &neighbors[i];
        if adjacent.is_empty() {
            continue;
        }
        let mut sx = 0.0;
        let mut sy = 0.0;
        for &j in adjacent {
            sx += points[j].x;
            sy += points[j].y;
        }
        let nx = sx / adjacent.len() as f32;
        let ny = sy / adjacent.len() as f32;
        out[i].x = (1.0 - lambda) * points[i].x + lambda * nx;
        out[i].y = (1.0 - lambda) * points[i].y + lambda * ny;
    }
    out
}

/// Deform a mesh point set toward the canonical horse silhouette.
///
/// `points` is a full mesh point set (landmarks plus `NUM_CORNERS` corners);
/// the corners pass through unchanged for every `amount`. `amount` in [0, 1]
/// scales every per-point delta. The frame is square, and the field is
/// horizontally symmetric about the face centroid, so only `h` parameterizes
/// the canonical anchors. With no face points the input is returned
/// unchanged.
pub fn distort_to_horse(
    points: &[Point],
    amount: f32,
    h: f32,
    triangles: &[Triangle],
) -> Vec<Point> {
    let n = points.len().saturating_sub(NUM_CORNERS);
    if n == 0 {
        return points.to_vec();
    }

    let mut cx = 0.0;
    let mut cy = 0.0;
    let mut y_min = h;
    let mut y_max = 0.0f32;
    for p in &points[..n] {
        cx += p.x;
        cy += p.y;
        y_min = y_min.min(p.y);
        y_max = y_max.max(p.y);
    }
    cx /= n as f32;
    cy /= n as f32;
    let face_h = (y_max - y_min).max(1.0);
    let lower_range = (y_max - cy).max(1.0);

    // Wide and narrow blend widths decouple vertical retargeting from
    // horizontal narrowing around the centroid split.
    let blend_y = 0.52 * face_h;
    let blend_y_narrow = 0.72 * face_h;
    let top_end = y_min + 0.42 * face_h;
    let eye_top = y_min + 0.12 * face_h;
    let eye_center = y_min + 0.34 * face_h;
    let eye_bottom_soft = y_min + 0.70 * face_h;
    let cheek_band_top = y_min + 0.52 * face_h;
    let cheek_band_bottom = y_min + 0.78 * face_h;
    let cheek_mid = (cheek_band_top + cheek_band_bottom) * 0.5;

    let top_target_y = TOP_Y * h;
    let eye_target_y = EYE_Y * h;
    let nose_target_y = NOSE_Y * h;
    let jaw_target_y = JAW_Y * h;

    // Narrowing ratios of the canonical silhouette relative to its eye width.
    let eye_width = EYE_RIGHT_X - EYE_LEFT_X;
    let k_top = (1.0 - (TOP_RIGHT_X - TOP_LEFT_X) / eye_width).max(0.0);
    let k_cheek = (1.0 - (CHEEK_RIGHT_X - CHEEK_LEFT_X) / eye_width).max(0.0);
    let k_chin = (1.0 - (CHIN_RIGHT_X - CHIN_LEFT_X) / eye_width).max(0.0);

    let mut out = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        if i >= n {
            out.push(*p);
            continue;
        }

        let w_top = 1.0 - smootherstep(y_min, top_end, p.y);
        let up_eye = smootherstep(eye_top, eye_center, p.y);
        let down_eye = 1.0 - smootherstep(eye_center, eye_bottom_soft, p.y);
        let w_eye = up_eye * down_eye;
        let w_upper = 1.0 - smootherstep(cy - blend_y, cy + blend_y, p.y);
        let w_lower = smootherstep(cy - blend_y, cy + blend_y, p.y);
        let w_upper_n = 1.0 - smootherstep(cy - blend_y_narrow, cy + blend_y_narrow, p.y);
        let w_lower_n = smootherstep(cy - blend_y_narrow, cy + blend_y_narrow, p.y);

        let sum_upper = w_top + w_eye;
        let (top_norm, eye_norm) = if sum_upper > 1e-6 {
            (w_top / sum_upper, w_eye / sum_upper)
        } else {
            (0.0, 0.0)
        };

        let r = ((p.y - cy) / lower_range).clamp(0.0, 1.0);

        let y_upper = if sum_upper > 1e-6 {
            top_norm * top_target_y + eye_norm * eye_target_y
        } else {
            eye_target_y
        };
        let y_lower = (1.0 - r) * nose_target_y + r * jaw_target_y;
        let y_target = w_upper * y_upper + w_lower * y_lower;

        let n_upper = if sum_upper > 1e-6 { top_norm * k_top } else { k_top };
        let n_lower = (1.0 - r) * k_cheek + r * k_chin;
        let narrow_raw = w_upper_n * n_upper + w_lower_n * n_lower;
        let w_cheek = if p.y <= cheek_mid {
            smootherstep(cheek_band_top, cheek_mid, p.y)
        } else {
            1.0 - smootherstep(cheek_mid, cheek_band_bottom, p.y)
        };
        let narrow_blend = 0.5 * (n_upper + n_lower);
        let narrow = ((1.0 - w_cheek) * narrow_raw + w_cheek * narrow_blend).min(1.0);

        // Points in no active band barely move.
        let w_mod = (w_top + w_eye + w_lower).min(1.0);
        let s = amount * w_mod;
        let spread = w_eye * EYE_SPREAD;
        let base = 1.0 - s * narrow + s * spread;
        let factor = (base * (1.0 - amount * HEAD_NARROW)).max(MIN_X_FACTOR);

        out.push(Point::new(
            cx + factor * (p.x - cx),
            p.y + s * (y_target - p.y),
        ));
    }

    laplacian_smooth(&out, n, triangles, SMOOTH_LAMBDA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::triangulate;

    fn face_grid(size: f32) -> Vec<Point> {
        let mut points = Vec::new();
        for row in 0..6 {
            for col in 0..6 {
                points.push(Point::new(
                    size * 0.3 + col as f32 * size * 0.08,
                    size * 0.25 + row as f32 * size * 0.09,
                ));
            }
        }
        points
    }

    #[test]
    fn smoothstep_endpoints_and_monotonicity() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(smoothstep(3.0, 3.0, 3.0), 0.0);
        let mut last = 0.0;
        for step in 0..=20 {
            let v = smootherstep(0.0, 1.0, step as f32 / 20.0);
            assert!(v >= last);
            last = v;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn corners_pass_through_unchanged() {
        let size = 512.0;
        let mesh = triangulate(&face_grid(size), size, size);
        for amount in [0.0, 0.3, 0.7, 1.0] {
            let distorted = distort_to_horse(&mesh.points, amount, size, &mesh.triangles);
            assert_eq!(distorted.len(), mesh.points.len());
            let corner_start = mesh.points.len() - NUM_CORNERS;
            for i in corner_start..mesh.points.len() {
                assert_eq!(distorted[i], mesh.points[i], "corner {i} moved");
            }
        }
    }

    #[test]
    fn empty_face_set_is_returned_unchanged() {
        let corners = vec![
            Point::new(-1.0, -1.0),
            Point::new(513.0, -1.0),
            Point::new(513.0, 513.0),
            Point::new(-1.0, 513.0),
        ];
        let out = distort_to_horse(&corners, 1.0, 512.0, &[]);
        assert_eq!(out, corners);
    }

    #[test]
    fn field_is_continuous_in_amount() {
        let size = 512.0;
        let mesh = triangulate(&face_grid(size), size, size);
        let a = distort_to_horse(&mesh.points, 0.5, size, &mesh.triangles);
        let b = distort_to_horse(&mesh.points, 0.501, size, &mesh.triangles);
        for (p, q) in a.iter().zip(b.iter()) {
            let dx = (p.x - q.x).abs();
            let dy = (p.y - q.y).abs();
            assert!(dx < 2.0 && dy < 2.0, "jump between amounts: {p:?} -> {q:?}");
        }
    }

    #[test]
    fn full_amount_pulls_top_points_toward_canonical_head() {
        let size = 512.0;
        let mesh = triangulate(&face_grid(size), size, size);
        let distorted = distort_to_horse(&mesh.points, 1.0, size, &mesh.triangles);
        // The topmost face row retargets upward toward the canonical top of
        // head (0.161 * h), which sits well above the input grid.
        let input_top = mesh.points[0].y;
        let output_top = distorted[0].y;
        assert!(
            output_top < input_top,
            "expected top row to move up: {input_top} -> {output_top}"
        );
    }

    #[test]
    fn zero_amount_only_smooths() {
        let size = 512.0;
        let mesh = triangulate(&face_grid(size), size, size);
        let out = distort_to_horse(&mesh.points, 0.0, size, &mesh.triangles);
        // At amount 0 the band deltas vanish; only the Laplacian pass remains,
        // which moves interior grid points by a fraction of the grid step.
        for (p, q) in mesh.points.iter().zip(out.iter()) {
            assert!((p.x - q.x).abs() < size * 0.05);
            assert!((p.y - q.y).abs() < size * 0.05);
        }
    }
}
