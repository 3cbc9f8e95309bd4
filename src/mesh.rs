//! Mesh construction: landmark points padded with four frame corners, then
//! Delaunay triangulated so the triangle set covers the whole frame.

use delaunator::{triangulate as delaunay, Point as DelaunayPoint};

use crate::geometry::{Point, Triangle};

/// Number of synthetic corner points appended to every landmark set. The
/// last `NUM_CORNERS` indices of a mesh point set are always the corners, in
/// a fixed order, for the lifetime of the mesh.
pub const NUM_CORNERS: usize = 4;

/// Corners sit just outside the frame so the convex hull strictly covers it.
const CORNER_PAD: f32 = 1.0;

/// A triangulated mesh point set: the input landmarks plus the four corner
/// points, and Delaunay index triples over the combined list.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub points: Vec<Point>,
    pub triangles: Vec<Triangle>,
}

/// Append the four frame-corner points in their fixed order:
/// top-left, top-right, bottom-right, bottom-left.
pub fn append_corners(points: &[Point], w: f32, h: f32) -> Vec<Point> {
    let mut out = points.to_vec();
    out.push(Point::new(-CORNER_PAD, -CORNER_PAD));
    out.push(Point::new(w + CORNER_PAD, -CORNER_PAD));
    out.push(Point::new(w + CORNER_PAD, h + CORNER_PAD));
    out.push(Point::new(-CORNER_PAD, h + CORNER_PAD));
    out
}

/// Triangulate landmark points plus the image corners. Every input point is
/// a vertex of the final mesh; triangulation neither adds nor removes points.
/// Output is deterministic for a fixed point ordering, which lets two images
/// share one topology computed from their midpoint mesh.
pub fn triangulate(points: &[Point], w: f32, h: f32) -> Mesh {
    let pts = append_corners(points, w, h);
    let flat: Vec<DelaunayPoint> = pts
        .iter()
        .map(|p| DelaunayPoint {
            x: f64::from(p.x),
            y: f64::from(p.y),
        })
        .collect();
    let result = delaunay(&flat);
    let triangles = result
        .triangles
        .chunks_exact(3)
        .map(|tri| [tri[0], tri[1], tri[2]])
        .collect();
    Mesh {
        points: pts,
        triangles,
    }
}

/// Adjacency lists for the face points of a mesh, built from triangle edges.
/// Edges touching a corner index are dropped so corners never participate in
/// smoothing. Pure function of (face count, triangles); callers reusing one
/// topology across many distortion amounts may cache the result.
pub fn build_neighbors(face_count: usize, triangles: &[Triangle]) -> Vec<Vec<usize>> {
    let mut neighbors = vec![Vec::new(); face_count];
    for &[i, j, k] in triangles {
        for (p, q) in [(i, j), (j, k), (k, i)] {
            if p < face_count && q < face_count {
                neighbors[p].push(q);
                neighbors[q].push(p);
            }
        }
    }
    for adjacent in &mut neighbors {
        adjacent.sort_unstable();
        adjacent.dedup();
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points(size: f32, per_side: usize) -> Vec<Point> {
        let margin = size * 0.2;
        let step = (size - 2.0 * margin) / (per_side - 1) as f32;
        let mut points = Vec::new();
        for row in 0..per_side {
            for col in 0..per_side {
                points.push(Point::new(
                    margin + col as f32 * step,
                    margin + row as f32 * step,
                ));
            }
        }
        points
    }

    fn point_in_triangle(p: Point, a: Point, b: Point, c: Point) -> bool {
        let sign = |p1: Point, p2: Point, p3: Point| {
            (p1.x - p3.x) * (p2.y - p3.y) - (p2.x - p3.x) * (p1.y - p3.y)
        };
        let d1 = sign(p, a, b);
        let d2 = sign(p, b, c);
        let d3 = sign(p, c, a);
        let eps = 1e-3;
        let has_neg = d1 < -eps || d2 < -eps || d3 < -eps;
        let has_pos = d1 > eps || d2 > eps || d3 > eps;
        !(has_neg && has_pos)
    }

    #[test]
    fn corners_are_appended_last_in_fixed_order() {
        let mesh = triangulate(&grid_points(100.0, 3), 100.0, 100.0);
        assert_eq!(mesh.points.len(), 9 + NUM_CORNERS);
        let corners = &mesh.points[9..];
        assert_eq!(corners[0], Point::new(-1.0, -1.0));
        assert_eq!(corners[1], Point::new(101.0, -1.0));
        assert_eq!(corners[2], Point::new(101.0, 101.0));
        assert_eq!(corners[3], Point::new(-1.0, 101.0));
    }

    #[test]
    fn mesh_covers_full_frame() {
        let mesh = triangulate(&grid_points(64.0, 4), 64.0, 64.0);
        for y in 0..64 {
            for x in 0..64 {
                let p = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                let covered = mesh.triangles.iter().any(|&[i, j, k]| {
                    point_in_triangle(p, mesh.points[i], mesh.points[j], mesh.points[k])
                });
                assert!(covered, "pixel ({x}, {y}) not covered by any triangle");
            }
        }
    }

    #[test]
    fn triangulation_is_deterministic() {
        let points = grid_points(512.0, 5);
        let first = triangulate(&points, 512.0, 512.0);
        let second = triangulate(&points, 512.0, 512.0);
        assert_eq!(first, second);
    }

    #[test]
    fn triangles_index_combined_point_list() {
        let mesh = triangulate(&grid_points(100.0, 3), 100.0, 100.0);
        assert!(!mesh.triangles.is_empty());
        for tri in &mesh.triangles {
            for &index in tri {
                assert!(index < mesh.points.len());
            }
        }
    }

    #[test]
    fn neighbors_are_symmetric_and_exclude_corners() {
        let mesh = triangulate(&grid_points(100.0, 3), 100.0, 100.0);
        let face_count = mesh.points.len() - NUM_CORNERS;
        let neighbors = build_neighbors(face_count, &mesh.triangles);
        assert_eq!(neighbors.len(), face_count);
        for (i, adjacent) in neighbors.iter().enumerate() {
            for &j in adjacent {
                assert!(j < face_count, "corner index {j} leaked into adjacency");
                assert!(neighbors[j].contains(&i), "adjacency not symmetric");
            }
        }
    }
}
