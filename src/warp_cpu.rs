//! CPU compositing backend: per-triangle clip masks plus affine pixmap draws.
//!
//! For each triangle the destination region is clipped to a slightly expanded
//! copy of the triangle and the whole source image is drawn through the
//! solved source-to-destination affine; the clip restricts the visible output
//! to the triangle. Overlapping the expanded clips is the only seam-hiding
//! mechanism — adjacent triangles sample a continuous warp, so they agree
//! along shared edges and the overlap never shows.

use anyhow::{anyhow, Result};
use image::RgbaImage;
use tiny_skia::{
    BlendMode, Color, ColorU8, FillRule, FilterQuality, Mask, PathBuilder, Pixmap, PixmapPaint,
    Transform,
};

use crate::compositor::{horse_phase, lerp_points, Compositor, HorsePhase};
use crate::distort::distort_to_horse;
use crate::frame::FrameRgba;
use crate::geometry::{expand_triangle, Affine, Point, Triangle};
use crate::mesh::NUM_CORNERS;

/// Clip expansion for interior triangles.
const CLIP_SCALE: f32 = 1.01;
/// Stronger expansion for triangles touching a frame corner; closes the
/// star-shaped gaps that open at the corners mid-morph.
const CORNER_CLIP_SCALE: f32 = 1.03;

pub struct CpuCompositor {
    width: u32,
    height: u32,
}

impl CpuCompositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Opaque black canvas; layers composite over it, so every output pixel
    /// stays opaque for all blend parameters.
    fn blank_canvas(&self) -> Result<Pixmap> {
        let mut pixmap = Pixmap::new(self.width, self.height)
            .ok_or_else(|| anyhow!("failed to create {}x{} canvas", self.width, self.height))?;
        pixmap.fill(Color::BLACK);
        Ok(pixmap)
    }
}

fn pixmap_from_image(image: &RgbaImage) -> Result<Pixmap> {
    let (w, h) = image.dimensions();
    let mut pixmap =
        Pixmap::new(w, h).ok_or_else(|| anyhow!("failed to allocate {w}x{h} source pixmap"))?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

fn frame_from_pixmap(pixmap: Pixmap) -> Result<FrameRgba> {
    let (width, height) = (pixmap.width(), pixmap.height());
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for pixel in pixmap.pixels() {
        let straight = pixel.demultiply();
        data.extend_from_slice(&[
            straight.red(),
            straight.green(),
            straight.blue(),
            straight.alpha(),
        ]);
    }
    FrameRgba::new(width, height, data)
}

/// Draw `image` warped from `src_points` onto `dest_points`, triangle by
/// triangle, at the given layer alpha.
///
/// Masks are filled without antialiasing: adjacent warped triangles agree
/// along shared edges, and hard-edged clips avoid blending partial coverage
/// against whatever lies beneath the seam.
fn draw_warp(
    canvas: &mut Pixmap,
    image: &Pixmap,
    src_points: &[Point],
    dest_points: &[Point],
    triangles: &[Triangle],
    alpha: f32,
) -> Result<()> {
    let corner_start = dest_points.len().saturating_sub(NUM_CORNERS);
    let paint = PixmapPaint {
        opacity: alpha.clamp(0.0, 1.0),
        blend_mode: BlendMode::SourceOver,
        quality: FilterQuality::Bilinear,
    };

    for &[i, j, k] in triangles {
        let src_tri = [src_points[i], src_points[j], src_points[k]];
        let dest_tri = [dest_points[i], dest_points[j], dest_points[k]];
        let affine = Affine::between(&src_tri, &dest_tri);

        let touches_corner = i >= corner_start || j >= corner_start || k >= corner_start;
        let clip_scale = if touches_corner {
            CORNER_CLIP_SCALE
        } else {
            CLIP_SCALE
        };
        let clip = expand_triangle(&dest_tri, clip_scale);

        let mut pb = PathBuilder::new();
        pb.move_to(clip[0].x, clip[0].y);
        pb.line_to(clip[1].x, clip[1].y);
        pb.line_to(clip[2].x, clip[2].y);
        pb.close();
        let Some(path) = pb.finish() else {
            // Collapsed destination triangle: nothing visible to draw.
            continue;
        };

        let mut mask = Mask::new(canvas.width(), canvas.height())
            .ok_or_else(|| anyhow!("failed to allocate clip mask"))?;
        mask.fill_path(&path, FillRule::Winding, false, Transform::identity());

        let transform = Transform::from_row(
            affine.a, affine.b, affine.c, affine.d, affine.e, affine.f,
        );
        canvas.draw_pixmap(0, 0, image.as_ref(), &paint, transform, Some(&mask));
    }
    Ok(())
}

/// Draw an image unwarped over the full frame at the given alpha.
fn draw_full(canvas: &mut Pixmap, image: &Pixmap, alpha: f32) {
    let paint = PixmapPaint {
        opacity: alpha.clamp(0.0, 1.0),
        blend_mode: BlendMode::SourceOver,
        quality: FilterQuality::Bilinear,
    };
    canvas.draw_pixmap(0, 0, image.as_ref(), &paint, Transform::identity(), None);
}

impl Compositor for CpuCompositor {
    fn render_two_way(
        &mut self,
        img_a: &RgbaImage,
        img_b: &RgbaImage,
        points_a: &[Point],
        points_b: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> Result<FrameRgba> {
        debug_assert_eq!(points_a.len(), points_b.len());
        let mid = lerp_points(points_a, points_b, t);
        let src_a = pixmap_from_image(img_a)?;
        let src_b = pixmap_from_image(img_b)?;

        let mut canvas = self.blank_canvas()?;
        // Over the opaque base layer this composites to the exact
        // (1-t)*A + t*B crossfade the GPU shader computes.
        draw_warp(&mut canvas, &src_a, points_a, &mid, triangles, 1.0)?;
        draw_warp(&mut canvas, &src_b, points_b, &mid, triangles, t)?;
        frame_from_pixmap(canvas)
    }

    fn render_horse(
        &mut self,
        img_source: &RgbaImage,
        img_horse: &RgbaImage,
        img_target: &RgbaImage,
        points_source: &[Point],
        points_target: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> Result<FrameRgba> {
        let h = self.height as f32;
        let mut canvas = self.blank_canvas()?;
        match horse_phase(t) {
            HorsePhase::TowardHorse {
                amount,
                layer_alpha,
            } => {
                let distorted = distort_to_horse(points_source, amount, h, triangles);
                let horse = pixmap_from_image(img_horse)?;
                let source = pixmap_from_image(img_source)?;
                draw_full(&mut canvas, &horse, 1.0);
                draw_warp(
                    &mut canvas,
                    &source,
                    points_source,
                    &distorted,
                    triangles,
                    layer_alpha,
                )?;
            }
            HorsePhase::FromHorse {
                amount,
                layer_alpha,
            } => {
                let distorted = distort_to_horse(points_target, amount, h, triangles);
                let target = pixmap_from_image(img_target)?;
                let horse = pixmap_from_image(img_horse)?;
                draw_warp(
                    &mut canvas,
                    &target,
                    points_target,
                    &distorted,
                    triangles,
                    1.0,
                )?;
                draw_full(&mut canvas, &horse, layer_alpha);
            }
        }
        frame_from_pixmap(canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::triangulate;

    fn gradient_image(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            image::Rgba([
                (x * 255 / size.max(1)) as u8,
                (y * 255 / size.max(1)) as u8,
                128,
                255,
            ])
        })
    }

    #[test]
    fn identity_warp_reproduces_source_interior() {
        let size = 100u32;
        let img = gradient_image(size);
        // Spec scenario: a unit-square landmark set plus frame corners.
        let landmarks = vec![
            Point::new(40.0, 40.0),
            Point::new(41.0, 40.0),
            Point::new(41.0, 41.0),
            Point::new(40.0, 41.0),
        ];
        let mesh = triangulate(&landmarks, size as f32, size as f32);

        let mut compositor = CpuCompositor::new(size, size);
        let frame = compositor
            .render_two_way(&img, &img, &mesh.points, &mesh.points, &mesh.triangles, 0.5)
            .unwrap();

        let mut worst = 0i32;
        for y in 2..size - 2 {
            for x in 2..size - 2 {
                let got = frame.pixel(x, y);
                let want = img.get_pixel(x, y).0;
                for channel in 0..3 {
                    worst = worst.max((i32::from(got[channel]) - i32::from(want[channel])).abs());
                }
            }
        }
        assert!(worst <= 2, "identity morph diverged by {worst}");
    }

    #[test]
    fn output_is_fully_opaque() {
        let size = 64u32;
        let img = gradient_image(size);
        let landmarks = vec![
            Point::new(20.0, 20.0),
            Point::new(44.0, 22.0),
            Point::new(32.0, 44.0),
        ];
        let mesh = triangulate(&landmarks, size as f32, size as f32);
        let shifted: Vec<Point> = mesh
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i < landmarks.len() {
                    Point::new(p.x + 4.0, p.y - 3.0)
                } else {
                    *p
                }
            })
            .collect();

        let mut compositor = CpuCompositor::new(size, size);
        for t in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let frame = compositor
                .render_two_way(&img, &img, &mesh.points, &shifted, &mesh.triangles, t)
                .unwrap();
            assert!(
                frame.data.chunks_exact(4).all(|px| px[3] == 255),
                "transparent pixel at t={t}"
            );
        }
    }

    #[test]
    fn degenerate_triangle_draws_without_error() {
        let size = 32u32;
        let img = gradient_image(size);
        let src = pixmap_from_image(&img).unwrap();
        let mut canvas = CpuCompositor::new(size, size).blank_canvas().unwrap();
        // Collinear destination triangle: identity affine, clipped to a
        // zero-area region. Must be a no-op, not an error.
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(20.0, 20.0),
        ];
        draw_warp(&mut canvas, &src, &points, &points, &[[0, 1, 2]], 1.0).unwrap();
    }
}
