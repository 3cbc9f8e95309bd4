//! Compositing backends behind one capability interface.
//!
//! Two implementations exist: a GPU path (single dual-UV draw call, preferred
//! when a device is available) and a CPU path (per-triangle clip masks, the
//! fallback). Both must be visually equivalent within rasterization and
//! precision tolerance.

use std::str::FromStr;

use anyhow::{bail, Error};
use image::RgbaImage;

use crate::frame::FrameRgba;
use crate::geometry::{Point, Triangle};

/// Backend selection for the morph engine. `Auto` probes for a GPU once per
/// surface size and silently falls back to the CPU path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    Cpu,
    Gpu,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            other => bail!("unknown backend '{other}' (expected auto, cpu, or gpu)"),
        }
    }
}

/// A rendering backend that composites morph frames.
///
/// Callers guarantee that all images share the square working resolution and
/// that point sets required to share topology have equal length and ordering;
/// the compositors do not validate this at the boundary.
pub trait Compositor {
    /// Blend `img_a` toward `img_b` at parameter `t` in [0, 1], warping both
    /// onto the per-point interpolation of their meshes.
    #[allow(clippy::too_many_arguments)]
    fn render_two_way(
        &mut self,
        img_a: &RgbaImage,
        img_b: &RgbaImage,
        points_a: &[Point],
        points_b: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> anyhow::Result<FrameRgba>;

    /// Three-phase horse morph: source warps into the horse image over
    /// t in [0, 0.5], then the target warps back out of it over (0.5, 1].
    #[allow(clippy::too_many_arguments)]
    fn render_horse(
        &mut self,
        img_source: &RgbaImage,
        img_horse: &RgbaImage,
        img_target: &RgbaImage,
        points_source: &[Point],
        points_target: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> anyhow::Result<FrameRgba>;
}

/// Destination mesh for a two-way morph: the per-point lerp at `t`.
pub fn lerp_points(a: &[Point], b: &[Point], t: f32) -> Vec<Point> {
    debug_assert_eq!(
        a.len(),
        b.len(),
        "morphed point sets must share length and ordering"
    );
    a.iter()
        .zip(b.iter())
        .map(|(&p, &q)| Point::lerp(p, q, t))
        .collect()
}

/// Horse-mode phase for a blend parameter. Both variants evaluate to "pure
/// horse, zero warp-layer contribution" at t = 0.5, keeping the transition
/// continuous across the phase boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum HorsePhase {
    /// t in [0, 0.5]: horse image underneath at full alpha, the source image
    /// warped toward `distort(amount)` on top at `layer_alpha`.
    TowardHorse { amount: f32, layer_alpha: f32 },
    /// t in (0.5, 1]: target image warped toward `distort(amount)` at full
    /// alpha, the horse image on top at `layer_alpha`.
    FromHorse { amount: f32, layer_alpha: f32 },
}

pub(crate) fn horse_phase(t: f32) -> HorsePhase {
    if t <= 0.5 {
        let u = t / 0.5;
        HorsePhase::TowardHorse {
            amount: u,
            layer_alpha: 1.0 - u,
        }
    } else {
        let v = (t - 0.5) / 0.5;
        HorsePhase::FromHorse {
            amount: 1.0 - v,
            layer_alpha: 1.0 - v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses() {
        assert_eq!(BackendKind::from_str("auto").unwrap(), BackendKind::Auto);
        assert_eq!(BackendKind::from_str("cpu").unwrap(), BackendKind::Cpu);
        assert_eq!(BackendKind::from_str("gpu").unwrap(), BackendKind::Gpu);
        assert!(BackendKind::from_str("vulkan").is_err());
    }

    #[test]
    fn lerp_points_hits_endpoints_and_midpoint() {
        let a = vec![Point::new(0.0, 0.0), Point::new(10.0, 4.0)];
        let b = vec![Point::new(4.0, 8.0), Point::new(20.0, 0.0)];
        assert_eq!(lerp_points(&a, &b, 0.0), a);
        assert_eq!(lerp_points(&a, &b, 1.0), b);
        let mid = lerp_points(&a, &b, 0.5);
        assert_eq!(mid[0], Point::new(2.0, 4.0));
        assert_eq!(mid[1], Point::new(15.0, 2.0));
    }

    #[test]
    fn horse_phases_meet_at_the_boundary() {
        let left = horse_phase(0.5);
        assert_eq!(
            left,
            HorsePhase::TowardHorse {
                amount: 1.0,
                layer_alpha: 0.0
            }
        );
        let HorsePhase::FromHorse {
            amount,
            layer_alpha,
        } = horse_phase(0.5 + 1e-6)
        else {
            panic!("expected FromHorse just past the boundary");
        };
        // Just past 0.5 the target is still fully distorted and the horse
        // still fully covers it.
        assert!((amount - 1.0).abs() < 1e-4);
        assert!((layer_alpha - 1.0).abs() < 1e-4);
    }

    #[test]
    fn horse_phase_endpoints() {
        assert_eq!(
            horse_phase(0.0),
            HorsePhase::TowardHorse {
                amount: 0.0,
                layer_alpha: 1.0
            }
        );
        assert_eq!(
            horse_phase(1.0),
            HorsePhase::FromHorse {
                amount: 0.0,
                layer_alpha: 0.0
            }
        );
    }
}
