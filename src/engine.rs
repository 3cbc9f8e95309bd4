//! Morph orchestrator: owns the per-size render context and backend choice.
//!
//! The engine is single-threaded and synchronous: each render call runs to
//! completion and returns one composited frame. The only state it keeps is a
//! render context keyed by (width, height) — a pure optimization, rebuilt
//! from scratch whenever the requested frame size changes. Backend probing
//! happens once per context build: `Auto` prefers the GPU and silently falls
//! back to the CPU path when no adapter exists.

use anyhow::{anyhow, Result};
use image::RgbaImage;

use crate::compositor::{BackendKind, Compositor};
use crate::frame::FrameRgba;
use crate::geometry::{Point, Triangle};
use crate::warp_cpu::CpuCompositor;
use crate::warp_gpu::GpuCompositor;

struct RenderContext {
    width: u32,
    height: u32,
    gpu: bool,
    compositor: Box<dyn Compositor>,
}

pub struct MorphEngine {
    requested: BackendKind,
    context: Option<RenderContext>,
}

impl Default for MorphEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MorphEngine {
    pub fn new() -> Self {
        Self::with_backend(BackendKind::Auto)
    }

    pub fn with_backend(requested: BackendKind) -> Self {
        Self {
            requested,
            context: None,
        }
    }

    /// Whether the current context renders on the GPU. `false` until the
    /// first render call builds a context.
    pub fn is_gpu(&self) -> bool {
        self.context.as_ref().is_some_and(|ctx| ctx.gpu)
    }

    fn context_for(&mut self, width: u32, height: u32) -> Result<&mut RenderContext> {
        let stale = match &self.context {
            Some(ctx) => ctx.width != width || ctx.height != height,
            None => true,
        };
        if stale {
            let ctx = build_context(self.requested, width, height)?;
            return Ok(self.context.insert(ctx));
        }
        self.context
            .as_mut()
            .ok_or_else(|| anyhow!("render context unavailable"))
    }

    /// Blend `img_a` toward `img_b` at `t` (0 = full A, 1 = full B) using the
    /// shared midpoint-mesh topology in `triangles`.
    #[allow(clippy::too_many_arguments)]
    pub fn render_two_way(
        &mut self,
        img_a: &RgbaImage,
        img_b: &RgbaImage,
        points_a: &[Point],
        points_b: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> Result<FrameRgba> {
        let (width, height) = img_a.dimensions();
        debug_assert_eq!(img_b.dimensions(), (width, height));
        debug_assert_eq!(points_a.len(), points_b.len());
        let t = t.clamp(0.0, 1.0);
        let ctx = self.context_for(width, height)?;
        ctx.compositor
            .render_two_way(img_a, img_b, points_a, points_b, triangles, t)
    }

    /// Horse morph: source → horse over t in [0, 0.5], horse → target over
    /// (0.5, 1]. All three phases share the source image's triangulation.
    #[allow(clippy::too_many_arguments)]
    pub fn render_horse(
        &mut self,
        img_source: &RgbaImage,
        img_horse: &RgbaImage,
        img_target: &RgbaImage,
        points_source: &[Point],
        points_target: &[Point],
        triangles: &[Triangle],
        t: f32,
    ) -> Result<FrameRgba> {
        let (width, height) = img_source.dimensions();
        debug_assert_eq!(img_horse.dimensions(), (width, height));
        debug_assert_eq!(img_target.dimensions(), (width, height));
        debug_assert_eq!(points_source.len(), points_target.len());
        let t = t.clamp(0.0, 1.0);
        let ctx = self.context_for(width, height)?;
        ctx.compositor.render_horse(
            img_source,
            img_horse,
            img_target,
            points_source,
            points_target,
            triangles,
            t,
        )
    }
}

fn build_context(requested: BackendKind, width: u32, height: u32) -> Result<RenderContext> {
    match requested {
        BackendKind::Cpu => Ok(cpu_context(width, height)),
        BackendKind::Gpu => {
            let compositor = pollster::block_on(GpuCompositor::new(width, height))?;
            Ok(RenderContext {
                width,
                height,
                gpu: true,
                compositor: Box::new(compositor),
            })
        }
        BackendKind::Auto => match pollster::block_on(GpuCompositor::new(width, height)) {
            Ok(compositor) => Ok(RenderContext {
                width,
                height,
                gpu: true,
                compositor: Box::new(compositor),
            }),
            // Missing GPU capability is not an error; the CPU path must
            // produce visually equivalent output.
            Err(_) => Ok(cpu_context(width, height)),
        },
    }
}

fn cpu_context(width: u32, height: u32) -> RenderContext {
    RenderContext {
        width,
        height,
        gpu: false,
        compositor: Box::new(CpuCompositor::new(width, height)),
    }
}
