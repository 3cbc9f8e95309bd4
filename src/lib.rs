pub mod compositor;
pub mod distort;
pub mod engine;
pub mod frame;
pub mod geometry;
pub mod landmarks;
pub mod mesh;
pub mod warp_cpu;
pub mod warp_gpu;

pub use compositor::{BackendKind, Compositor};
pub use engine::MorphEngine;
pub use frame::FrameRgba;
pub use geometry::{Affine, Point, Triangle};
pub use mesh::{triangulate, Mesh, NUM_CORNERS};
