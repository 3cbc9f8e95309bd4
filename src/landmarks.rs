//! Landmark ingestion for the CLI.
//!
//! Face detection is an external collaborator; this module only consumes its
//! serialized output: an ordered sequence of keypoints for exactly one face.
//! Ordering is load-bearing — the same index must denote the same anatomical
//! point across every landmark set of a morph pair.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::geometry::Point;

/// On-disk landmark format: `{"points": [[x, y], ...], "normalized": true}`.
/// Normalized coordinates (the usual detector output) are scaled by the
/// working resolution on load; otherwise values are taken as pixels.
#[derive(Debug, Deserialize)]
pub struct LandmarkFile {
    pub points: Vec<[f32; 2]>,
    #[serde(default)]
    pub normalized: bool,
}

pub fn load_landmarks(path: &Path, size: u32) -> Result<Vec<Point>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading landmark file {}", path.display()))?;
    let file: LandmarkFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing landmark file {}", path.display()))?;
    if file.points.is_empty() {
        bail!("{}: landmark file contains no points", path.display());
    }
    let scale = if file.normalized { size as f32 } else { 1.0 };
    Ok(file
        .points
        .iter()
        .map(|&[x, y]| Point::new(x * scale, y * scale))
        .collect())
}
