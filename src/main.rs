use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use image::{ImageReader, RgbaImage};

use facemorph::compositor::BackendKind;
use facemorph::engine::MorphEngine;
use facemorph::frame::FrameRgba;
use facemorph::geometry::{Point, Triangle};
use facemorph::landmarks::load_landmarks;
use facemorph::mesh::{triangulate, NUM_CORNERS};

#[derive(Debug, Parser)]
#[command(name = "facemorph")]
#[command(version = full_version())]
#[command(about = "Piecewise-affine face morphing between two photographs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render one morph frame to a PNG.
    Render {
        #[command(flatten)]
        scene: SceneArgs,
        /// Blend parameter in [0, 1] (0 = full A, 1 = full B).
        #[arg(long, default_value_t = 0.5)]
        t: f32,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Render an evenly spaced frame sequence to a directory.
    Sequence {
        #[command(flatten)]
        scene: SceneArgs,
        #[arg(long, default_value_t = 30)]
        frames: u32,
        #[arg(short = 'o', long = "output-dir")]
        output_dir: PathBuf,
    },
    /// Triangulate a landmark file and print mesh statistics.
    Check {
        landmarks: PathBuf,
        /// Square working resolution the landmarks refer to.
        #[arg(long, default_value_t = 512)]
        size: u32,
    },
}

#[derive(Debug, Args)]
struct SceneArgs {
    #[arg(long)]
    image_a: PathBuf,
    #[arg(long)]
    image_b: PathBuf,
    #[arg(long)]
    landmarks_a: PathBuf,
    #[arg(long)]
    landmarks_b: PathBuf,
    /// Horse image; switches to the three-phase horse morph.
    #[arg(long)]
    horse: Option<PathBuf>,
    /// Rendering backend: auto, cpu, or gpu.
    #[arg(long, default_value = "auto")]
    backend: BackendKind,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { scene, t, output } => run_render(&scene, t, &output),
        Commands::Sequence {
            scene,
            frames,
            output_dir,
        } => run_sequence(&scene, frames, &output_dir),
        Commands::Check { landmarks, size } => run_check(&landmarks, size),
    }
}

struct MorphScene {
    img_a: RgbaImage,
    img_b: RgbaImage,
    horse: Option<RgbaImage>,
    points_a: Vec<Point>,
    points_b: Vec<Point>,
    triangles: Vec<Triangle>,
}

fn load_image(path: &Path) -> Result<RgbaImage> {
    Ok(ImageReader::open(path)
        .with_context(|| format!("failed opening {}", path.display()))?
        .decode()
        .with_context(|| format!("failed decoding {}", path.display()))?
        .to_rgba8())
}

fn load_scene(args: &SceneArgs) -> Result<MorphScene> {
    let img_a = load_image(&args.image_a)?;
    let img_b = load_image(&args.image_b)?;
    let (w, h) = img_a.dimensions();
    if w != h {
        bail!(
            "{}: working images must be square, got {w}x{h}",
            args.image_a.display()
        );
    }
    if img_b.dimensions() != (w, h) {
        bail!(
            "image sizes differ: {} is {w}x{h}, {} is {}x{}",
            args.image_a.display(),
            args.image_b.display(),
            img_b.width(),
            img_b.height()
        );
    }

    let face_a = load_landmarks(&args.landmarks_a, w)?;
    let face_b = load_landmarks(&args.landmarks_b, w)?;
    if face_a.len() != face_b.len() {
        bail!(
            "landmark sets must have equal length ({} has {}, {} has {})",
            args.landmarks_a.display(),
            face_a.len(),
            args.landmarks_b.display(),
            face_b.len()
        );
    }

    let mesh_a = triangulate(&face_a, w as f32, h as f32);
    let mesh_b = triangulate(&face_b, w as f32, h as f32);

    let horse = match &args.horse {
        Some(path) => {
            let img = load_image(path)?;
            if img.dimensions() != (w, h) {
                bail!(
                    "{}: horse image must match the working resolution {w}x{h}",
                    path.display()
                );
            }
            Some(img)
        }
        None => None,
    };

    // Horse mode reuses the source image's triangulation for all three
    // phases; the plain morph shares one topology computed from the midpoint
    // mesh so both images warp over identical triangles.
    let triangles = if horse.is_some() {
        mesh_a.triangles
    } else {
        let mid_face: Vec<Point> = face_a
            .iter()
            .zip(face_b.iter())
            .map(|(&p, &q)| Point::lerp(p, q, 0.5))
            .collect();
        triangulate(&mid_face, w as f32, h as f32).triangles
    };

    Ok(MorphScene {
        img_a,
        img_b,
        horse,
        points_a: mesh_a.points,
        points_b: mesh_b.points,
        triangles,
    })
}

fn render_scene(engine: &mut MorphEngine, scene: &MorphScene, t: f32) -> Result<FrameRgba> {
    match &scene.horse {
        Some(horse) => engine.render_horse(
            &scene.img_a,
            horse,
            &scene.img_b,
            &scene.points_a,
            &scene.points_b,
            &scene.triangles,
            t,
        ),
        None => engine.render_two_way(
            &scene.img_a,
            &scene.img_b,
            &scene.points_a,
            &scene.points_b,
            &scene.triangles,
            t,
        ),
    }
}

fn run_render(args: &SceneArgs, t: f32, output: &Path) -> Result<()> {
    let scene = load_scene(args)?;
    let mut engine = MorphEngine::with_backend(args.backend);
    let frame = render_scene(&mut engine, &scene, t)?;
    eprintln!(
        "rendered t={t:.3} on {} backend",
        if engine.is_gpu() { "gpu" } else { "cpu" }
    );
    frame
        .into_image()?
        .save(output)
        .with_context(|| format!("failed writing {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn run_sequence(args: &SceneArgs, frames: u32, output_dir: &Path) -> Result<()> {
    if frames == 0 {
        bail!("sequence needs at least one frame");
    }
    let scene = load_scene(args)?;
    let mut engine = MorphEngine::with_backend(args.backend);
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed creating {}", output_dir.display()))?;

    for index in 0..frames {
        let t = if frames == 1 {
            0.0
        } else {
            index as f32 / (frames - 1) as f32
        };
        let frame = render_scene(&mut engine, &scene, t)?;
        let path = output_dir.join(format!("frame_{index:04}.png"));
        frame
            .into_image()?
            .save(&path)
            .with_context(|| format!("failed writing {}", path.display()))?;
        if index % 10 == 0 {
            eprintln!("rendered frame {}/{frames}", index + 1);
        }
    }

    println!("Wrote {frames} frames to {}", output_dir.display());
    Ok(())
}

fn run_check(landmarks_path: &Path, size: u32) -> Result<()> {
    let face = load_landmarks(landmarks_path, size)?;
    let mesh = triangulate(&face, size as f32, size as f32);

    println!(
        "OK: {} ({} landmarks + {} corners, {} triangles, {size}x{size})",
        landmarks_path.display(),
        face.len(),
        NUM_CORNERS,
        mesh.triangles.len()
    );
    Ok(())
}

fn full_version() -> String {
    match option_env!("FACEMORPH_GIT_HASH") {
        Some(hash) => format!("{} ({hash})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}
