use facemorph::{triangulate, BackendKind, MorphEngine, Point};
use image::{Rgba, RgbaImage};

const SIZE: u32 = 64;

fn gpu_engine() -> Option<MorphEngine> {
    // Probe once with a throwaway render so environments without an adapter
    // skip instead of fail.
    let mut engine = MorphEngine::with_backend(BackendKind::Gpu);
    let img = RgbaImage::from_pixel(SIZE, SIZE, Rgba([0, 0, 0, 255]));
    let mesh = triangulate(&[Point::new(32.0, 32.0)], SIZE as f32, SIZE as f32);
    match engine.render_two_way(&img, &img, &mesh.points, &mesh.points, &mesh.triangles, 0.0) {
        Ok(_) => Some(engine),
        Err(e) => {
            let err_str = e.to_string();
            if err_str.contains("no suitable GPU adapter found") {
                eprintln!("Skipping test: no GPU adapter found");
                return None;
            }
            panic!("GPU compositor failed to initialize: {e:?}");
        }
    }
}

fn gradient_image(size: u32, phase: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        Rgba([
            ((x + phase) * 255 / (size + phase).max(1)) as u8,
            ((y + phase) * 255 / (size + phase).max(1)) as u8,
            ((x + y) * 255 / (2 * size).max(1)) as u8,
            255,
        ])
    })
}

fn scene() -> (Vec<Point>, Vec<Point>, Vec<facemorph::Triangle>) {
    let w = SIZE as f32;
    let face_a = vec![
        Point::new(20.0, 18.0),
        Point::new(44.0, 20.0),
        Point::new(32.0, 34.0),
        Point::new(30.0, 48.0),
    ];
    let face_b: Vec<Point> = face_a
        .iter()
        .map(|p| Point::new(p.x + 3.0, p.y - 2.0))
        .collect();
    let mesh_a = triangulate(&face_a, w, w);
    let mesh_b = triangulate(&face_b, w, w);
    let mid: Vec<Point> = face_a
        .iter()
        .zip(face_b.iter())
        .map(|(&p, &q)| Point::lerp(p, q, 0.5))
        .collect();
    let triangles = triangulate(&mid, w, w).triangles;
    (mesh_a.points, mesh_b.points, triangles)
}

#[test]
fn gpu_morph_renders_opaque_frames() {
    let Some(mut engine) = gpu_engine() else {
        return;
    };
    assert!(engine.is_gpu());

    let img_a = gradient_image(SIZE, 0);
    let img_b = gradient_image(SIZE, 60);
    let (points_a, points_b, triangles) = scene();

    for t in [0.0, 0.5, 1.0] {
        let frame = engine
            .render_two_way(&img_a, &img_b, &points_a, &points_b, &triangles, t)
            .expect("GPU render should succeed");
        assert_eq!((frame.width, frame.height), (SIZE, SIZE));
        assert_eq!(frame.data.len(), (SIZE * SIZE * 4) as usize);
        assert!(
            frame.data.chunks_exact(4).all(|px| px[3] == 255),
            "transparent pixel in GPU output at t={t}"
        );
    }
}

#[test]
fn gpu_and_cpu_backends_agree_visually() {
    let Some(mut gpu) = gpu_engine() else {
        return;
    };
    let mut cpu = MorphEngine::with_backend(BackendKind::Cpu);

    let img_a = gradient_image(SIZE, 0);
    let img_b = gradient_image(SIZE, 60);
    let (points_a, points_b, triangles) = scene();

    for t in [0.0, 0.5, 1.0] {
        let gpu_frame = gpu
            .render_two_way(&img_a, &img_b, &points_a, &points_b, &triangles, t)
            .expect("GPU render should succeed");
        let cpu_frame = cpu
            .render_two_way(&img_a, &img_b, &points_a, &points_b, &triangles, t)
            .expect("CPU render should succeed");

        let total: u64 = gpu_frame
            .data
            .iter()
            .zip(cpu_frame.data.iter())
            .map(|(&a, &b)| u64::from(a.abs_diff(b)))
            .sum();
        let mean = total as f64 / gpu_frame.data.len() as f64;
        // The backends rasterize triangle edges differently; equivalence is
        // visual, not bitwise.
        assert!(
            mean < 8.0,
            "GPU and CPU frames diverged by mean {mean} at t={t}"
        );
    }
}

#[test]
fn gpu_horse_morph_renders_all_phases() {
    let Some(mut engine) = gpu_engine() else {
        return;
    };

    let img_a = gradient_image(SIZE, 0);
    let img_b = gradient_image(SIZE, 60);
    let horse = gradient_image(SIZE, 120);
    let (points_a, points_b, _) = scene();
    // Horse mode reuses the source topology.
    let face_a = vec![
        Point::new(20.0, 18.0),
        Point::new(44.0, 20.0),
        Point::new(32.0, 34.0),
        Point::new(30.0, 48.0),
    ];
    let triangles = triangulate(&face_a, SIZE as f32, SIZE as f32).triangles;

    for t in [0.0, 0.25, 0.5, 0.75, 1.0] {
        let frame = engine
            .render_horse(&img_a, &horse, &img_b, &points_a, &points_b, &triangles, t)
            .expect("GPU horse render should succeed");
        assert_eq!((frame.width, frame.height), (SIZE, SIZE));
        assert!(
            frame.data.chunks_exact(4).all(|px| px[3] == 255),
            "transparent pixel in GPU horse output at t={t}"
        );
    }
}
