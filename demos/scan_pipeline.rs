//! End-to-end scan demo for depthmesh
//!
//! This demo walks one simulated capture session:
//! - Accumulating noisy depth frames until the cloud is acceptable
//! - Triangulating the cloud as a height field into scan records
//! - Chunked processing, decimation and validation
//! - A second, cached run over the same bytes
//!
//! Pass `--gpu` to run the chunk kernel on the first wgpu adapter.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use depthmesh_algorithms::PointCloudAccumulator;
use depthmesh_core::{encode_scan_records, Point3f, ScanVertex, Vector3f};
use depthmesh_gpu::{BufferConfig, ComputeBackend, CpuBackend, GpuContext, MemoryBudget, WgpuBackend};
use depthmesh_pipeline::{MeshProcessor, PerformanceBudget, ProcessorConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const GRID: usize = 60;
const EXTENT: f32 = 0.3;

/// Height of the simulated surface, a shallow dome
fn surface(x: f32, y: f32) -> f32 {
    let (dx, dy) = (x - EXTENT / 2.0, y - EXTENT / 2.0);
    0.05 - (dx * dx + dy * dy)
}

/// One depth frame: the dome sampled on a jittered grid, with a few
/// low-confidence outliers
fn capture_frame(rng: &mut StdRng) -> (Vec<Point3f>, Vec<f32>) {
    let step = EXTENT / GRID as f32;
    let mut points = Vec::new();
    let mut confidences = Vec::new();
    for j in 0..GRID {
        for i in 0..GRID {
            let x = (i as f32 + rng.gen_range(0.0..1.0)) * step;
            let y = (j as f32 + rng.gen_range(0.0..1.0)) * step;
            let z = surface(x, y) + rng.gen_range(-0.03..0.03);
            points.push(Point3f::new(x, y, z));
            confidences.push(if rng.gen_bool(0.1) { 0.2 } else { rng.gen_range(0.8..1.0) });
        }
    }
    (points, confidences)
}

/// Triangulate a regular grid over the cloud's footprint, lifting each
/// corner to the dome and borrowing the nearest sample's confidence
fn height_field_records(cloud_confidence: f32) -> Vec<ScanVertex> {
    let n = GRID;
    let step = EXTENT / n as f32;
    let corner = |i: usize, j: usize| {
        let (x, y) = (i as f32 * step, j as f32 * step);
        let (dx, dy) = (x - EXTENT / 2.0, y - EXTENT / 2.0);
        let normal = Vector3f::new(2.0 * dx, 2.0 * dy, 1.0).normalize();
        ScanVertex::new(Point3f::new(x, y, surface(x, y)), normal, cloud_confidence)
    };

    let mut records = Vec::with_capacity(n * n * 6);
    for j in 0..n {
        for i in 0..n {
            records.extend([corner(i, j), corner(i + 1, j), corner(i + 1, j + 1)]);
            records.extend([corner(i, j), corner(i + 1, j + 1), corner(i, j + 1)]);
        }
    }
    records
}

fn run<B: ComputeBackend>(backend: B, scan: &[u8]) -> anyhow::Result<()> {
    let config = ProcessorConfig::default()
        .with_buffer(BufferConfig::default().with_max_chunk_bytes(256 * 1024))
        .with_target_reduction(0.5);
    let processor = MeshProcessor::new(backend, Arc::new(MemoryBudget::new(512 * 1024 * 1024)), config)?
        .with_performance_monitor(Arc::new(PerformanceBudget::default()));

    let plan = processor.buffer_manager().plan(scan.len())?;
    println!(
        "Processing {} bytes in {} chunks on the {} back-end",
        scan.len(),
        plan.len(),
        processor.backend().name()
    );

    let start = Instant::now();
    let mesh = processor.process(scan)?;
    println!(
        "Mesh: {} vertices, {} triangles, {} quality ({:.1?})",
        mesh.vertex_count(),
        mesh.triangle_count(),
        mesh.quality(),
        start.elapsed()
    );
    println!("Peak chunk memory: {} bytes", processor.buffer_manager().peak_bytes());

    processor.cache().flush();
    let start = Instant::now();
    let again = processor.process(scan)?;
    println!(
        "Second run served from cache: {} ({:.1?})",
        Arc::ptr_eq(&mesh, &again),
        start.elapsed()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    println!("depthmesh Scan Pipeline Demo");
    println!("============================");

    let mut rng = StdRng::seed_from_u64(17);
    let mut accumulator = PointCloudAccumulator::new();
    let mut frames = 0;
    loop {
        let (points, confidences) = capture_frame(&mut rng);
        let acceptable = accumulator.accumulate(&points, &confidences)?;
        frames += 1;
        let stats = accumulator.stats();
        println!(
            "frame {:2}: {:6} points, density {:9.1}, coverage {:.2}",
            frames, stats.point_count, stats.density, stats.coverage
        );
        if acceptable {
            break;
        }
        if frames >= 20 {
            anyhow::bail!("cloud never became acceptable");
        }
    }
    let confidence = accumulator
        .cloud()
        .mean_confidence()
        .context("accepted cloud has no points")?;
    println!("Cloud accepted with {} points", accumulator.len());

    let scan = encode_scan_records(&height_field_records(confidence));

    if std::env::args().any(|arg| arg == "--gpu") {
        let context = pollster::block_on(GpuContext::new())?;
        run(WgpuBackend::new(Arc::new(context))?, &scan)
    } else {
        run(CpuBackend::new(), &scan)
    }
}
