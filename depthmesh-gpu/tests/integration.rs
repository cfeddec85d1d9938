//! Integration tests for depthmesh-gpu.
//!
//! Tests marked with `#[ignore]` require a GPU and should be run with:
//! ```bash
//! cargo test -p depthmesh-gpu -- --ignored
//! ```

use std::sync::Arc;

use approx::assert_relative_eq;
use depthmesh_core::{decode_scan_records, encode_scan_records, ScanVertex, SCAN_TRIANGLE_STRIDE};
use depthmesh_gpu::{
    BufferConfig, BufferManager, ChunkOutput, ComputeBackend, CpuBackend, GpuContext, MemoryBudget, WgpuBackend,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random triangle soup with a mix of good, zero and non-finite normals
fn random_records(triangles: usize, seed: u64) -> Vec<ScanVertex> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..triangles * 3)
        .map(|i| {
            let normal = match i % 5 {
                0 => [0.0, 0.0, 0.0],
                1 => [f32::NAN, 1.0, 0.0],
                _ => [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(0.1..1.0)],
            };
            ScanVertex {
                position: [rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5), rng.gen_range(0.0..1.0)],
                normal,
                confidence: rng.gen_range(-0.2..1.2),
            }
        })
        .collect()
}

/// Run every chunk of `bytes` through `backend` and concatenate the output
fn run_chunked<B: ComputeBackend>(backend: &B, bytes: &[u8], max_chunk_bytes: u64) -> ChunkOutput {
    let manager = BufferManager::new(
        BufferConfig::default().with_max_chunk_bytes(max_chunk_bytes),
        Arc::new(MemoryBudget::unlimited()),
    );
    let records = decode_scan_records(bytes).unwrap();
    let plan = manager.plan(bytes.len()).unwrap();

    let mut merged = ChunkOutput::default();
    for chunk in plan.iter() {
        let start = chunk.vertex_offset as usize;
        let mut scope = manager.allocate(backend, chunk).unwrap();
        let out = scope.dispatch(&records[start..start + chunk.vertex_count]).unwrap();
        merged.indices.extend(out.indices.iter().map(|i| i + chunk.vertex_offset));
        merged.positions.extend(out.positions);
        merged.normals.extend(out.normals);
        merged.confidences.extend(out.confidences);
    }
    assert_eq!(manager.in_use_bytes(), 0);
    merged
}

// ============================================================================
// Non-GPU tests (always run)
// ============================================================================

#[test]
fn test_chunked_cpu_matches_single_pass() {
    let records = random_records(200, 7);
    let bytes = encode_scan_records(&records);

    let whole = run_chunked(&CpuBackend::new(), &bytes, bytes.len() as u64);
    let chunked = run_chunked(&CpuBackend::new(), &bytes, (SCAN_TRIANGLE_STRIDE * 17) as u64);

    assert_eq!(whole, chunked);
    assert_eq!(chunked.indices, (0..600).collect::<Vec<u32>>());
}

#[test]
fn test_cpu_output_is_well_formed() {
    let records = random_records(64, 11);
    let out = run_chunked(&CpuBackend::new(), &encode_scan_records(&records), 1024);

    assert_eq!(out.vertex_count(), records.len());
    for (i, record) in records.iter().enumerate() {
        assert_eq!(out.positions[i], record.position());
        assert_relative_eq!(out.normals[i].norm(), 1.0, epsilon = 1e-5);
        assert!((0.0..=1.0).contains(&out.confidences[i]));
    }
}

#[test]
fn test_memory_shortfall_stops_allocation() {
    let records = random_records(10, 3);
    let bytes = encode_scan_records(&records);
    let manager = BufferManager::new(BufferConfig::default(), Arc::new(MemoryBudget::new(bytes.len() as u64)));
    let plan = manager.plan(bytes.len()).unwrap();
    let backend = CpuBackend::new();

    assert!(manager.allocate(&backend, &plan.chunks()[0]).is_err());
    assert_eq!(manager.in_use_bytes(), 0);
    assert_eq!(manager.peak_bytes(), 0);
}

// ============================================================================
// GPU tests (require hardware)
// ============================================================================

fn wgpu_backend() -> WgpuBackend {
    let context = pollster::block_on(GpuContext::new()).expect("GPU should be available");
    WgpuBackend::new(Arc::new(context)).expect("chunk kernel should compile")
}

#[test]
#[ignore = "requires GPU"]
fn test_wgpu_backend_initializes() {
    let backend = wgpu_backend();
    assert_eq!(backend.name(), "wgpu");
    assert_eq!(backend.queue_count(), 1);
}

#[test]
#[ignore = "requires GPU"]
fn test_wgpu_matches_cpu() {
    let records = random_records(500, 42);
    let bytes = encode_scan_records(&records);
    let max_chunk = (SCAN_TRIANGLE_STRIDE * 128) as u64;

    let cpu = run_chunked(&CpuBackend::new(), &bytes, max_chunk);
    let gpu = run_chunked(&wgpu_backend(), &bytes, max_chunk);

    assert_eq!(gpu.indices, cpu.indices);
    assert_eq!(gpu.positions, cpu.positions);
    for (g, c) in gpu.normals.iter().zip(&cpu.normals) {
        assert_relative_eq!(*g, *c, epsilon = 1e-4);
    }
    for (g, c) in gpu.confidences.iter().zip(&cpu.confidences) {
        assert_relative_eq!(*g, *c, epsilon = 1e-6);
    }
}
