//! wgpu implementation of the chunk kernel

use std::sync::Arc;

use depthmesh_core::{Error, Point3f, Result, ScanVertex, Vector3f};
use tracing::debug;

use crate::backend::{ChunkOutput, ComputeBackend};
use crate::buffers::Chunk;
use crate::device::GpuContext;

const WORKGROUP_SIZE: u32 = 64;

/// One invocation per triangle. Records are read as a flat `f32` array,
/// seven floats per vertex.
const CHUNK_KERNEL_SHADER: &str = r#"
struct Params {
    triangle_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<storage, read> records: array<f32>;
@group(0) @binding(1) var<storage, read_write> positions: array<f32>;
@group(0) @binding(2) var<storage, read_write> normals: array<f32>;
@group(0) @binding(3) var<storage, read_write> confidences: array<f32>;
@group(0) @binding(4) var<storage, read_write> indices: array<u32>;
@group(0) @binding(5) var<uniform> params: Params;

const EPSILON: f32 = 1.1920929e-7;
const F32_MAX: f32 = 3.4028235e38;

fn position_of(v: u32) -> vec3<f32> {
    let b = v * 7u;
    return vec3<f32>(records[b], records[b + 1u], records[b + 2u]);
}

fn normal_of(v: u32) -> vec3<f32> {
    let b = v * 7u + 3u;
    return vec3<f32>(records[b], records[b + 1u], records[b + 2u]);
}

fn is_finite3(v: vec3<f32>) -> bool {
    return all(v == v) && all(abs(v) <= vec3<f32>(F32_MAX));
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let t = global_id.x;
    if (t >= params.triangle_count) {
        return;
    }

    let base = t * 3u;
    let p0 = position_of(base);
    let c = cross(position_of(base + 1u) - p0, position_of(base + 2u) - p0);
    var face = vec3<f32>(0.0, 0.0, 1.0);
    if (is_finite3(c) && length(c) > EPSILON) {
        face = normalize(c);
    }

    for (var k = 0u; k < 3u; k++) {
        let v = base + k;
        let p = position_of(v);
        var n = normal_of(v);
        if (is_finite3(n) && length(n) > EPSILON) {
            n = normalize(n);
        } else {
            n = face;
        }

        positions[v * 3u] = p.x;
        positions[v * 3u + 1u] = p.y;
        positions[v * 3u + 2u] = p.z;
        normals[v * 3u] = n.x;
        normals[v * 3u + 1u] = n.y;
        normals[v * 3u + 2u] = n.z;

        var conf = records[v * 7u + 6u];
        if (conf != conf) {
            conf = 0.0;
        }
        confidences[v] = clamp(conf, 0.0, 1.0);
        indices[v] = v;
    }
}
"#;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    triangle_count: u32,
    _pad: [u32; 3],
}

/// Device buffers for one chunk
pub struct WgpuBuffers {
    input: wgpu::Buffer,
    positions: wgpu::Buffer,
    normals: wgpu::Buffer,
    confidences: wgpu::Buffer,
    indices: wgpu::Buffer,
    params: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    vertex_count: usize,
}

impl WgpuBuffers {
    fn destroy(self) {
        self.input.destroy();
        self.positions.destroy();
        self.normals.destroy();
        self.confidences.destroy();
        self.indices.destroy();
        self.params.destroy();
        self.staging.destroy();
    }
}

/// Chunk kernel on a wgpu compute pipeline
pub struct WgpuBackend {
    context: Arc<GpuContext>,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl WgpuBackend {
    /// Compile the chunk kernel on `context`
    pub fn new(context: Arc<GpuContext>) -> Result<Self> {
        use wgpu::BufferBindingType::{Storage, Uniform};

        let ((layout, pipeline), error) = context.with_error_scope(|| {
            let layout = context.buffer_layout(
                "Chunk Kernel",
                &[
                    Storage { read_only: true },
                    Storage { read_only: false },
                    Storage { read_only: false },
                    Storage { read_only: false },
                    Storage { read_only: false },
                    Uniform,
                ],
            );
            let pipeline = context.compile_kernel("Chunk Kernel", CHUNK_KERNEL_SHADER, "main", &layout);
            (layout, pipeline)
        });
        if let Some(e) = error {
            return Err(Error::CommandEncodingFailed(format!("chunk kernel pipeline: {}", e)));
        }

        Ok(Self {
            context,
            layout,
            pipeline,
        })
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }
}

/// Split the staging readback into kernel outputs
fn decode_output(bytes: &[u8], vertex_count: usize) -> ChunkOutput {
    let v = vertex_count;
    let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[..28 * v]);
    let indices: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes[28 * v..32 * v]);

    ChunkOutput {
        positions: floats[..3 * v]
            .chunks_exact(3)
            .map(|c| Point3f::new(c[0], c[1], c[2]))
            .collect(),
        normals: floats[3 * v..6 * v]
            .chunks_exact(3)
            .map(|c| Vector3f::new(c[0], c[1], c[2]))
            .collect(),
        confidences: floats[6 * v..7 * v].to_vec(),
        indices,
    }
}

impl ComputeBackend for WgpuBackend {
    type Buffers = WgpuBuffers;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn queue_count(&self) -> usize {
        1
    }

    fn create_buffers(&self, chunk: &Chunk) -> Result<WgpuBuffers> {
        let ctx = &self.context;
        let v = chunk.vertex_count as u64;
        let input_bytes = chunk.byte_len as u64;

        let binding_limit = u64::from(ctx.limits.max_storage_buffer_binding_size);
        if input_bytes > binding_limit {
            return Err(Error::BufferCreationFailed(format!(
                "chunk of {} bytes exceeds the {} byte storage binding limit",
                input_bytes, binding_limit
            )));
        }

        let storage_out = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let (buffers, error) = ctx.with_error_scope(|| {
            let input = ctx.raw_buffer(
                "Scan Records",
                input_bytes,
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            );
            let positions = ctx.raw_buffer("Positions", 12 * v, storage_out);
            let normals = ctx.raw_buffer("Normals", 12 * v, storage_out);
            let confidences = ctx.raw_buffer("Confidences", 4 * v, storage_out);
            let indices = ctx.raw_buffer("Indices", 4 * v, storage_out);
            let params = ctx.uniform_buffer(
                "Kernel Params",
                &KernelParams {
                    triangle_count: chunk.triangle_count() as u32,
                    _pad: [0; 3],
                },
            );
            let staging = ctx.raw_buffer(
                "Staging Buffer",
                32 * v,
                wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            );
            let bind_group = ctx.bind_buffers(
                "Chunk Kernel",
                &self.layout,
                &[&input, &positions, &normals, &confidences, &indices, &params],
            );
            WgpuBuffers {
                input,
                positions,
                normals,
                confidences,
                indices,
                params,
                staging,
                bind_group,
                vertex_count: chunk.vertex_count,
            }
        });

        if let Some(e) = error {
            buffers.destroy();
            return Err(Error::BufferCreationFailed(e.to_string()));
        }
        debug!(chunk = chunk.index, vertices = chunk.vertex_count, "created GPU buffers");
        Ok(buffers)
    }

    fn dispatch(&self, buffers: &mut WgpuBuffers, records: &[ScanVertex]) -> Result<ChunkOutput> {
        let ctx = &self.context;
        let v = buffers.vertex_count as u64;
        let triangles = (buffers.vertex_count / 3) as u32;
        let workgroups = triangles.div_ceil(WORKGROUP_SIZE);
        if workgroups > ctx.limits.max_compute_workgroups_per_dimension {
            return Err(Error::CommandEncodingFailed(format!(
                "{} workgroups exceed the device limit of {}",
                workgroups, ctx.limits.max_compute_workgroups_per_dimension
            )));
        }
        if records.len() != buffers.vertex_count {
            return Err(Error::InvalidInputData(format!(
                "chunk buffers hold {} records, got {}",
                buffers.vertex_count,
                records.len()
            )));
        }

        let ((), error) = ctx.with_error_scope(|| {
            ctx.queue.write_buffer(&buffers.input, 0, bytemuck::cast_slice(records));

            let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Chunk Kernel"),
            });
            {
                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Chunk Kernel Pass"),
                    timestamp_writes: None,
                });
                compute_pass.set_pipeline(&self.pipeline);
                compute_pass.set_bind_group(0, &buffers.bind_group, &[]);
                compute_pass.dispatch_workgroups(workgroups, 1, 1);
            }

            encoder.copy_buffer_to_buffer(&buffers.positions, 0, &buffers.staging, 0, 12 * v);
            encoder.copy_buffer_to_buffer(&buffers.normals, 0, &buffers.staging, 12 * v, 12 * v);
            encoder.copy_buffer_to_buffer(&buffers.confidences, 0, &buffers.staging, 24 * v, 4 * v);
            encoder.copy_buffer_to_buffer(&buffers.indices, 0, &buffers.staging, 28 * v, 4 * v);

            ctx.queue.submit(std::iter::once(encoder.finish()));
        });
        if let Some(e) = error {
            return Err(Error::CommandEncodingFailed(e.to_string()));
        }

        // Map and read results
        let buffer_slice = buffers.staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = sender.send(v);
        });

        let _ = ctx.device.poll(wgpu::Maintain::wait());

        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::Gpu("Failed to read GPU results".to_string())),
        }

        let output = {
            let data = buffer_slice.get_mapped_range();
            decode_output(&data, buffers.vertex_count)
        };
        buffers.staging.unmap();

        Ok(output)
    }

    fn release(&self, buffers: WgpuBuffers) {
        buffers.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_output_layout() {
        let v = 3usize;
        let mut floats: Vec<f32> = Vec::new();
        floats.extend((0..9).map(|i| i as f32));
        floats.extend([0.0, 0.0, 1.0].repeat(3));
        floats.extend([0.1, 0.2, 0.3]);
        let mut bytes: Vec<u8> = bytemuck::cast_slice(&floats).to_vec();
        bytes.extend_from_slice(bytemuck::cast_slice(&[0u32, 1, 2]));

        let out = decode_output(&bytes, v);
        assert_eq!(out.positions[2], Point3f::new(6.0, 7.0, 8.0));
        assert_eq!(out.normals[1], Vector3f::z());
        assert_eq!(out.confidences, vec![0.1, 0.2, 0.3]);
        assert_eq!(out.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<KernelParams>(), 16);
    }
}
