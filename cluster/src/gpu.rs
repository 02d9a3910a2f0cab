//! Batched nearest-centroid assignment on wgpu.
//!
//! The device is created once per run and dropped when the owning write
//! finishes. Point rows are submitted in bounded batches so label readback
//! never maps more than a few megabytes at a time.

use std::sync::Arc;

use futures::executor::block_on;
use wgpu::util::DeviceExt;
use wgpu::{Backends, Device, Instance, PowerPreference, Queue, RequestAdapterOptions};

use crate::kmeans::AssignBackend;
use crate::{Error, Result};

/// Point rows per submit.
const BATCH_ROWS: usize = 1 << 18;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    point_count: u32,
    centroid_count: u32,
    dims: u32,
    _pad: u32,
}

/// GPU assignment backend for [`crate::kmeans::cluster`].
pub struct GpuCluster {
    device: Arc<Device>,
    queue: Arc<Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl GpuCluster {
    /// Initialize an adapter, device, and the assignment pipeline.
    pub fn new() -> Result<Self> {
        block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: Backends::all(),
            flags: wgpu::InstanceFlags::default()
                .difference(wgpu::InstanceFlags::DEBUG | wgpu::InstanceFlags::VALIDATION),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::ResourceUnavailable(format!("no suitable GPU adapter: {e}")))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Cluster Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::default(),
            })
            .await
            .map_err(|e| Error::ResourceUnavailable(format!("failed to create device: {e}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Assign Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("assign.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Assign BGL"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Assign Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Assign Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        log::debug!("GPU cluster backend ready");
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            pipeline,
            bind_group_layout,
        })
    }

    /// Whether any adapter is present.
    pub fn is_available() -> bool {
        block_on(async {
            let instance = Instance::new(&wgpu::InstanceDescriptor {
                backends: Backends::all(),
                ..Default::default()
            });
            !instance.enumerate_adapters(Backends::all()).is_empty()
        })
    }

    fn assign_batch(
        &self,
        points: &[f32],
        dims: usize,
        centroids_buffer: &wgpu::Buffer,
        centroid_count: usize,
        labels: &mut [u32],
    ) -> Result<()> {
        let rows = points.len() / dims;
        let points_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Assign Points"),
                contents: bytemuck::cast_slice(points),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let labels_size = (rows * std::mem::size_of::<u32>()) as u64;
        let labels_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Assign Labels"),
            size: labels_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params = Params {
            point_count: rows as u32,
            centroid_count: centroid_count as u32,
            dims: dims as u32,
            _pad: 0,
        };
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Assign Params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Assign Staging"),
            size: labels_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Assign Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                bind_entry(0, &points_buffer),
                bind_entry(1, centroids_buffer),
                bind_entry(2, &labels_buffer),
                bind_entry(3, &params_buffer),
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Assign Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Assign Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(rows.div_ceil(256) as u32, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&labels_buffer, 0, &staging, 0, labels_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = futures::channel::oneshot::channel();
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |res| {
            tx.send(res).ok();
        });
        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        block_on(rx)
            .map_err(|_| Error::DeviceError("label readback channel closed".into()))?
            .map_err(|e| Error::DeviceError(format!("label buffer mapping failed: {e}")))?;

        {
            let data = slice.get_mapped_range();
            labels.copy_from_slice(bytemuck::cast_slice(&data));
        }
        staging.unmap();
        Ok(())
    }
}

impl AssignBackend for GpuCluster {
    fn assign(
        &mut self,
        points: &[f32],
        dims: usize,
        centroids: &[f32],
        labels: &mut [u32],
    ) -> Result<()> {
        if dims == 0 || points.len() % dims != 0 || centroids.len() % dims != 0 {
            return Err(Error::InvalidInput("mismatched table shapes".into()));
        }
        let centroid_count = centroids.len() / dims;
        let centroids_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Assign Centroids"),
                contents: bytemuck::cast_slice(centroids),
                usage: wgpu::BufferUsages::STORAGE,
            });

        for (chunk, label_chunk) in points
            .chunks(BATCH_ROWS * dims)
            .zip(labels.chunks_mut(BATCH_ROWS))
        {
            self.assign_batch(chunk, dims, &centroids_buffer, centroid_count, label_chunk)?;
        }
        Ok(())
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bind_entry<'a>(binding: u32, buffer: &'a wgpu::Buffer) -> wgpu::BindGroupEntry<'a> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}
