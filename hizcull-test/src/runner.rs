use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::UVec2;
use hizcull::{
    managers::{CameraManager, ClusterBuffer, GpuClusterBuffers, HiZOcclusionData},
    types::{Cluster, IndirectDispatchArgs, IndirectDrawArgs},
    util::cluster_mesh::box_vertex_cache,
    CullDevice, CullPipeline, CullingOptions, InstanceAdapterDevice, ModeData, RendererMode,
};
use hizcull_routine::{
    culling::{
        cpu::CpuCullExecutor,
        gpu::{GpuCullExecutor, GpuDrawTargets},
        CullFrame,
    },
    shaders,
};
use wgpu::{BufferDescriptor, BufferUsages, CommandEncoderDescriptor, Maintain, MapMode};

const ARGS_SIZE: u64 = 20;

/// Everything a frame left in the context's buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReadback {
    pub draw_args: IndirectDrawArgs,
    pub dispatch_args: IndirectDispatchArgs,
    pub recheck_args: IndirectDispatchArgs,
    /// Visibility list, sorted.
    pub visible: Vec<u32>,
    pub recheck_flags: Vec<u32>,
}

impl FrameReadback {
    fn from_words(words: &[u32], capacity: usize) -> Self {
        let args = |offset: usize| {
            let mut arg = [0; 5];
            arg.copy_from_slice(&words[offset..offset + 5]);
            arg
        };
        let draw_args: IndirectDrawArgs = bytemuck::cast(args(0));
        let list = 15;
        let count = (draw_args.instance_count as usize).min(capacity);
        let mut visible = words[list..list + count].to_vec();
        visible.sort_unstable();
        let flags = list + capacity.max(1);

        Self {
            draw_args,
            dispatch_args: bytemuck::cast(args(5)),
            recheck_args: bytemuck::cast(args(10)),
            visible,
            recheck_flags: words[flags..flags + capacity].to_vec(),
        }
    }
}

#[derive(Clone)]
pub struct TestRunnerBuilder {
    mode: RendererMode,
    capacity: u32,
    resolution: UVec2,
    options: CullingOptions,
    iad: Option<Arc<InstanceAdapterDevice>>,
}

impl Default for TestRunnerBuilder {
    fn default() -> Self {
        Self {
            mode: RendererMode::CpuPowered,
            capacity: 64,
            resolution: UVec2::splat(64),
            options: CullingOptions::default(),
            iad: None,
        }
    }
}

impl TestRunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: RendererMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn resolution(mut self, resolution: UVec2) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn options(mut self, options: CullingOptions) -> Self {
        self.options = options;
        self
    }

    /// Device to use in GPU mode instead of creating one.
    pub fn iad(mut self, iad: Arc<InstanceAdapterDevice>) -> Self {
        self.iad = Some(iad);
        self
    }

    pub async fn build(self) -> Result<TestRunner> {
        let _ = env_logger::builder().is_test(true).try_init();

        let device = match (self.mode, self.iad) {
            (RendererMode::CpuPowered, _) => CullDevice::cpu(),
            (RendererMode::GpuPowered, Some(iad)) => CullDevice::gpu(iad),
            (RendererMode::GpuPowered, None) => CullDevice::gpu(Arc::new(
                hizcull::create_iad(None, None)
                    .await
                    .map_err(|e| anyhow!("InstanceAdapterDevice creation failed: {e}"))?,
            )),
        };

        let executor = match &device {
            ModeData::Cpu(()) => ModeData::Cpu(CpuCullExecutor::new()),
            ModeData::Gpu(iad) => ModeData::Gpu(
                GpuCullExecutor::new(&iad.device, &shaders::preprocessor(), None)
                    .map_err(|e| anyhow!("Culling routine creation failed: {e}"))?,
            ),
        };
        let context = ClusterBuffer::new(&device, "test", self.capacity, &self.options)
            .map_err(|e| anyhow!("Culling context creation failed: {e}"))?;
        let hi_z = HiZOcclusionData::new(&device, self.resolution)
            .map_err(|e| anyhow!("Depth hierarchy creation failed: {e}"))?;

        Ok(TestRunner {
            device,
            options: self.options,
            context,
            hi_z,
            executor,
        })
    }
}

/// One culling context and depth hierarchy on either backend.
pub struct TestRunner {
    pub device: CullDevice,
    pub options: CullingOptions,
    pub context: ClusterBuffer,
    pub hi_z: HiZOcclusionData,
    executor: ModeData<CpuCullExecutor, GpuCullExecutor>,
}

impl TestRunner {
    pub fn builder() -> TestRunnerBuilder {
        TestRunnerBuilder::new()
    }

    pub fn mode(&self) -> RendererMode {
        self.device.mode()
    }

    /// Replaces the clusters, with boxes as their vertex caches.
    pub fn set_clusters(&mut self, clusters: &[Cluster]) -> Result<()> {
        self.context
            .set_clusters(&self.device, clusters, &box_vertex_cache(clusters))
            .context("Setting clusters failed")
    }

    /// Runs the canonical pipeline for the runner's options.
    pub async fn frame(&mut self, camera: &CameraManager) -> Result<FrameReadback> {
        let pipeline = CullPipeline::for_options(&self.options, self.context.flags_reset_pending());
        self.frame_with(&pipeline, camera).await
    }

    /// Runs `pipeline`, drawing into the depth hierarchy, and reads back every
    /// counter and list.
    pub async fn frame_with(&mut self, pipeline: &CullPipeline, camera: &CameraManager) -> Result<FrameReadback> {
        let frame = CullFrame {
            camera,
            options: &self.options,
        };

        match (&self.executor, &self.device) {
            (ModeData::Cpu(executor), ModeData::Cpu(())) => {
                executor.execute(pipeline, &mut self.context, Some(&mut self.hi_z), None, &frame)?;
                let host = self.context.storage()?.as_cpu().context("Host storage expected")?;

                let mut words = Vec::new();
                words.extend(host.draw_args.snapshot());
                words.extend(host.dispatch_args.snapshot());
                words.extend(host.recheck_args.snapshot());
                words.extend(host.visibility.snapshot());
                if host.visibility.is_empty() {
                    words.push(0);
                }
                words.extend(host.recheck_flags.snapshot());
                Ok(FrameReadback::from_words(&words, self.context.capacity() as usize))
            }
            (ModeData::Gpu(executor), ModeData::Gpu(iad)) => {
                let mut encoder = iad.device.create_command_encoder(&CommandEncoderDescriptor {
                    label: Some("Test cull encoder"),
                });
                executor.execute(
                    iad,
                    &mut encoder,
                    pipeline,
                    &mut self.context,
                    Some(&mut self.hi_z),
                    GpuDrawTargets::default(),
                    &frame,
                )?;
                let buffers = self.context.storage()?.as_gpu().context("Device storage expected")?;
                read_back(iad, encoder, buffers, self.context.capacity()).await
            }
            _ => anyhow::bail!("Executor and device disagree on mode"),
        }
    }
}

async fn read_back(
    iad: &InstanceAdapterDevice,
    mut encoder: wgpu::CommandEncoder,
    buffers: &GpuClusterBuffers,
    capacity: u32,
) -> Result<FrameReadback> {
    let list_size = capacity.max(1) as u64 * 4;
    let readback = iad.device.create_buffer(&BufferDescriptor {
        label: Some("Test readback buffer"),
        size: ARGS_SIZE * 3 + list_size * 2,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    encoder.copy_buffer_to_buffer(&buffers.draw_args, 0, &readback, 0, ARGS_SIZE);
    encoder.copy_buffer_to_buffer(&buffers.dispatch_args, 0, &readback, ARGS_SIZE, ARGS_SIZE);
    encoder.copy_buffer_to_buffer(&buffers.recheck_args, 0, &readback, ARGS_SIZE * 2, ARGS_SIZE);
    encoder.copy_buffer_to_buffer(&buffers.visibility, 0, &readback, ARGS_SIZE * 3, list_size);
    encoder.copy_buffer_to_buffer(
        &buffers.recheck_flags,
        0,
        &readback,
        ARGS_SIZE * 3 + list_size,
        list_size,
    );

    let submit_index = iad.queue.submit(Some(encoder.finish()));

    let (sender, receiver) = flume::bounded(1);
    readback.slice(..).map_async(MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    iad.device.poll(Maintain::WaitForSubmissionIndex(submit_index));

    receiver
        .recv_async()
        .await
        .context("Failed to recieve message from map_async")?
        .context("Mapping the readback buffer failed")?;
    iad.health.check()?;

    let mapping = readback.slice(..).get_mapped_range();
    let words: Vec<u32> = bytemuck::cast_slice(&mapping).to_vec();
    Ok(FrameReadback::from_words(&words, capacity as usize))
}
