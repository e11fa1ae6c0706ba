//! Per-context cluster storage: the input boxes, their vertex cache and every
//! intermediate buffer the culling kernels append to.

use std::{mem, num::NonZeroU64};

use encase::ShaderType;
use hizcull_types::{Cluster, ClusterVertex, IndirectDispatchArgs, IndirectDrawArgs, CLUSTER_CLIP_COUNT};
use wgpu::{util::DeviceExt, Buffer, BufferDescriptor, BufferUsages, Device, Limits};

use crate::{
    error::{ContextCreationError, CullError},
    format_sso,
    mode::ModeData,
    options::CullingOptions,
    setup::CullDevice,
    uniforms::CullUniforms,
    util::{atomic::AtomicBuffer, error_scope::AllocationErrorScope, typedefs::SsoString},
};

const ARGS_WORDS: usize = 5;

/// Host copies of every context buffer. Buffers written by kernels are atomic
/// so workgroups can run in parallel.
pub struct HostClusterBuffers {
    pub clusters: Vec<Cluster>,
    pub vertices: Vec<ClusterVertex>,
    pub visibility: AtomicBuffer,
    pub draw_args: AtomicBuffer,
    pub candidates: AtomicBuffer,
    pub dispatch_args: AtomicBuffer,
    pub recheck_list: AtomicBuffer,
    pub recheck_args: AtomicBuffer,
    pub recheck_flags: AtomicBuffer,
}

pub struct GpuClusterBuffers {
    pub uniforms: Buffer,
    pub clusters: Buffer,
    pub vertices: Buffer,
    pub visibility: Buffer,
    pub draw_args: Buffer,
    pub candidates: Buffer,
    pub dispatch_args: Buffer,
    pub recheck_list: Buffer,
    pub recheck_args: Buffer,
    pub recheck_flags: Buffer,
}

impl GpuClusterBuffers {
    fn destroy(self) {
        // Reverse creation order.
        self.recheck_flags.destroy();
        self.recheck_args.destroy();
        self.recheck_list.destroy();
        self.dispatch_args.destroy();
        self.candidates.destroy();
        self.draw_args.destroy();
        self.visibility.destroy();
        self.vertices.destroy();
        self.clusters.destroy();
        self.uniforms.destroy();
    }
}

pub type ClusterStorage = ModeData<HostClusterBuffers, GpuClusterBuffers>;

/// Fixed capacity storage for one set of clusters.
///
/// Every buffer is sized for `capacity` clusters up front, so nothing is
/// reallocated while culling. Slot `i` of every per-cluster buffer belongs
/// to cluster `i`.
pub struct ClusterBuffer {
    label: SsoString,
    capacity: u32,
    cluster_count: u32,
    flags_reset_pending: bool,
    storage: Option<ClusterStorage>,
}

impl ClusterBuffer {
    pub fn new(
        device: &CullDevice,
        label: &str,
        capacity: u32,
        options: &CullingOptions,
    ) -> Result<Self, ContextCreationError> {
        profiling::scope!("ClusterBuffer::new");

        let label = SsoString::from(label);
        let storage = match device {
            ModeData::Cpu(()) => ModeData::Cpu(create_host(&label, capacity, options)?),
            ModeData::Gpu(iad) => ModeData::Gpu(create_gpu(&iad.device, &label, capacity)?),
        };
        log::debug!(
            "Created {:?} culling context {label} with capacity {capacity}",
            storage.mode()
        );

        Ok(Self {
            label,
            capacity,
            cluster_count: 0,
            flags_reset_pending: false,
            storage: Some(storage),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.storage.is_none()
    }

    /// Storage, or an error if the context was destroyed.
    pub fn storage(&self) -> Result<&ClusterStorage, CullError> {
        self.storage
            .as_ref()
            .ok_or_else(|| CullError::ContextDestroyed(self.label.clone()))
    }

    /// True if the recheck flags may hold entries for slots that changed
    /// meaning and must be cleared before the next occlusion test.
    pub fn flags_reset_pending(&self) -> bool {
        self.flags_reset_pending
    }

    /// Called by whoever clears the recheck flags.
    pub fn mark_flags_reset(&mut self) {
        self.flags_reset_pending = false;
    }

    /// Replaces the cluster set. `vertices` holds `CLUSTER_CLIP_COUNT` cached
    /// vertices per cluster, in cluster order.
    pub fn set_clusters(
        &mut self,
        device: &CullDevice,
        clusters: &[Cluster],
        vertices: &[ClusterVertex],
    ) -> Result<(), CullError> {
        profiling::scope!("ClusterBuffer::set_clusters");

        if clusters.len() > self.capacity as usize {
            return Err(CullError::TooManyClusters {
                count: clusters.len(),
                capacity: self.capacity,
            });
        }
        let expected = clusters.len() * CLUSTER_CLIP_COUNT as usize;
        if vertices.len() != expected {
            return Err(CullError::VertexCountMismatch {
                clusters: clusters.len(),
                expected,
                got: vertices.len(),
            });
        }

        let label = self.label.clone();
        let storage = self.storage.as_mut().ok_or(CullError::ContextDestroyed(label))?;
        match (storage, device) {
            (ModeData::Cpu(host), ModeData::Cpu(())) => {
                host.clusters.clear();
                host.clusters.extend_from_slice(clusters);
                host.vertices.clear();
                host.vertices.extend_from_slice(vertices);
            }
            (ModeData::Gpu(gpu), ModeData::Gpu(iad)) => {
                iad.health.check()?;
                if !clusters.is_empty() {
                    iad.queue.write_buffer(&gpu.clusters, 0, bytemuck::cast_slice(clusters));
                    iad.queue.write_buffer(&gpu.vertices, 0, bytemuck::cast_slice(vertices));
                }
            }
            _ => return Err(CullError::ModeMismatch),
        }

        let count = clusters.len() as u32;
        if count != self.cluster_count {
            self.flags_reset_pending = true;
        }
        self.cluster_count = count;
        Ok(())
    }

    /// Releases every buffer. Destroying twice is a no-op.
    pub fn destroy(&mut self) {
        if let Some(storage) = self.storage.take() {
            log::debug!("Destroying culling context {}", self.label);
            if let ModeData::Gpu(gpu) = storage {
                gpu.destroy();
            }
        }
        self.cluster_count = 0;
    }
}

fn create_host(
    label: &SsoString,
    capacity: u32,
    options: &CullingOptions,
) -> Result<HostClusterBuffers, ContextCreationError> {
    if capacity > options.max_cpu_capacity {
        return Err(ContextCreationError::CapacityExceedsHostLimit {
            label: label.clone(),
            capacity,
            limit: options.max_cpu_capacity,
        });
    }

    let host_error = |source| ContextCreationError::HostAllocation {
        label: label.clone(),
        source,
    };
    let count = capacity as usize;

    let mut clusters = Vec::new();
    clusters.try_reserve_exact(count).map_err(host_error)?;
    let mut vertices = Vec::new();
    vertices
        .try_reserve_exact(count * CLUSTER_CLIP_COUNT as usize)
        .map_err(host_error)?;

    let buffers = HostClusterBuffers {
        clusters,
        vertices,
        visibility: AtomicBuffer::try_zeroed(count).map_err(host_error)?,
        draw_args: AtomicBuffer::from_words(&IndirectDrawArgs::INITIAL.as_words()),
        candidates: AtomicBuffer::try_zeroed(count).map_err(host_error)?,
        dispatch_args: AtomicBuffer::from_words(&IndirectDispatchArgs::INITIAL.as_words()),
        recheck_list: AtomicBuffer::try_zeroed(count).map_err(host_error)?,
        recheck_args: AtomicBuffer::from_words(&IndirectDispatchArgs::INITIAL.as_words()),
        recheck_flags: AtomicBuffer::try_zeroed(count).map_err(host_error)?,
    };
    debug_assert_eq!(buffers.draw_args.len(), ARGS_WORDS);
    Ok(buffers)
}

/// Byte sizes of every per-cluster buffer for `capacity` clusters.
///
/// Zero sized bindings aren't allowed, so an empty context still gets one slot.
fn buffer_sizes(capacity: u32) -> [(&'static str, u64); 5] {
    let slots = capacity.max(1) as u64;
    [
        ("clusters", slots * mem::size_of::<Cluster>() as u64),
        (
            "vertices",
            slots * CLUSTER_CLIP_COUNT as u64 * mem::size_of::<ClusterVertex>() as u64,
        ),
        ("visibility", slots * 4),
        ("candidates", slots * 4),
        ("recheck lists", slots * 4),
    ]
}

/// Checks every buffer of the context against the device's binding limits.
pub fn check_capacity(limits: &Limits, label: &str, capacity: u32) -> Result<(), ContextCreationError> {
    let limit = limits.max_buffer_size.min(limits.max_storage_buffer_binding_size as u64);
    for (buffer, required) in buffer_sizes(capacity) {
        if required > limit {
            return Err(ContextCreationError::CapacityExceedsLimit {
                label: SsoString::from(label),
                buffer,
                capacity,
                required,
                limit,
            });
        }
    }
    Ok(())
}

fn create_gpu(device: &Device, label: &SsoString, capacity: u32) -> Result<GpuClusterBuffers, ContextCreationError> {
    check_capacity(&device.limits(), label, capacity)?;

    let [(_, clusters_size), (_, vertices_size), (_, list_size), _, _] = buffer_sizes(capacity);
    let storage = |name: &str, size: u64, usage: BufferUsages| {
        device.create_buffer(&BufferDescriptor {
            label: Some(format_sso!("{label} {name}").as_str()),
            size,
            usage: BufferUsages::STORAGE | usage,
            mapped_at_creation: false,
        })
    };
    let args = |name: &str, initial: [u32; ARGS_WORDS]| {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(format_sso!("{label} {name}").as_str()),
            contents: bytemuck::cast_slice(&initial),
            usage: BufferUsages::STORAGE | BufferUsages::INDIRECT | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        })
    };
    let readback = BufferUsages::COPY_SRC;

    let scope = AllocationErrorScope::new(device);
    let uniforms = device.create_buffer(&BufferDescriptor {
        label: Some(format_sso!("{label} uniforms").as_str()),
        size: uniform_size(),
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let buffers = GpuClusterBuffers {
        uniforms,
        clusters: storage("clusters", clusters_size, BufferUsages::COPY_DST | readback),
        vertices: storage("vertices", vertices_size, BufferUsages::COPY_DST),
        visibility: storage("visibility", list_size, readback),
        draw_args: args("draw args", IndirectDrawArgs::INITIAL.as_words()),
        candidates: storage("candidates", list_size, readback),
        dispatch_args: args("dispatch args", IndirectDispatchArgs::INITIAL.as_words()),
        recheck_list: storage("recheck list", list_size, readback),
        recheck_args: args("recheck args", IndirectDispatchArgs::INITIAL.as_words()),
        recheck_flags: storage("recheck flags", list_size, BufferUsages::COPY_DST | readback),
    };
    if let Err(source) = scope.end() {
        buffers.destroy();
        return Err(ContextCreationError::DeviceAllocation {
            label: label.clone(),
            source,
        });
    }

    Ok(buffers)
}

fn uniform_size() -> u64 {
    let size: NonZeroU64 = CullUniforms::min_size();
    size.get()
}
