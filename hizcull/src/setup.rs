use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::{
    Adapter, AdapterInfo, Backend, Backends, Device, DeviceDescriptor, DeviceType, Features, Instance,
    InstanceDescriptor, Limits, Queue,
};

use crate::{
    error::{CullError, LimitType, RendererInitializationError},
    mode::ModeData,
};

/// Storage buffers bound at once by the occlusion test kernel, the most of any kernel.
pub const REQUIRED_STORAGE_BUFFERS_PER_STAGE: u32 = 8;
/// Largest uniform buffer binding needed.
pub const MAX_UNIFORM_BUFFER_BINDING_SIZE: u32 = 512;

/// Features required to cull on the device. Draws always start at instance
/// zero, so core indirect support is enough.
pub const GPU_REQUIRED_FEATURES: Features = Features::empty();

/// Check that all required features are present in the feature set given.
pub fn check_features(device: Features) -> Result<Features, RendererInitializationError> {
    let missing = GPU_REQUIRED_FEATURES - device;
    if !missing.is_empty() {
        Err(RendererInitializationError::MissingDeviceFeatures { features: missing })
    } else {
        Ok(GPU_REQUIRED_FEATURES)
    }
}

/// Limits required to cull on the device.
pub fn gpu_required_limits() -> Limits {
    Limits {
        max_bind_groups: 2,
        max_storage_buffers_per_shader_stage: REQUIRED_STORAGE_BUFFERS_PER_STAGE,
        max_uniform_buffers_per_shader_stage: 1,
        max_uniform_buffer_binding_size: MAX_UNIFORM_BUFFER_BINDING_SIZE,
        max_compute_invocations_per_workgroup: hizcull_types::CULL_WORKGROUP_SIZE,
        max_compute_workgroup_size_x: hizcull_types::CULL_WORKGROUP_SIZE,
        ..Limits::downlevel_defaults()
    }
}

fn check_limit_unlimited(d: u32, r: u32, ty: LimitType) -> Result<u32, RendererInitializationError> {
    if d < r {
        Err(RendererInitializationError::LowDeviceLimit {
            ty,
            device_limit: d as u64,
            required_limit: r as u64,
        })
    } else {
        Ok(d)
    }
}

/// Check that all required limits are present in the given limit set.
///
/// Returns the limits to request, which are the device's own for everything
/// that scales cluster capacity or resolution.
pub fn check_limits(device_limits: &Limits) -> Result<Limits, RendererInitializationError> {
    let required_limits = gpu_required_limits();

    Ok(Limits {
        max_bind_groups: check_limit_unlimited(
            device_limits.max_bind_groups,
            required_limits.max_bind_groups,
            LimitType::BindGroups,
        )?,
        max_storage_buffers_per_shader_stage: check_limit_unlimited(
            device_limits.max_storage_buffers_per_shader_stage,
            required_limits.max_storage_buffers_per_shader_stage,
            LimitType::StorageBuffersPerShaderStages,
        )?,
        max_uniform_buffers_per_shader_stage: check_limit_unlimited(
            device_limits.max_uniform_buffers_per_shader_stage,
            required_limits.max_uniform_buffers_per_shader_stage,
            LimitType::UniformBuffersPerShaderStages,
        )?,
        max_uniform_buffer_binding_size: check_limit_unlimited(
            device_limits.max_uniform_buffer_binding_size,
            required_limits.max_uniform_buffer_binding_size,
            LimitType::UniformBufferBindingSize,
        )?,
        max_storage_buffer_binding_size: check_limit_unlimited(
            device_limits.max_storage_buffer_binding_size,
            required_limits.max_storage_buffer_binding_size,
            LimitType::MaxStorageBufferBindingSize,
        )?,
        max_buffer_size: check_limit_unlimited(
            device_limits.max_buffer_size.min(u32::MAX as u64) as u32,
            required_limits.max_buffer_size.min(u32::MAX as u64) as u32,
            LimitType::MaxBufferSize,
        )
        .map(|_| device_limits.max_buffer_size)?,
        max_texture_dimension_2d: check_limit_unlimited(
            device_limits.max_texture_dimension_2d,
            required_limits.max_texture_dimension_2d,
            LimitType::MaxTextureDimension2d,
        )?,
        max_compute_invocations_per_workgroup: check_limit_unlimited(
            device_limits.max_compute_invocations_per_workgroup,
            required_limits.max_compute_invocations_per_workgroup,
            LimitType::MaxComputeInvocationsPerWorkgroup,
        )?,
        max_compute_workgroup_size_x: check_limit_unlimited(
            device_limits.max_compute_workgroup_size_x,
            required_limits.max_compute_workgroup_size_x,
            LimitType::MaxComputeWorkgroupSizeX,
        )?,
        max_compute_workgroups_per_dimension: check_limit_unlimited(
            device_limits.max_compute_workgroups_per_dimension,
            required_limits.max_compute_workgroups_per_dimension,
            LimitType::MaxComputeWorkgroupsPerDimension,
        )?,
        ..required_limits
    })
}

/// Records errors the device raises outside of any error scope.
///
/// Any such error leaves device state unknown, so once one is seen every
/// further frame is refused.
#[derive(Debug, Clone, Default)]
pub struct DeviceHealth {
    fatal: Arc<Mutex<Option<String>>>,
}

impl DeviceHealth {
    pub fn attach(device: &Device) -> Self {
        let health = Self::default();
        let fatal = Arc::clone(&health.fatal);
        device.on_uncaptured_error(Box::new(move |error| {
            log::error!("Uncaptured device error: {error}");
            fatal.lock().get_or_insert_with(|| error.to_string());
        }));
        health
    }

    pub fn report(&self, message: impl Into<String>) {
        self.fatal.lock().get_or_insert_with(|| message.into());
    }

    pub fn check(&self) -> Result<(), CullError> {
        match &*self.fatal.lock() {
            Some(message) => Err(CullError::DeviceLost(message.clone())),
            None => Ok(()),
        }
    }
}

/// Container for Instance/Adapter/Device/Queue etc.
///
/// Create these yourself and call [`InstanceAdapterDevice::from_parts`], or call [`create_iad`].
pub struct InstanceAdapterDevice {
    pub instance: Arc<Instance>,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub info: AdapterInfo,
    pub health: DeviceHealth,
}

impl InstanceAdapterDevice {
    pub fn from_parts(instance: Arc<Instance>, adapter: Arc<Adapter>, device: Arc<Device>, queue: Arc<Queue>) -> Self {
        let info = adapter.get_info();
        let health = DeviceHealth::attach(&device);
        Self {
            instance,
            adapter,
            device,
            queue,
            info,
            health,
        }
    }
}

/// What culling executes on. Host mode needs no device.
pub type CullDevice = ModeData<(), Arc<InstanceAdapterDevice>>;

impl CullDevice {
    pub fn cpu() -> Self {
        ModeData::Cpu(())
    }

    pub fn gpu(iad: Arc<InstanceAdapterDevice>) -> Self {
        ModeData::Gpu(iad)
    }
}

/// Creates an Instance/Adapter/Device/Queue using the given choices. Tries to get the best combination.
pub async fn create_iad(
    desired_backend: Option<Backend>,
    desired_device: Option<String>,
) -> Result<InstanceAdapterDevice, RendererInitializationError> {
    let default_backend_order = [Backend::Vulkan, Backend::Metal, Backend::Dx12, Backend::Gl];

    let instance = Instance::new(InstanceDescriptor {
        backends: Backends::VULKAN | Backends::DX12 | Backends::METAL | Backends::GL,
        ..Default::default()
    });

    for backend in default_backend_order {
        if let Some(desired_backend) = desired_backend {
            if desired_backend != backend {
                log::debug!("Skipping unwanted backend {:?}", backend);
                continue;
            }
        }

        let mut potential_adapters = Vec::new();
        for (idx, adapter) in instance.enumerate_adapters(Backends::from(backend)).into_iter().enumerate() {
            let info = adapter.get_info();
            log::debug!("{:?} Adapter {}: {:#?}", backend, idx, info);

            let desired = match desired_device {
                Some(ref desired_device) => info.name.to_lowercase().contains(desired_device),
                None => true,
            };
            let checked = check_features(adapter.features()).and_then(|f| Ok((f, check_limits(&adapter.limits())?)));

            match (checked, desired) {
                (Ok((features, limits)), true) => potential_adapters.push((adapter, info, features, limits)),
                (Err(e), _) => log::debug!("Adapter not usable: {e}"),
                (_, false) => log::debug!("Adapter not desired"),
            }
        }

        potential_adapters.sort_by_key(|(_, info, _, _)| match info.device_type {
            DeviceType::DiscreteGpu => 0,
            DeviceType::IntegratedGpu => 1,
            DeviceType::VirtualGpu => 2,
            DeviceType::Cpu => 3,
            DeviceType::Other => 4,
        });

        if let Some((adapter, info, features, limits)) = potential_adapters.into_iter().next() {
            log::debug!("Chosen adapter: {:#?}", info);
            log::debug!("Chosen backend: {:?}", backend);
            log::debug!("Chosen features: {:#?}", features);
            log::debug!("Chosen limits: {:#?}", limits);

            let (device, queue) = adapter
                .request_device(
                    &DeviceDescriptor {
                        label: Some("hizcull device"),
                        required_features: features,
                        required_limits: limits,
                    },
                    None,
                )
                .await
                .map_err(RendererInitializationError::RequestDeviceFailed)?;

            return Ok(InstanceAdapterDevice::from_parts(
                Arc::new(instance),
                Arc::new(adapter),
                Arc::new(device),
                Arc::new(queue),
            ));
        }
    }

    Err(RendererInitializationError::MissingAdapter)
}
