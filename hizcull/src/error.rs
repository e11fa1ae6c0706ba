use std::collections::TryReserveError;

use thiserror::Error;
use wgpu::Features;

use crate::{pass::CullPass, pass::CullResource, util::typedefs::SsoString};

/// Enum mapping to each of a device's limit that culling depends on.
#[derive(Debug)]
pub enum LimitType {
    BindGroups,
    StorageBuffersPerShaderStages,
    UniformBuffersPerShaderStages,
    UniformBufferBindingSize,
    MaxStorageBufferBindingSize,
    MaxBufferSize,
    MaxTextureDimension2d,
    MaxComputeInvocationsPerWorkgroup,
    MaxComputeWorkgroupSizeX,
    MaxComputeWorkgroupsPerDimension,
}

/// Reason why a device couldn't be set up for culling.
#[derive(Error, Debug)]
pub enum RendererInitializationError {
    #[error("No supported adapter found")]
    MissingAdapter,
    #[error("The device limit of {:?} is {} but culling requires at least {}", ty, device_limit, required_limit)]
    LowDeviceLimit {
        ty: LimitType,
        device_limit: u64,
        required_limit: u64,
    },
    #[error("Device is missing required features: {:?}", features)]
    MissingDeviceFeatures { features: Features },
    #[error("Requesting a device failed")]
    RequestDeviceFailed(#[source] wgpu::RequestDeviceError),
}

/// Reason why a culling context or depth hierarchy couldn't be created.
#[derive(Error, Debug)]
pub enum ContextCreationError {
    #[error("{label}: capacity of {capacity} clusters needs {required} bytes for {buffer}, but the device allows {limit}")]
    CapacityExceedsLimit {
        label: SsoString,
        buffer: &'static str,
        capacity: u32,
        required: u64,
        limit: u64,
    },
    #[error("{label}: capacity of {capacity} clusters is above the host limit of {limit}")]
    CapacityExceedsHostLimit { label: SsoString, capacity: u32, limit: u32 },
    #[error("{label}: device failed to allocate buffers")]
    DeviceAllocation {
        label: SsoString,
        #[source]
        source: wgpu::Error,
    },
    #[error("{label}: host failed to allocate buffers")]
    HostAllocation {
        label: SsoString,
        #[source]
        source: TryReserveError,
    },
    #[error("Depth hierarchy resolution {width}x{height} is empty or above the device limit of {limit}")]
    InvalidResolution { width: u32, height: u32, limit: u32 },
}

/// Reason why a culling routine's shaders or pipelines couldn't be built.
#[derive(Error, Debug)]
pub enum RoutineCreationError {
    #[error("Failed to preprocess shader {shader}")]
    ShaderRender {
        shader: SsoString,
        #[source]
        source: handlebars::RenderError,
    },
    #[error("{label}: device rejected pipeline creation")]
    PipelineCreation {
        label: SsoString,
        #[source]
        source: wgpu::Error,
    },
}

/// Reason why a pass list can't be executed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{pass:?} reads {resource:?} before anything in the frame wrote it")]
    ReadBeforeWrite { pass: CullPass, resource: CullResource },
    #[error("{pass:?} reads last frame's {resource:?} after {writer:?} already overwrote it")]
    StaleHistoryRead {
        pass: CullPass,
        resource: CullResource,
        writer: CullPass,
    },
    #[error("{consumer:?} reads {resource:?} from {producer:?} on another queue with no fence in between")]
    MissingFence {
        producer: CullPass,
        consumer: CullPass,
        resource: CullResource,
    },
    #[error("Pass list must end in exactly one draw, found {0}")]
    DrawCount(usize),
    #[error("{0:?} needs a depth hierarchy but none was given")]
    MissingHiZ(CullPass),
    #[error("{0:?} needs a depth target but none was given")]
    MissingDepthTarget(CullPass),
}

/// Reason a frame of culling failed.
#[derive(Error, Debug)]
pub enum CullError {
    #[error("Device reported a fatal error: {0}")]
    DeviceLost(String),
    #[error("Culling context {0} was used after being destroyed")]
    ContextDestroyed(SsoString),
    #[error("{count} clusters don't fit in a context with capacity {capacity}")]
    TooManyClusters { count: usize, capacity: u32 },
    #[error("{clusters} clusters need {expected} cached vertices, got {got}")]
    VertexCountMismatch { clusters: usize, expected: usize, got: usize },
    #[error("Context and device disagree on renderer mode")]
    ModeMismatch,
    #[error("Failed to encode cull uniforms")]
    UniformEncoding(#[from] encase::internal::Error),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
