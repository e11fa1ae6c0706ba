//! Executors for hizcull culling pipelines.
//!
//! [`culling::gpu::GpuCullExecutor`] records every pass into a wgpu command
//! encoder: WGSL compute kernels for the culling itself, a render pass per
//! depth pyramid level and one indirect draw. [`culling::cpu::CpuCullExecutor`]
//! runs the same passes on the host with rayon and a software rasterizer.

pub mod culling;
pub mod draw;
pub mod hi_z;
pub mod shaders;
