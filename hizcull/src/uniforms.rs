use encase::{ShaderType, UniformBuffer};
use glam::{Mat4, UVec2, Vec3, Vec4};

use crate::{
    managers::{CameraManager, HiZHistory},
    options::CullingOptions,
    CullError,
};

/// Per-frame inputs of every culling kernel.
///
/// Host kernels read this directly, device kernels get it as a uniform
/// buffer with the same layout as `CullUniforms` in `structs.wgsl`.
#[derive(Debug, Copy, Clone, PartialEq, ShaderType)]
pub struct CullUniforms {
    pub planes: [Vec4; 6],
    pub view_proj: Mat4,
    pub history_view_proj: Mat4,
    pub camera_up: Vec3,
    pub plane_count: u32,
    pub history_up: Vec3,
    pub cluster_count: u32,
    pub pyramid_size: UVec2,
    pub pyramid_mips: u32,
    pub history_valid: u32,
    pub cut_threshold: f32,
    pub recheck_mip_bias: i32,
}

pub struct CreateCullUniformArgs<'a> {
    pub camera: &'a CameraManager,
    pub options: &'a CullingOptions,
    pub cluster_count: u32,
    /// Last frame's depth hierarchy state, `None` if there is none to use.
    pub history: Option<HiZHistory>,
    pub pyramid_size: UVec2,
    pub pyramid_mips: u32,
}

impl CullUniforms {
    pub fn new(args: CreateCullUniformArgs<'_>) -> Self {
        profiling::scope!("create cull uniforms");

        let frustum = args.camera.frustum();
        let history = args.history.unwrap_or(HiZHistory {
            view_proj: Mat4::IDENTITY,
            camera_up: Vec3::ZERO,
        });

        Self {
            planes: frustum.padded_planes(),
            view_proj: args.camera.view_proj(),
            history_view_proj: history.view_proj,
            camera_up: args.camera.up(),
            plane_count: frustum.planes().len() as u32,
            history_up: history.camera_up,
            cluster_count: args.cluster_count,
            pyramid_size: args.pyramid_size,
            pyramid_mips: args.pyramid_mips,
            history_valid: args.history.is_some() as u32,
            cut_threshold: args.options.camera_cut_threshold,
            recheck_mip_bias: args.options.recheck_mip_bias,
        }
    }

    /// Last frame's depth may be used: there is one and the camera didn't cut.
    pub fn history_usable(&self) -> bool {
        self.history_valid != 0 && self.camera_up.dot(self.history_up) >= self.cut_threshold
    }

    /// Encodes with the std140 layout the shaders declare.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CullError> {
        let mut buffer = UniformBuffer::new(Vec::new());
        buffer.write(self)?;
        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use encase::ShaderSize;
    use hizcull_types::{Camera, Handedness};

    use super::*;

    #[test]
    fn layout_matches_wgsl() {
        // 6 planes, 2 matrices, then 5 rows of scalars and vectors.
        assert_eq!(CullUniforms::SHADER_SIZE.get(), 96 + 128 + 16 + 16 + 16 + 16);
        assert!(CullUniforms::SHADER_SIZE.get() <= crate::setup::MAX_UNIFORM_BUFFER_BINDING_SIZE as u64);
    }

    #[test]
    fn encodes_whole_block() {
        let camera = CameraManager::new(Camera::default(), Handedness::Left, Some(1.0));
        let uniforms = CullUniforms::new(CreateCullUniformArgs {
            camera: &camera,
            history: None,
            cluster_count: 7,
            pyramid_size: UVec2::new(64, 32),
            pyramid_mips: 7,
            options: &CullingOptions::default(),
        });

        let bytes = uniforms.to_bytes().unwrap();
        assert_eq!(bytes.len() as u64, CullUniforms::SHADER_SIZE.get());
        // cluster_count opens the row after the history up vector
        let offset = 96 + 128 + 16 + 12;
        assert_eq!(bytes[offset..offset + 4], 7_u32.to_le_bytes());
    }
}
