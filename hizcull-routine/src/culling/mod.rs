//! Executors walking a [`CullPipeline`] for one culling context.
//!
//! Both backends run the same passes with the same append semantics. The host
//! one is the reference the device one is tested against.

use glam::UVec2;
use hizcull::{
    managers::{CameraManager, ClusterBuffer, HiZOcclusionData},
    CreateCullUniformArgs, CullError, CullPass, CullPipeline, CullUniforms, CullingOptions, PipelineError,
};

pub mod cpu;
pub mod gpu;

/// Per-frame inputs shared by every pass.
#[derive(Debug, Copy, Clone)]
pub struct CullFrame<'a> {
    pub camera: &'a CameraManager,
    pub options: &'a CullingOptions,
}

/// Checks done before any pass is recorded.
///
/// `has_depth_target` is whether the caller supplied a target for the draw
/// other than the depth hierarchy.
pub(crate) fn check_frame(
    pipeline: &CullPipeline,
    context: &ClusterBuffer,
    hi_z: Option<&HiZOcclusionData>,
    has_depth_target: bool,
) -> Result<(), CullError> {
    pipeline.validate()?;
    context.storage()?;

    if hi_z.is_none() {
        if let Some(pass) = pipeline.first_hi_z_user() {
            return Err(PipelineError::MissingHiZ(pass).into());
        }
        if !has_depth_target {
            return Err(PipelineError::MissingDepthTarget(CullPass::Draw).into());
        }
    }

    if context.flags_reset_pending()
        && pipeline.contains(CullPass::OcclusionTest)
        && !pipeline.contains(CullPass::ClearRecheckFlags)
    {
        log::warn!(
            "Cluster count of {} changed without a recheck flag clear",
            context.label()
        );
    }

    Ok(())
}

pub(crate) fn frame_uniforms(
    frame: &CullFrame<'_>,
    context: &ClusterBuffer,
    hi_z: Option<&HiZOcclusionData>,
) -> CullUniforms {
    let (history, pyramid_size, pyramid_mips) = match hi_z {
        Some(data) => (data.history(), data.resolution(), data.mip_count()),
        None => (None, UVec2::ONE, 1),
    };

    let uniforms = CullUniforms::new(CreateCullUniformArgs {
        camera: frame.camera,
        options: frame.options,
        cluster_count: context.cluster_count(),
        history,
        pyramid_size,
        pyramid_mips,
    });
    if history.is_some() && !uniforms.history_usable() {
        log::debug!("Camera cut on {}, skipping last frame's depth", context.label());
    }
    uniforms
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, UVec2, Vec3};
    use hizcull::{
        managers::{CameraManager, ClusterBuffer, HiZOcclusionData},
        types::{Camera, CameraProjection, Handedness},
        CullDevice, CullError, CullPass, CullPipeline, CullingOptions, PipelineError,
    };

    use super::*;

    fn camera(up: Vec3) -> CameraManager {
        CameraManager::new(
            Camera {
                projection: CameraProjection::Perspective {
                    vfov: 60.0,
                    near: 0.1,
                    far: 100.0,
                },
                view: Mat4::look_at_lh(Vec3::ZERO, Vec3::Z, up),
            },
            Handedness::Left,
            Some(1.0),
        )
    }

    #[test]
    fn missing_hi_z_is_named() {
        let context = ClusterBuffer::new(&CullDevice::cpu(), "ctx", 4, &CullingOptions::default()).unwrap();
        let result = check_frame(&CullPipeline::occlusion(), &context, None, true);
        assert!(matches!(
            result,
            Err(CullError::Pipeline(PipelineError::MissingHiZ(CullPass::OcclusionTest)))
        ));
        let result = check_frame(&CullPipeline::frustum_only(), &context, None, false);
        assert!(matches!(
            result,
            Err(CullError::Pipeline(PipelineError::MissingDepthTarget(CullPass::Draw)))
        ));
        check_frame(&CullPipeline::frustum_only(), &context, None, true).unwrap();
    }

    #[test]
    fn destroyed_context_is_rejected() {
        let mut context = ClusterBuffer::new(&CullDevice::cpu(), "gone", 4, &CullingOptions::default()).unwrap();
        context.destroy();
        assert!(matches!(
            check_frame(&CullPipeline::frustum_only(), &context, None, true),
            Err(CullError::ContextDestroyed(_))
        ));
    }

    #[test]
    fn uniforms_follow_history() {
        let options = CullingOptions::default();
        let context = ClusterBuffer::new(&CullDevice::cpu(), "ctx", 4, &options).unwrap();
        let mut hi_z = HiZOcclusionData::new(&CullDevice::cpu(), UVec2::new(32, 16)).unwrap();
        let upright = camera(Vec3::Y);
        let frame = CullFrame {
            camera: &upright,
            options: &options,
        };

        let uniforms = frame_uniforms(&frame, &context, Some(&hi_z));
        assert_eq!(uniforms.pyramid_size, UVec2::new(32, 16));
        assert_eq!(uniforms.pyramid_mips, 6);
        assert!(!uniforms.history_usable());

        hi_z.record_history(upright.view_proj(), upright.up());
        assert!(frame_uniforms(&frame, &context, Some(&hi_z)).history_usable());

        // rolled onto its side: a cut
        let rolled = camera(Vec3::X);
        let frame = CullFrame {
            camera: &rolled,
            options: &options,
        };
        assert!(!frame_uniforms(&frame, &context, Some(&hi_z)).history_usable());

        let uniforms = frame_uniforms(&frame, &context, None);
        assert_eq!((uniforms.pyramid_size, uniforms.pyramid_mips), (UVec2::ONE, 1));
    }
}
