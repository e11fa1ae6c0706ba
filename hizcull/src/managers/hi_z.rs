use glam::{Mat4, UVec2, Vec3};
use wgpu::{
    Extent3d, Texture, TextureAspect, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor,
};

use crate::{
    error::ContextCreationError,
    format_sso,
    mode::ModeData,
    setup::CullDevice,
    util::{error_scope::AllocationErrorScope, math, occlusion::ScreenBounds, raster::DepthImage},
};

/// Format of the depth target and every level of the pyramid.
pub const HI_Z_FORMAT: TextureFormat = TextureFormat::Depth32Float;
/// Largest resolution the host backend accepts.
pub const MAX_CPU_RESOLUTION: u32 = 16384;

/// Host side max-depth pyramid. Level 0 doubles as the depth target.
#[derive(Debug, Clone)]
pub struct DepthPyramid {
    levels: Vec<DepthImage>,
}

impl DepthPyramid {
    pub fn new(size: UVec2) -> Self {
        let levels = (0..math::mip_count(size.x, size.y))
            .map(|level| {
                let (x, y) = math::mip_size(size.x, size.y, level);
                DepthImage::new(UVec2::new(x, y))
            })
            .collect();
        Self { levels }
    }

    pub fn size(&self) -> UVec2 {
        self.levels[0].size()
    }

    pub fn mip_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level(&self, level: u32) -> &DepthImage {
        &self.levels[level as usize]
    }

    pub fn base_mut(&mut self) -> &mut DepthImage {
        &mut self.levels[0]
    }

    /// Regenerates every level above the base.
    pub fn rebuild(&mut self) {
        profiling::scope!("rebuild depth pyramid");

        for level in 1..self.levels.len() {
            self.levels[level] = self.levels[level - 1].downsample_max();
        }
    }

    /// Farthest depth stored under `bounds` at `level`.
    pub fn farthest_depth(&self, bounds: &ScreenBounds, level: u32) -> f32 {
        let image = self.level(level);
        let (lo, hi) = bounds.texel_range(self.size(), level);
        let mut far = 0.0_f32;
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                far = far.max(image.get(x, y));
            }
        }
        far
    }
}

/// Device side pyramid: one depth texture with a full mip chain.
pub struct GpuDepthPyramid {
    pub texture: Texture,
    /// Every level, for sampling.
    pub view: TextureView,
    /// One view per level, for rendering into.
    pub level_views: Vec<TextureView>,
}

/// Camera state the pyramid was built with.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HiZHistory {
    pub view_proj: Mat4,
    pub camera_up: Vec3,
}

/// The depth hierarchy a camera tests against.
///
/// Overwritten every frame and only reallocated when the resolution changes.
pub struct HiZOcclusionData {
    resolution: UVec2,
    mip_count: u32,
    pyramid: ModeData<DepthPyramid, GpuDepthPyramid>,
    history: Option<HiZHistory>,
}

impl HiZOcclusionData {
    pub fn new(device: &CullDevice, resolution: UVec2) -> Result<Self, ContextCreationError> {
        profiling::scope!("HiZOcclusionData::new");

        let pyramid = create_pyramid(device, resolution)?;
        let mip_count = math::mip_count(resolution.x, resolution.y);
        log::debug!(
            "Created {}x{} depth hierarchy with {} levels",
            resolution.x,
            resolution.y,
            mip_count
        );

        Ok(Self {
            resolution,
            mip_count,
            pyramid,
            history: None,
        })
    }

    /// Reallocates for a new resolution, dropping the history. Does nothing if
    /// the resolution is unchanged.
    pub fn resize(&mut self, device: &CullDevice, resolution: UVec2) -> Result<(), ContextCreationError> {
        if resolution == self.resolution {
            return Ok(());
        }
        *self = Self::new(device, resolution)?;
        Ok(())
    }

    pub fn resolution(&self) -> UVec2 {
        self.resolution
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    pub fn pyramid(&self) -> &ModeData<DepthPyramid, GpuDepthPyramid> {
        &self.pyramid
    }

    pub fn pyramid_mut(&mut self) -> &mut ModeData<DepthPyramid, GpuDepthPyramid> {
        &mut self.pyramid
    }

    pub fn history(&self) -> Option<HiZHistory> {
        self.history
    }

    /// Called once the pyramid holds the frame's final depth.
    pub fn record_history(&mut self, view_proj: Mat4, camera_up: Vec3) {
        self.history = Some(HiZHistory { view_proj, camera_up });
    }

    /// Forces the next frame to treat every cluster as unknown.
    pub fn invalidate(&mut self) {
        if self.history.take().is_some() {
            log::debug!("Depth hierarchy history invalidated");
        }
    }
}

fn create_pyramid(
    device: &CullDevice,
    resolution: UVec2,
) -> Result<ModeData<DepthPyramid, GpuDepthPyramid>, ContextCreationError> {
    let limit = match device {
        ModeData::Cpu(()) => MAX_CPU_RESOLUTION,
        ModeData::Gpu(iad) => iad.device.limits().max_texture_dimension_2d,
    };
    if resolution.x == 0 || resolution.y == 0 || resolution.x > limit || resolution.y > limit {
        return Err(ContextCreationError::InvalidResolution {
            width: resolution.x,
            height: resolution.y,
            limit,
        });
    }

    match device {
        ModeData::Cpu(()) => Ok(ModeData::Cpu(DepthPyramid::new(resolution))),
        ModeData::Gpu(iad) => {
            let device = &iad.device;
            let mip_level_count = math::mip_count(resolution.x, resolution.y);

            let scope = AllocationErrorScope::new(device);
            let texture = device.create_texture(&TextureDescriptor {
                label: Some("hi-z pyramid"),
                size: Extent3d {
                    width: resolution.x,
                    height: resolution.y,
                    depth_or_array_layers: 1,
                },
                mip_level_count,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: HI_Z_FORMAT,
                usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            scope.end().map_err(|source| ContextCreationError::DeviceAllocation {
                label: format_sso!("hi-z pyramid {}x{}", resolution.x, resolution.y),
                source,
            })?;

            let view = texture.create_view(&TextureViewDescriptor {
                label: Some("hi-z pyramid all levels"),
                aspect: TextureAspect::DepthOnly,
                ..TextureViewDescriptor::default()
            });
            let level_views = (0..mip_level_count)
                .map(|level| {
                    texture.create_view(&TextureViewDescriptor {
                        label: Some("hi-z pyramid level"),
                        aspect: TextureAspect::DepthOnly,
                        base_mip_level: level,
                        mip_level_count: Some(1),
                        ..TextureViewDescriptor::default()
                    })
                })
                .collect();

            Ok(ModeData::Gpu(GpuDepthPyramid {
                texture,
                view,
                level_views,
            }))
        }
    }
}
