//! Screen space bounds of clusters and the occlusion verdict.
//!
//! Mirrors `cull_bindings.wgsl` in hizcull-routine; both sides must agree
//! texel for texel.

use glam::{IVec2, Mat4, UVec2, Vec2};
use hizcull_types::Cluster;

use crate::util::raster::MIN_CLIP_W;

/// Outcome of testing a cluster against a depth hierarchy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OcclusionVerdict {
    /// Nearest point of the box is in front of everything it covers.
    Visible,
    /// Nearest point of the box is behind everything it covers.
    Occluded,
    /// The hierarchy can't tell either way.
    Ambiguous,
}

/// Screen rectangle and depth range a cluster projects to.
///
/// uv has its origin at the top left of the viewport.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScreenBounds {
    pub uv_min: Vec2,
    pub uv_max: Vec2,
    pub depth_min: f32,
    pub depth_max: f32,
}

impl ScreenBounds {
    /// Projects the corners of the cluster. `None` when any corner is behind the
    /// eye or the near plane, as the rectangle is meaningless then.
    pub fn project(view_proj: Mat4, cluster: &Cluster) -> Option<Self> {
        let mut bounds = Self {
            uv_min: Vec2::splat(f32::INFINITY),
            uv_max: Vec2::splat(f32::NEG_INFINITY),
            depth_min: f32::INFINITY,
            depth_max: f32::NEG_INFINITY,
        };
        for corner in cluster.corners() {
            let clip = view_proj * corner.extend(1.0);
            if clip.w <= MIN_CLIP_W {
                return None;
            }
            let ndc = clip.truncate() / clip.w;
            if ndc.z < 0.0 {
                return None;
            }
            let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            bounds.uv_min = bounds.uv_min.min(uv);
            bounds.uv_max = bounds.uv_max.max(uv);
            bounds.depth_min = bounds.depth_min.min(ndc.z);
            bounds.depth_max = bounds.depth_max.max(ndc.z);
        }
        Some(bounds)
    }

    pub fn fully_on_screen(&self) -> bool {
        self.uv_min.cmpge(Vec2::ZERO).all() && self.uv_max.cmple(Vec2::ONE).all()
    }

    /// Clips the rectangle to the viewport, `None` if nothing is left.
    pub fn clamp_to_screen(&self) -> Option<Self> {
        let uv_min = self.uv_min.max(Vec2::ZERO);
        let uv_max = self.uv_max.min(Vec2::ONE);
        if uv_min.cmpgt(uv_max).any() {
            return None;
        }
        Some(Self { uv_min, uv_max, ..*self })
    }

    /// Mip whose texels are about as large as the rectangle, offset by `bias`.
    pub fn select_mip(&self, base_size: UVec2, mip_count: u32, bias: i32) -> u32 {
        let extent = (self.uv_max - self.uv_min) * base_size.as_vec2();
        let longest = extent.x.max(extent.y).max(1.0);
        let level = longest.log2().ceil() as i32 + bias;
        level.clamp(0, mip_count as i32 - 1) as u32
    }

    /// Inclusive texel range covered at `level`.
    ///
    /// Goes through base level pixels so the last texel of an odd sized level
    /// picks up the pixels folded into it.
    pub fn texel_range(&self, base_size: UVec2, level: u32) -> (UVec2, UVec2) {
        let base = base_size.as_ivec2();
        let mip_size = (base >> level as i32).max(IVec2::ONE);
        let to_texel = |uv: Vec2| {
            let pixel = (uv * base.as_vec2()).floor().as_ivec2().clamp(IVec2::ZERO, base - 1);
            (pixel >> level as i32).min(mip_size - 1).as_uvec2()
        };
        (to_texel(self.uv_min), to_texel(self.uv_max))
    }

    pub fn classify(&self, occluder_depth: f32) -> OcclusionVerdict {
        if self.depth_min > occluder_depth {
            OcclusionVerdict::Occluded
        } else if self.depth_max <= occluder_depth {
            OcclusionVerdict::Visible
        } else {
            OcclusionVerdict::Ambiguous
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn view_proj() -> Mat4 {
        Mat4::perspective_lh(90_f32.to_radians(), 1.0, 1.0, 100.0) * Mat4::look_at_lh(Vec3::ZERO, Vec3::Z, Vec3::Y)
    }

    #[test]
    fn projection() {
        let bounds = ScreenBounds::project(view_proj(), &Cluster::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ONE)).unwrap();
        assert!(bounds.fully_on_screen());
        assert!(bounds.uv_min.x < 0.5 && bounds.uv_max.x > 0.5);
        assert!(bounds.depth_min < bounds.depth_max);
        assert!(bounds.depth_max < 1.0);
    }

    #[test]
    fn behind_eye_is_none() {
        assert!(ScreenBounds::project(view_proj(), &Cluster::new(Vec3::ZERO, Vec3::ONE)).is_none());
        assert!(ScreenBounds::project(view_proj(), &Cluster::new(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE)).is_none());
    }

    #[test]
    fn verdicts() {
        let bounds = ScreenBounds {
            uv_min: Vec2::ZERO,
            uv_max: Vec2::ONE,
            depth_min: 0.4,
            depth_max: 0.6,
        };
        assert_eq!(bounds.classify(0.3), OcclusionVerdict::Occluded);
        assert_eq!(bounds.classify(0.6), OcclusionVerdict::Visible);
        assert_eq!(bounds.classify(1.0), OcclusionVerdict::Visible);
        assert_eq!(bounds.classify(0.5), OcclusionVerdict::Ambiguous);
    }

    #[test]
    fn mip_selection() {
        let bounds = ScreenBounds {
            uv_min: Vec2::new(0.0, 0.0),
            uv_max: Vec2::new(0.25, 0.125),
            depth_min: 0.0,
            depth_max: 0.0,
        };
        // 16 pixels on a 64 wide base
        assert_eq!(bounds.select_mip(UVec2::new(64, 64), 7, 0), 4);
        assert_eq!(bounds.select_mip(UVec2::new(64, 64), 7, -1), 3);
        assert_eq!(bounds.select_mip(UVec2::new(64, 64), 3, 0), 2);
        assert_eq!(bounds.select_mip(UVec2::new(64, 64), 7, -8), 0);
    }

    #[test]
    fn texels_stay_in_odd_levels() {
        let bounds = ScreenBounds {
            uv_min: Vec2::new(0.45, 0.0),
            uv_max: Vec2::new(1.0, 1.0),
            depth_min: 0.0,
            depth_max: 0.0,
        };
        let (lo, hi) = bounds.texel_range(UVec2::new(5, 3), 1);
        assert_eq!(lo, UVec2::new(1, 0));
        assert_eq!(hi, UVec2::new(1, 0));
    }
}
