#![warn(unsafe_op_in_unsafe_fn)]

//! Type declarations for the hizcull visibility pipeline.
//!
//! This is reexported in the hizcull crate proper and includes all the "surface"
//! api arguments, along with every structure whose layout is shared with the GPU.

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

use bytemuck::{Pod, Zeroable};
/// Reexport of the glam version hizcull is using.
pub use glam;
use glam::{Mat4, Vec3, Vec3A};
use serde::{Deserialize, Serialize};

/// Number of vertices stored per cluster in the vertex cache. Every four
/// vertices form one quad.
pub const CLUSTER_CLIP_COUNT: u32 = 256;
/// Number of vertices drawn per cluster instance (two triangles per quad).
pub const CLUSTER_VERTEX_COUNT: u32 = CLUSTER_CLIP_COUNT / 4 * 6;
/// Invocations per workgroup for every culling kernel.
pub const CULL_WORKGROUP_SIZE: u32 = 64;

/// Non-owning resource handle.
///
/// Stable identifier handed out by the owner of a resource table.
pub struct RawResourceHandle<T> {
    /// Underlying value of the handle.
    pub idx: usize,
    _phantom: PhantomData<T>,
}

impl<T> RawResourceHandle<T> {
    /// Creates a new handle with the given value
    pub const fn new(idx: usize) -> Self {
        Self {
            idx,
            _phantom: PhantomData,
        }
    }
}

// Need Debug/Copy/Clone impls that don't require T: Trait.
impl<T> Debug for RawResourceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResourceHandle").field("idx", &self.idx).finish()
    }
}

impl<T> Copy for RawResourceHandle<T> {}

impl<T> Clone for RawResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for RawResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for RawResourceHandle<T> {}

impl<T> Hash for RawResourceHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
    }
}

/// Marker for [`LightHandle`].
#[derive(Debug)]
pub enum Light {}

/// Stable identifier of a light, assigned by whoever owns the scene.
pub type LightHandle = RawResourceHandle<Light>;

/// A bounding box for one cluster of pre-tessellated geometry.
///
/// The box is in world space. The slot the cluster occupies in its
/// cluster buffer is its identity for every other buffer of the context.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Cluster {
    /// Center of the box.
    pub position: Vec3,
    pub _pad0: u32,
    /// Half size of the box along each axis.
    pub extent: Vec3,
    pub _pad1: u32,
}

impl Cluster {
    pub const fn new(position: Vec3, extent: Vec3) -> Self {
        Self {
            position,
            _pad0: 0,
            extent,
            _pad1: 0,
        }
    }

    /// Eight corners of the box, minimum corner first.
    pub fn corners(&self) -> [Vec3; 8] {
        let c = self.position;
        let e = self.extent;
        [
            c + Vec3::new(-e.x, -e.y, -e.z),
            c + Vec3::new(e.x, -e.y, -e.z),
            c + Vec3::new(-e.x, e.y, -e.z),
            c + Vec3::new(e.x, e.y, -e.z),
            c + Vec3::new(-e.x, -e.y, e.z),
            c + Vec3::new(e.x, -e.y, e.z),
            c + Vec3::new(-e.x, e.y, e.z),
            c + Vec3::new(e.x, e.y, e.z),
        ]
    }
}

/// One vertex of the cluster vertex cache.
///
/// The uv coordinate rides in what would otherwise be vec3 padding.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ClusterVertex {
    pub position: Vec3,
    pub u: f32,
    pub normal: Vec3,
    pub v: f32,
}

impl ClusterVertex {
    pub const fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position,
            u: 0.0,
            normal,
            v: 0.0,
        }
    }
}

/// Arguments of a non-indexed indirect draw.
///
/// Field order is fixed: `[vertex_count, instance_count, first_vertex, first_instance, reserved]`.
/// `instance_count` doubles as the visibility list's append counter.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct IndirectDrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
    pub reserved: u32,
}

impl IndirectDrawArgs {
    /// Value every draw argument buffer is created with.
    pub const INITIAL: Self = Self {
        vertex_count: CLUSTER_VERTEX_COUNT,
        instance_count: 0,
        first_vertex: 0,
        first_instance: 0,
        reserved: 0,
    };

    pub fn as_words(&self) -> [u32; 5] {
        bytemuck::cast(*self)
    }
}

/// Arguments of an indirect compute dispatch.
///
/// Field order is fixed: `[x, y, z, count, reserved]`. The first three words are
/// what the device reads, `count` is the append counter of the list feeding the
/// dispatch and `x` is kept at `ceil(count / CULL_WORKGROUP_SIZE)` by the kernel
/// doing the append.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct IndirectDispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub count: u32,
    pub reserved: u32,
}

impl IndirectDispatchArgs {
    /// Seeded so the first indirect dispatch ever issued is well formed.
    pub const INITIAL: Self = Self {
        x: 0,
        y: 1,
        z: 1,
        count: 0,
        reserved: 0,
    };

    pub fn as_words(&self) -> [u32; 5] {
        bytemuck::cast(*self)
    }
}

/// Describes how the camera should look at the scene.
#[derive(Debug, Default, Copy, Clone)]
pub struct Camera {
    pub projection: CameraProjection,
    /// View matrix
    pub view: Mat4,
}

/// Describes how the world should be projected into the camera.
#[derive(Debug, Copy, Clone)]
pub enum CameraProjection {
    Orthographic {
        /// Size assumes the location is at the center of the camera area.
        size: Vec3A,
    },
    Perspective {
        /// Vertical field of view in degrees.
        vfov: f32,
        /// Near plane distance.
        near: f32,
        /// Far plane distance.
        far: f32,
    },
    Raw(Mat4),
}

impl CameraProjection {
    /// Orthographic cameras cull against their far plane, perspective ones
    /// don't.
    pub fn is_orthographic(&self) -> bool {
        matches!(self, Self::Orthographic { .. })
    }
}

impl Default for CameraProjection {
    fn default() -> Self {
        Self::Perspective {
            vfov: 60.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// Explicit view parameters of a perspective camera.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraTransform {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Width over height.
    pub aspect: f32,
}

impl CameraTransform {
    /// Builds the orthonormal basis from a position and a look direction.
    pub fn looking_at(
        position: Vec3,
        forward: Vec3,
        world_up: Vec3,
        fov: f32,
        near: f32,
        far: f32,
        aspect: f32,
    ) -> Self {
        let forward = forward.normalize();
        let right = world_up.cross(forward).normalize();
        let up = forward.cross(right);
        Self {
            position,
            forward,
            right,
            up,
            fov,
            near,
            far,
            aspect,
        }
    }
}

/// Handedness of the coordinate system used.
///
/// For example
/// +X right, +Y up, +Z _into_ the screen is left handed.
/// +X right, +Y up, +Z _out of_ the screen is right handed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Handedness {
    #[default]
    Left,
    Right,
}

/// Kind of a light, which decides the shape of its shadow map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightKind {
    Directional,
    Spot,
    Point,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layouts() {
        assert_eq!(std::mem::size_of::<Cluster>(), 32);
        assert_eq!(std::mem::size_of::<ClusterVertex>(), 32);
        assert_eq!(std::mem::size_of::<IndirectDrawArgs>(), 20);
        assert_eq!(std::mem::size_of::<IndirectDispatchArgs>(), 20);
    }

    #[test]
    fn initial_args() {
        assert_eq!(IndirectDrawArgs::INITIAL.as_words(), [384, 0, 0, 0, 0]);
        assert_eq!(IndirectDispatchArgs::INITIAL.as_words(), [0, 1, 1, 0, 0]);
    }

    #[test]
    fn cluster_corners_span_extent() {
        let cluster = Cluster::new(Vec3::new(1.0, 2.0, 3.0), Vec3::splat(0.5));
        let corners = cluster.corners();
        assert_eq!(corners[0], Vec3::new(0.5, 1.5, 2.5));
        assert_eq!(corners[7], Vec3::new(1.5, 2.5, 3.5));
    }
}
