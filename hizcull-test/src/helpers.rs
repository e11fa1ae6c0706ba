use glam::{Mat4, Vec3};
use hizcull::{
    managers::CameraManager,
    types::{Camera, CameraProjection, Cluster, Handedness},
};

/// Perspective camera at `eye` looking at `target`, square aspect.
pub fn perspective_camera(eye: Vec3, target: Vec3, up: Vec3, vfov: f32) -> CameraManager {
    CameraManager::new(
        Camera {
            projection: CameraProjection::Perspective {
                vfov,
                near: 0.1,
                far: 100.0,
            },
            view: Mat4::look_at_lh(eye, target, up),
        },
        Handedness::Left,
        Some(1.0),
    )
}

/// The camera most tests use: five units back from the origin, looking at it.
pub fn default_camera() -> CameraManager {
    perspective_camera(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, Vec3::Y, 60.0)
}

/// A thin slab at the origin covering the middle of the default camera's view.
pub fn wall() -> Cluster {
    Cluster::new(Vec3::ZERO, Vec3::new(1.5, 1.5, 0.1))
}

/// A small box straight behind [`wall`].
pub fn behind_wall() -> Cluster {
    Cluster::new(Vec3::new(0.0, 0.0, 5.0), Vec3::splat(0.3))
}
