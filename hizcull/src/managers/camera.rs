use glam::{Mat4, Vec3, Vec4Swizzles};
use hizcull_types::{Camera, CameraProjection, CameraTransform, Handedness};

use crate::util::frustum::Frustum;

/// Manages the camera's location and projection settings.
#[derive(Debug, Clone)]
pub struct CameraManager {
    handedness: Handedness,
    proj: Mat4,
    inv_view: Mat4,
    data: Camera,
    aspect_ratio: f32,
}
impl CameraManager {
    /// Builds a new camera, using the given aspect ratio. If no aspect ratio is
    /// given it is assumed that no aspect ratio scaling should be done.
    pub fn new(data: Camera, handedness: Handedness, aspect_ratio: Option<f32>) -> Self {
        profiling::scope!("CameraManager::new");

        let aspect_ratio = aspect_ratio.unwrap_or(1.0);
        let proj = compute_projection_matrix(data, handedness, aspect_ratio);

        Self {
            handedness,
            proj,
            inv_view: data.view.inverse(),
            data,
            aspect_ratio,
        }
    }

    /// Builds a perspective camera from an explicit basis.
    pub fn from_transform(transform: &CameraTransform, handedness: Handedness) -> Self {
        let target = transform.position + transform.forward;
        let view = match handedness {
            Handedness::Left => Mat4::look_at_lh(transform.position, target, transform.up),
            Handedness::Right => Mat4::look_at_rh(transform.position, target, transform.up),
        };
        let camera = Camera {
            projection: CameraProjection::Perspective {
                vfov: transform.fov.to_degrees(),
                near: transform.near,
                far: transform.far,
            },
            view,
        };
        Self::new(camera, handedness, Some(transform.aspect))
    }

    pub fn set_data(&mut self, data: Camera) {
        self.set_aspect_data(data, self.aspect_ratio)
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: Option<f32>) {
        self.set_aspect_data(self.data, aspect_ratio.unwrap_or(1.0));
    }

    pub fn set_aspect_data(&mut self, data: Camera, aspect_ratio: f32) {
        self.proj = compute_projection_matrix(data, self.handedness, aspect_ratio);
        self.inv_view = data.view.inverse();
        self.data = data;
        self.aspect_ratio = aspect_ratio;
    }

    pub fn get_data(&self) -> Camera {
        self.data
    }

    pub fn handedness(&self) -> Handedness {
        self.handedness
    }

    pub fn view(&self) -> Mat4 {
        self.data.view
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.data.view
    }

    pub fn proj(&self) -> Mat4 {
        self.proj
    }

    pub fn location(&self) -> Vec3 {
        self.inv_view.w_axis.xyz()
    }

    /// World space up vector of the camera.
    pub fn up(&self) -> Vec3 {
        self.inv_view.y_axis.xyz().normalize_or_zero()
    }

    /// Culling frustum. Perspective cameras have no far plane.
    pub fn frustum(&self) -> Frustum {
        let include_far = !matches!(self.data.projection, CameraProjection::Perspective { .. });
        Frustum::from_matrix(self.view_proj(), include_far)
    }
}

fn compute_projection_matrix(data: Camera, handedness: Handedness, aspect_ratio: f32) -> Mat4 {
    match data.projection {
        CameraProjection::Orthographic { size } => {
            let half = size * 0.5;
            if handedness == Handedness::Left {
                Mat4::orthographic_lh(-half.x, half.x, -half.y, half.y, -half.z, half.z)
            } else {
                Mat4::orthographic_rh(-half.x, half.x, -half.y, half.y, -half.z, half.z)
            }
        }
        CameraProjection::Perspective { vfov, near, far } => {
            if handedness == Handedness::Left {
                Mat4::perspective_lh(vfov.to_radians(), aspect_ratio, near, far)
            } else {
                Mat4::perspective_rh(vfov.to_radians(), aspect_ratio, near, far)
            }
        }
        CameraProjection::Raw(proj) => proj,
    }
}
