//! Texel snapped orthographic fits of the camera frustum for cascaded shadows.

use glam::{DVec3, Mat4, Vec3, Vec3A, Vec4};
use hizcull_types::{Camera, CameraProjection, CameraTransform, Handedness};
use serde::{Deserialize, Serialize};

use crate::{managers::CameraManager, util::frustum::frustum_corners};

/// How the view frustum is split between cascades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeSettings {
    /// Split distances along the camera's forward axis, nearest first. Cascade
    /// `i` covers `splits[i]..splits[i + 1]`.
    pub splits: Vec<f32>,
    /// Width and height of each cascade's shadow map in texels.
    pub resolution: u32,
    /// Direction the light travels in.
    pub direction: Vec3,
    /// Depth bias handed to the shadow pass along with the direction.
    pub bias: f32,
}

impl CascadeSettings {
    pub fn cascade_count(&self) -> usize {
        self.splits.len().saturating_sub(1)
    }
}

/// Orthographic shadow camera bounding one slice of the view frustum.
#[derive(Debug, Clone)]
pub struct ShadowCascadeFit {
    pub corners: [Vec3; 8],
    pub centroid: Vec3,
    /// Bounding sphere radius of the corners, also the orthographic half size.
    pub radius: f32,
    /// Snapped centre of the shadow volume.
    pub center: Vec3,
    /// Where the shadow camera's near plane sits, backed off along the light.
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub camera: CameraManager,
}

impl ShadowCascadeFit {
    pub fn view_proj(&self) -> Mat4 {
        self.camera.view_proj()
    }
}

/// What the shadow pass of one cascade needs.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CascadeState {
    pub view_proj: Mat4,
    /// Light direction in xyz, bias in w.
    pub direction_bias: Vec4,
    /// Layer of the shadow map array this cascade renders to.
    pub layer: u32,
}

/// Up vector for the light space basis, away from the light direction.
fn light_up(direction: Vec3) -> Vec3 {
    if direction.normalize_or_zero().y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Fits an orthographic camera around `corners`.
///
/// `depth_range` is the extent of the shadow volume along the light, centred
/// on the corners. It is grown to at least the sphere diameter so no corner is
/// ever depth clipped.
pub fn fit_cascade(
    corners: [Vec3; 8],
    direction: Vec3,
    resolution: u32,
    depth_range: f32,
    handedness: Handedness,
) -> ShadowCascadeFit {
    let direction = direction.normalize_or_zero();

    let sum = corners.iter().fold(DVec3::ZERO, |sum, c| sum + c.as_dvec3());
    let centroid = sum / corners.len() as f64;
    let radius = corners
        .iter()
        .fold(0.0_f64, |radius, c| radius.max((c.as_dvec3() - centroid).length()));
    let centroid = centroid.as_vec3();
    let radius = radius as f32;

    let look_at = match handedness {
        Handedness::Left => Mat4::look_at_lh,
        Handedness::Right => Mat4::look_at_rh,
    };
    let up = light_up(direction);

    // Anchored at the origin, so the texel grid is fixed in world space.
    let origin_view = look_at(Vec3::ZERO, direction, up);
    let half_depth = (depth_range * 0.5).max(radius);
    let origin_proj = match handedness {
        Handedness::Left => Mat4::orthographic_lh(-radius, radius, -radius, radius, -half_depth, half_depth),
        Handedness::Right => Mat4::orthographic_rh(-radius, radius, -radius, radius, -half_depth, half_depth),
    };
    let origin_view_proj = origin_proj * origin_view;

    let clip = origin_view_proj.project_point3(centroid);
    let res = resolution.max(1) as f32;
    let uv = (clip.truncate() * 0.5 + 0.5) * res;
    let snapped_uv = (uv + 0.5).floor() / res;
    let snapped_clip = (snapped_uv * 2.0 - 1.0).extend(clip.z);
    let center = origin_view_proj.inverse().project_point3(snapped_clip);

    let camera = CameraManager::new(
        Camera {
            projection: CameraProjection::Orthographic {
                size: Vec3A::new(radius * 2.0, radius * 2.0, half_depth * 2.0),
            },
            view: look_at(center, center + direction, up),
        },
        handedness,
        None,
    );

    ShadowCascadeFit {
        corners,
        centroid,
        radius,
        center,
        position: center - direction * half_depth,
        near: 0.0,
        far: half_depth * 2.0,
        camera,
    }
}

/// Fits every cascade of `settings` to the camera.
pub fn fit_cascades(transform: &CameraTransform, settings: &CascadeSettings, handedness: Handedness) -> Vec<ShadowCascadeFit> {
    profiling::scope!("fit cascades");

    let corners = frustum_corners(transform, &settings.splits);
    corners
        .windows(8)
        .step_by(4)
        .map(|window| {
            let mut slice = [Vec3::ZERO; 8];
            slice.copy_from_slice(window);
            fit_cascade(slice, settings.direction, settings.resolution, transform.far, handedness)
        })
        .collect()
}

/// Per cascade state for the shadow pass, one layer per cascade.
pub fn cascade_states(fits: &[ShadowCascadeFit], settings: &CascadeSettings) -> Vec<CascadeState> {
    let direction = settings.direction.normalize_or_zero();
    fits.iter()
        .enumerate()
        .map(|(layer, fit)| CascadeState {
            view_proj: fit.view_proj(),
            direction_bias: direction.extend(settings.bias),
            layer: layer as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn settings() -> CascadeSettings {
        CascadeSettings {
            splits: vec![0.1, 10.0, 40.0, 100.0],
            resolution: 2048,
            direction: Vec3::new(0.3, -1.0, 0.2),
            bias: 0.005,
        }
    }

    fn transform(position: Vec3) -> CameraTransform {
        CameraTransform::looking_at(position, Vec3::new(0.0, -0.2, 1.0), Vec3::Y, 60_f32.to_radians(), 0.1, 100.0, 16.0 / 9.0)
    }

    #[test]
    fn one_fit_per_split() {
        let fits = fit_cascades(&transform(Vec3::ZERO), &settings(), Handedness::Left);
        assert_eq!(fits.len(), 3);
        let states = cascade_states(&fits, &settings());
        assert_eq!(states.iter().map(|s| s.layer).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(states[0].direction_bias.w, 0.005);
    }

    #[test]
    fn deterministic() {
        let a = fit_cascades(&transform(Vec3::new(3.3, 1.7, -8.1)), &settings(), Handedness::Left);
        let b = fit_cascades(&transform(Vec3::new(3.3, 1.7, -8.1)), &settings(), Handedness::Left);
        for (a, b) in a.iter().zip(&b) {
            assert_eq!(a.view_proj().to_cols_array(), b.view_proj().to_cols_array());
        }
    }

    #[test]
    fn corners_inside_volume() {
        for handedness in [Handedness::Left, Handedness::Right] {
            for fit in fit_cascades(&transform(Vec3::new(5.0, 2.0, 1.0)), &settings(), handedness) {
                for corner in fit.corners {
                    assert!((corner - fit.centroid).length() <= fit.radius * 1.0001);
                    let clip = fit.view_proj().project_point3(corner);
                    // snapping moves the volume by at most a texel
                    let slack = 2.0 / 2048.0 + 1e-4;
                    assert!(clip.x.abs() <= 1.0 + slack, "{clip}");
                    assert!(clip.y.abs() <= 1.0 + slack, "{clip}");
                    assert!((-1e-4..=1.0001).contains(&clip.z), "{clip}");
                }
            }
        }
    }

    #[test]
    fn snaps_to_texel_grid() {
        let settings = settings();
        let a = fit_cascades(&transform(Vec3::ZERO), &settings, Handedness::Left);
        let b = fit_cascades(&transform(Vec3::new(0.013, 0.0, 0.021)), &settings, Handedness::Left);
        for (a, b) in a.iter().zip(&b) {
            assert_abs_diff_eq!(a.radius, b.radius, epsilon = 1e-3);
            let direction = settings.direction.normalize();
            let view = Mat4::look_at_lh(Vec3::ZERO, direction, light_up(direction));
            let texel = a.radius * 2.0 / settings.resolution as f32;
            let delta = view.transform_vector3(b.center - a.center) / texel;
            assert_abs_diff_eq!(delta.x, delta.x.round(), epsilon = 0.05);
            assert_abs_diff_eq!(delta.y, delta.y.round(), epsilon = 0.05);
        }
    }
}
