//! Frustums, planes and bounding volumes.
//!
//! Plane extraction follows <https://www.gamedevs.org/uploads/fast-extraction-viewing-frustum-planes-from-world-view-projection-matrix.pdf>,
//! adjusted for a `[0, 1]` clip space depth range.

use arrayvec::ArrayVec;
use glam::{Mat4, Vec3, Vec3A, Vec4, Vec4Swizzles};
use hizcull_types::CameraTransform;

/// Represents a point in space and a radius from that point.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, align(16))]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}
impl BoundingSphere {
    pub fn from_points(points: &[Vec3]) -> Self {
        let center = find_center(points);
        let radius = points
            .iter()
            .fold(0.0_f32, |distance, pos| distance.max((Vec3A::from(*pos) - center).length()));

        Self {
            center: Vec3::from(center),
            radius,
        }
    }
}

fn find_center(points: &[Vec3]) -> Vec3A {
    let first = if let Some(first) = points.first() {
        *first
    } else {
        return Vec3A::ZERO;
    };
    let mut max = Vec3A::from(first);
    let mut min = max;

    for pos in points.iter().skip(1) {
        let pos = Vec3A::from(*pos);
        max = max.max(pos);
        min = min.min(pos);
    }

    (max + min) / 2.0
}

/// Represents a plane as a vec4 (or vec3 + f32).
///
/// Normals point into the frustum, so positive distances are inside.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(C, align(16))]
pub struct Plane {
    pub abc: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            abc: Vec3::new(a, b, c),
            d,
        }
    }

    pub fn from_vec4(v: Vec4) -> Self {
        Self { abc: v.xyz(), d: v.w }
    }

    pub fn to_vec4(self) -> Vec4 {
        self.abc.extend(self.d)
    }

    pub fn normalize(mut self) -> Self {
        let mag = self.abc.length();

        self.abc /= mag;
        self.d /= mag;

        self
    }

    pub fn distance(self, point: Vec3) -> f32 {
        self.abc.dot(point) + self.d
    }

    /// True if the axis aligned box lies entirely behind the plane.
    pub fn box_outside(self, center: Vec3, extent: Vec3) -> bool {
        self.distance(center) < -self.abc.abs().dot(extent)
    }
}

/// A frustum of 5 or 6 inward facing planes.
///
/// Perspective frustums leave out the far plane, orthographic ones keep it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    planes: ArrayVec<Plane, 6>,
}

impl Frustum {
    /// Extracts the planes of a view projection matrix. The far plane is only
    /// kept if `include_far` is set.
    pub fn from_matrix(matrix: Mat4, include_far: bool) -> Self {
        let row0 = matrix.row(0);
        let row1 = matrix.row(1);
        let row2 = matrix.row(2);
        let row3 = matrix.row(3);

        let mut planes = ArrayVec::new();
        planes.push(Plane::from_vec4(row3 + row0).normalize()); // left
        planes.push(Plane::from_vec4(row3 - row0).normalize()); // right
        planes.push(Plane::from_vec4(row3 + row1).normalize()); // bottom
        planes.push(Plane::from_vec4(row3 - row1).normalize()); // top
        // depth is [0, 1] so the near plane is z >= 0
        planes.push(Plane::from_vec4(row2).normalize());
        if include_far {
            planes.push(Plane::from_vec4(row3 - row2).normalize());
        }

        Self { planes }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Planes padded out to 6 entries, for upload.
    pub fn padded_planes(&self) -> [Vec4; 6] {
        let mut out = [Vec4::ZERO; 6];
        for (dst, plane) in out.iter_mut().zip(&self.planes) {
            *dst = plane.to_vec4();
        }
        out
    }

    /// Determines if the axis aligned box is at all inside the frustum.
    ///
    /// Conservative: a box straddling two planes near a corner may pass.
    pub fn contains_box(&self, center: Vec3, extent: Vec3) -> bool {
        self.planes.iter().all(|plane| !plane.box_outside(center, extent))
    }

    /// Determines if a box with the given half extents, placed by `transform`,
    /// is at all inside the frustum.
    pub fn contains_oriented_box(&self, transform: Mat4, extent: Vec3) -> bool {
        let right = transform.x_axis.xyz();
        let up = transform.y_axis.xyz();
        let forward = transform.z_axis.xyz();
        let position = transform.w_axis.xyz();

        self.planes.iter().all(|plane| {
            let radius = plane.abc.dot(right).abs() * extent.x
                + plane.abc.dot(up).abs() * extent.y
                + plane.abc.dot(forward).abs() * extent.z;
            plane.distance(position) >= -radius
        })
    }

    /// Determines if the sphere is at all inside the frustum.
    pub fn contains_sphere(&self, sphere: BoundingSphere) -> bool {
        let neg_radius = -sphere.radius;
        self.planes.iter().all(|plane| plane.distance(sphere.center) >= neg_radius)
    }
}

/// Corners of the camera frustum cross section at each of `distances`,
/// four per distance.
///
/// Order within a cross section is up-right, up-left, down-right, down-left.
/// `distances` are measured along the camera's forward axis.
pub fn frustum_corners(transform: &CameraTransform, distances: &[f32]) -> Vec<Vec3> {
    let half_tan = (transform.fov * 0.5).tan();
    let mut corners = Vec::with_capacity(distances.len() * 4);
    for &distance in distances {
        let center = transform.position + transform.forward * distance;
        let up = transform.up * (half_tan * distance);
        let right = transform.right * (half_tan * distance * transform.aspect);
        corners.push(center + right + up);
        corners.push(center - right + up);
        corners.push(center + right - up);
        corners.push(center - right - up);
    }
    corners
}

/// Near and far cross sections of the camera frustum.
pub fn frustum_corners_near_far(transform: &CameraTransform) -> [Vec3; 8] {
    let corners = frustum_corners(transform, &[transform.near, transform.far]);
    let mut out = [Vec3::ZERO; 8];
    out.copy_from_slice(&corners);
    out
}

/// Corners of a clip space volume, unprojected through `inv_view_proj`.
///
/// `depths` are clip space depths in `[0, 1]`. Corners go counter clockwise
/// from the bottom left of the viewport.
pub fn viewport_corners(inv_view_proj: Mat4, depths: &[f32]) -> Vec<Vec3> {
    const VIEWPORT: [[f32; 2]; 4] = [[-1.0, -1.0], [-1.0, 1.0], [1.0, 1.0], [1.0, -1.0]];
    let mut corners = Vec::with_capacity(depths.len() * 4);
    for &depth in depths {
        for [x, y] in VIEWPORT {
            corners.push(inv_view_proj.project_point3(Vec3::new(x, y, depth)));
        }
    }
    corners
}
