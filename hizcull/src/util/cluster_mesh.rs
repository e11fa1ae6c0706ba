//! Vertex caches for boxes, for callers without their own cluster geometry.

use glam::{Vec2, Vec3};
use hizcull_types::{Cluster, ClusterVertex, CLUSTER_CLIP_COUNT};

/// Quads along each edge of a box face.
pub const BOX_FACE_DIVISIONS: u32 = 3;

/// Tessellates the surface of `cluster` into the `CLUSTER_CLIP_COUNT` vertices
/// of a vertex cache, four per quad.
///
/// Every face becomes a grid of `BOX_FACE_DIVISIONS` squared quads. Quads
/// left over are collapsed onto the center, so they cover nothing.
pub fn box_vertices(cluster: &Cluster) -> Vec<ClusterVertex> {
    let mut vertices = Vec::with_capacity(CLUSTER_CLIP_COUNT as usize);
    let step = 1.0 / BOX_FACE_DIVISIONS as f32;

    for axis in 0..3 {
        for sign in [-1.0_f32, 1.0] {
            let normal = Vec3::AXES[axis] * sign;
            let u_axis = Vec3::AXES[(axis + 1) % 3];
            let v_axis = Vec3::AXES[(axis + 2) % 3];

            for j in 0..BOX_FACE_DIVISIONS {
                for i in 0..BOX_FACE_DIVISIONS {
                    for offset in [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)] {
                        let uv = (Vec2::new(i as f32, j as f32) + offset) * step;
                        let local = normal + u_axis * (uv.x * 2.0 - 1.0) + v_axis * (uv.y * 2.0 - 1.0);
                        vertices.push(ClusterVertex {
                            position: cluster.position + local * cluster.extent,
                            u: uv.x,
                            normal,
                            v: uv.y,
                        });
                    }
                }
            }
        }
    }

    vertices.resize(
        CLUSTER_CLIP_COUNT as usize,
        ClusterVertex::new(cluster.position, Vec3::Y),
    );
    vertices
}

/// Vertex caches for every cluster, concatenated in order.
pub fn box_vertex_cache(clusters: &[Cluster]) -> Vec<ClusterVertex> {
    clusters.iter().flat_map(box_vertices).collect()
}
