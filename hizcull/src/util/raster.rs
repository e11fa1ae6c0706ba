//! Host depth buffers and a small depth-only triangle rasterizer.

use glam::{Mat4, UVec2, Vec2, Vec3};

/// Clip space `w` below this is treated as behind the eye.
pub const MIN_CLIP_W: f32 = 1e-6;

/// Single channel depth image, row major, `[0, 1]` depth with 1 being far.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    size: UVec2,
    data: Vec<f32>,
}

impl DepthImage {
    /// Image cleared to the far plane.
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            data: vec![1.0; (size.x * size.y) as usize],
        }
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn clear(&mut self, depth: f32) {
        self.data.fill(depth);
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.size.x + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, depth: f32) {
        self.data[(y * self.size.x + x) as usize] = depth;
    }

    /// Builds the next level of a max-depth chain.
    ///
    /// Each texel takes the farthest of its 2x2 footprint. On odd sized sources
    /// the last row or column of texels also takes in the row or column left
    /// over, so every source texel is covered.
    pub fn downsample_max(&self) -> Self {
        let dst_size = (self.size / 2).max(UVec2::ONE);
        let mut dst = Self::new(dst_size);
        for y in 0..dst_size.y {
            for x in 0..dst_size.x {
                let span_x = if x == dst_size.x - 1 && self.size.x % 2 == 1 { 3 } else { 2 };
                let span_y = if y == dst_size.y - 1 && self.size.y % 2 == 1 { 3 } else { 2 };
                let mut far = 0.0_f32;
                for sy in 0..span_y {
                    for sx in 0..span_x {
                        let src_x = (x * 2 + sx).min(self.size.x - 1);
                        let src_y = (y * 2 + sy).min(self.size.y - 1);
                        far = far.max(self.get(src_x, src_y));
                    }
                }
                dst.set(x, y, far);
            }
        }
        dst
    }

    /// Rasterizes one triangle with a less-or-equal depth test, the same test
    /// the device draws use, and returns how many pixels passed it.
    ///
    /// There is no clipping: triangles with a vertex behind the eye are skipped,
    /// as are degenerate ones. Pixels are sampled at their centers.
    pub fn draw_triangle(&mut self, view_proj: Mat4, triangle: [Vec3; 3]) -> u32 {
        let mut screen = [Vec3::ZERO; 3];
        for (out, vertex) in screen.iter_mut().zip(triangle) {
            let clip = view_proj * vertex.extend(1.0);
            if clip.w <= MIN_CLIP_W {
                return 0;
            }
            let ndc = clip.truncate() / clip.w;
            *out = Vec3::new(
                (ndc.x * 0.5 + 0.5) * self.size.x as f32,
                (0.5 - ndc.y * 0.5) * self.size.y as f32,
                ndc.z,
            );
        }

        let [v0, v1, v2] = screen;
        let area = edge(v0.truncate(), v1.truncate(), v2.truncate());
        if area.abs() <= f32::EPSILON {
            return 0;
        }

        let min = v0.min(v1).min(v2).truncate();
        let max = v0.max(v1).max(v2).truncate();
        let size = self.size.as_vec2();
        if max.x < 0.0 || max.y < 0.0 || min.x >= size.x || min.y >= size.y {
            return 0;
        }
        let start = min.max(Vec2::ZERO).floor().as_uvec2();
        let end = max.min(size - 1.0).ceil().as_uvec2().min(self.size - 1);

        let mut passed = 0;
        for y in start.y..=end.y {
            for x in start.x..=end.x {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(v1.truncate(), v2.truncate(), p) / area;
                let w1 = edge(v2.truncate(), v0.truncate(), p) / area;
                let w2 = edge(v0.truncate(), v1.truncate(), p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let depth = w0 * v0.z + w1 * v1.z + w2 * v2.z;
                if !(0.0..=1.0).contains(&depth) {
                    continue;
                }
                if depth <= self.get(x, y) {
                    self.set(x, y, depth);
                    passed += 1;
                }
            }
        }
        passed
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}
