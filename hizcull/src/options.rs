use serde::{Deserialize, Serialize};

/// Tunables shared by every culling context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingOptions {
    /// Run the two-phase Hi-Z test. When off, frustum culling alone decides.
    pub occlusion: bool,
    /// When the camera's up vector turns so that its dot product with last
    /// frame's falls below this, last frame's depth is not trusted.
    pub camera_cut_threshold: f32,
    /// Mip offset used by the recheck, negative picks finer levels.
    pub recheck_mip_bias: i32,
    /// Largest context the host backend will allocate.
    pub max_cpu_capacity: u32,
}

impl Default for CullingOptions {
    fn default() -> Self {
        Self {
            occlusion: true,
            camera_cut_threshold: 0.9,
            recheck_mip_bias: -1,
            max_cpu_capacity: 1 << 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let options: CullingOptions = serde_json::from_str(r#"{ "camera_cut_threshold": 0.5 }"#).unwrap();
        assert_eq!(options.camera_cut_threshold, 0.5);
        assert!(options.occlusion);
        assert_eq!(options.recheck_mip_bias, -1);
    }
}
