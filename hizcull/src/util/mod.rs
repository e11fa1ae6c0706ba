//! Utilities shared by the host and device backends.

pub mod atomic;
pub mod bind_merge;
pub mod cluster_mesh;
pub mod error_scope;
pub mod frustum;
pub mod math;
pub mod occlusion;
pub mod raster;
pub mod sorted;
pub mod typedefs;
