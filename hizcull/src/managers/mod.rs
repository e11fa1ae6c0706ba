//! Owned state: cameras, cluster storage, depth hierarchies, shadow bookkeeping.

mod camera;
pub mod cascade;
mod cluster;
mod hi_z;
mod light;
mod targets;

pub use camera::*;
pub use cluster::*;
pub use hi_z::*;
pub use light::*;
pub use targets::*;
