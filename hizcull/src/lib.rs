//! GPU driven cluster visibility: frustum culling and two-phase hierarchical-Z
//! occlusion culling feeding a single indirect draw, plus shadow cascade fitting
//! built on the same frustum primitives.
//!
//! This crate owns device setup and every piece of persistent state: cluster
//! buffers, depth hierarchies, cameras and shadow bookkeeping. The passes
//! themselves are executed by `hizcull-routine`, either on the device or on
//! the host, from an explicit [`CullPipeline`].
//!
//! # Frame order
//!
//! With occlusion enabled a frame is
//!
//! 1. clear the append counters,
//! 2. frustum test every cluster, appending survivors to the candidate list,
//! 3. test candidates against last frame's depth pyramid. Confirmed clusters go
//!    to the visibility list, everything else is queued for a recheck,
//! 4. draw the confirmed clusters' depth and build a pyramid from it,
//! 5. recheck the queue against that pyramid with this frame's camera,
//! 6. draw every visible cluster with one indirect draw,
//! 7. rebuild the pyramid and keep it, with the camera, for the next frame.
//!
//! Counts never leave the device: every list is appended to through an atomic
//! counter inside the argument buffer of the pass that consumes it.

pub use hizcull_types as types;

pub use error::*;
pub use mode::*;
pub use options::*;
pub use pass::*;
pub use setup::*;
pub use shader::{ShaderConfig, ShaderPreProcessor};
pub use uniforms::*;

mod error;
pub mod managers;
mod mode;
mod options;
mod pass;
mod setup;
mod shader;
mod uniforms;
/// Utilities and isolated bits of functionality that need a home.
pub mod util;
