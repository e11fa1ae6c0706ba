//! Explicit, validated pass lists for a frame of culling.
//!
//! Each backend has one executor walking a [`CullPipeline`] in order. Passes
//! never call each other; all ordering lives in the list.

use crate::{error::PipelineError, options::CullingOptions};

/// Queue a pass is recorded on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum QueueKind {
    #[default]
    Graphics,
    Compute,
}

/// Every buffer or image a pass can touch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CullResource {
    Uniforms,
    Clusters,
    VertexCache,
    Visibility,
    DrawArgs,
    Candidates,
    DispatchArgs,
    RecheckFlags,
    RecheckList,
    RecheckArgs,
    /// The current frame's depth and the pyramid built from it.
    DepthPyramid,
    /// The pyramid and camera left behind by the previous frame.
    HiZHistory,
}

impl CullResource {
    /// Resources whose contents carry over between frames and may be read
    /// without being written first.
    pub fn persistent(self) -> bool {
        matches!(
            self,
            Self::Uniforms | Self::Clusters | Self::VertexCache | Self::RecheckFlags | Self::HiZHistory
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CullPass {
    /// Resets every append counter and the dispatch seeds.
    ClearArgs,
    /// Zeroes every recheck flag.
    ClearRecheckFlags,
    /// Frustum test appending straight to the visibility list.
    FrustumCull,
    /// Frustum test appending to the occlusion candidates.
    FrustumFilter,
    /// Tests candidates against last frame's depth.
    OcclusionTest,
    /// Renders the confirmed clusters into the base of the pyramid.
    DrawDepth,
    BuildDepthPyramid,
    /// Tests the queued clusters against this frame's depth.
    OcclusionRecheck,
    /// The single indirect draw.
    Draw,
    /// Rebuilds the pyramid from the final depth and records the camera.
    StoreHistory,
    /// Orders work between queues.
    Fence,
}

impl CullPass {
    pub fn reads(self) -> &'static [CullResource] {
        use CullResource::*;
        match self {
            Self::ClearArgs | Self::ClearRecheckFlags | Self::Fence => &[],
            Self::FrustumCull => &[Uniforms, Clusters, DrawArgs],
            Self::FrustumFilter => &[Uniforms, Clusters, DispatchArgs],
            Self::OcclusionTest => &[
                Uniforms,
                Clusters,
                Candidates,
                DispatchArgs,
                HiZHistory,
                RecheckFlags,
                DrawArgs,
                RecheckArgs,
            ],
            Self::DrawDepth | Self::Draw => &[Uniforms, Visibility, DrawArgs, VertexCache],
            Self::BuildDepthPyramid | Self::StoreHistory => &[DepthPyramid],
            Self::OcclusionRecheck => &[
                Uniforms,
                Clusters,
                RecheckList,
                RecheckArgs,
                RecheckFlags,
                DepthPyramid,
                DrawArgs,
            ],
        }
    }

    pub fn writes(self) -> &'static [CullResource] {
        use CullResource::*;
        match self {
            Self::Fence => &[],
            Self::ClearArgs => &[DrawArgs, DispatchArgs, RecheckArgs],
            Self::ClearRecheckFlags => &[RecheckFlags],
            Self::FrustumCull => &[Visibility, DrawArgs],
            Self::FrustumFilter => &[Candidates, DispatchArgs],
            Self::OcclusionTest => &[Visibility, DrawArgs, RecheckFlags, RecheckList, RecheckArgs],
            Self::DrawDepth | Self::BuildDepthPyramid | Self::Draw => &[DepthPyramid],
            Self::OcclusionRecheck => &[Visibility, DrawArgs, RecheckFlags],
            Self::StoreHistory => &[DepthPyramid, HiZHistory],
        }
    }

    /// Passes that can't run without a depth hierarchy.
    pub fn needs_hi_z(self) -> bool {
        matches!(
            self,
            Self::OcclusionTest | Self::DrawDepth | Self::BuildDepthPyramid | Self::OcclusionRecheck | Self::StoreHistory
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PassDescriptor {
    pub pass: CullPass,
    pub queue: QueueKind,
}

impl PassDescriptor {
    pub fn new(pass: CullPass) -> Self {
        Self {
            pass,
            queue: QueueKind::Graphics,
        }
    }

    pub fn on(self, queue: QueueKind) -> Self {
        Self { queue, ..self }
    }
}

/// Ordered list of passes making up one frame of culling for one context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CullPipeline {
    passes: Vec<PassDescriptor>,
}

impl CullPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two-phase occlusion culling, all on the graphics queue.
    pub fn occlusion() -> Self {
        Self::from_passes(&[
            CullPass::ClearArgs,
            CullPass::FrustumFilter,
            CullPass::OcclusionTest,
            CullPass::DrawDepth,
            CullPass::BuildDepthPyramid,
            CullPass::OcclusionRecheck,
            CullPass::Draw,
            CullPass::StoreHistory,
        ])
    }

    /// Frustum culling and the draw, no depth hierarchy involved.
    pub fn frustum_only() -> Self {
        Self::from_passes(&[CullPass::ClearArgs, CullPass::FrustumCull, CullPass::Draw])
    }

    /// Canonical list for the given options. `flags_reset` adds a clear of the
    /// recheck flags, needed whenever the cluster count changed.
    pub fn for_options(options: &CullingOptions, flags_reset: bool) -> Self {
        if !options.occlusion {
            return Self::frustum_only();
        }
        let pipeline = Self::occlusion();
        if flags_reset {
            pipeline.with_recheck_flag_reset()
        } else {
            pipeline
        }
    }

    pub fn from_passes(passes: &[CullPass]) -> Self {
        Self {
            passes: passes.iter().copied().map(PassDescriptor::new).collect(),
        }
    }

    /// Inserts a recheck flag clear right after the argument clear.
    pub fn with_recheck_flag_reset(mut self) -> Self {
        if self.contains(CullPass::ClearRecheckFlags) {
            return self;
        }
        let at = self
            .passes
            .iter()
            .position(|d| d.pass == CullPass::ClearArgs)
            .map_or(0, |idx| idx + 1);
        self.passes.insert(at, PassDescriptor::new(CullPass::ClearRecheckFlags));
        self
    }

    pub fn push(&mut self, descriptor: PassDescriptor) -> &mut Self {
        self.passes.push(descriptor);
        self
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    pub fn contains(&self, pass: CullPass) -> bool {
        self.passes.iter().any(|d| d.pass == pass)
    }

    /// First pass that needs a depth hierarchy, if any.
    pub fn first_hi_z_user(&self) -> Option<CullPass> {
        self.passes.iter().map(|d| d.pass).find(|p| p.needs_hi_z())
    }

    /// Checks the list can run as ordered.
    ///
    /// - frame local resources are written before they are read,
    /// - last frame's depth is read before anything overwrites it,
    /// - a read of something produced on another queue has a fence in between,
    /// - there is exactly one draw.
    pub fn validate(&self) -> Result<(), PipelineError> {
        profiling::scope!("CullPipeline::validate");

        let draws = self.passes.iter().filter(|d| d.pass == CullPass::Draw).count();
        if draws != 1 {
            return Err(PipelineError::DrawCount(draws));
        }

        // (index, pass, queue) of the latest writer of each resource.
        let mut writers: Vec<(CullResource, usize, PassDescriptor)> = Vec::new();
        let last_writer = |writers: &[(CullResource, usize, PassDescriptor)], resource| {
            writers.iter().rev().find(|(r, _, _)| *r == resource).map(|&(_, i, d)| (i, d))
        };

        for (index, descriptor) in self.passes.iter().enumerate() {
            let pass = descriptor.pass;
            for &resource in pass.reads() {
                if resource == CullResource::HiZHistory {
                    let overwritten = writers
                        .iter()
                        .find(|(r, _, _)| matches!(r, CullResource::DepthPyramid | CullResource::HiZHistory));
                    if let Some(&(_, _, writer)) = overwritten {
                        return Err(PipelineError::StaleHistoryRead {
                            pass,
                            resource,
                            writer: writer.pass,
                        });
                    }
                }

                match last_writer(&writers, resource) {
                    None if !resource.persistent() => {
                        return Err(PipelineError::ReadBeforeWrite { pass, resource });
                    }
                    Some((writer_index, writer)) if writer.queue != descriptor.queue => {
                        let fenced = self.passes[writer_index + 1..index]
                            .iter()
                            .any(|d| d.pass == CullPass::Fence);
                        if !fenced {
                            return Err(PipelineError::MissingFence {
                                producer: writer.pass,
                                consumer: pass,
                                resource,
                            });
                        }
                    }
                    _ => {}
                }
            }
            for &resource in pass.writes() {
                writers.push((resource, index, *descriptor));
            }
        }

        Ok(())
    }
}
