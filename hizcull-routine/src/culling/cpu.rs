//! Host executor. Kernels run one rayon task per workgroup over the atomic
//! host buffers, depth passes go through the software rasterizer.

use glam::Mat4;
use hizcull::{
    managers::{ClusterBuffer, DepthPyramid, HiZOcclusionData, HostClusterBuffers},
    types::{Cluster, IndirectDispatchArgs, IndirectDrawArgs, CLUSTER_CLIP_COUNT, CULL_WORKGROUP_SIZE},
    util::{
        atomic::AtomicBuffer,
        frustum::Plane,
        math::round_up_div,
        occlusion::{OcclusionVerdict, ScreenBounds},
        raster::DepthImage,
    },
    CullError, CullPass, CullPipeline, CullUniforms, PipelineError,
};
use rayon::prelude::*;

use crate::culling::{check_frame, frame_uniforms, CullFrame};

// Word offsets into the argument buffers.
const DRAW_INSTANCE_COUNT: usize = 1;
const DISPATCH_X: usize = 0;
const DISPATCH_COUNT: usize = 3;

/// Runs a [`CullPipeline`] against host storage.
#[derive(Debug, Clone)]
pub struct CpuCullExecutor {
    workgroup_size: u32,
}

impl Default for CpuCullExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuCullExecutor {
    pub fn new() -> Self {
        Self {
            workgroup_size: CULL_WORKGROUP_SIZE,
        }
    }

    /// Executes one frame for `context`.
    ///
    /// `target` receives the final draw. Without one the draw goes to the
    /// base of the depth hierarchy, so at least one of the two is needed.
    pub fn execute(
        &self,
        pipeline: &CullPipeline,
        context: &mut ClusterBuffer,
        mut hi_z: Option<&mut HiZOcclusionData>,
        mut target: Option<&mut DepthImage>,
        frame: &CullFrame<'_>,
    ) -> Result<(), CullError> {
        profiling::scope!("CpuCullExecutor::execute");

        check_frame(pipeline, context, hi_z.as_deref(), target.is_some())?;
        let uniforms = frame_uniforms(frame, context, hi_z.as_deref());

        let buffers = context.storage()?.as_cpu().ok_or(CullError::ModeMismatch)?;
        if let Some(data) = hi_z.as_deref() {
            data.pyramid().as_cpu().ok_or(CullError::ModeMismatch)?;
        }

        let mut depth_drawn = false;
        let mut flags_cleared = false;
        let mut store_history = false;
        for descriptor in pipeline.passes() {
            let pass = descriptor.pass;
            log::trace!("{}: {pass:?} on host", context.label());

            match pass {
                CullPass::ClearArgs => clear_args(buffers),
                CullPass::ClearRecheckFlags => {
                    buffers.recheck_flags.fill(0);
                    flags_cleared = true;
                }
                CullPass::FrustumCull => self.frustum_cull(buffers, &uniforms),
                CullPass::FrustumFilter => self.frustum_filter(buffers, &uniforms),
                CullPass::OcclusionTest => self.occlusion_test(buffers, &uniforms, host_pyramid(&hi_z, pass)?),
                CullPass::DrawDepth => {
                    let base = host_pyramid_mut(&mut hi_z, pass)?.base_mut();
                    base.clear(1.0);
                    rasterize_visible(base, buffers, uniforms.view_proj);
                    depth_drawn = true;
                }
                CullPass::BuildDepthPyramid => host_pyramid_mut(&mut hi_z, pass)?.rebuild(),
                CullPass::OcclusionRecheck => {
                    self.occlusion_recheck(buffers, &uniforms, host_pyramid(&hi_z, pass)?)
                }
                CullPass::Draw => match target.as_deref_mut() {
                    Some(image) => {
                        image.clear(1.0);
                        rasterize_visible(image, buffers, uniforms.view_proj);
                    }
                    None => {
                        let base = host_pyramid_mut(&mut hi_z, pass)?.base_mut();
                        if !depth_drawn {
                            base.clear(1.0);
                        }
                        rasterize_visible(base, buffers, uniforms.view_proj);
                    }
                },
                CullPass::StoreHistory => {
                    host_pyramid_mut(&mut hi_z, pass)?.rebuild();
                    store_history = true;
                }
                CullPass::Fence => log::trace!("Fence between host passes, nothing to wait on"),
            }
        }

        if flags_cleared {
            context.mark_flags_reset();
        }
        if let (true, Some(data)) = (store_history, hi_z) {
            data.record_history(uniforms.view_proj, frame.camera.up());
        }

        Ok(())
    }

    /// Runs `invocation` for every global invocation id of `groups` workgroups.
    fn dispatch(&self, groups: u32, invocation: impl Fn(u32) + Sync) {
        let size = self.workgroup_size;
        (0..groups).into_par_iter().for_each(|group| {
            for local in 0..size {
                invocation(group * size + local);
            }
        });
    }

    fn frustum_cull(&self, buffers: &HostClusterBuffers, uniforms: &CullUniforms) {
        profiling::scope!("frustum cull");

        let count = uniforms.cluster_count;
        self.dispatch(round_up_div(count, self.workgroup_size), |slot| {
            if slot >= count {
                return;
            }
            if cluster_in_frustum(uniforms, &buffers.clusters[slot as usize]) {
                append_visible(buffers, slot);
            }
        });
    }

    fn frustum_filter(&self, buffers: &HostClusterBuffers, uniforms: &CullUniforms) {
        profiling::scope!("frustum filter");

        let count = uniforms.cluster_count;
        self.dispatch(round_up_div(count, self.workgroup_size), |slot| {
            if slot >= count {
                return;
            }
            if cluster_in_frustum(uniforms, &buffers.clusters[slot as usize]) {
                append_dispatch(&buffers.candidates, &buffers.dispatch_args, self.workgroup_size, slot);
            }
        });
    }

    fn occlusion_test(&self, buffers: &HostClusterBuffers, uniforms: &CullUniforms, pyramid: &DepthPyramid) {
        profiling::scope!("occlusion test");

        let groups = buffers.dispatch_args.load(DISPATCH_X);
        let count = buffers.dispatch_args.load(DISPATCH_COUNT);
        self.dispatch(groups, |index| {
            if index >= count {
                return;
            }
            let slot = buffers.candidates.load(index as usize);
            let cluster = &buffers.clusters[slot as usize];
            if history_verdict(uniforms, pyramid, cluster) == OcclusionVerdict::Visible {
                append_visible(buffers, slot);
                return;
            }

            buffers.recheck_flags.store(slot as usize, 1);
            append_dispatch(&buffers.recheck_list, &buffers.recheck_args, self.workgroup_size, slot);
        });
    }

    fn occlusion_recheck(&self, buffers: &HostClusterBuffers, uniforms: &CullUniforms, pyramid: &DepthPyramid) {
        profiling::scope!("occlusion recheck");

        let groups = buffers.recheck_args.load(DISPATCH_X);
        let count = buffers.recheck_args.load(DISPATCH_COUNT);
        self.dispatch(groups, |index| {
            if index >= count {
                return;
            }
            let slot = buffers.recheck_list.load(index as usize);
            if buffers.recheck_flags.swap(slot as usize, 0) == 0 {
                return;
            }
            let cluster = &buffers.clusters[slot as usize];
            if current_verdict(uniforms, pyramid, cluster) != OcclusionVerdict::Occluded {
                append_visible(buffers, slot);
            }
        });
    }
}

fn clear_args(buffers: &HostClusterBuffers) {
    buffers.draw_args.write(0, &IndirectDrawArgs::INITIAL.as_words());
    buffers.dispatch_args.write(0, &IndirectDispatchArgs::INITIAL.as_words());
    buffers.recheck_args.write(0, &IndirectDispatchArgs::INITIAL.as_words());
}

fn host_pyramid<'a>(hi_z: &'a Option<&mut HiZOcclusionData>, pass: CullPass) -> Result<&'a DepthPyramid, CullError> {
    let data = hi_z.as_deref().ok_or(PipelineError::MissingHiZ(pass))?;
    data.pyramid().as_cpu().ok_or(CullError::ModeMismatch)
}

fn host_pyramid_mut<'a>(
    hi_z: &'a mut Option<&mut HiZOcclusionData>,
    pass: CullPass,
) -> Result<&'a mut DepthPyramid, CullError> {
    let data = hi_z.as_deref_mut().ok_or(PipelineError::MissingHiZ(pass))?;
    data.pyramid_mut().as_cpu_mut().ok_or(CullError::ModeMismatch)
}

fn cluster_in_frustum(uniforms: &CullUniforms, cluster: &Cluster) -> bool {
    uniforms.planes[..uniforms.plane_count as usize]
        .iter()
        .all(|&plane| !Plane::from_vec4(plane).box_outside(cluster.position, cluster.extent))
}

fn append_visible(buffers: &HostClusterBuffers, slot: u32) {
    let index = buffers.draw_args.fetch_add(DRAW_INSTANCE_COUNT, 1);
    buffers.visibility.store(index as usize, slot);
}

/// Appends to a list feeding an indirect dispatch, growing the dispatch by a
/// workgroup whenever the previous one fills up.
fn append_dispatch(list: &AtomicBuffer, args: &AtomicBuffer, workgroup_size: u32, slot: u32) {
    let index = args.fetch_add(DISPATCH_COUNT, 1);
    if index % workgroup_size == 0 {
        args.fetch_add(DISPATCH_X, 1);
    }
    list.store(index as usize, slot);
}

fn history_verdict(uniforms: &CullUniforms, pyramid: &DepthPyramid, cluster: &Cluster) -> OcclusionVerdict {
    if !uniforms.history_usable() {
        return OcclusionVerdict::Ambiguous;
    }
    let bounds = match ScreenBounds::project(uniforms.history_view_proj, cluster) {
        Some(bounds) if bounds.fully_on_screen() => bounds,
        _ => return OcclusionVerdict::Ambiguous,
    };
    let level = bounds.select_mip(pyramid.size(), pyramid.mip_count(), 0);
    bounds.classify(pyramid.farthest_depth(&bounds, level))
}

fn current_verdict(uniforms: &CullUniforms, pyramid: &DepthPyramid, cluster: &Cluster) -> OcclusionVerdict {
    let bounds = match ScreenBounds::project(uniforms.view_proj, cluster).and_then(|b| b.clamp_to_screen()) {
        Some(bounds) => bounds,
        None => return OcclusionVerdict::Ambiguous,
    };
    let level = bounds.select_mip(pyramid.size(), pyramid.mip_count(), uniforms.recheck_mip_bias);
    bounds.classify(pyramid.farthest_depth(&bounds, level))
}

/// Rasterizes the vertex cache of every cluster in the visibility list, two
/// triangles per quad.
fn rasterize_visible(image: &mut DepthImage, buffers: &HostClusterBuffers, view_proj: Mat4) {
    profiling::scope!("rasterize visible clusters");

    let clip_count = CLUSTER_CLIP_COUNT as usize;
    let count = buffers.draw_args.load(DRAW_INSTANCE_COUNT) as usize;
    for index in 0..count {
        let start = buffers.visibility.load(index) as usize * clip_count;
        for quad in buffers.vertices[start..start + clip_count].chunks_exact(4) {
            let [a, b, c, d] = [quad[0].position, quad[1].position, quad[2].position, quad[3].position];
            image.draw_triangle(view_proj, [a, b, c]);
            image.draw_triangle(view_proj, [c, d, a]);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec2, Vec3};
    use hizcull::{
        managers::CameraManager,
        types::{Camera, CameraProjection, Handedness},
        util::cluster_mesh::box_vertex_cache,
        CullDevice, CullingOptions,
    };

    use super::*;

    fn camera_at(z: f32) -> CameraManager {
        let eye = Vec3::new(0.0, 0.0, z);
        CameraManager::new(
            Camera {
                projection: CameraProjection::Perspective {
                    vfov: 60.0,
                    near: 0.1,
                    far: 100.0,
                },
                view: Mat4::look_at_lh(eye, eye + Vec3::Z, Vec3::Y),
            },
            Handedness::Left,
            Some(1.0),
        )
    }

    struct Scene {
        device: CullDevice,
        options: CullingOptions,
        context: ClusterBuffer,
        hi_z: HiZOcclusionData,
        executor: CpuCullExecutor,
    }

    impl Scene {
        fn new(capacity: u32) -> Self {
            let device = CullDevice::cpu();
            let options = CullingOptions::default();
            let context = ClusterBuffer::new(&device, "scene", capacity, &options).unwrap();
            let hi_z = HiZOcclusionData::new(&device, UVec2::new(64, 64)).unwrap();
            Self {
                device,
                options,
                context,
                hi_z,
                executor: CpuCullExecutor::new(),
            }
        }

        fn set(&mut self, clusters: &[Cluster]) {
            self.context
                .set_clusters(&self.device, clusters, &box_vertex_cache(clusters))
                .unwrap();
        }

        fn frame(&mut self, camera: &CameraManager) {
            let pipeline = CullPipeline::for_options(&self.options, self.context.flags_reset_pending());
            let frame = CullFrame {
                camera,
                options: &self.options,
            };
            self.executor
                .execute(&pipeline, &mut self.context, Some(&mut self.hi_z), None, &frame)
                .unwrap();
        }

        fn host(&self) -> &HostClusterBuffers {
            self.context.storage().unwrap().as_cpu().unwrap()
        }

        fn draw_args(&self) -> IndirectDrawArgs {
            self.host().draw_args.read_args()
        }

        fn visible(&self) -> Vec<u32> {
            let count = self.draw_args().instance_count as usize;
            let mut visible = self.host().visibility.read(0..count);
            visible.sort_unstable();
            visible
        }
    }

    #[test]
    fn frustum_only_draws_into_target() {
        let mut scene = Scene::new(8);
        let clusters = [
            Cluster::new(Vec3::ZERO, Vec3::splat(0.5)),
            Cluster::new(Vec3::new(0.0, 0.0, -20.0), Vec3::splat(0.5)),
            Cluster::new(Vec3::new(1.0, 0.0, 3.0), Vec3::splat(0.5)),
        ];
        scene.set(&clusters);

        let camera = camera_at(-5.0);
        let mut target = DepthImage::new(UVec2::new(32, 32));
        let frame = CullFrame {
            camera: &camera,
            options: &scene.options,
        };
        scene
            .executor
            .execute(&CullPipeline::frustum_only(), &mut scene.context, None, Some(&mut target), &frame)
            .unwrap();

        assert_eq!(scene.draw_args().instance_count, 2);
        assert_eq!(scene.visible(), [0, 2]);
        assert!(target.data().iter().any(|&depth| depth < 1.0));
        // no occlusion passes ran
        assert_eq!(
            scene.host().dispatch_args.read_args::<IndirectDispatchArgs>(),
            IndirectDispatchArgs::INITIAL
        );
    }

    #[test]
    fn first_frame_cluster_is_confirmed_by_recheck() {
        let mut scene = Scene::new(1);
        scene.set(&[Cluster::new(Vec3::ZERO, Vec3::splat(0.5))]);
        scene.frame(&camera_at(-5.0));

        let draw: IndirectDrawArgs = scene.draw_args();
        assert_eq!(draw.as_words(), [384, 1, 0, 0, 0]);
        let dispatch: IndirectDispatchArgs = scene.host().dispatch_args.read_args();
        assert_eq!(dispatch.as_words(), [1, 1, 1, 1, 0]);
        // no history, so it went through the recheck
        let recheck: IndirectDispatchArgs = scene.host().recheck_args.read_args();
        assert_eq!(recheck.as_words(), [1, 1, 1, 1, 0]);
        assert_eq!(scene.host().recheck_flags.snapshot(), [0]);
        assert!(scene.hi_z.history().is_some());
    }

    #[test]
    fn occluded_cluster_stays_hidden_then_recovers() {
        let wall = Cluster::new(Vec3::ZERO, Vec3::new(1.5, 1.5, 0.1));
        let hidden = Cluster::new(Vec3::new(0.0, 0.0, 5.0), Vec3::splat(0.3));
        let camera = camera_at(-5.0);

        let mut scene = Scene::new(2);
        scene.set(&[wall, hidden]);
        scene.frame(&camera);
        // nothing to occlude with yet
        assert_eq!(scene.visible(), [0, 1]);

        scene.frame(&camera);
        assert_eq!(scene.visible(), [0]);
        let recheck: IndirectDispatchArgs = scene.host().recheck_args.read_args();
        assert_eq!(recheck.count, 1);

        // History still holds the wall, the recheck has to bring the box back.
        scene.set(&[hidden]);
        assert!(scene.context.flags_reset_pending());
        scene.frame(&camera);
        assert!(!scene.context.flags_reset_pending());
        assert_eq!(scene.visible(), [0]);
        let recheck: IndirectDispatchArgs = scene.host().recheck_args.read_args();
        assert_eq!(recheck.count, 1);
    }

    #[test]
    fn camera_cut_skips_history() {
        let wall = Cluster::new(Vec3::ZERO, Vec3::new(1.5, 1.5, 0.1));
        let mut scene = Scene::new(1);
        scene.set(&[wall]);
        scene.frame(&camera_at(-5.0));
        scene.frame(&camera_at(-5.0));
        // confirmed straight from history
        assert_eq!(scene.host().recheck_args.read_args::<IndirectDispatchArgs>().count, 0);

        let upside_down = CameraManager::new(
            Camera {
                view: Mat4::look_at_lh(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, -Vec3::Y),
                ..camera_at(-5.0).get_data()
            },
            Handedness::Left,
            Some(1.0),
        );
        scene.frame(&upside_down);
        assert_eq!(scene.host().recheck_args.read_args::<IndirectDispatchArgs>().count, 1);
        assert_eq!(scene.visible(), [0]);
    }

    #[test]
    fn empty_context_dispatches_nothing() {
        let mut scene = Scene::new(0);
        scene.set(&[]);
        scene.frame(&camera_at(-5.0));

        assert_eq!(scene.draw_args(), IndirectDrawArgs::INITIAL);
        assert_eq!(
            scene.host().dispatch_args.read_args::<IndirectDispatchArgs>(),
            IndirectDispatchArgs::INITIAL
        );
        assert_eq!(
            scene.host().recheck_args.read_args::<IndirectDispatchArgs>(),
            IndirectDispatchArgs::INITIAL
        );
    }

    #[test]
    fn clusters_outside_dispatch_nothing() {
        let clusters: Vec<_> = (0..100)
            .map(|i| Cluster::new(Vec3::new(i as f32, 0.0, -50.0), Vec3::splat(0.5)))
            .collect();
        let mut scene = Scene::new(100);
        scene.set(&clusters);
        scene.frame(&camera_at(-5.0));

        assert_eq!(scene.draw_args().instance_count, 0);
        let dispatch: IndirectDispatchArgs = scene.host().dispatch_args.read_args();
        assert_eq!((dispatch.x, dispatch.count), (0, 0));
        let recheck: IndirectDispatchArgs = scene.host().recheck_args.read_args();
        assert_eq!((recheck.x, recheck.count), (0, 0));
    }

    #[test]
    fn dispatch_grows_per_workgroup() {
        // 130 boxes in a grid in front of the camera, all inside the frustum
        let clusters: Vec<_> = (0..130)
            .map(|i| Cluster::new(Vec3::new((i % 13) as f32 - 6.0, (i / 13) as f32 - 5.0, 30.0), Vec3::splat(0.1)))
            .collect();
        let mut scene = Scene::new(130);
        scene.set(&clusters);
        scene.frame(&camera_at(-5.0));

        let dispatch: IndirectDispatchArgs = scene.host().dispatch_args.read_args();
        assert_eq!((dispatch.x, dispatch.count), (3, 130));
        assert_eq!(scene.visible(), (0..130).collect::<Vec<_>>());
    }
}
