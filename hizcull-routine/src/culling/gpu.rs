//! Device executor: compute kernels, indirect dispatches and the indirect draw
//! recorded into one command encoder.

use arrayvec::ArrayVec;
use encase::ShaderType;
use hizcull::{
    format_sso,
    managers::{ClusterBuffer, GpuDepthPyramid, HiZOcclusionData, HI_Z_FORMAT},
    types::{IndirectDispatchArgs, IndirectDrawArgs, CULL_WORKGROUP_SIZE},
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        error_scope::AllocationErrorScope,
        math::round_up_div,
    },
    CullError, CullPass, CullPipeline, CullUniforms, InstanceAdapterDevice, PipelineError, RoutineCreationError,
    ShaderPreProcessor,
};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BindGroup, BindGroupLayout, BindingType, Buffer, BufferBindingType, BufferUsages, CommandEncoder,
    ComputePassDescriptor, ComputePipeline, ComputePipelineDescriptor, Device, Extent3d, LoadOp,
    PipelineLayoutDescriptor, ShaderModuleDescriptor, ShaderStages, TextureDescriptor, TextureDimension,
    TextureUsages, TextureView, TextureViewDescriptor,
};

use crate::{
    culling::{check_frame, frame_uniforms, CullFrame},
    draw::ClusterDrawRoutine,
    hi_z::HiZRoutine,
    shaders::render_shader,
};

const ARGS_SIZE: u64 = 20;

/// Where the final draw goes.
///
/// Without `depth` the draw renders into the base of the depth hierarchy.
/// `depth` must be [`HI_Z_FORMAT`] and is cleared before drawing, `color`
/// must match the executor's color format.
#[derive(Debug, Default, Copy, Clone)]
pub struct GpuDrawTargets<'a> {
    pub depth: Option<&'a TextureView>,
    pub color: Option<&'a TextureView>,
}

struct CullKernel {
    /// Layout of group 1, `None` for kernels that only use group 0.
    bgl: Option<BindGroupLayout>,
    pipeline: ComputePipeline,
}

/// Runs a [`CullPipeline`] on the device.
pub struct GpuCullExecutor {
    cull_bgl: BindGroupLayout,
    frustum_cull: CullKernel,
    frustum_filter: CullKernel,
    occlusion_test: CullKernel,
    occlusion_recheck: CullKernel,

    hi_z: HiZRoutine,
    draw: ClusterDrawRoutine,

    /// Initial draw, dispatch and recheck arguments back to back. Copied over
    /// the argument buffers to clear them.
    initial_args: Buffer,
    /// Bound in place of the depth hierarchy for frames without one.
    dummy_depth: TextureView,
}

impl GpuCullExecutor {
    pub fn new(
        device: &Device,
        spp: &ShaderPreProcessor,
        color_format: Option<wgpu::TextureFormat>,
    ) -> Result<Self, RoutineCreationError> {
        profiling::scope!("GpuCullExecutor::new");

        let cull_bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::COMPUTE,
                BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: Some(CullUniforms::min_size()),
                },
                None,
            )
            .append_storage(ShaderStages::COMPUTE, true)
            .append_storage(ShaderStages::COMPUTE, false)
            .append_storage(ShaderStages::COMPUTE, false)
            .append_depth_texture(ShaderStages::COMPUTE)
            .build(device, Some("cull BGL"));

        let filter_bgl = BindGroupLayoutBuilder::new()
            .append_storage(ShaderStages::COMPUTE, false)
            .append_storage(ShaderStages::COMPUTE, false)
            .build(device, Some("frustum filter BGL"));
        let test_bgl = BindGroupLayoutBuilder::new()
            .append_storage(ShaderStages::COMPUTE, true)
            .append_storage(ShaderStages::COMPUTE, true)
            .append_storage(ShaderStages::COMPUTE, false)
            .append_storage(ShaderStages::COMPUTE, false)
            .append_storage(ShaderStages::COMPUTE, false)
            .build(device, Some("occlusion test BGL"));
        let recheck_bgl = BindGroupLayoutBuilder::new()
            .append_storage(ShaderStages::COMPUTE, false)
            .append_storage(ShaderStages::COMPUTE, true)
            .append_storage(ShaderStages::COMPUTE, true)
            .build(device, Some("occlusion recheck BGL"));

        let frustum_cull = create_kernel(device, spp, &cull_bgl, None, "frustum_cull")?;
        let frustum_filter = create_kernel(device, spp, &cull_bgl, Some(filter_bgl), "frustum_filter")?;
        let occlusion_test = create_kernel(device, spp, &cull_bgl, Some(test_bgl), "occlusion_test")?;
        let occlusion_recheck = create_kernel(device, spp, &cull_bgl, Some(recheck_bgl), "occlusion_recheck")?;

        let hi_z = HiZRoutine::new(device, spp)?;
        let draw = ClusterDrawRoutine::new(device, spp, color_format)?;

        let mut initial = ArrayVec::<u32, 15>::new();
        initial.extend(IndirectDrawArgs::INITIAL.as_words());
        initial.extend(IndirectDispatchArgs::INITIAL.as_words());
        initial.extend(IndirectDispatchArgs::INITIAL.as_words());
        let initial_args = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("initial cull args"),
            contents: bytemuck::cast_slice(&initial),
            usage: BufferUsages::COPY_SRC,
        });

        let dummy_depth = device
            .create_texture(&TextureDescriptor {
                label: Some("dummy hi-z"),
                size: Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: HI_Z_FORMAT,
                usage: TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&TextureViewDescriptor::default());

        Ok(Self {
            cull_bgl,
            frustum_cull,
            frustum_filter,
            occlusion_test,
            occlusion_recheck,
            hi_z,
            draw,
            initial_args,
            dummy_depth,
        })
    }

    pub fn color_format(&self) -> Option<wgpu::TextureFormat> {
        self.draw.color_format()
    }

    /// Records one frame for `context` into `encoder`.
    ///
    /// Uniforms are written through the queue, so the encoder must be
    /// submitted on `iad.queue` before the next call for the same context.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        iad: &InstanceAdapterDevice,
        encoder: &mut CommandEncoder,
        pipeline: &CullPipeline,
        context: &mut ClusterBuffer,
        hi_z: Option<&mut HiZOcclusionData>,
        targets: GpuDrawTargets<'_>,
        frame: &CullFrame<'_>,
    ) -> Result<(), CullError> {
        profiling::scope!("GpuCullExecutor::execute");

        iad.health.check()?;
        check_frame(pipeline, context, hi_z.as_deref(), targets.depth.is_some())?;
        let uniforms = frame_uniforms(frame, context, hi_z.as_deref());

        let device = &iad.device;
        let buffers = context.storage()?.as_gpu().ok_or(CullError::ModeMismatch)?;
        let pyramid: Option<&GpuDepthPyramid> = match hi_z.as_deref() {
            Some(data) => Some(data.pyramid().as_gpu().ok_or(CullError::ModeMismatch)?),
            None => None,
        };
        let label = context.label();

        iad.queue.write_buffer(&buffers.uniforms, 0, &uniforms.to_bytes()?);

        let cull_bg = BindGroupBuilder::new()
            .append_buffer(&buffers.uniforms)
            .append_buffer(&buffers.clusters)
            .append_buffer(&buffers.visibility)
            .append_buffer(&buffers.draw_args)
            .append_texture_view(pyramid.map_or(&self.dummy_depth, |p| &p.view))
            .build(device, Some(&format_sso!("{label} cull BG")), &self.cull_bgl);
        let draw_bg = BindGroupBuilder::new()
            .append_buffer(&buffers.uniforms)
            .append_buffer(&buffers.visibility)
            .append_buffer(&buffers.vertices)
            .build(device, Some(&format_sso!("{label} draw BG")), self.draw.bind_group_layout());
        let group_bg = |kernel: &CullKernel, name: &str, entries: &[&Buffer]| {
            kernel.bgl.as_ref().map(|bgl| {
                let mut builder = BindGroupBuilder::new();
                for buffer in entries {
                    builder.append_buffer(buffer);
                }
                builder.build(device, Some(&format_sso!("{label} {name} BG")), bgl)
            })
        };
        let filter_bg = group_bg(
            &self.frustum_filter,
            "frustum filter",
            &[&buffers.candidates, &buffers.dispatch_args],
        );
        let test_bg = group_bg(
            &self.occlusion_test,
            "occlusion test",
            &[
                &buffers.candidates,
                &buffers.dispatch_args,
                &buffers.recheck_flags,
                &buffers.recheck_list,
                &buffers.recheck_args,
            ],
        );
        let recheck_bg = group_bg(
            &self.occlusion_recheck,
            "occlusion recheck",
            &[&buffers.recheck_flags, &buffers.recheck_list, &buffers.recheck_args],
        );

        let groups = round_up_div(context.cluster_count(), CULL_WORKGROUP_SIZE);
        let mut depth_drawn = false;
        let mut flags_cleared = false;
        let mut store_history = false;
        for descriptor in pipeline.passes() {
            let pass = descriptor.pass;
            log::trace!("{label}: recording {pass:?} on {:?}", descriptor.queue);

            match pass {
                CullPass::ClearArgs => {
                    encoder.copy_buffer_to_buffer(&self.initial_args, 0, &buffers.draw_args, 0, ARGS_SIZE);
                    encoder.copy_buffer_to_buffer(&self.initial_args, ARGS_SIZE, &buffers.dispatch_args, 0, ARGS_SIZE);
                    encoder.copy_buffer_to_buffer(
                        &self.initial_args,
                        ARGS_SIZE * 2,
                        &buffers.recheck_args,
                        0,
                        ARGS_SIZE,
                    );
                }
                CullPass::ClearRecheckFlags => {
                    encoder.clear_buffer(&buffers.recheck_flags, 0, None);
                    flags_cleared = true;
                }
                CullPass::FrustumCull => {
                    let mut cpass = begin_compute(encoder, "frustum cull");
                    cpass.set_pipeline(&self.frustum_cull.pipeline);
                    cpass.set_bind_group(0, &cull_bg, &[]);
                    cpass.dispatch_workgroups(groups, 1, 1);
                }
                CullPass::FrustumFilter => {
                    let mut cpass = begin_compute(encoder, "frustum filter");
                    cpass.set_pipeline(&self.frustum_filter.pipeline);
                    cpass.set_bind_group(0, &cull_bg, &[]);
                    set_group(&mut cpass, &filter_bg);
                    cpass.dispatch_workgroups(groups, 1, 1);
                }
                CullPass::OcclusionTest => {
                    let mut cpass = begin_compute(encoder, "occlusion test");
                    cpass.set_pipeline(&self.occlusion_test.pipeline);
                    cpass.set_bind_group(0, &cull_bg, &[]);
                    set_group(&mut cpass, &test_bg);
                    cpass.dispatch_workgroups_indirect(&buffers.dispatch_args, 0);
                }
                CullPass::DrawDepth => {
                    let pyramid = pyramid.ok_or(PipelineError::MissingHiZ(pass))?;
                    self.draw.record(
                        encoder,
                        &draw_bg,
                        &buffers.draw_args,
                        base_level(pyramid),
                        LoadOp::Clear(1.0),
                        None,
                    );
                    depth_drawn = true;
                }
                CullPass::BuildDepthPyramid => {
                    let pyramid = pyramid.ok_or(PipelineError::MissingHiZ(pass))?;
                    self.hi_z.downscale(device, encoder, pyramid);
                }
                CullPass::OcclusionRecheck => {
                    let mut cpass = begin_compute(encoder, "occlusion recheck");
                    cpass.set_pipeline(&self.occlusion_recheck.pipeline);
                    cpass.set_bind_group(0, &cull_bg, &[]);
                    set_group(&mut cpass, &recheck_bg);
                    cpass.dispatch_workgroups_indirect(&buffers.recheck_args, 0);
                }
                CullPass::Draw => {
                    let (depth, load) = match (targets.depth, pyramid) {
                        (Some(view), _) => (view, LoadOp::Clear(1.0)),
                        (None, Some(pyramid)) if depth_drawn => (base_level(pyramid), LoadOp::Load),
                        (None, Some(pyramid)) => (base_level(pyramid), LoadOp::Clear(1.0)),
                        (None, None) => return Err(PipelineError::MissingDepthTarget(pass).into()),
                    };
                    self.draw
                        .record(encoder, &draw_bg, &buffers.draw_args, depth, load, targets.color);
                }
                CullPass::StoreHistory => {
                    let pyramid = pyramid.ok_or(PipelineError::MissingHiZ(pass))?;
                    self.hi_z.downscale(device, encoder, pyramid);
                    store_history = true;
                }
                CullPass::Fence => log::trace!("{label}: fence, single encoder keeps submission order"),
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
}

fn create_kernel(
    device: &Device,
    spp: &ShaderPreProcessor,
    cull_bgl: &BindGroupLayout,
    bgl: Option<BindGroupLayout>,
    name: &str,
) -> Result<CullKernel, RoutineCreationError> {
    let source = render_shader(spp, &format_sso!("{name}.wgsl"))?;

    let scope = AllocationErrorScope::new(device);
    let sm = device.create_shader_module(ShaderModuleDescriptor {
        label: Some(&format_sso!("{name} SM")),
        source,
    });

    let pll = {
        let mut bind_group_layouts = ArrayVec::<&BindGroupLayout, 2>::new();
        bind_group_layouts.push(cull_bgl);
        bind_group_layouts.extend(bgl.as_ref());
        device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(&format_sso!("{name} PLL")),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        })
    };

    let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some(&format_sso!("{name} pipeline")),
        layout: Some(&pll),
        module: &sm,
        entry_point: "cs_main",
    });
    scope.end().map_err(|source| RoutineCreationError::PipelineCreation {
        label: format_sso!("{name} pipeline"),
        source,
    })?;

    Ok(CullKernel { bgl, pipeline })
}

fn begin_compute<'a>(encoder: &'a mut CommandEncoder, label: &str) -> wgpu::ComputePass<'a> {
    encoder.begin_compute_pass(&ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    })
}

fn set_group<'a>(cpass: &mut wgpu::ComputePass<'a>, bind_group: &'a Option<BindGroup>) {
    if let Some(bind_group) = bind_group {
        cpass.set_bind_group(1, bind_group, &[]);
    }
}

fn base_level(pyramid: &GpuDepthPyramid) -> &TextureView {
    &pyramid.level_views[0]
}
