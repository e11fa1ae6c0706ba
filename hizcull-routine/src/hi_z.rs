use hizcull::{
    format_sso,
    managers::{GpuDepthPyramid, HI_Z_FORMAT},
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        error_scope::AllocationErrorScope,
    },
    RoutineCreationError, ShaderPreProcessor,
};
use wgpu::{
    BindGroupLayout, CommandEncoder, CompareFunction, DepthBiasState, DepthStencilState, Device, FragmentState, LoadOp,
    MultisampleState, Operations, PipelineLayoutDescriptor, PrimitiveState, RenderPassDepthStencilAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderModuleDescriptor, ShaderStages, StencilState,
    StoreOp, VertexState,
};

use crate::shaders::render_shader;

/// Builds every level of a depth pyramid from the one below it, keeping the
/// farthest depth.
pub struct HiZRoutine {
    texture_bgl: BindGroupLayout,
    pipeline: RenderPipeline,
}

impl HiZRoutine {
    pub fn new(device: &Device, spp: &ShaderPreProcessor) -> Result<Self, RoutineCreationError> {
        profiling::scope!("HiZRoutine::new");

        let source = render_shader(spp, "hi_z.wgsl")?;

        let scope = AllocationErrorScope::new(device);
        let shader_module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("hi-z downscale SM"),
            source,
        });

        let texture_bgl = BindGroupLayoutBuilder::new()
            .append_depth_texture(ShaderStages::FRAGMENT)
            .build(device, Some("hi-z downscale BGL"));

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("hi-z downscale PLL"),
            bind_group_layouts: &[&texture_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("hi-z downscale pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader_module,
                entry_point: "vs_main",
                buffers: &[],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: Some(DepthStencilState {
                format: HI_Z_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Always,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: &shader_module,
                entry_point: "fs_main",
                targets: &[],
            }),
            multiview: None,
        });
        scope.end().map_err(|source| RoutineCreationError::PipelineCreation {
            label: "hi-z downscale pipeline".into(),
            source,
        })?;

        Ok(Self { texture_bgl, pipeline })
    }

    /// Records one pass per level above the base.
    pub fn downscale(&self, device: &Device, encoder: &mut CommandEncoder, pyramid: &GpuDepthPyramid) {
        profiling::scope!("HiZRoutine::downscale");

        for dst_mip in 1..pyramid.level_views.len() {
            let src_mip = dst_mip - 1;

            let bind_group = BindGroupBuilder::new()
                .append_texture_view(&pyramid.level_views[src_mip])
                .build(device, Some(&format_sso!("hi-z level {src_mip}")), &self.texture_bgl);

            let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some(&format_sso!("hi-z level {src_mip} -> {dst_mip}")),
                color_attachments: &[],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &pyramid.level_views[dst_mip],
                    depth_ops: Some(Operations {
                        load: LoadOp::Clear(0.0),
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            rpass.set_pipeline(&self.pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }
    }
}
