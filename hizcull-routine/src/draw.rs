//! The one indirect draw of every visible cluster.

use encase::ShaderType;
use hizcull::{
    managers::HI_Z_FORMAT,
    util::{bind_merge::BindGroupLayoutBuilder, error_scope::AllocationErrorScope},
    CullUniforms, RoutineCreationError, ShaderPreProcessor,
};
use wgpu::{
    BindGroup, BindGroupLayout, BindingType, Buffer, BufferBindingType, Color, ColorTargetState, ColorWrites,
    CommandEncoder, CompareFunction, DepthBiasState, DepthStencilState, Device, FragmentState, LoadOp,
    MultisampleState, Operations, PipelineLayout, PipelineLayoutDescriptor, PrimitiveState, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderModule,
    ShaderModuleDescriptor, ShaderStages, StencilState, StoreOp, TextureFormat, TextureView, VertexState,
};

use crate::shaders::render_shader;

/// Draws the visibility list straight out of the vertex cache.
///
/// Vertex and instance counts come from the draw argument buffer, so the host
/// never learns how many clusters were drawn.
pub struct ClusterDrawRoutine {
    bgl: BindGroupLayout,
    depth_pipeline: RenderPipeline,
    color_pipeline: Option<(TextureFormat, RenderPipeline)>,
}

impl ClusterDrawRoutine {
    /// `color_format` adds a pipeline that also shades normals into a color
    /// target of that format.
    pub fn new(
        device: &Device,
        spp: &ShaderPreProcessor,
        color_format: Option<TextureFormat>,
    ) -> Result<Self, RoutineCreationError> {
        profiling::scope!("ClusterDrawRoutine::new");

        let source = render_shader(spp, "cluster_draw.wgsl")?;

        let scope = AllocationErrorScope::new(device);
        let sm = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("cluster draw SM"),
            source,
        });

        let bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::VERTEX,
                BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: Some(CullUniforms::min_size()),
                },
                None,
            )
            .append_storage(ShaderStages::VERTEX, true)
            .append_storage(ShaderStages::VERTEX, true)
            .build(device, Some("cluster draw BGL"));

        let pll = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("cluster draw PLL"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let depth_pipeline = build_pipeline(device, &pll, &sm, None);
        let color_pipeline = color_format.map(|format| (format, build_pipeline(device, &pll, &sm, Some(format))));
        scope.end().map_err(|source| RoutineCreationError::PipelineCreation {
            label: "cluster draw".into(),
            source,
        })?;

        Ok(Self {
            bgl,
            depth_pipeline,
            color_pipeline,
        })
    }

    /// Layout of the bind group [`Self::record`] takes: uniforms, visibility
    /// list, vertex cache.
    pub fn bind_group_layout(&self) -> &BindGroupLayout {
        &self.bgl
    }

    pub fn color_format(&self) -> Option<TextureFormat> {
        self.color_pipeline.as_ref().map(|&(format, _)| format)
    }

    /// Records the draw into `depth`, and into `color` (cleared first) when
    /// this routine was built with a color format.
    pub fn record(
        &self,
        encoder: &mut CommandEncoder,
        bind_group: &BindGroup,
        draw_args: &Buffer,
        depth: &TextureView,
        depth_load: LoadOp<f32>,
        color: Option<&TextureView>,
    ) {
        profiling::scope!("ClusterDrawRoutine::record");

        let (color, pipeline) = match (color, &self.color_pipeline) {
            (Some(view), Some((_, pipeline))) => (Some(view), pipeline),
            (Some(_), None) => {
                log::warn!("Color target given to a depth only cluster draw, ignoring it");
                (None, &self.depth_pipeline)
            }
            (None, _) => (None, &self.depth_pipeline),
        };

        let color_attachments: Vec<_> = color
            .into_iter()
            .map(|view| {
                Some(RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::TRANSPARENT),
                        store: StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("cluster draw"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(Operations {
                    load: depth_load,
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, bind_group, &[]);
        rpass.draw_indirect(draw_args, 0);
    }
}

fn build_pipeline(
    device: &Device,
    pll: &PipelineLayout,
    sm: &ShaderModule,
    color_format: Option<TextureFormat>,
) -> RenderPipeline {
    let targets = [color_format.map(|format| ColorTargetState {
        format,
        blend: None,
        write_mask: ColorWrites::all(),
    })];

    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some(if color_format.is_some() {
            "cluster draw color pipeline"
        } else {
            "cluster draw depth pipeline"
        }),
        layout: Some(pll),
        vertex: VertexState {
            module: sm,
            entry_point: "vs_main",
            buffers: &[],
        },
        // Cached quads carry no consistent winding.
        primitive: PrimitiveState::default(),
        depth_stencil: Some(DepthStencilState {
            format: HI_Z_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::LessEqual,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: MultisampleState::default(),
        fragment: color_format.map(|_| FragmentState {
            module: sm,
            entry_point: "fs_main",
            targets: &targets,
        }),
        multiview: None,
    })
}
