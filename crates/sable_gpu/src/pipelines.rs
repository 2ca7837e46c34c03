//! Render pipeline cache and bind group layouts.
//!
//! Pipelines compile lazily on first use and are keyed by everything that
//! affects fixed-function state: paint kind, opacity class, stencil mode,
//! blend mode. A pipeline whose shader fails validation caches as `None` so
//! the failure logs once and the executor skips those draws thereafter.

use rustc_hash::FxHashMap;
use sable_core::BlendMode;
use tracing::warn;

use crate::primitives::{GpuVertex, PaintKind, StencilMode};
use crate::shaders::{
    COMPOSITE_SHADER, COVER_SHADER, FILL_SHADER, SILHOUETTE_SHADER, STENCIL_SHADER, STROKE_SHADER,
};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Everything that selects a distinct render pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKey {
    Fill { paint: PaintKind, opaque: bool },
    /// Winding pass of a two-pass fill.
    Stencil { even_odd: bool },
    /// Cover pass of a two-pass fill.
    Cover {
        paint: PaintKind,
        mode: StencilMode,
        opaque: bool,
    },
    Stroke,
    Silhouette,
    /// Layer composite into a depth-tested parent pass, or a depthless blit.
    Composite { blend: BlendMode, depth: bool },
}

/// Bind group layouts shared by every pipeline.
pub struct BindGroupLayouts {
    /// Globals uniform + chunk table.
    pub common: wgpu::BindGroupLayout,
    /// Globals + chunks + cover instances.
    pub cover: wgpu::BindGroupLayout,
    /// Globals + chunks + tiles + tile indices + segments.
    pub stroke: wgpu::BindGroupLayout,
    /// Globals + chunks + silhouette lines.
    pub silhouette: wgpu::BindGroupLayout,
    /// Composite uniform block.
    pub composite: wgpu::BindGroupLayout,
    /// Sampler + texture, bound at group 1 by every color pass.
    pub texture: wgpu::BindGroupLayout,
}

impl BindGroupLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let common = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Paint Common Layout"),
            entries: &[uniform(0), storage(1)],
        });
        let cover = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cover Layout"),
            entries: &[uniform(0), storage(1), storage(2)],
        });
        let stroke = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stroke Layout"),
            entries: &[uniform(0), storage(1), storage(2), storage(3), storage(4)],
        });
        let silhouette = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Silhouette Layout"),
            entries: &[uniform(0), storage(1), storage(2)],
        });
        let composite = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Layout"),
            entries: &[uniform(0)],
        });
        let texture = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Paint Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        Self {
            common,
            cover,
            stroke,
            silhouette,
            composite,
            texture,
        }
    }
}

struct Modules {
    fill: wgpu::ShaderModule,
    stencil: wgpu::ShaderModule,
    cover: wgpu::ShaderModule,
    stroke: wgpu::ShaderModule,
    silhouette: wgpu::ShaderModule,
    composite: wgpu::ShaderModule,
}

pub struct PipelineManager {
    format: wgpu::TextureFormat,
    pub layouts: BindGroupLayouts,
    modules: Modules,
    cache: FxHashMap<PipelineKey, Option<wgpu::RenderPipeline>>,
}

impl PipelineManager {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let module = |label: &str, source: &str| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        };
        Self {
            format,
            layouts: BindGroupLayouts::new(device),
            modules: Modules {
                fill: module("Fill Shader", FILL_SHADER),
                stencil: module("Stencil Shader", STENCIL_SHADER),
                cover: module("Cover Shader", COVER_SHADER),
                stroke: module("Stroke Shader", STROKE_SHADER),
                silhouette: module("Silhouette Shader", SILHOUETTE_SHADER),
                composite: module("Composite Shader", COMPOSITE_SHADER),
            },
            cache: FxHashMap::default(),
        }
    }

    /// Fetch a pipeline, compiling it on first use. Returns `None` when the
    /// key's state combination is unsupported or compilation failed before.
    pub fn get(&mut self, device: &wgpu::Device, key: PipelineKey) -> Option<&wgpu::RenderPipeline> {
        if !self.cache.contains_key(&key) {
            let pipeline = self.build(device, key);
            if pipeline.is_none() {
                warn!(?key, "pipeline unavailable");
            }
            self.cache.insert(key, pipeline);
        }
        self.cache.get(&key).and_then(|p| p.as_ref())
    }

    /// Cache-only lookup for use while a pass holds immutable borrows.
    pub fn cached(&self, key: PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.cache.get(&key).and_then(|p| p.as_ref())
    }

    fn build(&self, device: &wgpu::Device, key: PipelineKey) -> Option<wgpu::RenderPipeline> {
        match key {
            PipelineKey::Fill { paint, opaque } => {
                let entry = fill_entry(paint)?;
                Some(self.render_pipeline(
                    device,
                    "Fill Pipeline",
                    &self.modules.fill,
                    entry,
                    &[&self.layouts.common, &self.layouts.texture],
                    &[vertex_layout()],
                    color_target(self.format, (!opaque).then(blend_premultiplied)),
                    Some(depth_state(opaque, stencil_default())),
                ))
            }
            PipelineKey::Stencil { even_odd } => Some(self.render_pipeline(
                device,
                "Stencil Pipeline",
                &self.modules.stencil,
                "fs_main",
                &[&self.layouts.common],
                &[vertex_layout()],
                masked_target(self.format),
                Some(winding_depth_state(even_odd)),
            )),
            PipelineKey::Cover {
                paint,
                mode,
                opaque,
            } => {
                let (entry, masked) = match paint {
                    PaintKind::Empty => ("fs_empty", true),
                    _ => (fill_entry(paint)?, false),
                };
                let target = if masked {
                    masked_target(self.format)
                } else {
                    color_target(self.format, (!opaque).then(blend_premultiplied))
                };
                // Blockers write depth; colored covers follow opacity class.
                let depth_write = masked || opaque;
                Some(self.render_pipeline(
                    device,
                    "Cover Pipeline",
                    &self.modules.cover,
                    entry,
                    &[&self.layouts.cover, &self.layouts.texture],
                    &[],
                    target,
                    Some(depth_state(depth_write, cover_stencil(mode))),
                ))
            }
            PipelineKey::Stroke => Some(self.render_pipeline(
                device,
                "Stroke Pipeline",
                &self.modules.stroke,
                "fs_main",
                &[&self.layouts.stroke],
                &[],
                color_target(self.format, Some(blend_premultiplied())),
                Some(depth_state(false, stencil_default())),
            )),
            PipelineKey::Silhouette => Some(self.render_pipeline(
                device,
                "Silhouette Pipeline",
                &self.modules.silhouette,
                "fs_main",
                &[&self.layouts.silhouette, &self.layouts.texture],
                &[],
                color_target(self.format, None),
                None,
            )),
            PipelineKey::Composite { blend, depth } => Some(self.render_pipeline(
                device,
                "Composite Pipeline",
                &self.modules.composite,
                "fs_main",
                &[&self.layouts.composite, &self.layouts.texture],
                &[],
                color_target(self.format, depth.then(|| blend_state(blend))),
                depth.then(|| depth_state(false, stencil_default())),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_pipeline(
        &self,
        device: &wgpu::Device,
        label: &str,
        module: &wgpu::ShaderModule,
        fragment_entry: &str,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        vertex_buffers: &[wgpu::VertexBufferLayout],
        target: wgpu::ColorTargetState,
        depth_stencil: Option<wgpu::DepthStencilState>,
    ) -> wgpu::RenderPipeline {
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts,
            push_constant_ranges: &[],
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_main"),
                buffers: vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(fragment_entry),
                targets: &[Some(target)],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

fn fill_entry(paint: PaintKind) -> Option<&'static str> {
    match paint {
        PaintKind::Solid => Some("fs_solid"),
        PaintKind::LinearGradient => Some("fs_linear_gradient"),
        PaintKind::RadialGradient => Some("fs_radial_gradient"),
        PaintKind::Pattern => Some("fs_pattern"),
        PaintKind::Image => Some("fs_textured"),
        PaintKind::Text => Some("fs_glyph"),
        PaintKind::Empty | PaintKind::TiledStroke => None,
    }
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Uint32];

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<GpuVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

fn blend_premultiplied() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    let component = |src, dst| wgpu::BlendComponent {
        src_factor: src,
        dst_factor: dst,
        operation: wgpu::BlendOperation::Add,
    };
    use wgpu::BlendFactor::*;
    match mode {
        BlendMode::Normal => blend_premultiplied(),
        BlendMode::Add => wgpu::BlendState {
            color: component(One, One),
            alpha: component(One, One),
        },
        BlendMode::Multiply => wgpu::BlendState {
            color: component(Dst, Zero),
            alpha: component(DstAlpha, Zero),
        },
        BlendMode::Screen => wgpu::BlendState {
            color: component(One, OneMinusSrc),
            alpha: component(One, OneMinusSrcAlpha),
        },
    }
}

fn color_target(
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> wgpu::ColorTargetState {
    wgpu::ColorTargetState {
        format,
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    }
}

/// Target with color writes disabled: stencil and depth-only passes.
fn masked_target(format: wgpu::TextureFormat) -> wgpu::ColorTargetState {
    wgpu::ColorTargetState {
        format,
        blend: None,
        write_mask: wgpu::ColorWrites::empty(),
    }
}

fn stencil_default() -> wgpu::StencilState {
    wgpu::StencilState {
        front: wgpu::StencilFaceState::IGNORE,
        back: wgpu::StencilFaceState::IGNORE,
        read_mask: 0xff,
        write_mask: 0xff,
    }
}

fn depth_state(depth_write: bool, stencil: wgpu::StencilState) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: depth_write,
        depth_compare: wgpu::CompareFunction::Less,
        stencil,
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Winding pass: accumulate front/back winding (or parity) ignoring depth.
fn winding_depth_state(even_odd: bool) -> wgpu::DepthStencilState {
    let face = |pass_op| wgpu::StencilFaceState {
        compare: wgpu::CompareFunction::Always,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    };
    let (front, back) = if even_odd {
        (
            face(wgpu::StencilOperation::Invert),
            face(wgpu::StencilOperation::Invert),
        )
    } else {
        (
            face(wgpu::StencilOperation::IncrementWrap),
            face(wgpu::StencilOperation::DecrementWrap),
        )
    };
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Always,
        stencil: wgpu::StencilState {
            front,
            back,
            read_mask: 0xff,
            write_mask: 0xff,
        },
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Cover pass: test the accumulated stencil and reset it to the reference
/// (zero) on every outcome, so merged fills leave a clean buffer behind.
fn cover_stencil(mode: StencilMode) -> wgpu::StencilState {
    let (compare, read_mask) = match mode {
        StencilMode::NonZero => (wgpu::CompareFunction::NotEqual, 0xff),
        StencilMode::EvenOdd => (wgpu::CompareFunction::NotEqual, 0x01),
        StencilMode::NonZeroComplement => (wgpu::CompareFunction::Equal, 0xff),
        StencilMode::EvenOddComplement => (wgpu::CompareFunction::Equal, 0x01),
    };
    let face = wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Replace,
        depth_fail_op: wgpu::StencilOperation::Replace,
        pass_op: wgpu::StencilOperation::Replace,
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask,
        write_mask: 0xff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_entry_covers_color_paints_only() {
        assert_eq!(fill_entry(PaintKind::Solid), Some("fs_solid"));
        assert_eq!(fill_entry(PaintKind::Text), Some("fs_glyph"));
        assert_eq!(fill_entry(PaintKind::Empty), None);
        assert_eq!(fill_entry(PaintKind::TiledStroke), None);
    }

    #[test]
    fn vertex_layout_matches_vertex_size() {
        let layout = vertex_layout();
        assert_eq!(layout.array_stride, 20);
        assert_eq!(layout.attributes.len(), 3);
        assert_eq!(layout.attributes[2].offset, 16);
    }

    #[test]
    fn even_odd_cover_masks_parity_bit() {
        let state = cover_stencil(StencilMode::EvenOdd);
        assert_eq!(state.read_mask, 0x01);
        assert_eq!(state.front.compare, wgpu::CompareFunction::NotEqual);
        assert_eq!(state.front.pass_op, wgpu::StencilOperation::Replace);
        assert_eq!(state.front.fail_op, wgpu::StencilOperation::Replace);
    }

    #[test]
    fn complement_cover_inverts_comparison() {
        let state = cover_stencil(StencilMode::NonZeroComplement);
        assert_eq!(state.front.compare, wgpu::CompareFunction::Equal);
    }
}
