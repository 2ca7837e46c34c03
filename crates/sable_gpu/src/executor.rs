//! Command executor: turns a recorded [`FrameData`] into GPU work.
//!
//! Execution walks the frame's sets in order. Each set renders into its
//! layer's pooled page; a set carrying a composite marker first draws the
//! child layer's page into the parent, then its own batches. The root page
//! is blitted to the caller's target view at the end.
//!
//! Resource exhaustion degrades rather than fails: a layer that cannot get
//! a page is skipped for the frame and the `degraded` flag is raised.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use sable_core::Rect;

use crate::backdrop::Backdrop;
use crate::pipelines::{PipelineKey, PipelineManager};
use crate::primitives::{
    Batch, BatchKind, CompositeUniforms, DataChunk, FrameData, Globals, GpuCover, GpuLine,
    GpuSegment, GpuVertex, Layer, PackedTile, PaintKind, StencilMode, LAYER_NONE,
};
use crate::stops::{STOP_ATLAS_SLOTS, STOP_ATLAS_WIDTH};
use crate::targets::{Lease, RenderTargetPool};

/// Error type for executor operations.
#[derive(Debug)]
pub enum RendererError {
    /// Failed to request a GPU adapter.
    AdapterNotFound,
    /// Failed to request a GPU device.
    DeviceError(wgpu::RequestDeviceError),
}

impl std::fmt::Display for RendererError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RendererError::AdapterNotFound => write!(f, "No suitable GPU adapter found"),
            RendererError::DeviceError(e) => write!(f, "Failed to request GPU device: {}", e),
        }
    }
}

impl std::error::Error for RendererError {}

/// Configuration for creating a renderer.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Render target format for layer pages and the caller's view.
    pub texture_format: wgpu::TextureFormat,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            texture_format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

struct FrameBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    chunks: wgpu::Buffer,
    covers: wgpu::Buffer,
    segments: wgpu::Buffer,
    tile_indices: wgpu::Buffer,
    tiles: wgpu::Buffer,
    lines: wgpu::Buffer,
}

/// Per-leased-layer GPU state for one frame.
struct LayerState {
    lease: Option<Lease>,
    cleared: bool,
    globals: Option<wgpu::Buffer>,
    common_bg: Option<wgpu::BindGroup>,
    cover_bg: Option<wgpu::BindGroup>,
    stroke_bg: Option<wgpu::BindGroup>,
    silhouette_bg: Option<wgpu::BindGroup>,
}

impl LayerState {
    fn empty() -> Self {
        Self {
            lease: None,
            cleared: false,
            globals: None,
            common_bg: None,
            cover_bg: None,
            stroke_bg: None,
            silhouette_bg: None,
        }
    }
}

pub struct Renderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    format: wgpu::TextureFormat,
    pipelines: PipelineManager,
    targets: RenderTargetPool,
    backdrop: Backdrop,
    sampler: wgpu::Sampler,
    stop_atlas: wgpu::Texture,
    stop_atlas_bg: wgpu::BindGroup,
    white_bg: wgpu::BindGroup,
    degraded: bool,
}

impl Renderer {
    /// Create a headless renderer on the best available adapter.
    pub async fn new(config: RendererConfig) -> Result<Self, RendererError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RendererError::AdapterNotFound)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Paint Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .map_err(RendererError::DeviceError)?;

        Ok(Self::with_device(
            Arc::new(device),
            Arc::new(queue),
            config,
        ))
    }

    /// Blocking wrapper around [`Renderer::new`].
    pub fn new_blocking(config: RendererConfig) -> Result<Self, RendererError> {
        pollster::block_on(Self::new(config))
    }

    /// Build a renderer on an existing device and queue.
    pub fn with_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: RendererConfig,
    ) -> Self {
        let format = config.texture_format;
        let pipelines = PipelineManager::new(&device, format);
        let targets = RenderTargetPool::new(format);
        let backdrop = Backdrop::new(format);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Paint Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let stop_atlas = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Gradient Stop Atlas"),
            size: wgpu::Extent3d {
                width: STOP_ATLAS_WIDTH as u32,
                height: STOP_ATLAS_SLOTS as u32,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let stop_atlas_view = stop_atlas.create_view(&wgpu::TextureViewDescriptor::default());
        let stop_atlas_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stop Atlas Bind Group"),
            layout: &pipelines.layouts.texture,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&stop_atlas_view),
                },
            ],
        });

        let white = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("White Texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let white_view = white.create_view(&wgpu::TextureViewDescriptor::default());
        let white_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("White Bind Group"),
            layout: &pipelines.layouts.texture,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&white_view),
                },
            ],
        });

        Self {
            device,
            queue,
            format,
            pipelines,
            targets,
            backdrop,
            sampler,
            stop_atlas,
            stop_atlas_bg,
            white_bg,
            degraded: false,
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// True once any frame has dropped content for lack of resources.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Drop all pooled render targets.
    pub fn release_targets(&mut self) {
        self.targets.purge();
    }

    /// Execute a recorded frame into `target`, a view with the renderer's
    /// texture format at the frame's viewport size.
    pub fn render(&mut self, frame: &FrameData, target: &wgpu::TextureView) {
        let (vw, vh) = frame.viewport;
        if vw == 0 || vh == 0 {
            return;
        }

        self.targets.reset();
        let buffers = self.upload(frame);
        self.upload_stops(frame);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Paint Encoder"),
            });

        let mut states: Vec<LayerState> = (0..frame.draw_lists.layers.len())
            .map(|_| LayerState::empty())
            .collect();

        // The root always gets a page: the frame ends with a blit from it.
        if !self.acquire_layer(frame, 0, vw, vh, &buffers, &mut states) {
            self.degraded = true;
            self.clear_only(&mut encoder, target, frame);
            self.queue.submit(Some(encoder.finish()));
            return;
        }

        for set in &frame.draw_lists.sets {
            let layer = set.layer as usize;
            if set.composite != LAYER_NONE {
                // A child with content implies the parent has content too,
                // so the parent page can always be acquired here.
                if self.acquire_layer(frame, layer, vw, vh, &buffers, &mut states) {
                    self.composite_child(
                        frame,
                        set.composite,
                        set.layer,
                        &mut encoder,
                        &mut states,
                    );
                } else if let Some(lease) = states[set.composite as usize].lease.take() {
                    self.targets.remove(lease.id);
                }
            }
            if set.batch_start == set.batch_end {
                continue;
            }
            if !self.acquire_layer(frame, layer, vw, vh, &buffers, &mut states) {
                continue;
            }
            self.draw_set_batches(frame, set.layer, set, &mut encoder, &buffers, &mut states);
        }

        // Smooth the root's silhouettes, then land the page on the target.
        self.antialias_layer(frame, 0, &mut encoder, &mut states);
        if states[0].cleared {
            self.blit_root(frame, target, &mut encoder, &states);
        } else {
            self.clear_only(&mut encoder, target, frame);
        }

        self.queue.submit(Some(encoder.finish()));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Frame resource setup
    // ─────────────────────────────────────────────────────────────────────

    fn upload(&self, frame: &FrameData) -> FrameBuffers {
        fn buffer<T: bytemuck::Pod>(
            device: &wgpu::Device,
            label: &str,
            data: &[T],
            usage: wgpu::BufferUsages,
        ) -> wgpu::Buffer {
            // Storage bindings reject empty buffers; pad with one element.
            let placeholder = [T::zeroed()];
            let data = if data.is_empty() { &placeholder } else { data };
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(data),
                usage,
            })
        }

        let storage = wgpu::BufferUsages::STORAGE;
        FrameBuffers {
            vertices: buffer::<GpuVertex>(
                &self.device,
                "Frame Vertices",
                &frame.vertices,
                wgpu::BufferUsages::VERTEX,
            ),
            indices: buffer::<u32>(
                &self.device,
                "Frame Indices",
                &frame.indices,
                wgpu::BufferUsages::INDEX,
            ),
            chunks: buffer::<DataChunk>(&self.device, "Frame Chunks", &frame.chunks, storage),
            covers: buffer::<GpuCover>(&self.device, "Frame Covers", &frame.covers, storage),
            segments: buffer::<GpuSegment>(&self.device, "Frame Segments", &frame.segments, storage),
            tile_indices: buffer::<u32>(
                &self.device,
                "Frame Tile Indices",
                &frame.tile_indices,
                storage,
            ),
            tiles: buffer::<PackedTile>(&self.device, "Frame Tiles", &frame.tiles, storage),
            lines: buffer::<GpuLine>(&self.device, "Frame Lines", &frame.lines, storage),
        }
    }

    fn upload_stops(&self, frame: &FrameData) {
        if frame.stop_texels.is_empty() {
            return;
        }
        // Only the slots this frame filled are uploaded.
        let rows = (frame.stop_texels.len() / STOP_ATLAS_WIDTH) as u32;
        self.queue.write_texture(
            self.stop_atlas.as_image_copy(),
            bytemuck::cast_slice(&frame.stop_texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(STOP_ATLAS_WIDTH as u32 * 4),
                rows_per_image: Some(rows),
            },
            wgpu::Extent3d {
                width: STOP_ATLAS_WIDTH as u32,
                height: rows,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Page size for a layer: the root needs the viewport, children their
    /// solved bounds.
    fn layer_size(layer: &Layer, index: usize, vw: u32, vh: u32) -> (u32, u32) {
        if index == 0 {
            (vw, vh)
        } else {
            (
                layer.bounds.width().ceil() as u32,
                layer.bounds.height().ceil() as u32,
            )
        }
    }

    /// Lease a page and build bind groups for a layer if not done yet.
    /// Returns false when no page is available.
    fn acquire_layer(
        &mut self,
        frame: &FrameData,
        index: usize,
        vw: u32,
        vh: u32,
        buffers: &FrameBuffers,
        states: &mut [LayerState],
    ) -> bool {
        if states[index].lease.is_some() {
            return true;
        }
        let layer = &frame.draw_lists.layers[index];
        let (w, h) = Self::layer_size(layer, index, vw, vh);
        if w == 0 || h == 0 {
            return false;
        }
        let Some(lease) = self.targets.take(&self.device, w, h) else {
            tracing::warn!(layer = index, "no render target page, skipping layer");
            self.degraded = true;
            return false;
        };

        let globals = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Layer Globals"),
                contents: bytemuck::bytes_of(&Globals {
                    viewport: [lease.width as f32, lease.height as f32],
                    _pad: [0.0; 2],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bg = |label: &str, layout: &wgpu::BindGroupLayout, extra: &[(u32, &wgpu::Buffer)]| {
            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: globals.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.chunks.as_entire_binding(),
                },
            ];
            for (binding, buffer) in extra {
                entries.push(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: buffer.as_entire_binding(),
                });
            }
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &entries,
            })
        };

        let layouts = &self.pipelines.layouts;
        states[index].common_bg = Some(bg("Layer Common", &layouts.common, &[]));
        states[index].cover_bg = Some(bg("Layer Cover", &layouts.cover, &[(2, &buffers.covers)]));
        states[index].stroke_bg = Some(bg(
            "Layer Stroke",
            &layouts.stroke,
            &[
                (2, &buffers.tiles),
                (3, &buffers.tile_indices),
                (4, &buffers.segments),
            ],
        ));
        states[index].silhouette_bg = Some(bg(
            "Layer Silhouette",
            &layouts.silhouette,
            &[(2, &buffers.lines)],
        ));
        states[index].globals = Some(globals);
        states[index].lease = Some(lease);
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Passes
    // ─────────────────────────────────────────────────────────────────────

    fn draw_set_batches(
        &mut self,
        frame: &FrameData,
        layer: u32,
        set: &crate::primitives::Set,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &FrameBuffers,
        states: &mut [LayerState],
    ) {
        let batches = &frame.draw_lists.batches[set.batch_start as usize..set.batch_end as usize];

        // Warm the pipeline cache so the pass can hold plain references.
        for batch in batches {
            for key in batch_keys(batch) {
                self.pipelines.get(&self.device, key);
            }
        }

        let state = &states[layer as usize];
        let (Some(lease), Some(common_bg), Some(cover_bg), Some(stroke_bg)) = (
            state.lease,
            state.common_bg.as_ref(),
            state.cover_bg.as_ref(),
            state.stroke_bg.as_ref(),
        ) else {
            return;
        };
        let Some(view) = self.targets.view(lease.id) else {
            return;
        };
        let Some(depth_view) = self.targets.depth_view(lease.id) else {
            return;
        };

        // Per-batch texture bind groups have to outlive the pass.
        let texture_bgs: Vec<Option<wgpu::BindGroup>> = batches
            .iter()
            .map(|b| {
                b.texture
                    .as_ref()
                    .map(|view| self.texture_bind_group(view))
            })
            .collect();

        let clear = !states[layer as usize].cleared;
        let layer_color = frame.draw_lists.layers[layer as usize].color;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Set Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(premultiplied_clear(layer_color))
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            }),
            ..Default::default()
        });

        pass.set_vertex_buffer(0, buffers.vertices.slice(..));
        pass.set_index_buffer(buffers.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.set_stencil_reference(0);

        // Opaque batches first for early depth rejection, then blended ones
        // in record order.
        for blended in [false, true] {
            for (i, batch) in batches.iter().enumerate() {
                if batch.opaque == blended {
                    continue;
                }
                self.draw_batch(&mut pass, batch, common_bg, cover_bg, stroke_bg, &texture_bgs, i);
            }
        }

        drop(pass);
        states[layer as usize].cleared = true;
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_batch(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        batch: &Batch,
        common_bg: &wgpu::BindGroup,
        cover_bg: &wgpu::BindGroup,
        stroke_bg: &wgpu::BindGroup,
        texture_bgs: &[Option<wgpu::BindGroup>],
        batch_index: usize,
    ) {
        let index_range = batch.index_start..batch.index_start + batch.index_count;
        match (batch.kind, batch.paint) {
            (_, PaintKind::TiledStroke) => {
                let Some(pipeline) = self.pipelines.cached(PipelineKey::Stroke) else {
                    return;
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, stroke_bg, &[]);
                pass.draw(0..6, batch.aux_start..batch.aux_start + batch.aux_count);
            }
            (BatchKind::Simple, paint) => {
                let Some(pipeline) = self.pipelines.cached(PipelineKey::Fill {
                    paint,
                    opaque: batch.opaque,
                }) else {
                    return;
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, common_bg, &[]);
                pass.set_bind_group(1, self.paint_texture_bg(batch, texture_bgs, batch_index), &[]);
                pass.draw_indexed(index_range, 0, 0..1);
            }
            (BatchKind::TwoPass, paint) => {
                let even_odd = matches!(
                    batch.stencil,
                    StencilMode::EvenOdd | StencilMode::EvenOddComplement
                );
                let Some(stencil) = self.pipelines.cached(PipelineKey::Stencil { even_odd })
                else {
                    return;
                };
                let Some(cover) = self.pipelines.cached(PipelineKey::Cover {
                    paint,
                    mode: batch.stencil,
                    opaque: batch.opaque,
                }) else {
                    return;
                };
                pass.set_pipeline(stencil);
                pass.set_bind_group(0, common_bg, &[]);
                pass.draw_indexed(index_range, 0, 0..1);

                pass.set_pipeline(cover);
                pass.set_bind_group(0, cover_bg, &[]);
                pass.set_bind_group(1, self.paint_texture_bg(batch, texture_bgs, batch_index), &[]);
                pass.draw(0..6, batch.aux_start..batch.aux_start + batch.aux_count);
            }
        }
    }

    fn paint_texture_bg<'a>(
        &'a self,
        batch: &Batch,
        texture_bgs: &'a [Option<wgpu::BindGroup>],
        batch_index: usize,
    ) -> &'a wgpu::BindGroup {
        // Gradients read the stop atlas; anything else untextured gets white.
        if let Some(Some(bg)) = texture_bgs.get(batch_index) {
            return bg;
        }
        match batch.paint {
            PaintKind::LinearGradient | PaintKind::RadialGradient => &self.stop_atlas_bg,
            _ => &self.white_bg,
        }
    }

    /// Run the child's edge-smoothing pass, composite its page into the
    /// parent, and return the page to the pool.
    fn composite_child(
        &mut self,
        frame: &FrameData,
        child: u32,
        parent: u32,
        encoder: &mut wgpu::CommandEncoder,
        states: &mut [LayerState],
    ) {
        let child_idx = child as usize;
        let layer = &frame.draw_lists.layers[child_idx];
        let Some(child_lease) = states[child_idx].lease else {
            return;
        };
        let Some(parent_lease) = states[parent as usize].lease else {
            return;
        };
        if !states[child_idx].cleared {
            // Nothing was ever drawn into the page; skip the sample.
            self.targets.remove(child_lease.id);
            states[child_idx].lease = None;
            return;
        }

        self.antialias_layer(frame, child_idx, encoder, states);

        self.pipelines.get(
            &self.device,
            PipelineKey::Composite {
                blend: layer.composite.blend,
                depth: true,
            },
        );

        let depth = frame
            .chunks
            .get(layer.composite.data as usize)
            .map(|c| c.depth)
            .unwrap_or(0.0);
        let uniforms = composite_uniforms(
            layer.place,
            layer.bounds,
            (child_lease.width, child_lease.height),
            (parent_lease.width, parent_lease.height),
            layer.composite.opacity,
            depth,
        );
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Composite Uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniform_bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bind Group"),
            layout: &self.pipelines.layouts.composite,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let Some(child_view) = self.targets.view(child_lease.id) else {
            return;
        };
        let source_bg = self.texture_bind_group(child_view);

        let (Some(parent_view), Some(parent_depth)) = (
            self.targets.view(parent_lease.id),
            self.targets.depth_view(parent_lease.id),
        ) else {
            return;
        };

        let Some(pipeline) = self.pipelines.cached(PipelineKey::Composite {
            blend: layer.composite.blend,
            depth: true,
        }) else {
            return;
        };

        // First touch of the parent page clears it here.
        let clear = !states[parent as usize].cleared;
        let parent_color = frame.draw_lists.layers[parent as usize].color;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composite Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: parent_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(premultiplied_clear(parent_color))
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: parent_depth,
                depth_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            }),
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &uniform_bg, &[]);
        pass.set_bind_group(1, &source_bg, &[]);
        pass.draw(0..6, 0..1);
        drop(pass);

        states[parent as usize].cleared = true;
        self.targets.remove(child_lease.id);
        states[child_idx].lease = None;
    }

    /// Silhouette smoothing over a layer's page, sampling a backdrop copy.
    fn antialias_layer(
        &mut self,
        frame: &FrameData,
        index: usize,
        encoder: &mut wgpu::CommandEncoder,
        states: &mut [LayerState],
    ) {
        let layer = &frame.draw_lists.layers[index];
        if layer.line_count == 0 {
            return;
        }
        let Some(lease) = states[index].lease else {
            return;
        };
        if !states[index].cleared {
            return;
        }

        self.pipelines.get(&self.device, PipelineKey::Silhouette);

        let Some(texture) = self.targets.texture(lease.id) else {
            return;
        };
        let texture = texture.clone();
        let Some(backdrop_view) =
            self.backdrop
                .capture(&self.device, encoder, &texture, lease.width, lease.height)
        else {
            return;
        };
        let backdrop_bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Backdrop Bind Group"),
            layout: &self.pipelines.layouts.texture,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(backdrop_view),
                },
            ],
        });

        let (Some(view), Some(silhouette_bg)) = (
            self.targets.view(lease.id),
            states[index].silhouette_bg.as_ref(),
        ) else {
            return;
        };
        let Some(pipeline) = self.pipelines.cached(PipelineKey::Silhouette) else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Silhouette Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, silhouette_bg, &[]);
        pass.set_bind_group(1, &backdrop_bg, &[]);
        pass.draw(0..6, layer.line_start..layer.line_start + layer.line_count);
    }

    fn blit_root(
        &mut self,
        frame: &FrameData,
        target: &wgpu::TextureView,
        encoder: &mut wgpu::CommandEncoder,
        states: &[LayerState],
    ) {
        let (vw, vh) = frame.viewport;
        let Some(lease) = states[0].lease else {
            return;
        };

        self.pipelines.get(
            &self.device,
            PipelineKey::Composite {
                blend: sable_core::BlendMode::Normal,
                depth: false,
            },
        );

        let uniforms = CompositeUniforms {
            dest: [0.0, 0.0, vw as f32, vh as f32],
            source_uv: [
                0.0,
                0.0,
                vw as f32 / lease.width as f32,
                vh as f32 / lease.height as f32,
            ],
            viewport: [vw as f32, vh as f32],
            opacity: 1.0,
            depth: 0.0,
        };
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Blit Uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniform_bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.pipelines.layouts.composite,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let Some(root_view) = self.targets.view(lease.id) else {
            return;
        };
        let source_bg = self.texture_bind_group(root_view);
        let Some(pipeline) = self.pipelines.cached(PipelineKey::Composite {
            blend: sable_core::BlendMode::Normal,
            depth: false,
        }) else {
            return;
        };

        let clear = premultiplied_clear(frame.background);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blit Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &uniform_bg, &[]);
        pass.set_bind_group(1, &source_bg, &[]);
        pass.draw(0..6, 0..1);
    }

    /// Nothing could be rendered; still hand the caller a defined target.
    fn clear_only(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        frame: &FrameData,
    ) {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(premultiplied_clear(frame.background)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
    }

    fn texture_bind_group(&self, view: &wgpu::TextureView) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Paint Texture Bind Group"),
            layout: &self.pipelines.layouts.texture,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
            ],
        })
    }
}

/// Pipelines a batch will need during its set's pass.
fn batch_keys(batch: &Batch) -> Vec<PipelineKey> {
    match (batch.kind, batch.paint) {
        (_, PaintKind::TiledStroke) => vec![PipelineKey::Stroke],
        (BatchKind::Simple, paint) => vec![PipelineKey::Fill {
            paint,
            opaque: batch.opaque,
        }],
        (BatchKind::TwoPass, paint) => vec![
            PipelineKey::Stencil {
                even_odd: matches!(
                    batch.stencil,
                    StencilMode::EvenOdd | StencilMode::EvenOddComplement
                ),
            },
            PipelineKey::Cover {
                paint,
                mode: batch.stencil,
                opaque: batch.opaque,
            },
        ],
    }
}

/// Composite quad uniforms: place the child's content rect inside the parent
/// page, sampling only the used region of the child page.
fn composite_uniforms(
    place: Rect,
    bounds: Rect,
    child_page: (u32, u32),
    parent_page: (u32, u32),
    opacity: f32,
    depth: f32,
) -> CompositeUniforms {
    CompositeUniforms {
        dest: [place.x(), place.y(), place.width(), place.height()],
        source_uv: [
            0.0,
            0.0,
            bounds.width() / child_page.0 as f32,
            bounds.height() / child_page.1 as f32,
        ],
        viewport: [parent_page.0 as f32, parent_page.1 as f32],
        opacity,
        depth,
    }
}

fn premultiplied_clear(color: sable_core::Color) -> wgpu::Color {
    wgpu::Color {
        r: (color.r * color.a) as f64,
        g: (color.g * color.a) as f64,
        b: (color.b * color.a) as f64,
        a: color.a as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_failure() {
        assert_eq!(
            RendererError::AdapterNotFound.to_string(),
            "No suitable GPU adapter found"
        );
    }

    #[test]
    fn composite_uniforms_sample_used_page_region() {
        let u = composite_uniforms(
            Rect::new(60.0, 70.0, 50.0, 50.0),
            Rect::new(0.0, 0.0, 50.0, 50.0),
            (64, 64),
            (256, 256),
            0.5,
            0.9,
        );
        assert_eq!(u.dest, [60.0, 70.0, 50.0, 50.0]);
        assert_eq!(u.source_uv, [0.0, 0.0, 50.0 / 64.0, 50.0 / 64.0]);
        assert_eq!(u.viewport, [256.0, 256.0]);
        assert_eq!(u.opacity, 0.5);
        assert_eq!(u.depth, 0.9);
    }

    #[test]
    fn two_pass_batches_need_stencil_and_cover_pipelines() {
        let mut batch = Batch::two_pass(
            PaintKind::Solid,
            StencilMode::EvenOdd,
            true,
            0,
            0,
            Rect::ZERO,
        );
        batch.aux_count = 1;
        let keys = batch_keys(&batch);
        assert_eq!(keys.len(), 2);
        assert!(matches!(keys[0], PipelineKey::Stencil { even_odd: true }));

        let stroke = {
            let mut b = Batch::simple(PaintKind::TiledStroke, false, 0, Rect::ZERO);
            b.aux_count = 2;
            b
        };
        assert_eq!(batch_keys(&stroke), vec![PipelineKey::Stroke]);
    }

    #[test]
    fn clear_color_is_premultiplied() {
        let c = premultiplied_clear(sable_core::Color::rgba(1.0, 0.5, 0.0, 0.5));
        assert!((c.r - 0.5).abs() < 1e-6);
        assert!((c.g - 0.25).abs() < 1e-6);
        assert!((c.a - 0.5).abs() < 1e-6);
    }
}
