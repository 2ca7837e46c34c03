//! The paint engine: records declarative paint calls into frame draw lists.
//!
//! All recording is single-threaded and frame-scoped: `begin_frame` fully
//! resets shared buffers, per-call operations append vertices, triangles,
//! data chunks, and batches, and `end_frame` runs the layer compositor,
//! stitches set spans, and hands back the finalized [`FrameData`].
//!
//! Failures during recording never abort the frame: a full chunk table or an
//! oversized stroke refuses that one draw and the rest of the frame renders.

use std::sync::Arc;

use sable_core::{BlendMode, Brush, Color, FillRule, Gradient, PathData, Point, Rect, Vec2};
use smallvec::SmallVec;

use crate::compose;
use crate::fill::{self, FillStrategy};
use crate::primitives::{
    Batch, BatchKind, CompositeCmd, DataChunk, DrawLists, FrameData, GpuCover, GpuSegment,
    GpuVertex, Layer, PackedTile, PaintKind, Set, StencilMode, DEPTH_SHRINK, LAYER_NONE,
};
use crate::silhouette::SilhouetteRecorder;
use crate::stops::StopAtlas;
use crate::stroke;
use crate::textures::{GlyphQuad, TextureSlice, TextureSource};

/// Buffer capacities and recording options.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum data chunks per frame; a full table refuses further draws.
    pub max_chunks: usize,
    /// Maximum stroke segments per frame.
    pub max_segments: usize,
    /// Maximum packed stroke tiles per frame.
    pub max_tiles: usize,
    /// Maximum tile segment references per frame.
    pub max_tile_indices: usize,
    /// Record silhouette lines for the edge-smoothing pass.
    pub antialias: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunks: 4_096,
            max_segments: 65_536,
            max_tiles: 8_192,
            max_tile_indices: 262_144,
            antialias: true,
        }
    }
}

/// Composite options for a pushed layer.
#[derive(Clone, Copy, Debug)]
pub struct CompositeOp {
    pub opacity: f32,
    pub blend: BlendMode,
}

impl Default for CompositeOp {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            blend: BlendMode::Normal,
        }
    }
}

/// A pending clip-out whose blocker depth resolves at `restore_clip`.
#[derive(Clone, Copy, Debug)]
struct ClipTask {
    id: u32,
    chunk: u32,
    layer: u32,
}

/// Records paint operations for one frame at a time.
#[derive(Default)]
pub struct PaintEngine {
    config: EngineConfig,
    viewport: (u32, u32),
    background: Color,

    vertices: Vec<GpuVertex>,
    indices: Vec<u32>,
    chunks: Vec<DataChunk>,
    covers: Vec<GpuCover>,
    segments: Vec<GpuSegment>,
    tile_indices: Vec<u32>,
    tiles: Vec<PackedTile>,

    layers: Vec<Layer>,
    sets: Vec<Set>,
    batches: Vec<Batch>,

    layer_stack: SmallVec<[u32; 8]>,
    pending_clips: SmallVec<[ClipTask; 8]>,
    silhouette: SilhouetteRecorder,
    stops: StopAtlas,
    textures: Option<Arc<dyn TextureSource>>,
    frame_open: bool,
}

impl PaintEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Install the texture lookup used to resolve pattern brushes.
    pub fn set_texture_source(&mut self, source: Arc<dyn TextureSource>) {
        self.textures = Some(source);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Frame lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Reset all per-frame buffers and establish the root layer covering the
    /// viewport.
    pub fn begin_frame(&mut self, width: u32, height: u32, background: Color) {
        self.viewport = (width, height);
        self.background = background;

        self.vertices.clear();
        self.indices.clear();
        self.chunks.clear();
        self.covers.clear();
        self.segments.clear();
        self.tile_indices.clear();
        self.tiles.clear();
        self.layers.clear();
        self.sets.clear();
        self.batches.clear();
        self.layer_stack.clear();
        self.pending_clips.clear();
        self.silhouette.clear();
        self.stops.reset();

        let clip = Rect::new(0.0, 0.0, width as f32, height as f32);
        self.layers.push(Layer {
            parent: 0,
            clip,
            bounds: Rect::new(0.0, 0.0, width as f32, height as f32),
            color: background,
            ..Layer::default()
        });
        self.layer_stack.push(0);
        self.begin_set(0, LAYER_NONE);
        self.frame_open = true;
    }

    /// Finalize the frame: resolve pending clips, stitch set spans, order
    /// opaque geometry, solve layer bounds, and return the upload payload.
    pub fn end_frame(&mut self) -> FrameData {
        if !self.frame_open {
            return FrameData::default();
        }
        self.frame_open = false;

        // Clips never restored behave as if restored at frame end.
        let pending = std::mem::take(&mut self.pending_clips);
        for task in pending {
            self.layers[task.layer as usize].depth *= DEPTH_SHRINK;
            self.chunks[task.chunk as usize].depth = self.layers[task.layer as usize].depth;
        }

        // One set's end is the next set's start.
        for i in 0..self.sets.len() {
            let (batch_end, chunk_end) = if i + 1 < self.sets.len() {
                (self.sets[i + 1].batch_start, self.sets[i + 1].chunk_start)
            } else {
                (self.batches.len() as u32, self.chunks.len() as u32)
            };
            self.sets[i].batch_end = batch_end;
            self.sets[i].chunk_end = chunk_end;
        }

        // Reverse triangle order inside opaque simple batches so the topmost
        // content draws first and early depth rejection kicks in.
        for batch in &self.batches {
            if batch.opaque && batch.kind == BatchKind::Simple && batch.index_count >= 6 {
                let start = batch.index_start as usize;
                let end = start + batch.index_count as usize;
                reverse_triangles(&mut self.indices[start..end]);
            }
        }

        let (lines, runs) = self.silhouette.take_grouped();
        for (layer, start, count) in runs {
            let layer = &mut self.layers[layer as usize];
            layer.line_start = start;
            layer.line_count = count;
        }

        compose::resolve(
            &mut self.layers,
            &mut self.sets,
            &self.batches,
            &mut self.chunks,
        );

        FrameData {
            draw_lists: DrawLists {
                layers: std::mem::take(&mut self.layers),
                sets: std::mem::take(&mut self.sets),
                batches: std::mem::take(&mut self.batches),
            },
            vertices: std::mem::take(&mut self.vertices),
            indices: std::mem::take(&mut self.indices),
            chunks: std::mem::take(&mut self.chunks),
            covers: std::mem::take(&mut self.covers),
            segments: std::mem::take(&mut self.segments),
            tile_indices: std::mem::take(&mut self.tile_indices),
            tiles: std::mem::take(&mut self.tiles),
            lines,
            stop_texels: self.stops.texels().to_vec(),
            viewport: self.viewport,
            background: self.background,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Layers and clipping
    // ─────────────────────────────────────────────────────────────────────

    /// Open a nested translucent layer. `expand` inflates the clip rectangle
    /// (for effects that bleed past the nominal bounds).
    pub fn push_layer(&mut self, clip: Rect, expand: f32, op: CompositeOp) {
        let parent = self.current_layer();
        let parent_clip = self.layers[parent as usize].clip;
        let clip = clip.inflate(expand, expand).intersection(&parent_clip);

        let index = self.layers.len() as u32;
        self.layers.push(Layer {
            parent,
            clip,
            composite: CompositeCmd {
                data: 0,
                opacity: op.opacity.clamp(0.0, 1.0),
                blend: op.blend,
            },
            ..Layer::default()
        });
        self.layer_stack.push(index);
        self.begin_set(index, LAYER_NONE);
    }

    /// Close the innermost layer and schedule its composite into the parent.
    pub fn pop_layer(&mut self) {
        if self.layer_stack.len() <= 1 {
            tracing::warn!("pop_layer without matching push_layer");
            return;
        }
        let child = self.layer_stack.pop().unwrap_or(0);
        let parent = self.current_layer();

        // The composite participates in the parent's depth order like any
        // other draw; its chunk carries that depth.
        let parent_clip = self.layers[parent as usize].clip;
        match self.alloc_chunk(parent_clip, Color::WHITE) {
            Some(chunk) => {
                let depth = self.advance_depth();
                self.chunks[chunk as usize].depth = depth;
                self.layers[child as usize].composite.data = chunk;
                self.begin_set(parent, child);
            }
            None => {
                // No chunk left: the child's content is dropped this frame.
                self.begin_set(parent, LAYER_NONE);
            }
        }
    }

    /// Mask subsequent draws to the interior of `shape`: the area outside it
    /// (within the current clip) is blocked until `restore_clip` is called
    /// with this id or a smaller one.
    pub fn clip_out(&mut self, id: u32, shape: &PathData, rule: FillRule) {
        let clip = self.current_clip();
        if fill::choose_strategy(shape, rule) == FillStrategy::Skip {
            return;
        }
        let mode = fill::stencil_mode_for(rule).complement();
        let Some(chunk) = self.alloc_chunk(clip, Color::TRANSPARENT) else {
            return;
        };
        let depth = self.advance_depth();
        self.chunks[chunk as usize].depth = depth;
        self.record_stencil_contours(shape, chunk, mode, PaintKind::Empty, true, None, clip, clip);
        self.pending_clips.push(ClipTask {
            id,
            chunk,
            layer: self.current_layer(),
        });
    }

    /// Resolve every pending clip task with index >= `id` by writing the
    /// current layer depth into its blocker chunk. Draws recorded after this
    /// point are no longer blocked.
    pub fn restore_clip(&mut self, id: u32) {
        let mut i = 0;
        while i < self.pending_clips.len() {
            if self.pending_clips[i].id >= id {
                let task = self.pending_clips.swap_remove(i);
                // One depth step puts the blocker strictly below every draw
                // recorded before the restore and strictly above the rest.
                self.layers[task.layer as usize].depth *= DEPTH_SHRINK;
                self.chunks[task.chunk as usize].depth = self.layers[task.layer as usize].depth;
            } else {
                i += 1;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Draw operations
    // ─────────────────────────────────────────────────────────────────────

    /// Fill a flattened path with the given brush and fill rule.
    pub fn fill_path(&mut self, path: &PathData, brush: &Brush, rule: FillRule, aa: bool) {
        let clip = self.current_clip();
        if !path.bounds.intersects(&clip) {
            return;
        }
        let strategy = fill::choose_strategy(path, rule);
        if strategy == FillStrategy::Skip {
            return;
        }
        let Some((paint, opaque, chunk, texture)) = self.resolve_brush(brush, clip) else {
            return;
        };
        let depth = self.advance_depth();
        self.chunks[chunk as usize].depth = depth;
        let bounds = path.bounds.intersection(&clip);

        match strategy {
            FillStrategy::SinglePass => {
                let contour: Vec<Point> = path
                    .contours()
                    .map(|(pts, _)| pts)
                    .find(|pts| pts.len() >= 3)
                    .map(|pts| pts.to_vec())
                    .unwrap_or_default();
                self.record_fan(&contour, chunk, paint, opaque, texture, clip, bounds);
                if aa && self.config.antialias {
                    self.silhouette
                        .push_outline(&contour, chunk, self.current_layer());
                }
            }
            FillStrategy::TwoPass(mode) => {
                self.record_stencil_contours(path, chunk, mode, paint, opaque, texture, clip, bounds);
                if aa && self.config.antialias {
                    let layer = self.current_layer();
                    let outlines: Vec<Vec<Point>> = path
                        .contours()
                        .filter(|(pts, _)| pts.len() >= 3)
                        .map(|(pts, _)| pts.to_vec())
                        .collect();
                    for outline in outlines {
                        self.silhouette.push_outline(&outline, chunk, layer);
                    }
                }
            }
            FillStrategy::Skip => {}
        }
    }

    /// Stroke a flattened path via tiled SDF rendering. The SDF evaluation
    /// antialiases the stroke edge itself, so no silhouette is recorded.
    pub fn stroke_path(&mut self, path: &PathData, width: f32, brush: &Brush) {
        let clip = self.current_clip();
        if path.is_empty() || width <= 0.0 {
            return;
        }
        let hw = width * 0.5;
        let bounds = path.bounds.inflate(hw + 1.0, hw + 1.0).intersection(&clip);
        if bounds.is_empty() {
            return;
        }
        // The stroke shader reads only the chunk color, so gradient brushes
        // degrade to their first stop rather than wasting an atlas slot.
        let brush = match brush {
            Brush::Gradient(gradient) => {
                let Some(stop) = gradient.stops().first() else {
                    return;
                };
                Brush::Solid(stop.color.with_alpha(stop.color.a * gradient.opacity()))
            }
            other => other.clone(),
        };
        let Some((_, _, chunk, _)) = self.resolve_brush(&brush, clip) else {
            return;
        };

        let segment_base = self.segments.len() as u32;
        let Some(lattice) = stroke::clip_stroke_to_lattice(
            &path.points,
            &path.contour_lengths,
            &path.contour_closed,
            bounds,
            width,
            segment_base,
            &mut self.segments,
        ) else {
            self.release_chunk(chunk);
            return;
        };

        // Capacity checks: refuse the stroke rather than the frame.
        let tile_count = lattice.occupied().count();
        let reference_count = lattice.reference_count();
        if self.segments.len() > self.config.max_segments
            || self.tiles.len() + tile_count > self.config.max_tiles
            || self.tile_indices.len() + reference_count > self.config.max_tile_indices
        {
            tracing::warn!(
                segments = self.segments.len(),
                tiles = tile_count,
                "stroke exceeds tile buffers, skipping"
            );
            self.segments.truncate(segment_base as usize);
            self.release_chunk(chunk);
            return;
        }

        let depth = self.advance_depth();
        self.chunks[chunk as usize].depth = depth;

        let aux_start = self.tiles.len() as u32;
        lattice.pack(chunk, &mut self.tiles, &mut self.tile_indices);
        let aux_count = self.tiles.len() as u32 - aux_start;
        if aux_count == 0 {
            return;
        }

        // Tiled strokes never merge and always blend (SDF coverage alpha).
        let mut batch = Batch::simple(
            PaintKind::TiledStroke,
            false,
            self.indices.len() as u32,
            bounds,
        );
        batch.aux_start = aux_start;
        batch.aux_count = aux_count;
        self.batches.push(batch);
    }

    /// Fill an axis-aligned rectangle.
    pub fn draw_rect(&mut self, rect: Rect, brush: &Brush, aa: bool) {
        let quad = [
            Point::new(rect.x(), rect.y()),
            Point::new(rect.max_x(), rect.y()),
            Point::new(rect.max_x(), rect.max_y()),
            Point::new(rect.x(), rect.max_y()),
        ];
        self.fill_convex(&quad, rect, brush, aa);
    }

    /// Fill a single triangle.
    pub fn draw_triangle(&mut self, p0: Point, p1: Point, p2: Point, brush: &Brush, aa: bool) {
        let points = [p0, p1, p2];
        let bounds = Rect::bounding(&points);
        self.fill_convex(&points, bounds, brush, aa);
    }

    /// Fill a circle as a triangle fan. Segment count scales with radius.
    pub fn draw_circle(&mut self, center: Point, radius: f32, brush: &Brush, aa: bool) {
        if radius <= 0.0 {
            return;
        }
        let segments = ((radius * 0.8) as usize).clamp(12, 64);
        let mut points = Vec::with_capacity(segments);
        for i in 0..segments {
            let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
            points.push(Point::new(
                center.x + angle.cos() * radius,
                center.y + angle.sin() * radius,
            ));
        }
        let bounds = Rect::new(
            center.x - radius,
            center.y - radius,
            radius * 2.0,
            radius * 2.0,
        );
        self.fill_convex(&points, bounds, brush, aa);
    }

    /// Draw a line segment as a width-expanded quad.
    pub fn draw_line(&mut self, p0: Point, p1: Point, width: f32, brush: &Brush, aa: bool) {
        let dir = Vec2::new(p1.x - p0.x, p1.y - p0.y);
        if dir.length() <= f32::EPSILON || width <= 0.0 {
            return;
        }
        let n = dir.normalize().perp();
        let hw = width * 0.5;
        let quad = [
            Point::new(p0.x + n.x * hw, p0.y + n.y * hw),
            Point::new(p1.x + n.x * hw, p1.y + n.y * hw),
            Point::new(p1.x - n.x * hw, p1.y - n.y * hw),
            Point::new(p0.x - n.x * hw, p0.y - n.y * hw),
        ];
        let bounds = Rect::bounding(&quad);
        self.fill_convex(&quad, bounds, brush, aa);
    }

    /// Draw a textured quad. An empty slice skips the draw.
    pub fn draw_image(&mut self, dst: Rect, source: &TextureSlice, opacity: f32) {
        if source.is_empty() {
            return;
        }
        let clip = self.current_clip();
        if !dst.intersects(&clip) {
            return;
        }
        let Some(chunk) = self.alloc_chunk(clip, Color::WHITE.with_alpha(opacity)) else {
            return;
        };
        let depth = self.advance_depth();
        self.chunks[chunk as usize].depth = depth;

        let index_start = self.indices.len() as u32;
        self.push_textured_quad(dst, source.uv(), chunk);
        let index_count = self.indices.len() as u32 - index_start;
        self.push_textured_batch(
            PaintKind::Image,
            source.view.clone(),
            index_start,
            index_count,
            dst.intersection(&clip),
        );
    }

    /// Draw glyph quads against a glyph atlas. An empty slice skips the draw.
    pub fn draw_text(&mut self, glyphs: &[GlyphQuad], source: &TextureSlice, color: Color) {
        if source.is_empty() || glyphs.is_empty() {
            return;
        }
        let clip = self.current_clip();
        let mut bounds = Rect::ZERO;
        for g in glyphs {
            bounds = bounds.union(&g.dst);
        }
        if !bounds.intersects(&clip) {
            return;
        }
        let Some(chunk) = self.alloc_chunk(clip, color) else {
            return;
        };
        let depth = self.advance_depth();
        self.chunks[chunk as usize].depth = depth;

        let index_start = self.indices.len() as u32;
        for g in glyphs {
            self.push_textured_quad(g.dst, g.uv, chunk);
        }
        let index_count = self.indices.len() as u32 - index_start;
        self.push_textured_batch(
            PaintKind::Text,
            source.view.clone(),
            index_start,
            index_count,
            bounds.intersection(&clip),
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection (tests and debug overlays)
    // ─────────────────────────────────────────────────────────────────────

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn current_layer(&self) -> u32 {
        *self.layer_stack.last().unwrap_or(&0)
    }

    fn current_clip(&self) -> Rect {
        self.layers[self.current_layer() as usize].clip
    }

    fn begin_set(&mut self, layer: u32, composite: u32) {
        self.sets.push(Set {
            layer,
            batch_start: self.batches.len() as u32,
            batch_end: 0,
            chunk_start: self.chunks.len() as u32,
            chunk_end: 0,
            composite,
        });
    }

    fn advance_depth(&mut self) -> f32 {
        let index = self.current_layer() as usize;
        let layer = &mut self.layers[index];
        layer.depth *= DEPTH_SHRINK;
        layer.depth
    }

    /// Allocate a data chunk, refusing the draw when the table is full.
    fn alloc_chunk(&mut self, clip: Rect, color: Color) -> Option<u32> {
        if self.chunks.len() >= self.config.max_chunks {
            tracing::warn!(max = self.config.max_chunks, "data chunk table full");
            return None;
        }
        let index = self.chunks.len() as u32;
        self.chunks.push(DataChunk::new(1.0, clip, color));
        Some(index)
    }

    /// Roll back the most recent chunk if a draw bails after allocating it.
    fn release_chunk(&mut self, chunk: u32) {
        if chunk as usize + 1 == self.chunks.len() {
            self.chunks.pop();
        }
    }

    /// Turn a brush into a paint kind, opacity class, populated chunk, and
    /// the texture the batch must bind (patterns only).
    fn resolve_brush(
        &mut self,
        brush: &Brush,
        clip: Rect,
    ) -> Option<(PaintKind, bool, u32, Option<Arc<wgpu::TextureView>>)> {
        let opaque = brush.is_opaque();
        match brush {
            Brush::Solid(color) => {
                let chunk = self.alloc_chunk(clip, *color)?;
                Some((PaintKind::Solid, opaque, chunk, None))
            }
            Brush::Gradient(gradient) => {
                match self.stops.push(gradient.stops(), gradient.opacity()) {
                    Some(slot) => {
                        let chunk = self.alloc_chunk(clip, Color::WHITE)?;
                        let (kind, params) = match gradient {
                            Gradient::Linear { start, end, .. } => (
                                PaintKind::LinearGradient,
                                [start.x, start.y, end.x, end.y],
                            ),
                            Gradient::Radial { center, radius, .. } => (
                                PaintKind::RadialGradient,
                                [center.x, center.y, *radius, 0.0],
                            ),
                        };
                        let c = &mut self.chunks[chunk as usize];
                        c.stop_slot = slot as f32;
                        c.params = params;
                        Some((kind, opaque, chunk, None))
                    }
                    None => {
                        // Atlas full: degrade to the first stop's color.
                        let color = gradient.stops().first().map(|s| s.color)?;
                        let color = color.with_alpha(color.a * gradient.opacity());
                        let chunk = self.alloc_chunk(clip, color)?;
                        Some((PaintKind::Solid, color.is_opaque(), chunk, None))
                    }
                }
            }
            Brush::Pattern(pattern) => {
                let slice = self.textures.as_ref()?.get_texture(pattern.image);
                if slice.is_empty() {
                    return None;
                }
                let chunk = self.alloc_chunk(clip, Color::WHITE.with_alpha(pattern.opacity))?;
                // Axis-aligned placement: the transform's scale and
                // translation map the unit image square to screen space.
                let [a, _, _, d, tx, ty] = pattern.transform.elements;
                let c = &mut self.chunks[chunk as usize];
                c.params = [
                    tx,
                    ty,
                    1.0 / a.max(f32::EPSILON),
                    1.0 / d.max(f32::EPSILON),
                ];
                Some((PaintKind::Pattern, false, chunk, slice.view))
            }
        }
    }

    /// Record a convex polygon as a fan in a simple batch.
    fn fill_convex(&mut self, points: &[Point], bounds: Rect, brush: &Brush, aa: bool) {
        let clip = self.current_clip();
        if points.len() < 3 || bounds.area() <= 0.0 || !bounds.intersects(&clip) {
            return;
        }
        let Some((paint, opaque, chunk, texture)) = self.resolve_brush(brush, clip) else {
            return;
        };
        let depth = self.advance_depth();
        self.chunks[chunk as usize].depth = depth;
        self.record_fan(points, chunk, paint, opaque, texture, clip, bounds.intersection(&clip));
        if aa && self.config.antialias {
            self.silhouette
                .push_outline(points, chunk, self.current_layer());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_fan(
        &mut self,
        points: &[Point],
        chunk: u32,
        paint: PaintKind,
        opaque: bool,
        texture: Option<Arc<wgpu::TextureView>>,
        clip: Rect,
        bounds: Rect,
    ) {
        if points.len() < 3 {
            return;
        }
        let base = self.vertices.len() as u32;
        for p in points {
            self.vertices.push(GpuVertex::new(p.x, p.y, chunk));
        }
        let index_start = self.indices.len() as u32;
        fill::fan_indices(base, points.len() as u32, &mut self.indices);
        let added = self.indices.len() as u32 - index_start;
        self.append_simple(paint, opaque, texture, index_start, added, clip, bounds);
    }

    /// Record all usable contours of a path as a stencil pass plus a cover.
    #[allow(clippy::too_many_arguments)]
    fn record_stencil_contours(
        &mut self,
        path: &PathData,
        chunk: u32,
        mode: StencilMode,
        paint: PaintKind,
        opaque: bool,
        texture: Option<Arc<wgpu::TextureView>>,
        clip: Rect,
        bounds: Rect,
    ) {
        // Clip blockers cover the whole clip rect: the complement of the
        // shape inside it is what gets depth-blocked. Regular fills cover
        // their bounds intersected with the clip.
        let quad = if paint == PaintKind::Empty {
            clip
        } else {
            fill::cover_quad(path.bounds, clip)
        };
        if quad.is_empty() {
            return;
        }

        let base_index = self.indices.len() as u32;
        for (points, _closed) in path.contours() {
            if points.len() < 3 {
                continue;
            }
            let base = self.vertices.len() as u32;
            for p in points {
                self.vertices.push(GpuVertex::new(p.x, p.y, chunk));
            }
            fill::fan_indices(base, points.len() as u32, &mut self.indices);
        }
        let added = self.indices.len() as u32 - base_index;
        if added == 0 {
            return;
        }

        let cover = GpuCover::new(quad, clip, chunk);
        self.append_two_pass(
            paint, mode, opaque, texture, base_index, added, cover, clip, bounds,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn append_simple(
        &mut self,
        paint: PaintKind,
        opaque: bool,
        texture: Option<Arc<wgpu::TextureView>>,
        index_start: u32,
        index_count: u32,
        clip: Rect,
        bounds: Rect,
    ) {
        let set_start = self.sets.last().map(|s| s.batch_start).unwrap_or(0);
        if self.batches.len() as u32 > set_start {
            if let Some(last) = self.batches.last_mut() {
                if last.can_accept(
                    BatchKind::Simple,
                    paint,
                    StencilMode::default(),
                    opaque,
                    &clip,
                    &self.covers,
                ) {
                    last.index_count += index_count;
                    last.bounds = last.bounds.union(&bounds);
                    return;
                }
            }
        }
        let mut batch = Batch::simple(paint, opaque, index_start, bounds);
        batch.index_count = index_count;
        batch.texture = texture;
        self.batches.push(batch);
    }

    #[allow(clippy::too_many_arguments)]
    fn append_two_pass(
        &mut self,
        paint: PaintKind,
        mode: StencilMode,
        opaque: bool,
        texture: Option<Arc<wgpu::TextureView>>,
        index_start: u32,
        index_count: u32,
        cover: GpuCover,
        clip: Rect,
        bounds: Rect,
    ) {
        let set_start = self.sets.last().map(|s| s.batch_start).unwrap_or(0);
        if self.batches.len() as u32 > set_start {
            if let Some(last) = self.batches.last_mut() {
                if last.can_accept(BatchKind::TwoPass, paint, mode, opaque, &clip, &self.covers) {
                    last.index_count += index_count;
                    last.aux_count += 1;
                    last.bounds = last.bounds.union(&bounds);
                    self.covers.push(cover);
                    return;
                }
            }
        }
        let mut batch = Batch::two_pass(
            paint,
            mode,
            opaque,
            index_start,
            self.covers.len() as u32,
            bounds,
        );
        batch.index_count = index_count;
        batch.aux_count = 1;
        batch.texture = texture;
        self.covers.push(cover);
        self.batches.push(batch);
    }

    fn push_textured_quad(&mut self, dst: Rect, uv: Rect, chunk: u32) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&[
            GpuVertex::with_uv(dst.x(), dst.y(), uv.x(), uv.y(), chunk),
            GpuVertex::with_uv(dst.max_x(), dst.y(), uv.max_x(), uv.y(), chunk),
            GpuVertex::with_uv(dst.max_x(), dst.max_y(), uv.max_x(), uv.max_y(), chunk),
            GpuVertex::with_uv(dst.x(), dst.max_y(), uv.x(), uv.max_y(), chunk),
        ]);
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Textured paints never merge: per-instance pixel content differs.
    /// Textured content always blends: texel alpha is invisible to the
    /// recorder, and glyph coverage is fractional.
    fn push_textured_batch(
        &mut self,
        paint: PaintKind,
        view: Option<Arc<wgpu::TextureView>>,
        index_start: u32,
        index_count: u32,
        bounds: Rect,
    ) {
        let mut batch = Batch::simple(paint, false, index_start, bounds);
        batch.index_count = index_count;
        batch.texture = view;
        self.batches.push(batch);
    }
}

/// Reverse a run of triangles in place without flipping winding.
fn reverse_triangles(indices: &mut [u32]) {
    let tri_count = indices.len() / 3;
    for i in 0..tri_count / 2 {
        let j = tri_count - 1 - i;
        for k in 0..3 {
            indices.swap(i * 3 + k, j * 3 + k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(w: u32, h: u32) -> PaintEngine {
        let mut e = PaintEngine::new(EngineConfig::default());
        e.begin_frame(w, h, Color::BLACK);
        e
    }

    fn red() -> Brush {
        Brush::Solid(Color::RED)
    }

    #[test]
    fn frame_isolation() {
        let mut e = PaintEngine::new(EngineConfig::default());
        e.begin_frame(100, 100, Color::BLACK);
        e.draw_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &red(), false);
        let first = e.end_frame();
        assert!(!first.is_empty());

        e.begin_frame(100, 100, Color::BLACK);
        let second = e.end_frame();
        assert!(second.is_empty());
        assert!(second.vertices.is_empty());
        assert_eq!(second.draw_lists.batches.len(), 0);

        e.begin_frame(100, 100, Color::BLACK);
        let third = e.end_frame();
        assert!(third.is_empty());
    }

    #[test]
    fn contiguous_solid_fills_merge_into_one_batch() {
        let mut e = engine(200, 200);
        for i in 0..5 {
            e.draw_rect(Rect::new(i as f32 * 20.0, 0.0, 10.0, 10.0), &red(), false);
        }
        assert_eq!(e.batch_count(), 1);
        let frame = e.end_frame();
        let batch = &frame.draw_lists.batches[0];
        // 5 quads, 2 triangles each.
        assert_eq!(batch.index_count, 30);
        assert!(batch.opaque);
    }

    #[test]
    fn opacity_class_change_splits_batches() {
        let mut e = engine(200, 200);
        e.draw_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &red(), false);
        e.draw_rect(
            Rect::new(20.0, 0.0, 10.0, 10.0),
            &Brush::Solid(Color::RED.with_alpha(0.5)),
            false,
        );
        e.draw_rect(Rect::new(40.0, 0.0, 10.0, 10.0), &red(), false);
        assert_eq!(e.batch_count(), 3);
    }

    #[test]
    fn draws_outside_clip_are_rejected() {
        let mut e = engine(100, 100);
        e.draw_rect(Rect::new(500.0, 500.0, 10.0, 10.0), &red(), false);
        assert_eq!(e.batch_count(), 0);
        assert_eq!(e.chunk_count(), 0);
    }

    #[test]
    fn depth_shrinks_per_draw() {
        let mut e = engine(100, 100);
        e.draw_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &red(), false);
        e.draw_rect(Rect::new(20.0, 0.0, 10.0, 10.0), &red(), false);
        let frame = e.end_frame();
        assert!(frame.chunks[0].depth > frame.chunks[1].depth);
        assert!(frame.chunks[0].depth < 1.0);
    }

    #[test]
    fn opaque_batch_triangles_are_reversed_at_end() {
        let mut e = engine(200, 200);
        e.draw_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &red(), false);
        e.draw_rect(Rect::new(20.0, 0.0, 10.0, 10.0), &red(), false);
        let frame = e.end_frame();
        // Last-recorded quad's triangles now come first.
        assert_eq!(frame.indices[0], 4);
    }

    #[test]
    fn push_pop_layer_creates_sets_and_composite_marker() {
        let mut e = engine(300, 300);
        e.draw_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &red(), false);
        e.push_layer(
            Rect::new(0.0, 0.0, 200.0, 200.0),
            0.0,
            CompositeOp {
                opacity: 0.5,
                blend: BlendMode::Normal,
            },
        );
        e.draw_rect(Rect::new(10.0, 10.0, 50.0, 50.0), &red(), false);
        e.pop_layer();
        e.draw_rect(Rect::new(100.0, 0.0, 10.0, 10.0), &red(), false);
        let frame = e.end_frame();

        assert_eq!(frame.draw_lists.layers.len(), 2);
        assert_eq!(frame.draw_lists.sets.len(), 3);
        let last_set = &frame.draw_lists.sets[2];
        assert_eq!(last_set.layer, 0);
        assert_eq!(last_set.composite, 1);
        assert!((frame.draw_lists.layers[1].composite.opacity - 0.5).abs() < 1e-6);

        // Stitching: consecutive spans line up.
        for pair in frame.draw_lists.sets.windows(2) {
            assert_eq!(pair[0].batch_end, pair[1].batch_start);
            assert_eq!(pair[0].chunk_end, pair[1].chunk_start);
        }
    }

    #[test]
    fn layer_clip_intersects_parent() {
        let mut e = engine(100, 100);
        e.push_layer(Rect::new(50.0, 50.0, 200.0, 200.0), 0.0, CompositeOp::default());
        let frame_clip = e.current_clip();
        assert_eq!(frame_clip, Rect::new(50.0, 50.0, 50.0, 50.0));
    }

    #[test]
    fn unbalanced_pop_is_ignored() {
        let mut e = engine(100, 100);
        e.pop_layer();
        assert_eq!(e.layer_count(), 1);
    }

    #[test]
    fn clip_out_records_blocker_and_restore_patches_depth() {
        let mut e = engine(100, 100);
        let mut b = sable_core::PathBuilder::new();
        b.rect(Rect::new(10.0, 10.0, 30.0, 30.0));
        let shape = b.build();

        e.clip_out(1, &shape, FillRule::NonZero);
        let blocker_chunk = 0usize;
        let blocked_depth = e.chunks[blocker_chunk].depth;

        e.draw_rect(Rect::new(0.0, 0.0, 50.0, 50.0), &red(), false);
        e.restore_clip(1);
        let restored_depth = e.chunks[blocker_chunk].depth;

        // The blocker now sits below everything recorded before the restore.
        assert!(restored_depth < blocked_depth);
        assert!(restored_depth < e.chunks[1].depth);

        e.draw_rect(Rect::new(0.0, 0.0, 50.0, 50.0), &red(), false);
        let frame = e.end_frame();
        // Draw after restore is below the blocker depth.
        assert!(frame.chunks[2].depth < restored_depth);

        // The blocker batch is a two-pass complement with an Empty paint.
        let blocker = &frame.draw_lists.batches[0];
        assert_eq!(blocker.kind, BatchKind::TwoPass);
        assert_eq!(blocker.paint, PaintKind::Empty);
        assert_eq!(blocker.stencil, StencilMode::NonZeroComplement);
    }

    #[test]
    fn unrestored_clip_resolves_at_end_frame() {
        let mut e = engine(100, 100);
        let mut b = sable_core::PathBuilder::new();
        b.rect(Rect::new(10.0, 10.0, 30.0, 30.0));
        let shape = b.build();

        e.clip_out(7, &shape, FillRule::NonZero);
        e.draw_rect(Rect::new(0.0, 0.0, 50.0, 50.0), &red(), false);
        let frame = e.end_frame();
        // Blocker depth ended up at the layer's final depth: below every draw.
        assert!(frame.chunks[0].depth <= frame.chunks[1].depth);
    }

    #[test]
    fn concave_fill_goes_two_pass_with_cover() {
        let mut e = engine(100, 100);
        let mut b = sable_core::PathBuilder::new();
        b.move_to(0.0, 0.0);
        b.line_to(40.0, 0.0);
        b.line_to(40.0, 40.0);
        b.line_to(20.0, 10.0);
        b.line_to(0.0, 40.0);
        b.close();
        let path = b.build();

        e.fill_path(&path, &red(), FillRule::NonZero, false);
        let frame = e.end_frame();
        let batch = &frame.draw_lists.batches[0];
        assert_eq!(batch.kind, BatchKind::TwoPass);
        assert_eq!(batch.aux_count, 1);
        assert_eq!(frame.covers.len(), 1);
        assert_eq!(frame.covers[0].quad_rect(), Rect::new(0.0, 0.0, 40.0, 40.0));
    }

    #[test]
    fn two_pass_fills_with_overlapping_clips_do_not_merge() {
        let mut e = engine(400, 400);
        let concave = |x: f32| {
            let mut b = sable_core::PathBuilder::new();
            b.move_to(x, 0.0);
            b.line_to(x + 40.0, 0.0);
            b.line_to(x + 40.0, 40.0);
            b.line_to(x + 20.0, 10.0);
            b.line_to(x, 40.0);
            b.close();
            b.build()
        };
        e.fill_path(&concave(0.0), &red(), FillRule::NonZero, false);
        e.fill_path(&concave(100.0), &red(), FillRule::NonZero, false);
        // Both two-pass batches share the full-viewport clip, so the second
        // cannot merge into the first.
        assert_eq!(e.batch_count(), 2);
    }

    #[test]
    fn pattern_without_resolvable_texture_is_skipped() {
        struct NoTextures;
        impl TextureSource for NoTextures {
            fn get_texture(&self, _key: u64) -> TextureSlice {
                TextureSlice::empty()
            }
        }

        let brush = Brush::Pattern(sable_core::Pattern {
            image: 7,
            transform: sable_core::Affine2D::scale(50.0, 50.0),
            opacity: 1.0,
        });
        let mut e = engine(100, 100);
        // No source installed.
        e.draw_rect(Rect::new(0.0, 0.0, 50.0, 50.0), &brush, false);
        assert_eq!(e.batch_count(), 0);

        // Source resolves to nothing.
        e.set_texture_source(Arc::new(NoTextures));
        e.draw_rect(Rect::new(0.0, 0.0, 50.0, 50.0), &brush, false);
        assert_eq!(e.batch_count(), 0);
        assert_eq!(e.chunk_count(), 0);
    }

    #[test]
    fn textured_batches_always_take_the_blended_path() {
        let mut e = engine(100, 100);
        let clip = Rect::new(0.0, 0.0, 100.0, 100.0);
        let chunk = match e.alloc_chunk(clip, Color::WHITE) {
            Some(c) => c,
            None => panic!("chunk table empty at frame start"),
        };
        let dst = Rect::new(0.0, 0.0, 32.0, 32.0);
        let index_start = e.indices.len() as u32;
        e.push_textured_quad(dst, Rect::new(0.0, 0.0, 1.0, 1.0), chunk);
        let index_count = e.indices.len() as u32 - index_start;
        e.push_textured_batch(PaintKind::Image, None, index_start, index_count, dst);

        // Even a fully opaque source image must blend: its texels can carry
        // alpha the recorder never sees.
        let batch = &e.batches[0];
        assert!(!batch.opaque);
        assert_eq!(batch.paint, PaintKind::Image);
    }

    #[test]
    fn empty_texture_slice_skips_draw() {
        let mut e = engine(100, 100);
        e.draw_image(Rect::new(0.0, 0.0, 50.0, 50.0), &TextureSlice::empty(), 1.0);
        assert_eq!(e.batch_count(), 0);
    }

    #[test]
    fn degenerate_shapes_are_no_ops() {
        let mut e = engine(100, 100);
        e.draw_circle(Point::new(10.0, 10.0), 0.0, &red(), false);
        e.draw_line(Point::new(5.0, 5.0), Point::new(5.0, 5.0), 2.0, &red(), false);
        e.draw_rect(Rect::new(0.0, 0.0, 10.0, 0.0), &red(), false);
        assert_eq!(e.batch_count(), 0);
        assert_eq!(e.chunk_count(), 0);
    }

    #[test]
    fn chunk_table_exhaustion_refuses_draws() {
        let mut e = PaintEngine::new(EngineConfig {
            max_chunks: 2,
            ..EngineConfig::default()
        });
        e.begin_frame(100, 100, Color::BLACK);
        e.draw_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &red(), false);
        e.draw_rect(Rect::new(20.0, 0.0, 10.0, 10.0), &red(), false);
        e.draw_rect(Rect::new(40.0, 0.0, 10.0, 10.0), &red(), false);
        assert_eq!(e.chunk_count(), 2);
        let frame = e.end_frame();
        // Two quads made it through.
        assert_eq!(frame.indices.len(), 12);
    }

    #[test]
    fn gradient_atlas_exhaustion_degrades_to_solid() {
        let mut e = engine(400, 400);
        let gradient = |x: f32| {
            Brush::Gradient(Gradient::Linear {
                start: Point::new(x, 0.0),
                end: Point::new(x + 10.0, 0.0),
                stops: vec![
                    sable_core::GradientStop::new(0.0, Color::RED),
                    sable_core::GradientStop::new(1.0, Color::BLUE),
                ],
                opacity: 1.0,
            })
        };
        for i in 0..(crate::stops::STOP_ATLAS_SLOTS + 2) {
            e.draw_rect(Rect::new(i as f32 * 12.0, 0.0, 10.0, 10.0), &gradient(0.0), false);
        }
        let frame = e.end_frame();
        let solid_fallbacks = frame
            .draw_lists
            .batches
            .iter()
            .filter(|b| b.paint == PaintKind::Solid)
            .count();
        assert!(solid_fallbacks >= 1);
    }

    #[test]
    fn stroke_produces_tiles_and_segments() {
        let mut e = engine(200, 200);
        let mut b = sable_core::PathBuilder::new();
        b.move_to(0.0, 0.0);
        b.line_to(100.0, 100.0);
        let path = b.build();
        e.stroke_path(&path, 8.0, &red());
        let frame = e.end_frame();
        assert_eq!(frame.segments.len(), 1);
        assert!(!frame.tiles.is_empty());
        let batch = &frame.draw_lists.batches[0];
        assert_eq!(batch.paint, PaintKind::TiledStroke);
        assert!(!batch.opaque);
        assert_eq!(batch.aux_count as usize, frame.tiles.len());
    }

    #[test]
    fn gradient_strokes_degrade_to_first_stop_color() {
        let mut e = engine(200, 200);
        let mut b = sable_core::PathBuilder::new();
        b.move_to(10.0, 10.0);
        b.line_to(150.0, 150.0);
        let path = b.build();
        let brush = Brush::Gradient(Gradient::Linear {
            start: Point::new(0.0, 0.0),
            end: Point::new(200.0, 0.0),
            stops: vec![
                sable_core::GradientStop::new(0.0, Color::RED),
                sable_core::GradientStop::new(1.0, Color::BLUE),
            ],
            opacity: 0.5,
        });
        e.stroke_path(&path, 8.0, &brush);
        let frame = e.end_frame();
        assert_eq!(frame.draw_lists.batches[0].paint, PaintKind::TiledStroke);
        assert_eq!(frame.chunks[0].color, [1.0, 0.0, 0.0, 0.5]);
        // No atlas slot was consumed.
        assert!(frame.stop_texels.is_empty());
    }

    #[test]
    fn reverse_triangles_keeps_winding() {
        let mut idx = vec![0, 1, 2, 3, 4, 5, 6, 7, 8];
        reverse_triangles(&mut idx);
        assert_eq!(idx, vec![6, 7, 8, 3, 4, 5, 0, 1, 2]);
    }
}
