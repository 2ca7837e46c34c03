//! GPU-facing data structures and frame draw lists.
//!
//! All buffer payloads are `#[repr(C)]` and implement `bytemuck::Pod` so they
//! upload byte-for-byte. Record types (`Layer`, `Set`, `Batch`) stay CPU-side;
//! the executor walks them and issues draws against the uploaded buffers.

use std::sync::Arc;

use sable_core::{BlendMode, Color, Rect};

/// Sentinel layer index meaning "composite nothing". The root layer is never
/// composited into anything, so index 0 doubles as the null marker.
pub const LAYER_NONE: u32 = 0;

/// Depth shrink applied after every successful draw. Later draws get strictly
/// smaller depth values, which gives painter's order under a plain Less test.
pub const DEPTH_SHRINK: f32 = 0.999;

/// Paint kind selecting a pipeline and merge class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaintKind {
    /// Depth-only draws (clip blockers). No color output.
    Empty,
    Solid,
    LinearGradient,
    RadialGradient,
    Pattern,
    Image,
    Text,
    TiledStroke,
}

impl PaintKind {
    /// Only paint kinds with no per-instance pixel content difference merge.
    pub fn mergeable(&self) -> bool {
        matches!(self, PaintKind::Solid | PaintKind::Empty)
    }
}

/// Stencil strategy for a two-pass fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StencilMode {
    #[default]
    NonZero,
    EvenOdd,
    /// Cover where the winding is zero (clip-region computation).
    NonZeroComplement,
    /// Cover where the parity bit is clear.
    EvenOddComplement,
}

impl StencilMode {
    pub fn complement(self) -> StencilMode {
        match self {
            StencilMode::NonZero => StencilMode::NonZeroComplement,
            StencilMode::EvenOdd => StencilMode::EvenOddComplement,
            StencilMode::NonZeroComplement => StencilMode::NonZero,
            StencilMode::EvenOddComplement => StencilMode::EvenOdd,
        }
    }
}

/// Which draw-call shape a batch takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchKind {
    /// One draw call.
    Simple,
    /// Stencil pass over the batch triangles, then an instanced cover pass.
    TwoPass,
}

/// Vertex in the shared vertex buffer.
///
/// `pos` is recorded in screen space; the data chunk's translate rebases it
/// into layer-local space after the compositor pass. `aux` carries UVs for
/// textured paints and is unused otherwise.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuVertex {
    pub pos: [f32; 2],
    pub aux: [f32; 2],
    pub data: u32,
}

impl GpuVertex {
    pub const fn new(x: f32, y: f32, data: u32) -> Self {
        Self {
            pos: [x, y],
            aux: [0.0, 0.0],
            data,
        }
    }

    pub const fn with_uv(x: f32, y: f32, u: f32, v: f32, data: u32) -> Self {
        Self {
            pos: [x, y],
            aux: [u, v],
            data,
        }
    }
}

/// Per-draw uniform payload, addressed by index from vertex data and uploaded
/// as one flat storage buffer. 80 bytes, 16-byte aligned fields.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DataChunk {
    /// 2x2 linear part of the local-to-layer transform: a, b, c, d.
    pub transform: [f32; 4],
    /// Translation part of the transform.
    pub translate: [f32; 2],
    /// Depth value for painter's-order tie-breaking.
    pub depth: f32,
    /// Gradient stop-atlas slot (as float for shader convenience); 0 otherwise.
    pub stop_slot: f32,
    /// Clip rectangle x, y, w, h in the same space as `translate`.
    pub clip: [f32; 4],
    /// Draw color (premultiplication happens in the shader).
    pub color: [f32; 4],
    /// Paint parameters: gradient start/end or center/radius, pattern scale.
    pub params: [f32; 4],
}

impl DataChunk {
    pub fn new(depth: f32, clip: Rect, color: Color) -> Self {
        Self {
            transform: [1.0, 0.0, 0.0, 1.0],
            translate: [0.0, 0.0],
            depth,
            stop_slot: 0.0,
            clip: [clip.x(), clip.y(), clip.width(), clip.height()],
            color: color.to_array(),
            params: [0.0; 4],
        }
    }

    pub fn clip_rect(&self) -> Rect {
        Rect::new(self.clip[0], self.clip[1], self.clip[2], self.clip[3])
    }

    pub fn set_clip_rect(&mut self, clip: Rect) {
        self.clip = [clip.x(), clip.y(), clip.width(), clip.height()];
    }
}

/// Cover quad for the second pass of a two-pass batch, instanced from a
/// storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuCover {
    /// Quad x, y, w, h in screen space (rebased via the data chunk).
    pub quad: [f32; 4],
    /// Clip rectangle at record time; the executor relies on the chunk clip,
    /// this copy drives CPU-side merge checks.
    pub clip: [f32; 4],
    pub data: u32,
    pub _pad: [u32; 3],
}

impl GpuCover {
    pub fn new(quad: Rect, clip: Rect, data: u32) -> Self {
        Self {
            quad: [quad.x(), quad.y(), quad.width(), quad.height()],
            clip: [clip.x(), clip.y(), clip.width(), clip.height()],
            data,
            _pad: [0; 3],
        }
    }

    pub fn clip_rect(&self) -> Rect {
        Rect::new(self.clip[0], self.clip[1], self.clip[2], self.clip[3])
    }

    pub fn quad_rect(&self) -> Rect {
        Rect::new(self.quad[0], self.quad[1], self.quad[2], self.quad[3])
    }
}

/// One expanded stroke segment in the shared segment buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSegment {
    pub p0: [f32; 2],
    pub p1: [f32; 2],
    pub half_width: f32,
    pub _pad: [f32; 3],
}

impl GpuSegment {
    pub fn new(p0: [f32; 2], p1: [f32; 2], half_width: f32) -> Self {
        Self {
            p0,
            p1,
            half_width,
            _pad: [0.0; 3],
        }
    }
}

/// A screen tile touched by a stroke, with its run of segment indices in the
/// shared tile-index buffer. Rendered as one instanced quad per tile.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedTile {
    pub x: u32,
    pub y: u32,
    pub offset: u32,
    pub count: u32,
    pub data: u32,
    pub _pad: [u32; 3],
}

/// Silhouette edge for the antialiasing pass. `layer` groups lines per render
/// target; the shader only reads `p0`, `p1`, and `data`.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLine {
    pub p0: [f32; 2],
    pub p1: [f32; 2],
    pub data: u32,
    pub layer: u32,
}

/// Globals uniform bound to every pass: the current render target size.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Globals {
    pub viewport: [f32; 2],
    pub _pad: [f32; 2],
}

/// Uniform payload for the layer-composite and blit passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeUniforms {
    /// Destination rect x, y, w, h in target pixels.
    pub dest: [f32; 4],
    /// Source UV rect within the child texture.
    pub source_uv: [f32; 4],
    pub viewport: [f32; 2],
    pub opacity: f32,
    pub depth: f32,
}

/// A run of triangles sharing paint state: one draw call (or a stencil +
/// cover pair). Triangle indices referenced by a batch are contiguous in the
/// shared index buffer.
#[derive(Clone, Debug)]
pub struct Batch {
    pub kind: BatchKind,
    pub paint: PaintKind,
    pub stencil: StencilMode,
    /// Opacity class: true when every pixel the batch writes is opaque.
    pub opaque: bool,
    /// Index range into the shared triangle index buffer.
    pub index_start: u32,
    pub index_count: u32,
    /// Cover range (two-pass) or packed-tile range (tiled stroke).
    pub aux_start: u32,
    pub aux_count: u32,
    /// Screen-space bounding box of everything the batch draws; folded into
    /// layer bounds by the compositor.
    pub bounds: Rect,
    /// Bound texture for image/text batches.
    pub texture: Option<Arc<wgpu::TextureView>>,
}

impl Batch {
    pub fn simple(paint: PaintKind, opaque: bool, index_start: u32, bounds: Rect) -> Self {
        Self {
            kind: BatchKind::Simple,
            paint,
            stencil: StencilMode::default(),
            opaque,
            index_start,
            index_count: 0,
            aux_start: 0,
            aux_count: 0,
            bounds,
            texture: None,
        }
    }

    pub fn two_pass(
        paint: PaintKind,
        stencil: StencilMode,
        opaque: bool,
        index_start: u32,
        aux_start: u32,
        bounds: Rect,
    ) -> Self {
        Self {
            kind: BatchKind::TwoPass,
            paint,
            stencil,
            opaque,
            index_start,
            index_count: 0,
            aux_start,
            aux_count: 0,
            bounds,
            texture: None,
        }
    }

    /// Merging rule: same batch kind, mergeable paint kind, identical paint,
    /// same opacity class, and for two-pass draws a clip that stays clear of
    /// every cover already in the batch (stencil fills are order- and
    /// clip-sensitive where they overlap).
    pub fn can_accept(
        &self,
        kind: BatchKind,
        paint: PaintKind,
        stencil: StencilMode,
        opaque: bool,
        clip: &Rect,
        covers: &[GpuCover],
    ) -> bool {
        if self.kind != kind || self.paint != paint || self.opaque != opaque {
            return false;
        }
        if !self.paint.mergeable() {
            return false;
        }
        if kind == BatchKind::TwoPass {
            if self.stencil != stencil {
                return false;
            }
            let start = self.aux_start as usize;
            let end = start + self.aux_count as usize;
            if covers[start..end]
                .iter()
                .any(|c| c.clip_rect().intersects(clip))
            {
                return false;
            }
        }
        true
    }
}

/// Composite command attached to a layer: how its offscreen content lands in
/// the parent.
#[derive(Clone, Copy, Debug)]
pub struct CompositeCmd {
    /// Data chunk carrying the composite quad's depth and clip.
    pub data: u32,
    pub opacity: f32,
    pub blend: BlendMode,
}

/// A node in the per-frame compositing tree.
///
/// Every layer except the root has exactly one parent with a smaller index,
/// and its bounds never exceed its clip size.
#[derive(Clone, Debug)]
pub struct Layer {
    pub parent: u32,
    /// Clip rectangle in screen space.
    pub clip: Rect,
    /// Tight content bounds relative to the clip origin; solved at frame end.
    pub bounds: Rect,
    /// Monotonically shrinking depth counter for this layer's draws.
    pub depth: f32,
    /// Clear color for the layer's render target.
    pub color: Color,
    pub composite: CompositeCmd,
    /// Placement rect in the parent's local space; solved at frame end.
    pub place: Rect,
    /// Silhouette line range for this layer, grouped at frame end.
    pub line_start: u32,
    pub line_count: u32,
}

/// A contiguous run of batches and data chunks belonging to one layer.
///
/// `composite` optionally names a child layer whose offscreen content is
/// composited after this set's opaque batches. Spans are stitched at frame
/// end: one set's end is the next set's start.
#[derive(Clone, Copy, Debug)]
pub struct Set {
    pub layer: u32,
    pub batch_start: u32,
    pub batch_end: u32,
    pub chunk_start: u32,
    pub chunk_end: u32,
    pub composite: u32,
}

/// Finalized draw lists handed to the executor.
#[derive(Clone, Debug, Default)]
pub struct DrawLists {
    pub layers: Vec<Layer>,
    pub sets: Vec<Set>,
    pub batches: Vec<Batch>,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            parent: 0,
            clip: Rect::ZERO,
            bounds: Rect::ZERO,
            depth: 1.0,
            color: Color::TRANSPARENT,
            composite: CompositeCmd {
                data: 0,
                opacity: 1.0,
                blend: BlendMode::Normal,
            },
            place: Rect::ZERO,
            line_start: 0,
            line_count: 0,
        }
    }
}

/// Everything `end_frame` produces for upload and execution.
#[derive(Clone, Debug, Default)]
pub struct FrameData {
    pub draw_lists: DrawLists,
    pub vertices: Vec<GpuVertex>,
    pub indices: Vec<u32>,
    pub chunks: Vec<DataChunk>,
    pub covers: Vec<GpuCover>,
    pub segments: Vec<GpuSegment>,
    pub tile_indices: Vec<u32>,
    pub tiles: Vec<PackedTile>,
    pub lines: Vec<GpuLine>,
    /// Gradient stop atlas texels, `STOP_ATLAS_WIDTH` RGBA texels per slot.
    pub stop_texels: Vec<[u8; 4]>,
    pub viewport: (u32, u32),
    pub background: Color,
}

impl FrameData {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.tiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 20);
        assert_eq!(std::mem::size_of::<DataChunk>(), 80);
        assert_eq!(std::mem::size_of::<GpuCover>(), 48);
        assert_eq!(std::mem::size_of::<GpuSegment>(), 32);
        assert_eq!(std::mem::size_of::<PackedTile>(), 32);
        assert_eq!(std::mem::size_of::<GpuLine>(), 24);
    }

    #[test]
    fn merge_rejects_mixed_paint_kinds() {
        let batch = Batch::simple(PaintKind::Solid, true, 0, Rect::ZERO);
        assert!(batch.can_accept(
            BatchKind::Simple,
            PaintKind::Solid,
            StencilMode::default(),
            true,
            &Rect::new(0.0, 0.0, 10.0, 10.0),
            &[],
        ));
        assert!(!batch.can_accept(
            BatchKind::Simple,
            PaintKind::LinearGradient,
            StencilMode::default(),
            true,
            &Rect::new(0.0, 0.0, 10.0, 10.0),
            &[],
        ));
        assert!(!batch.can_accept(
            BatchKind::Simple,
            PaintKind::Solid,
            StencilMode::default(),
            false,
            &Rect::new(0.0, 0.0, 10.0, 10.0),
            &[],
        ));
    }

    #[test]
    fn merge_rejects_overlapping_covers() {
        let mut batch = Batch::two_pass(
            PaintKind::Solid,
            StencilMode::NonZero,
            true,
            0,
            0,
            Rect::ZERO,
        );
        batch.aux_count = 1;
        let covers = [GpuCover::new(
            Rect::new(0.0, 0.0, 20.0, 20.0),
            Rect::new(0.0, 0.0, 20.0, 20.0),
            0,
        )];

        // Disjoint clip merges, overlapping clip does not.
        assert!(batch.can_accept(
            BatchKind::TwoPass,
            PaintKind::Solid,
            StencilMode::NonZero,
            true,
            &Rect::new(30.0, 30.0, 10.0, 10.0),
            &covers,
        ));
        assert!(!batch.can_accept(
            BatchKind::TwoPass,
            PaintKind::Solid,
            StencilMode::NonZero,
            true,
            &Rect::new(10.0, 10.0, 10.0, 10.0),
            &covers,
        ));
    }

    #[test]
    fn stencil_mode_complement_is_involutive() {
        for mode in [
            StencilMode::NonZero,
            StencilMode::EvenOdd,
            StencilMode::NonZeroComplement,
            StencilMode::EvenOddComplement,
        ] {
            assert_eq!(mode.complement().complement(), mode);
        }
    }
}
