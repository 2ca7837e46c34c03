//! WGSL shaders for the paint pipeline.
//!
//! Every pass shares the same chunk-table convention: vertices (or instances)
//! carry a chunk index into one flat storage buffer holding per-draw state
//! (transform, translate, depth, clip, color, paint parameters). Vertex
//! shaders resolve the chunk, rebase the screen-space position into the
//! layer's local space via the chunk translate, and emit the chunk's depth.
//! Fragment shaders discard outside the chunk clip rectangle.
//!
//! Color output is premultiplied alpha throughout.

/// Direct fills: one draw per batch, fragment entry point selects the paint.
pub const FILL_SHADER: &str = r#"
struct Globals {
    viewport: vec2<f32>,
    _pad: vec2<f32>,
}

struct Chunk {
    transform: vec4<f32>,
    translate: vec2<f32>,
    depth: f32,
    stop_slot: f32,
    clip: vec4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var<storage, read> chunks: array<Chunk>;

@group(1) @binding(0) var paint_sampler: sampler;
@group(1) @binding(1) var paint_texture: texture_2d<f32>;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) raw: vec2<f32>,
    @location(1) local: vec2<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) @interpolate(flat) data: u32,
}

fn to_ndc(p: vec2<f32>, depth: f32) -> vec4<f32> {
    let x = p.x / globals.viewport.x * 2.0 - 1.0;
    let y = 1.0 - p.y / globals.viewport.y * 2.0;
    return vec4<f32>(x, y, depth, 1.0);
}

fn outside_clip(local: vec2<f32>, clip: vec4<f32>) -> bool {
    return local.x < clip.x || local.y < clip.y
        || local.x > clip.x + clip.z || local.y > clip.y + clip.w;
}

@vertex
fn vs_main(
    @location(0) pos: vec2<f32>,
    @location(1) aux: vec2<f32>,
    @location(2) data: u32,
) -> VsOut {
    let c = chunks[data];
    let m = c.transform;
    let local = vec2<f32>(m.x * pos.x + m.z * pos.y, m.y * pos.x + m.w * pos.y)
        + c.translate;

    var out: VsOut;
    out.position = to_ndc(local, c.depth);
    out.raw = pos;
    out.local = local;
    out.uv = aux;
    out.data = data;
    return out;
}

fn premultiply(color: vec4<f32>) -> vec4<f32> {
    return vec4<f32>(color.rgb * color.a, color.a);
}

fn sample_stops(raw: vec2<f32>, c: Chunk, t: f32) -> vec4<f32> {
    let u = (clamp(t, 0.0, 1.0) * 63.0 + 0.5) / 64.0;
    let v = (c.stop_slot + 0.5) / 16.0;
    return textureSample(paint_texture, paint_sampler, vec2<f32>(u, v));
}

@fragment
fn fs_solid(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(c.color);
}

@fragment
fn fs_linear_gradient(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let d = c.params.zw - c.params.xy;
    let len2 = max(dot(d, d), 1e-6);
    let t = dot(in.raw - c.params.xy, d) / len2;
    let s = sample_stops(in.raw, c, t);
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(s * c.color);
}

@fragment
fn fs_radial_gradient(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let t = distance(in.raw, c.params.xy) / max(c.params.z, 1e-6);
    let s = sample_stops(in.raw, c, t);
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(s * c.color);
}

@fragment
fn fs_textured(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let s = textureSample(paint_texture, paint_sampler, in.uv);
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(s * c.color);
}

// Pattern placement: params hold the image box origin and inverse scale.
@fragment
fn fs_pattern(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let uv = clamp((in.raw - c.params.xy) * c.params.zw, vec2<f32>(0.0), vec2<f32>(1.0));
    let s = textureSample(paint_texture, paint_sampler, uv);
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(s * c.color);
}

@fragment
fn fs_glyph(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let coverage = textureSample(paint_texture, paint_sampler, in.uv).r;
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(c.color) * coverage;
}
"#;

/// Winding pass of a two-pass fill: writes stencil only, no color.
pub const STENCIL_SHADER: &str = r#"
struct Globals {
    viewport: vec2<f32>,
    _pad: vec2<f32>,
}

struct Chunk {
    transform: vec4<f32>,
    translate: vec2<f32>,
    depth: f32,
    stop_slot: f32,
    clip: vec4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var<storage, read> chunks: array<Chunk>;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) local: vec2<f32>,
    @location(1) @interpolate(flat) data: u32,
}

@vertex
fn vs_main(
    @location(0) pos: vec2<f32>,
    @location(1) aux: vec2<f32>,
    @location(2) data: u32,
) -> VsOut {
    let c = chunks[data];
    let m = c.transform;
    let local = vec2<f32>(m.x * pos.x + m.z * pos.y, m.y * pos.x + m.w * pos.y)
        + c.translate;

    var out: VsOut;
    let x = local.x / globals.viewport.x * 2.0 - 1.0;
    let y = 1.0 - local.y / globals.viewport.y * 2.0;
    out.position = vec4<f32>(x, y, c.depth, 1.0);
    out.local = local;
    out.data = data;
    return out;
}

// Clipping happens here rather than in the cover pass: winding outside the
// clip never reaches the stencil, so the cover's reset-to-zero sees a clean
// buffer everywhere it draws.
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    if in.local.x < c.clip.x || in.local.y < c.clip.y
        || in.local.x > c.clip.x + c.clip.z || in.local.y > c.clip.y + c.clip.w {
        discard;
    }
    return vec4<f32>(0.0);
}
"#;

/// Cover pass of a two-pass fill: one instanced quad per cover, stencil-tested
/// against the winding pass, resetting stencil to zero as it draws.
pub const COVER_SHADER: &str = r#"
struct Globals {
    viewport: vec2<f32>,
    _pad: vec2<f32>,
}

struct Chunk {
    transform: vec4<f32>,
    translate: vec2<f32>,
    depth: f32,
    stop_slot: f32,
    clip: vec4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
}

struct Cover {
    quad: vec4<f32>,
    clip: vec4<f32>,
    data: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var<storage, read> chunks: array<Chunk>;
@group(0) @binding(2) var<storage, read> covers: array<Cover>;

@group(1) @binding(0) var paint_sampler: sampler;
@group(1) @binding(1) var paint_texture: texture_2d<f32>;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) raw: vec2<f32>,
    @location(1) local: vec2<f32>,
    @location(2) @interpolate(flat) data: u32,
}

var<private> corners: array<vec2<f32>, 6> = array<vec2<f32>, 6>(
    vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
    vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0), vec2<f32>(0.0, 1.0),
);

@vertex
fn vs_main(
    @builtin(vertex_index) vertex: u32,
    @builtin(instance_index) instance: u32,
) -> VsOut {
    let cover = covers[instance];
    let c = chunks[cover.data];
    let raw = cover.quad.xy + corners[vertex] * cover.quad.zw;
    let local = raw + c.translate;

    var out: VsOut;
    let x = local.x / globals.viewport.x * 2.0 - 1.0;
    let y = 1.0 - local.y / globals.viewport.y * 2.0;
    out.position = vec4<f32>(x, y, c.depth, 1.0);
    out.raw = raw;
    out.local = local;
    out.data = cover.data;
    return out;
}

fn outside_clip(local: vec2<f32>, clip: vec4<f32>) -> bool {
    return local.x < clip.x || local.y < clip.y
        || local.x > clip.x + clip.z || local.y > clip.y + clip.w;
}

fn premultiply(color: vec4<f32>) -> vec4<f32> {
    return vec4<f32>(color.rgb * color.a, color.a);
}

fn sample_stops(c: Chunk, t: f32) -> vec4<f32> {
    let u = (clamp(t, 0.0, 1.0) * 63.0 + 0.5) / 64.0;
    let v = (c.stop_slot + 0.5) / 16.0;
    return textureSample(paint_texture, paint_sampler, vec2<f32>(u, v));
}

@fragment
fn fs_solid(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(c.color);
}

@fragment
fn fs_linear_gradient(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let d = c.params.zw - c.params.xy;
    let len2 = max(dot(d, d), 1e-6);
    let t = dot(in.raw - c.params.xy, d) / len2;
    let s = sample_stops(c, t);
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(s * c.color);
}

@fragment
fn fs_radial_gradient(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let t = distance(in.raw, c.params.xy) / max(c.params.z, 1e-6);
    let s = sample_stops(c, t);
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(s * c.color);
}

@fragment
fn fs_pattern(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    let uv = clamp((in.raw - c.params.xy) * c.params.zw, vec2<f32>(0.0), vec2<f32>(1.0));
    let s = textureSample(paint_texture, paint_sampler, uv);
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return premultiply(s * c.color);
}

// Clip blockers: depth-only, color writes masked off by the pipeline.
@fragment
fn fs_empty(in: VsOut) -> @location(0) vec4<f32> {
    let c = chunks[in.data];
    if outside_clip(in.local, c.clip) {
        discard;
    }
    return vec4<f32>(0.0);
}
"#;

/// Tiled strokes: one instanced quad per occupied tile, fragments evaluate a
/// signed-distance field against only that tile's segment list.
pub const STROKE_SHADER: &str = r#"
struct Globals {
    viewport: vec2<f32>,
    _pad: vec2<f32>,
}

struct Chunk {
    transform: vec4<f32>,
    translate: vec2<f32>,
    depth: f32,
    stop_slot: f32,
    clip: vec4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
}

struct Tile {
    x: u32,
    y: u32,
    offset: u32,
    count: u32,
    data: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct Segment {
    p0: vec2<f32>,
    p1: vec2<f32>,
    half_width: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var<storage, read> chunks: array<Chunk>;
@group(0) @binding(2) var<storage, read> tiles: array<Tile>;
@group(0) @binding(3) var<storage, read> tile_indices: array<u32>;
@group(0) @binding(4) var<storage, read> segments: array<Segment>;

const TILE_SIZE: f32 = 16.0;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) raw: vec2<f32>,
    @location(1) local: vec2<f32>,
    @location(2) @interpolate(flat) tile: u32,
}

var<private> corners: array<vec2<f32>, 6> = array<vec2<f32>, 6>(
    vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
    vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0), vec2<f32>(0.0, 1.0),
);

@vertex
fn vs_main(
    @builtin(vertex_index) vertex: u32,
    @builtin(instance_index) instance: u32,
) -> VsOut {
    let tile = tiles[instance];
    let c = chunks[tile.data];
    let raw = (vec2<f32>(f32(tile.x), f32(tile.y)) + corners[vertex]) * TILE_SIZE;
    let local = raw + c.translate;

    var out: VsOut;
    let x = local.x / globals.viewport.x * 2.0 - 1.0;
    let y = 1.0 - local.y / globals.viewport.y * 2.0;
    out.position = vec4<f32>(x, y, c.depth, 1.0);
    out.raw = raw;
    out.local = local;
    out.tile = instance;
    return out;
}

fn segment_distance(p: vec2<f32>, a: vec2<f32>, b: vec2<f32>) -> f32 {
    let pa = p - a;
    let ba = b - a;
    let h = clamp(dot(pa, ba) / max(dot(ba, ba), 1e-6), 0.0, 1.0);
    return length(pa - ba * h);
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let tile = tiles[in.tile];
    let c = chunks[tile.data];
    if in.local.x < c.clip.x || in.local.y < c.clip.y
        || in.local.x > c.clip.x + c.clip.z || in.local.y > c.clip.y + c.clip.w {
        discard;
    }

    var coverage = 0.0;
    for (var j = 0u; j < tile.count; j = j + 1u) {
        let seg = segments[tile_indices[tile.offset + j]];
        let d = segment_distance(in.raw, seg.p0, seg.p1) - seg.half_width;
        coverage = max(coverage, clamp(0.5 - d, 0.0, 1.0));
    }
    if coverage <= 0.0 {
        discard;
    }
    let color = c.color;
    return vec4<f32>(color.rgb * color.a, color.a) * coverage;
}
"#;

/// Silhouette edge smoothing: instanced one-pixel quads along recorded edges,
/// blending each side of the edge from a backdrop copy of the target.
pub const SILHOUETTE_SHADER: &str = r#"
struct Globals {
    viewport: vec2<f32>,
    _pad: vec2<f32>,
}

struct Chunk {
    transform: vec4<f32>,
    translate: vec2<f32>,
    depth: f32,
    stop_slot: f32,
    clip: vec4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
}

struct Line {
    p0: vec2<f32>,
    p1: vec2<f32>,
    data: u32,
    layer: u32,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var<storage, read> chunks: array<Chunk>;
@group(0) @binding(2) var<storage, read> lines: array<Line>;

@group(1) @binding(0) var backdrop_sampler: sampler;
@group(1) @binding(1) var backdrop_texture: texture_2d<f32>;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) local: vec2<f32>,
    @location(1) @interpolate(flat) a: vec2<f32>,
    @location(2) @interpolate(flat) b: vec2<f32>,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex: u32,
    @builtin(instance_index) instance: u32,
) -> VsOut {
    let line = lines[instance];
    let c = chunks[line.data];
    let a = line.p0 + c.translate;
    let b = line.p1 + c.translate;
    let along = normalize(b - a);
    let n = vec2<f32>(-along.y, along.x);

    // Quad one pixel wide around the edge, extended half a pixel past the
    // endpoints so corners get smoothed too.
    var p: vec2<f32>;
    switch vertex {
        case 0u: { p = a - along * 0.5 + n * 0.5; }
        case 1u: { p = b + along * 0.5 + n * 0.5; }
        case 2u: { p = b + along * 0.5 - n * 0.5; }
        case 3u: { p = a - along * 0.5 + n * 0.5; }
        case 4u: { p = b + along * 0.5 - n * 0.5; }
        default: { p = a - along * 0.5 - n * 0.5; }
    }

    var out: VsOut;
    let x = p.x / globals.viewport.x * 2.0 - 1.0;
    let y = 1.0 - p.y / globals.viewport.y * 2.0;
    out.position = vec4<f32>(x, y, 0.0, 1.0);
    out.local = p;
    out.a = a;
    out.b = b;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let ba = in.b - in.a;
    let n = normalize(vec2<f32>(-ba.y, ba.x));
    let d = dot(in.local - in.a, n);

    // Blend toward the pixel across the edge by the uncovered fraction.
    let weight = clamp(0.5 - abs(d), 0.0, 0.5);
    let dir = select(n, -n, d > 0.0);
    let uv = in.local / globals.viewport;
    let here = textureSample(backdrop_texture, backdrop_sampler, uv);
    let there = textureSample(backdrop_texture, backdrop_sampler, uv + dir / globals.viewport);
    return mix(here, there, weight);
}
"#;

/// Layer composite and page blit: one quad driven by a small uniform block.
pub const COMPOSITE_SHADER: &str = r#"
struct CompositeUniforms {
    dest: vec4<f32>,
    source_uv: vec4<f32>,
    viewport: vec2<f32>,
    opacity: f32,
    depth: f32,
}

@group(0) @binding(0) var<uniform> uniforms: CompositeUniforms;

@group(1) @binding(0) var source_sampler: sampler;
@group(1) @binding(1) var source_texture: texture_2d<f32>;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

var<private> corners: array<vec2<f32>, 6> = array<vec2<f32>, 6>(
    vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
    vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0), vec2<f32>(0.0, 1.0),
);

@vertex
fn vs_main(@builtin(vertex_index) vertex: u32) -> VsOut {
    let corner = corners[vertex];
    let p = uniforms.dest.xy + corner * uniforms.dest.zw;

    var out: VsOut;
    let x = p.x / uniforms.viewport.x * 2.0 - 1.0;
    let y = 1.0 - p.y / uniforms.viewport.y * 2.0;
    out.position = vec4<f32>(x, y, uniforms.depth, 1.0);
    out.uv = uniforms.source_uv.xy + corner * uniforms.source_uv.zw;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(source_texture, source_sampler, in.uv) * uniforms.opacity;
}
"#;
