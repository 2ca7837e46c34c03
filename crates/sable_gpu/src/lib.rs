//! Sable GPU Pipeline
//!
//! Retained-mode 2D vector rendering on wgpu: a frame recorder that merges
//! draws into batches, stencil-and-cover path filling, tiled SDF strokes,
//! silhouette edge smoothing, and a layer compositor backed by a pooled
//! render-target allocator.

pub mod backdrop;
pub mod compose;
pub mod executor;
pub mod fill;
pub mod frame;
pub mod pipelines;
pub mod primitives;
pub mod shaders;
pub mod silhouette;
pub mod stops;
pub mod stroke;
pub mod targets;
pub mod textures;

pub use executor::{Renderer, RendererConfig, RendererError};
pub use frame::{CompositeOp, EngineConfig, PaintEngine};
pub use primitives::FrameData;
pub use textures::{GlyphQuad, TextureSlice, TextureSource};
