//! Texture-provider boundary.
//!
//! Image and glyph caches live outside this crate; they hand the recorder a
//! [`TextureSlice`] per draw. A slice without a view means "skip this draw"
//! rather than an error.

use std::sync::Arc;

use sable_core::Rect;

/// A view into a cached texture: the whole atlas plus the sub-rectangle the
/// draw should sample.
#[derive(Clone, Debug)]
pub struct TextureSlice {
    pub view: Option<Arc<wgpu::TextureView>>,
    /// Full texture size in pixels.
    pub size: (u32, u32),
    /// Sub-rectangle within the texture, in pixels.
    pub region: Rect,
}

impl TextureSlice {
    /// The "skip this draw" slice.
    pub fn empty() -> Self {
        Self {
            view: None,
            size: (0, 0),
            region: Rect::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_none() || self.size.0 == 0 || self.size.1 == 0 || self.region.is_empty()
    }

    /// Normalized UV rectangle for the region.
    pub fn uv(&self) -> Rect {
        if self.size.0 == 0 || self.size.1 == 0 {
            return Rect::ZERO;
        }
        let w = self.size.0 as f32;
        let h = self.size.1 as f32;
        Rect::new(
            self.region.x() / w,
            self.region.y() / h,
            self.region.width() / w,
            self.region.height() / h,
        )
    }
}

/// Image/bitmap and glyph caches both expose lookups through this trait.
pub trait TextureSource {
    fn get_texture(&self, key: u64) -> TextureSlice;
}

/// One glyph quad produced by the text layouter: destination rectangle in
/// screen space and UV rectangle into the glyph atlas.
#[derive(Clone, Copy, Debug)]
pub struct GlyphQuad {
    pub dst: Rect,
    pub uv: Rect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slice_is_empty() {
        assert!(TextureSlice::empty().is_empty());
    }

    #[test]
    fn uv_normalizes_region() {
        let slice = TextureSlice {
            view: None,
            size: (256, 128),
            region: Rect::new(64.0, 32.0, 128.0, 64.0),
        };
        let uv = slice.uv();
        assert_eq!(uv, Rect::new(0.25, 0.25, 0.5, 0.5));
    }
}
