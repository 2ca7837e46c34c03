//! Per-frame gradient color-stop atlas.
//!
//! Gradient draws reference a slot index; each slot is one rasterized row of
//! RGBA texels the shader samples along the gradient axis. The atlas resets
//! every frame and a full atlas degrades the draw to its first stop color
//! rather than failing the frame.

use sable_core::{Color, GradientStop};

/// Texels per slot row.
pub const STOP_ATLAS_WIDTH: usize = 64;
/// Slot rows in the atlas texture.
pub const STOP_ATLAS_SLOTS: usize = 16;

/// CPU-side stop atlas, uploaded once per frame as a small RGBA texture.
#[derive(Debug)]
pub struct StopAtlas {
    texels: Vec<[u8; 4]>,
    used: usize,
}

impl Default for StopAtlas {
    fn default() -> Self {
        Self::new()
    }
}

impl StopAtlas {
    pub fn new() -> Self {
        Self {
            texels: vec![[0; 4]; STOP_ATLAS_WIDTH * STOP_ATLAS_SLOTS],
            used: 0,
        }
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn slots_used(&self) -> usize {
        self.used
    }

    /// Rasterize a stop list into the next free slot. Returns the slot
    /// index, or `None` when the atlas is full or the list is empty.
    pub fn push(&mut self, stops: &[GradientStop], opacity: f32) -> Option<u32> {
        if stops.is_empty() || self.used >= STOP_ATLAS_SLOTS {
            return None;
        }
        let slot = self.used;
        self.used += 1;

        let row = &mut self.texels[slot * STOP_ATLAS_WIDTH..(slot + 1) * STOP_ATLAS_WIDTH];
        for (i, texel) in row.iter_mut().enumerate() {
            let t = i as f32 / (STOP_ATLAS_WIDTH - 1) as f32;
            *texel = encode(sample_stops(stops, t), opacity);
        }
        Some(slot as u32)
    }

    /// Texel rows of the slots used this frame; empty when no gradient was
    /// recorded.
    pub fn texels(&self) -> &[[u8; 4]] {
        &self.texels[..self.used * STOP_ATLAS_WIDTH]
    }
}

fn sample_stops(stops: &[GradientStop], t: f32) -> Color {
    if t <= stops[0].offset {
        return stops[0].color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if t <= b.offset {
            let span = (b.offset - a.offset).max(f32::EPSILON);
            let f = (t - a.offset) / span;
            return lerp(a.color, b.color, f);
        }
    }
    stops[stops.len() - 1].color
}

fn lerp(a: Color, b: Color, f: f32) -> Color {
    Color::rgba(
        a.r + (b.r - a.r) * f,
        a.g + (b.g - a.g) * f,
        a.b + (b.b - a.b) * f,
        a.a + (b.a - a.a) * f,
    )
}

fn encode(c: Color, opacity: f32) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    [q(c.r), q(c.g), q(c.b), q(c.a * opacity)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_fills_slots_then_refuses() {
        let mut atlas = StopAtlas::new();
        let stops = [
            GradientStop::new(0.0, Color::RED),
            GradientStop::new(1.0, Color::BLUE),
        ];
        for i in 0..STOP_ATLAS_SLOTS {
            assert_eq!(atlas.push(&stops, 1.0), Some(i as u32));
        }
        assert_eq!(atlas.push(&stops, 1.0), None);
        atlas.reset();
        assert_eq!(atlas.push(&stops, 1.0), Some(0));
    }

    #[test]
    fn slot_endpoints_match_stop_colors() {
        let mut atlas = StopAtlas::new();
        let stops = [
            GradientStop::new(0.0, Color::RED),
            GradientStop::new(1.0, Color::BLUE),
        ];
        let slot = atlas.push(&stops, 1.0).unwrap() as usize;
        let row = &atlas.texels()[slot * STOP_ATLAS_WIDTH..(slot + 1) * STOP_ATLAS_WIDTH];
        assert_eq!(row[0], [255, 0, 0, 255]);
        assert_eq!(row[STOP_ATLAS_WIDTH - 1], [0, 0, 255, 255]);
        // Midpoint is a blend of the two.
        let mid = row[STOP_ATLAS_WIDTH / 2];
        assert!(mid[0] > 0 && mid[2] > 0);
    }

    #[test]
    fn opacity_scales_alpha_only() {
        let mut atlas = StopAtlas::new();
        let stops = [GradientStop::new(0.0, Color::WHITE)];
        let slot = atlas.push(&stops, 0.5).unwrap() as usize;
        let texel = atlas.texels()[slot * STOP_ATLAS_WIDTH];
        assert_eq!(texel[0], 255);
        assert_eq!(texel[3], 128);
    }

    #[test]
    fn unused_atlas_has_no_upload_rows() {
        let atlas = StopAtlas::new();
        assert!(atlas.texels().is_empty());
    }

    #[test]
    fn empty_stop_list_refused() {
        let mut atlas = StopAtlas::new();
        assert_eq!(atlas.push(&[], 1.0), None);
        assert_eq!(atlas.slots_used(), 0);
    }
}
