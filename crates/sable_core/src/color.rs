//! Colors, gradients, brushes, and blend modes.

use crate::geometry::{Affine2D, Point};

/// RGBA color with f32 components in 0..=1
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse 0xRRGGBB into an opaque color.
    pub fn from_hex(hex: u32) -> Self {
        Self::rgb(
            ((hex >> 16) & 0xff) as f32 / 255.0,
            ((hex >> 8) & 0xff) as f32 / 255.0,
            (hex & 0xff) as f32 / 255.0,
        )
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.a = alpha;
        self
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn is_opaque(&self) -> bool {
        self.a >= 1.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

/// A single color stop along a gradient, offset in 0..=1
#[derive(Clone, Copy, Debug)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Color,
}

impl GradientStop {
    pub const fn new(offset: f32, color: Color) -> Self {
        Self { offset, color }
    }
}

/// Gradient descriptions consumed by the recorder.
///
/// Stops are expected sorted by offset; the stop atlas clamps, it does not
/// sort.
#[derive(Clone, Debug)]
pub enum Gradient {
    Linear {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
        opacity: f32,
    },
    Radial {
        center: Point,
        radius: f32,
        stops: Vec<GradientStop>,
        opacity: f32,
    },
}

impl Gradient {
    pub fn stops(&self) -> &[GradientStop] {
        match self {
            Gradient::Linear { stops, .. } => stops,
            Gradient::Radial { stops, .. } => stops,
        }
    }

    pub fn opacity(&self) -> f32 {
        match self {
            Gradient::Linear { opacity, .. } => *opacity,
            Gradient::Radial { opacity, .. } => *opacity,
        }
    }
}

/// Image-pattern brush parameters: the pattern carries its own transform
/// from pattern space into user space.
#[derive(Clone, Debug)]
pub struct Pattern {
    pub image: u64,
    pub transform: Affine2D,
    pub opacity: f32,
}

/// What to paint with
#[derive(Clone, Debug)]
pub enum Brush {
    Solid(Color),
    Gradient(Gradient),
    Pattern(Pattern),
}

impl Brush {
    /// Whether every pixel this brush produces is fully opaque.
    pub fn is_opaque(&self) -> bool {
        match self {
            Brush::Solid(c) => c.is_opaque(),
            Brush::Gradient(g) => {
                g.opacity() >= 1.0 && g.stops().iter().all(|s| s.color.is_opaque())
            }
            // Patterns may contain arbitrary alpha; assume translucent.
            Brush::Pattern(_) => false,
        }
    }
}

/// Layer composition blend modes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Add,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hex_extracts_channels() {
        let c = Color::from_hex(0x4080ff);
        assert!((c.r - 64.0 / 255.0).abs() < 1e-6);
        assert!((c.g - 128.0 / 255.0).abs() < 1e-6);
        assert!((c.b - 1.0).abs() < 1e-6);
        assert!(c.is_opaque());
    }

    #[test]
    fn gradient_opacity_gates_brush_opacity() {
        let opaque = Brush::Gradient(Gradient::Linear {
            start: Point::ZERO,
            end: Point::new(10.0, 0.0),
            stops: vec![
                GradientStop::new(0.0, Color::RED),
                GradientStop::new(1.0, Color::BLUE),
            ],
            opacity: 1.0,
        });
        assert!(opaque.is_opaque());

        let faded = Brush::Gradient(Gradient::Linear {
            start: Point::ZERO,
            end: Point::new(10.0, 0.0),
            stops: vec![GradientStop::new(0.0, Color::RED)],
            opacity: 0.5,
        });
        assert!(!faded.is_opaque());
    }
}
