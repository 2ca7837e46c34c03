//! Stencil fill engine: strategy selection and fan triangulation.
//!
//! A single convex contour renders as a plain triangle fan in one draw call.
//! Anything else (concave, self-intersecting, multi-contour) goes through the
//! two-pass stencil-then-cover path: every contour is fan-triangulated
//! independently, the stencil pass accumulates winding (or parity), and the
//! cover pass paints the path's bounding quad wherever the stencil matches
//! the fill rule, resetting the stencil as it goes.

use sable_core::{FillRule, PathData, Point, Rect, Vec2};

use crate::primitives::StencilMode;

/// How a path should be rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillStrategy {
    /// Nothing to draw: degenerate bounds or no usable contour.
    Skip,
    /// One convex contour; fan triangulation in a simple batch.
    SinglePass,
    /// Stencil-then-cover with the given stencil mode.
    TwoPass(StencilMode),
}

pub fn stencil_mode_for(rule: FillRule) -> StencilMode {
    match rule {
        FillRule::NonZero => StencilMode::NonZero,
        FillRule::EvenOdd => StencilMode::EvenOdd,
    }
}

/// Decide the rendering strategy for a path.
///
/// Contours that degenerate to fewer than 3 points are ignored; if none
/// survive, or the path bounds have zero area, the whole fill is a no-op.
pub fn choose_strategy(path: &PathData, rule: FillRule) -> FillStrategy {
    if path.bounds.area() <= 0.0 {
        return FillStrategy::Skip;
    }

    let mut usable = 0usize;
    let mut only_convex = true;
    for (points, _closed) in path.contours() {
        if points.len() < 3 {
            continue;
        }
        usable += 1;
        if usable > 1 || !is_convex(points) {
            only_convex = false;
        }
    }

    if usable == 0 {
        FillStrategy::Skip
    } else if only_convex {
        FillStrategy::SinglePass
    } else {
        FillStrategy::TwoPass(stencil_mode_for(rule))
    }
}

/// Convexity test over a closed polygon: every cross product of consecutive
/// edges must share a sign. Collinear edges (zero cross) are allowed.
pub fn is_convex(points: &[Point]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f32;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let ab = Vec2::new(b.x - a.x, b.y - a.y);
        let bc = Vec2::new(c.x - b.x, c.y - b.y);
        let cross = ab.cross(bc);
        if cross.abs() <= f32::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Append fan-triangulation indices for `count` contour vertices starting at
/// `base` in the shared vertex buffer. Produces `count - 2` triangles.
pub fn fan_indices(base: u32, count: u32, out: &mut Vec<u32>) {
    for i in 1..count.saturating_sub(1) {
        out.push(base);
        out.push(base + i);
        out.push(base + i + 1);
    }
}

/// Cover quad for a two-pass fill: path bounds intersected with the clip.
/// An empty result means the cover pass (and the fill) can be dropped.
pub fn cover_quad(path_bounds: Rect, clip: Rect) -> Rect {
    path_bounds.intersection(&clip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::PathBuilder;

    fn rect_path(x: f32, y: f32, w: f32, h: f32) -> PathData {
        let mut b = PathBuilder::new();
        b.rect(Rect::new(x, y, w, h));
        b.build()
    }

    fn concave_path() -> PathData {
        let mut b = PathBuilder::new();
        b.move_to(0.0, 0.0);
        b.line_to(40.0, 0.0);
        b.line_to(40.0, 40.0);
        b.line_to(20.0, 10.0); // notch
        b.line_to(0.0, 40.0);
        b.close();
        b.build()
    }

    #[test]
    fn convex_single_contour_is_single_pass() {
        let path = rect_path(0.0, 0.0, 10.0, 10.0);
        assert_eq!(
            choose_strategy(&path, FillRule::NonZero),
            FillStrategy::SinglePass
        );
    }

    #[test]
    fn concave_contour_is_two_pass() {
        assert_eq!(
            choose_strategy(&concave_path(), FillRule::NonZero),
            FillStrategy::TwoPass(StencilMode::NonZero)
        );
        assert_eq!(
            choose_strategy(&concave_path(), FillRule::EvenOdd),
            FillStrategy::TwoPass(StencilMode::EvenOdd)
        );
    }

    #[test]
    fn multi_contour_is_two_pass_even_when_each_is_convex() {
        let mut b = PathBuilder::new();
        b.rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        b.rect(Rect::new(20.0, 0.0, 10.0, 10.0));
        let path = b.build();
        assert_eq!(
            choose_strategy(&path, FillRule::NonZero),
            FillStrategy::TwoPass(StencilMode::NonZero)
        );
    }

    #[test]
    fn degenerate_paths_skip() {
        // Two points: no triangle.
        let mut b = PathBuilder::new();
        b.move_to(0.0, 0.0);
        b.line_to(10.0, 10.0);
        let path = b.build();
        assert_eq!(choose_strategy(&path, FillRule::NonZero), FillStrategy::Skip);

        // Zero-area bounds.
        let flat = rect_path(0.0, 5.0, 10.0, 0.0);
        assert_eq!(choose_strategy(&flat, FillRule::NonZero), FillStrategy::Skip);
    }

    #[test]
    fn convexity_allows_collinear_edges() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(is_convex(&points));
    }

    #[test]
    fn convexity_rejects_notch() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(40.0, 0.0),
            Point::new(40.0, 40.0),
            Point::new(20.0, 10.0),
            Point::new(0.0, 40.0),
        ];
        assert!(!is_convex(&points));
    }

    #[test]
    fn fan_indices_triangle_count() {
        let mut out = Vec::new();
        fan_indices(10, 5, &mut out);
        assert_eq!(out.len(), 9); // 3 triangles
        assert_eq!(out[0..3], [10, 11, 12]);
        assert_eq!(out[6..9], [10, 13, 14]);

        out.clear();
        fan_indices(0, 2, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn cover_quad_clips_bounds() {
        let quad = cover_quad(
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Rect::new(50.0, 50.0, 100.0, 100.0),
        );
        assert_eq!(quad, Rect::new(50.0, 50.0, 50.0, 50.0));
        assert!(cover_quad(
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Rect::new(50.0, 50.0, 10.0, 10.0)
        )
        .is_empty());
    }
}
