//! Pre-flattened path data.
//!
//! Curve flattening happens upstream; by the time geometry reaches the
//! recorder a path is a flat point list split into contours, each with a
//! closed flag and precomputed bounds. This keeps the hot recording path
//! allocation-free and lets the fill/stroke engines index contours directly.

use smallvec::SmallVec;
use thiserror::Error;

use crate::geometry::{Point, Rect};

/// Fill rule for self-intersecting or multi-contour paths
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

/// Errors produced while assembling path data
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("contour length {len} exceeds remaining point count {remaining}")]
    ContourOverrun { len: usize, remaining: usize },
    #[error("contour count {contours} does not match closed-flag count {flags}")]
    FlagMismatch { contours: usize, flags: usize },
}

/// A flattened path: one shared point list plus per-contour lengths and
/// closed flags. Bounds are precomputed by the producer and kept in sync by
/// [`PathBuilder`].
#[derive(Clone, Debug, Default)]
pub struct PathData {
    pub points: Vec<Point>,
    pub contour_lengths: SmallVec<[u32; 4]>,
    pub contour_closed: SmallVec<[bool; 4]>,
    pub bounds: Rect,
}

impl PathData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates internal consistency. Producers hand-assembling `PathData`
    /// should call this once; builder output is always consistent.
    pub fn validate(&self) -> Result<(), PathError> {
        if self.contour_lengths.len() != self.contour_closed.len() {
            return Err(PathError::FlagMismatch {
                contours: self.contour_lengths.len(),
                flags: self.contour_closed.len(),
            });
        }
        let mut remaining = self.points.len();
        for &len in &self.contour_lengths {
            let len = len as usize;
            if len > remaining {
                return Err(PathError::ContourOverrun { len, remaining });
            }
            remaining -= len;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() || self.contour_lengths.is_empty()
    }

    pub fn contour_count(&self) -> usize {
        self.contour_lengths.len()
    }

    /// Iterate contours as point slices with their closed flag.
    pub fn contours(&self) -> impl Iterator<Item = (&[Point], bool)> {
        let mut offset = 0usize;
        self.contour_lengths
            .iter()
            .zip(self.contour_closed.iter())
            .map(move |(&len, &closed)| {
                let start = offset;
                offset += len as usize;
                (&self.points[start..offset], closed)
            })
    }
}

/// Builder that appends polyline contours and keeps bounds current.
#[derive(Debug, Default)]
pub struct PathBuilder {
    data: PathData,
    current_start: usize,
    open: bool,
}

impl PathBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.end_contour(false);
        self.current_start = self.data.points.len();
        self.push_point(Point::new(x, y));
        self.open = true;
        self
    }

    pub fn line_to(&mut self, x: f32, y: f32) -> &mut Self {
        if !self.open {
            return self.move_to(x, y);
        }
        self.push_point(Point::new(x, y));
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.end_contour(true);
        self
    }

    /// Convenience: a full closed rectangle contour.
    pub fn rect(&mut self, rect: Rect) -> &mut Self {
        self.move_to(rect.x(), rect.y());
        self.line_to(rect.max_x(), rect.y());
        self.line_to(rect.max_x(), rect.max_y());
        self.line_to(rect.x(), rect.max_y());
        self.close()
    }

    pub fn build(mut self) -> PathData {
        self.end_contour(false);
        self.data
    }

    fn push_point(&mut self, p: Point) {
        self.data.bounds = if self.data.points.is_empty() {
            Rect::new(p.x, p.y, 0.0, 0.0)
        } else {
            self.data.bounds.union_point(p)
        };
        self.data.points.push(p);
    }

    fn end_contour(&mut self, closed: bool) {
        if !self.open {
            return;
        }
        let len = self.data.points.len() - self.current_start;
        if len == 0 {
            self.open = false;
            return;
        }
        self.data.contour_lengths.push(len as u32);
        self.data.contour_closed.push(closed);
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rect_is_one_closed_contour() {
        let mut b = PathBuilder::new();
        b.rect(Rect::new(10.0, 20.0, 30.0, 40.0));
        let path = b.build();
        assert_eq!(path.contour_count(), 1);
        assert!(path.contour_closed[0]);
        assert_eq!(path.points.len(), 4);
        assert_eq!(path.bounds, Rect::new(10.0, 20.0, 30.0, 40.0));
        assert!(path.validate().is_ok());
    }

    #[test]
    fn builder_tracks_bounds_across_contours() {
        let mut b = PathBuilder::new();
        b.move_to(0.0, 0.0);
        b.line_to(5.0, 5.0);
        b.move_to(-10.0, 2.0);
        b.line_to(1.0, 1.0);
        let path = b.build();
        assert_eq!(path.contour_count(), 2);
        assert!(!path.contour_closed[0]);
        assert_eq!(path.bounds, Rect::new(-10.0, 0.0, 15.0, 5.0));
    }

    #[test]
    fn validate_catches_overrun() {
        let path = PathData {
            points: vec![Point::ZERO; 2],
            contour_lengths: smallvec::smallvec![3],
            contour_closed: smallvec::smallvec![true],
            bounds: Rect::ZERO,
        };
        assert_eq!(
            path.validate(),
            Err(PathError::ContourOverrun {
                len: 3,
                remaining: 2
            })
        );
    }

    #[test]
    fn contours_iterator_slices_points() {
        let mut b = PathBuilder::new();
        b.move_to(0.0, 0.0);
        b.line_to(1.0, 0.0);
        b.close();
        b.move_to(2.0, 2.0);
        b.line_to(3.0, 3.0);
        b.line_to(4.0, 2.0);
        let path = b.build();
        let contours: Vec<_> = path.contours().collect();
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].0.len(), 2);
        assert!(contours[0].1);
        assert_eq!(contours[1].0.len(), 3);
        assert!(!contours[1].1);
    }
}
