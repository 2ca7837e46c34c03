//! 2D geometry primitives shared across the pipeline.
//!
//! All coordinates are f32 screen pixels unless a function says otherwise.

/// 2D point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// 2D size
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// 2D vector
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Returns the zero vector unchanged rather than dividing by zero.
    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > f32::EPSILON {
            Self::new(self.x / len, self.y / len)
        } else {
            *self
        }
    }

    pub fn dot(&self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3D cross product of two in-plane vectors.
    pub fn cross(&self, other: Vec2) -> f32 {
        self.x * other.y - self.y * other.x
    }

    /// Perpendicular vector (counter-clockwise).
    pub fn perp(&self) -> Vec2 {
        Vec2::new(-self.y, self.x)
    }
}

/// 2D rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        origin: Point::ZERO,
        size: Size::ZERO,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self { origin, size }
    }

    /// Rect spanning two arbitrary corner points.
    pub fn from_points(p1: Point, p2: Point) -> Self {
        let x = p1.x.min(p2.x);
        let y = p1.y.min(p2.y);
        Self::new(x, y, (p2.x - p1.x).abs(), (p2.y - p1.y).abs())
    }

    pub fn x(&self) -> f32 {
        self.origin.x
    }

    pub fn y(&self) -> f32 {
        self.origin.y
    }

    pub fn width(&self) -> f32 {
        self.size.width
    }

    pub fn height(&self) -> f32 {
        self.size.height
    }

    pub fn max_x(&self) -> f32 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f32 {
        self.origin.y + self.size.height
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.origin.x + self.size.width / 2.0,
            self.origin.y + self.size.height / 2.0,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    pub fn area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.size.width * self.size.height
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x()
            && point.x <= self.max_x()
            && point.y >= self.y()
            && point.y <= self.max_y()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x() < other.max_x()
            && other.x() < self.max_x()
            && self.y() < other.max_y()
            && other.y() < self.max_y()
    }

    /// Intersection of two rects, `Rect::ZERO` when they do not overlap.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x0 = self.x().max(other.x());
        let y0 = self.y().max(other.y());
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        if x1 <= x0 || y1 <= y0 {
            Rect::ZERO
        } else {
            Rect::new(x0, y0, x1 - x0, y1 - y0)
        }
    }

    /// Smallest rect containing both. An empty rect is the identity.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x().min(other.x());
        let y0 = self.y().min(other.y());
        let x1 = self.max_x().max(other.max_x());
        let y1 = self.max_y().max(other.max_y());
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Grow to include a single point. Unlike [`Rect::union`], a zero-area
    /// rect is a real position here, not an identity.
    pub fn union_point(&self, point: Point) -> Rect {
        let x0 = self.x().min(point.x);
        let y0 = self.y().min(point.y);
        let x1 = self.max_x().max(point.x);
        let y1 = self.max_y().max(point.y);
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x() + dx, self.y() + dy, self.width(), self.height())
    }

    pub fn inflate(&self, dx: f32, dy: f32) -> Self {
        Self::new(
            self.x() - dx,
            self.y() - dy,
            self.width() + 2.0 * dx,
            self.height() + 2.0 * dy,
        )
    }

    /// Axis-aligned bounding box of a point slice. Empty slice yields ZERO.
    pub fn bounding(points: &[Point]) -> Rect {
        let Some(first) = points.first() else {
            return Rect::ZERO;
        };
        let mut min_x = first.x;
        let mut min_y = first.y;
        let mut max_x = first.x;
        let mut max_y = first.y;
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

/// 2D affine transform stored as a 2x3 matrix:
///
/// ```text
/// | a c tx |
/// | b d ty |
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine2D {
    pub elements: [f32; 6],
}

impl Default for Affine2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine2D {
    pub const IDENTITY: Affine2D = Affine2D {
        elements: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
    };

    pub const fn new(a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> Self {
        Self {
            elements: [a, b, c, d, tx, ty],
        }
    }

    pub const fn translation(x: f32, y: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, x, y)
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn rotation(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    pub fn tx(&self) -> f32 {
        self.elements[4]
    }

    pub fn ty(&self) -> f32 {
        self.elements[5]
    }

    pub fn transform_point(&self, point: Point) -> Point {
        let [a, b, c, d, tx, ty] = self.elements;
        Point::new(
            a * point.x + c * point.y + tx,
            b * point.x + d * point.y + ty,
        )
    }

    /// Transforms a rect and returns the axis-aligned bounding box of the
    /// result (only exact for non-rotating transforms).
    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.transform_point(rect.origin),
            self.transform_point(Point::new(rect.max_x(), rect.y())),
            self.transform_point(Point::new(rect.max_x(), rect.max_y())),
            self.transform_point(Point::new(rect.x(), rect.max_y())),
        ];
        Rect::bounding(&corners)
    }

    /// `self` applied first, then `other`.
    pub fn then(&self, other: &Affine2D) -> Affine2D {
        let [a1, b1, c1, d1, tx1, ty1] = self.elements;
        let [a2, b2, c2, d2, tx2, ty2] = other.elements;
        Affine2D::new(
            a2 * a1 + c2 * b1,
            b2 * a1 + d2 * b1,
            a2 * c1 + c2 * d1,
            b2 * c1 + d2 * d1,
            a2 * tx1 + c2 * ty1 + tx2,
            b2 * tx1 + d2 * ty1 + ty2,
        )
    }

    /// Prepend a translation (applied before this transform).
    pub fn pre_translate(&self, x: f32, y: f32) -> Affine2D {
        Affine2D::translation(x, y).then(self)
    }

    /// Append a translation (applied after this transform).
    pub fn post_translate(&self, x: f32, y: f32) -> Affine2D {
        self.then(&Affine2D::translation(x, y))
    }

    pub fn invert(&self) -> Option<Affine2D> {
        let [a, b, c, d, tx, ty] = self.elements;
        let det = a * d - b * c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Affine2D::new(
            d * inv_det,
            -b * inv_det,
            -c * inv_det,
            a * inv_det,
            (c * ty - d * tx) * inv_det,
            (b * tx - a * ty) * inv_det,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_intersection_disjoint_is_zero() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 5.0, 5.0);
        assert!(a.intersection(&b).is_empty());
        assert!(!a.intersects(&b));
    }

    #[test]
    fn rect_union_ignores_empty() {
        let a = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.union(&Rect::ZERO), a);
        assert_eq!(Rect::ZERO.union(&a), a);
    }

    #[test]
    fn rect_union_point_grows_from_degenerate() {
        let mut b = Rect::new(10.0, 20.0, 0.0, 0.0);
        for p in [
            Point::new(40.0, 20.0),
            Point::new(40.0, 60.0),
            Point::new(10.0, 60.0),
        ] {
            b = b.union_point(p);
        }
        assert_eq!(b, Rect::new(10.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn rect_bounding_of_points() {
        let b = Rect::bounding(&[
            Point::new(3.0, 7.0),
            Point::new(-1.0, 2.0),
            Point::new(4.0, 4.0),
        ]);
        assert_eq!(b, Rect::new(-1.0, 2.0, 5.0, 5.0));
    }

    #[test]
    fn affine_then_composes_in_order() {
        let t = Affine2D::scale(2.0, 2.0).then(&Affine2D::translation(10.0, 0.0));
        let p = t.transform_point(Point::new(1.0, 1.0));
        assert_eq!(p, Point::new(12.0, 2.0));
    }

    #[test]
    fn affine_invert_roundtrip() {
        let t = Affine2D::translation(4.0, -3.0).then(&Affine2D::scale(2.0, 0.5));
        let inv = t.invert().unwrap();
        let p = Point::new(7.5, 1.25);
        let back = inv.transform_point(t.transform_point(p));
        assert!((back.x - p.x).abs() < 1e-4);
        assert!((back.y - p.y).abs() < 1e-4);
    }

    #[test]
    fn affine_rotation_has_no_invert_for_degenerate_scale() {
        assert!(Affine2D::scale(0.0, 1.0).invert().is_none());
    }
}
