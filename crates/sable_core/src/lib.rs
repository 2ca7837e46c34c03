//! Sable Core Types
//!
//! This crate provides the foundational types shared by the recorder and the
//! GPU executor:
//!
//! - **Geometry**: points, rectangles, and 2D affine transforms
//! - **Color & Brushes**: solid colors, gradients, and image patterns
//! - **Path Data**: pre-flattened polyline contours with fill rules
//!
//! Curve flattening happens upstream; everything in here is already polylines.

pub mod color;
pub mod geometry;
pub mod path;

pub use color::{BlendMode, Brush, Color, Gradient, GradientStop, Pattern};
pub use geometry::{Affine2D, Point, Rect, Size, Vec2};
pub use path::{FillRule, PathBuilder, PathData, PathError};
