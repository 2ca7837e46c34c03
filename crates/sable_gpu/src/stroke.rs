//! Stroke tiler: bins stroke segments into fixed-size screen tiles.
//!
//! Each segment is expanded to a half-width quad and marched across the tile
//! lattice along its dominant axis, Amanatides-Woo style: per lattice slab
//! the quad's extent on the other axis is advanced incrementally and every
//! overlapped tile records the segment's index. Tiles render later as
//! instanced quads whose fragments evaluate a signed-distance field against
//! only the segments listed for their tile, so per-fragment cost stays
//! bounded no matter how complex the stroke is.

use sable_core::{Point, Rect, Vec2};

use crate::primitives::{GpuSegment, PackedTile};

/// Side length of a stroke tile in pixels.
pub const TILE_SIZE: f32 = 16.0;

/// Tile lists for one stroke, covering `bounds` clamped to the lattice.
#[derive(Debug)]
pub struct StrokeLattice {
    /// Tile coordinate of the lattice origin.
    tile_x: i32,
    tile_y: i32,
    tiles_w: i32,
    tiles_h: i32,
    /// Per-tile segment index lists, row-major.
    cells: Vec<Vec<u32>>,
}

impl StrokeLattice {
    /// Lattice covering `bounds` (already transformed and clipped to the
    /// viewport). Returns `None` for empty bounds.
    pub fn new(bounds: Rect) -> Option<Self> {
        if bounds.is_empty() {
            return None;
        }
        let tile_x = (bounds.x() / TILE_SIZE).floor() as i32;
        let tile_y = (bounds.y() / TILE_SIZE).floor() as i32;
        let tiles_w = (bounds.max_x() / TILE_SIZE).ceil() as i32 - tile_x;
        let tiles_h = (bounds.max_y() / TILE_SIZE).ceil() as i32 - tile_y;
        if tiles_w <= 0 || tiles_h <= 0 {
            return None;
        }
        Some(Self {
            tile_x,
            tile_y,
            tiles_w,
            tiles_h,
            cells: vec![Vec::new(); (tiles_w * tiles_h) as usize],
        })
    }

    fn mark(&mut self, tx: i32, ty: i32, segment: u32) {
        if tx < self.tile_x
            || ty < self.tile_y
            || tx >= self.tile_x + self.tiles_w
            || ty >= self.tile_y + self.tiles_h
        {
            return;
        }
        let cell = &mut self.cells
            [((ty - self.tile_y) * self.tiles_w + (tx - self.tile_x)) as usize];
        // Dedup consecutive repeats; a segment visits a tile at most once per
        // traversal, so this suffices.
        if cell.last() != Some(&segment) {
            cell.push(segment);
        }
    }

    /// Total segment references across all tiles.
    pub fn reference_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    /// Tiles with at least one segment, as (x, y, segment list).
    pub fn occupied(&self) -> impl Iterator<Item = (i32, i32, &[u32])> {
        self.cells.iter().enumerate().filter_map(move |(i, cell)| {
            if cell.is_empty() {
                return None;
            }
            let tx = self.tile_x + (i as i32 % self.tiles_w);
            let ty = self.tile_y + (i as i32 / self.tiles_w);
            Some((tx, ty, cell.as_slice()))
        })
    }

    /// Pack every non-empty tile into `tiles`, appending segment indices to
    /// the shared `tile_indices` buffer. `data` is the stroke's chunk index.
    pub fn pack(&self, data: u32, tiles: &mut Vec<PackedTile>, tile_indices: &mut Vec<u32>) {
        for (tx, ty, cell) in self.occupied() {
            let offset = tile_indices.len() as u32;
            tile_indices.extend_from_slice(cell);
            tiles.push(PackedTile {
                x: tx as u32,
                y: ty as u32,
                offset,
                count: cell.len() as u32,
                data,
                _pad: [0; 3],
            });
        }
    }
}

/// The half-width-expanded quad around a segment: extended by `hw` past both
/// endpoints and to both sides.
fn expanded_quad(p0: Point, p1: Point, hw: f32) -> Option<[Point; 4]> {
    let dir = Vec2::new(p1.x - p0.x, p1.y - p0.y);
    if dir.length() <= f32::EPSILON {
        return None;
    }
    let d = dir.normalize();
    let n = d.perp();
    let a = Point::new(p0.x - d.x * hw, p0.y - d.y * hw);
    let b = Point::new(p1.x + d.x * hw, p1.y + d.y * hw);
    Some([
        Point::new(a.x + n.x * hw, a.y + n.y * hw),
        Point::new(b.x + n.x * hw, b.y + n.y * hw),
        Point::new(b.x - n.x * hw, b.y - n.y * hw),
        Point::new(a.x - n.x * hw, a.y - n.y * hw),
    ])
}

/// Clip a convex polygon to the slab `lo <= axis-coordinate <= hi` and return
/// the min/max of the other coordinate, or `None` when the slab misses it.
fn slab_extent(quad: &[Point; 4], lo: f32, hi: f32, x_slab: bool) -> Option<(f32, f32)> {
    let coord = |p: &Point| if x_slab { p.x } else { p.y };
    let other = |p: &Point| if x_slab { p.y } else { p.x };

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut any = false;
    let mut visit = |o: f32| {
        min = min.min(o);
        max = max.max(o);
        any = true;
    };

    for i in 0..4 {
        let a = &quad[i];
        let b = &quad[(i + 1) % 4];
        let (ca, cb) = (coord(a), coord(b));
        let (oa, ob) = (other(a), other(b));

        if ca >= lo && ca <= hi {
            visit(oa);
        }
        // Edge crossings with both slab planes.
        for plane in [lo, hi] {
            if (ca - plane) * (cb - plane) < 0.0 {
                let t = (plane - ca) / (cb - ca);
                visit(oa + t * (ob - oa));
            }
        }
    }
    if any { Some((min, max)) } else { None }
}

/// March one expanded segment across the lattice and record its index in
/// every tile the quad overlaps.
fn traverse_segment(lattice: &mut StrokeLattice, quad: &[Point; 4], segment: u32) {
    let bounds = Rect::bounding(quad);
    let dx = (quad[1].x - quad[0].x).abs();
    let dy = (quad[1].y - quad[0].y).abs();
    // Step along the dominant axis of the segment.
    let x_major = dx >= dy;

    if x_major {
        let t0 = (bounds.x() / TILE_SIZE).floor() as i32;
        let t1 = (bounds.max_x() / TILE_SIZE).ceil() as i32;
        for tx in t0..t1 {
            let lo = tx as f32 * TILE_SIZE;
            let hi = lo + TILE_SIZE;
            if let Some((ymin, ymax)) = slab_extent(quad, lo, hi, true) {
                let r0 = (ymin / TILE_SIZE).floor() as i32;
                let r1 = (ymax / TILE_SIZE).ceil() as i32;
                for ty in r0..r1.max(r0 + 1) {
                    lattice.mark(tx, ty, segment);
                }
            }
        }
    } else {
        let t0 = (bounds.y() / TILE_SIZE).floor() as i32;
        let t1 = (bounds.max_y() / TILE_SIZE).ceil() as i32;
        for ty in t0..t1 {
            let lo = ty as f32 * TILE_SIZE;
            let hi = lo + TILE_SIZE;
            if let Some((xmin, xmax)) = slab_extent(quad, lo, hi, false) {
                let c0 = (xmin / TILE_SIZE).floor() as i32;
                let c1 = (xmax / TILE_SIZE).ceil() as i32;
                for tx in c0..c1.max(c0 + 1) {
                    lattice.mark(tx, ty, segment);
                }
            }
        }
    }
}

/// Bin a stroked polyline into the lattice.
///
/// `points`/`contour_lengths`/`contour_closed` describe the flattened
/// contours; `segments` receives one [`GpuSegment`] per non-degenerate
/// segment (indices into it are what the tiles reference, offset by
/// `segment_base`). Returns `None` when `bounds` is empty.
pub fn clip_stroke_to_lattice(
    points: &[Point],
    contour_lengths: &[u32],
    contour_closed: &[bool],
    bounds: Rect,
    stroke_width: f32,
    segment_base: u32,
    segments: &mut Vec<GpuSegment>,
) -> Option<StrokeLattice> {
    let mut lattice = StrokeLattice::new(bounds)?;
    let hw = (stroke_width * 0.5).max(0.5);
    // The SDF coverage fringe reaches half a pixel past the stroke edge;
    // the binned footprint has to cover it.
    let footprint = hw + 0.5;

    let mut offset = 0usize;
    for (ci, &len) in contour_lengths.iter().enumerate() {
        let len = len as usize;
        let contour = &points[offset..offset + len];
        offset += len;
        if len < 2 {
            continue;
        }
        let closed = contour_closed.get(ci).copied().unwrap_or(false);
        let segment_count = if closed { len } else { len - 1 };
        for i in 0..segment_count {
            let p0 = contour[i];
            let p1 = contour[(i + 1) % len];
            let Some(quad) = expanded_quad(p0, p1, footprint) else {
                continue;
            };
            let index = segment_base + segments.len() as u32;
            segments.push(GpuSegment::new([p0.x, p0.y], [p1.x, p1.y], hw));
            traverse_segment(&mut lattice, &quad, index);
        }
    }
    Some(lattice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// Brute force: every tile whose footprint intersects the expanded quad,
    /// via separating-axis testing.
    fn brute_force_tiles(p0: Point, p1: Point, width: f32, bounds: Rect) -> BTreeSet<(i32, i32)> {
        let quad = expanded_quad(p0, p1, (width * 0.5).max(0.5) + 0.5).unwrap();
        let mut out = BTreeSet::new();
        let t0x = (bounds.x() / TILE_SIZE).floor() as i32;
        let t0y = (bounds.y() / TILE_SIZE).floor() as i32;
        let t1x = (bounds.max_x() / TILE_SIZE).ceil() as i32;
        let t1y = (bounds.max_y() / TILE_SIZE).ceil() as i32;
        for ty in t0y..t1y {
            for tx in t0x..t1x {
                let tile = Rect::new(
                    tx as f32 * TILE_SIZE,
                    ty as f32 * TILE_SIZE,
                    TILE_SIZE,
                    TILE_SIZE,
                );
                if quad_intersects_rect(&quad, &tile) {
                    out.insert((tx, ty));
                }
            }
        }
        out
    }

    fn project(points: &[Point], axis: Vec2) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for p in points {
            let d = axis.dot(Vec2::new(p.x, p.y));
            min = min.min(d);
            max = max.max(d);
        }
        (min, max)
    }

    fn quad_intersects_rect(quad: &[Point; 4], rect: &Rect) -> bool {
        let rect_pts = [
            Point::new(rect.x(), rect.y()),
            Point::new(rect.max_x(), rect.y()),
            Point::new(rect.max_x(), rect.max_y()),
            Point::new(rect.x(), rect.max_y()),
        ];
        let mut axes = vec![Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        for i in 0..4 {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            axes.push(Vec2::new(b.x - a.x, b.y - a.y).perp().normalize());
        }
        for axis in axes {
            let (amin, amax) = project(quad, axis);
            let (bmin, bmax) = project(&rect_pts, axis);
            if amax < bmin || bmax < amin {
                return false;
            }
        }
        true
    }

    fn traversal_tiles(p0: Point, p1: Point, width: f32, bounds: Rect) -> BTreeSet<(i32, i32)> {
        let mut segments = Vec::new();
        let lattice = clip_stroke_to_lattice(
            &[p0, p1],
            &[2],
            &[false],
            bounds,
            width,
            0,
            &mut segments,
        )
        .unwrap();
        lattice.occupied().map(|(x, y, _)| (x, y)).collect()
    }

    #[test]
    fn traversal_matches_brute_force_on_thick_diagonal() {
        let bounds = Rect::new(0.0, 0.0, 128.0, 128.0);
        let p0 = Point::new(0.0, 0.0);
        let p1 = Point::new(100.0, 100.0);
        assert_eq!(
            traversal_tiles(p0, p1, 8.0, bounds),
            brute_force_tiles(p0, p1, 8.0, bounds)
        );
    }

    #[test]
    fn traversal_matches_brute_force_on_shallow_and_steep_segments() {
        let bounds = Rect::new(0.0, 0.0, 256.0, 256.0);
        let cases = [
            (Point::new(3.0, 40.0), Point::new(200.0, 55.0), 4.0),
            (Point::new(17.0, 8.0), Point::new(33.0, 240.0), 12.0),
            (Point::new(50.0, 50.0), Point::new(50.0, 180.0), 2.0),
            (Point::new(10.0, 90.0), Point::new(220.0, 90.0), 6.0),
        ];
        for (p0, p1, w) in cases {
            assert_eq!(
                traversal_tiles(p0, p1, w, bounds),
                brute_force_tiles(p0, p1, w, bounds),
                "segment {p0:?} -> {p1:?} width {w}"
            );
        }
    }

    #[test]
    fn boundary_tiles_get_the_coverage_fringe() {
        // Stroke edges land exactly on tile boundaries (y = 0 and y = 32);
        // the half-pixel coverage fringe reaches into the neighboring rows.
        let bounds = Rect::new(0.0, 0.0, 64.0, 64.0);
        let p0 = Point::new(16.0, 16.0);
        let p1 = Point::new(48.0, 16.0);
        let tiles = traversal_tiles(p0, p1, 32.0, bounds);
        assert!(tiles.contains(&(1, 2)));
        assert_eq!(tiles, brute_force_tiles(p0, p1, 32.0, bounds));
    }

    #[test]
    fn tiles_outside_bounds_are_dropped() {
        // Lattice only covers a 32x32 corner; the far end of the segment
        // falls outside and must not be recorded.
        let bounds = Rect::new(0.0, 0.0, 32.0, 32.0);
        let tiles = traversal_tiles(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 4.0, bounds);
        assert!(tiles.iter().all(|&(x, y)| x < 2 && y >= -1 && y < 2));
        assert!(tiles.contains(&(0, 0)));
    }

    #[test]
    fn zero_length_segments_are_skipped() {
        let mut segments = Vec::new();
        let lattice = clip_stroke_to_lattice(
            &[Point::new(5.0, 5.0), Point::new(5.0, 5.0)],
            &[2],
            &[false],
            Rect::new(0.0, 0.0, 64.0, 64.0),
            4.0,
            0,
            &mut segments,
        )
        .unwrap();
        assert!(segments.is_empty());
        assert_eq!(lattice.reference_count(), 0);
    }

    #[test]
    fn closed_contour_emits_closing_segment() {
        let mut segments = Vec::new();
        let square = [
            Point::new(8.0, 8.0),
            Point::new(40.0, 8.0),
            Point::new(40.0, 40.0),
            Point::new(8.0, 40.0),
        ];
        clip_stroke_to_lattice(
            &square,
            &[4],
            &[true],
            Rect::new(0.0, 0.0, 64.0, 64.0),
            2.0,
            0,
            &mut segments,
        )
        .unwrap();
        assert_eq!(segments.len(), 4);
    }

    #[test]
    fn pack_produces_contiguous_runs() {
        let mut segments = Vec::new();
        let lattice = clip_stroke_to_lattice(
            &[Point::new(0.0, 0.0), Point::new(100.0, 100.0)],
            &[2],
            &[false],
            Rect::new(0.0, 0.0, 128.0, 128.0),
            8.0,
            0,
            &mut segments,
        )
        .unwrap();

        let mut tiles = Vec::new();
        let mut indices = Vec::new();
        lattice.pack(7, &mut tiles, &mut indices);

        assert!(!tiles.is_empty());
        let mut expected_offset = 0u32;
        for tile in &tiles {
            assert_eq!(tile.offset, expected_offset);
            assert!(tile.count > 0);
            assert_eq!(tile.data, 7);
            expected_offset += tile.count;
        }
        assert_eq!(expected_offset as usize, indices.len());
    }
}
