//! Silhouette recorder for the geometry post-process antialiasing pass.
//!
//! Every filled or stroked shape appends its outer outline as a closed
//! polyline to a shared line list, tagged with the draw's data chunk and
//! owning layer. At frame end the lines are grouped per layer and rendered
//! as a line-list pass that samples the already-rendered color on both sides
//! of each edge, smoothing it without any multisampling.

use sable_core::Point;

use crate::primitives::GpuLine;

/// Accumulates silhouette edges for the frame.
#[derive(Debug, Default)]
pub struct SilhouetteRecorder {
    lines: Vec<GpuLine>,
}

impl SilhouetteRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a closed outline. If the first and last points differ, a
    /// closing edge is added automatically. Degenerate outlines (fewer than
    /// 2 points) are ignored.
    pub fn push_outline(&mut self, points: &[Point], data: u32, layer: u32) {
        if points.len() < 2 {
            return;
        }
        for pair in points.windows(2) {
            self.push_edge(pair[0], pair[1], data, layer);
        }
        let first = points[0];
        let last = points[points.len() - 1];
        if first != last {
            self.push_edge(last, first, data, layer);
        }
    }

    /// Append an open polyline (stroke centerlines), no auto-close.
    pub fn push_polyline(&mut self, points: &[Point], data: u32, layer: u32) {
        for pair in points.windows(2) {
            self.push_edge(pair[0], pair[1], data, layer);
        }
    }

    fn push_edge(&mut self, p0: Point, p1: Point, data: u32, layer: u32) {
        if p0 == p1 {
            return;
        }
        self.lines.push(GpuLine {
            p0: [p0.x, p0.y],
            p1: [p1.x, p1.y],
            data,
            layer,
        });
    }

    /// Stable-sort lines by layer and return them with, per layer index
    /// encountered, the (start, count) run. The caller writes the runs back
    /// into its layer records.
    pub fn take_grouped(&mut self) -> (Vec<GpuLine>, Vec<(u32, u32, u32)>) {
        let mut lines = std::mem::take(&mut self.lines);
        lines.sort_by_key(|l| l.layer);

        let mut runs = Vec::new();
        let mut i = 0usize;
        while i < lines.len() {
            let layer = lines[i].layer;
            let start = i;
            while i < lines.len() && lines[i].layer == layer {
                i += 1;
            }
            runs.push((layer, start as u32, (i - start) as u32));
        }
        (lines, runs)
    }
}
