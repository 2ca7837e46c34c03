//! Frame-end layer solver.
//!
//! Recording happens in screen space against clip rectangles; render targets
//! are leased at the tight content bounds of each layer. This pass solves
//! those bounds bottom-up, then rebases every data chunk into its layer's
//! local space and computes each layer's placement inside its parent.

use sable_core::{Point, Rect};

use crate::primitives::{Batch, DataChunk, Layer, Set, LAYER_NONE};

/// Solve layer bounds and placements, then rebase chunks to layer-local
/// coordinates. Layers with no content keep zero bounds and their composites
/// are rewritten to [`LAYER_NONE`].
pub fn resolve(layers: &mut [Layer], sets: &mut [Set], batches: &[Batch], chunks: &mut [DataChunk]) {
    if layers.is_empty() {
        return;
    }

    // Screen-space content extent per layer, folded from batch bounds.
    let mut extents: Vec<Option<Rect>> = vec![None; layers.len()];
    for set in sets.iter() {
        let target = &mut extents[set.layer as usize];
        for batch in &batches[set.batch_start as usize..set.batch_end as usize] {
            if batch.bounds.is_empty() {
                continue;
            }
            *target = Some(match target {
                Some(r) => r.union(&batch.bounds),
                None => batch.bounds,
            });
        }
    }

    // Children always carry larger indices than their parents, so a reverse
    // walk folds child extents into parents before the parent is finalized.
    for i in (1..layers.len()).rev() {
        let clip = layers[i].clip;
        let extent = extents[i].map(|r| r.intersection(&clip)).filter(|r| !r.is_empty());
        extents[i] = extent;
        if let Some(extent) = extent {
            let parent = layers[i].parent as usize;
            extents[parent] = Some(match extents[parent] {
                Some(r) => r.union(&extent),
                None => extent,
            });
        }
    }
    extents[0] = extents[0].map(|r| r.intersection(&layers[0].clip));

    // The root draws straight into the full viewport target; every other
    // layer's target starts at its extent origin.
    let mut origins = vec![Point::ZERO; layers.len()];
    for (i, layer) in layers.iter_mut().enumerate() {
        let clip = layer.clip;
        match extents[i] {
            Some(extent) => {
                layer.bounds = Rect::new(
                    extent.x() - clip.x(),
                    extent.y() - clip.y(),
                    extent.width(),
                    extent.height(),
                );
                if i > 0 {
                    origins[i] = extent.origin;
                }
            }
            None => {
                layer.bounds = Rect::ZERO;
            }
        }
    }

    for i in 1..layers.len() {
        let parent = layers[i].parent as usize;
        if let Some(extent) = extents[i] {
            layers[i].place = Rect::new(
                origins[i].x - origins[parent].x,
                origins[i].y - origins[parent].y,
                extent.width(),
                extent.height(),
            );
        }
    }

    // Rebase each set's chunk span into its layer's local space. Vertices and
    // cover quads stay in screen coordinates; the shaders add the chunk
    // translate before rasterizing.
    for set in sets.iter_mut() {
        let origin = origins[set.layer as usize];
        if origin != Point::ZERO {
            for chunk in &mut chunks[set.chunk_start as usize..set.chunk_end as usize] {
                chunk.translate[0] -= origin.x;
                chunk.translate[1] -= origin.y;
                let clip = chunk.clip_rect();
                chunk.set_clip_rect(Rect::new(
                    clip.x() - origin.x,
                    clip.y() - origin.y,
                    clip.width(),
                    clip.height(),
                ));
            }
        }
        if set.composite != LAYER_NONE && extents[set.composite as usize].is_none() {
            set.composite = LAYER_NONE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Batch, CompositeCmd, PaintKind};
    use sable_core::{BlendMode, Color};

    fn layer(parent: u32, clip: Rect) -> Layer {
        Layer {
            parent,
            clip,
            ..Layer::default()
        }
    }

    fn batch(bounds: Rect) -> Batch {
        let mut b = Batch::simple(PaintKind::Solid, true, 0, bounds);
        b.index_count = 6;
        b
    }

    fn set(layer: u32, batches: (u32, u32), chunks: (u32, u32), composite: u32) -> Set {
        Set {
            layer,
            batch_start: batches.0,
            batch_end: batches.1,
            chunk_start: chunks.0,
            chunk_end: chunks.1,
            composite,
        }
    }

    #[test]
    fn child_layer_gets_tight_bounds_and_placement() {
        let root_clip = Rect::new(0.0, 0.0, 200.0, 200.0);
        let mut layers = vec![layer(0, root_clip), layer(0, root_clip)];
        layers[1].composite = CompositeCmd {
            data: 1,
            opacity: 0.5,
            blend: BlendMode::Normal,
        };
        let batches = vec![batch(Rect::new(60.0, 70.0, 50.0, 50.0))];
        let mut chunks = vec![
            DataChunk::new(1.0, root_clip, Color::WHITE),
            DataChunk::new(1.0, root_clip, Color::RED),
        ];
        let mut sets = vec![
            set(0, (0, 0), (0, 0), LAYER_NONE),
            set(1, (0, 1), (1, 2), LAYER_NONE),
            set(0, (1, 1), (0, 1), 1),
        ];

        resolve(&mut layers, &mut sets, &batches, &mut chunks);

        assert_eq!(layers[1].bounds, Rect::new(60.0, 70.0, 50.0, 50.0));
        assert_eq!(layers[1].place, Rect::new(60.0, 70.0, 50.0, 50.0));
        // The child's chunk is rebased so content lands at its target origin.
        assert_eq!(chunks[1].translate, [-60.0, -70.0]);
        assert_eq!(chunks[1].clip_rect(), Rect::new(-60.0, -70.0, 200.0, 200.0));
        // Root chunks keep screen coordinates.
        assert_eq!(chunks[0].translate, [0.0, 0.0]);
        // A composited child counts toward the parent extent.
        assert_eq!(layers[0].bounds, Rect::new(60.0, 70.0, 50.0, 50.0));
        assert_eq!(sets[2].composite, 1);
    }

    #[test]
    fn bounds_never_exceed_clip() {
        let root_clip = Rect::new(0.0, 0.0, 100.0, 100.0);
        let child_clip = Rect::new(20.0, 20.0, 40.0, 40.0);
        let mut layers = vec![layer(0, root_clip), layer(0, child_clip)];
        // Batch spills past the child clip on every side.
        let batches = vec![batch(Rect::new(0.0, 0.0, 100.0, 100.0))];
        let mut chunks = vec![DataChunk::new(1.0, child_clip, Color::RED)];
        let mut sets = vec![
            set(0, (0, 0), (0, 0), LAYER_NONE),
            set(1, (0, 1), (0, 1), LAYER_NONE),
            set(0, (1, 1), (1, 1), 1),
        ];

        resolve(&mut layers, &mut sets, &batches, &mut chunks);

        assert_eq!(layers[1].bounds, Rect::new(0.0, 0.0, 40.0, 40.0));
        assert_eq!(layers[1].place, Rect::new(20.0, 20.0, 40.0, 40.0));
    }

    #[test]
    fn empty_layer_composite_is_dropped() {
        let root_clip = Rect::new(0.0, 0.0, 100.0, 100.0);
        let mut layers = vec![layer(0, root_clip), layer(0, root_clip)];
        let batches: Vec<Batch> = Vec::new();
        let mut chunks: Vec<DataChunk> = Vec::new();
        let mut sets = vec![
            set(0, (0, 0), (0, 0), LAYER_NONE),
            set(1, (0, 0), (0, 0), LAYER_NONE),
            set(0, (0, 0), (0, 0), 1),
        ];

        resolve(&mut layers, &mut sets, &batches, &mut chunks);

        assert_eq!(layers[1].bounds, Rect::ZERO);
        assert_eq!(sets[2].composite, LAYER_NONE);
    }

    #[test]
    fn nested_layers_place_relative_to_parent_origin() {
        let root_clip = Rect::new(0.0, 0.0, 300.0, 300.0);
        let mid_clip = Rect::new(50.0, 50.0, 200.0, 200.0);
        let inner_clip = Rect::new(80.0, 80.0, 100.0, 100.0);
        let mut layers = vec![
            layer(0, root_clip),
            layer(0, mid_clip),
            layer(1, inner_clip),
        ];
        let batches = vec![
            batch(Rect::new(60.0, 60.0, 10.0, 10.0)),
            batch(Rect::new(90.0, 90.0, 20.0, 20.0)),
        ];
        let mut chunks = vec![
            DataChunk::new(1.0, mid_clip, Color::RED),
            DataChunk::new(1.0, inner_clip, Color::BLUE),
        ];
        let mut sets = vec![
            set(0, (0, 0), (0, 0), LAYER_NONE),
            set(1, (0, 1), (0, 1), LAYER_NONE),
            set(2, (1, 2), (1, 2), LAYER_NONE),
            set(1, (2, 2), (2, 2), 2),
            set(0, (2, 2), (2, 2), 1),
        ];

        resolve(&mut layers, &mut sets, &batches, &mut chunks);

        // Mid extent is its own draw plus the inner layer's extent.
        assert_eq!(layers[1].bounds, Rect::new(10.0, 10.0, 50.0, 50.0));
        assert_eq!(layers[1].place, Rect::new(60.0, 60.0, 50.0, 50.0));
        // Inner placement is relative to the mid layer's target origin.
        assert_eq!(layers[2].place, Rect::new(30.0, 30.0, 20.0, 20.0));
        assert_eq!(chunks[1].translate, [-90.0, -90.0]);
    }
}
