// Spatial parametrization of the optimizable image: a flat pixel field or a
// Laplacian pyramid of independently trainable detail levels. Levels are
// stored coarsest-first; level i of an n-level pyramid has spatial size
// floor(dim / 2^(n-1-i)).

use crate::graph::{Graph, NodeId};
use crate::optvis::color;
use crate::pixels::PixelBuffer;
use crate::tensor::Tensor;

pub const DEFAULT_INIT_SD: f32 = 0.01;

/// Smallest effective level weight; a zero weight suppresses a level without
/// collapsing the term out of the graph.
pub const MIN_LEVEL_WEIGHT: f32 = 1e-6;

/// Single full-resolution trainable field with Gaussian init. An explicit
/// initial value wins over the sd argument.
pub fn pixel_field(
    shape: &[usize; 4],
    sd: Option<f32>,
    init: Option<Tensor>,
) -> Result<Tensor, String> {
    if let Some(init) = init {
        if sd.is_some() {
            log::warn!(
                "pixel_field received both an initial value and an sd argument; \
                 ignoring sd in favor of the supplied initial value"
            );
        }
        if init.shape() != shape.as_slice() {
            return Err(format!(
                "initial value shape {:?} does not match requested {:?}",
                init.shape(),
                shape
            ));
        }
        return Ok(init);
    }
    Tensor::randn(shape, sd.unwrap_or(DEFAULT_INIT_SD))
}

fn level_dims(full: (usize, usize), n_levels: usize, level: usize) -> (usize, usize) {
    let k = 1usize << (n_levels - 1 - level);
    ((full.0 / k).max(1), (full.1 / k).max(1))
}

/// Randomly initialized pyramid: one trainable tensor per level,
/// coarsest-first.
pub fn random_pyramid(
    shape: &[usize; 4],
    sd: Option<f32>,
    n_levels: usize,
) -> Result<Vec<Tensor>, String> {
    if n_levels == 0 {
        return Err("pyramid needs at least one level".to_string());
    }
    let sd = sd.unwrap_or(DEFAULT_INIT_SD);
    let (batch, height, width, channels) = (shape[0], shape[1], shape[2], shape[3]);
    let mut levels = Vec::with_capacity(n_levels);
    for i in 0..n_levels {
        let (h, w) = level_dims((height, width), n_levels, i);
        levels.push(Tensor::randn(&[batch, h, w, channels], sd)?);
    }
    Ok(levels)
}

/// Classic Laplacian decomposition of a reference image: walking coarsest to
/// finest, each level stores the residual between the reference and the
/// reconstruction accumulated so far. Reconstructing immediately therefore
/// reproduces the reference up to bilinear round-trip error.
pub fn seeded_pyramid(
    shape: &[usize; 4],
    base: &PixelBuffer,
    n_levels: usize,
    decorrelate: bool,
) -> Result<Vec<Tensor>, String> {
    if n_levels == 0 {
        return Err("pyramid needs at least one level".to_string());
    }
    let (batch, height, width, channels) = (shape[0], shape[1], shape[2], shape[3]);
    if channels > 4 {
        return Err(format!("cannot seed {channels} channels from an RGBA image"));
    }

    let mut reference = base
        .to_tensor()
        .resize_bilinear(height, width, false)?
        .mul_scalar(1.0 / 255.0)
        .slice(&[0, 0, 0, 0], &[batch, height, width, channels])?;
    if decorrelate {
        reference = color::inverse_decorrelate(&reference)?;
    }

    let mut current = Tensor::zeros(shape);
    let mut levels = Vec::with_capacity(n_levels);
    for i in 0..n_levels {
        let (h, w) = level_dims((height, width), n_levels, i);
        let residual = reference.sub(&current)?;
        let level = residual.resize_bilinear(h, w, false)?;
        let upsampled = level.resize_bilinear(height, width, false)?;
        current = current.add(&upsampled)?;
        levels.push(level);
    }
    Ok(levels)
}

/// Weighted pyramid reconstruction: upsample every level to full resolution
/// and sum, scaling each level by its clamped weight. Missing weights
/// default to 1, so rendering a level subset needs no weight bookkeeping.
pub fn reconstruct(
    graph: &mut Graph,
    levels: &[NodeId],
    full: (usize, usize),
    weights: Option<&[f32]>,
    align_corners: bool,
) -> Result<NodeId, String> {
    if levels.is_empty() {
        return Err("cannot reconstruct from an empty level list".to_string());
    }
    let mut acc: Option<NodeId> = None;
    for (i, &level) in levels.iter().enumerate() {
        let weight = weights
            .and_then(|w| w.get(i).copied())
            .unwrap_or(1.0)
            .max(MIN_LEVEL_WEIGHT);
        let up = graph.resize_bilinear(level, full.0, full.1, align_corners)?;
        let scaled = graph.mul_scalar(up, weight)?;
        acc = Some(match acc {
            None => scaled,
            Some(sum) => graph.add(sum, scaled)?,
        });
    }
    Ok(acc.expect("at least one level"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::pixels::PixelBuffer;

    fn gradient_image(size: usize) -> PixelBuffer {
        let mut data = Vec::with_capacity(size * size * 4);
        for y in 0..size {
            for x in 0..size {
                data.push((x * 255 / size.max(1)) as u8);
                data.push((y * 255 / size.max(1)) as u8);
                data.push(128);
                data.push(255);
            }
        }
        PixelBuffer::new(data, size, size).unwrap()
    }

    #[test]
    fn test_pixel_field_uses_init_value() {
        let init = Tensor::full(&[1, 4, 4, 3], 0.3);
        let field = pixel_field(&[1, 4, 4, 3], Some(0.5), Some(init.clone())).unwrap();
        assert_eq!(field, init);
    }

    #[test]
    fn test_pixel_field_rejects_shape_mismatch() {
        let init = Tensor::zeros(&[1, 2, 2, 3]);
        assert!(pixel_field(&[1, 4, 4, 3], None, Some(init)).is_err());
    }

    #[test]
    fn test_random_pyramid_level_shapes() {
        let levels = random_pyramid(&[1, 32, 32, 3], None, 4).unwrap();
        assert_eq!(levels.len(), 4);
        // Coarsest first.
        assert_eq!(levels[0].shape(), &[1, 4, 4, 3]);
        assert_eq!(levels[1].shape(), &[1, 8, 8, 3]);
        assert_eq!(levels[2].shape(), &[1, 16, 16, 3]);
        assert_eq!(levels[3].shape(), &[1, 32, 32, 3]);
    }

    #[test]
    fn test_single_level_pyramid_degenerates_to_pixels() {
        let levels = random_pyramid(&[1, 16, 16, 3], None, 1).unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].shape(), &[1, 16, 16, 3]);
    }

    #[test]
    fn test_seeded_pyramid_round_trip() {
        // Reconstruction with no optimization steps reproduces the seed
        // image within bilinear resize error, for any level count.
        let image = gradient_image(32);
        let shape = [1usize, 32, 32, 3];
        let reference = image
            .to_tensor()
            .resize_bilinear(32, 32, false)
            .unwrap()
            .mul_scalar(1.0 / 255.0)
            .slice(&[0, 0, 0, 0], &[1, 32, 32, 3])
            .unwrap();

        for n_levels in 1..=9usize {
            let levels = seeded_pyramid(&shape, &image, n_levels, false).unwrap();
            let mut graph = Graph::new();
            let ids: Vec<_> = levels
                .iter()
                .map(|l| graph.create_variable(l.clone(), true))
                .collect();
            let out = reconstruct(&mut graph, &ids, (32, 32), None, false).unwrap();
            let rebuilt = graph.value(out).unwrap();

            let mut worst = 0.0f32;
            for (a, b) in rebuilt.to_vec().iter().zip(reference.to_vec()) {
                worst = worst.max((a - b).abs());
            }
            assert!(
                worst < 0.05,
                "round-trip error {worst} too large for {n_levels} levels"
            );
        }
    }

    #[test]
    fn test_reconstruct_applies_level_weights() {
        let mut graph = Graph::new();
        let coarse = graph.create_variable(Tensor::full(&[1, 2, 2, 1], 1.0), true);
        let fine = graph.create_variable(Tensor::full(&[1, 4, 4, 1], 1.0), true);
        let out = reconstruct(&mut graph, &[coarse, fine], (4, 4), Some(&[0.0, 1.0]), true)
            .unwrap();
        let values = graph.value(out).unwrap().to_vec();
        // The coarse level is suppressed down to the epsilon floor.
        for v in values {
            assert!((v - 1.0).abs() < 1e-5, "got {v}");
        }
    }

    #[test]
    fn test_reconstruct_subset_renders_single_level() {
        let mut graph = Graph::new();
        let fine = graph.create_variable(Tensor::full(&[1, 4, 4, 1], 0.5), true);
        let out = reconstruct(&mut graph, &[fine], (8, 8), None, true).unwrap();
        assert_eq!(graph.value(out).unwrap().shape(), &[1, 8, 8, 1]);
    }
}
