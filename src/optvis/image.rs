// Image parametrizations: each factory pairs a trainable variable set with
// a reconstruction recipe that maps those variables to a bounded RGB image
// tensor of shape (batch, h, w, 3) — or 4 channels when alpha is requested.

use crate::graph::{Graph, NodeId};
use crate::optvis::{color, spatial};
use crate::pixels::PixelBuffer;
use crate::tensor::Tensor;

/// Reconstruction recipe: everything needed to turn a list of trainable
/// level nodes into a valid RGB image inside a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconSpec {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    /// Channels delivered to the model.
    pub channels: usize,
    pub decorrelate: bool,
    pub sigmoid: bool,
    pub alpha: bool,
    pub align_corners: bool,
}

impl ReconSpec {
    pub fn render(
        &self,
        graph: &mut Graph,
        levels: &[NodeId],
        weights: Option<&[f32]>,
    ) -> Result<NodeId, String> {
        let summed = spatial::reconstruct(
            graph,
            levels,
            (self.height, self.width),
            weights,
            self.align_corners,
        )?;
        let rgb_slice = graph.slice(
            summed,
            &[0, 0, 0, 0],
            &[self.batch, self.height, self.width, self.channels],
        )?;
        let rgb = color::to_valid_rgb(graph, rgb_slice, self.decorrelate, self.sigmoid, true)?;
        if self.alpha {
            let a = graph.slice(
                summed,
                &[0, 0, 0, self.channels],
                &[self.batch, self.height, self.width, 1],
            )?;
            let a = graph.sigmoid(a)?;
            return graph.concat(rgb, a, 3);
        }
        Ok(rgb)
    }
}

/// A reconstruction recipe plus the trainable variable set it renders.
#[derive(Debug)]
pub struct Parametrization {
    pub recon: ReconSpec,
    pub trainable: Vec<Tensor>,
}

/// Single-resolution parametrization seeded from a reference image through
/// the inverse color transform. No pyramid, no sigmoid.
pub fn naive_from_image(
    image: &PixelBuffer,
    width: usize,
    height: Option<usize>,
    channels: usize,
    batch: Option<usize>,
    decorrelate: bool,
) -> Result<Parametrization, String> {
    let height = height.unwrap_or(width);
    let batch = batch.unwrap_or(1);
    let decorrelate = channels == 3 && decorrelate;

    let mut seed = image
        .to_tensor()
        .resize_bilinear(height, width, false)?
        .mul_scalar(1.0 / 255.0)
        .slice(&[0, 0, 0, 0], &[batch, height, width, channels])?;
    if decorrelate {
        seed = color::inverse_decorrelate(&seed)?;
    }

    Ok(Parametrization {
        recon: ReconSpec {
            batch,
            height,
            width,
            channels,
            decorrelate,
            sigmoid: false,
            alpha: false,
            align_corners: false,
        },
        trainable: vec![seed],
    })
}

/// Gaussian pixel-space parametrization squashed through a sigmoid,
/// optionally carrying an extra alpha channel.
pub fn rand_pixel_image(
    width: usize,
    height: Option<usize>,
    channels: usize,
    batch: Option<usize>,
    sd: Option<f32>,
    decorrelate: bool,
    alpha: bool,
) -> Result<Parametrization, String> {
    let height = height.unwrap_or(width);
    let batch = batch.unwrap_or(1);
    let stored = if alpha { channels + 1 } else { channels };
    let decorrelate = channels == 3 && decorrelate;

    let field = spatial::pixel_field(&[batch, height, width, stored], sd, None)?;
    Ok(Parametrization {
        recon: ReconSpec {
            batch,
            height,
            width,
            channels,
            decorrelate,
            sigmoid: true,
            alpha,
            align_corners: false,
        },
        trainable: vec![field],
    })
}

/// Randomly initialized Laplacian-pyramid parametrization.
pub fn rand_laplacian_pyramid(
    width: usize,
    height: Option<usize>,
    channels: usize,
    batch: Option<usize>,
    sd: Option<f32>,
    decorrelate: bool,
    n_levels: usize,
) -> Result<Parametrization, String> {
    let height = height.unwrap_or(width);
    let batch = batch.unwrap_or(1);
    let decorrelate = channels == 3 && decorrelate;

    let trainable =
        spatial::random_pyramid(&[batch, height, width, channels], sd, n_levels)?;
    Ok(Parametrization {
        recon: ReconSpec {
            batch,
            height,
            width,
            channels,
            decorrelate,
            sigmoid: false,
            alpha: false,
            align_corners: true,
        },
        trainable,
    })
}

/// Laplacian-pyramid parametrization seeded from a reference image.
pub fn img_laplacian_pyramid(
    image: &PixelBuffer,
    width: usize,
    height: Option<usize>,
    channels: usize,
    batch: Option<usize>,
    decorrelate: bool,
    n_levels: usize,
) -> Result<Parametrization, String> {
    let height = height.unwrap_or(width);
    let batch = batch.unwrap_or(1);
    let decorrelate = channels == 3 && decorrelate;

    let trainable = spatial::seeded_pyramid(
        &[batch, height, width, channels],
        image,
        n_levels,
        decorrelate,
    )?;
    Ok(Parametrization {
        recon: ReconSpec {
            batch,
            height,
            width,
            channels,
            decorrelate,
            sigmoid: false,
            alpha: false,
            align_corners: false,
        },
        trainable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::pixels::PixelBuffer;

    fn flat_image(size: usize, value: u8) -> PixelBuffer {
        PixelBuffer::new(vec![value; size * size * 4], size, size).unwrap()
    }

    fn render(param: &Parametrization) -> Vec<usize> {
        let mut graph = Graph::new();
        let ids: Vec<_> = param
            .trainable
            .iter()
            .map(|t| graph.create_variable(t.clone(), true))
            .collect();
        let out = param.recon.render(&mut graph, &ids, None).unwrap();
        graph.value(out).unwrap().shape().to_vec()
    }

    #[test]
    fn test_naive_from_image_shape() {
        let param = naive_from_image(&flat_image(16, 120), 16, None, 3, None, true).unwrap();
        assert_eq!(param.trainable.len(), 1);
        assert_eq!(param.trainable[0].shape(), &[1, 16, 16, 3]);
        assert_eq!(render(&param), vec![1, 16, 16, 3]);
    }

    #[test]
    fn test_rand_pixel_image_with_alpha() {
        let param = rand_pixel_image(8, None, 3, None, None, true, true).unwrap();
        // The stored field carries the alpha channel on top of RGB.
        assert_eq!(param.trainable[0].shape(), &[1, 8, 8, 4]);
        assert_eq!(render(&param), vec![1, 8, 8, 4]);
    }

    #[test]
    fn test_rand_pyramid_render_shape_and_level_count() {
        let param = rand_laplacian_pyramid(32, None, 3, None, None, true, 4).unwrap();
        assert_eq!(param.trainable.len(), 4);
        assert_eq!(render(&param), vec![1, 32, 32, 3]);
    }

    #[test]
    fn test_img_pyramid_render_shape() {
        let param =
            img_laplacian_pyramid(&flat_image(16, 60), 16, None, 3, None, true, 3).unwrap();
        assert_eq!(param.trainable.len(), 3);
        assert_eq!(render(&param), vec![1, 16, 16, 3]);
    }

    #[test]
    fn test_decorrelation_disabled_for_non_rgb() {
        let param = rand_pixel_image(8, None, 1, None, None, true, false).unwrap();
        assert!(!param.recon.decorrelate);
    }
}
