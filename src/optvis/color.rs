// Color constraint and decorrelation. The fixed basis approximates the
// principal-component structure of natural-image color statistics; walking
// the optimizer through it makes gradient steps more isotropic across
// channels.

use crate::graph::{Graph, NodeId};
use crate::tensor::Tensor;

const COLOR_CORRELATION_NORMALIZED: [f32; 9] = [
    0.563, 0.195, 0.043, //
    0.585, 0.0, -0.108, //
    0.585, -0.195, 0.065,
];

const COLOR_CORRELATION_NORMALIZED_INVERSE: [f32; 9] = [
    0.577, 0.577, 0.577, //
    2.773, -0.3135, -2.3552, //
    3.1256, -6.1337, 3.1256,
];

const COLOR_MEAN: [f32; 3] = [0.48, 0.46, 0.41];

fn correlation_tensor() -> Tensor {
    Tensor::from_vec(COLOR_CORRELATION_NORMALIZED.to_vec(), &[3, 3])
        .expect("basis matrix is 3x3")
}

fn inverse_correlation_tensor() -> Tensor {
    Tensor::from_vec(COLOR_CORRELATION_NORMALIZED_INVERSE.to_vec(), &[3, 3])
        .expect("inverse basis matrix is 3x3")
}

pub fn color_mean_tensor() -> Tensor {
    Tensor::from_vec(COLOR_MEAN.to_vec(), &[3]).expect("channel mean is length 3")
}

/// Map a decorrelated tensor back toward RGB: flatten the spatial dims,
/// right-multiply by the transposed basis, restore the shape. Sits inside
/// the differentiated path.
pub fn linear_decorrelate_color(graph: &mut Graph, t: NodeId) -> Result<NodeId, String> {
    let shape = graph.value(t)?.shape().to_vec();
    let len = graph.value(t)?.len();
    if shape.last() != Some(&3) {
        return Err(format!(
            "decorrelation expects a trailing channel dim of 3, got {shape:?}"
        ));
    }
    let flat = graph.reshape(t, &[len / 3, 3])?;
    let basis = graph.constant(correlation_tensor());
    let mixed = graph.matmul(flat, basis, false, true)?;
    graph.reshape(mixed, &shape)
}

/// Exact algebraic inverse of `linear_decorrelate_color` plus the mean
/// shift, on a plain tensor. Used once when seeding a parametrization from
/// a reference image, so the optimizer starts in the same latent space it
/// walks.
pub fn inverse_decorrelate(t: &Tensor) -> Result<Tensor, String> {
    let shape = t.shape().to_vec();
    if shape.last() != Some(&3) {
        return Err(format!(
            "inverse decorrelation expects a trailing channel dim of 3, got {shape:?}"
        ));
    }
    let centered = t.sub(&color_mean_tensor())?;
    let flat = centered.reshape(&[t.len() / 3, 3])?;
    let mixed = flat.matmul(&inverse_correlation_tensor(), false, true)?;
    mixed.reshape(&shape)
}

/// Constrain an optimizable tensor to a displayable RGB image. The step
/// order is fixed: decorrelate, mean shift, normalize, sigmoid — each one
/// conditional and independent.
pub fn to_valid_rgb(
    graph: &mut Graph,
    t: NodeId,
    decorrelate: bool,
    sigmoid: bool,
    normalize: bool,
) -> Result<NodeId, String> {
    let mut t = t;
    if decorrelate {
        t = linear_decorrelate_color(graph, t)?;
    }
    if decorrelate && !sigmoid {
        let mean = graph.constant(color_mean_tensor());
        t = graph.add(t, mean)?;
    }
    if normalize {
        let magnitude = graph.abs(t)?;
        let max = graph.max_global(magnitude)?;
        t = graph.div(t, max)?;
    }
    if sigmoid {
        t = graph.sigmoid(t)?;
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::tensor::Tensor;

    #[test]
    fn test_decorrelate_then_inverse_recovers_input() {
        // inverse_decorrelate inverts (decorrelate + mean shift) up to the
        // rounding in the published inverse matrix.
        let rgb = Tensor::from_vec(
            vec![0.2, 0.5, 0.7, 0.9, 0.1, 0.3, 0.4, 0.4, 0.4, 0.0, 1.0, 0.5],
            &[1, 2, 2, 3],
        )
        .unwrap();
        let latent = inverse_decorrelate(&rgb).unwrap();

        let mut graph = Graph::new();
        let t = graph.constant(latent);
        let mixed = linear_decorrelate_color(&mut graph, t).unwrap();
        let mean = graph.constant(color_mean_tensor());
        let back = graph.add(mixed, mean).unwrap();

        for (a, b) in graph
            .value(back)
            .unwrap()
            .to_vec()
            .iter()
            .zip(rgb.to_vec())
        {
            assert!((a - b).abs() < 5e-3, "expected {b}, got {a}");
        }
    }

    #[test]
    fn test_decorrelate_requires_three_channels() {
        let mut graph = Graph::new();
        let t = graph.create_variable(Tensor::zeros(&[1, 2, 2, 4]), true);
        assert!(linear_decorrelate_color(&mut graph, t).is_err());
    }

    #[test]
    fn test_to_valid_rgb_normalize_bounds() {
        let mut graph = Graph::new();
        let t = graph.create_variable(
            Tensor::from_vec(vec![-4.0, 2.0, 1.0, 0.5, -0.5, 0.25], &[1, 1, 2, 3]).unwrap(),
            true,
        );
        let rgb = to_valid_rgb(&mut graph, t, false, false, true).unwrap();
        let values = graph.value(rgb).unwrap().to_vec();
        assert!(values.iter().all(|v| v.abs() <= 1.0 + 1e-6));
        // Division by max |t| leaves the extreme value at magnitude 1.
        assert!((values[0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_to_valid_rgb_sigmoid_skips_mean_shift() {
        // With sigmoid requested, output lives strictly in (0, 1) and no
        // mean is added beforehand.
        let mut graph = Graph::new();
        let t = graph.create_variable(Tensor::zeros(&[1, 1, 1, 3]), true);
        let rgb = to_valid_rgb(&mut graph, t, true, true, false).unwrap();
        let values = graph.value(rgb).unwrap().to_vec();
        for v in values {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_to_valid_rgb_is_differentiable() {
        let mut graph = Graph::new();
        let t = graph.create_variable(Tensor::randn(&[1, 2, 2, 3], 0.1).unwrap(), true);
        let rgb = to_valid_rgb(&mut graph, t, true, false, true).unwrap();
        let loss = graph.mean(rgb, None).unwrap();
        graph.backward(loss).unwrap();
        let grad = graph.get_gradient(t).unwrap();
        assert_eq!(grad.shape(), &[1, 2, 2, 3]);
    }
}
