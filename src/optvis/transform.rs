// Input transforms applied between the parametrized image and the model.
// Stochastic members re-roll on every application; a whole chain is applied
// once per loss evaluation.

use crate::error::VisError;
use crate::graph::{Graph, NodeId};
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Crop a window `pixels` smaller than the input at a uniformly random
    /// integer offset in [0, pixels] per axis.
    Jitter { pixels: usize },
    /// Bilinear resize to an exact target, for objectives that need a fixed
    /// model input size.
    FixedScale { height: usize, width: usize },
    /// Bilinear resize by a randomly chosen scale factor.
    RandomScale { scales: Vec<f32> },
}

pub fn jitter(pixels: usize) -> Transform {
    Transform::Jitter { pixels }
}

/// Reserved: reproducible jitter with a fixed seed. Deterministic runs are
/// not supported and must not silently pretend to be.
pub fn jitter_seeded(_pixels: usize, _seed: u64) -> Result<Transform, VisError> {
    Err(VisError::Unimplemented(
        "deterministic jitter seeding is not supported",
    ))
}

pub fn fixed_scale(height: usize, width: usize) -> Transform {
    Transform::FixedScale { height, width }
}

pub fn random_scale(scales: Vec<f32>) -> Transform {
    Transform::RandomScale { scales }
}

/// Default exploratory chain: two independent random crops in sequence.
pub fn standard_transforms() -> Vec<Transform> {
    vec![jitter(3), jitter(2)]
}

/// Random integer offset in [0, d], matching floor(random * d + 0.5).
fn jitter_offset(d: usize) -> usize {
    let mut rng = rand::rng();
    (rng.random::<f64>() * d as f64 + 0.5).floor() as usize
}

impl Transform {
    fn apply(&self, graph: &mut Graph, image: NodeId) -> Result<NodeId, String> {
        match self {
            Transform::Jitter { pixels } => {
                let d = *pixels;
                if d == 0 {
                    return Ok(image);
                }
                let shape = graph.value(image)?.shape().to_vec();
                if shape.len() != 4 {
                    return Err(format!("jitter expects a 4D image, got {shape:?}"));
                }
                if shape[1] <= d || shape[2] <= d {
                    return Err(format!(
                        "jitter of {d} pixels does not fit into a {}x{} image",
                        shape[1], shape[2]
                    ));
                }
                let oy = jitter_offset(d);
                let ox = jitter_offset(d);
                graph.slice(
                    image,
                    &[0, oy, ox, 0],
                    &[shape[0], shape[1] - d, shape[2] - d, shape[3]],
                )
            }
            Transform::FixedScale { height, width } => {
                graph.resize_bilinear(image, *height, *width, true)
            }
            Transform::RandomScale { scales } => {
                if scales.is_empty() {
                    return Err("random scale needs at least one factor".to_string());
                }
                let mut rng = rand::rng();
                let scale = scales[rng.random_range(0..scales.len())];
                let shape = graph.value(image)?.shape().to_vec();
                if shape.len() != 4 {
                    return Err(format!("random scale expects a 4D image, got {shape:?}"));
                }
                let h = ((shape[1] as f32 * scale) as usize).max(1);
                let w = ((shape[2] as f32 * scale) as usize).max(1);
                graph.resize_bilinear(image, h, w, true)
            }
        }
    }
}

/// Left-to-right composition of transforms; empty chains are the identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformChain {
    transforms: Vec<Transform>,
}

impl TransformChain {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self { transforms }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        Self::new(standard_transforms())
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn apply(&self, graph: &mut Graph, image: NodeId) -> Result<NodeId, String> {
        let mut current = image;
        for transform in &self.transforms {
            current = transform.apply(graph, current)?;
        }
        Ok(current)
    }
}
