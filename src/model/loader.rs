// Builds a frozen model from an in-memory topology descriptor, reporting
// progress through a callback. The descriptor is the boundary to whatever
// fetched the topology and weight blobs (files, network); this module only
// validates and assembles.

use crate::model::{Activation, LayerKind, Model, ModelBuilder};
use crate::ops::Padding;
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct TopologyDescriptor {
    pub name: String,
    pub layers: Vec<LayerConfig>,
}

#[derive(Debug, Clone)]
pub enum LayerConfig {
    Input {
        name: String,
        height: usize,
        width: usize,
        channels: usize,
    },
    Conv2D {
        name: String,
        filters: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
        activation: Option<Activation>,
        weights: Vec<f32>,
        bias: Vec<f32>,
    },
    MaxPool2D {
        name: String,
        pool: (usize, usize),
        stride: (usize, usize),
    },
    Flatten {
        name: String,
    },
    Dense {
        name: String,
        units: usize,
        activation: Option<Activation>,
        weights: Vec<f32>,
        bias: Vec<f32>,
    },
    Softmax {
        name: String,
    },
}

impl LayerConfig {
    fn name(&self) -> &str {
        match self {
            LayerConfig::Input { name, .. }
            | LayerConfig::Conv2D { name, .. }
            | LayerConfig::MaxPool2D { name, .. }
            | LayerConfig::Flatten { name }
            | LayerConfig::Dense { name, .. }
            | LayerConfig::Softmax { name } => name,
        }
    }
}

/// Assemble a model, invoking `progress` with monotonically non-decreasing
/// values in [0, 1].
pub fn load_model(
    descriptor: &TopologyDescriptor,
    mut progress: impl FnMut(f32),
) -> Result<Model, String> {
    if descriptor.layers.is_empty() {
        return Err(format!("topology '{}' has no layers", descriptor.name));
    }
    progress(0.0);

    let mut builder = ModelBuilder::new(&descriptor.name);
    // Running shape inference so conv weight blobs can be checked while we
    // assemble, before the builder's own validation pass.
    let mut channels = None;
    let total = descriptor.layers.len() as f32;

    for (i, config) in descriptor.layers.iter().enumerate() {
        let kind = match config {
            LayerConfig::Input {
                height,
                width,
                channels: ch,
                ..
            } => {
                channels = Some(*ch);
                LayerKind::Input {
                    height: *height,
                    width: *width,
                    channels: *ch,
                }
            }
            LayerConfig::Conv2D {
                name,
                filters,
                kernel,
                stride,
                padding,
                activation,
                weights,
                bias,
            } => {
                let in_c = channels
                    .ok_or_else(|| format!("conv layer '{name}' appears before the input layer"))?;
                let shape = [kernel.0, kernel.1, in_c, *filters];
                let expected: usize = shape.iter().product();
                if weights.len() != expected {
                    return Err(format!(
                        "conv layer '{name}' weight blob has {} values, expected {expected}",
                        weights.len()
                    ));
                }
                channels = Some(*filters);
                LayerKind::Conv2D {
                    filters: *filters,
                    kernel: *kernel,
                    stride: *stride,
                    padding: *padding,
                    activation: *activation,
                    weights: Tensor::from_vec(weights.clone(), &shape)?,
                    bias: Tensor::from_vec(bias.clone(), &[*filters])?,
                }
            }
            LayerConfig::MaxPool2D { pool, stride, .. } => LayerKind::MaxPool2D {
                pool: *pool,
                stride: *stride,
            },
            LayerConfig::Flatten { .. } => LayerKind::Flatten,
            LayerConfig::Dense {
                name,
                units,
                activation,
                weights,
                bias,
            } => {
                if weights.len() % *units != 0 {
                    return Err(format!(
                        "dense layer '{name}' weight blob has {} values, not divisible by {units} units",
                        weights.len()
                    ));
                }
                let in_features = weights.len() / *units;
                LayerKind::Dense {
                    units: *units,
                    activation: *activation,
                    weights: Tensor::from_vec(weights.clone(), &[in_features, *units])?,
                    bias: Tensor::from_vec(bias.clone(), &[*units])?,
                }
            }
            LayerConfig::Softmax { .. } => LayerKind::Softmax,
        };
        builder.add(config.name(), kind)?;
        progress((i + 1) as f32 / total);
    }

    let model = builder.build()?;
    log::info!(
        "loaded model '{}' with {} layers",
        model.name(),
        model.layers().len()
    );
    Ok(model)
}
