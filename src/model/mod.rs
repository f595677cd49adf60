// Frozen feed-forward model: a name-keyed DAG of layers with declared
// shapes, applied as a sub-graph with arbitrary output layers. Weights are
// plain tensors owned by the model; the optimization engine never mutates
// them, it only differentiates through them.

pub mod init;
pub mod loader;
mod tests;

use crate::graph::{Graph, NodeId};
use crate::ops::Padding;
use crate::tensor::Tensor;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
}

#[derive(Debug, Clone)]
pub enum LayerKind {
    Input {
        height: usize,
        width: usize,
        channels: usize,
    },
    Conv2D {
        filters: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
        activation: Option<Activation>,
        weights: Tensor,
        bias: Tensor,
    },
    MaxPool2D {
        pool: (usize, usize),
        stride: (usize, usize),
    },
    Flatten,
    Dense {
        units: usize,
        activation: Option<Activation>,
        weights: Tensor,
        bias: Tensor,
    },
    Softmax,
}

impl LayerKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "Input",
            LayerKind::Conv2D { .. } => "Conv2D",
            LayerKind::MaxPool2D { .. } => "MaxPool2D",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense { .. } => "Dense",
            LayerKind::Softmax => "Softmax",
        }
    }

    /// Layers with a kernel are the interesting visualization targets.
    pub fn has_kernel(&self) -> bool {
        matches!(self, LayerKind::Conv2D { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub inbound: Vec<String>,
    pub outbound: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    layers: Vec<Layer>,
    index: HashMap<String, usize>,
}

impl Model {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Result<&Layer, String> {
        self.index
            .get(name)
            .map(|&i| &self.layers[i])
            .ok_or_else(|| format!("unknown layer '{name}'"))
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn input_layer(&self) -> &Layer {
        // Validated at build time: exactly one Input layer exists.
        self.layers
            .iter()
            .find(|l| matches!(l.kind, LayerKind::Input { .. }))
            .expect("model has an input layer")
    }

    /// Declared input resolution and channel count: (height, width, channels).
    pub fn input_shape(&self) -> (usize, usize, usize) {
        match self.input_layer().kind {
            LayerKind::Input {
                height,
                width,
                channels,
            } => (height, width, channels),
            _ => unreachable!(),
        }
    }

    pub fn input_channels(&self) -> usize {
        self.input_shape().2
    }

    /// First layer with a kernel, the default optimization target.
    pub fn first_conv_layer(&self) -> Option<&str> {
        self.layers
            .iter()
            .find(|l| l.kind.has_kernel())
            .map(|l| l.name.as_str())
    }

    /// Terminal layer of the graph (no consumers).
    pub fn terminal_layer(&self) -> Result<&str, String> {
        self.layers
            .iter()
            .find(|l| l.outbound.is_empty())
            .map(|l| l.name.as_str())
            .ok_or_else(|| "model has no terminal layer".to_string())
    }

    /// The pre-softmax logits layer used by the class objective.
    pub fn class_output_layer(&self) -> Result<&str, String> {
        let terminal = self.layer(self.terminal_layer()?)?;
        if matches!(terminal.kind, LayerKind::Softmax) {
            let feeding = terminal
                .inbound
                .first()
                .ok_or_else(|| format!("softmax layer '{}' has no input", terminal.name))?;
            Ok(self.layer(feeding)?.name.as_str())
        } else {
            Ok(terminal.name.as_str())
        }
    }

    /// Output shape of a layer, inferred at the given input resolution
    /// (the declared one when `input_hw` is `None`).
    pub fn output_shape(
        &self,
        name: &str,
        input_hw: Option<(usize, usize)>,
    ) -> Result<Vec<usize>, String> {
        let mut memo: HashMap<&str, Vec<usize>> = HashMap::new();
        self.shape_of(name, input_hw, &mut memo)
    }

    fn shape_of<'a>(
        &'a self,
        name: &str,
        input_hw: Option<(usize, usize)>,
        memo: &mut HashMap<&'a str, Vec<usize>>,
    ) -> Result<Vec<usize>, String> {
        let layer = self.layer(name)?;
        if let Some(shape) = memo.get(layer.name.as_str()) {
            return Ok(shape.clone());
        }
        let shape = match &layer.kind {
            LayerKind::Input {
                height,
                width,
                channels,
            } => {
                let (h, w) = input_hw.unwrap_or((*height, *width));
                vec![1, h, w, *channels]
            }
            kind => {
                let feeding = layer
                    .inbound
                    .first()
                    .ok_or_else(|| format!("layer '{}' has no input", layer.name))?;
                let upstream = self.shape_of(feeding, input_hw, memo)?;
                infer_shape(kind, &upstream, &layer.name)?
            }
        };
        memo.insert(layer.name.as_str(), shape.clone());
        Ok(shape)
    }

    /// Build the sub-graph restricted to the named output layers and return
    /// their nodes, in the order requested.
    pub fn apply(
        &self,
        graph: &mut Graph,
        input: NodeId,
        outputs: &[&str],
    ) -> Result<Vec<NodeId>, String> {
        let mut memo: HashMap<String, NodeId> = HashMap::new();
        outputs
            .iter()
            .map(|&name| self.node_of(graph, input, name, &mut memo))
            .collect()
    }

    fn node_of(
        &self,
        graph: &mut Graph,
        input: NodeId,
        name: &str,
        memo: &mut HashMap<String, NodeId>,
    ) -> Result<NodeId, String> {
        if let Some(&id) = memo.get(name) {
            return Ok(id);
        }
        let layer = self.layer(name)?;
        if layer.inbound.len() > 1 {
            return Err(format!(
                "layer '{}' has {} inputs; multi-input layers are not supported",
                layer.name,
                layer.inbound.len()
            ));
        }
        let id = match &layer.kind {
            LayerKind::Input { channels, .. } => {
                let shape = graph.value(input)?.shape();
                if shape.len() != 4 || shape[3] != *channels {
                    return Err(format!(
                        "model input expects {} channels, got tensor {:?}",
                        channels, shape
                    ));
                }
                input
            }
            LayerKind::Conv2D {
                stride,
                padding,
                activation,
                weights,
                bias,
                ..
            } => {
                let feeding = self.feeding_node(graph, input, layer, memo)?;
                let w = graph.constant(weights.clone());
                let b = graph.constant(bias.clone());
                let y = graph.conv2d(feeding, w, b, *stride, *padding)?;
                self.activate(graph, y, *activation)?
            }
            LayerKind::MaxPool2D { pool, stride } => {
                let feeding = self.feeding_node(graph, input, layer, memo)?;
                graph.max_pool2d(feeding, *pool, *stride)?
            }
            LayerKind::Flatten => {
                let feeding = self.feeding_node(graph, input, layer, memo)?;
                let shape = graph.value(feeding)?.shape().to_vec();
                let flat: usize = shape[1..].iter().product();
                graph.reshape(feeding, &[shape[0], flat])?
            }
            LayerKind::Dense {
                activation,
                weights,
                bias,
                ..
            } => {
                let feeding = self.feeding_node(graph, input, layer, memo)?;
                let w = graph.constant(weights.clone());
                let b = graph.constant(bias.clone());
                let y = graph.matmul(feeding, w, false, false)?;
                let y = graph.add(y, b)?;
                self.activate(graph, y, *activation)?
            }
            LayerKind::Softmax => {
                let feeding = self.feeding_node(graph, input, layer, memo)?;
                graph.softmax(feeding)?
            }
        };
        memo.insert(layer.name.clone(), id);
        Ok(id)
    }

    fn feeding_node(
        &self,
        graph: &mut Graph,
        input: NodeId,
        layer: &Layer,
        memo: &mut HashMap<String, NodeId>,
    ) -> Result<NodeId, String> {
        let feeding = layer
            .inbound
            .first()
            .ok_or_else(|| format!("layer '{}' has no input", layer.name))?
            .clone();
        self.node_of(graph, input, &feeding, memo)
    }

    fn activate(
        &self,
        graph: &mut Graph,
        id: NodeId,
        activation: Option<Activation>,
    ) -> Result<NodeId, String> {
        match activation {
            Some(Activation::Relu) => graph.relu(id),
            None => Ok(id),
        }
    }

    /// Layer names ordered by longest-path distance from the input; ties
    /// keep definition order. This is what UI layer checklists consume.
    pub fn sorted_layer_list(&self) -> Vec<String> {
        let mut memo: HashMap<&str, usize> = HashMap::new();
        let mut named: Vec<(usize, usize, &str)> = self
            .layers
            .iter()
            .enumerate()
            .map(|(i, l)| (self.distance(&l.name, &mut memo), i, l.name.as_str()))
            .collect();
        named.sort_by_key(|&(dist, i, _)| (dist, i));
        named.into_iter().map(|(_, _, n)| n.to_string()).collect()
    }

    /// Memoized longest path from the input set.
    fn distance<'a>(&'a self, name: &str, memo: &mut HashMap<&'a str, usize>) -> usize {
        if let Some(&d) = memo.get(name) {
            return d;
        }
        let layer = match self.layer(name) {
            Ok(l) => l,
            Err(_) => return 0,
        };
        let d = if layer.inbound.is_empty() {
            0
        } else {
            1 + layer
                .inbound
                .iter()
                .map(|n| self.distance(n, memo))
                .max()
                .unwrap_or(0)
        };
        memo.insert(layer.name.as_str(), d);
        d
    }
}

fn infer_shape(kind: &LayerKind, upstream: &[usize], name: &str) -> Result<Vec<usize>, String> {
    match kind {
        LayerKind::Input { .. } => unreachable!("input layers have no upstream"),
        LayerKind::Conv2D {
            filters,
            kernel,
            stride,
            padding,
            ..
        } => {
            if upstream.len() != 4 {
                return Err(format!(
                    "conv layer '{name}' expects 4D input, got {upstream:?}"
                ));
            }
            let (out_h, _) = padding.resolve(upstream[1], kernel.0, stride.0);
            let (out_w, _) = padding.resolve(upstream[2], kernel.1, stride.1);
            Ok(vec![upstream[0], out_h, out_w, *filters])
        }
        LayerKind::MaxPool2D { pool, stride } => {
            if upstream.len() != 4 {
                return Err(format!(
                    "pool layer '{name}' expects 4D input, got {upstream:?}"
                ));
            }
            if upstream[1] < pool.0 || upstream[2] < pool.1 {
                return Err(format!(
                    "pool layer '{name}' window {pool:?} larger than input {upstream:?}"
                ));
            }
            Ok(vec![
                upstream[0],
                (upstream[1] - pool.0) / stride.0 + 1,
                (upstream[2] - pool.1) / stride.1 + 1,
                upstream[3],
            ])
        }
        LayerKind::Flatten => Ok(vec![upstream[0], upstream[1..].iter().product()]),
        LayerKind::Dense { units, .. } => {
            if upstream.len() != 2 {
                return Err(format!(
                    "dense layer '{name}' expects 2D input, got {upstream:?}"
                ));
            }
            Ok(vec![upstream[0], *units])
        }
        LayerKind::Softmax => Ok(upstream.to_vec()),
    }
}

/// Sequential model builder; each layer connects to the previous one unless
/// an explicit inbound name is given.
pub struct ModelBuilder {
    name: String,
    layers: Vec<Layer>,
    last: Option<String>,
}

impl ModelBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layers: Vec::new(),
            last: None,
        }
    }

    pub fn add(&mut self, name: &str, kind: LayerKind) -> Result<&mut Self, String> {
        let inbound = match (&kind, &self.last) {
            (LayerKind::Input { .. }, _) => Vec::new(),
            (_, Some(prev)) => vec![prev.clone()],
            (_, None) => {
                return Err(format!(
                    "layer '{name}' has no upstream layer; add an input layer first"
                ));
            }
        };
        if self.layers.iter().any(|l| l.name == name) {
            return Err(format!("duplicate layer name '{name}'"));
        }
        self.layers.push(Layer {
            name: name.to_string(),
            kind,
            inbound,
            outbound: Vec::new(),
        });
        self.last = Some(name.to_string());
        Ok(self)
    }

    pub fn build(self) -> Result<Model, String> {
        let n_inputs = self
            .layers
            .iter()
            .filter(|l| matches!(l.kind, LayerKind::Input { .. }))
            .count();
        if n_inputs != 1 {
            return Err(format!("model needs exactly one input layer, got {n_inputs}"));
        }

        let mut index = HashMap::new();
        for (i, layer) in self.layers.iter().enumerate() {
            index.insert(layer.name.clone(), i);
        }

        // Fill in outbound adjacency.
        let mut layers = self.layers;
        let edges: Vec<(String, String)> = layers
            .iter()
            .flat_map(|l| {
                l.inbound
                    .iter()
                    .map(|up| (up.clone(), l.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (up, down) in edges {
            let i = *index
                .get(&up)
                .ok_or_else(|| format!("layer '{down}' references unknown layer '{up}'"))?;
            layers[i].outbound.push(down);
        }

        let model = Model {
            name: self.name,
            layers,
            index,
        };

        // Weight shapes must line up with the inferred activation shapes.
        for layer in model.layers.iter() {
            let upstream = match layer.inbound.first() {
                Some(feeding) => model.output_shape(feeding, None)?,
                None => continue,
            };
            match &layer.kind {
                LayerKind::Conv2D {
                    filters,
                    kernel,
                    weights,
                    bias,
                    ..
                } => {
                    let expected = [kernel.0, kernel.1, upstream[3], *filters];
                    if weights.shape() != expected.as_slice() {
                        return Err(format!(
                            "conv layer '{}' weights shape {:?} does not match expected {:?}",
                            layer.name,
                            weights.shape(),
                            expected
                        ));
                    }
                    if bias.len() != *filters {
                        return Err(format!(
                            "conv layer '{}' bias length {} does not match {} filters",
                            layer.name,
                            bias.len(),
                            filters
                        ));
                    }
                }
                LayerKind::Dense {
                    units,
                    weights,
                    bias,
                    ..
                } => {
                    let expected = [upstream[1], *units];
                    if weights.shape() != expected.as_slice() {
                        return Err(format!(
                            "dense layer '{}' weights shape {:?} does not match expected {:?}",
                            layer.name,
                            weights.shape(),
                            expected
                        ));
                    }
                    if bias.len() != *units {
                        return Err(format!(
                            "dense layer '{}' bias length {} does not match {} units",
                            layer.name,
                            bias.len(),
                            units
                        ));
                    }
                }
                _ => {}
            }
        }

        Ok(model)
    }
}
