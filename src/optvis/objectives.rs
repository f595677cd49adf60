// Loss-function factories. Each factory resolves layer shapes and clamps
// indices once, up front, and returns a closure that builds the scalar loss
// for one forward pass. The `negative` flag bakes the descent direction into
// the closure: minimizing the returned loss maximizes the activation unless
// the user inverted it.
//
// Index edge policy: indices beyond a tensor's extent clamp down to the last
// valid position instead of failing, so stale UI state after a model or
// layer switch degrades gracefully.

use crate::error::VisError;
use crate::graph::{Graph, NodeId};
use crate::model::Model;
use crate::tensor::Tensor;
use std::collections::BTreeMap;

pub type LossFn = Box<dyn Fn(&mut Graph, &Model, NodeId) -> Result<NodeId, VisError>>;

/// One variant per objective kind, carrying exactly the fields that kind
/// consumes. `compile` dispatches to the matching factory. The reference
/// objectives (style, activation adjustment) have their own factories since
/// they additionally need frozen image tensors.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveSpec {
    /// Whole-layer energy ("deepdream").
    Layer { layer: String, negative: bool },
    /// Mean activation of one channel.
    Channel {
        layer: String,
        channel: usize,
        negative: bool,
    },
    /// One pre-softmax logit.
    Class { index: usize, negative: bool },
    /// One (x, y, channel) location; `None` targets the center neuron.
    Neuron {
        layer: String,
        channel: usize,
        location: Option<(usize, usize)>,
        negative: bool,
    },
    /// All channels at one (x, y) location.
    Spatial {
        layer: String,
        location: Option<(usize, usize)>,
        negative: bool,
    },
}

/// Build the loss closure for a tagged objective.
pub fn compile(
    model: &Model,
    input_hw: (usize, usize),
    spec: &ObjectiveSpec,
) -> Result<LossFn, VisError> {
    match spec {
        ObjectiveSpec::Layer { layer, negative } => {
            deepdream(model, input_hw, layer, *negative)
        }
        ObjectiveSpec::Channel {
            layer,
            channel: ch,
            negative,
        } => channel(model, input_hw, layer, *ch, *negative),
        ObjectiveSpec::Class { index, negative } => class_logit(model, *index, *negative),
        ObjectiveSpec::Neuron {
            layer,
            channel: ch,
            location,
            negative,
        } => neuron(model, input_hw, layer, *ch, *location, *negative),
        ObjectiveSpec::Spatial {
            layer,
            location,
            negative,
        } => spatial(model, input_hw, layer, *location, *negative),
    }
}

/// Per-channel activation adjustment. `noise` is carried for interface
/// compatibility but does not enter the loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelModification {
    pub shift: f32,
    pub scale: f32,
    pub noise: f32,
}

impl Default for ChannelModification {
    fn default() -> Self {
        Self {
            shift: 0.0,
            scale: 1.0,
            noise: 0.0,
        }
    }
}

pub type ActivationModifications = BTreeMap<String, BTreeMap<usize, ChannelModification>>;

fn direction(negative: bool) -> f32 {
    if negative { 1.0 } else { -1.0 }
}

/// Center location of a (batch, h, w, c) activation map as (x, y). Even
/// extents round toward the higher index.
pub fn center_coords(shape: &[usize]) -> (usize, usize) {
    (shape[2] / 2, shape[1] / 2)
}

fn spatial_shape(model: &Model, layer: &str, input_hw: (usize, usize)) -> Result<Vec<usize>, VisError> {
    if !model.has_layer(layer) {
        return Err(VisError::UnknownLayer(layer.to_string()));
    }
    let shape = model
        .output_shape(layer, Some(input_hw))
        .map_err(VisError::Model)?;
    if shape.len() != 4 {
        return Err(VisError::InvalidArgument(format!(
            "objective layer '{layer}' must have a 4D output, got {shape:?}"
        )));
    }
    Ok(shape)
}

fn forward_layer(
    graph: &mut Graph,
    model: &Model,
    input: NodeId,
    layer: &str,
) -> Result<NodeId, VisError> {
    Ok(model
        .apply(graph, input, &[layer])
        .map_err(VisError::Model)?[0])
}

/// Mean activation of a single channel at a named layer.
pub fn channel(
    model: &Model,
    input_hw: (usize, usize),
    layer: &str,
    channel: usize,
    negative: bool,
) -> Result<LossFn, VisError> {
    let shape = spatial_shape(model, layer, input_hw)?;
    let ch = channel.min(shape[3] - 1);
    let mul = direction(negative);
    let layer = layer.to_string();

    Ok(Box::new(move |graph, model, input| {
        let acts = forward_layer(graph, model, input, &layer)?;
        let s = graph.value(acts)?.shape().to_vec();
        let sliced = graph.slice(acts, &[0, 0, 0, ch], &[s[0], s[1], s[2], 1])?;
        let signed = graph.mul_scalar(sliced, mul)?;
        Ok(graph.mean(signed, None)?)
    }))
}

/// Whole-layer energy: mean of the squared activation tensor. Amplifies
/// whatever the layer already responds to.
pub fn deepdream(
    model: &Model,
    input_hw: (usize, usize),
    layer: &str,
    negative: bool,
) -> Result<LossFn, VisError> {
    spatial_shape(model, layer, input_hw)?;
    let mul = direction(negative);
    let layer = layer.to_string();

    Ok(Box::new(move |graph, model, input| {
        let acts = forward_layer(graph, model, input, &layer)?;
        let squared = graph.power_scalar(acts, 2.0)?;
        let signed = graph.mul_scalar(squared, mul)?;
        Ok(graph.mean(signed, None)?)
    }))
}

/// One scalar slice of the pre-softmax logits.
pub fn class_logit(model: &Model, index: usize, negative: bool) -> Result<LossFn, VisError> {
    let layer = model.class_output_layer().map_err(VisError::Model)?.to_string();
    let mul = direction(negative);

    Ok(Box::new(move |graph, model, input| {
        let acts = forward_layer(graph, model, input, &layer)?;
        let len = graph.value(acts)?.len();
        let flat = graph.reshape(acts, &[1, len])?;
        let ind = index.min(len - 1);
        let logit = graph.slice(flat, &[0, ind], &[1, 1])?;
        let signed = graph.mul_scalar(logit, mul)?;
        Ok(graph.mean(signed, None)?)
    }))
}

fn resolve_location(
    shape: &[usize],
    neuron: Option<(usize, usize)>,
) -> (usize, usize) {
    match neuron {
        None => center_coords(shape),
        Some((x, y)) => (x.min(shape[2] - 1), y.min(shape[1] - 1)),
    }
}

/// Activation of one exact (x, y, channel) location. Defaults to the center
/// neuron; for even extents that is the bottom-right of the central 2x2.
pub fn neuron(
    model: &Model,
    input_hw: (usize, usize),
    layer: &str,
    channel: usize,
    location: Option<(usize, usize)>,
    negative: bool,
) -> Result<LossFn, VisError> {
    let shape = spatial_shape(model, layer, input_hw)?;
    let (x, y) = resolve_location(&shape, location);
    let ch = channel.min(shape[3] - 1);
    let mul = direction(negative);
    let layer = layer.to_string();

    Ok(Box::new(move |graph, model, input| {
        let acts = forward_layer(graph, model, input, &layer)?;
        let s = graph.value(acts)?.shape().to_vec();
        // Jitter may have shrunk the working extent; clamp once more.
        let (x, y) = (x.min(s[2] - 1), y.min(s[1] - 1));
        let picked = graph.slice(acts, &[0, y, x, ch], &[1, 1, 1, 1])?;
        let signed = graph.mul_scalar(picked, mul)?;
        Ok(graph.mean(signed, None)?)
    }))
}

/// Activation averaged across all channels at one (x, y) location.
pub fn spatial(
    model: &Model,
    input_hw: (usize, usize),
    layer: &str,
    location: Option<(usize, usize)>,
    negative: bool,
) -> Result<LossFn, VisError> {
    let shape = spatial_shape(model, layer, input_hw)?;
    let (x, y) = resolve_location(&shape, location);
    let mul = direction(negative);
    let layer = layer.to_string();

    Ok(Box::new(move |graph, model, input| {
        let acts = forward_layer(graph, model, input, &layer)?;
        let s = graph.value(acts)?.shape().to_vec();
        let (x, y) = (x.min(s[2] - 1), y.min(s[1] - 1));
        let column = graph.slice(acts, &[0, y, x, 0], &[1, 1, 1, s[3]])?;
        let signed = graph.mul_scalar(column, mul)?;
        Ok(graph.mean(signed, None)?)
    }))
}

/// Run the frozen model on a reference image and snapshot the requested
/// layer activations, detached from any live graph.
pub fn capture_activations(
    model: &Model,
    image: &Tensor,
    layers: &[String],
) -> Result<Vec<Tensor>, VisError> {
    let mut graph = Graph::new();
    let input = graph.constant(image.clone());
    let refs: Vec<&str> = layers.iter().map(|s| s.as_str()).collect();
    let outputs = model
        .apply(&mut graph, input, &refs)
        .map_err(VisError::Model)?;
    outputs
        .into_iter()
        .map(|id| Ok(graph.value(id)?.clone()))
        .collect()
}

fn constant_zero_loss() -> LossFn {
    Box::new(|graph, _model, input| {
        // Mean of input * 0 keeps the gradient graph alive with a constant
        // zero loss.
        let zeroed = graph.mul_scalar(input, 0.0)?;
        Ok(graph.mean(zeroed, None)?)
    })
}

/// Match a frozen activation snapshot of `original_image` under per-channel
/// shift/scale adjustments, mean-squared-error per configured layer, summed.
pub fn activation_modification(
    model: &Model,
    original_image: &Tensor,
    modifications: &ActivationModifications,
) -> Result<LossFn, VisError> {
    let layers: Vec<String> = modifications.keys().cloned().collect();
    if layers.is_empty() {
        return Ok(constant_zero_loss());
    }
    for layer in &layers {
        if !model.has_layer(layer) {
            return Err(VisError::UnknownLayer(layer.clone()));
        }
    }

    let references = capture_activations(model, original_image, &layers)?;

    // Per-layer (1, 1, 1, C) scale and shift rows, defaulting untouched
    // channels to the identity adjustment.
    let mut scales = Vec::with_capacity(layers.len());
    let mut shifts = Vec::with_capacity(layers.len());
    for (layer, reference) in layers.iter().zip(&references) {
        let channels = *reference.shape().last().unwrap_or(&1);
        let mods = &modifications[layer];
        let mut scale_row = vec![1.0f32; channels];
        let mut shift_row = vec![0.0f32; channels];
        for (&ch, modification) in mods {
            if ch < channels {
                scale_row[ch] = modification.scale;
                shift_row[ch] = modification.shift;
            }
        }
        scales.push(Tensor::from_vec(scale_row, &[1, 1, 1, channels])?);
        shifts.push(Tensor::from_vec(shift_row, &[1, 1, 1, channels])?);
    }

    Ok(Box::new(move |graph, model, input| {
        let names: Vec<&str> = layers.iter().map(|s| s.as_str()).collect();
        let current = model
            .apply(graph, input, &names)
            .map_err(VisError::Model)?;

        let mut total: Option<NodeId> = None;
        for (i, &acts) in current.iter().enumerate() {
            let scale = graph.constant(scales[i].clone());
            let shift = graph.constant(shifts[i].clone());
            let rescaled = graph.div(acts, scale)?;
            let adjusted = graph.sub(rescaled, shift)?;

            let reference = graph.constant(references[i].clone());
            let diff = graph.sub(reference, adjusted)?;
            let squared = graph.power_scalar(diff, 2.0)?;
            let layer_loss = graph.mean(squared, None)?;
            total = Some(match total {
                None => layer_loss,
                Some(sum) => graph.add(sum, layer_loss)?,
            });
        }
        let loss = total.expect("at least one configured layer");
        log::debug!(
            "activation difference loss: {}",
            graph.value(loss)?.first()?
        );
        Ok(loss)
    }))
}

/// Gram matrix of a (batch, h, w, c) activation node: activations flattened
/// to (pixels, channels), multiplied with their own transpose, normalized by
/// the pixel count.
fn gram_node(graph: &mut Graph, acts: NodeId) -> Result<NodeId, String> {
    let s = graph.value(acts)?.shape().to_vec();
    let channels = *s.last().unwrap_or(&1);
    let pixels = graph.value(acts)?.len() / channels.max(1);
    let flat = graph.reshape(acts, &[pixels, channels])?;
    let gram = graph.matmul(flat, flat, true, false)?;
    graph.mul_scalar(gram, 1.0 / pixels.max(1) as f32)
}

fn gram_tensor(acts: &Tensor) -> Result<Tensor, String> {
    let channels = *acts.shape().last().unwrap_or(&1);
    let pixels = acts.len() / channels.max(1);
    let flat = acts.reshape(&[pixels, channels])?;
    let gram = flat.matmul(&flat, true, false)?;
    Ok(gram.mul_scalar(1.0 / pixels.max(1) as f32))
}

fn mean_l1(graph: &mut Graph, a: NodeId, b: NodeId) -> Result<NodeId, String> {
    let diff = graph.sub(a, b)?;
    let magnitude = graph.abs(diff)?;
    graph.mean(magnitude, None)
}

/// Style-transfer objective: mean-L1 content difference on raw activations
/// (scaled x100) plus mean-L1 style difference on Gram matrices. Both
/// reference activation sets are captured frozen at factory time.
pub fn style(
    model: &Model,
    content_image: &Tensor,
    style_image: &Tensor,
    content_layers: &[String],
    style_layers: &[String],
) -> Result<LossFn, VisError> {
    if content_layers.is_empty() && style_layers.is_empty() {
        return Ok(constant_zero_loss());
    }
    for layer in content_layers.iter().chain(style_layers) {
        if !model.has_layer(layer) {
            return Err(VisError::UnknownLayer(layer.clone()));
        }
    }

    let content_refs = capture_activations(model, content_image, content_layers)?;
    let style_refs: Vec<Tensor> = capture_activations(model, style_image, style_layers)?
        .iter()
        .map(gram_tensor)
        .collect::<Result<_, String>>()?;

    let content_layers = content_layers.to_vec();
    let style_layers = style_layers.to_vec();

    Ok(Box::new(move |graph, model, input| {
        let combined: Vec<&str> = content_layers
            .iter()
            .chain(style_layers.iter())
            .map(|s| s.as_str())
            .collect();
        let acts = model
            .apply(graph, input, &combined)
            .map_err(VisError::Model)?;
        let (content_acts, style_acts) = acts.split_at(content_layers.len());

        let mut content_total: Option<NodeId> = None;
        for (&act, reference) in content_acts.iter().zip(&content_refs) {
            let reference = graph.constant(reference.clone());
            let term = mean_l1(graph, act, reference)?;
            content_total = Some(match content_total {
                None => term,
                Some(sum) => graph.add(sum, term)?,
            });
        }

        let mut style_total: Option<NodeId> = None;
        for (&act, reference) in style_acts.iter().zip(&style_refs) {
            let gram = gram_node(graph, act)?;
            let reference = graph.constant(reference.clone());
            let term = mean_l1(graph, gram, reference)?;
            style_total = Some(match style_total {
                None => term,
                Some(sum) => graph.add(sum, term)?,
            });
        }

        let loss = match (content_total, style_total) {
            (Some(content), Some(style_loss)) => {
                let content = graph.mul_scalar(content, 100.0)?;
                log::debug!(
                    "content loss: {}, style loss: {}",
                    graph.value(content)?.first()?,
                    graph.value(style_loss)?.first()?
                );
                graph.add(content, style_loss)?
            }
            (Some(content), None) => graph.mul_scalar(content, 100.0)?,
            (None, Some(style_loss)) => style_loss,
            (None, None) => unreachable!("empty layer sets return early"),
        };
        Ok(loss)
    }))
}

/// Reserved: algebra over compiled objectives (sums, negations) is not
/// supported and must not silently no-op.
pub fn combine(_objectives: Vec<LossFn>) -> Result<LossFn, VisError> {
    Err(VisError::Unimplemented(
        "combining compiled objectives is not supported",
    ))
}
