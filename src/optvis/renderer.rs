// The visualization engine: one mutable state machine owning the model
// reference, input parametrization, transform chains, compiled objective,
// minimizer and run state. Steering setters are legal while a run is active
// and take effect on the next iteration; structural setters (input params,
// target layer) are rejected mid-run.
//
// Scheduling is cooperative: the host calls `tick` once per frame. A tick
// runs one atomic iteration (forward, loss, backward, Adam step) inside a
// pass-scoped graph that is dropped before the tick returns. Stopping zeroes
// the remaining-iteration counter; the loop observes that at the top of the
// next tick and winds down through the registered callbacks.

use crate::error::VisError;
use crate::graph::Graph;
use crate::model::{Model, loader};
use crate::optim::Adam;
use crate::optvis::image::{self, Parametrization};
use crate::optvis::objectives::{
    self, ActivationModifications, LossFn, ObjectiveSpec, center_coords,
};
use crate::optvis::transform::{TransformChain, fixed_scale, jitter};
use crate::pixels::{self, PixelBuffer};
use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveType {
    Layer,
    Channel,
    Class,
    Neuron,
    Spatial,
    ActAdjust,
    Style,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Initial,
    Loading,
    Loaded,
    Optimizing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputParams {
    pub input_size: usize,
    pub pyramid_layers: usize,
    pub decorrelate: bool,
    pub base_image: Option<PixelBuffer>,
}

impl Default for InputParams {
    fn default() -> Self {
        Self {
            input_size: 128,
            pyramid_layers: 4,
            decorrelate: true,
            base_image: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleLayers {
    pub content: Vec<String>,
    pub style: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleLayerKind {
    Content,
    Style,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveParams {
    pub objective_type: ObjectiveType,
    pub layer: String,
    pub feature_map_layer: String,
    pub channel: usize,
    pub neuron_x: usize,
    pub neuron_y: usize,
    pub class_index: usize,
    pub negative: bool,
    pub pyr_layer_weights: Vec<f32>,
    pub jitter: usize,
    pub learning_rate: f32,
    pub activation_modifications: ActivationModifications,
    pub style_image: Option<Tensor>,
    pub content_image: Option<Tensor>,
    pub style_layers: StyleLayers,
}

impl Default for ObjectiveParams {
    fn default() -> Self {
        Self {
            objective_type: ObjectiveType::Channel,
            layer: String::new(),
            feature_map_layer: String::new(),
            channel: 0,
            neuron_x: 0,
            neuron_y: 0,
            class_index: 0,
            negative: false,
            pyr_layer_weights: vec![1.0; 4],
            jitter: 5,
            learning_rate: 0.05,
            activation_modifications: ActivationModifications::new(),
            style_image: None,
            content_image: None,
            style_layers: StyleLayers::default(),
        }
    }
}

/// Two-line, user-presentable reason why a run cannot start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationMessage {
    pub title: String,
    pub detail: String,
}

impl ValidationMessage {
    fn new(detail: &str) -> Self {
        Self {
            title: "Can't start optimization!".to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Rendered input snapshot: deprocessed pixel values plus their shape.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSnapshot {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No run is active.
    Idle,
    /// One iteration ran.
    Stepped { iteration: usize, loss: f32 },
    /// The run wound down (exhausted or stopped) and callbacks fired.
    Finished,
}

#[derive(Default)]
struct RunState {
    active: bool,
    iterations: usize,
    counter: usize,
    on_iteration: Option<Box<dyn FnMut(bool)>>,
    on_stopped: Option<Box<dyn FnOnce()>>,
}

pub struct Renderer {
    model: Option<Model>,
    input_params: InputParams,
    objective_params: ObjectiveParams,
    parametrization: Option<Parametrization>,
    transform: TransformChain,
    fixed_transform: TransformChain,
    loss: Option<LossFn>,
    optimizer: Adam,
    run: RunState,
    last_input: Option<InputSnapshot>,
    activation_shape: Option<Vec<usize>>,
    load_state: LoadState,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let objective_params = ObjectiveParams::default();
        let learning_rate = objective_params.learning_rate;
        Self {
            model: None,
            input_params: InputParams::default(),
            objective_params,
            parametrization: None,
            transform: TransformChain::identity(),
            fixed_transform: TransformChain::identity(),
            loss: None,
            optimizer: Adam::with_defaults(learning_rate),
            run: RunState::default(),
            last_input: None,
            activation_shape: None,
            load_state: LoadState::Initial,
        }
    }

    // ---- model lifecycle -------------------------------------------------

    /// Replace the model reference. Neither the input parametrization nor
    /// the objective is recompiled; callers do that explicitly.
    pub fn set_model(&mut self, model: Model) {
        self.model = Some(model);
        self.load_state = LoadState::Loaded;
    }

    /// Load a model from a topology descriptor and bring the engine to a
    /// ready state: compiled input, captured content image, default target
    /// layer (the first layer with a kernel) and centered neuron.
    pub fn load_model(
        &mut self,
        descriptor: &loader::TopologyDescriptor,
        progress: impl FnMut(f32),
    ) -> Result<(), VisError> {
        if self.load_state == LoadState::Loading {
            log::warn!("already loading a model");
            return Ok(());
        }
        self.stop_optimization(None);
        self.load_state = LoadState::Loading;
        let model = match loader::load_model(descriptor, progress) {
            Ok(model) => model,
            Err(e) => {
                self.load_state = LoadState::Initial;
                return Err(VisError::Model(e));
            }
        };
        self.set_model(model);
        self.compile_input()?;
        self.set_content_image(None)?;
        self.init_objective_params_for_model();
        let layer = self.objective_params.layer.clone();
        if !layer.is_empty() {
            self.set_layer(&layer)?;
            self.set_feature_map_layer(&layer)?;
        }
        Ok(())
    }

    /// Default objective parameters for a freshly loaded model: first conv
    /// layer as target and inspection layer, neuron at its center.
    pub fn init_objective_params_for_model(&mut self) {
        let Some(model) = &self.model else {
            return;
        };
        let Some(layer) = model.first_conv_layer().map(str::to_string) else {
            log::warn!("didn't initialize target layer: model has no convolution layer");
            return;
        };
        let size = self.input_params.input_size;
        if let Ok(shape) = model.output_shape(&layer, Some((size, size))) {
            if shape.len() == 4 {
                let (x, y) = center_coords(&shape);
                self.objective_params.neuron_x = x;
                self.objective_params.neuron_y = y;
            }
        }
        self.objective_params.layer = layer.clone();
        self.objective_params.feature_map_layer = layer;
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().map(|m| m.name())
    }

    pub fn has_model(&self) -> bool {
        matches!(self.load_state, LoadState::Loaded | LoadState::Optimizing)
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn model_input_shape(&self) -> Option<(usize, usize, usize)> {
        self.model.as_ref().map(|m| m.input_shape())
    }

    pub fn sorted_layer_list(&self) -> Result<Vec<String>, VisError> {
        let model = self.require_model()?;
        Ok(model.sorted_layer_list())
    }

    pub fn shape_for_layer(&self, layer: &str) -> Result<Vec<usize>, VisError> {
        let model = self.require_model()?;
        if !model.has_layer(layer) {
            return Err(VisError::UnknownLayer(layer.to_string()));
        }
        let size = self.input_params.input_size;
        model
            .output_shape(layer, Some((size, size)))
            .map_err(VisError::Model)
    }

    fn require_model(&self) -> Result<&Model, VisError> {
        self.model
            .as_ref()
            .ok_or_else(|| VisError::InvalidState("no model loaded".to_string()))
    }

    fn require_parametrization(&self) -> Result<&Parametrization, VisError> {
        self.parametrization.as_ref().ok_or_else(|| {
            VisError::InvalidState("can't get current input before compiling input".to_string())
        })
    }

    // ---- input parametrization -------------------------------------------

    /// Replace the input parameters, rebuild the trainable variable set and
    /// the transform pipeline, and discard optimizer momentum. Forbidden
    /// while a run is active.
    pub fn set_input_params(&mut self, params: InputParams) -> Result<(), VisError> {
        if self.run.active {
            return Err(VisError::InvalidState(
                "can't change input params during optimization".to_string(),
            ));
        }
        if params.input_size == 0 {
            return Err(VisError::InvalidArgument(
                "input size must be positive".to_string(),
            ));
        }
        if params.pyramid_layers == 0 {
            return Err(VisError::InvalidArgument(
                "pyramid needs at least one level".to_string(),
            ));
        }
        self.input_params = params;
        self.objective_params
            .pyr_layer_weights
            .resize(self.input_params.pyramid_layers, 1.0);
        if self.model.is_none() {
            // Pre-load configuration: parameters are stored and picked up by
            // the compile that follows model loading.
            return Ok(());
        }
        self.resize_style_image()?;
        self.compile_input()?;
        self.clamp_neuron_to_layer();
        self.optimizer = Adam::with_defaults(self.objective_params.learning_rate);
        self.set_content_image(None)?;
        Ok(())
    }

    // The target layer's spatial extent follows the working resolution;
    // stored neuron coordinates must stay inside it.
    fn clamp_neuron_to_layer(&mut self) {
        if self.objective_params.layer.is_empty() {
            return;
        }
        if let Ok(shape) = self.shape_for_layer(&self.objective_params.layer.clone()) {
            if shape.len() == 4 {
                self.objective_params.neuron_x = self.objective_params.neuron_x.min(shape[2] - 1);
                self.objective_params.neuron_y = self.objective_params.neuron_y.min(shape[1] - 1);
            }
        }
    }

    pub fn input_params(&self) -> &InputParams {
        &self.input_params
    }

    pub fn input_size(&self) -> usize {
        self.input_params.input_size
    }

    /// (Re)build the parametrization function and trainable variable set
    /// from the current input params. Idempotent; safe whenever a model is
    /// present.
    pub fn compile_input(&mut self) -> Result<(), VisError> {
        let model = self.require_model()?;
        let size = self.input_params.input_size;
        let channels = model.input_channels();
        let decorrelate = self.input_params.decorrelate;
        let levels = self.input_params.pyramid_layers;

        let parametrization = match &self.input_params.base_image {
            Some(base) => {
                image::img_laplacian_pyramid(base, size, None, channels, None, decorrelate, levels)?
            }
            None => image::rand_laplacian_pyramid(
                size,
                None,
                channels,
                None,
                Some(0.01),
                decorrelate,
                levels,
            )?,
        };
        self.parametrization = Some(parametrization);
        self.activation_shape = None;
        self.init_transforms();
        Ok(())
    }

    /// Recompile the input from scratch and clear activation-adjustment
    /// state. Callable while optimizing.
    pub fn reset_input(&mut self) -> Result<(), VisError> {
        self.store_current_input();
        self.compile_input()?;
        self.objective_params.activation_modifications.clear();
        self.set_content_image(None)?;
        Ok(())
    }

    fn init_transforms(&mut self) {
        let j = self.objective_params.jitter;
        self.transform = TransformChain::new(vec![jitter(j)]);
        self.fixed_transform = match self.model_input_shape() {
            Some((h, w, _)) => TransformChain::new(vec![jitter(j), fixed_scale(h, w)]),
            None => TransformChain::new(vec![jitter(j)]),
        };
    }

    fn active_transform(&self) -> &TransformChain {
        match self.objective_params.objective_type {
            ObjectiveType::Class => &self.fixed_transform,
            _ => &self.transform,
        }
    }

    // ---- objective parameters --------------------------------------------

    /// Select the objective family. Takes effect at the next objective
    /// compilation.
    pub fn set_objective_type(&mut self, objective_type: ObjectiveType) {
        self.objective_params.objective_type = objective_type;
    }

    pub fn objective_type(&self) -> ObjectiveType {
        self.objective_params.objective_type
    }

    /// Select the optimization target layer. Forbidden mid-run; only layers
    /// with spatial (4D) output are valid targets. Changing to a different
    /// layer recenters the target neuron.
    pub fn set_layer(&mut self, layer: &str) -> Result<(), VisError> {
        if self.run.active {
            return Err(VisError::InvalidState(
                "can't change target layer during optimization".to_string(),
            ));
        }
        let model = self.require_model()?;
        if !model.has_layer(layer) {
            return Err(VisError::UnknownLayer(layer.to_string()));
        }
        let size = self.input_params.input_size;
        let shape = model
            .output_shape(layer, Some((size, size)))
            .map_err(VisError::Model)?;
        if shape.len() != 4 {
            return Err(VisError::InvalidArgument(
                "can only select layers with spatial output".to_string(),
            ));
        }
        let changed = self.objective_params.layer != layer;
        self.objective_params.layer = layer.to_string();
        if changed {
            let (x, y) = center_coords(&shape);
            self.objective_params.neuron_x = x;
            self.objective_params.neuron_y = y;
        }
        Ok(())
    }

    pub fn layer(&self) -> &str {
        &self.objective_params.layer
    }

    /// Select the layer whose activations are exposed for inspection. This
    /// is independent of the optimization target and legal mid-run.
    pub fn set_feature_map_layer(&mut self, layer: &str) -> Result<(), VisError> {
        let model = self.require_model()?;
        if !model.has_layer(layer) {
            return Err(VisError::UnknownLayer(layer.to_string()));
        }
        self.objective_params.feature_map_layer = layer.to_string();
        self.activation_shape = None;
        Ok(())
    }

    pub fn feature_map_layer(&self) -> &str {
        &self.objective_params.feature_map_layer
    }

    /// Steer the target channel. Legal mid-run; the next iteration picks it
    /// up through the recompiled loss.
    pub fn set_channel(&mut self, channel: i32) -> Result<(), VisError> {
        if channel < 0 {
            return Err(VisError::InvalidArgument(
                "channel index must be zero or positive".to_string(),
            ));
        }
        self.store_current_input();
        self.objective_params.channel = channel as usize;
        self.compile_loss_f()
    }

    pub fn channel(&self) -> usize {
        self.objective_params.channel
    }

    /// Steer the target neuron. Legal mid-run. Coordinates are clamped to
    /// the target layer's spatial extent.
    pub fn set_neuron(&mut self, x: i32, y: i32) -> Result<(), VisError> {
        if x < 0 || y < 0 {
            return Err(VisError::InvalidArgument(
                "neuron indices must be zero or positive".to_string(),
            ));
        }
        self.store_current_input();
        let (mut x, mut y) = (x as usize, y as usize);
        if !self.objective_params.layer.is_empty() {
            if let Ok(shape) = self.shape_for_layer(&self.objective_params.layer.clone()) {
                if shape.len() == 4 {
                    x = x.min(shape[2] - 1);
                    y = y.min(shape[1] - 1);
                }
            }
        }
        self.objective_params.neuron_x = x;
        self.objective_params.neuron_y = y;
        self.compile_loss_f()
    }

    pub fn neuron(&self) -> (usize, usize) {
        (self.objective_params.neuron_x, self.objective_params.neuron_y)
    }

    /// Steer the target class. Legal mid-run.
    pub fn set_class(&mut self, class_index: i32) -> Result<(), VisError> {
        if class_index < 0 {
            return Err(VisError::InvalidArgument(
                "class index must be zero or positive".to_string(),
            ));
        }
        self.store_current_input();
        self.objective_params.class_index = class_index as usize;
        self.compile_loss_f()
    }

    pub fn class_index(&self) -> usize {
        self.objective_params.class_index
    }

    /// Invert the objective direction. Legal mid-run.
    pub fn set_negative(&mut self, negative: bool) -> Result<(), VisError> {
        self.store_current_input();
        self.objective_params.negative = negative;
        self.compile_loss_f()
    }

    pub fn negative(&self) -> bool {
        self.objective_params.negative
    }

    /// Change the jitter amplitude; rebuilds the transform pipeline. Legal
    /// mid-run.
    pub fn set_jitter(&mut self, jitter_px: i32) -> Result<(), VisError> {
        if jitter_px < 0 {
            return Err(VisError::InvalidArgument(
                "jitter must be zero or positive".to_string(),
            ));
        }
        self.store_current_input();
        self.objective_params.jitter = jitter_px as usize;
        self.init_transforms();
        self.compile_loss_f()
    }

    pub fn jitter(&self) -> usize {
        self.objective_params.jitter
    }

    /// Change the learning rate. Legal mid-run: the live minimizer keeps its
    /// momentum and picks up the new rate immediately.
    pub fn set_learning_rate(&mut self, learning_rate: f32) -> Result<(), VisError> {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(VisError::InvalidArgument(
                "learning rate must be a positive number".to_string(),
            ));
        }
        self.objective_params.learning_rate = learning_rate;
        self.optimizer.set_learning_rate(learning_rate);
        Ok(())
    }

    pub fn learning_rate(&self) -> f32 {
        self.objective_params.learning_rate
    }

    /// Sweep the class-objective frequency level: a value in [0, 1] maps to
    /// per-level weights where the finest levels saturate first.
    pub fn set_class_frequency_level_weights(&mut self, level: f32) {
        let n = self.input_params.pyramid_layers;
        let range_per_layer = 1.0 / n as f32;
        let remainder = level % range_per_layer;
        let full_layers = (level / range_per_layer).floor() as usize;
        let mut weights = Vec::with_capacity(n);
        for l in 0..n {
            if l < full_layers {
                weights.push(1.0);
            } else if l < full_layers + 1 {
                weights.push(remainder * n as f32);
            } else {
                weights.push(0.0);
            }
        }
        weights.reverse();
        self.objective_params.pyr_layer_weights = weights;
    }

    pub fn pyr_layer_weights(&self) -> &[f32] {
        &self.objective_params.pyr_layer_weights
    }

    /// Freeze a style reference image at the current input resolution,
    /// replacing (and dropping) any previous one.
    pub fn set_style_image(&mut self, image: Option<&PixelBuffer>) -> Result<(), VisError> {
        match image {
            Some(buffer) => {
                let size = self.input_params.input_size;
                let param = image::naive_from_image(buffer, size, None, 3, None, true)?;
                let mut graph = Graph::new();
                let ids: Vec<_> = param
                    .trainable
                    .iter()
                    .map(|t| graph.create_variable(t.clone(), true))
                    .collect();
                let rendered = param.recon.render(&mut graph, &ids, None)?;
                let frozen = graph.value(rendered)?.clone();
                self.objective_params.style_image = Some(frozen);
            }
            None => self.objective_params.style_image = None,
        }
        self.compile_loss_f()
    }

    pub fn style_image(&self) -> Option<&Tensor> {
        self.objective_params.style_image.as_ref()
    }

    pub fn style_image_shape(&self) -> Vec<usize> {
        let size = self.input_params.input_size;
        vec![1, size, size, 3]
    }

    fn resize_style_image(&mut self) -> Result<(), VisError> {
        if let Some(style) = &self.objective_params.style_image {
            let size = self.input_params.input_size;
            let resized = style.resize_bilinear(size, size, false)?;
            self.objective_params.style_image = Some(resized);
        }
        Ok(())
    }

    /// Freeze a content reference image. With no buffer given, captures the
    /// current rendered input through the active transform chain.
    pub fn set_content_image(&mut self, image: Option<&PixelBuffer>) -> Result<(), VisError> {
        match image {
            Some(buffer) => {
                let tensor = buffer.to_tensor();
                let channels = self
                    .model
                    .as_ref()
                    .map(|m| m.input_channels())
                    .unwrap_or(3)
                    .min(4);
                let sliced =
                    tensor.slice(&[0, 0, 0, 0], &[1, buffer.height, buffer.width, channels])?;
                self.objective_params.content_image = Some(sliced);
            }
            None => {
                let current = self.rendered_current_input()?;
                self.objective_params.content_image = Some(current);
            }
        }
        self.compile_loss_f()
    }

    pub fn content_image(&self) -> Option<&Tensor> {
        self.objective_params.content_image.as_ref()
    }

    /// Update the content or style layer selection. Legal mid-run.
    pub fn set_style_layers(
        &mut self,
        kind: StyleLayerKind,
        layers: Vec<String>,
    ) -> Result<(), VisError> {
        match kind {
            StyleLayerKind::Content => self.objective_params.style_layers.content = layers,
            StyleLayerKind::Style => self.objective_params.style_layers.style = layers,
        }
        self.compile_loss_f()
    }

    pub fn style_layers(&self) -> &StyleLayers {
        &self.objective_params.style_layers
    }

    /// Deep-merge a partial modification patch; untouched fields of a newly
    /// configured channel default to the identity adjustment.
    pub fn set_activation_modifications(
        &mut self,
        patch: &ActivationModifications,
    ) -> Result<(), VisError> {
        for (layer, channels) in patch {
            let layer_mods = self
                .objective_params
                .activation_modifications
                .entry(layer.clone())
                .or_default();
            for (&channel, modification) in channels {
                let entry = layer_mods.entry(channel).or_default();
                *entry = *modification;
            }
        }
        self.compile_loss_f()
    }

    pub fn activation_modifications(&self) -> &ActivationModifications {
        &self.objective_params.activation_modifications
    }

    pub fn objective_params(&self) -> &ObjectiveParams {
        &self.objective_params
    }

    // ---- objective compilation -------------------------------------------

    /// Rebuild the loss closure, then re-apply the stored target and
    /// inspection layers so the inspection sub-graph matches the objective.
    pub fn compile_objective(&mut self) -> Result<(), VisError> {
        self.compile_loss_f()?;
        let layer = self.objective_params.layer.clone();
        if !layer.is_empty() {
            self.set_layer(&layer)?;
        }
        let feature_map_layer = self.objective_params.feature_map_layer.clone();
        if !feature_map_layer.is_empty() {
            self.set_feature_map_layer(&feature_map_layer)?;
        }
        Ok(())
    }

    /// Full rebuild of the loss closure from current parameters. Stale
    /// closures over previous parameters are dropped wholesale. Leaves the
    /// loss unset when a required reference (target layer, style/content
    /// image) is missing; `validate_optimization_input` names the reason.
    fn compile_loss_f(&mut self) -> Result<(), VisError> {
        let Some(model) = &self.model else {
            self.loss = None;
            return Ok(());
        };
        let p = &self.objective_params;
        let hw = (self.input_params.input_size, self.input_params.input_size);
        let location = Some((p.neuron_x, p.neuron_y));

        self.loss = match p.objective_type {
            ObjectiveType::Layer if p.layer.is_empty() => None,
            ObjectiveType::Channel if p.layer.is_empty() => None,
            ObjectiveType::Neuron if p.layer.is_empty() => None,
            ObjectiveType::Spatial if p.layer.is_empty() => None,
            ObjectiveType::Layer => Some(objectives::compile(
                model,
                hw,
                &ObjectiveSpec::Layer {
                    layer: p.layer.clone(),
                    negative: p.negative,
                },
            )?),
            ObjectiveType::Channel => Some(objectives::compile(
                model,
                hw,
                &ObjectiveSpec::Channel {
                    layer: p.layer.clone(),
                    channel: p.channel,
                    negative: p.negative,
                },
            )?),
            ObjectiveType::Neuron => Some(objectives::compile(
                model,
                hw,
                &ObjectiveSpec::Neuron {
                    layer: p.layer.clone(),
                    channel: p.channel,
                    location,
                    negative: p.negative,
                },
            )?),
            ObjectiveType::Spatial => Some(objectives::compile(
                model,
                hw,
                &ObjectiveSpec::Spatial {
                    layer: p.layer.clone(),
                    location,
                    negative: p.negative,
                },
            )?),
            ObjectiveType::Class => Some(objectives::compile(
                model,
                hw,
                &ObjectiveSpec::Class {
                    index: p.class_index,
                    negative: p.negative,
                },
            )?),
            ObjectiveType::ActAdjust => match &p.content_image {
                Some(original) => Some(objectives::activation_modification(
                    model,
                    original,
                    &p.activation_modifications,
                )?),
                None => None,
            },
            ObjectiveType::Style => match (&p.content_image, &p.style_image) {
                (Some(content), Some(style)) => Some(objectives::style(
                    model,
                    content,
                    style,
                    &p.style_layers.content,
                    &p.style_layers.style,
                )?),
                _ => None,
            },
        };
        Ok(())
    }

    /// Objective-specific readiness check: `None` means ready, otherwise a
    /// user-presentable two-line reason.
    pub fn validate_optimization_input(&self) -> Option<ValidationMessage> {
        let p = &self.objective_params;
        match p.objective_type {
            ObjectiveType::Style if p.style_image.is_none() => {
                Some(ValidationMessage::new("No style image supplied."))
            }
            ObjectiveType::ActAdjust if p.activation_modifications.is_empty() => {
                Some(ValidationMessage::new("No activation modifications supplied."))
            }
            _ => None,
        }
    }

    // ---- optimization loop -----------------------------------------------

    pub fn can_optimize(&self) -> bool {
        self.model.is_some() && !self.objective_params.layer.is_empty() && !self.run.active
    }

    pub fn is_optimizing(&self) -> bool {
        self.run.active
    }

    /// Arm a run: reset the iteration counter, build a fresh minimizer at
    /// the current learning rate, compile the objective and mark the engine
    /// optimizing. A silent no-op when a run is already active; callers
    /// guard with `can_optimize`.
    pub fn start_optimization(
        &mut self,
        iterations: usize,
        on_iteration: Option<Box<dyn FnMut(bool)>>,
    ) -> Result<(), VisError> {
        if self.run.active {
            return Ok(());
        }
        self.require_model()?;
        self.require_parametrization()?;

        self.run.counter = 0;
        self.run.iterations = iterations;
        self.run.on_iteration = on_iteration;
        self.optimizer = Adam::with_defaults(self.objective_params.learning_rate);
        self.compile_objective()?;
        if self.loss.is_none() {
            return Err(VisError::InvalidState(
                "objective is not ready; see validate_optimization_input".to_string(),
            ));
        }
        self.run.active = true;
        self.load_state = LoadState::Optimizing;
        Ok(())
    }

    /// Request a graceful halt: zero the remaining-iteration counter and
    /// register an optional one-shot callback. The loop observes the zeroed
    /// target at the top of its next tick. With no run active, the callback
    /// fires immediately.
    pub fn stop_optimization(&mut self, on_stopped: Option<Box<dyn FnOnce()>>) {
        self.store_current_input();
        if self.model.is_some() {
            self.load_state = LoadState::Loaded;
        }
        if !self.run.active {
            if let Some(callback) = on_stopped {
                callback();
            }
            return;
        }
        self.run.iterations = 0;
        self.run.counter = 0;
        self.run.on_stopped = on_stopped;
    }

    /// Drive the loop by one frame. Either runs one atomic iteration, winds
    /// the run down, or reports that nothing is active. An error inside an
    /// iteration terminates the run without recovery.
    pub fn tick(&mut self) -> Result<TickOutcome, VisError> {
        if !self.run.active {
            return Ok(TickOutcome::Idle);
        }
        if self.run.counter >= self.run.iterations {
            self.run.active = false;
            self.run.iterations = 0;
            self.run.counter = 0;
            if self.model.is_some() {
                self.load_state = LoadState::Loaded;
            }
            if let Some(mut callback) = self.run.on_iteration.take() {
                callback(true);
            }
            if let Some(callback) = self.run.on_stopped.take() {
                callback();
            }
            return Ok(TickOutcome::Finished);
        }

        let loss = match self.step() {
            Ok(loss) => loss,
            Err(e) => {
                self.run.active = false;
                self.run.on_iteration = None;
                self.run.on_stopped = None;
                if self.model.is_some() {
                    self.load_state = LoadState::Loaded;
                }
                return Err(e);
            }
        };
        self.run.counter += 1;
        let iteration = self.run.counter;
        if let Some(callback) = &mut self.run.on_iteration {
            callback(false);
        }
        Ok(TickOutcome::Stepped { iteration, loss })
    }

    /// One atomic iteration: build a pass-scoped graph, render the
    /// parametrized image, transform it, evaluate the loss, backpropagate to
    /// the trainable levels and apply one Adam step. Dropping the graph at
    /// the end releases every intermediate tensor of the pass.
    fn step(&mut self) -> Result<f32, VisError> {
        let model = self.require_model()?;
        let parametrization = self.require_parametrization()?;
        let loss_f = self.loss.as_ref().ok_or_else(|| {
            VisError::InvalidState("no compiled objective; call compile_objective".to_string())
        })?;
        let chain = self.active_transform();
        let weights = self.objective_params.pyr_layer_weights.clone();

        let mut graph = Graph::new();
        let variables: Vec<_> = parametrization
            .trainable
            .iter()
            .map(|t| graph.create_variable(t.clone(), true))
            .collect();
        let rendered = parametrization
            .recon
            .render(&mut graph, &variables, Some(&weights))?;
        let transformed = chain.apply(&mut graph, rendered)?;
        let loss_node = loss_f(&mut graph, model, transformed)?;
        let loss_value = graph.value(loss_node)?.first()?;
        graph.backward(loss_node)?;

        let gradients: Vec<Tensor> = variables
            .iter()
            .zip(&parametrization.trainable)
            .map(|(&id, t)| {
                graph
                    .get_gradient(id)
                    .cloned()
                    .unwrap_or_else(|| Tensor::zeros(t.shape()))
            })
            .collect();
        drop(graph);

        let parametrization = self.parametrization.as_mut().expect("checked above");
        self.optimizer
            .step(&mut parametrization.trainable, &gradients)?;
        Ok(loss_value)
    }

    // ---- readback --------------------------------------------------------

    pub fn has_current_input(&self) -> bool {
        self.parametrization.is_some()
    }

    /// Current rendered input, deprocessed for display. With a level index,
    /// renders that pyramid level alone.
    pub fn current_input(&self, level: Option<usize>) -> Result<InputSnapshot, VisError> {
        let parametrization = self.require_parametrization()?;
        let trainable: Vec<&Tensor> = match level {
            None => parametrization.trainable.iter().collect(),
            Some(level) => {
                let count = parametrization.trainable.len();
                if level >= count {
                    return Err(VisError::InvalidArgument(format!(
                        "pyramid level {level} out of range for {count} levels"
                    )));
                }
                vec![&parametrization.trainable[level]]
            }
        };

        let mut graph = Graph::new();
        let ids: Vec<_> = trainable
            .iter()
            .map(|t| graph.create_variable((*t).clone(), true))
            .collect();
        let rendered = parametrization.recon.render(&mut graph, &ids, None)?;
        let image = pixels::deprocess(graph.value(rendered)?)?;
        Ok(InputSnapshot {
            shape: image.shape().to_vec(),
            data: image.to_vec(),
        })
    }

    /// Snapshot the current input for the comparison view. A no-op before
    /// the input is parametrized.
    pub fn store_current_input(&mut self) {
        if self.parametrization.is_some() {
            if let Ok(snapshot) = self.current_input(None) {
                self.last_input = Some(snapshot);
            }
        }
    }

    /// Previous (pre-steering, pre-reset) rendered input.
    pub fn last_input(&self) -> Option<&InputSnapshot> {
        self.last_input.as_ref()
    }

    /// Channel count of the current target layer, zero when unset.
    pub fn channel_count(&self) -> usize {
        if self.objective_params.layer.is_empty() {
            return 0;
        }
        self.shape_for_layer(&self.objective_params.layer)
            .ok()
            .and_then(|s| s.last().copied())
            .unwrap_or(0)
    }

    /// Inspection forward pass: activations of the feature-map layer on the
    /// current pyramid-weighted reconstruction, reshaped so every channel
    /// becomes an independent (h, w, 1) image. Un-normalized; callers apply
    /// their own scaling.
    pub fn activation_maps(&mut self) -> Result<Tensor, VisError> {
        let parametrization = self.require_parametrization()?;
        let model = self.require_model()?;
        let layer = self.objective_params.feature_map_layer.clone();
        if layer.is_empty() {
            return Err(VisError::InvalidState(
                "no feature map layer selected".to_string(),
            ));
        }

        let mut graph = Graph::new();
        let ids: Vec<_> = parametrization
            .trainable
            .iter()
            .map(|t| graph.create_variable(t.clone(), true))
            .collect();
        let rendered = parametrization.recon.render(
            &mut graph,
            &ids,
            Some(&self.objective_params.pyr_layer_weights),
        )?;
        let acts = model
            .apply(&mut graph, rendered, &[layer.as_str()])
            .map_err(VisError::Model)?[0];
        let shape = graph.value(acts)?.shape().to_vec();

        let per_channel = graph.transpose(acts, &[3, 1, 2, 0])?;
        let reshaped = graph.reshape(per_channel, &[shape[3], shape[1], shape[2], 1])?;
        let result = graph.value(reshaped)?.clone();
        self.activation_shape = Some(shape);
        Ok(result)
    }

    /// Cached (batch, h, w, c) shape of the inspection activations.
    pub fn activation_shape(&mut self) -> Result<Vec<usize>, VisError> {
        if let Some(shape) = &self.activation_shape {
            return Ok(shape.clone());
        }
        self.activation_maps()?;
        Ok(self
            .activation_shape
            .clone()
            .expect("activation_maps caches the shape"))
    }

    /// Activation maps, optionally restricted to one channel (clamped).
    pub fn current_activations(&mut self, channel: Option<usize>) -> Result<Tensor, VisError> {
        let maps = self.activation_maps()?;
        match channel {
            None => Ok(maps),
            Some(channel) => {
                let s = maps.shape().to_vec();
                let channel = channel.min(s[0] - 1);
                Ok(maps.slice(&[channel, 0, 0, 0], &[1, s[1], s[2], s[3]])?)
            }
        }
    }

    /// Mean and variance of the (optionally channel-restricted) activations.
    pub fn activation_stats(&mut self, channel: Option<usize>) -> Result<(f32, f32), VisError> {
        let maps = self.current_activations(channel)?;
        Ok(maps.moments()?)
    }

    /// Arg-max class of the full model on the current pyramid-weighted
    /// reconstruction, fed through the fixed-size transform chain.
    pub fn class_prediction(&mut self) -> Result<usize, VisError> {
        let parametrization = self.require_parametrization()?;
        let model = self.require_model()?;

        let mut graph = Graph::new();
        let ids: Vec<_> = parametrization
            .trainable
            .iter()
            .map(|t| graph.create_variable(t.clone(), true))
            .collect();
        let rendered = parametrization.recon.render(
            &mut graph,
            &ids,
            Some(&self.objective_params.pyr_layer_weights),
        )?;
        let scaled = self.fixed_transform.apply(&mut graph, rendered)?;
        let terminal = model.terminal_layer().map_err(VisError::Model)?;
        let prediction = model
            .apply(&mut graph, scaled, &[terminal])
            .map_err(VisError::Model)?[0];
        Ok(graph.value(prediction)?.argmax_flat()?)
    }

    /// Rendered current input through the active transform chain, as a plain
    /// tensor (the automatic content-image capture path).
    fn rendered_current_input(&self) -> Result<Tensor, VisError> {
        let parametrization = self.require_parametrization()?;
        let chain = self.active_transform();
        let mut graph = Graph::new();
        let ids: Vec<_> = parametrization
            .trainable
            .iter()
            .map(|t| graph.create_variable(t.clone(), true))
            .collect();
        let rendered = parametrization.recon.render(
            &mut graph,
            &ids,
            Some(&self.objective_params.pyr_layer_weights),
        )?;
        let transformed = chain.apply(&mut graph, rendered)?;
        Ok(graph.value(transformed)?.clone())
    }
}
