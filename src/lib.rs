//! # Lucent
//!
//! An interactive feature-visualization engine: synthesize an input image by
//! gradient ascent on a chosen activation statistic (a channel, a neuron, a
//! spatial location, a whole layer, a class logit, a style/content blend or
//! an activation adjustment) of a frozen convolutional classifier, while the
//! objective can be steered mid-run.
//!
//! The lower layers form a small CPU autodiff runtime: dense f32 tensors on
//! `ndarray`, an eager reverse-mode graph built fresh per iteration, a named
//! layer DAG for frozen models and an Adam minimizer. The `optvis` module
//! holds the visualization core on top: decorrelated color parametrization,
//! Laplacian-pyramid image parametrizations, stochastic input transforms,
//! the objective library and the cooperative optimization loop.

pub mod error;
pub mod graph;
pub mod model;
pub mod ops;
pub mod optim;
pub mod optvis;
pub mod pixels;
pub mod tensor;

pub use error::VisError;
pub use graph::{Graph, NodeId};
pub use model::Model;
pub use optvis::Renderer;
pub use pixels::PixelBuffer;
pub use tensor::Tensor;
