use thiserror::Error;

/// Error taxonomy of the visualization engine.
///
/// Tensor, graph and model plumbing below the engine boundary report plain
/// `String` errors; everything that crosses the public surface is wrapped
/// into one of these variants. Expected, user-recoverable conditions (a
/// missing style image, an empty modification set) are not errors at all —
/// they are reported through `Renderer::validate_optimization_input`.
#[derive(Debug, Error)]
pub enum VisError {
    /// Operation forbidden in the current engine state, e.g. changing input
    /// params while a run is active.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Bad argument detected before any state mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reserved code path that must fail loudly instead of silently
    /// no-opping.
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    /// A layer name that the current model does not know.
    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    /// Failure bubbling up from the tensor/graph layer.
    #[error("graph error: {0}")]
    Graph(String),

    /// Failure bubbling up from model construction or application.
    #[error("model error: {0}")]
    Model(String),
}

impl From<String> for VisError {
    fn from(msg: String) -> Self {
        VisError::Graph(msg)
    }
}
