// Feature-visualization core: image parametrizations, input transforms,
// objective factories and the interactive optimization engine.

pub mod color;
pub mod driver;
pub mod image;
pub mod objectives;
pub mod renderer;
pub mod spatial;
pub mod transform;
mod tests;

pub use driver::{run_to_completion, run_with};
pub use objectives::{ActivationModifications, ChannelModification, ObjectiveSpec};
pub use renderer::{
    InputParams, InputSnapshot, LoadState, ObjectiveParams, ObjectiveType, Renderer,
    StyleLayerKind, StyleLayers, TickOutcome, ValidationMessage,
};
pub use transform::{Transform, TransformChain, standard_transforms};
