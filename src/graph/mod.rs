pub mod engine;
mod tests;

pub use engine::{Graph, Node, NodeId};
