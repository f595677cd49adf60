// Operators for the computational graph. Each operator wraps tensor API
// methods for the forward pass and knows how to push a gradient back to its
// inputs.

use crate::tensor::Tensor;
use std::any::type_name;

pub trait Operator: std::fmt::Debug {
    /// Forward computation.
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String>;

    /// Gradient of the output with respect to each input, given the upstream
    /// gradient and the cached forward output.
    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        output: &Tensor,
    ) -> Result<Vec<Tensor>, String>;

    fn num_inputs(&self) -> usize;

    fn name(&self) -> String {
        let full_name = type_name::<Self>();
        full_name
            .rsplit("::")
            .next()
            .unwrap_or(full_name)
            .to_string()
    }

    fn clone_op(&self) -> Box<dyn Operator>;
}

pub mod basic;
pub mod conv;
pub mod image;
pub mod matrix;
pub mod reduction;
pub mod reshape;
pub mod scalar;
pub mod unary;

pub use basic::{Add, Div, Mul, Sub};
pub use conv::{Conv2D, MaxPool2D, Padding};
pub use image::ResizeBilinear;
pub use matrix::MatMul;
pub use reduction::{MaxGlobal, Mean, Softmax, Sum};
pub use reshape::{Concat, Reshape, Slice, Transpose};
pub use scalar::{AddScalar, MulScalar, PowerScalar};
pub use unary::{Abs, Neg, ReLU, Sigmoid};
