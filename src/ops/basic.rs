// Element-wise arithmetic with rhs-to-lhs broadcasting.

use crate::ops::Operator;
use crate::tensor::Tensor;

/// Reduce a gradient back to the original input shape when broadcasting was
/// used in the forward pass.
pub fn reduce_gradient_for_broadcasting(
    grad: &Tensor,
    target_shape: &[usize],
) -> Result<Tensor, String> {
    if grad.shape() == target_shape {
        return Ok(grad.clone());
    }

    let grad_shape = grad.shape().to_vec();
    let mut axes_to_reduce = Vec::new();
    let mut target_idx = target_shape.len();

    // Walk both shapes from the trailing end; extra leading axes and axes
    // broadcast from size 1 are summed out.
    for i in (0..grad_shape.len()).rev() {
        if target_idx == 0 {
            axes_to_reduce.push(i);
        } else {
            target_idx -= 1;
            if target_shape[target_idx] == 1 && grad_shape[i] > 1 {
                axes_to_reduce.push(i);
            }
        }
    }

    let mut reduced = if axes_to_reduce.is_empty() {
        grad.clone()
    } else {
        grad.sum(Some(&axes_to_reduce), false)?
    };

    if reduced.shape() != target_shape {
        reduced = reduced.reshape(target_shape)?;
    }
    Ok(reduced)
}

fn check_arity(inputs: &[&Tensor], expected: usize, op: &str) -> Result<(), String> {
    if inputs.len() != expected {
        return Err(format!(
            "{op} operation requires exactly {expected} inputs, got {}",
            inputs.len()
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Add;

impl Operator for Add {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        check_arity(inputs, 2, "Add")?;
        inputs[0].add(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        check_arity(inputs, 2, "Add")?;
        Ok(vec![
            reduce_gradient_for_broadcasting(grad_output, inputs[0].shape())?,
            reduce_gradient_for_broadcasting(grad_output, inputs[1].shape())?,
        ])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

#[derive(Debug, Clone)]
pub struct Sub;

impl Operator for Sub {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        check_arity(inputs, 2, "Sub")?;
        inputs[0].sub(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        check_arity(inputs, 2, "Sub")?;
        let grad_rhs = grad_output.neg();
        Ok(vec![
            reduce_gradient_for_broadcasting(grad_output, inputs[0].shape())?,
            reduce_gradient_for_broadcasting(&grad_rhs, inputs[1].shape())?,
        ])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

#[derive(Debug, Clone)]
pub struct Mul;

impl Operator for Mul {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        check_arity(inputs, 2, "Mul")?;
        inputs[0].mul(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        check_arity(inputs, 2, "Mul")?;
        let grad_lhs = grad_output.mul(inputs[1])?;
        let grad_rhs = grad_output.mul(inputs[0])?;
        Ok(vec![
            reduce_gradient_for_broadcasting(&grad_lhs, inputs[0].shape())?,
            reduce_gradient_for_broadcasting(&grad_rhs, inputs[1].shape())?,
        ])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

#[derive(Debug, Clone)]
pub struct Div;

impl Operator for Div {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        check_arity(inputs, 2, "Div")?;
        inputs[0].div(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        check_arity(inputs, 2, "Div")?;
        // d/dx(x / y) = 1/y, d/dy(x / y) = -x/y^2 = -output/y
        let grad_lhs = grad_output.div(inputs[1])?;
        let neg_quotient = output.div(inputs[1])?.neg();
        let grad_rhs = grad_output.mul(&neg_quotient)?;
        Ok(vec![
            reduce_gradient_for_broadcasting(&grad_lhs, inputs[0].shape())?,
            reduce_gradient_for_broadcasting(&grad_rhs, inputs[1].shape())?,
        ])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        2
    }
}
