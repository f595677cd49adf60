// Tensor-scalar operations.

use crate::ops::Operator;
use crate::tensor::Tensor;

fn single_input<'a>(inputs: &[&'a Tensor], op: &str) -> Result<&'a Tensor, String> {
    if inputs.len() != 1 {
        return Err(format!(
            "{op} operation requires exactly 1 input, got {}",
            inputs.len()
        ));
    }
    Ok(inputs[0])
}

#[derive(Debug, Clone)]
pub struct AddScalar {
    pub scalar: f32,
}

impl Operator for AddScalar {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        Ok(single_input(inputs, "AddScalar")?.add_scalar(self.scalar))
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        single_input(inputs, "AddScalar")?;
        Ok(vec![grad_output.clone()])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct MulScalar {
    pub scalar: f32,
}

impl Operator for MulScalar {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        Ok(single_input(inputs, "MulScalar")?.mul_scalar(self.scalar))
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        single_input(inputs, "MulScalar")?;
        Ok(vec![grad_output.mul_scalar(self.scalar)])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Element-wise power with a constant exponent.
#[derive(Debug, Clone)]
pub struct PowerScalar {
    pub exponent: f32,
}

impl Operator for PowerScalar {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        Ok(single_input(inputs, "PowerScalar")?.power_scalar(self.exponent))
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "PowerScalar")?;
        // d/dx(x^p) = p * x^(p-1)
        let local = x.power_scalar(self.exponent - 1.0).mul_scalar(self.exponent);
        grad_output.mul(&local).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}
