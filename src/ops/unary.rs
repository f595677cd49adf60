// Element-wise unary operations.

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
pub struct Neg;

impl Operator for Neg {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        Ok(single_input(inputs, "Neg")?.neg())
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        single_input(inputs, "Neg")?;
        Ok(vec![grad_output.neg()])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct Abs;

impl Operator for Abs {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        Ok(single_input(inputs, "Abs")?.abs())
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "Abs")?;
        grad_output.mul(&x.sign()).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct Sigmoid;

impl Operator for Sigmoid {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        Ok(single_input(inputs, "Sigmoid")?.sigmoid())
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        single_input(inputs, "Sigmoid")?;
        // sigma' = sigma * (1 - sigma), computed from the cached output
        let one_minus = output.neg().add_scalar(1.0);
        let local = output.mul(&one_minus)?;
        grad_output.mul(&local).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct ReLU;

impl Operator for ReLU {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        Ok(single_input(inputs, "ReLU")?.relu())
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "ReLU")?;
        let mask = Tensor::new(x.data().mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }));
        grad_output.mul(&mask).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}
