// Shape manipulation operations. Slice is what jitter crops differentiate
// through: its gradient scatters back into a zero tensor of the input shape.

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
pub struct Reshape {
    pub shape: Vec<usize>,
}

impl Operator for Reshape {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        single_input(inputs, "Reshape")?.reshape(&self.shape)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "Reshape")?;
        grad_output.reshape(x.shape()).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct Transpose {
    pub perm: Vec<usize>,
}

impl Operator for Transpose {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        single_input(inputs, "Transpose")?.transpose(&self.perm)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        single_input(inputs, "Transpose")?;
        let mut inverse = vec![0usize; self.perm.len()];
        for (i, &p) in self.perm.iter().enumerate() {
            inverse[p] = i;
        }
        grad_output.transpose(&inverse).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct Slice {
    pub begin: Vec<usize>,
    pub size: Vec<usize>,
}

impl Operator for Slice {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        single_input(inputs, "Slice")?.slice(&self.begin, &self.size)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "Slice")?;
        grad_output
            .place_into(x.shape(), &self.begin)
            .map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Concatenation of two tensors along one axis.
#[derive(Debug, Clone)]
pub struct Concat {
    pub axis: usize,
}

impl Operator for Concat {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        if inputs.len() != 2 {
            return Err(format!(
                "Concat operation requires exactly 2 inputs, got {}",
                inputs.len()
            ));
        }
        ndarray::concatenate(
            ndarray::Axis(self.axis),
            &[inputs[0].data().view(), inputs[1].data().view()],
        )
        .map(Tensor::new)
        .map_err(|e| format!("concat failed: {e}"))
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        if inputs.len() != 2 {
            return Err(format!(
                "Concat operation requires exactly 2 inputs, got {}",
                inputs.len()
            ));
        }
        let mut begin = vec![0usize; grad_output.ndim()];
        let first = grad_output.slice(&begin, inputs[0].shape())?;
        begin[self.axis] = inputs[0].shape()[self.axis];
        let second = grad_output.slice(&begin, inputs[1].shape())?;
        Ok(vec![first, second])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        2
    }
}
