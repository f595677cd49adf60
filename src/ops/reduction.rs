// Reduction operations and softmax.

use crate::ops::Operator;
use crate::tensor::Tensor;
use ndarray::Axis;

fn single_input<'a>(inputs: &[&'a Tensor], op: &str) -> Result<&'a Tensor, String> {
    if inputs.len() != 1 {
        return Err(format!(
            "{op} operation requires exactly 1 input, got {}",
            inputs.len()
        ));
    }
    Ok(inputs[0])
}

/// Broadcast a reduced gradient back to the input shape, optionally scaling
/// by 1/count for mean reductions.
fn spread_gradient(
    grad_output: &Tensor,
    input: &Tensor,
    axes: &Option<Vec<usize>>,
    scale: f32,
) -> Result<Tensor, String> {
    match axes {
        None => {
            let g = grad_output.first()? * scale;
            Ok(Tensor::full(input.shape(), g))
        }
        Some(axes) => {
            // Re-insert the reduced axes as size 1 so broadcasting lines up.
            let mut sorted = axes.clone();
            sorted.sort_unstable();
            sorted.dedup();
            let mut keep_shape = input.shape().to_vec();
            for &ax in &sorted {
                keep_shape[ax] = 1;
            }
            let reshaped = grad_output.reshape(&keep_shape)?;
            let ones = Tensor::full(input.shape(), scale);
            ones.mul(&reshaped)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sum {
    pub axes: Option<Vec<usize>>,
}

impl Operator for Sum {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        single_input(inputs, "Sum")?.sum(self.axes.as_deref(), false)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "Sum")?;
        spread_gradient(grad_output, x, &self.axes, 1.0).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
pub struct Mean {
    pub axes: Option<Vec<usize>>,
}

impl Operator for Mean {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        single_input(inputs, "Mean")?.mean(self.axes.as_deref(), false)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "Mean")?;
        let count: usize = match &self.axes {
            None => x.len(),
            Some(axes) => {
                let mut sorted = axes.clone();
                sorted.sort_unstable();
                sorted.dedup();
                sorted.iter().map(|&ax| x.shape()[ax]).product()
            }
        };
        spread_gradient(grad_output, x, &self.axes, 1.0 / count.max(1) as f32).map(|g| vec![g])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Global maximum over all elements. The gradient is routed to every
/// position holding the maximum value.
#[derive(Debug, Clone)]
pub struct MaxGlobal;

impl Operator for MaxGlobal {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        single_input(inputs, "MaxGlobal")?
            .max_value()
            .map(Tensor::scalar)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "MaxGlobal")?;
        let max = output.first()?;
        let g = grad_output.first()?;
        let mask = Tensor::new(x.data().mapv(|v| if v == max { g } else { 0.0 }));
        Ok(vec![mask])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Softmax over the last axis.
#[derive(Debug, Clone)]
pub struct Softmax;

impl Operator for Softmax {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        single_input(inputs, "Softmax")?.softmax_last()
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        let x = single_input(inputs, "Softmax")?;
        // dx_i = y_i * (g_i - sum_j g_j y_j), per lane of the last axis
        let axis = Axis(x.ndim() - 1);
        let mut grad = output.data().clone();
        let y = output.data();
        let g = grad_output.data();
        for ((mut lane, y_lane), g_lane) in grad
            .lanes_mut(axis)
            .into_iter()
            .zip(y.lanes(axis))
            .zip(g.lanes(axis))
        {
            let dot: f32 = y_lane.iter().zip(g_lane.iter()).map(|(&a, &b)| a * b).sum();
            for ((out, &yi), &gi) in lane.iter_mut().zip(y_lane.iter()).zip(g_lane.iter()) {
                *out = yi * (gi - dot);
            }
        }
        Ok(vec![Tensor::new(grad)])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}
