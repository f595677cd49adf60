// Differentiable bilinear resize. The forward pass delegates to the tensor
// method; the backward pass scatters each output gradient onto the four
// source samples with the same interpolation weights.

use crate::ops::Operator;
use crate::tensor::{Tensor, resize_scale, source_coords};
use ndarray::{ArrayD, IxDyn};

#[derive(Debug, Clone)]
pub struct ResizeBilinear {
    pub height: usize,
    pub width: usize,
    pub align_corners: bool,
}

impl Operator for ResizeBilinear {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        if inputs.len() != 1 {
            return Err(format!(
                "ResizeBilinear operation requires exactly 1 input, got {}",
                inputs.len()
            ));
        }
        inputs[0].resize_bilinear(self.height, self.width, self.align_corners)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        if inputs.len() != 1 {
            return Err(format!(
                "ResizeBilinear operation requires exactly 1 input, got {}",
                inputs.len()
            ));
        }
        let x = inputs[0];
        let s = x.shape();
        let (batch, in_h, in_w, channels) = (s[0], s[1], s[2], s[3]);
        if in_h == self.height && in_w == self.width {
            return Ok(vec![grad_output.clone()]);
        }
        let mut grad = ArrayD::<f32>::zeros(IxDyn(s));
        let g = grad_output.data();
        let scale_y = resize_scale(in_h, self.height, self.align_corners);
        let scale_x = resize_scale(in_w, self.width, self.align_corners);
        for b in 0..batch {
            for oy in 0..self.height {
                let (y0, y1, fy) = source_coords(oy, scale_y, in_h);
                for ox in 0..self.width {
                    let (x0, x1, fx) = source_coords(ox, scale_x, in_w);
                    for c in 0..channels {
                        let go = g[[b, oy, ox, c]];
                        grad[[b, y0, x0, c]] += go * (1.0 - fy) * (1.0 - fx);
                        grad[[b, y0, x1, c]] += go * (1.0 - fy) * fx;
                        grad[[b, y1, x0, c]] += go * fy * (1.0 - fx);
                        grad[[b, y1, x1, c]] += go * fy * fx;
                    }
                }
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
