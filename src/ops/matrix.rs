// 2-D matrix multiplication with optional operand transposition. The
// transposition flags are load-bearing for the color decorrelation basis
// (x @ B^T) and for Gram matrices (F^T @ F).

use crate::ops::Operator;
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct MatMul {
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl MatMul {
    pub fn plain() -> Self {
        Self {
            transpose_a: false,
            transpose_b: false,
        }
    }
}

impl Operator for MatMul {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        if inputs.len() != 2 {
            return Err(format!(
                "MatMul operation requires exactly 2 inputs, got {}",
                inputs.len()
            ));
        }
        inputs[0].matmul(inputs[1], self.transpose_a, self.transpose_b)
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        if inputs.len() != 2 {
            return Err(format!(
                "MatMul operation requires exactly 2 inputs, got {}",
                inputs.len()
            ));
        }
        let (a, b) = (inputs[0], inputs[1]);
        let g = grad_output;
        let (grad_a, grad_b) = match (self.transpose_a, self.transpose_b) {
            // C = A B:      dA = G B^T,       dB = A^T G
            (false, false) => (g.matmul(b, false, true)?, a.matmul(g, true, false)?),
            // C = A B^T:    dA = G B,         dB = G^T A
            (false, true) => (g.matmul(b, false, false)?, g.matmul(a, true, false)?),
            // C = A^T B:    dA = B G^T,       dB = A G
            (true, false) => (b.matmul(g, false, true)?, a.matmul(g, false, false)?),
            // C = A^T B^T:  dA = (G B)^T,     dB = (A G)^T
            (true, true) => (
                g.matmul(b, false, false)?.transpose(&[1, 0])?,
                a.matmul(g, false, false)?.transpose(&[1, 0])?,
            ),
        };
        Ok(vec![grad_a, grad_b])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        2
    }
}
