// Channels-last 2D convolution and max pooling. Inputs are
// (batch, height, width, in_channels); filters are
// (kernel_h, kernel_w, in_channels, out_channels).
//
// The backward pass produces gradients for input, filter and bias; the
// visualization engine only consumes the input gradient (model weights are
// frozen), but the operator does not know that.

use crate::ops::Operator;
use crate::tensor::Tensor;
use ndarray::{ArrayD, IxDyn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Valid,
    Same,
}

impl Padding {
    /// (output size, pad before) for one spatial axis.
    pub fn resolve(&self, input: usize, kernel: usize, stride: usize) -> (usize, usize) {
        match self {
            Padding::Valid => {
                let out = (input.saturating_sub(kernel)) / stride + 1;
                (out, 0)
            }
            Padding::Same => {
                let out = input.div_ceil(stride);
                let total = ((out - 1) * stride + kernel).saturating_sub(input);
                (out, total / 2)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conv2D {
    pub stride: (usize, usize),
    pub padding: Padding,
}

impl Conv2D {
    fn geometry(
        &self,
        input: &[usize],
        filter: &[usize],
    ) -> Result<((usize, usize), (usize, usize)), String> {
        if input.len() != 4 {
            return Err(format!("Conv2D expects a 4D input, got {input:?}"));
        }
        if filter.len() != 4 {
            return Err(format!("Conv2D expects a 4D filter, got {filter:?}"));
        }
        if input[3] != filter[2] {
            return Err(format!(
                "Conv2D channel mismatch: input has {}, filter expects {}",
                input[3], filter[2]
            ));
        }
        let (out_h, pad_h) = self.padding.resolve(input[1], filter[0], self.stride.0);
        let (out_w, pad_w) = self.padding.resolve(input[2], filter[1], self.stride.1);
        Ok(((out_h, out_w), (pad_h, pad_w)))
    }
}

impl Operator for Conv2D {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        if inputs.len() != 3 {
            return Err(format!(
                "Conv2D operation requires exactly 3 inputs (input, filter, bias), got {}",
                inputs.len()
            ));
        }
        let (x, w, bias) = (inputs[0], inputs[1], inputs[2]);
        let ((out_h, out_w), (pad_h, pad_w)) = self.geometry(x.shape(), w.shape())?;
        let s = x.shape();
        let f = w.shape();
        let (batch, in_h, in_w, in_c) = (s[0], s[1], s[2], s[3]);
        let (kernel_h, kernel_w, out_c) = (f[0], f[1], f[3]);
        if bias.len() != out_c {
            return Err(format!(
                "Conv2D bias length {} does not match {} output channels",
                bias.len(),
                out_c
            ));
        }

        let xd = x.data();
        let wd = w.data();
        let bd = bias.data();
        let mut out = ArrayD::<f32>::zeros(IxDyn(&[batch, out_h, out_w, out_c]));
        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for oc in 0..out_c {
                        let mut acc = bd[[oc]];
                        for ky in 0..kernel_h {
                            let iy = oy * self.stride.0 + ky;
                            if iy < pad_h || iy - pad_h >= in_h {
                                continue;
                            }
                            for kx in 0..kernel_w {
                                let ix = ox * self.stride.1 + kx;
                                if ix < pad_w || ix - pad_w >= in_w {
                                    continue;
                                }
                                for ic in 0..in_c {
                                    acc += xd[[b, iy - pad_h, ix - pad_w, ic]]
                                        * wd[[ky, kx, ic, oc]];
                                }
                            }
                        }
                        out[[b, oy, ox, oc]] = acc;
                    }
                }
            }
        }
        Ok(Tensor::new(out))
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        if inputs.len() != 3 {
            return Err(format!(
                "Conv2D operation requires exactly 3 inputs (input, filter, bias), got {}",
                inputs.len()
            ));
        }
        let (x, w, bias) = (inputs[0], inputs[1], inputs[2]);
        let ((out_h, out_w), (pad_h, pad_w)) = self.geometry(x.shape(), w.shape())?;
        let s = x.shape();
        let f = w.shape();
        let (batch, in_h, in_w, in_c) = (s[0], s[1], s[2], s[3]);
        let (kernel_h, kernel_w, out_c) = (f[0], f[1], f[3]);

        let xd = x.data();
        let wd = w.data();
        let gd = grad_output.data();
        let mut grad_x = ArrayD::<f32>::zeros(IxDyn(s));
        let mut grad_w = ArrayD::<f32>::zeros(IxDyn(f));
        let mut grad_b = ArrayD::<f32>::zeros(IxDyn(bias.shape()));

        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for oc in 0..out_c {
                        let go = gd[[b, oy, ox, oc]];
                        grad_b[[oc]] += go;
                        for ky in 0..kernel_h {
                            let iy = oy * self.stride.0 + ky;
                            if iy < pad_h || iy - pad_h >= in_h {
                                continue;
                            }
                            for kx in 0..kernel_w {
                                let ix = ox * self.stride.1 + kx;
                                if ix < pad_w || ix - pad_w >= in_w {
                                    continue;
                                }
                                for ic in 0..in_c {
                                    grad_x[[b, iy - pad_h, ix - pad_w, ic]] +=
                                        go * wd[[ky, kx, ic, oc]];
                                    grad_w[[ky, kx, ic, oc]] +=
                                        go * xd[[b, iy - pad_h, ix - pad_w, ic]];
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(vec![
            Tensor::new(grad_x),
            Tensor::new(grad_w),
            Tensor::new(grad_b),
        ])
    }

    fn clone_op(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        3
    }
}

#[derive(Debug, Clone)]
pub struct MaxPool2D {
    pub pool: (usize, usize),
    pub stride: (usize, usize),
}

impl MaxPool2D {
    fn output_dims(&self, input: &[usize]) -> Result<(usize, usize), String> {
        if input.len() != 4 {
            return Err(format!("MaxPool2D expects a 4D input, got {input:?}"));
        }
        if input[1] < self.pool.0 || input[2] < self.pool.1 {
            return Err(format!(
                "MaxPool2D window {:?} larger than input {:?}",
                self.pool, input
            ));
        }
        Ok((
            (input[1] - self.pool.0) / self.stride.0 + 1,
            (input[2] - self.pool.1) / self.stride.1 + 1,
        ))
    }

    // Position of the first maximum inside one pooling window.
    fn argmax_in_window(
        &self,
        data: &ArrayD<f32>,
        b: usize,
        oy: usize,
        ox: usize,
        c: usize,
    ) -> (usize, usize) {
        let mut best = f32::NEG_INFINITY;
        let mut pos = (oy * self.stride.0, ox * self.stride.1);
        for ky in 0..self.pool.0 {
            for kx in 0..self.pool.1 {
                let iy = oy * self.stride.0 + ky;
                let ix = ox * self.stride.1 + kx;
                let v = data[[b, iy, ix, c]];
                if v > best {
                    best = v;
                    pos = (iy, ix);
                }
            }
        }
        pos
    }
}

impl Operator for MaxPool2D {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, String> {
        if inputs.len() != 1 {
            return Err(format!(
                "MaxPool2D operation requires exactly 1 input, got {}",
                inputs.len()
            ));
        }
        let x = inputs[0];
        let (out_h, out_w) = self.output_dims(x.shape())?;
        let s = x.shape();
        let (batch, channels) = (s[0], s[3]);
        let xd = x.data();
        let mut out = ArrayD::<f32>::zeros(IxDyn(&[batch, out_h, out_w, channels]));
        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for c in 0..channels {
                        let (iy, ix) = self.argmax_in_window(xd, b, oy, ox, c);
                        out[[b, oy, ox, c]] = xd[[b, iy, ix, c]];
                    }
                }
            }
        }
        Ok(Tensor::new(out))
    }

    fn gradient(
        &self,
        grad_output: &Tensor,
        inputs: &[&Tensor],
        _output: &Tensor,
    ) -> Result<Vec<Tensor>, String> {
        if inputs.len() != 1 {
            return Err(format!(
                "MaxPool2D operation requires exactly 1 input, got {}",
                inputs.len()
            ));
        }
        let x = inputs[0];
        let (out_h, out_w) = self.output_dims(x.shape())?;
        let s = x.shape();
        let (batch, channels) = (s[0], s[3]);
        let xd = x.data();
        let gd = grad_output.data();
        let mut grad = ArrayD::<f32>::zeros(IxDyn(s));
        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for c in 0..channels {
                        let (iy, ix) = self.argmax_in_window(xd, b, oy, ox, c);
                        grad[[b, iy, ix, c]] += gd[[b, oy, ox, c]];
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
