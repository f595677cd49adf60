// Dense f32 tensor on top of ndarray's dynamic-dimension arrays.
// Shapes follow the channels-last convention used by the rest of the crate:
// image batches are (batch, height, width, channels).


use ndarray::{Array, ArrayD, Axis, IxDyn, Slice, Zip};
use rand_distr::{Distribution, Normal};

#[derive(Debug, Clone)]
pub struct Tensor {
    data: ArrayD<f32>,
}

impl Tensor {
    pub fn new(data: ArrayD<f32>) -> Self {
        Self { data }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
        }
    }

    pub fn full(shape: &[usize], value: f32) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), value),
        }
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(&[]), value),
        }
    }

    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self, String> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(format!(
                "data length {} doesn't match shape {:?} (expected {})",
                data.len(),
                shape,
                expected
            ));
        }
        Array::from_shape_vec(IxDyn(shape), data)
            .map(|array| Self { data: array })
            .map_err(|e| format!("failed to create tensor: {e}"))
    }

    /// Independent Gaussian samples with the given standard deviation.
    pub fn randn(shape: &[usize], sd: f32) -> Result<Self, String> {
        let normal =
            Normal::new(0.0f32, sd).map_err(|e| format!("invalid normal distribution: {e}"))?;
        let mut rng = rand::rng();
        let n: usize = shape.iter().product();
        let data = (0..n).map(|_| normal.sample(&mut rng)).collect();
        Self::from_vec(data, shape)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f32> {
        self.data
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// First element; the usual way to read back a scalar loss.
    pub fn first(&self) -> Result<f32, String> {
        self.data
            .iter()
            .next()
            .copied()
            .ok_or_else(|| "cannot take first element of an empty tensor".to_string())
    }

    // Element-wise binary op with numpy-style rhs-to-lhs broadcasting.
    fn binary(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Result<Tensor, String> {
        if self.shape() == other.shape() {
            let out = Zip::from(&self.data)
                .and(&other.data)
                .map_collect(|&a, &b| f(a, b));
            return Ok(Tensor::new(out));
        }
        let rhs = other.data.broadcast(self.data.raw_dim()).ok_or_else(|| {
            format!(
                "cannot broadcast {:?} to {:?}",
                other.shape(),
                self.shape()
            )
        })?;
        let out = Zip::from(&self.data).and(&rhs).map_collect(|&a, &b| f(a, b));
        Ok(Tensor::new(out))
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor, String> {
        self.binary(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor, String> {
        self.binary(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor, String> {
        self.binary(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor, String> {
        self.binary(other, |a, b| a / b)
    }

    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        Tensor::new(self.data.mapv(|x| x + scalar))
    }

    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        Tensor::new(self.data.mapv(|x| x * scalar))
    }

    pub fn power_scalar(&self, exponent: f32) -> Tensor {
        Tensor::new(self.data.mapv(|x| x.powf(exponent)))
    }

    pub fn neg(&self) -> Tensor {
        Tensor::new(self.data.mapv(|x| -x))
    }

    pub fn abs(&self) -> Tensor {
        Tensor::new(self.data.mapv(|x| x.abs()))
    }

    pub fn sign(&self) -> Tensor {
        Tensor::new(self.data.mapv(|x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }))
    }

    pub fn sqrt(&self) -> Tensor {
        Tensor::new(self.data.mapv(|x| x.sqrt()))
    }

    pub fn sigmoid(&self) -> Tensor {
        Tensor::new(self.data.mapv(|x| 1.0 / (1.0 + (-x).exp())))
    }

    pub fn relu(&self) -> Tensor {
        Tensor::new(self.data.mapv(|x| x.max(0.0)))
    }

    pub fn clamp(&self, min_val: f32, max_val: f32) -> Tensor {
        Tensor::new(self.data.mapv(|x| x.clamp(min_val, max_val)))
    }

    /// 2-D matrix product with optional operand transposition.
    pub fn matmul(
        &self,
        other: &Tensor,
        transpose_a: bool,
        transpose_b: bool,
    ) -> Result<Tensor, String> {
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(format!(
                "matmul requires 2D tensors, got {}D and {}D",
                self.ndim(),
                other.ndim()
            ));
        }
        let a = self
            .data
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| format!("matmul lhs view failed: {e}"))?;
        let b = other
            .data
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| format!("matmul rhs view failed: {e}"))?;
        let a = if transpose_a { a.reversed_axes() } else { a };
        let b = if transpose_b { b.reversed_axes() } else { b };
        if a.shape()[1] != b.shape()[0] {
            return Err(format!(
                "matmul shape mismatch: ({}, {}) @ ({}, {})",
                a.shape()[0],
                a.shape()[1],
                b.shape()[0],
                b.shape()[1]
            ));
        }
        Ok(Tensor::new(a.dot(&b).into_dyn()))
    }

    /// Sum over the given axes (all elements when `axes` is `None`).
    pub fn sum(&self, axes: Option<&[usize]>, keep_dims: bool) -> Result<Tensor, String> {
        self.reduce(axes, keep_dims, false)
    }

    /// Mean over the given axes (all elements when `axes` is `None`).
    pub fn mean(&self, axes: Option<&[usize]>, keep_dims: bool) -> Result<Tensor, String> {
        self.reduce(axes, keep_dims, true)
    }

    fn reduce(
        &self,
        axes: Option<&[usize]>,
        keep_dims: bool,
        mean: bool,
    ) -> Result<Tensor, String> {
        match axes {
            None => {
                let total = self.data.sum();
                let value = if mean {
                    total / self.len().max(1) as f32
                } else {
                    total
                };
                if keep_dims {
                    Ok(Tensor::full(&vec![1; self.ndim()], value))
                } else {
                    Ok(Tensor::scalar(value))
                }
            }
            Some(axes) => {
                for &ax in axes {
                    if ax >= self.ndim() {
                        return Err(format!(
                            "reduction axis {} out of range for {}D tensor",
                            ax,
                            self.ndim()
                        ));
                    }
                }
                let mut sorted: Vec<usize> = axes.to_vec();
                sorted.sort_unstable();
                sorted.dedup();
                let mut result = self.data.clone();
                // Fold from the highest axis so earlier indices stay valid.
                for &ax in sorted.iter().rev() {
                    result = result.sum_axis(Axis(ax));
                }
                if keep_dims {
                    for &ax in sorted.iter() {
                        result = result.insert_axis(Axis(ax));
                    }
                }
                if mean {
                    let count: usize = sorted.iter().map(|&ax| self.shape()[ax]).product();
                    result = result.mapv(|x| x / count.max(1) as f32);
                }
                Ok(Tensor::new(result))
            }
        }
    }

    pub fn max_value(&self) -> Result<f32, String> {
        self.data
            .iter()
            .copied()
            .reduce(f32::max)
            .ok_or_else(|| "cannot reduce an empty tensor".to_string())
    }

    pub fn min_value(&self) -> Result<f32, String> {
        self.data
            .iter()
            .copied()
            .reduce(f32::min)
            .ok_or_else(|| "cannot reduce an empty tensor".to_string())
    }

    /// Global mean and (population) variance.
    pub fn moments(&self) -> Result<(f32, f32), String> {
        if self.is_empty() {
            return Err("cannot take moments of an empty tensor".to_string());
        }
        let n = self.len() as f32;
        let mean = self.data.sum() / n;
        let variance = self.data.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n;
        Ok((mean, variance))
    }

    pub fn argmax_flat(&self) -> Result<usize, String> {
        let mut best = f32::NEG_INFINITY;
        let mut best_idx = None;
        for (i, &x) in self.data.iter().enumerate() {
            if best_idx.is_none() || x > best {
                best = x;
                best_idx = Some(i);
            }
        }
        best_idx.ok_or_else(|| "cannot take argmax of an empty tensor".to_string())
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor, String> {
        let expected: usize = shape.iter().product();
        if expected != self.len() {
            return Err(format!(
                "cannot reshape {:?} ({} elements) to {:?}",
                self.shape(),
                self.len(),
                shape
            ));
        }
        let contiguous = self.data.as_standard_layout().to_owned();
        contiguous
            .into_shape_with_order(IxDyn(shape))
            .map(Tensor::new)
            .map_err(|e| format!("reshape failed: {e}"))
    }

    pub fn transpose(&self, perm: &[usize]) -> Result<Tensor, String> {
        if perm.len() != self.ndim() {
            return Err(format!(
                "permutation {:?} does not match tensor rank {}",
                perm,
                self.ndim()
            ));
        }
        let permuted = self.data.clone().permuted_axes(IxDyn(perm));
        Ok(Tensor::new(permuted.as_standard_layout().to_owned()))
    }

    /// Rectangular window copy: `begin[i] .. begin[i] + size[i]` per axis.
    pub fn slice(&self, begin: &[usize], size: &[usize]) -> Result<Tensor, String> {
        if begin.len() != self.ndim() || size.len() != self.ndim() {
            return Err(format!(
                "slice spec rank mismatch: begin {:?}, size {:?}, tensor {:?}",
                begin,
                size,
                self.shape()
            ));
        }
        for i in 0..self.ndim() {
            if begin[i] + size[i] > self.shape()[i] {
                return Err(format!(
                    "slice window out of bounds on axis {}: {}+{} > {}",
                    i,
                    begin[i],
                    size[i],
                    self.shape()[i]
                ));
            }
        }
        let view = self.data.slice_each_axis(|ad| {
            let i = ad.axis.index();
            Slice::from(begin[i]..begin[i] + size[i])
        });
        Ok(Tensor::new(view.to_owned()))
    }

    /// Scatter this tensor into a zero tensor of `shape` at offset `begin`.
    /// The adjoint of `slice`.
    pub fn place_into(&self, shape: &[usize], begin: &[usize]) -> Result<Tensor, String> {
        if begin.len() != shape.len() || shape.len() != self.ndim() {
            return Err(format!(
                "placement spec rank mismatch: begin {:?}, target {:?}, tensor {:?}",
                begin,
                shape,
                self.shape()
            ));
        }
        for i in 0..self.ndim() {
            if begin[i] + self.shape()[i] > shape[i] {
                return Err(format!(
                    "placement window out of bounds on axis {}: {}+{} > {}",
                    i,
                    begin[i],
                    self.shape()[i],
                    shape[i]
                ));
            }
        }
        let mut out = ArrayD::<f32>::zeros(IxDyn(shape));
        let inner = self.shape().to_vec();
        out.slice_each_axis_mut(|ad| {
            let i = ad.axis.index();
            Slice::from(begin[i]..begin[i] + inner[i])
        })
        .assign(&self.data);
        Ok(Tensor::new(out))
    }

    /// Softmax over the last axis.
    pub fn softmax_last(&self) -> Result<Tensor, String> {
        if self.ndim() == 0 {
            return Err("softmax requires at least one axis".to_string());
        }
        let axis = Axis(self.ndim() - 1);
        let mut out = self.data.clone();
        for mut lane in out.lanes_mut(axis) {
            let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for x in lane.iter_mut() {
                *x = (*x - max).exp();
                sum += *x;
            }
            for x in lane.iter_mut() {
                *x /= sum;
            }
        }
        Ok(Tensor::new(out))
    }

    /// Bilinear resize of a (batch, height, width, channels) tensor.
    ///
    /// `align_corners = true` maps corner samples onto corner samples (the
    /// pyramid reconstruction path); `false` uses the plain `in/out` scale
    /// (the image-seeding and display paths).
    pub fn resize_bilinear(
        &self,
        out_h: usize,
        out_w: usize,
        align_corners: bool,
    ) -> Result<Tensor, String> {
        let s = self.shape();
        if self.ndim() != 4 {
            return Err(format!("resize_bilinear expects a 4D tensor, got {:?}", s));
        }
        if out_h == 0 || out_w == 0 {
            return Err("resize_bilinear target must be non-empty".to_string());
        }
        let (batch, in_h, in_w, channels) = (s[0], s[1], s[2], s[3]);
        if in_h == out_h && in_w == out_w {
            return Ok(self.clone());
        }
        let mut out = ArrayD::<f32>::zeros(IxDyn(&[batch, out_h, out_w, channels]));
        let scale_y = resize_scale(in_h, out_h, align_corners);
        let scale_x = resize_scale(in_w, out_w, align_corners);
        for b in 0..batch {
            for oy in 0..out_h {
                let (y0, y1, fy) = source_coords(oy, scale_y, in_h);
                for ox in 0..out_w {
                    let (x0, x1, fx) = source_coords(ox, scale_x, in_w);
                    for c in 0..channels {
                        let top = self.data[[b, y0, x0, c]] * (1.0 - fx)
                            + self.data[[b, y0, x1, c]] * fx;
                        let bottom = self.data[[b, y1, x0, c]] * (1.0 - fx)
                            + self.data[[b, y1, x1, c]] * fx;
                        out[[b, oy, ox, c]] = top * (1.0 - fy) + bottom * fy;
                    }
                }
            }
        }
        Ok(Tensor::new(out))
    }
}

pub(crate) fn resize_scale(in_dim: usize, out_dim: usize, align_corners: bool) -> f32 {
    if align_corners && out_dim > 1 {
        (in_dim - 1) as f32 / (out_dim - 1) as f32
    } else {
        in_dim as f32 / out_dim as f32
    }
}

pub(crate) fn source_coords(out_idx: usize, scale: f32, in_dim: usize) -> (usize, usize, f32) {
    let src = (out_idx as f32 * scale).min((in_dim - 1) as f32);
    let lo = src.floor() as usize;
    let hi = (lo + 1).min(in_dim - 1);
    (lo, hi, src - lo as f32)
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}
