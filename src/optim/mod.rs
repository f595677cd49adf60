// Adam minimizer over the trainable variable set. Moments are keyed by
// parameter position: the variable set is replaced wholesale on every input
// re-parametrization, so graph node ids would not survive anyway.

use crate::tensor::Tensor;

pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    first_moments: Vec<Tensor>,
    second_moments: Vec<Tensor>,
    step_count: u64,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            first_moments: Vec::new(),
            second_moments: Vec::new(),
            step_count: 0,
        }
    }

    pub fn with_defaults(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    pub fn learning_rate(&self) -> f32 {
        self.lr
    }

    /// Live learning-rate change; moment buffers are kept.
    pub fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Drop all moment state, as if freshly constructed.
    pub fn reset_state(&mut self) {
        self.first_moments.clear();
        self.second_moments.clear();
        self.step_count = 0;
    }

    /// One descent step on every parameter, in place.
    pub fn step(&mut self, params: &mut [Tensor], grads: &[Tensor]) -> Result<(), String> {
        if params.len() != grads.len() {
            return Err(format!(
                "parameter/gradient count mismatch: {} vs {}",
                params.len(),
                grads.len()
            ));
        }
        if self.first_moments.len() != params.len() {
            self.first_moments = params.iter().map(|p| Tensor::zeros(p.shape())).collect();
            self.second_moments = params.iter().map(|p| Tensor::zeros(p.shape())).collect();
            self.step_count = 0;
        }

        self.step_count += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step_count as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step_count as i32);

        for i in 0..params.len() {
            let grad = &grads[i];
            if grad.shape() != params[i].shape() {
                return Err(format!(
                    "gradient shape {:?} does not match parameter shape {:?}",
                    grad.shape(),
                    params[i].shape()
                ));
            }

            // m = beta1 * m + (1 - beta1) * g
            let m = self.first_moments[i]
                .mul_scalar(self.beta1)
                .add(&grad.mul_scalar(1.0 - self.beta1))?;
            // v = beta2 * v + (1 - beta2) * g^2
            let v = self.second_moments[i]
                .mul_scalar(self.beta2)
                .add(&grad.mul(grad)?.mul_scalar(1.0 - self.beta2))?;

            let m_hat = m.mul_scalar(1.0 / bias1);
            let v_hat = v.mul_scalar(1.0 / bias2);

            let denom = v_hat.sqrt().add_scalar(self.eps);
            let update = m_hat.div(&denom)?.mul_scalar(self.lr);
            params[i] = params[i].sub(&update)?;

            self.first_moments[i] = m;
            self.second_moments[i] = v;
        }
        Ok(())
    }
}
