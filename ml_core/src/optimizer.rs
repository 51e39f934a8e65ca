/// Flat-slice optimization interface.
///
/// Implementations update `params` in place from a gradient of the same
/// length.
pub trait Optimizer {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]);
}

/// Stochastic gradient descent with momentum and weight decay.
///
/// Update rule (decay folded into the gradient):
/// `g = grad + wd * p; v = momentum * v + g; p -= lr * v`.
///
/// A fresh instance is expected per local-training call so the velocity
/// never leaks across rounds or clients.
pub struct Sgd {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: Vec<f32>,
}

impl Sgd {
    /// Creates a new `Sgd` over `num_params` parameters with zeroed velocity.
    pub fn new(lr: f32, momentum: f32, weight_decay: f32, num_params: usize) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocity: vec![0.0; num_params],
        }
    }
}

impl Optimizer for Sgd {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) {
        debug_assert_eq!(params.len(), grad.len());
        debug_assert_eq!(params.len(), self.velocity.len());

        for ((p, &g), v) in params.iter_mut().zip(grad).zip(&mut self.velocity) {
            let g = g + self.weight_decay * *p;
            *v = self.momentum * *v + g;
            *p -= self.lr * *v;
        }
    }
}
