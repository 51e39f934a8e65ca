//! Small math kernels shared by the model and its callers.

use ndarray::Array1;

#[inline]
pub(crate) fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

/// Numerically stable softmax over a logit vector.
pub fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Softmax cross-entropy of `logits` against the class index `target`,
/// computed through log-sum-exp.
///
/// # Panics
/// Panics if `target` is out of range for `logits`.
pub fn cross_entropy(logits: &Array1<f32>, target: usize) -> f32 {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let lse = max + logits.mapv(|v| (v - max).exp()).sum().ln();
    lse - logits[target]
}

/// Index of the largest element; 0 for an empty vector.
pub fn argmax(v: &Array1<f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;

    for (i, &x) in v.iter().enumerate() {
        if x > best_val {
            best = i;
            best_val = x;
        }
    }

    best
}
