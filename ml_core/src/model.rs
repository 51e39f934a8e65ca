use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;

use crate::{
    error::{MlErr, Result},
    layout::{ParamEntry, ParameterLayout},
    ops,
    snapshot::{self, ParameterSnapshot},
    spec::{FuseOperator, ModelSpec},
};

/// A sigmoid MLP with a linear head and a client-private fusion gate.
///
/// All parameters live in one flat buffer interpreted through a
/// `ParameterLayout`. The blended operators fuse the local logits with the
/// logits of a *frozen global reference*: an explicit copy of the round's
/// starting global parameters, filled once per round by the orchestrator.
///
/// Concurrency note: there is exactly one live model per federation and all
/// client calls against it are serialized; nothing here is `Sync`-hardened
/// on purpose.
pub struct FuseMlp {
    spec: ModelSpec,
    layout: ParameterLayout,
    params: Vec<f32>,
    global_ref: Option<Vec<f32>>,
}

/// Cached activations of one forward pass, consumed by `backward`.
#[derive(Debug)]
pub struct ForwardPass {
    input: Array1<f32>,
    hidden: Vec<Array1<f32>>,
    logits_local: Array1<f32>,
    logits_global: Option<Array1<f32>>,
    /// The fused output logits.
    pub logits: Array1<f32>,
}

fn mat<'a>(buf: &'a [f32], e: &ParamEntry) -> ArrayView2<'a, f32> {
    ArrayView2::from_shape((e.shape[0], e.shape[1]), &buf[e.range.clone()])
        .expect("layout range matches shape")
}

fn vector<'a>(buf: &'a [f32], e: &ParamEntry) -> ArrayView1<'a, f32> {
    ArrayView1::from_shape(e.shape[0], &buf[e.range.clone()])
        .expect("layout range matches shape")
}

impl FuseMlp {
    /// Creates a model with uniform random dense weights, zero biases and
    /// the gate at 0.5 (an even local/global blend).
    pub fn new(spec: ModelSpec, rng: &mut impl Rng) -> Self {
        let layout = ParameterLayout::new(&spec);
        let mut params = vec![0.0_f32; layout.total_params()];

        for e in layout.entries() {
            if e.name.ends_with(".weight") {
                let fan_in = e.shape[1] as f32;
                let scale = 1.0 / fan_in.sqrt();
                for p in &mut params[e.range.clone()] {
                    *p = rng.random_range(-scale..scale);
                }
            }
        }
        params[layout.gate().range.clone()].fill(0.5);

        Self {
            spec,
            layout,
            params,
            global_ref: None,
        }
    }

    #[inline]
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    #[inline]
    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    #[inline]
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// The flat parameter buffer, in layout order.
    #[inline]
    pub fn parameters(&self) -> &[f32] {
        &self.params
    }

    /// Mutable access to the flat parameter buffer, for optimizers.
    #[inline]
    pub fn parameters_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    /// A detached copy of the fusion-gate values.
    pub fn fusion_parameters(&self) -> Vec<f32> {
        self.params[self.layout.gate().range.clone()].to_vec()
    }

    /// Overwrites the fusion gate in place.
    ///
    /// # Errors
    /// `MlErr::ShapeMismatch` if `values` has the wrong length.
    pub fn set_fusion_parameters(&mut self, values: &[f32]) -> Result<()> {
        let range = self.layout.gate().range.clone();
        if values.len() != range.len() {
            return Err(MlErr::ShapeMismatch {
                what: "fusion gate",
                got: values.len(),
                expected: range.len(),
            });
        }
        self.params[range].copy_from_slice(values);
        Ok(())
    }

    pub(crate) fn apply_snapshot(&mut self, snapshot: &ParameterSnapshot) -> Result<()> {
        snapshot::write_into(&self.layout, snapshot, &mut self.params)
    }

    /// Materializes the frozen global reference from the round's starting
    /// global snapshot. Set once per round, before any client touches the
    /// live model.
    pub fn set_global_reference(&mut self, snapshot: &ParameterSnapshot) -> Result<()> {
        let mut buf = vec![0.0_f32; self.layout.total_params()];
        snapshot::write_into(&self.layout, snapshot, &mut buf)?;
        self.global_ref = Some(buf);
        Ok(())
    }

    pub fn clear_global_reference(&mut self) {
        self.global_ref = None;
    }

    #[inline]
    pub fn has_global_reference(&self) -> bool {
        self.global_ref.is_some()
    }

    /// Runs the dense stack of `buf` on `x`, pushing each hidden activation
    /// into `hidden` when provided, and returns the head logits.
    fn net_forward(&self, buf: &[f32], x: ArrayView1<f32>, mut hidden: Option<&mut Vec<Array1<f32>>>) -> Array1<f32> {
        let mut a = x.to_owned();

        for i in 0..self.spec.hidden_dims.len() {
            let (we, be) = self.layout.dense(i);
            let z = mat(buf, we).dot(&a) + &vector(buf, be);
            a = z.mapv(ops::sigmoid);
            if let Some(cache) = hidden.as_deref_mut() {
                cache.push(a.clone());
            }
        }

        let (we, be) = self.layout.head();
        mat(buf, we).dot(&a) + &vector(buf, be)
    }

    /// One forward pass.
    ///
    /// # Errors
    /// - `MlErr::ShapeMismatch` if `x` does not match the input dimension.
    /// - `MlErr::MissingGlobalReference` if a blended operator runs without
    ///   the frozen reference being set.
    pub fn forward(&self, x: ArrayView1<f32>) -> Result<ForwardPass> {
        if x.len() != self.spec.input_dim {
            return Err(MlErr::ShapeMismatch {
                what: "input",
                got: x.len(),
                expected: self.spec.input_dim,
            });
        }

        let mut hidden = Vec::with_capacity(self.spec.hidden_dims.len());
        let logits_local = self.net_forward(&self.params, x, Some(&mut hidden));

        let (logits, logits_global) = match self.spec.operator {
            FuseOperator::None => (logits_local.clone(), None),
            op => {
                let gref = self
                    .global_ref
                    .as_ref()
                    .ok_or(MlErr::MissingGlobalReference)?;
                let logits_global = self.net_forward(gref, x, None);
                let gate = vector(&self.params, self.layout.gate());

                let c = self.spec.num_classes;
                let mut fused = Array1::zeros(c);
                for k in 0..c {
                    let lambda = match op {
                        FuseOperator::Multi => gate[k],
                        _ => gate[0],
                    };
                    fused[k] = lambda * logits_local[k] + (1.0 - lambda) * logits_global[k];
                }

                (fused, Some(logits_global))
            }
        };

        Ok(ForwardPass {
            input: x.to_owned(),
            hidden,
            logits_local,
            logits_global,
            logits,
        })
    }

    /// Accumulates softmax-cross-entropy gradients for one sample into the
    /// flat `grads` buffer (callers zero it when they want a fresh gradient).
    ///
    /// # Errors
    /// - `MlErr::InvalidLabel` if `target` is out of the class range.
    /// - `MlErr::ShapeMismatch` if `grads` has the wrong length.
    pub fn backward(&self, pass: &ForwardPass, target: usize, grads: &mut [f32]) -> Result<()> {
        let c = self.spec.num_classes;
        if target >= c {
            return Err(MlErr::InvalidLabel {
                got: target,
                classes: c,
            });
        }
        if grads.len() != self.params.len() {
            return Err(MlErr::ShapeMismatch {
                what: "gradient buffer",
                got: grads.len(),
                expected: self.params.len(),
            });
        }

        let mut d = ops::softmax(&pass.logits);
        d[target] -= 1.0;

        // Gate gradient and the delta entering the local head.
        let d_local = match self.spec.operator {
            FuseOperator::None => d,
            op => {
                let logits_global = pass
                    .logits_global
                    .as_ref()
                    .ok_or(MlErr::MissingGlobalReference)?;
                let gate_range = self.layout.gate().range.clone();
                let gate = self.params[gate_range.clone()].to_vec();

                match op {
                    FuseOperator::Multi => {
                        for k in 0..c {
                            grads[gate_range.start + k] +=
                                d[k] * (pass.logits_local[k] - logits_global[k]);
                        }
                        Array1::from_shape_fn(c, |k| d[k] * gate[k])
                    }
                    _ => {
                        let mut g = 0.0;
                        for k in 0..c {
                            g += d[k] * (pass.logits_local[k] - logits_global[k]);
                        }
                        grads[gate_range.start] += g;
                        d.mapv(|v| v * gate[0])
                    }
                }
            }
        };

        // Head gradients.
        let a_last = match pass.hidden.last() {
            Some(a) => a.view(),
            None => pass.input.view(),
        };
        let (hw, hb) = self.layout.head();
        accumulate_outer(grads, hw, &d_local, a_last);
        accumulate_vec(grads, hb, &d_local);

        // Delta with respect to the last hidden activation.
        let mut delta = mat(&self.params, hw).t().dot(&d_local);

        for i in (0..self.spec.hidden_dims.len()).rev() {
            let a = &pass.hidden[i];
            let dz = Array1::from_shape_fn(a.len(), |j| delta[j] * a[j] * (1.0 - a[j]));

            let prev = if i == 0 {
                pass.input.view()
            } else {
                pass.hidden[i - 1].view()
            };

            let (we, be) = self.layout.dense(i);
            accumulate_outer(grads, we, &dz, prev);
            accumulate_vec(grads, be, &dz);

            if i > 0 {
                delta = mat(&self.params, we).t().dot(&dz);
            }
        }

        Ok(())
    }
}

/// `grads[entry] += d ⊗ a` for a row-major `[d.len(), a.len()]` weight.
fn accumulate_outer(grads: &mut [f32], entry: &ParamEntry, d: &Array1<f32>, a: ArrayView1<f32>) {
    let cols = a.len();
    debug_assert_eq!(entry.shape, [d.len(), cols]);

    for (k, &dk) in d.iter().enumerate() {
        let row = entry.range.start + k * cols;
        for (j, &aj) in a.iter().enumerate() {
            grads[row + j] += dk * aj;
        }
    }
}

/// `grads[entry] += d` for a bias-shaped entry.
fn accumulate_vec(grads: &mut [f32], entry: &ParamEntry, d: &Array1<f32>) {
    debug_assert_eq!(entry.range.len(), d.len());
    for (g, &dk) in grads[entry.range.clone()].iter_mut().zip(d.iter()) {
        *g += dk;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ops::cross_entropy, snapshot::export};
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    fn spec(operator: FuseOperator) -> ModelSpec {
        ModelSpec {
            input_dim: 3,
            hidden_dims: vec![4],
            num_classes: 3,
            operator,
        }
    }

    fn fused_model(operator: FuseOperator) -> FuseMlp {
        let mut model = FuseMlp::new(spec(operator), &mut StdRng::seed_from_u64(11));
        // A reference that differs from the live weights, so fusion has
        // something to blend against.
        let other = FuseMlp::new(spec(operator), &mut StdRng::seed_from_u64(99));
        model.set_global_reference(&export(&other)).unwrap();
        model
    }

    #[test]
    fn blended_forward_requires_global_reference() {
        let model = FuseMlp::new(spec(FuseOperator::Multi), &mut StdRng::seed_from_u64(1));
        let err = model.forward(array![0.1, 0.2, 0.3].view()).unwrap_err();
        assert!(matches!(err, MlErr::MissingGlobalReference));
    }

    #[test]
    fn none_operator_ignores_global_reference() {
        let model = FuseMlp::new(spec(FuseOperator::None), &mut StdRng::seed_from_u64(1));
        let pass = model.forward(array![0.1, 0.2, 0.3].view()).unwrap();
        assert_eq!(pass.logits, pass.logits_local);
    }

    #[test]
    fn forward_rejects_wrong_input_dim() {
        let model = fused_model(FuseOperator::Multi);
        assert!(matches!(
            model.forward(array![0.1, 0.2].view()),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn backward_rejects_bad_label() {
        let model = fused_model(FuseOperator::Multi);
        let pass = model.forward(array![0.1, 0.2, 0.3].view()).unwrap();
        let mut grads = vec![0.0; model.num_params()];
        assert!(matches!(
            model.backward(&pass, 7, &mut grads),
            Err(MlErr::InvalidLabel { .. })
        ));
    }

    fn finite_difference_check(operator: FuseOperator) {
        let mut model = fused_model(operator);
        let x = array![0.4, -0.3, 0.9];
        let target = 1;

        let pass = model.forward(x.view()).unwrap();
        let mut grads = vec![0.0; model.num_params()];
        model.backward(&pass, target, &mut grads).unwrap();

        let eps = 1e-2_f32;
        for i in 0..model.num_params() {
            let orig = model.parameters()[i];

            model.parameters_mut()[i] = orig + eps;
            let up = cross_entropy(&model.forward(x.view()).unwrap().logits, target);

            model.parameters_mut()[i] = orig - eps;
            let down = cross_entropy(&model.forward(x.view()).unwrap().logits, target);

            model.parameters_mut()[i] = orig;

            let numeric = (up - down) / (2.0 * eps);
            let analytic = grads[i];
            let tol = 1e-2_f32.max(0.05 * analytic.abs());
            assert!(
                (numeric - analytic).abs() < tol,
                "param {i}: numeric {numeric} vs analytic {analytic}"
            );
        }
    }

    #[test]
    fn gradients_match_finite_differences_multi() {
        finite_difference_check(FuseOperator::Multi);
    }

    #[test]
    fn gradients_match_finite_differences_single() {
        finite_difference_check(FuseOperator::Single);
    }

    #[test]
    fn gradients_match_finite_differences_none() {
        finite_difference_check(FuseOperator::None);
    }

    #[test]
    fn gate_gradient_is_zero_for_none_operator() {
        let model = fused_model(FuseOperator::None);
        let pass = model.forward(array![0.4, -0.3, 0.9].view()).unwrap();
        let mut grads = vec![0.0; model.num_params()];
        model.backward(&pass, 0, &mut grads).unwrap();

        let gate = model.layout().gate().range.clone();
        assert!(grads[gate].iter().all(|&g| g == 0.0));
    }

    #[test]
    fn fusion_parameters_round_trip() {
        let mut model = fused_model(FuseOperator::Multi);
        model.set_fusion_parameters(&[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(model.fusion_parameters(), vec![0.1, 0.2, 0.3]);

        assert!(matches!(
            model.set_fusion_parameters(&[0.1]),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }
}
