use log::debug;
use ml_core::{FuseMlp, FuseOperator, Meter, Optimizer, Partition, ParameterSnapshot, Sgd, argmax, cross_entropy, export};

use crate::{config::RunConfig, error::Result};

pub type ClientId = usize;

/// What a client reports back after local training.
///
/// `num_samples` counts every sample processed across the local epochs and
/// is the client's aggregation weight; an empty partition reports zero and
/// contributes nothing.
pub struct TrainReport {
    pub num_samples: usize,
    pub loss_sum: f64,
    pub correct_sum: usize,
    pub snapshot: ParameterSnapshot,
}

/// What a client reports back after one inference pass.
pub struct EvalReport {
    pub num_samples: usize,
    pub loss_sum: f64,
    pub correct_sum: usize,
}

/// One simulated participant.
///
/// The client owns its data partition and its private copy of the fusion
/// gate; it borrows the single live model only for the duration of a call.
/// Calls against the shared model are serialized by the orchestrator, which
/// is what makes the in-place mutation protocol sound.
pub struct Client {
    id: ClientId,
    partition: Partition,
    operator: FuseOperator,
    gate_state: Vec<f32>,
}

impl Client {
    /// Creates a client whose private gate state starts as a clone of the
    /// model's initial fusion parameters.
    pub fn new(id: ClientId, partition: Partition, model: &FuseMlp) -> Self {
        Self {
            id,
            partition,
            operator: model.spec().operator,
            gate_state: model.fusion_parameters(),
        }
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.partition.len()
    }

    /// The client's private gate values.
    #[inline]
    pub fn private_state(&self) -> &[f32] {
        &self.gate_state
    }

    /// Copies the private gate into the live model in place. Must run
    /// before any computation that depends on client-specific fusion.
    pub fn restore_private_state(&self, model: &mut FuseMlp) -> Result<()> {
        model.set_fusion_parameters(&self.gate_state)?;
        Ok(())
    }

    /// Runs `num_epochs` sample-by-sample SGD passes over the partition
    /// with a fresh optimizer, mutating the live model in place.
    pub fn train_local(
        &mut self,
        model: &mut FuseMlp,
        round: usize,
        num_epochs: usize,
        cfg: &RunConfig,
    ) -> Result<TrainReport> {
        let mut opt = Sgd::new(cfg.lr, cfg.momentum, cfg.wd, model.num_params());
        let mut grads = vec![0.0_f32; model.num_params()];

        let mut loss = Meter::default();
        let mut correct = 0;

        for epoch in 0..num_epochs {
            for idx in 0..self.partition.len() {
                let (x, y) = self.partition.sample(idx);

                let pass = model.forward(x.view())?;
                grads.fill(0.0);
                model.backward(&pass, y, &mut grads)?;

                loss.update(cross_entropy(&pass.logits, y) as f64);
                if argmax(&pass.logits) == y {
                    correct += 1;
                }

                opt.update_params(model.parameters_mut(), &grads);
            }

            debug!(client = self.id, round = round, epoch = epoch; "finished local epoch");
        }

        Ok(TrainReport {
            num_samples: loss.count(),
            loss_sum: loss.sum(),
            correct_sum: correct,
            snapshot: export(model),
        })
    }

    /// After training, stores the model's current gate as the new private
    /// state. Blended operators keep an exponential moving average,
    /// `new = (1 - decay) * just_trained + decay * previous`; the others
    /// overwrite plainly.
    pub fn backup_private_state(&mut self, model: &FuseMlp, decay: f32) {
        let trained = model.fusion_parameters();

        if self.operator.is_blended() {
            for (prev, now) in self.gate_state.iter_mut().zip(&trained) {
                *prev = (1.0 - decay) * *now + decay * *prev;
            }
        } else {
            self.gate_state = trained;
        }
    }

    /// One inference pass over the partition; no parameter updates.
    pub fn evaluate(&self, model: &FuseMlp) -> Result<EvalReport> {
        let mut loss = Meter::default();
        let mut correct = 0;

        for idx in 0..self.partition.len() {
            let (x, y) = self.partition.sample(idx);
            let pass = model.forward(x.view())?;

            loss.update(cross_entropy(&pass.logits, y) as f64);
            if argmax(&pass.logits) == y {
                correct += 1;
            }
        }

        Ok(EvalReport {
            num_samples: loss.count(),
            loss_sum: loss.sum(),
            correct_sum: correct,
        })
    }
}
