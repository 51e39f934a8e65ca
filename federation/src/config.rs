use std::path::PathBuf;

use ml_core::FuseOperator;
use serde::{Serialize, Serializer};

use crate::error::{FedErr, Result};

fn serialize_operator<S: Serializer>(op: &FuseOperator, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(op.tag())
}

/// Immutable options for one federation run.
///
/// Built once at the binary edge and threaded by reference through the
/// trainer and clients; there is no ambient configuration lookup.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Local SGD learning rate.
    pub lr: f32,
    /// Local SGD momentum.
    pub momentum: f32,
    /// Local SGD weight decay.
    pub wd: f32,
    /// Fusion strategy shared by the model and every client.
    #[serde(serialize_with = "serialize_operator")]
    pub operator: FuseOperator,
    /// Clients sampled per training round (capped at the pool size; zero
    /// surfaces as `EmptyAggregation` at round time).
    pub clients_per_round: usize,
    pub num_rounds: usize,
    /// Local epochs per selected client per round.
    pub num_epochs: usize,
    pub eval_on_test_every_round: usize,
    pub eval_on_train_every_round: usize,
    pub save_every_round: usize,
    /// EMA decay of the blended private-gate backup.
    pub gate_decay: f32,
    /// Suppress per-round progress reporting.
    pub quiet: bool,
    pub seed: u64,
    pub out_dir: PathBuf,
}

impl RunConfig {
    /// Rejects configurations that would panic or silently misbehave later
    /// (zero periodic intervals, non-finite or out-of-range hyperparameters).
    pub fn validate(&self) -> Result<()> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(FedErr::InvalidConfig(format!("lr must be positive, got {}", self.lr)));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(FedErr::InvalidConfig(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if !(self.wd.is_finite() && self.wd >= 0.0) {
            return Err(FedErr::InvalidConfig(format!(
                "weight decay must be non-negative, got {}",
                self.wd
            )));
        }
        if !(0.0..=1.0).contains(&self.gate_decay) {
            return Err(FedErr::InvalidConfig(format!(
                "gate decay must be in [0, 1], got {}",
                self.gate_decay
            )));
        }
        if self.eval_on_test_every_round == 0
            || self.eval_on_train_every_round == 0
            || self.save_every_round == 0
        {
            return Err(FedErr::InvalidConfig(
                "periodic intervals must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunConfig {
        RunConfig {
            lr: 0.1,
            momentum: 0.0,
            wd: 0.0,
            operator: FuseOperator::Multi,
            clients_per_round: 2,
            num_rounds: 3,
            num_epochs: 1,
            eval_on_test_every_round: 1,
            eval_on_train_every_round: 1,
            save_every_round: 1,
            gate_decay: 0.9,
            quiet: true,
            seed: 7,
            out_dir: PathBuf::from("metrics"),
        }
    }

    #[test]
    fn base_config_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = base();
        cfg.save_every_round = 0;
        assert!(matches!(cfg.validate(), Err(FedErr::InvalidConfig(_))));
    }

    #[test]
    fn bad_lr_is_rejected() {
        let mut cfg = base();
        cfg.lr = 0.0;
        assert!(cfg.validate().is_err());
        cfg.lr = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_clients_per_round_is_allowed() {
        // The failure mode is EmptyAggregation at round time, not a config
        // error.
        let mut cfg = base();
        cfg.clients_per_round = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_serializes_operator_as_tag() {
        let json = serde_json::to_string(&base()).unwrap();
        assert!(json.contains("\"operator\":\"multi\""));
    }
}
