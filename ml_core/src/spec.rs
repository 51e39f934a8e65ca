use std::{fmt, str::FromStr};

use crate::error::MlErr;

/// The fusion strategy applied when combining a client's local logits with
/// the logits of the round's frozen global model.
///
/// The operator also decides how a client backs up its private gate after
/// local training: blended operators apply an exponential moving average,
/// `None` overwrites plainly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseOperator {
    /// One gate value per output class.
    Multi,
    /// A single scalar gate shared by every class.
    Single,
    /// No fusion in the forward pass; the gate tensor exists but is unused.
    None,
}

impl FuseOperator {
    /// Whether the private-state backup blends with the previous state.
    #[inline]
    pub fn is_blended(self) -> bool {
        matches!(self, FuseOperator::Multi | FuseOperator::Single)
    }

    /// Number of gate parameters for a model with `num_classes` outputs.
    #[inline]
    pub fn gate_len(self, num_classes: usize) -> usize {
        match self {
            FuseOperator::Single => 1,
            FuseOperator::Multi | FuseOperator::None => num_classes,
        }
    }

    /// Stable identifier used in config files and metrics file names.
    pub fn tag(self) -> &'static str {
        match self {
            FuseOperator::Multi => "multi",
            FuseOperator::Single => "single",
            FuseOperator::None => "none",
        }
    }
}

impl fmt::Display for FuseOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for FuseOperator {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi" => Ok(FuseOperator::Multi),
            "single" => Ok(FuseOperator::Single),
            "none" => Ok(FuseOperator::None),
            other => Err(MlErr::UnknownOperator {
                tag: other.to_string(),
            }),
        }
    }
}

/// High-level model specification: a sigmoid MLP with a linear head and a
/// client-private fusion gate over the output logits.
///
/// The spec is fixed for the whole federation run; parameter names and
/// shapes derived from it are stable across rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub input_dim: usize,
    pub hidden_dims: Vec<usize>,
    pub num_classes: usize,
    pub operator: FuseOperator,
}

impl ModelSpec {
    /// (fan_in, fan_out) for every dense layer, the head included.
    pub(crate) fn dense_dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.hidden_dims.len() + 1);
        let mut fan_in = self.input_dim;

        for &h in &self.hidden_dims {
            dims.push((fan_in, h));
            fan_in = h;
        }

        dims.push((fan_in, self.num_classes));
        dims
    }

    /// Total number of parameters in the flat buffer for this model.
    pub fn num_params(&self) -> usize {
        let dense: usize = self
            .dense_dims()
            .iter()
            .map(|&(fan_in, fan_out)| fan_in * fan_out + fan_out)
            .sum();

        dense + self.operator.gate_len(self.num_classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_counts_params() {
        let spec = ModelSpec {
            input_dim: 3,
            hidden_dims: vec![4],
            num_classes: 2,
            operator: FuseOperator::Multi,
        };

        // dense0: 3*4 + 4, head: 4*2 + 2, gate: 2
        assert_eq!(spec.num_params(), 16 + 10 + 2);
    }

    #[test]
    fn single_operator_has_scalar_gate() {
        assert_eq!(FuseOperator::Single.gate_len(10), 1);
        assert_eq!(FuseOperator::Multi.gate_len(10), 10);
        assert_eq!(FuseOperator::None.gate_len(10), 10);
    }

    #[test]
    fn operator_round_trips_through_tag() {
        for op in [FuseOperator::Multi, FuseOperator::Single, FuseOperator::None] {
            assert_eq!(op.tag().parse::<FuseOperator>().unwrap(), op);
        }
        assert!("median".parse::<FuseOperator>().is_err());
    }
}
