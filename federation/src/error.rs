use std::{error::Error, fmt, io};

use ml_core::MlErr;

/// The harness result type.
pub type Result<T> = std::result::Result<T, FedErr>;

/// All errors that can occur while driving a federation run.
#[derive(Debug)]
pub enum FedErr {
    /// A round produced no usable client updates (no snapshots, or every
    /// selected client had an empty partition).
    EmptyAggregation,
    /// Client snapshots disagree on parameter names or sizes.
    SnapshotMismatch { name: String },
    /// Two related buffers have inconsistent lengths.
    LengthMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// Invalid run configuration, caught before the first round.
    InvalidConfig(String),
    /// An error bubbled up from the numeric layer (key mismatch, shape
    /// drift, missing global reference).
    Model(MlErr),
    /// Metrics storage failure.
    Io(io::Error),
    /// CSV serialization failure.
    Csv(csv::Error),
}

impl fmt::Display for FedErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyAggregation => {
                write!(f, "aggregation received no snapshots or zero total weight")
            }
            Self::SnapshotMismatch { name } => {
                write!(f, "client snapshots disagree on parameter {name}")
            }
            Self::LengthMismatch {
                what,
                got,
                expected,
            } => {
                write!(f, "length mismatch for {what}: got {got}, expected {expected}")
            }
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Csv(e) => write!(f, "csv error: {e}"),
        }
    }
}

impl Error for FedErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Model(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Csv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for FedErr {
    fn from(e: MlErr) -> Self {
        Self::Model(e)
    }
}

impl From<io::Error> for FedErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for FedErr {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}
