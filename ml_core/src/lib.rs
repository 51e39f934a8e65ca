mod dataset;
mod error;
mod layout;
mod model;
mod ops;
mod optimizer;
mod snapshot;
mod spec;
mod stats;

pub use dataset::{Partition, Transform};
pub use error::{MlErr, Result};
pub use layout::{ParamEntry, ParameterLayout};
pub use model::{ForwardPass, FuseMlp};
pub use ops::{argmax, cross_entropy, softmax};
pub use optimizer::{Optimizer, Sgd};
pub use snapshot::{ParameterSnapshot, export, import};
pub use spec::{FuseOperator, ModelSpec};
pub use stats::Meter;
