pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod trainer;

pub use client::{Client, ClientId, EvalReport, TrainReport};
pub use config::RunConfig;
pub use error::{FedErr, Result};
pub use metrics::{ClientRow, MetricsSink, RoundStats};
pub use trainer::{FedTrainer, PoolKind};
