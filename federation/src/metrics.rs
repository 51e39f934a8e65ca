use std::{collections::BTreeMap, fs, path::PathBuf};

use log::debug;
use serde::Serialize;

use crate::{client::ClientId, error::Result};

/// Sample-weighted aggregate statistics of one round or evaluation pass.
///
/// Both fields are NaN when the underlying pool had zero samples.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoundStats {
    pub mean_loss: f64,
    pub mean_acc: f64,
}

/// One per-client row of an evaluation table.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRow {
    pub round: usize,
    pub client_id: ClientId,
    pub mean_loss: f64,
    pub mean_acc: f64,
    pub num_samples: usize,
}

#[derive(Debug, Serialize)]
struct TrainRow {
    round: usize,
    mean_loss: f64,
    mean_acc: f64,
}

#[derive(Debug, Serialize)]
struct EvalRow {
    round: usize,
    mean_loss: f64,
    mean_acc: f64,
}

#[derive(Debug, Default)]
struct EvalSeries {
    aggregates: Vec<EvalRow>,
    clients: Vec<ClientRow>,
}

/// Accumulates per-round scalars and per-client tables, and flushes them to
/// CSV files on a schedule.
///
/// Flushing rewrites every file from the full in-memory history, so it is
/// idempotent and never clears what has been recorded.
pub struct MetricsSink {
    out_dir: PathBuf,
    tag: String,
    train_rounds: Vec<TrainRow>,
    evals: BTreeMap<String, EvalSeries>,
}

impl MetricsSink {
    /// Creates a sink writing under `out_dir`; `tag` prefixes every file
    /// name (it carries the fusion-policy identifier).
    pub fn new(out_dir: PathBuf, tag: String) -> Self {
        Self {
            out_dir,
            tag,
            train_rounds: Vec::new(),
            evals: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn out_dir(&self) -> &PathBuf {
        &self.out_dir
    }

    /// Appends one round's training statistics.
    pub fn record_round(&mut self, round: usize, stats: &RoundStats) {
        self.train_rounds.push(TrainRow {
            round,
            mean_loss: stats.mean_loss,
            mean_acc: stats.mean_acc,
        });
    }

    /// Appends one evaluation pass: aggregate scalars plus the per-client
    /// table, under `label` (e.g. "train" / "test").
    pub fn record_eval(
        &mut self,
        round: usize,
        label: &str,
        stats: &RoundStats,
        table: Vec<ClientRow>,
    ) {
        let series = self.evals.entry(label.to_string()).or_default();
        series.aggregates.push(EvalRow {
            round,
            mean_loss: stats.mean_loss,
            mean_acc: stats.mean_acc,
        });
        series.clients.extend(table);
    }

    /// Serializes the accumulated history to CSV files.
    pub fn flush(&self) -> Result<()> {
        fs::create_dir_all(&self.out_dir)?;

        self.write_rows(&format!("{}_train.csv", self.tag), &self.train_rounds)?;

        for (label, series) in &self.evals {
            self.write_rows(&format!("{}_eval_{label}.csv", self.tag), &series.aggregates)?;
            self.write_rows(
                &format!("{}_eval_{label}_clients.csv", self.tag),
                &series.clients,
            )?;
        }

        debug!("flushed metrics to {}", self.out_dir.display());
        Ok(())
    }

    fn write_rows<R: Serialize>(&self, file_name: &str, rows: &[R]) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.out_dir.join(file_name))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
