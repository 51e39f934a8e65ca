use std::time::Instant;

use log::{debug, info, warn};
use ml_core::{FuseMlp, ParameterSnapshot, export, import};
use rand::{SeedableRng, rngs::StdRng, seq::index};

use crate::{
    aggregate::weighted_average,
    client::Client,
    config::RunConfig,
    error::Result,
    metrics::{ClientRow, MetricsSink, RoundStats},
};

/// Which client pool an evaluation pass runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Train,
    Test,
}

impl PoolKind {
    pub fn label(self) -> &'static str {
        match self {
            PoolKind::Train => "train",
            PoolKind::Test => "test",
        }
    }
}

/// Drives the round-based federated loop.
///
/// The trainer owns the single live model and the global snapshot; clients
/// borrow the model one at a time, which is the whole concurrency story:
/// exactly one writer, enforced by sequential iteration.
///
/// Each round selects a client subset, trains each selected client locally
/// in sequence, aggregates the returned snapshots into the next global
/// state, and periodically evaluates the pools and flushes metrics.
pub struct FedTrainer {
    cfg: RunConfig,
    model: FuseMlp,
    global: ParameterSnapshot,
    train_clients: Vec<Client>,
    test_clients: Vec<Client>,
    metrics: MetricsSink,
    rng: StdRng,
}

impl FedTrainer {
    /// Creates a trainer whose initial global state is the model's current
    /// parameters.
    ///
    /// # Errors
    /// Returns `FedErr::InvalidConfig` for an unusable configuration.
    pub fn new(
        cfg: RunConfig,
        model: FuseMlp,
        train_clients: Vec<Client>,
        test_clients: Vec<Client>,
    ) -> Result<Self> {
        cfg.validate()?;

        let global = export(&model);
        let metrics = MetricsSink::new(
            cfg.out_dir.clone(),
            format!("policy-{}", cfg.operator.tag()),
        );
        let rng = StdRng::seed_from_u64(cfg.seed);

        info!(
            "federation ready: operator {}, {} train / {} test clients",
            cfg.operator,
            train_clients.len(),
            test_clients.len()
        );

        Ok(Self {
            cfg,
            model,
            global,
            train_clients,
            test_clients,
            metrics,
            rng,
        })
    }

    /// The current global model state.
    #[inline]
    pub fn global(&self) -> &ParameterSnapshot {
        &self.global
    }

    #[inline]
    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    #[inline]
    pub fn train_clients(&self) -> &[Client] {
        &self.train_clients
    }

    #[inline]
    pub fn test_clients(&self) -> &[Client] {
        &self.test_clients
    }

    /// Samples `k` distinct client indices from the training pool without
    /// replacement; `k` is capped at the pool size. Consumes only the RNG
    /// cursor.
    pub fn select_clients(&mut self, round: usize, k: usize) -> Vec<usize> {
        let pool = self.train_clients.len();
        let k = k.min(pool);

        let selected = index::sample(&mut self.rng, pool, k).into_vec();
        debug!(round = round; "selected clients {selected:?}");
        selected
    }

    /// Runs one training round over `selected` and replaces the global
    /// state with the aggregated result.
    ///
    /// Per client, in a fixed sequence: push the global parameters into the
    /// live model, restore the client's private gate, train locally, collect
    /// the returned snapshot and statistics, back the gate up. The frozen
    /// global reference is set exactly once, before the loop, from the
    /// round's starting global snapshot.
    ///
    /// # Errors
    /// `FedErr::EmptyAggregation` if no selected client contributed samples;
    /// the global state is left unmodified in that case.
    pub fn run_round(&mut self, round: usize, selected: &[usize]) -> Result<RoundStats> {
        self.model.set_global_reference(&self.global)?;

        let mut snapshots = Vec::with_capacity(selected.len());
        let mut weights = Vec::with_capacity(selected.len());
        let mut loss_sum = 0.0;
        let mut correct_sum = 0;
        let mut total_samples = 0;

        for &idx in selected {
            import(&mut self.model, &self.global)?;

            let client = &mut self.train_clients[idx];
            client.restore_private_state(&mut self.model)?;

            let report =
                client.train_local(&mut self.model, round, self.cfg.num_epochs, &self.cfg)?;
            client.backup_private_state(&self.model, self.cfg.gate_decay);

            loss_sum += report.loss_sum;
            correct_sum += report.correct_sum;
            total_samples += report.num_samples;

            weights.push(report.num_samples);
            snapshots.push(report.snapshot);
        }

        // Errors here (no snapshots, zero total weight) leave self.global
        // untouched.
        self.global = weighted_average(&snapshots, &weights)?;

        let stats = RoundStats {
            mean_loss: loss_sum / total_samples as f64,
            mean_acc: correct_sum as f64 / total_samples as f64,
        };

        if !self.cfg.quiet {
            info!(
                "round {round}: train mean loss {:.5}, mean acc {:.3}",
                stats.mean_loss, stats.mean_acc
            );
        }
        self.metrics.record_round(round, &stats);

        Ok(stats)
    }

    /// Evaluates every member of a pool with the same push/restore protocol
    /// as training, in inference mode, and records the sample-weighted
    /// aggregate plus a per-client table under the pool's label.
    pub fn evaluate_pool(&mut self, round: usize, pool: PoolKind) -> Result<RoundStats> {
        self.model.set_global_reference(&self.global)?;

        let clients = match pool {
            PoolKind::Train => &self.train_clients,
            PoolKind::Test => &self.test_clients,
        };

        let mut table = Vec::with_capacity(clients.len());
        let mut loss_sum = 0.0;
        let mut correct_sum = 0;
        let mut total_samples = 0;

        for client in clients {
            import(&mut self.model, &self.global)?;
            client.restore_private_state(&mut self.model)?;

            let report = client.evaluate(&self.model)?;

            let n = report.num_samples;
            table.push(ClientRow {
                round,
                client_id: client.id(),
                mean_loss: if n > 0 {
                    report.loss_sum / n as f64
                } else {
                    f64::NAN
                },
                mean_acc: if n > 0 {
                    report.correct_sum as f64 / n as f64
                } else {
                    f64::NAN
                },
                num_samples: n,
            });

            loss_sum += report.loss_sum;
            correct_sum += report.correct_sum;
            total_samples += n;
        }

        // Zero-sample clients drop out of the weighted sums above; an
        // entirely empty pool must not divide by zero.
        let stats = if total_samples == 0 {
            warn!(
                "round {round}: eval pool \"{}\" has zero samples, recording NaN",
                pool.label()
            );
            RoundStats {
                mean_loss: f64::NAN,
                mean_acc: f64::NAN,
            }
        } else {
            RoundStats {
                mean_loss: loss_sum / total_samples as f64,
                mean_acc: correct_sum as f64 / total_samples as f64,
            }
        };

        if !self.cfg.quiet {
            info!(
                "round {round}: eval on \"{}\" mean loss {:.5}, mean acc {:.3}",
                pool.label(),
                stats.mean_loss,
                stats.mean_acc
            );
        }
        self.metrics.record_eval(round, pool.label(), &stats, table);

        Ok(stats)
    }

    /// Drives rounds `0..num_rounds`, with periodic evaluation and metric
    /// persistence, and a final unconditional flush.
    pub fn run(&mut self) -> Result<()> {
        for round in 0..self.cfg.num_rounds {
            info!("global training round {round}");
            let started = Instant::now();

            let selected = self.select_clients(round, self.cfg.clients_per_round);
            self.run_round(round, &selected)?;

            if round % self.cfg.eval_on_test_every_round == 0 {
                self.evaluate_pool(round, PoolKind::Test)?;
            }
            if round % self.cfg.eval_on_train_every_round == 0 {
                self.evaluate_pool(round, PoolKind::Train)?;
            }
            if round % self.cfg.save_every_round == 0 {
                self.metrics.flush()?;
            }

            debug!(
                "round {round} took {:.3}s",
                started.elapsed().as_secs_f64()
            );
        }

        self.metrics.flush()
    }
}
