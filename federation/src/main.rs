use std::{error::Error, fs, fs::File, path::PathBuf};

use clap::Parser;
use log::info;
use ml_core::{FuseMlp, FuseOperator, ModelSpec, Partition};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use federation::{Client, FedTrainer, RunConfig};

/// Simulated federated training with client-private fusion gates.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[arg(long, default_value_t = 0.05)]
    lr: f32,
    #[arg(long, default_value_t = 0.9)]
    momentum: f32,
    #[arg(long, default_value_t = 0.0)]
    wd: f32,
    /// Fusion strategy: multi, single or none.
    #[arg(long, default_value = "multi")]
    operator: String,
    #[arg(long, default_value_t = 5)]
    clients_per_round: usize,
    #[arg(long, default_value_t = 20)]
    num_rounds: usize,
    #[arg(long, default_value_t = 1)]
    num_epochs: usize,
    #[arg(long, default_value_t = 5)]
    eval_on_test_every_round: usize,
    #[arg(long, default_value_t = 5)]
    eval_on_train_every_round: usize,
    #[arg(long, default_value_t = 10)]
    save_every_round: usize,
    /// EMA decay of the blended private-gate backup.
    #[arg(long, default_value_t = 0.9)]
    gate_decay: f32,
    /// Suppress per-round progress reporting.
    #[arg(long)]
    quiet: bool,
    #[arg(long, default_value_t = 17)]
    seed: u64,
    #[arg(long, default_value = "metrics")]
    out_dir: PathBuf,

    // Federation shape.
    #[arg(long, default_value_t = 20)]
    train_clients: usize,
    #[arg(long, default_value_t = 5)]
    test_clients: usize,
    #[arg(long, default_value_t = 60)]
    samples_per_client: usize,

    // Model shape.
    #[arg(long, default_value_t = 16)]
    input_dim: usize,
    #[arg(long, value_delimiter = ',', default_value = "32,16")]
    hidden_dims: Vec<usize>,
    #[arg(long, default_value_t = 4)]
    num_classes: usize,
}

fn synthesize_pool(
    count: usize,
    samples: usize,
    input_dim: usize,
    num_classes: usize,
    seed: u64,
    model: &FuseMlp,
) -> Vec<Client> {
    // Partitions are read-only and per-client, so building them in parallel
    // is correctness-neutral; each gets its own seeded generator.
    (0..count)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            Partition::synthetic(samples, input_dim, num_classes, &mut rng)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .enumerate()
        .map(|(i, partition)| Client::new(i, partition, model))
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let operator: FuseOperator = cli.operator.parse()?;
    let cfg = RunConfig {
        lr: cli.lr,
        momentum: cli.momentum,
        wd: cli.wd,
        operator,
        clients_per_round: cli.clients_per_round,
        num_rounds: cli.num_rounds,
        num_epochs: cli.num_epochs,
        eval_on_test_every_round: cli.eval_on_test_every_round,
        eval_on_train_every_round: cli.eval_on_train_every_round,
        save_every_round: cli.save_every_round,
        gate_decay: cli.gate_decay,
        quiet: cli.quiet,
        seed: cli.seed,
        out_dir: cli.out_dir,
    };
    cfg.validate()?;

    fs::create_dir_all(&cfg.out_dir)?;
    serde_json::to_writer_pretty(File::create(cfg.out_dir.join("config.json"))?, &cfg)?;

    info!("using fusion operator {operator}");

    let spec = ModelSpec {
        input_dim: cli.input_dim,
        hidden_dims: cli.hidden_dims.clone(),
        num_classes: cli.num_classes,
        operator,
    };
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let model = FuseMlp::new(spec, &mut rng);

    let train_clients = synthesize_pool(
        cli.train_clients,
        cli.samples_per_client,
        cli.input_dim,
        cli.num_classes,
        cfg.seed.wrapping_mul(31).wrapping_add(1),
        &model,
    );
    let test_clients = synthesize_pool(
        cli.test_clients,
        cli.samples_per_client,
        cli.input_dim,
        cli.num_classes,
        cfg.seed.wrapping_mul(131).wrapping_add(7),
        &model,
    );

    let mut trainer = FedTrainer::new(cfg, model, train_clients, test_clients)?;
    trainer.run()?;

    Ok(())
}
