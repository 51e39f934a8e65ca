use std::{fs, path::PathBuf};

use ndarray::Array1;
use rand::{SeedableRng, rngs::StdRng};

use federation::{Client, FedErr, FedTrainer, PoolKind, RunConfig};
use ml_core::{FuseMlp, FuseOperator, ModelSpec, ParameterSnapshot, Partition, import};

fn temp_out(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("federation-e2e-{test}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn cfg(operator: FuseOperator, out: PathBuf) -> RunConfig {
    RunConfig {
        lr: 0.2,
        momentum: 0.0,
        wd: 0.0,
        operator,
        clients_per_round: 2,
        num_rounds: 3,
        num_epochs: 1,
        eval_on_test_every_round: 1,
        eval_on_train_every_round: 1,
        save_every_round: 2,
        gate_decay: 0.9,
        quiet: true,
        seed: 23,
        out_dir: out,
    }
}

fn model(operator: FuseOperator, seed: u64) -> FuseMlp {
    FuseMlp::new(
        ModelSpec {
            input_dim: 4,
            hidden_dims: vec![6],
            num_classes: 3,
            operator,
        },
        &mut StdRng::seed_from_u64(seed),
    )
}

fn pool(model: &FuseMlp, count: usize, samples: usize, seed: u64) -> Vec<Client> {
    (0..count)
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed + i as u64);
            Client::new(i, Partition::synthetic(samples, 4, 3, &mut rng), model)
        })
        .collect()
}

#[test]
fn full_run_flushes_metrics_and_keeps_stable_keys() {
    let out = temp_out("full-run");
    let model = model(FuseOperator::Multi, 1);
    let train = pool(&model, 4, 12, 500);
    let test = pool(&model, 2, 8, 900);

    let initial_names: Vec<String> = ml_core::export(&model)
        .names()
        .map(str::to_string)
        .collect();

    let mut trainer = FedTrainer::new(cfg(FuseOperator::Multi, out.clone()), model, train, test).unwrap();
    trainer.run().unwrap();

    // Global keys never drift across rounds.
    let final_names: Vec<String> = trainer.global().names().map(str::to_string).collect();
    assert_eq!(initial_names, final_names);

    // One training row per round, plus a header.
    let train_csv = fs::read_to_string(out.join("policy-multi_train.csv")).unwrap();
    assert_eq!(train_csv.lines().count(), 4);

    // Evaluation ran every round on both pools.
    let eval_csv = fs::read_to_string(out.join("policy-multi_eval_test.csv")).unwrap();
    assert_eq!(eval_csv.lines().count(), 4);
    let clients_csv = fs::read_to_string(out.join("policy-multi_eval_test_clients.csv")).unwrap();
    // 2 test clients * 3 rounds + header
    assert_eq!(clients_csv.lines().count(), 7);
}

#[test]
fn single_operator_run_completes() {
    let out = temp_out("single-op");
    let model = model(FuseOperator::Single, 2);
    let train = pool(&model, 3, 10, 700);

    let mut trainer =
        FedTrainer::new(cfg(FuseOperator::Single, out), model, train, Vec::new()).unwrap();
    trainer.run().unwrap();
}

#[test]
fn empty_selection_fails_without_touching_global_state() {
    let out = temp_out("empty-selection");
    let model = model(FuseOperator::Multi, 3);
    let train = pool(&model, 4, 10, 300);

    let mut trainer = FedTrainer::new(cfg(FuseOperator::Multi, out), model, train, Vec::new()).unwrap();
    let before = trainer.global().clone();

    let err = trainer.run_round(0, &[]).unwrap_err();
    assert!(matches!(err, FedErr::EmptyAggregation));
    assert_eq!(trainer.global(), &before);
}

#[test]
fn zero_clients_per_round_surfaces_as_empty_aggregation() {
    let out = temp_out("zero-k");
    let model = model(FuseOperator::Multi, 4);
    let train = pool(&model, 4, 10, 310);

    let mut config = cfg(FuseOperator::Multi, out);
    config.clients_per_round = 0;

    let mut trainer = FedTrainer::new(config, model, train, Vec::new()).unwrap();
    assert!(matches!(trainer.run(), Err(FedErr::EmptyAggregation)));
}

#[test]
fn zero_sample_client_is_excluded_from_eval_means() {
    // An identity head over one-hot inputs classifies its partition
    // perfectly, so the pool's weighted accuracy must be exactly 1.0 even
    // though the other client has no samples at all.
    let mut model = FuseMlp::new(
        ModelSpec {
            input_dim: 3,
            hidden_dims: vec![],
            num_classes: 3,
            operator: FuseOperator::None,
        },
        &mut StdRng::seed_from_u64(5),
    );

    let snap = ParameterSnapshot::from_entries(vec![
        (
            "head.weight".to_string(),
            vec![5.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 5.0],
        ),
        ("head.bias".to_string(), vec![0.0, 0.0, 0.0]),
        ("fuse.gate".to_string(), vec![0.5, 0.5, 0.5]),
    ]);
    import(&mut model, &snap).unwrap();

    let empty = Client::new(0, Partition::new(vec![], vec![]), &model);

    let onehot = |k: usize| -> Array1<f32> {
        let mut x = Array1::zeros(3);
        x[k] = 1.0;
        x
    };
    let xs = vec![onehot(0), onehot(1), onehot(2), onehot(0), onehot(1)];
    let perfect = Client::new(1, Partition::new(xs, vec![0, 1, 2, 0, 1]), &model);

    let out = temp_out("zero-sample-eval");
    let mut trainer = FedTrainer::new(
        cfg(FuseOperator::None, out),
        model,
        Vec::new(),
        vec![empty, perfect],
    )
    .unwrap();

    let stats = trainer.evaluate_pool(0, PoolKind::Test).unwrap();
    assert!((stats.mean_acc - 1.0).abs() < 1e-9);
}

#[test]
fn all_empty_eval_pool_records_nan_instead_of_crashing() {
    let out = temp_out("nan-eval");
    let model = model(FuseOperator::Multi, 6);
    let empties = vec![
        Client::new(0, Partition::new(vec![], vec![]), &model),
        Client::new(1, Partition::new(vec![], vec![]), &model),
    ];

    let mut trainer =
        FedTrainer::new(cfg(FuseOperator::Multi, out), model, Vec::new(), empties).unwrap();

    let stats = trainer.evaluate_pool(0, PoolKind::Test).unwrap();
    assert!(stats.mean_loss.is_nan());
    assert!(stats.mean_acc.is_nan());
}

#[test]
fn private_gate_state_survives_rounds_and_stays_out_of_the_global() {
    let out = temp_out("private-state");
    let model = model(FuseOperator::Multi, 7);
    let train = pool(&model, 2, 10, 450);
    let initial_gate = train[0].private_state().to_vec();

    let mut config = cfg(FuseOperator::Multi, out);
    config.clients_per_round = 2;
    config.num_rounds = 2;

    let mut trainer = FedTrainer::new(config, model, train, Vec::new()).unwrap();
    trainer.run().unwrap();

    // Each client's private gate evolved through its own backups...
    let client_gate = trainer.train_clients()[0].private_state();
    assert_ne!(client_gate, initial_gate.as_slice());

    // ...and stays distinct from the aggregated gate in the global state.
    let global_gate = trainer.global().get("fuse.gate").unwrap();
    assert_ne!(client_gate, global_gate);
}
