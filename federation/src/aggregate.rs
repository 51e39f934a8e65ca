use ml_core::ParameterSnapshot;

use crate::error::{FedErr, Result};

/// Sample-count-weighted average of client parameter snapshots.
///
/// For each parameter `p`, `result[p] = Σ(w_i * snap_i[p]) / Σ(w_i)`.
/// Entry order follows the first snapshot.
///
/// # Errors
/// - `FedErr::EmptyAggregation` when there are no snapshots or the weights
///   sum to zero.
/// - `FedErr::LengthMismatch` when `snapshots` and `weights` differ in
///   length.
/// - `FedErr::SnapshotMismatch` when snapshots disagree on parameter names
///   or sizes.
pub fn weighted_average(
    snapshots: &[ParameterSnapshot],
    weights: &[usize],
) -> Result<ParameterSnapshot> {
    if snapshots.len() != weights.len() {
        return Err(FedErr::LengthMismatch {
            what: "aggregation weights",
            got: weights.len(),
            expected: snapshots.len(),
        });
    }

    let total: u64 = weights.iter().map(|&w| w as u64).sum();
    if snapshots.is_empty() || total == 0 {
        return Err(FedErr::EmptyAggregation);
    }

    let first = &snapshots[0];
    let mut acc: Vec<(String, Vec<f64>)> = first
        .iter()
        .map(|(name, values)| (name.to_string(), vec![0.0; values.len()]))
        .collect();

    for (snap, &w) in snapshots.iter().zip(weights) {
        let w = w as f64;
        for (name, sum) in &mut acc {
            let values = snap.get(name).ok_or_else(|| FedErr::SnapshotMismatch {
                name: name.clone(),
            })?;
            if values.len() != sum.len() {
                return Err(FedErr::SnapshotMismatch { name: name.clone() });
            }
            for (s, &v) in sum.iter_mut().zip(values) {
                *s += w * v as f64;
            }
        }
    }

    let total = total as f64;
    let entries = acc
        .into_iter()
        .map(|(name, sum)| {
            let averaged = sum.into_iter().map(|s| (s / total) as f32).collect();
            (name, averaged)
        })
        .collect();

    Ok(ParameterSnapshot::from_entries(entries))
}
