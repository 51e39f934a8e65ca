use crate::{
    error::{MlErr, Result},
    layout::ParameterLayout,
    model::FuseMlp,
};

/// A detached, name-keyed copy of a model's trainable state.
///
/// Entry order is the model's parameter declaration order. Snapshots are
/// transient: clients hand them to the trainer, the aggregation step folds
/// them into the next global state, and they are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSnapshot {
    entries: Vec<(String, Vec<f32>)>,
}

impl ParameterSnapshot {
    pub fn from_entries(entries: Vec<(String, Vec<f32>)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Iterates entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Returns a detached copy of every trainable tensor, keyed by name.
pub fn export(model: &FuseMlp) -> ParameterSnapshot {
    let params = model.parameters();
    let entries = model
        .layout()
        .entries()
        .iter()
        .map(|e| (e.name.clone(), params[e.range.clone()].to_vec()))
        .collect();

    ParameterSnapshot::from_entries(entries)
}

/// Overwrites each named tensor of the model in place with the snapshot's
/// value.
///
/// # Errors
/// - `MlErr::KeyMismatch` if a model parameter name is absent from the
///   snapshot (architecture drift; fatal, never retried).
/// - `MlErr::ShapeMismatch` if a value has the wrong number of elements.
pub fn import(model: &mut FuseMlp, snapshot: &ParameterSnapshot) -> Result<()> {
    model.apply_snapshot(snapshot)
}

/// Applies `snapshot` onto a flat buffer described by `layout`.
/// Validates every entry before the first write, so a failed import leaves
/// the buffer untouched.
pub(crate) fn write_into(
    layout: &ParameterLayout,
    snapshot: &ParameterSnapshot,
    buf: &mut [f32],
) -> Result<()> {
    let mut staged = Vec::with_capacity(layout.entries().len());

    for e in layout.entries() {
        let value = snapshot.get(&e.name).ok_or_else(|| MlErr::KeyMismatch {
            name: e.name.clone(),
        })?;

        if value.len() != e.range.len() {
            return Err(MlErr::ShapeMismatch {
                what: "snapshot value",
                got: value.len(),
                expected: e.range.len(),
            });
        }

        staged.push((e.range.clone(), value));
    }

    for (range, value) in staged {
        buf[range].copy_from_slice(value);
    }

    Ok(())
}
