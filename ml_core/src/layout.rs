use std::ops::Range;

use crate::spec::ModelSpec;

/// Name of the client-private fusion gate tensor.
pub const GATE_NAME: &str = "fuse.gate";

/// One named tensor inside the flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
}

/// Maps a flat parameter buffer into named, shaped slices.
/// This is the core "offsets + shapes" mechanism; entry order is the
/// model's declaration order and is stable for a given `ModelSpec`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total_params)`.
/// - The fusion gate is the last entry and the only one for which
///   `is_fusion` holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    entries: Vec<ParamEntry>,
    total: usize,
}

impl ParameterLayout {
    pub fn new(spec: &ModelSpec) -> Self {
        let dims = spec.dense_dims();
        let num_hidden = spec.hidden_dims.len();

        let mut entries = Vec::with_capacity(2 * dims.len() + 1);
        let mut offset = 0;

        let mut push = |entries: &mut Vec<ParamEntry>, name: String, shape: Vec<usize>| {
            let len: usize = shape.iter().product();
            entries.push(ParamEntry {
                name,
                shape,
                range: offset..offset + len,
            });
            offset += len;
        };

        for (i, &(fan_in, fan_out)) in dims.iter().enumerate() {
            let prefix = if i < num_hidden {
                format!("dense{i}")
            } else {
                "head".to_string()
            };

            push(&mut entries, format!("{prefix}.weight"), vec![fan_out, fan_in]);
            push(&mut entries, format!("{prefix}.bias"), vec![fan_out]);
        }

        push(
            &mut entries,
            GATE_NAME.to_string(),
            vec![spec.operator.gate_len(spec.num_classes)],
        );

        let layout = Self {
            entries,
            total: offset,
        };
        layout.validate();
        layout
    }

    /// Sanity check: entries must be contiguous and cover the whole buffer.
    fn validate(&self) {
        let mut expected_start = 0;
        for e in &self.entries {
            assert_eq!(e.range.start, expected_start, "layout ranges must be contiguous");
            assert_eq!(
                e.range.len(),
                e.shape.iter().product::<usize>(),
                "entry shape must match its range"
            );
            expected_start = e.range.end;
        }
        assert_eq!(expected_start, self.total, "layout must cover the buffer");
    }

    #[inline]
    pub fn entries(&self) -> &[ParamEntry] {
        &self.entries
    }

    #[inline]
    pub fn total_params(&self) -> usize {
        self.total
    }

    pub fn entry(&self, name: &str) -> Option<&ParamEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// The weight and bias entries of hidden layer `i`.
    #[inline]
    pub(crate) fn dense(&self, i: usize) -> (&ParamEntry, &ParamEntry) {
        (&self.entries[2 * i], &self.entries[2 * i + 1])
    }

    /// The weight and bias entries of the output head.
    #[inline]
    pub(crate) fn head(&self) -> (&ParamEntry, &ParamEntry) {
        let n = self.entries.len();
        (&self.entries[n - 3], &self.entries[n - 2])
    }

    /// The fusion gate entry.
    #[inline]
    pub fn gate(&self) -> &ParamEntry {
        self.entries.last().expect("layout always has a gate entry")
    }

    /// Whether a parameter name belongs to the client-private fusion state.
    #[inline]
    pub fn is_fusion(name: &str) -> bool {
        name.starts_with("fuse.")
    }
}
