use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire numeric module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The numeric module's error type.
#[derive(Debug)]
pub enum MlErr {
    /// A model parameter name is absent from a snapshot (architecture drift).
    KeyMismatch {
        name: String,
    },
    /// A buffer or tensor has the wrong number of elements.
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// The fusion operator requires the round's frozen global reference,
    /// but the slot was never filled.
    MissingGlobalReference,
    /// A sample label lies outside the model's class range.
    InvalidLabel {
        got: usize,
        classes: usize,
    },
    /// An unrecognized fusion operator tag.
    UnknownOperator {
        tag: String,
    },
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::KeyMismatch { name } => {
                write!(f, "parameter {name} is missing from the snapshot")
            }
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => {
                write!(
                    f,
                    "shape mismatch for {what}: got {got} elements, expected {expected}"
                )
            }
            MlErr::MissingGlobalReference => {
                write!(f, "the frozen global reference was never set for this round")
            }
            MlErr::InvalidLabel { got, classes } => {
                write!(f, "label {got} is out of range for {classes} classes")
            }
            MlErr::UnknownOperator { tag } => {
                write!(f, "unknown fusion operator tag: {tag}")
            }
        }
    }
}

impl Error for MlErr {}
