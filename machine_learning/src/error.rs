use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

use crate::initialization::RandErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    UnknownParam(String),
    UnsupportedReadout(String),
    InvalidGraph(String),
    Rand(RandErr),
    Shape(ShapeError),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::UnknownParam(name) => write!(f, "The parameter {name} is not in the scope"),
            MlErr::UnsupportedReadout(readout) => write!(
                f,
                "Unsupported readout {readout}, expected one of avg, set2set or root"
            ),
            MlErr::InvalidGraph(detail) => write!(f, "Invalid graph: {detail}"),
            MlErr::Rand(e) => write!(f, "Failed to build a parameter generator: {e}"),
            MlErr::Shape(e) => write!(f, "Invalid tensor shape: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Rand(e) => Some(e),
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::Rand(value)
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
