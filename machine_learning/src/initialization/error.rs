use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

pub type Result<T> = std::result::Result<T, RandErr>;

/// Returned when a random generator's distribution can't be built from the
/// given parameters (an empty range, a non finite deviation, a zero fan).
#[derive(Debug)]
pub struct RandErr(String);

impl RandErr {
    pub(super) fn zero_fan() -> Self {
        Self("the fan of a weight tensor must be positive".into())
    }
}

impl From<NormalError> for RandErr {
    fn from(value: NormalError) -> Self {
        Self(value.to_string())
    }
}

impl From<UniformError> for RandErr {
    fn from(value: UniformError) -> Self {
        Self(value.to_string())
    }
}

impl Display for RandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for RandErr {}
