use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    /// A NaN or infinity showed up; parameters touched by the failing call should be discarded.
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("not solved: {0}")]
    NotSolved(String),
    #[error("solver failed: {0}")]
    Solver(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fails with [`Error::Numerical`] if any value is NaN or infinite.
#[inline]
pub(crate) fn ensure_finite(values: &[f64], what: &str) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        None => Ok(()),
        Some(idx) => Err(Error::Numerical(format!(
            "{what} produced non-finite value {} at index {idx}",
            values[idx]
        ))),
    }
}

#[inline]
pub(crate) fn ensure_len(actual: usize, expected: usize, what: &str) -> Result<()> {
    if actual != expected {
        return Err(Error::InvalidShape(format!(
            "{what} has len {actual}, expected {expected}"
        )));
    }
    Ok(())
}
