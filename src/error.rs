use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while assembling, aligning or scoring ensemble datasets.
///
/// Every failure is fail-fast: a failed assembly never yields a dataset
/// missing some members.
#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("No files found matching pattern: {pattern}")]
    NoFilesFound { pattern: String },

    #[error("Cannot parse an ensemble member identifier from file name: {}", path.display())]
    UnparseableMember { path: PathBuf },

    #[error("Duplicate ensemble member '{member}' in {}: {reason}", path.display())]
    DuplicateMember {
        member: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Incompatible grid: {reason}")]
    IncompatibleGrid { reason: String },

    #[error("Shape mismatch for {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Time coordinates of member '{member}' differ from member '{reference}': {detail}")]
    TimeMismatch {
        member: String,
        reference: String,
        detail: String,
    },

    #[error("Time steps of member '{member}' are not increasing at {}", path.display())]
    UnorderedTime { member: String, path: PathBuf },

    #[error("Datasets have no temporal overlap (latest start {start} is after earliest end {end})")]
    NoTemporalOverlap { start: String, end: String },

    #[error("Variable not found: {name} in {}", path.display())]
    MissingVariable { name: String, path: PathBuf },

    #[error("Dimension not found: {0}")]
    MissingDimension(String),

    #[error("Invalid time coordinate: {reason}")]
    InvalidTime { reason: String },

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EnsembleError>;

impl EnsembleError {
    pub(crate) fn shape(context: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
        EnsembleError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let error = EnsembleError::UnparseableMember {
            path: PathBuf::from("/data/pr_ens_control.nc"),
        };
        assert!(error.to_string().contains("pr_ens_control.nc"));

        let error = EnsembleError::shape("member 03", &[10, 12], &[10, 11]);
        let message = error.to_string();
        assert!(message.contains("member 03"));
        assert!(message.contains("[10, 12]"));
        assert!(message.contains("[10, 11]"));
    }
}
