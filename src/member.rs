//! Ensemble member identifiers parsed from file names.
//!
//! The default convention takes the last underscore-delimited numeric token
//! before the file extension, e.g. `pr_ens_20160101_07.nc` is member `07`.

use crate::error::{EnsembleError, Result};
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// Default member convention: `<anything>_<digits>.<ext>`
pub const DEFAULT_MEMBER_PATTERN: &str = r"^.*_(\d+)\.[^.]+$";

/// Sort order of the `member` axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberOrder {
    /// Ascending parsed integer value
    #[default]
    Numeric,
    /// Ascending label, character by character
    Lexical,
}

/// Identifier of one ensemble member
///
/// The label keeps the zero padding found in the file name; `number` is the
/// parsed integer used for numeric ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberId {
    label: String,
    number: u64,
}

impl MemberId {
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let number = label
            .parse::<u64>()
            .map_err(|_| EnsembleError::Config(format!("member label '{}' is not numeric", label)))?;
        Ok(Self { label, number })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Compare two identifiers under the configured member order
    pub fn cmp_by(&self, other: &Self, order: MemberOrder) -> Ordering {
        match order {
            MemberOrder::Numeric => self
                .number
                .cmp(&other.number)
                .then_with(|| self.label.cmp(&other.label)),
            MemberOrder::Lexical => self.label.cmp(&other.label),
        }
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Extracts member identifiers from file paths
#[derive(Debug, Clone)]
pub struct MemberParser {
    pattern: Regex,
}

impl Default for MemberParser {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_MEMBER_PATTERN).expect("default member pattern is valid"),
        }
    }
}

impl MemberParser {
    /// Build a parser from a regex whose first capture group is the member token
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| EnsembleError::Config(format!("invalid member pattern '{}': {}", pattern, e)))?;
        if pattern.captures_len() < 2 {
            return Err(EnsembleError::Config(format!(
                "member pattern '{}' needs one capture group",
                pattern.as_str()
            )));
        }
        Ok(Self { pattern })
    }

    /// Parse the member identifier of one file
    ///
    /// Only the file name is matched, never the parent directories.
    pub fn parse(&self, path: &Path) -> Result<MemberId> {
        let unparseable = || EnsembleError::UnparseableMember {
            path: path.to_path_buf(),
        };

        let file_name = path.file_name().and_then(|name| name.to_str()).ok_or_else(unparseable)?;
        let token = self
            .pattern
            .captures(file_name)
            .and_then(|captures| captures.get(1))
            .map(|token| token.as_str())
            .ok_or_else(unparseable)?;

        MemberId::new(token).map_err(|_| unparseable())
    }
}
