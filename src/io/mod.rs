use crate::error::{EnsembleError, Result};
use crate::grid::RawCoordinate;
use chrono::{DateTime, Utc};
use ndarray::Array3;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub mod memory;

pub use memory::*;

/// Metadata about a variable in a source file
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    /// Variable name
    pub name: String,
    /// Variable dimensions
    pub dimensions: Vec<String>,
    /// Variable shape
    pub shape: Vec<usize>,
    /// Units attribute if available
    pub units: Option<String>,
}

/// What the assembler needs to know to locate fields in a file
#[derive(Debug, Clone, Copy)]
pub struct HeaderRequest<'a> {
    /// Data variable; `None` selects the single non-coordinate field of rank 3
    pub variable: Option<&'a str>,
    /// Candidate latitude names, tried in order
    pub lat_names: &'a [String],
    /// Candidate longitude names, tried in order
    pub lon_names: &'a [String],
}

/// Everything about one file except the data values
#[derive(Debug, Clone)]
pub struct RawFileHeader {
    pub path: PathBuf,
    /// Data variable laid out as (time, y, x)
    pub variable: VariableInfo,
    pub lat: RawCoordinate,
    pub lon: RawCoordinate,
    /// Decoded time coordinate, one entry per time step of `variable`
    pub times: Vec<DateTime<Utc>>,
}

impl RawFileHeader {
    /// (time, y, x) extent of the data variable
    pub fn shape(&self) -> Result<[usize; 3]> {
        match self.variable.shape.as_slice() {
            &[nt, ny, nx] => Ok([nt, ny, nx]),
            other => Err(EnsembleError::shape(
                format!("variable '{}' in {}", self.variable.name, self.path.display()),
                &[0, 0, 0],
                other,
            )),
        }
    }
}

/// Source of gridded ensemble files
///
/// Implementations must be shareable across the compute pool: chunk sources
/// hold a reader and call `read_values` from worker threads.
pub trait DataReader: Send + Sync + fmt::Debug {
    /// Read the coordinate fields, time axis and data variable layout of a file
    ///
    /// # Arguments
    /// * `path` - Path to the file
    /// * `request` - Variable and coordinate names to look for
    ///
    /// # Returns
    /// * `Result<RawFileHeader>` - Header or error
    fn read_header(&self, path: &Path, request: &HeaderRequest) -> Result<RawFileHeader>;

    /// Read a time window of a (time, y, x) variable
    ///
    /// Missing values are returned as NaN.
    ///
    /// # Arguments
    /// * `path` - Path to the file
    /// * `variable` - Name of the variable to read
    /// * `time` - Range of time indices to read
    ///
    /// # Returns
    /// * `Result<Array3<f32>>` - Values laid out as (time, y, x) or error
    fn read_values(&self, path: &Path, variable: &str, time: Range<usize>) -> Result<Array3<f32>>;
}

/// Pick the first candidate name present in `available`
pub fn find_coordinate_name<'a>(candidates: &'a [String], available: &[String]) -> Option<&'a str> {
    candidates
        .iter()
        .find(|name| available.iter().any(|a| a == *name))
        .map(String::as_str)
}

/// Check if a file is in NetCDF format by examining magic bytes
///
/// NetCDF files start with specific magic bytes:
/// - Classic NetCDF: "CDF\001" or "CDF\002"
/// - NetCDF-4 (HDF5): "\211HDF\r\n\032\n"
///
/// # Arguments
/// * `path` - Path to the file to check
///
/// # Returns
/// * `Result<bool>` - True if NetCDF format detected, false otherwise
pub fn is_netcdf_format(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }

    let mut file = File::open(path)?;
    let mut buffer = [0u8; 8];

    match file.read_exact(&mut buffer) {
        Ok(_) => {
            if buffer[0..3] == [b'C', b'D', b'F'] && (buffer[3] == 1 || buffer[3] == 2) {
                return Ok(true);
            }

            if buffer == [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'] {
                return Ok(true);
            }

            Ok(false)
        }
        // File too small to carry a header
        Err(_) => Ok(false),
    }
}
