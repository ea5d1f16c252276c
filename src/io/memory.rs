use super::{find_coordinate_name, DataReader, HeaderRequest, RawFileHeader, VariableInfo};
use crate::error::{EnsembleError, Result};
use crate::grid::RawCoordinate;
use chrono::{DateTime, Utc};
use ndarray::{s, Array3};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// One file held in memory
#[derive(Debug, Clone)]
pub struct MemoryFile {
    pub coordinates: Vec<RawCoordinate>,
    pub times: Vec<DateTime<Utc>>,
    /// Data variables laid out as (time, y, x)
    pub variables: BTreeMap<String, Array3<f32>>,
}

impl MemoryFile {
    pub fn new(lat: RawCoordinate, lon: RawCoordinate, times: Vec<DateTime<Utc>>) -> Self {
        Self {
            coordinates: vec![lat, lon],
            times,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, values: Array3<f32>) -> Self {
        self.variables.insert(name.into(), values);
        self
    }
}

/// Reader over files registered in memory
///
/// Stands in for NetCDF when the file layout, not the format, is under test.
/// Counts value reads so laziness can be observed.
#[derive(Debug, Default)]
pub struct InMemoryReader {
    files: RwLock<HashMap<PathBuf, MemoryFile>>,
    value_reads: AtomicUsize,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, file: MemoryFile) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), file);
    }

    /// Number of `read_values` calls served so far
    pub fn value_reads(&self) -> usize {
        self.value_reads.load(Ordering::SeqCst)
    }

    fn with_file<T>(&self, path: &Path, f: impl FnOnce(&MemoryFile) -> Result<T>) -> Result<T> {
        let files = self
            .files
            .read()
            .map_err(|_| EnsembleError::Config("in-memory file table is poisoned".to_string()))?;
        let file = files.get(path).ok_or_else(|| {
            EnsembleError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no in-memory file at {}", path.display()),
            ))
        })?;
        f(file)
    }
}

impl DataReader for InMemoryReader {
    fn read_header(&self, path: &Path, request: &HeaderRequest) -> Result<RawFileHeader> {
        self.with_file(path, |file| {
            let names: Vec<String> = file.coordinates.iter().map(|c| c.name.clone()).collect();
            let coordinate = |candidates: &[String], axis: &str| -> Result<RawCoordinate> {
                let name = find_coordinate_name(candidates, &names)
                    .ok_or_else(|| EnsembleError::MissingVariable {
                        name: format!("{} coordinate (tried {:?})", axis, candidates),
                        path: path.to_path_buf(),
                    })?;
                file.coordinates
                    .iter()
                    .find(|c| c.name == name)
                    .cloned()
                    .ok_or_else(|| EnsembleError::MissingVariable {
                        name: name.to_string(),
                        path: path.to_path_buf(),
                    })
            };
            let lat = coordinate(request.lat_names, "latitude")?;
            let lon = coordinate(request.lon_names, "longitude")?;

            let name = match request.variable {
                Some(name) => name.to_string(),
                None if file.variables.len() == 1 => file.variables.keys().next().cloned().unwrap_or_default(),
                None => {
                    return Err(EnsembleError::MissingVariable {
                        name: format!("unambiguous data variable among {:?}", file.variables.keys()),
                        path: path.to_path_buf(),
                    })
                }
            };
            let values = file.variables.get(&name).ok_or_else(|| EnsembleError::MissingVariable {
                name: name.clone(),
                path: path.to_path_buf(),
            })?;

            Ok(RawFileHeader {
                path: path.to_path_buf(),
                variable: VariableInfo {
                    name,
                    dimensions: vec!["time".to_string(), "y".to_string(), "x".to_string()],
                    shape: values.shape().to_vec(),
                    units: None,
                },
                lat,
                lon,
                times: file.times.clone(),
            })
        })
    }

    fn read_values(&self, path: &Path, variable: &str, time: Range<usize>) -> Result<Array3<f32>> {
        self.value_reads.fetch_add(1, Ordering::SeqCst);
        self.with_file(path, |file| {
            let values = file.variables.get(variable).ok_or_else(|| EnsembleError::MissingVariable {
                name: variable.to_string(),
                path: path.to_path_buf(),
            })?;
            if time.end > values.shape()[0] {
                return Err(EnsembleError::shape(
                    format!("time window of {}", path.display()),
                    &[values.shape()[0]],
                    &[time.end],
                ));
            }
            Ok(values.slice(s![time, .., ..]).to_owned())
        })
    }
}
