use super::common::{
    attribute_string, dimension_names, open_netcdf_file, read_decoded_f64, variable_shape, Packing,
};
use super::utils::{detect_data_variable, TIME_NAMES};
use crate::error::{EnsembleError, Result};
use crate::grid::{normalize_coordinates, RawCoordinate, DEFAULT_LAT_NAMES, DEFAULT_LON_NAMES};
use crate::io::{find_coordinate_name, DataReader, HeaderRequest, RawFileHeader, VariableInfo};
use crate::dataset::ReferenceDataset;
use crate::lazy::{ChunkedArray, Task};
use crate::time_utils::decode_times;
use chrono::{DateTime, Utc};
use ndarray::Array3;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// NetCDF reader for gridded ensemble and reference files
///
/// Stateless: every call opens the file it needs, so one reader can serve all
/// chunk loads of a task graph from any thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetCDFReader;

impl NetCDFReader {
    /// Create a new NetCDF reader
    pub fn new() -> Self {
        Self
    }

    /// Describe the variables of a file
    pub fn list_variables(&self, path: &Path) -> Result<Vec<VariableInfo>> {
        let file = open_netcdf_file(path)?;
        Ok(file
            .variables()
            .map(|var| VariableInfo {
                name: var.name(),
                dimensions: dimension_names(&var),
                shape: variable_shape(&var),
                units: attribute_string(&var, "units"),
            })
            .collect())
    }

    fn read_coordinate(file: &netcdf::File, path: &Path, candidates: &[String], axis: &str) -> Result<RawCoordinate> {
        let available: Vec<String> = file.variables().map(|v| v.name()).collect();
        let name = find_coordinate_name(candidates, &available).ok_or_else(|| EnsembleError::MissingVariable {
            name: format!("{} coordinate (tried {:?})", axis, candidates),
            path: path.to_path_buf(),
        })?;
        let var = file.variable(name).ok_or_else(|| EnsembleError::MissingVariable {
            name: name.to_string(),
            path: path.to_path_buf(),
        })?;
        Ok(RawCoordinate::new(name, read_decoded_f64(&var)?))
    }

    fn read_times(file: &netcdf::File, path: &Path, time_dim: &str) -> Result<Vec<DateTime<Utc>>> {
        let name = file
            .variable(time_dim)
            .map(|_| time_dim.to_string())
            .or_else(|| {
                TIME_NAMES
                    .iter()
                    .find(|name| file.variable(name).is_some())
                    .map(|name| name.to_string())
            })
            .ok_or_else(|| EnsembleError::MissingVariable {
                name: format!("time coordinate for dimension '{}'", time_dim),
                path: path.to_path_buf(),
            })?;
        let var = file.variable(&name).ok_or_else(|| EnsembleError::MissingVariable {
            name: name.clone(),
            path: path.to_path_buf(),
        })?;

        let units = attribute_string(&var, "units").ok_or_else(|| EnsembleError::InvalidTime {
            reason: format!("time variable '{}' in {} has no 'units' attribute", name, path.display()),
        })?;
        let calendar = attribute_string(&var, "calendar");
        let offsets: Vec<f64> = var.get_values::<f64, _>(..)?;
        decode_times(&units, calendar.as_deref(), &offsets)
    }
}

impl DataReader for NetCDFReader {
    fn read_header(&self, path: &Path, request: &HeaderRequest) -> Result<RawFileHeader> {
        let file = open_netcdf_file(path)?;

        let name = match request.variable {
            Some(name) => name.to_string(),
            None => {
                let vars: Vec<(String, usize)> = file
                    .variables()
                    .map(|v| (v.name(), v.dimensions().len()))
                    .collect();
                detect_data_variable(vars.iter().map(|(n, r)| (n.as_str(), *r)))
                    .map(str::to_string)
                    .map_err(|candidates| EnsembleError::MissingVariable {
                        name: format!("unambiguous data variable (candidates {:?})", candidates),
                        path: path.to_path_buf(),
                    })?
            }
        };
        let var = file.variable(&name).ok_or_else(|| EnsembleError::MissingVariable {
            name: name.clone(),
            path: path.to_path_buf(),
        })?;
        let dimensions = dimension_names(&var);
        let shape = variable_shape(&var);
        if shape.len() != 3 {
            return Err(EnsembleError::shape(
                format!("variable '{}' {:?} in {}", name, dimensions, path.display()),
                &[0, 0, 0],
                &shape,
            ));
        }

        let lat = Self::read_coordinate(&file, path, request.lat_names, "latitude")?;
        let lon = Self::read_coordinate(&file, path, request.lon_names, "longitude")?;
        let times = Self::read_times(&file, path, &dimensions[0])?;
        if times.len() != shape[0] {
            return Err(EnsembleError::shape(
                format!("time coordinate of {}", path.display()),
                &[shape[0]],
                &[times.len()],
            ));
        }

        log::debug!(
            "{}: variable '{}' {:?}, coordinates '{}'/'{}'",
            path.display(),
            name,
            shape,
            lat.name,
            lon.name
        );

        Ok(RawFileHeader {
            path: path.to_path_buf(),
            variable: VariableInfo {
                units: attribute_string(&var, "units"),
                name,
                dimensions,
                shape,
            },
            lat,
            lon,
            times,
        })
    }

    fn read_values(&self, path: &Path, variable: &str, time: Range<usize>) -> Result<Array3<f32>> {
        let file = open_netcdf_file(path)?;
        let var = file.variable(variable).ok_or_else(|| EnsembleError::MissingVariable {
            name: variable.to_string(),
            path: path.to_path_buf(),
        })?;
        let shape = variable_shape(&var);
        if shape.len() != 3 || time.end > shape[0] {
            return Err(EnsembleError::shape(
                format!("time window {:?} of '{}' in {}", time, variable, path.display()),
                &[time.end, 0, 0],
                &shape,
            ));
        }
        let (ny, nx) = (shape[1], shape[2]);
        let nt = time.len();

        let packing = Packing::of(&var);
        let raw: Vec<f32> = var.get_values::<f32, _>((time, 0..ny, 0..nx))?;
        let decoded: Vec<f32> = raw.into_iter().map(|v| packing.decode_f32(v)).collect();

        Array3::from_shape_vec((nt, ny, nx), decoded)
            .map_err(|_| EnsembleError::shape(format!("'{}' in {}", variable, path.display()), &[nt, ny, nx], &[]))
    }
}

/// Known dataset families and their coordinate naming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Ensemble forecast output with `latitude`/`longitude`
    Ensemble,
    /// SPARTACUS gridded observations with `lat`/`lon`
    Spartacus,
    /// INCA analysis with `lat`/`lon`
    Inca,
}

impl DatasetKind {
    /// (latitude, longitude) variable names
    pub fn coordinate_names(&self) -> (&'static str, &'static str) {
        match self {
            DatasetKind::Ensemble => ("latitude", "longitude"),
            DatasetKind::Spartacus | DatasetKind::Inca => ("lat", "lon"),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ensemble" => Ok(DatasetKind::Ensemble),
            "spartacus" => Ok(DatasetKind::Spartacus),
            "inca" | "incal" => Ok(DatasetKind::Inca),
            _ => Err(EnsembleError::Config(format!(
                "unsupported dataset type '{}' (expected ensemble, spartacus or inca)",
                s
            ))),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DatasetKind::Ensemble => f.write_str("ensemble"),
            DatasetKind::Spartacus => f.write_str("SPARTACUS"),
            DatasetKind::Inca => f.write_str("INCA"),
        }
    }
}

/// Lazily loaded window of one file's variable
#[derive(Debug)]
pub struct FileChunk {
    pub reader: Arc<dyn DataReader>,
    pub path: std::path::PathBuf,
    pub variable: String,
    pub time: Range<usize>,
}

impl crate::lazy::ChunkSource for FileChunk {
    fn load(&self) -> Result<Array3<f32>> {
        log::debug!(
            "loading '{}' steps {:?} from {}",
            self.variable,
            self.time,
            self.path.display()
        );
        self.reader.read_values(&self.path, &self.variable, self.time.clone())
    }

    fn describe(&self) -> String {
        format!("'{}' steps {:?} of {}", self.variable, self.time, self.path.display())
    }
}

/// Split a file's time axis into chunk tasks of at most `steps_per_chunk` steps
pub(crate) fn file_tasks(
    reader: &Arc<dyn DataReader>,
    header: &RawFileHeader,
    steps_per_chunk: Option<usize>,
) -> Result<Vec<Task>> {
    let [nt, ny, nx] = header.shape()?;
    let step = steps_per_chunk.unwrap_or(nt).max(1);
    Ok((0..nt)
        .step_by(step)
        .map(|start| {
            let time = start..(start + step).min(nt);
            let shape = [time.len(), ny, nx];
            Task::source(
                Arc::new(FileChunk {
                    reader: reader.clone(),
                    path: header.path.clone(),
                    variable: header.variable.name.clone(),
                    time,
                }),
                shape,
            )
        })
        .collect())
}

/// Load a single-file reference dataset using the naming of `kind`
///
/// The configured names are tried first, then the generic candidates.
pub fn load_reference(path: &Path, kind: DatasetKind, variable: Option<&str>) -> Result<ReferenceDataset> {
    load_reference_with(Arc::new(NetCDFReader::new()), path, kind, variable)
}

/// [`load_reference`] over any reader
pub fn load_reference_with(
    reader: Arc<dyn DataReader>,
    path: &Path,
    kind: DatasetKind,
    variable: Option<&str>,
) -> Result<ReferenceDataset> {
    let (lat_name, lon_name) = kind.coordinate_names();
    let with_defaults = |first: &str, defaults: &[&str]| -> Vec<String> {
        std::iter::once(first)
            .chain(defaults.iter().copied().filter(|name| *name != first))
            .map(str::to_string)
            .collect()
    };
    let lat_names = with_defaults(lat_name, DEFAULT_LAT_NAMES);
    let lon_names = with_defaults(lon_name, DEFAULT_LON_NAMES);

    let header = reader.read_header(
        path,
        &HeaderRequest {
            variable,
            lat_names: &lat_names,
            lon_names: &lon_names,
        },
    )?;
    let grid = normalize_coordinates(&header.lat, &header.lon)?;
    let tasks = file_tasks(&reader, &header, None)?;
    let data = if tasks.is_empty() {
        let (ny, nx) = grid.shape();
        ChunkedArray::from_array(ndarray::Array4::zeros((0, 1, ny, nx)))
    } else {
        ChunkedArray::from_columns(vec![tasks])?
    };

    log::info!(
        "loaded {} reference '{}' from {}: {} steps on {} grid",
        kind,
        header.variable.name,
        path.display(),
        header.times.len(),
        grid.kind()
    );
    ReferenceDataset::new(header.variable.name.clone(), header.times.clone(), grid, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridKind;
    use crate::io::{InMemoryReader, MemoryFile};
    use crate::time_utils::parse_datetime;
    use ndarray::array;

    #[test]
    fn test_dataset_kind_names() {
        assert_eq!(DatasetKind::Ensemble.coordinate_names(), ("latitude", "longitude"));
        assert_eq!("SPARTACUS".parse::<DatasetKind>().unwrap(), DatasetKind::Spartacus);
        assert_eq!("inca".parse::<DatasetKind>().unwrap().coordinate_names(), ("lat", "lon"));
        assert!("era5".parse::<DatasetKind>().is_err());
    }

    #[test]
    fn test_load_reference_is_lazy() {
        let reader = Arc::new(InMemoryReader::new());
        let file = MemoryFile::new(
            RawCoordinate::new("lat", array![[46.0, 46.0], [47.0, 47.0]].into_dyn()),
            RawCoordinate::new("lon", array![[9.0, 10.0], [9.0, 10.0]].into_dyn()),
            vec![parse_datetime("2016-01-01").unwrap()],
        )
        .with_variable("RR", Array3::from_elem((1, 2, 2), 3.0));
        reader.insert("/obs/RR_2016.nc", file);

        let reference =
            load_reference_with(reader.clone(), Path::new("/obs/RR_2016.nc"), DatasetKind::Spartacus, None).unwrap();
        assert_eq!(reference.dataset().grid().kind(), GridKind::Irregular2D);
        assert_eq!(reader.value_reads(), 0);

        let values = reference.compute().unwrap();
        assert_eq!(values.shape(), &[1, 2, 2]);
        assert_eq!(reader.value_reads(), 1);
    }

    #[test]
    fn test_file_tasks_split_time() {
        let reader: Arc<dyn DataReader> = Arc::new(InMemoryReader::new());
        let header = RawFileHeader {
            path: "/data/pr_00.nc".into(),
            variable: VariableInfo {
                name: "pr".to_string(),
                dimensions: vec![],
                shape: vec![5, 2, 3],
                units: None,
            },
            lat: RawCoordinate::new("lat", array![1.0, 2.0].into_dyn()),
            lon: RawCoordinate::new("lon", array![1.0, 2.0, 3.0].into_dyn()),
            times: vec![],
        };
        let tasks = file_tasks(&reader, &header, Some(2)).unwrap();
        let lengths: Vec<usize> = tasks.iter().map(Task::time_len).collect();
        assert_eq!(lengths, vec![2, 2, 1]);
        assert_eq!(file_tasks(&reader, &header, None).unwrap().len(), 1);
    }
}
