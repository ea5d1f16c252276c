use crate::config::AssemblyConfig;
use crate::data_io::{file_tasks, NetCDFReader};
use crate::dataset::UnifiedDataset;
use crate::error::{EnsembleError, Result};
use crate::grid::{normalize_coordinates, GridDescriptor};
use crate::io::{DataReader, HeaderRequest, RawFileHeader};
use crate::lazy::ChunkedArray;
use crate::member::{MemberId, MemberParser};
use crate::time_utils::{format_datetime, is_strictly_increasing};
use chrono::{DateTime, Utc};
use ndarray::Array4;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Files of one member in lexical order, with their concatenated time axis
#[derive(Debug)]
struct MemberFiles {
    id: MemberId,
    headers: Vec<RawFileHeader>,
    times: Vec<DateTime<Utc>>,
}

impl MemberFiles {
    fn new(id: MemberId) -> Self {
        Self {
            id,
            headers: Vec::new(),
            times: Vec::new(),
        }
    }

    /// Append the next file along time
    fn push(&mut self, header: RawFileHeader) -> Result<()> {
        if !is_strictly_increasing(&header.times) {
            return Err(EnsembleError::UnorderedTime {
                member: self.id.label().to_string(),
                path: header.path.clone(),
            });
        }
        if let (Some(last), Some(first)) = (self.times.last(), header.times.first()) {
            if first <= last {
                if let Some(repeated) = header.times.iter().find(|t| self.times.binary_search(t).is_ok()) {
                    return Err(EnsembleError::DuplicateMember {
                        member: self.id.label().to_string(),
                        path: header.path.clone(),
                        reason: format!(
                            "time step {} is already provided by another file of this member",
                            format_datetime(repeated)
                        ),
                    });
                }
                return Err(EnsembleError::UnorderedTime {
                    member: self.id.label().to_string(),
                    path: header.path.clone(),
                });
            }
        }
        self.times.extend_from_slice(&header.times);
        self.headers.push(header);
        Ok(())
    }
}

/// Builds a [`UnifiedDataset`] from per-member files
///
/// Assembly is fail-fast and discovery-order independent: paths are sorted
/// before grouping and the member axis follows the configured member order.
/// No data values are read; the result is a graph of one chunk per file
/// (or per `time_steps_per_chunk` steps of a file).
#[derive(Debug, Clone)]
pub struct EnsembleAssembler {
    config: AssemblyConfig,
    reader: Arc<dyn DataReader>,
    parser: MemberParser,
}

impl EnsembleAssembler {
    pub fn new(config: AssemblyConfig, reader: Arc<dyn DataReader>) -> Result<Self> {
        config.validate()?;
        let parser = config.member_parser()?;
        Ok(Self {
            config,
            reader,
            parser,
        })
    }

    /// Assembler reading NetCDF files
    pub fn netcdf(config: AssemblyConfig) -> Result<Self> {
        Self::new(config, Arc::new(NetCDFReader::new()))
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Expand a glob pattern into a lexically sorted list of files
    ///
    /// # Arguments
    /// * `pattern` - Glob pattern such as `/data/ens/pr_*_??.nc`
    ///
    /// # Returns
    /// * `Result<Vec<PathBuf>>` - Matching files; never empty
    pub fn discover_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let entries = glob::glob(pattern).map_err(|e| EnsembleError::InvalidPattern(format!("{}: {}", pattern, e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| e.into_error())?;
            if path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(EnsembleError::NoFilesFound {
                pattern: pattern.to_string(),
            });
        }
        paths.sort();
        log::debug!("pattern '{}' matched {} files", pattern, paths.len());
        Ok(paths)
    }

    /// Discover, normalise and stack all member files matching `pattern`
    pub fn assemble(&self, pattern: &str) -> Result<UnifiedDataset> {
        let paths = self.discover_files(pattern)?;
        self.assemble_paths(&paths)
    }

    /// Assemble an explicit list of files, in any order
    pub fn assemble_paths(&self, paths: &[PathBuf]) -> Result<UnifiedDataset> {
        if paths.is_empty() {
            return Err(EnsembleError::NoFilesFound {
                pattern: "<empty file list>".to_string(),
            });
        }
        let mut paths = paths.to_vec();
        paths.sort();

        let mut variable = self.config.variable.clone();
        let mut grid: Option<(GridDescriptor, PathBuf)> = None;
        let mut members: BTreeMap<String, MemberFiles> = BTreeMap::new();
        let mut labels_by_number: HashMap<u64, String> = HashMap::new();

        for path in &paths {
            let member = self.parser.parse(path)?;
            let header = self.reader.read_header(
                path,
                &HeaderRequest {
                    variable: variable.as_deref(),
                    lat_names: &self.config.lat_names,
                    lon_names: &self.config.lon_names,
                },
            )?;
            let [nt, ny, nx] = header.shape()?;
            log::debug!(
                "member {} <- {} ('{}', {} steps, {}x{})",
                member,
                path.display(),
                header.variable.name,
                nt,
                ny,
                nx
            );
            if variable.is_none() {
                log::info!("using data variable '{}'", header.variable.name);
                variable = Some(header.variable.name.clone());
            }

            let file_grid = normalize_coordinates(&header.lat, &header.lon)?;
            if file_grid.shape() != (ny, nx) {
                let (gy, gx) = file_grid.shape();
                return Err(EnsembleError::shape(
                    format!("'{}' against its coordinates in {}", header.variable.name, path.display()),
                    &[gy, gx],
                    &[ny, nx],
                ));
            }
            match &grid {
                None => grid = Some((file_grid, path.clone())),
                Some((expected, first_path)) => check_same_grid(expected, first_path, &file_grid, &member, path)?,
            }

            if let Some(label) = labels_by_number.get(&member.number()) {
                if label != member.label() {
                    return Err(EnsembleError::DuplicateMember {
                        member: member.label().to_string(),
                        path: path.clone(),
                        reason: format!("identifier has the same value as member '{}'", label),
                    });
                }
            }
            labels_by_number.insert(member.number(), member.label().to_string());

            let files = members
                .entry(member.label().to_string())
                .or_insert_with(|| MemberFiles::new(member.clone()));
            if self.config.one_file_per_member && !files.headers.is_empty() {
                return Err(EnsembleError::DuplicateMember {
                    member: member.label().to_string(),
                    path: path.clone(),
                    reason: format!("already provided by {}", files.headers[0].path.display()),
                });
            }
            files.push(header)?;
        }

        let (grid, _) = grid.ok_or_else(|| EnsembleError::NoFilesFound {
            pattern: "<empty file list>".to_string(),
        })?;
        let variable = variable.unwrap_or_default();

        let mut members: Vec<MemberFiles> = members.into_values().collect();
        let order = self.config.member_order;
        members.sort_by(|a, b| a.id.cmp_by(&b.id, order));

        let times = members[0].times.clone();
        for member in &members[1..] {
            if let Some(detail) = describe_time_difference(&times, &member.times) {
                return Err(EnsembleError::TimeMismatch {
                    member: member.id.label().to_string(),
                    reference: members[0].id.label().to_string(),
                    detail,
                });
            }
        }

        let data = if times.is_empty() {
            let (ny, nx) = grid.shape();
            ChunkedArray::from_array(Array4::zeros((0, members.len(), ny, nx)))
        } else {
            let mut columns = Vec::with_capacity(members.len());
            for member in &members {
                let mut tasks = Vec::new();
                for header in &member.headers {
                    tasks.extend(file_tasks(&self.reader, header, self.config.time_steps_per_chunk)?);
                }
                columns.push(tasks);
            }
            ChunkedArray::from_columns(columns)?
        };

        let ids: Vec<MemberId> = members.into_iter().map(|m| m.id).collect();
        let dataset = UnifiedDataset::new(variable, times, Some(ids), grid, data)?;
        log::info!(
            "assembled '{}' from {} files: {} members, {} steps, {} grid {:?}, {} chunks",
            dataset.variable(),
            paths.len(),
            dataset.shape()[1],
            dataset.shape()[0],
            dataset.grid().kind(),
            dataset.grid().shape(),
            dataset.n_chunks()
        );
        Ok(dataset)
    }
}

fn check_same_grid(
    expected: &GridDescriptor,
    first_path: &Path,
    found: &GridDescriptor,
    member: &MemberId,
    path: &Path,
) -> Result<()> {
    if expected.kind() != found.kind() {
        return Err(EnsembleError::IncompatibleGrid {
            reason: format!(
                "{} has a {} grid but {} has a {} grid",
                path.display(),
                found.kind(),
                first_path.display(),
                expected.kind()
            ),
        });
    }
    if expected.shape() != found.shape() {
        let (ey, ex) = expected.shape();
        let (fy, fx) = found.shape();
        return Err(EnsembleError::shape(
            format!("spatial grid of member {} in {}", member, path.display()),
            &[ey, ex],
            &[fy, fx],
        ));
    }
    if !expected.same_coordinates(found) {
        return Err(EnsembleError::IncompatibleGrid {
            reason: format!(
                "coordinates of {} differ from those of {}",
                path.display(),
                first_path.display()
            ),
        });
    }
    Ok(())
}

pub(crate) fn describe_time_difference(reference: &[DateTime<Utc>], other: &[DateTime<Utc>]) -> Option<String> {
    if let Some((index, (a, b))) = reference.iter().zip(other).enumerate().find(|(_, (a, b))| a != b) {
        return Some(format!(
            "step {} is {} instead of {}",
            index,
            format_datetime(b),
            format_datetime(a)
        ));
    }
    if reference.len() != other.len() {
        return Some(format!("{} time steps instead of {}", other.len(), reference.len()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::RawCoordinate;
    use crate::io::{InMemoryReader, MemoryFile};
    use chrono::{Duration, TimeZone};
    use ndarray::{arr1, Array3};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn file(days: std::ops::Range<i64>, value: f32) -> MemoryFile {
        let times: Vec<_> = days.map(day).collect();
        let values = Array3::from_elem((times.len(), 2, 3), value);
        MemoryFile::new(
            RawCoordinate::new("lat", arr1(&[47.0, 48.0]).into_dyn()),
            RawCoordinate::new("lon", arr1(&[10.0, 11.0, 12.0]).into_dyn()),
            times,
        )
        .with_variable("pr", values)
    }

    fn assembler(reader: &Arc<InMemoryReader>, config: AssemblyConfig) -> EnsembleAssembler {
        EnsembleAssembler::new(config, reader.clone()).unwrap()
    }

    #[test]
    fn test_multi_file_member_is_concatenated() {
        let reader = Arc::new(InMemoryReader::new());
        reader.insert("/d/a_2016_00.nc", file(0..2, 0.0));
        reader.insert("/d/b_2016_00.nc", file(2..4, 0.0));
        reader.insert("/d/a_2016_01.nc", file(0..2, 1.0));
        reader.insert("/d/b_2016_01.nc", file(2..4, 1.0));
        let paths: Vec<PathBuf> = ["/d/b_2016_01.nc", "/d/a_2016_00.nc", "/d/b_2016_00.nc", "/d/a_2016_01.nc"]
            .iter()
            .map(PathBuf::from)
            .collect();

        let dataset = assembler(&reader, AssemblyConfig::default()).assemble_paths(&paths).unwrap();
        assert_eq!(dataset.shape(), [4, 2, 2, 3]);
        assert_eq!(dataset.n_chunks(), 4);
        assert_eq!(dataset.times()[3], day(3));
        assert_eq!(reader.value_reads(), 0);
    }

    #[test]
    fn test_chunk_size_splits_files() {
        let reader = Arc::new(InMemoryReader::new());
        reader.insert("/d/x_00.nc", file(0..5, 0.0));
        let config = AssemblyConfig {
            time_steps_per_chunk: Some(2),
            ..AssemblyConfig::default()
        };
        let dataset = assembler(&reader, config)
            .assemble_paths(&[PathBuf::from("/d/x_00.nc")])
            .unwrap();
        assert_eq!(dataset.n_chunks(), 3);
    }

    #[test]
    fn test_overlapping_files_are_duplicates() {
        let reader = Arc::new(InMemoryReader::new());
        reader.insert("/d/a_00.nc", file(0..3, 0.0));
        reader.insert("/d/b_00.nc", file(2..4, 0.0));
        let paths = vec![PathBuf::from("/d/a_00.nc"), PathBuf::from("/d/b_00.nc")];
        let err = assembler(&reader, AssemblyConfig::default()).assemble_paths(&paths).unwrap_err();
        assert!(matches!(err, EnsembleError::DuplicateMember { .. }));
    }

    #[test]
    fn test_files_out_of_time_order() {
        let reader = Arc::new(InMemoryReader::new());
        reader.insert("/d/a_00.nc", file(3..5, 0.0));
        reader.insert("/d/b_00.nc", file(0..2, 0.0));
        let paths = vec![PathBuf::from("/d/a_00.nc"), PathBuf::from("/d/b_00.nc")];
        let err = assembler(&reader, AssemblyConfig::default()).assemble_paths(&paths).unwrap_err();
        assert!(matches!(err, EnsembleError::UnorderedTime { .. }));
    }

    #[test]
    fn test_one_file_per_member() {
        let reader = Arc::new(InMemoryReader::new());
        reader.insert("/d/a_00.nc", file(0..2, 0.0));
        reader.insert("/d/b_00.nc", file(2..4, 0.0));
        let paths = vec![PathBuf::from("/d/a_00.nc"), PathBuf::from("/d/b_00.nc")];
        let config = AssemblyConfig {
            one_file_per_member: true,
            ..AssemblyConfig::default()
        };
        let err = assembler(&reader, config).assemble_paths(&paths).unwrap_err();
        assert!(matches!(err, EnsembleError::DuplicateMember { .. }));
    }

    #[test]
    fn test_same_number_different_label() {
        let reader = Arc::new(InMemoryReader::new());
        reader.insert("/d/a_0.nc", file(0..2, 0.0));
        reader.insert("/d/a_00.nc", file(0..2, 0.0));
        let paths = vec![PathBuf::from("/d/a_0.nc"), PathBuf::from("/d/a_00.nc")];
        let err = assembler(&reader, AssemblyConfig::default()).assemble_paths(&paths).unwrap_err();
        assert!(matches!(err, EnsembleError::DuplicateMember { .. }));
    }

    #[test]
    fn test_member_variable_is_pinned_by_first_file() {
        let reader = Arc::new(InMemoryReader::new());
        reader.insert("/d/a_00.nc", file(0..2, 0.0));
        let other = file(0..2, 1.0).with_variable("tas", Array3::zeros((2, 2, 3)));
        reader.insert("/d/a_01.nc", other);
        let paths = vec![PathBuf::from("/d/a_00.nc"), PathBuf::from("/d/a_01.nc")];
        let dataset = assembler(&reader, AssemblyConfig::default()).assemble_paths(&paths).unwrap();
        assert_eq!(dataset.variable(), "pr");
    }

    #[test]
    fn test_time_difference_description() {
        let a = vec![day(0), day(1)];
        assert_eq!(describe_time_difference(&a, &a), None);
        assert!(describe_time_difference(&a, &[day(0)]).unwrap().contains("1 time steps"));
        assert!(describe_time_difference(&a, &[day(0), day(2)]).unwrap().contains("step 1"));
    }
}
