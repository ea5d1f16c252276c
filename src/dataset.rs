//! Unified ensemble datasets and their materialised form.

use crate::error::{EnsembleError, Result};
use crate::grid::GridDescriptor;
use crate::lazy::ChunkedArray;
use crate::member::MemberId;
use crate::time_utils::{format_datetime, is_strictly_increasing};
use chrono::{DateTime, Utc};
use ndarray::{Array3, Array4, ArrayD, Axis};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Named axis of a dataset or computed array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dim {
    Time,
    Member,
    /// `lat` on regular grids, bare `y` index on irregular ones
    Y,
    /// `lon` on regular grids, bare `x` index on irregular ones
    X,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Dim::Time => "time",
            Dim::Member => "member",
            Dim::Y => "y",
            Dim::X => "x",
        };
        f.write_str(name)
    }
}

impl FromStr for Dim {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "time" => Ok(Dim::Time),
            "member" | "ensemble_member" => Ok(Dim::Member),
            "y" | "lat" | "latitude" => Ok(Dim::Y),
            "x" | "lon" | "longitude" => Ok(Dim::X),
            _ => Err(EnsembleError::MissingDimension(s.to_string())),
        }
    }
}

/// Materialised values with named axes
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    dims: Vec<Dim>,
    values: ArrayD<f32>,
}

impl DataArray {
    pub fn new(dims: Vec<Dim>, values: ArrayD<f32>) -> Result<Self> {
        if dims.len() != values.ndim() {
            return Err(EnsembleError::shape(
                format!("axes {:?}", dims),
                &[dims.len()],
                &[values.ndim()],
            ));
        }
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].contains(dim) {
                return Err(EnsembleError::Config(format!("axis '{}' appears twice", dim)));
            }
        }
        Ok(Self { dims, values })
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn values(&self) -> &ArrayD<f32> {
        &self.values
    }

    pub fn into_values(self) -> ArrayD<f32> {
        self.values
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn axis_of(&self, dim: Dim) -> Option<usize> {
        self.dims.iter().position(|&d| d == dim)
    }

    pub fn len_of(&self, dim: Dim) -> Option<usize> {
        self.axis_of(dim).map(|axis| self.values.shape()[axis])
    }

    /// The single value of a zero-dimensional array
    pub fn scalar(&self) -> Option<f32> {
        if self.values.ndim() == 0 {
            self.values.first().copied()
        } else {
            None
        }
    }
}

/// Lazily backed (time, member, y, x) dataset
///
/// Assembled ensembles carry a member axis; reference data and ensemble means
/// do not (`members()` is `None` and the data has a single column). Every
/// operation returns a new value and leaves the receiver untouched.
#[derive(Debug, Clone)]
pub struct UnifiedDataset {
    variable: String,
    times: Vec<DateTime<Utc>>,
    members: Option<Vec<MemberId>>,
    grid: GridDescriptor,
    data: ChunkedArray,
}

impl UnifiedDataset {
    /// Assemble a dataset from already consistent parts
    pub fn new(
        variable: impl Into<String>,
        times: Vec<DateTime<Utc>>,
        members: Option<Vec<MemberId>>,
        grid: GridDescriptor,
        data: ChunkedArray,
    ) -> Result<Self> {
        let [nt, ncol, ny, nx] = data.shape();
        if times.len() != nt {
            return Err(EnsembleError::shape("time coordinate", &[nt], &[times.len()]));
        }
        if !is_strictly_increasing(&times) {
            return Err(EnsembleError::InvalidTime {
                reason: "time axis must be strictly increasing".to_string(),
            });
        }
        let expected_columns = members.as_ref().map_or(1, Vec::len);
        if ncol != expected_columns {
            return Err(EnsembleError::shape("member axis", &[expected_columns], &[ncol]));
        }
        let (gy, gx) = grid.shape();
        if (gy, gx) != (ny, nx) {
            return Err(EnsembleError::shape("spatial grid", &[gy, gx], &[ny, nx]));
        }
        Ok(Self {
            variable: variable.into(),
            times,
            members,
            grid,
            data,
        })
    }

    /// Wrap materialised (time, member, y, x) values
    pub fn from_array(
        variable: impl Into<String>,
        times: Vec<DateTime<Utc>>,
        members: Vec<MemberId>,
        grid: GridDescriptor,
        values: Array4<f32>,
    ) -> Result<Self> {
        Self::new(variable, times, Some(members), grid, ChunkedArray::from_array(values))
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    /// Member identifiers, or `None` when there is no member axis
    pub fn members(&self) -> Option<&[MemberId]> {
        self.members.as_deref()
    }

    pub fn grid(&self) -> &GridDescriptor {
        &self.grid
    }

    pub fn data(&self) -> &ChunkedArray {
        &self.data
    }

    /// (time, member, y, x); the member extent is 1 without a member axis
    pub fn shape(&self) -> [usize; 4] {
        self.data.shape()
    }

    pub fn n_chunks(&self) -> usize {
        self.data.n_chunks()
    }

    /// Axes of the computed array
    pub fn dims(&self) -> Vec<Dim> {
        if self.members.is_some() {
            vec![Dim::Time, Dim::Member, Dim::Y, Dim::X]
        } else {
            vec![Dim::Time, Dim::Y, Dim::X]
        }
    }

    /// Axis names with the grid's spatial naming (`lat`/`lon` or `y`/`x`)
    pub fn dim_names(&self) -> Vec<&'static str> {
        let [y, x] = self.grid.spatial_dims();
        let mut names = vec!["time"];
        if self.members.is_some() {
            names.push("member");
        }
        names.extend([y, x]);
        names
    }

    /// First and last time step
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.times.first()?, *self.times.last()?))
    }

    /// Keep time steps `range`
    pub fn slice_time(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.times.len());
        let range = range.start.min(end)..end;
        Self {
            variable: self.variable.clone(),
            times: self.times[range.clone()].to_vec(),
            members: self.members.clone(),
            grid: self.grid.clone(),
            data: self.data.slice_time(range),
        }
    }

    /// Keep time steps within `[start, end]`; may leave an empty time axis
    pub fn select_time(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let lo = self.times.partition_point(|t| *t < start);
        let hi = self.times.partition_point(|t| *t <= end).max(lo);
        self.slice_time(lo..hi)
    }

    /// Lazy NaN-skipping mean over the member axis
    pub fn ensemble_mean(&self) -> Self {
        if self.members.is_none() {
            return self.clone();
        }
        Self {
            variable: self.variable.clone(),
            times: self.times.clone(),
            members: None,
            grid: self.grid.clone(),
            data: self.data.mean_over_columns(),
        }
    }

    pub(crate) fn with_space(&self, grid: GridDescriptor, data: ChunkedArray) -> Self {
        Self {
            variable: self.variable.clone(),
            times: self.times.clone(),
            members: self.members.clone(),
            grid,
            data,
        }
    }

    pub(crate) fn with_time(&self, times: Vec<DateTime<Utc>>, data: ChunkedArray) -> Self {
        Self {
            variable: self.variable.clone(),
            times,
            members: self.members.clone(),
            grid: self.grid.clone(),
            data,
        }
    }

    /// Force evaluation of the whole graph
    pub fn compute(&self) -> Result<DataArray> {
        let values = self.data.compute()?;
        let values = if self.members.is_some() {
            values.into_dyn()
        } else {
            values.index_axis_move(Axis(1), 0).into_dyn()
        };
        DataArray::new(self.dims(), values)
    }
}

impl fmt::Display for UnifiedDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [nt, nm, ny, nx] = self.shape();
        let names = self.dim_names();
        writeln!(f, "Variable: {}", self.variable)?;
        writeln!(f, "Grid: {}", self.grid.kind())?;
        match &self.members {
            Some(members) => {
                let labels: Vec<&str> = members.iter().map(MemberId::label).collect();
                writeln!(f, "Dimensions: {:?} = ({}, {}, {}, {})", names, nt, nm, ny, nx)?;
                writeln!(f, "Members: {}", labels.join(", "))?;
            }
            None => writeln!(f, "Dimensions: {:?} = ({}, {}, {})", names, nt, ny, nx)?,
        }
        match self.time_range() {
            Some((start, end)) => writeln!(
                f,
                "Time: {} .. {} ({} steps)",
                format_datetime(&start),
                format_datetime(&end),
                nt
            )?,
            None => writeln!(f, "Time: empty")?,
        }
        write!(f, "Chunks: {}", self.n_chunks())
    }
}

/// Single-member ground truth without a member axis
#[derive(Debug, Clone)]
pub struct ReferenceDataset(UnifiedDataset);

impl ReferenceDataset {
    pub fn new(
        variable: impl Into<String>,
        times: Vec<DateTime<Utc>>,
        grid: GridDescriptor,
        data: ChunkedArray,
    ) -> Result<Self> {
        UnifiedDataset::new(variable, times, None, grid, data).map(Self)
    }

    /// Wrap materialised (time, y, x) values
    pub fn from_array(
        variable: impl Into<String>,
        times: Vec<DateTime<Utc>>,
        grid: GridDescriptor,
        values: Array3<f32>,
    ) -> Result<Self> {
        let values = values.insert_axis(Axis(1));
        Self::new(variable, times, grid, ChunkedArray::from_array(values))
    }

    pub fn dataset(&self) -> &UnifiedDataset {
        &self.0
    }

    pub fn into_dataset(self) -> UnifiedDataset {
        self.0
    }

    /// Relabel onto `grid` when the spatial shapes match exactly
    ///
    /// Values are not interpolated; cell (j, i) keeps its data and takes the
    /// coordinates of `grid` at (j, i).
    pub fn force_match_grid(&self, grid: &GridDescriptor) -> Result<Self> {
        let own = self.0.grid.shape();
        let target = grid.shape();
        if own != target {
            return Err(EnsembleError::shape(
                "reference grid relabelling",
                &[target.0, target.1],
                &[own.0, own.1],
            ));
        }
        Ok(Self(self.0.with_space(grid.clone(), self.0.data.clone())))
    }

    pub fn compute(&self) -> Result<DataArray> {
        self.0.compute()
    }
}

impl fmt::Display for ReferenceDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Datasets accepted by the subset, alignment and aggregation operations
pub trait DatasetLike: Sized {
    fn dataset(&self) -> &UnifiedDataset;

    /// Rebuild from a transformed dataset with the same member layout
    fn from_dataset(dataset: UnifiedDataset) -> Self;

    fn times(&self) -> &[DateTime<Utc>] {
        self.dataset().times()
    }

    fn grid(&self) -> &GridDescriptor {
        self.dataset().grid()
    }
}

impl DatasetLike for UnifiedDataset {
    fn dataset(&self) -> &UnifiedDataset {
        self
    }

    fn from_dataset(dataset: UnifiedDataset) -> Self {
        dataset
    }
}

impl DatasetLike for ReferenceDataset {
    fn dataset(&self) -> &UnifiedDataset {
        &self.0
    }

    fn from_dataset(dataset: UnifiedDataset) -> Self {
        debug_assert!(dataset.members.is_none());
        Self(dataset)
    }
}
