//! Spatial grid descriptors.
//!
//! A grid is either regular, with separable 1D `lat`/`lon` index coordinates,
//! or irregular, where every cell carries its own position in the auxiliary
//! `lat2d`/`lon2d` fields and the spatial axes are bare `y`/`x` indices.

pub mod normalize;

pub use normalize::*;

use crate::error::{EnsembleError, Result};
use ndarray::{s, Array1, Array2};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Canonical names of the spatial fields
pub const LAT: &str = "lat";
pub const LON: &str = "lon";
pub const LAT2D: &str = "lat2d";
pub const LON2D: &str = "lon2d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKind {
    Regular1D,
    Irregular2D,
}

impl fmt::Display for GridKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GridKind::Regular1D => f.write_str("regular (1D lat/lon)"),
            GridKind::Irregular2D => f.write_str("irregular (2D lat/lon)"),
        }
    }
}

/// Coordinate payload of a grid
#[derive(Debug, Clone, PartialEq)]
pub enum GridCoords {
    /// `lat` has length Ny, `lon` has length Nx; both strictly monotonic
    Regular { lat: Array1<f64>, lon: Array1<f64> },
    /// `lat2d`/`lon2d` both have shape (Ny, Nx)
    Irregular { lat2d: Array2<f64>, lon2d: Array2<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridDescriptor {
    coords: GridCoords,
    /// Source variable name -> canonical name
    aliases: BTreeMap<String, String>,
}

impl GridDescriptor {
    /// Regular grid; both axes must be strictly monotonic
    pub fn regular(lat: Array1<f64>, lon: Array1<f64>) -> Result<Self> {
        for (name, axis) in [(LAT, &lat), (LON, &lon)] {
            if !is_strictly_monotonic(&axis.to_vec()) {
                return Err(EnsembleError::IncompatibleGrid {
                    reason: format!("1D coordinate '{}' is not strictly monotonic", name),
                });
            }
        }
        Ok(Self {
            coords: GridCoords::Regular { lat, lon },
            aliases: BTreeMap::new(),
        })
    }

    /// Irregular grid; both fields must share one (Ny, Nx) shape
    pub fn irregular(lat2d: Array2<f64>, lon2d: Array2<f64>) -> Result<Self> {
        if lat2d.shape() != lon2d.shape() {
            return Err(EnsembleError::IncompatibleGrid {
                reason: format!(
                    "2D latitude shape {:?} differs from longitude shape {:?}",
                    lat2d.shape(),
                    lon2d.shape()
                ),
            });
        }
        Ok(Self {
            coords: GridCoords::Irregular { lat2d, lon2d },
            aliases: BTreeMap::new(),
        })
    }

    pub fn with_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn kind(&self) -> GridKind {
        match self.coords {
            GridCoords::Regular { .. } => GridKind::Regular1D,
            GridCoords::Irregular { .. } => GridKind::Irregular2D,
        }
    }

    pub fn coords(&self) -> &GridCoords {
        &self.coords
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// (Ny, Nx)
    pub fn shape(&self) -> (usize, usize) {
        match &self.coords {
            GridCoords::Regular { lat, lon } => (lat.len(), lon.len()),
            GridCoords::Irregular { lat2d, .. } => (lat2d.nrows(), lat2d.ncols()),
        }
    }

    /// Names of the two spatial dimensions
    pub fn spatial_dims(&self) -> [&'static str; 2] {
        match self.kind() {
            GridKind::Regular1D => [LAT, LON],
            GridKind::Irregular2D => ["y", "x"],
        }
    }

    /// Fields usable as indexable (join) coordinates
    ///
    /// Irregular grids register none: their 2D fields are auxiliary only.
    pub fn index_coordinates(&self) -> &'static [&'static str] {
        match self.kind() {
            GridKind::Regular1D => &[LAT, LON],
            GridKind::Irregular2D => &[],
        }
    }

    /// Non-index spatial fields carried alongside the data
    pub fn auxiliary_fields(&self) -> &'static [&'static str] {
        match self.kind() {
            GridKind::Regular1D => &[],
            GridKind::Irregular2D => &[LAT2D, LON2D],
        }
    }

    /// Latitude of cell (j, i)
    pub fn lat_at(&self, j: usize, i: usize) -> f64 {
        match &self.coords {
            GridCoords::Regular { lat, .. } => lat[j],
            GridCoords::Irregular { lat2d, .. } => lat2d[[j, i]],
        }
    }

    /// Longitude of cell (j, i)
    pub fn lon_at(&self, j: usize, i: usize) -> f64 {
        match &self.coords {
            GridCoords::Regular { lon, .. } => lon[i],
            GridCoords::Irregular { lon2d, .. } => lon2d[[j, i]],
        }
    }

    /// Same kind, shape and coordinate values (NaN positions must coincide)
    pub fn same_coordinates(&self, other: &GridDescriptor) -> bool {
        fn same(a: f64, b: f64) -> bool {
            a == b || (a.is_nan() && b.is_nan())
        }
        match (&self.coords, &other.coords) {
            (
                GridCoords::Regular { lat: a_lat, lon: a_lon },
                GridCoords::Regular { lat: b_lat, lon: b_lon },
            ) => {
                a_lat.len() == b_lat.len()
                    && a_lon.len() == b_lon.len()
                    && a_lat.iter().zip(b_lat.iter()).all(|(&a, &b)| same(a, b))
                    && a_lon.iter().zip(b_lon.iter()).all(|(&a, &b)| same(a, b))
            }
            (
                GridCoords::Irregular { lat2d: a_lat, lon2d: a_lon },
                GridCoords::Irregular { lat2d: b_lat, lon2d: b_lon },
            ) => {
                a_lat.shape() == b_lat.shape()
                    && a_lat.iter().zip(b_lat.iter()).all(|(&a, &b)| same(a, b))
                    && a_lon.iter().zip(b_lon.iter()).all(|(&a, &b)| same(a, b))
            }
            _ => false,
        }
    }

    /// Row/column window of a regular grid
    pub(crate) fn slice_regular(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        match &self.coords {
            GridCoords::Regular { lat, lon } => Ok(Self {
                coords: GridCoords::Regular {
                    lat: lat.slice(s![rows]).to_owned(),
                    lon: lon.slice(s![cols]).to_owned(),
                },
                aliases: self.aliases.clone(),
            }),
            GridCoords::Irregular { .. } => Err(EnsembleError::IncompatibleGrid {
                reason: "index slicing requires a regular grid".to_string(),
            }),
        }
    }
}

/// Geographic bounding box, inclusive on every edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl SpatialBounds {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Result<Self> {
        let any_nan = [lat_min, lat_max, lon_min, lon_max].iter().any(|v| v.is_nan());
        if any_nan || lat_min > lat_max || lon_min > lon_max {
            return Err(EnsembleError::Config(format!(
                "invalid bounding box lat [{}, {}] lon [{}, {}]",
                lat_min, lat_max, lon_min, lon_max
            )));
        }
        Ok(Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        })
    }

    /// Extent of a grid; NaN coordinates are ignored
    pub fn of(grid: &GridDescriptor) -> Result<Self> {
        let (lat, lon): (Vec<f64>, Vec<f64>) = match grid.coords() {
            GridCoords::Regular { lat, lon } => (lat.to_vec(), lon.to_vec()),
            GridCoords::Irregular { lat2d, lon2d } => (
                lat2d.iter().copied().collect(),
                lon2d.iter().copied().collect(),
            ),
        };
        let (lat_min, lat_max) = finite_extent(&lat).ok_or_else(|| EnsembleError::IncompatibleGrid {
            reason: "grid has no finite latitude".to_string(),
        })?;
        let (lon_min, lon_max) = finite_extent(&lon).ok_or_else(|| EnsembleError::IncompatibleGrid {
            reason: "grid has no finite longitude".to_string(),
        })?;
        Self::new(lat_min, lat_max, lon_min, lon_max)
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }

    pub fn overlap(&self, other: &SpatialBounds) -> GridOverlap {
        GridOverlap {
            lat_overlap: self.lat_min <= other.lat_max && self.lat_max >= other.lat_min,
            lon_overlap: self.lon_min <= other.lon_max && self.lon_max >= other.lon_min,
        }
    }
}

impl fmt::Display for SpatialBounds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "lat [{:.4}, {:.4}] lon [{:.4}, {:.4}]",
            self.lat_min, self.lat_max, self.lon_min, self.lon_max
        )
    }
}

fn finite_extent(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridOverlap {
    pub lat_overlap: bool,
    pub lon_overlap: bool,
}

impl GridOverlap {
    pub fn overlaps(&self) -> bool {
        self.lat_overlap && self.lon_overlap
    }
}

/// Check whether the extents of two grids intersect
pub fn check_grid_alignment(a: &GridDescriptor, b: &GridDescriptor) -> Result<GridOverlap> {
    let bounds_a = SpatialBounds::of(a)?;
    let bounds_b = SpatialBounds::of(b)?;
    let overlap = bounds_a.overlap(&bounds_b);

    log::debug!("grid A bounds: {}", bounds_a);
    log::debug!("grid B bounds: {}", bounds_b);
    log::debug!(
        "latitude overlap: {}, longitude overlap: {}",
        overlap.lat_overlap,
        overlap.lon_overlap
    );

    Ok(overlap)
}
