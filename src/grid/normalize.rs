//! Coordinate normalizer: turns whatever latitude/longitude fields a file
//! carries into a canonical [`GridDescriptor`].

use super::{GridDescriptor, LAT, LAT2D, LON, LON2D};
use crate::error::{EnsembleError, Result};
use ndarray::{ArrayD, Axis, Ix1, Ix2};
use std::collections::BTreeMap;

/// Candidate latitude variable names, tried in order
pub const DEFAULT_LAT_NAMES: &[&str] = &["lat", "latitude", "nav_lat", "XLAT", "lat2d"];
/// Candidate longitude variable names, tried in order
pub const DEFAULT_LON_NAMES: &[&str] = &["lon", "longitude", "nav_lon", "XLONG", "lon2d"];

/// A coordinate field exactly as found in a source file
#[derive(Debug, Clone, PartialEq)]
pub struct RawCoordinate {
    pub name: String,
    pub values: ArrayD<f64>,
}

impl RawCoordinate {
    pub fn new(name: impl Into<String>, values: ArrayD<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Strictly ascending or strictly descending, with no NaN
pub fn is_strictly_monotonic(values: &[f64]) -> bool {
    if values.iter().any(|v| v.is_nan()) {
        return false;
    }
    values.windows(2).all(|w| w[0] < w[1]) || values.windows(2).all(|w| w[0] > w[1])
}

/// Drop leading length-1 axes beyond the second, e.g. WRF's `XLAT(Time=1, y, x)`
fn squeeze_leading(mut values: ArrayD<f64>) -> ArrayD<f64> {
    while values.ndim() > 2 && values.shape()[0] == 1 {
        values = values.index_axis_move(Axis(0), 0);
    }
    values
}

/// Build the canonical grid for a pair of raw coordinate fields
///
/// 1D fields become the indexable `lat`/`lon` coordinates and must be
/// strictly monotonic. 2D fields become the auxiliary `lat2d`/`lon2d` fields
/// and carry no ordering requirement. Mixed ranks are rejected.
pub fn normalize_coordinates(lat: &RawCoordinate, lon: &RawCoordinate) -> Result<GridDescriptor> {
    let lat_values = squeeze_leading(lat.values.clone());
    let lon_values = squeeze_leading(lon.values.clone());

    if lat_values.ndim() != lon_values.ndim() {
        return Err(EnsembleError::IncompatibleGrid {
            reason: format!(
                "latitude '{}' has rank {} but longitude '{}' has rank {}",
                lat.name,
                lat_values.ndim(),
                lon.name,
                lon_values.ndim()
            ),
        });
    }

    let mut aliases = BTreeMap::new();
    let grid = match lat_values.ndim() {
        1 => {
            let lat_1d = lat_values
                .into_dimensionality::<Ix1>()
                .map_err(|e| incompatible(&lat.name, e))?;
            let lon_1d = lon_values
                .into_dimensionality::<Ix1>()
                .map_err(|e| incompatible(&lon.name, e))?;
            if !is_strictly_monotonic(&lat_1d.to_vec()) {
                return Err(EnsembleError::IncompatibleGrid {
                    reason: format!("latitude '{}' is not strictly monotonic", lat.name),
                });
            }
            if !is_strictly_monotonic(&lon_1d.to_vec()) {
                return Err(EnsembleError::IncompatibleGrid {
                    reason: format!("longitude '{}' is not strictly monotonic", lon.name),
                });
            }
            aliases.insert(lat.name.clone(), LAT.to_string());
            aliases.insert(lon.name.clone(), LON.to_string());
            GridDescriptor::regular(lat_1d, lon_1d)?
        }
        2 => {
            let lat_2d = lat_values
                .into_dimensionality::<Ix2>()
                .map_err(|e| incompatible(&lat.name, e))?;
            let lon_2d = lon_values
                .into_dimensionality::<Ix2>()
                .map_err(|e| incompatible(&lon.name, e))?;
            aliases.insert(lat.name.clone(), LAT2D.to_string());
            aliases.insert(lon.name.clone(), LON2D.to_string());
            GridDescriptor::irregular(lat_2d, lon_2d)?
        }
        rank => {
            return Err(EnsembleError::IncompatibleGrid {
                reason: format!(
                    "coordinates '{}'/'{}' have unsupported rank {}",
                    lat.name, lon.name, rank
                ),
            })
        }
    };

    Ok(grid.with_aliases(aliases))
}

fn incompatible(name: &str, error: ndarray::ShapeError) -> EnsembleError {
    EnsembleError::IncompatibleGrid {
        reason: format!("coordinate '{}': {}", name, error),
    }
}
