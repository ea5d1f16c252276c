//! Spatial subsetting of unified and reference datasets.
//!
//! Regular grids are cut to the index window whose coordinates fall in the
//! box, so the result keeps coordinate semantics. Irregular grids keep their
//! full (y, x) extent; cells outside the box are set to NaN through a mask
//! that is computed eagerly from `lat2d`/`lon2d` and shared by every chunk.

use crate::dataset::DatasetLike;
use crate::error::Result;
use crate::grid::{check_grid_alignment, GridCoords, SpatialBounds};
use ndarray::{Array1, Array2, Zip};
use std::ops::Range;
use std::sync::Arc;

/// Restrict a dataset to `bounds`
///
/// # Arguments
/// * `dataset` - Dataset to subset; left untouched
/// * `bounds` - Inclusive geographic box
///
/// # Returns
/// * `Result<D>` - Lazily subset dataset of the same kind
pub fn subset<D: DatasetLike>(dataset: &D, bounds: &SpatialBounds) -> Result<D> {
    let inner = dataset.dataset();
    let subset = match inner.grid().coords() {
        GridCoords::Regular { lat, lon } => {
            let rows = index_window(lat, bounds.lat_min, bounds.lat_max);
            let cols = index_window(lon, bounds.lon_min, bounds.lon_max);
            if rows.is_empty() || cols.is_empty() {
                log::warn!("no grid cell of '{}' lies within {}", inner.variable(), bounds);
            }
            log::debug!("regular subset rows {:?} cols {:?} for {}", rows, cols, bounds);

            let grid = inner.grid().slice_regular(rows.clone(), cols.clone())?;
            let data = inner
                .data()
                .map_space(rows.len(), cols.len(), |task| task.window(rows.clone(), cols.clone()));
            inner.with_space(grid, data)
        }
        GridCoords::Irregular { lat2d, lon2d } => {
            let keep = region_mask(lat2d, lon2d, bounds);
            let kept = keep.iter().filter(|&&k| k).count();
            if kept == 0 {
                log::warn!("no grid cell of '{}' lies within {}", inner.variable(), bounds);
            }
            log::debug!("irregular subset keeps {} of {} cells for {}", kept, keep.len(), bounds);

            let (ny, nx) = inner.grid().shape();
            let keep = Arc::new(keep);
            let data = inner.data().map_space(ny, nx, |task| task.mask(keep.clone()));
            inner.with_space(inner.grid().clone(), data)
        }
    };
    Ok(D::from_dataset(subset))
}

/// Restrict a dataset to the geographic extent of another grid
///
/// Mirrors cutting a model domain down to an observation domain before
/// comparing them.
pub fn subset_to_extent<D: DatasetLike, R: DatasetLike>(dataset: &D, reference: &R) -> Result<D> {
    let overlap = check_grid_alignment(dataset.grid(), reference.grid())?;
    if !overlap.overlaps() {
        log::warn!(
            "grids do not overlap (latitude: {}, longitude: {})",
            overlap.lat_overlap,
            overlap.lon_overlap
        );
    }
    let bounds = SpatialBounds::of(reference.grid())?;
    log::info!("subsetting to reference extent {}", bounds);
    subset(dataset, &bounds)
}

/// Concrete keep-mask over (y, x); NaN positions are never kept
pub fn region_mask(lat2d: &Array2<f64>, lon2d: &Array2<f64>, bounds: &SpatialBounds) -> Array2<bool> {
    let mut keep = Array2::from_elem(lat2d.raw_dim(), false);
    Zip::from(&mut keep)
        .and(lat2d)
        .and(lon2d)
        .for_each(|k, &lat, &lon| *k = bounds.contains(lat, lon));
    keep
}

/// Contiguous index range of a monotonic coordinate within `[min, max]`
fn index_window(coordinate: &Array1<f64>, min: f64, max: f64) -> Range<usize> {
    let inside: Vec<usize> = coordinate
        .iter()
        .enumerate()
        .filter(|(_, &v)| v >= min && v <= max)
        .map(|(i, _)| i)
        .collect();
    match (inside.first(), inside.last()) {
        (Some(&first), Some(&last)) => first..last + 1,
        _ => 0..0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ReferenceDataset, UnifiedDataset};
    use crate::grid::GridDescriptor;
    use crate::member::MemberId;
    use chrono::{TimeZone, Utc};
    use ndarray::{arr1, Array3, Array4};

    #[test]
    fn test_index_window_ascending_and_descending() {
        assert_eq!(index_window(&arr1(&[1.0, 2.0, 3.0, 4.0]), 1.5, 3.0), 1..3);
        assert_eq!(index_window(&arr1(&[4.0, 3.0, 2.0, 1.0]), 1.5, 3.0), 1..3);
        assert_eq!(index_window(&arr1(&[1.0, 2.0]), 5.0, 6.0), 0..0);
    }

    #[test]
    fn test_regular_subset_cuts_grid_and_data() {
        let grid = GridDescriptor::regular(arr1(&[45.0, 46.0, 47.0]), arr1(&[9.0, 10.0, 11.0, 12.0])).unwrap();
        let values = Array4::from_shape_fn((1, 2, 3, 4), |(_, m, j, i)| (m * 100 + j * 10 + i) as f32);
        let dataset = UnifiedDataset::from_array(
            "pr",
            vec![Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap()],
            vec![MemberId::new("00").unwrap(), MemberId::new("01").unwrap()],
            grid,
            values,
        )
        .unwrap();

        let bounds = SpatialBounds::new(45.5, 47.0, 10.0, 11.0).unwrap();
        let cut = subset(&dataset, &bounds).unwrap();
        assert_eq!(cut.shape(), [1, 2, 2, 2]);
        let computed = cut.compute().unwrap();
        assert_eq!(computed.values()[[0, 1, 0, 0]], 111.0);
        assert_eq!(computed.values()[[0, 0, 1, 1]], 22.0);
        assert_eq!(dataset.shape(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_irregular_subset_masks_without_shrinking() {
        let lat2d = Array2::from_shape_fn((2, 2), |(j, i)| 46.0 + j as f64 + 0.1 * i as f64);
        let lon2d = Array2::from_shape_fn((2, 2), |(j, i)| 10.0 + i as f64 + 0.1 * j as f64);
        let grid = GridDescriptor::irregular(lat2d, lon2d).unwrap();
        let reference = ReferenceDataset::from_array(
            "RR",
            vec![Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap()],
            grid,
            Array3::from_elem((1, 2, 2), 1.0),
        )
        .unwrap();

        let bounds = SpatialBounds::new(45.0, 46.5, 9.0, 10.5).unwrap();
        let cut = subset(&reference, &bounds).unwrap();
        let values = cut.compute().unwrap().into_values();
        assert_eq!(values.shape(), &[1, 2, 2]);
        assert_eq!(values[[0, 0, 0]], 1.0);
        assert!(values[[0, 0, 1]].is_nan());
        assert!(values[[0, 1, 0]].is_nan());
        assert!(values[[0, 1, 1]].is_nan());
    }

    #[test]
    fn test_mask_ignores_nan_coordinates() {
        let lat2d = Array2::from_shape_vec((1, 2), vec![f64::NAN, 46.0]).unwrap();
        let lon2d = Array2::from_shape_vec((1, 2), vec![10.0, 10.0]).unwrap();
        let bounds = SpatialBounds::new(45.0, 47.0, 9.0, 11.0).unwrap();
        let keep = region_mask(&lat2d, &lon2d, &bounds);
        assert_eq!(keep.iter().copied().collect::<Vec<_>>(), vec![false, true]);
    }
}
