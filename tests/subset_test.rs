use chrono::{TimeZone, Utc};
use ensgrid::grid::{GridCoords, GridDescriptor, SpatialBounds};
use ensgrid::subset::{region_mask, subset};
use ensgrid::{MemberId, ReferenceDataset, UnifiedDataset};
use ndarray::{Array1, Array2, Array3, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_bounds(rng: &mut StdRng) -> SpatialBounds {
    let lat_a = rng.random_range(40.0..52.0);
    let lat_b = rng.random_range(40.0..52.0);
    let lon_a = rng.random_range(5.0..20.0);
    let lon_b = rng.random_range(5.0..20.0);
    SpatialBounds::new(
        f64::min(lat_a, lat_b),
        f64::max(lat_a, lat_b),
        f64::min(lon_a, lon_b),
        f64::max(lon_a, lon_b),
    )
    .unwrap()
}

/// Monotonic axis with random spacing; descending when `flip`
fn random_axis(rng: &mut StdRng, start: f64, n: usize, flip: bool) -> Array1<f64> {
    let mut value = start;
    let mut axis: Vec<f64> = (0..n)
        .map(|_| {
            value += rng.random_range(0.1..1.0);
            value
        })
        .collect();
    if flip {
        axis.reverse();
    }
    Array1::from(axis)
}

#[test]
fn test_regular_subset_keeps_exactly_the_cells_in_the_box() {
    let mut rng = StdRng::seed_from_u64(7);
    let time = vec![Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap()];

    for case in 0..50 {
        let ny = rng.random_range(1..15);
        let nx = rng.random_range(1..15);
        let lat = random_axis(&mut rng, 40.0, ny, case % 2 == 0);
        let lon = random_axis(&mut rng, 5.0, nx, false);
        let grid = GridDescriptor::regular(lat.clone(), lon.clone()).unwrap();
        let values = Array4::from_shape_fn((1, 2, ny, nx), |(_, m, j, i)| (m * 10_000 + j * 100 + i) as f32);
        let members = vec![MemberId::new("00").unwrap(), MemberId::new("01").unwrap()];
        let dataset = UnifiedDataset::from_array("pr", time.clone(), members, grid, values).unwrap();

        let bounds = random_bounds(&mut rng);
        let cut = subset(&dataset, &bounds).unwrap();

        let expected_rows: Vec<usize> = (0..ny).filter(|&j| lat[j] >= bounds.lat_min && lat[j] <= bounds.lat_max).collect();
        let expected_cols: Vec<usize> = (0..nx).filter(|&i| lon[i] >= bounds.lon_min && lon[i] <= bounds.lon_max).collect();
        assert_eq!(cut.shape(), [1, 2, expected_rows.len(), expected_cols.len()]);

        let GridCoords::Regular { lat: cut_lat, lon: cut_lon } = cut.grid().coords() else {
            panic!("subset of a regular grid must stay regular");
        };
        assert!(cut_lat.iter().all(|&v| v >= bounds.lat_min && v <= bounds.lat_max));
        assert!(cut_lon.iter().all(|&v| v >= bounds.lon_min && v <= bounds.lon_max));

        let computed = cut.compute().unwrap();
        for (r, &j) in expected_rows.iter().enumerate() {
            for (c, &i) in expected_cols.iter().enumerate() {
                assert_eq!(computed.values()[[0, 1, r, c]], (10_000 + j * 100 + i) as f32);
            }
        }
    }
}

#[test]
fn test_irregular_subset_valid_cells_match_predicate() {
    let mut rng = StdRng::seed_from_u64(11);
    let time = vec![Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap()];

    for _ in 0..50 {
        let ny = rng.random_range(1..12);
        let nx = rng.random_range(1..12);
        // rotated, sheared grid with no separable axes
        let angle: f64 = rng.random_range(-0.5..0.5);
        let lat2d = Array2::from_shape_fn((ny, nx), |(j, i)| 40.0 + j as f64 * angle.cos() + i as f64 * angle.sin());
        let lon2d = Array2::from_shape_fn((ny, nx), |(j, i)| 5.0 + i as f64 * angle.cos() - j as f64 * angle.sin());
        let grid = GridDescriptor::irregular(lat2d.clone(), lon2d.clone()).unwrap();

        // some cells are already missing before the subset
        let values = Array3::from_shape_fn((1, ny, nx), |_| {
            if rng.random_bool(0.2) {
                f32::NAN
            } else {
                rng.random_range(0.0..10.0)
            }
        });
        let reference = ReferenceDataset::from_array("RR", time.clone(), grid, values.clone()).unwrap();

        let bounds = random_bounds(&mut rng);
        let cut = subset(&reference, &bounds).unwrap();
        let computed = cut.compute().unwrap().into_values();
        assert_eq!(computed.shape(), &[1, ny, nx]);

        let keep = region_mask(&lat2d, &lon2d, &bounds);
        for j in 0..ny {
            for i in 0..nx {
                let inside = bounds.contains(lat2d[[j, i]], lon2d[[j, i]]);
                assert_eq!(keep[[j, i]], inside);
                let value = computed[[0, j, i]];
                if inside {
                    let original = values[[0, j, i]];
                    assert!(value == original || (value.is_nan() && original.is_nan()));
                } else {
                    assert!(value.is_nan(), "cell ({}, {}) outside the box kept {}", j, i, value);
                }
            }
        }
    }
}

#[test]
fn test_empty_selection_is_not_an_error() {
    let grid = GridDescriptor::regular(Array1::from(vec![46.0, 47.0]), Array1::from(vec![10.0, 11.0])).unwrap();
    let reference = ReferenceDataset::from_array(
        "RR",
        vec![Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap()],
        grid,
        Array3::ones((1, 2, 2)),
    )
    .unwrap();
    let bounds = SpatialBounds::new(60.0, 61.0, 10.0, 11.0).unwrap();
    let cut = subset(&reference, &bounds).unwrap();
    assert_eq!(cut.dataset().shape(), [1, 1, 0, 2]);
    assert_eq!(cut.compute().unwrap().shape(), &[1, 0, 2]);
}
