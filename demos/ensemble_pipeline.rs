/// Demonstration of the ensemble unification pipeline
///
/// Builds a small synthetic five-member precipitation ensemble on a rotated
/// (2D lat/lon) grid, plus a reference analysis, then walks through assembly,
/// subsetting, alignment, aggregation and bias scoring. Results are written
/// to a temporary NetCDF file.

use chrono::{Duration, TimeZone, Utc};
use ensgrid::data_io::{load_reference_with, DatasetKind, NetCDFWriter};
use ensgrid::grid::RawCoordinate;
use ensgrid::io::{InMemoryReader, MemoryFile};
use ensgrid::math::dataset_bias_metrics;
use ensgrid::subset::subset_to_extent;
use ensgrid::temporal::align_pair;
use ensgrid::{
    aggregate_to_period, subset, AlignMode, AssemblyConfig, Dim, EnsembleAssembler, Period,
    SpatialBounds,
};
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> ensgrid::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("=== Ensemble Pipeline Demonstration ===\n");

    let (ny, nx) = (20, 30);
    let angle: f64 = 0.2;
    let lat2d = Array2::from_shape_fn((ny, nx), |(j, i)| 46.0 + 0.1 * (j as f64 * angle.cos() + i as f64 * angle.sin()));
    let lon2d = Array2::from_shape_fn((ny, nx), |(j, i)| 9.0 + 0.15 * (i as f64 * angle.cos() - j as f64 * angle.sin()));
    let start = Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).single().unwrap_or_default();

    // 10 days of 6-hourly fields, split into one file per day and member
    let reader = Arc::new(InMemoryReader::new());
    let mut paths: Vec<PathBuf> = Vec::new();
    for member in 0..5u32 {
        for day in 0..10i64 {
            let times = (0..4).map(|s| start + Duration::hours(24 * day + 6 * s)).collect();
            let values = Array3::from_shape_fn((4, ny, nx), |(s, j, i)| {
                let wave = ((j + i) as f32 * 0.3 + day as f32 + s as f32 * 0.25).sin();
                (1.0 + wave).max(0.0) * (1.0 + 0.1 * member as f32)
            });
            let file = MemoryFile::new(
                RawCoordinate::new("XLAT", lat2d.clone().into_dyn()),
                RawCoordinate::new("XLONG", lon2d.clone().into_dyn()),
                times,
            )
            .with_variable("RAIN", values);
            let path = PathBuf::from(format!("/synthetic/wrf_2016010{}_{:02}.nc", day, member));
            reader.insert(path.clone(), file);
            paths.push(path);
        }
    }

    // reference on the same grid, starting two days later
    let reference_times = (0..40).map(|s| start + Duration::hours(48 + 6 * s)).collect();
    let reference_values = Array3::from_shape_fn((40, ny, nx), |(s, j, i)| {
        (1.0 + ((j + i) as f32 * 0.3 + s as f32 * 0.25).sin()).max(0.0)
    });
    reader.insert(
        "/synthetic/inca_RR.nc",
        MemoryFile::new(
            RawCoordinate::new("lat", lat2d.into_dyn()),
            RawCoordinate::new("lon", lon2d.into_dyn()),
            reference_times,
        )
        .with_variable("RR", reference_values),
    );

    println!("1. Assembly");
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader.clone())?;
    let ensemble = assembler.assemble_paths(&paths)?;
    println!("{}\n", ensemble);

    println!("2. Reference");
    let reference = load_reference_with(reader.clone(), Path::new("/synthetic/inca_RR.nc"), DatasetKind::Inca, None)?;
    println!("{}\n", reference);

    println!("3. Subset to a box and to the reference extent");
    let bounds = SpatialBounds::new(46.5, 47.5, 9.5, 12.0)?;
    let boxed = subset(&ensemble, &bounds)?;
    let extent = subset_to_extent(&ensemble, &reference)?;
    println!("Box subset shape {:?}, extent subset shape {:?}\n", boxed.shape(), extent.shape());

    println!("4. Temporal alignment");
    let (ensemble, reference) = align_pair(&extent, &reference, AlignMode::Intersection)?;
    println!("Common steps: {}\n", ensemble.times().len());

    println!("5. Daily aggregation and bias");
    let forecast = aggregate_to_period(&ensemble, Period::Daily, true);
    let observed = aggregate_to_period(&reference, Period::Daily, true).force_match_grid(forecast.grid())?;
    println!("Values read before compute: {}", reader.value_reads());

    let total = dataset_bias_metrics(&forecast, &observed, &[Dim::Time, Dim::Y, Dim::X])?;
    println!("Domain and period:\n{}", total);
    let per_day = dataset_bias_metrics(&forecast, &observed, &[Dim::Y, Dim::X])?;
    println!("Per day:\n{}\n", per_day);

    let output = std::env::temp_dir().join("ensgrid_demo_daily_mean.nc");
    NetCDFWriter::new(&output).write(&forecast)?;
    println!("Daily ensemble mean written to {}", output.display());
    println!("\n=== Demonstration Complete ===");
    Ok(())
}
