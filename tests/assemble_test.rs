use chrono::{DateTime, Duration, TimeZone, Utc};
use ensgrid::grid::RawCoordinate;
use ensgrid::io::{InMemoryReader, MemoryFile};
use ensgrid::{AssemblyConfig, EnsembleAssembler, EnsembleError, GridKind, MemberOrder};
use ndarray::{arr1, Array2, Array3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

fn hours(start_hour: i64, count: i64) -> Vec<DateTime<Utc>> {
    let origin = Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap();
    (0..count).map(|h| origin + Duration::hours(start_hour + h)).collect()
}

/// Regular 3x4 file whose values encode (member, time, y, x)
fn member_file(member: u32, times: Vec<DateTime<Utc>>) -> MemoryFile {
    let nt = times.len();
    let values = Array3::from_shape_fn((nt, 3, 4), |(t, j, i)| (member * 1000 + t as u32 * 100 + j as u32 * 10 + i as u32) as f32);
    MemoryFile::new(
        RawCoordinate::new("latitude", arr1(&[46.0, 46.5, 47.0]).into_dyn()),
        RawCoordinate::new("longitude", arr1(&[9.0, 10.0, 11.0, 12.0]).into_dyn()),
        times,
    )
    .with_variable("tp", values)
}

fn reader_with_members(labels: &[&str]) -> (Arc<InMemoryReader>, Vec<PathBuf>) {
    let reader = Arc::new(InMemoryReader::new());
    let mut paths = Vec::new();
    for label in labels {
        let path = PathBuf::from(format!("/ens/tp_20160101_{}.nc", label));
        let number: u32 = label.parse().unwrap();
        reader.insert(path.clone(), member_file(number, hours(0, 6)));
        paths.push(path);
    }
    (reader, paths)
}

#[test]
fn test_assembly_is_discovery_order_independent() {
    let (reader, paths) = reader_with_members(&["00", "01", "02"]);
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader.clone()).unwrap();
    let expected = assembler.assemble_paths(&paths).unwrap();
    let expected_values = expected.compute().unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..5 {
        let mut shuffled = paths.clone();
        shuffled.shuffle(&mut rng);
        let dataset = assembler.assemble_paths(&shuffled).unwrap();

        let labels: Vec<&str> = dataset.members().unwrap().iter().map(|m| m.label()).collect();
        assert_eq!(labels, vec!["00", "01", "02"]);
        assert_eq!(dataset.times(), expected.times());
        assert_eq!(dataset.compute().unwrap(), expected_values);
    }
}

#[test]
fn test_assembled_layout_and_values() {
    let (reader, paths) = reader_with_members(&["02", "00", "01"]);
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader.clone()).unwrap();
    let dataset = assembler.assemble_paths(&paths).unwrap();

    assert_eq!(dataset.shape(), [6, 3, 3, 4]);
    assert_eq!(dataset.dim_names(), vec!["time", "member", "lat", "lon"]);
    assert_eq!(dataset.grid().kind(), GridKind::Regular1D);
    assert_eq!(dataset.variable(), "tp");
    assert_eq!(reader.value_reads(), 0);

    let values = dataset.compute().unwrap();
    assert_eq!(values.values()[[4, 2, 1, 3]], 2413.0);
    assert_eq!(values.values()[[0, 0, 0, 0]], 0.0);
    assert_eq!(reader.value_reads(), 3);
}

#[test]
fn test_numeric_and_lexical_member_order() {
    let (reader, paths) = reader_with_members(&["9", "10", "100"]);

    let numeric = EnsembleAssembler::new(AssemblyConfig::default(), reader.clone())
        .unwrap()
        .assemble_paths(&paths)
        .unwrap();
    let labels: Vec<&str> = numeric.members().unwrap().iter().map(|m| m.label()).collect();
    assert_eq!(labels, vec!["9", "10", "100"]);

    let config = AssemblyConfig {
        member_order: MemberOrder::Lexical,
        ..AssemblyConfig::default()
    };
    let lexical = EnsembleAssembler::new(config, reader.clone())
        .unwrap()
        .assemble_paths(&paths)
        .unwrap();
    let labels: Vec<&str> = lexical.members().unwrap().iter().map(|m| m.label()).collect();
    assert_eq!(labels, vec!["10", "100", "9"]);
}

#[test]
fn test_unparseable_member_name() {
    let reader = Arc::new(InMemoryReader::new());
    reader.insert("/ens/tp_control.nc", member_file(0, hours(0, 2)));
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader).unwrap();

    let err = assembler.assemble_paths(&[PathBuf::from("/ens/tp_control.nc")]).unwrap_err();
    assert!(matches!(err, EnsembleError::UnparseableMember { .. }));
}

#[test]
fn test_custom_member_pattern() {
    let reader = Arc::new(InMemoryReader::new());
    reader.insert("/ens/mem3/tp.nc", member_file(3, hours(0, 2)));
    reader.insert("/ens/mem4/tp.nc", member_file(4, hours(0, 2)));
    let config = AssemblyConfig::from_toml_str(r#"member_pattern = "^tp_m(\\d+)\\.nc$""#).unwrap();
    let assembler = EnsembleAssembler::new(config, reader.clone()).unwrap();

    // only the file name is matched, so directory-encoded members are rejected
    let paths = vec![PathBuf::from("/ens/mem3/tp.nc"), PathBuf::from("/ens/mem4/tp.nc")];
    assert!(matches!(
        assembler.assemble_paths(&paths).unwrap_err(),
        EnsembleError::UnparseableMember { .. }
    ));

    reader.insert("/ens/tp_m3.nc", member_file(3, hours(0, 2)));
    reader.insert("/ens/tp_m4.nc", member_file(4, hours(0, 2)));
    let dataset = assembler
        .assemble_paths(&[PathBuf::from("/ens/tp_m4.nc"), PathBuf::from("/ens/tp_m3.nc")])
        .unwrap();
    assert_eq!(dataset.members().unwrap()[0].label(), "3");
}

#[test]
fn test_time_mismatch_between_members() {
    let reader = Arc::new(InMemoryReader::new());
    reader.insert("/ens/tp_00.nc", member_file(0, hours(0, 6)));
    reader.insert("/ens/tp_01.nc", member_file(1, hours(1, 6)));
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader).unwrap();

    let paths = vec![PathBuf::from("/ens/tp_00.nc"), PathBuf::from("/ens/tp_01.nc")];
    match assembler.assemble_paths(&paths).unwrap_err() {
        EnsembleError::TimeMismatch { member, reference, .. } => {
            assert_eq!(member, "01");
            assert_eq!(reference, "00");
        }
        other => panic!("expected TimeMismatch, got {:?}", other),
    }
}

#[test]
fn test_member_spatial_shape_mismatch() {
    let reader = Arc::new(InMemoryReader::new());
    reader.insert("/ens/tp_00.nc", member_file(0, hours(0, 2)));
    let narrow = MemoryFile::new(
        RawCoordinate::new("latitude", arr1(&[46.0, 46.5, 47.0]).into_dyn()),
        RawCoordinate::new("longitude", arr1(&[9.0, 10.0]).into_dyn()),
        hours(0, 2),
    )
    .with_variable("tp", Array3::zeros((2, 3, 2)));
    reader.insert("/ens/tp_01.nc", narrow);
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader).unwrap();

    let paths = vec![PathBuf::from("/ens/tp_00.nc"), PathBuf::from("/ens/tp_01.nc")];
    let err = assembler.assemble_paths(&paths).unwrap_err();
    assert!(matches!(err, EnsembleError::ShapeMismatch { .. }), "{:?}", err);
    assert!(err.to_string().contains("tp_01.nc"));
}

#[test]
fn test_mixed_grid_kinds_are_incompatible() {
    let reader = Arc::new(InMemoryReader::new());
    reader.insert("/ens/tp_00.nc", member_file(0, hours(0, 2)));
    let lat2d = Array2::from_shape_fn((3, 4), |(j, _)| 46.0 + 0.5 * j as f64);
    let lon2d = Array2::from_shape_fn((3, 4), |(_, i)| 9.0 + i as f64);
    let curvilinear = MemoryFile::new(
        RawCoordinate::new("latitude", lat2d.into_dyn()),
        RawCoordinate::new("longitude", lon2d.into_dyn()),
        hours(0, 2),
    )
    .with_variable("tp", Array3::zeros((2, 3, 4)));
    reader.insert("/ens/tp_01.nc", curvilinear);
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader).unwrap();

    let paths = vec![PathBuf::from("/ens/tp_00.nc"), PathBuf::from("/ens/tp_01.nc")];
    let err = assembler.assemble_paths(&paths).unwrap_err();
    assert!(matches!(err, EnsembleError::IncompatibleGrid { .. }), "{:?}", err);
}

#[test]
fn test_irregular_members_stack() {
    let reader = Arc::new(InMemoryReader::new());
    let lat2d = Array2::from_shape_fn((2, 3), |(j, i)| 46.0 + j as f64 + 0.05 * i as f64);
    let lon2d = Array2::from_shape_fn((2, 3), |(j, i)| 9.0 + i as f64 + 0.05 * j as f64);
    for member in 0..2u32 {
        let file = MemoryFile::new(
            RawCoordinate::new("XLAT", lat2d.clone().into_dyn()),
            RawCoordinate::new("XLONG", lon2d.clone().into_dyn()),
            hours(0, 4),
        )
        .with_variable("RAIN", Array3::from_elem((4, 2, 3), member as f32));
        reader.insert(format!("/wrf/rain_{:03}.nc", member), file);
    }
    let assembler = EnsembleAssembler::new(AssemblyConfig::default(), reader).unwrap();
    let paths = vec![PathBuf::from("/wrf/rain_001.nc"), PathBuf::from("/wrf/rain_000.nc")];
    let dataset = assembler.assemble_paths(&paths).unwrap();

    assert_eq!(dataset.grid().kind(), GridKind::Irregular2D);
    assert_eq!(dataset.dim_names(), vec!["time", "member", "y", "x"]);
    assert_eq!(dataset.grid().index_coordinates().len(), 0);
    let values = dataset.compute().unwrap();
    assert_eq!(values.values()[[3, 1, 1, 2]], 1.0);
}

#[test]
fn test_glob_discovery() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["tp_20160101_02.nc", "tp_20160101_00.nc", "tp_20160101_01.nc", "notes.txt"] {
        File::create(dir.path().join(name)).unwrap();
    }
    std::fs::create_dir(dir.path().join("tp_20160101_99.nc")).unwrap();

    let assembler = EnsembleAssembler::netcdf(AssemblyConfig::default()).unwrap();
    let pattern = format!("{}/tp_*.nc", dir.path().display());
    let paths = assembler.discover_files(&pattern).unwrap();
    let names: Vec<String> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["tp_20160101_00.nc", "tp_20160101_01.nc", "tp_20160101_02.nc"]);

    let err = assembler
        .assemble(&format!("{}/pr_*.nc", dir.path().display()))
        .unwrap_err();
    assert!(matches!(err, EnsembleError::NoFilesFound { .. }));

    let err = assembler.discover_files("[unclosed").unwrap_err();
    assert!(matches!(err, EnsembleError::InvalidPattern(_)));
}
