use super::common::FILL_VALUE_F32;
use crate::dataset::DatasetLike;
use crate::error::{EnsembleError, Result};
use crate::grid::{GridCoords, GridKind, LAT, LAT2D, LON, LON2D};
use crate::time_utils::{CfTimeUnits, TimeUnit};
use chrono::{TimeZone, Utc};
use std::path::{Path, PathBuf};

/// Units of the time axis in written files
pub const OUTPUT_TIME_UNITS: &str = "hours since 1970-01-01 00:00:00";

/// NetCDF writer for unified and reference datasets
///
/// Forces the dataset's task graph and writes one CF-style file: a `time`
/// axis, an optional `member` axis, then either `lat`/`lon` coordinate
/// variables or `lat2d`/`lon2d` auxiliary fields over `y`/`x`.
#[derive(Debug, Clone)]
pub struct NetCDFWriter {
    pub file_path: PathBuf,
}

impl NetCDFWriter {
    /// Create a new NetCDF writer
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    pub fn write<D: DatasetLike>(&self, dataset: &D) -> Result<()> {
        let dataset = dataset.dataset();
        let values = dataset.compute()?;
        let [y_dim, x_dim] = dataset.grid().spatial_dims();
        let (ny, nx) = dataset.grid().shape();
        let nt = dataset.times().len();

        let mut file = netcdf::create(&self.file_path)?;

        file.add_dimension("time", nt)?;
        if let Some(members) = dataset.members() {
            file.add_dimension("member", members.len())?;
        }
        file.add_dimension(y_dim, ny)?;
        file.add_dimension(x_dim, nx)?;

        file.add_attribute("Conventions", "CF-1.8")?;
        file.add_attribute("source", "ensgrid")?;
        let creation_time = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        file.add_attribute("history", format!("Created on {}", creation_time))?;

        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).single().ok_or_else(|| {
            EnsembleError::InvalidTime {
                reason: "cannot build output time origin".to_string(),
            }
        })?;
        let units = CfTimeUnits::new(TimeUnit::Hours, epoch);
        {
            let time_values: Vec<f64> = dataset.times().iter().map(|t| units.encode(t)).collect();
            let mut time_var = file.add_variable::<f64>("time", &["time"])?;
            time_var.put_attribute("units", OUTPUT_TIME_UNITS)?;
            time_var.put_attribute("calendar", "standard")?;
            time_var.put_attribute("standard_name", "time")?;
            if nt > 0 {
                time_var.put_values(&time_values, ..)?;
            }
        }

        if let Some(members) = dataset.members() {
            let numbers: Vec<i64> = members.iter().map(|m| m.number() as i64).collect();
            let labels: Vec<&str> = members.iter().map(|m| m.label()).collect();
            let mut member_var = file.add_variable::<i64>("member", &["member"])?;
            member_var.put_attribute("long_name", "ensemble member")?;
            member_var.put_attribute("labels", labels.join(","))?;
            member_var.put_values(&numbers, ..)?;
        }

        match dataset.grid().coords() {
            GridCoords::Regular { lat, lon } => {
                add_coordinate(&mut file, LAT, &[LAT], &lat.to_vec(), "latitude", "degrees_north")?;
                add_coordinate(&mut file, LON, &[LON], &lon.to_vec(), "longitude", "degrees_east")?;
            }
            GridCoords::Irregular { lat2d, lon2d } => {
                let lat_values: Vec<f64> = lat2d.iter().copied().collect();
                let lon_values: Vec<f64> = lon2d.iter().copied().collect();
                add_coordinate(&mut file, LAT2D, &["y", "x"], &lat_values, "latitude", "degrees_north")?;
                add_coordinate(&mut file, LON2D, &["y", "x"], &lon_values, "longitude", "degrees_east")?;
            }
        }

        let mut dims = vec!["time"];
        if dataset.members().is_some() {
            dims.push("member");
        }
        dims.extend([y_dim, x_dim]);

        let mut data_var = file.add_variable::<f32>(dataset.variable(), &dims)?;
        data_var.put_attribute("_FillValue", FILL_VALUE_F32)?;
        if dataset.grid().kind() == GridKind::Irregular2D {
            data_var.put_attribute("coordinates", format!("{} {}", LAT2D, LON2D))?;
        }
        if !values.values().is_empty() {
            let data: Vec<f32> = values
                .values()
                .iter()
                .map(|&v| if v.is_nan() { FILL_VALUE_F32 } else { v })
                .collect();
            data_var.put_values(&data, ..)?;
        }

        log::info!(
            "wrote '{}' {:?} to {}",
            dataset.variable(),
            values.shape(),
            self.file_path.display()
        );
        Ok(())
    }
}

fn add_coordinate(
    file: &mut netcdf::FileMut,
    name: &str,
    dims: &[&str],
    values: &[f64],
    standard_name: &str,
    units: &str,
) -> Result<()> {
    let mut var = file.add_variable::<f64>(name, dims)?;
    var.put_attribute("units", units)?;
    var.put_attribute("standard_name", standard_name)?;
    if !values.is_empty() {
        var.put_values(values, ..)?;
    }
    Ok(())
}
