/// NetCDF plumbing shared by the reader and writer
use crate::error::{EnsembleError, Result};
use crate::io::is_netcdf_format;
use ndarray::{ArrayD, IxDyn};
use netcdf::AttributeValue;
use std::path::Path;

/// Fill value written for missing cells
pub const FILL_VALUE_F32: f32 = 1.0e20;

/// Open NetCDF file and validate it exists
pub fn open_netcdf_file(path: &Path) -> Result<netcdf::File> {
    if !path.exists() {
        return Err(EnsembleError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file not found: {}", path.display()),
        )));
    }
    if !is_netcdf_format(path)? {
        return Err(EnsembleError::InvalidFormat(format!(
            "not a NetCDF file: {}",
            path.display()
        )));
    }
    Ok(netcdf::open(path)?)
}

pub fn dimension_names(var: &netcdf::Variable) -> Vec<String> {
    var.dimensions().iter().map(|d| d.name()).collect()
}

pub fn variable_shape(var: &netcdf::Variable) -> Vec<usize> {
    var.dimensions().iter().map(|d| d.len()).collect()
}

/// Numeric attribute as f64, whatever its stored type
pub fn attribute_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    let value = var.attribute_value(name)?.ok()?;
    match value {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Longlong(v) => Some(v as f64),
        AttributeValue::Uint(v) => Some(v as f64),
        AttributeValue::Ushort(v) => Some(v as f64),
        AttributeValue::Schar(v) => Some(v as f64),
        AttributeValue::Uchar(v) => Some(v as f64),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|&x| x as f64),
        AttributeValue::Ints(v) => v.first().map(|&x| x as f64),
        AttributeValue::Shorts(v) => v.first().map(|&x| x as f64),
        _ => None,
    }
}

/// String attribute, if present and textual
pub fn attribute_string(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(s) => Some(s),
        AttributeValue::Strs(mut list) if !list.is_empty() => Some(list.remove(0)),
        _ => None,
    }
}

/// CF packing and missing-value attributes of one variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Packing {
    pub fill_value: Option<f64>,
    pub missing_value: Option<f64>,
    pub scale_factor: f64,
    pub add_offset: f64,
}

impl Default for Packing {
    fn default() -> Self {
        Self {
            fill_value: None,
            missing_value: None,
            scale_factor: 1.0,
            add_offset: 0.0,
        }
    }
}

impl Packing {
    pub fn of(var: &netcdf::Variable) -> Self {
        Self {
            fill_value: attribute_f64(var, "_FillValue"),
            missing_value: attribute_f64(var, "missing_value"),
            scale_factor: attribute_f64(var, "scale_factor").unwrap_or(1.0),
            add_offset: attribute_f64(var, "add_offset").unwrap_or(0.0),
        }
    }

    fn is_missing(&self, raw: f64) -> bool {
        raw.is_nan() || Some(raw) == self.fill_value || Some(raw) == self.missing_value
    }

    /// Raw stored value to physical value; missing markers become NaN
    pub fn decode(&self, raw: f64) -> f64 {
        if self.is_missing(raw) {
            f64::NAN
        } else {
            raw * self.scale_factor + self.add_offset
        }
    }

    pub fn decode_f32(&self, raw: f32) -> f32 {
        // Compare in the stored precision so f32 fill values match exactly
        let missing = |marker: Option<f64>| marker.is_some_and(|m| m as f32 == raw);
        if raw.is_nan() || missing(self.fill_value) || missing(self.missing_value) {
            f32::NAN
        } else {
            (raw as f64 * self.scale_factor + self.add_offset) as f32
        }
    }
}

/// Read a whole variable as decoded f64 values in its stored shape
pub fn read_decoded_f64(var: &netcdf::Variable) -> Result<ArrayD<f64>> {
    let shape = variable_shape(var);
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    let packing = Packing::of(var);
    let decoded: Vec<f64> = raw.into_iter().map(|v| packing.decode(v)).collect();
    ArrayD::from_shape_vec(IxDyn(&shape), decoded).map_err(|_| {
        EnsembleError::shape(format!("variable '{}'", var.name()), &shape, &[])
    })
}
