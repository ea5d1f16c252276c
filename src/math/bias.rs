use crate::assemble::describe_time_difference;
use crate::dataset::{DataArray, DatasetLike, Dim};
use crate::error::{EnsembleError, Result};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use std::collections::BTreeMap;
use std::fmt;

/// Error statistic of forecast minus reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BiasMetric {
    /// Mean error
    Me,
    /// Mean absolute error
    Mae,
    /// Root mean squared error
    Rmse,
}

impl BiasMetric {
    pub const ALL: [BiasMetric; 3] = [BiasMetric::Me, BiasMetric::Mae, BiasMetric::Rmse];
}

impl fmt::Display for BiasMetric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BiasMetric::Me => f.write_str("ME"),
            BiasMetric::Mae => f.write_str("MAE"),
            BiasMetric::Rmse => f.write_str("RMSE"),
        }
    }
}

/// Metric name -> array over the dimensions that were not reduced
#[derive(Debug, Clone, PartialEq)]
pub struct BiasMetricResult {
    metrics: BTreeMap<BiasMetric, DataArray>,
}

impl BiasMetricResult {
    pub fn get(&self, metric: BiasMetric) -> Option<&DataArray> {
        self.metrics.get(&metric)
    }

    /// Value of a fully reduced metric
    pub fn scalar(&self, metric: BiasMetric) -> Option<f32> {
        self.get(metric).and_then(DataArray::scalar)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BiasMetric, &DataArray)> {
        self.metrics.iter().map(|(metric, array)| (*metric, array))
    }
}

impl fmt::Display for BiasMetricResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (index, (metric, array)) in self.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            match array.scalar() {
                Some(value) => write!(f, "{}: {:.4}", metric, value)?,
                None => {
                    let dims: Vec<String> = array.dims().iter().map(Dim::to_string).collect();
                    let values = array.values().iter().map(|&v| v as f64);
                    write!(
                        f,
                        "{}: array over {:?} {:?}, mean {:.4}",
                        metric,
                        dims,
                        array.shape(),
                        super::nan_mean(values)
                    )?
                }
            }
        }
        Ok(())
    }
}

/// Compute ME, MAE and RMSE of `forecast - reference` over `dims`
///
/// Inputs are matched by dimension name, not position; a dimension missing
/// from one input, or of extent 1 there, is broadcast. Every other extent
/// must agree. NaN in either input makes that cell's difference missing and
/// missing differences are left out of the means.
///
/// # Arguments
/// * `forecast` - Forecast values, e.g. (time, member, y, x)
/// * `reference` - Reference values, e.g. (time, y, x)
/// * `dims` - Dimensions to reduce over
///
/// # Returns
/// * `Result<BiasMetricResult>` - Metrics over the remaining dimensions
pub fn compute_all_bias_metrics(
    forecast: &DataArray,
    reference: &DataArray,
    dims: &[Dim],
) -> Result<BiasMetricResult> {
    let mut union: Vec<Dim> = forecast.dims().to_vec();
    union.extend(reference.dims().iter().copied().filter(|d| !forecast.dims().contains(d)));

    if let Some(missing) = dims.iter().find(|d| !union.contains(d)) {
        return Err(EnsembleError::MissingDimension(format!(
            "cannot reduce over '{}': inputs have {:?}",
            missing,
            union.iter().map(Dim::to_string).collect::<Vec<_>>()
        )));
    }

    let f = expand_to(forecast, &union);
    let r = expand_to(reference, &union);
    let shape = broadcast_shape(f.shape(), r.shape(), &union)?;
    let f = f
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| EnsembleError::shape("forecast broadcast", &shape, forecast.shape()))?;
    let r = r
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| EnsembleError::shape("reference broadcast", &shape, reference.shape()))?;

    let diff: ArrayD<f64> = Zip::from(&f).and(&r).map_collect(|&a, &b| a as f64 - b as f64);

    let kept: Vec<usize> = (0..union.len()).filter(|&i| !dims.contains(&union[i])).collect();
    let reduced: Vec<usize> = (0..union.len()).filter(|&i| dims.contains(&union[i])).collect();
    let kept_shape: Vec<usize> = kept.iter().map(|&i| shape[i]).collect();
    let kept_len: usize = kept_shape.iter().product();
    let reduced_len: usize = reduced.iter().map(|&i| shape[i]).product();

    let order: Vec<usize> = kept.iter().chain(reduced.iter()).copied().collect();
    let rows = diff
        .permuted_axes(IxDyn(&order))
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((kept_len, reduced_len))
        .map_err(|_| EnsembleError::shape("metric reduction", &[kept_len, reduced_len], &shape))?;

    let kept_dims: Vec<Dim> = kept.iter().map(|&i| union[i]).collect();
    let mut metrics = BTreeMap::new();
    for metric in BiasMetric::ALL {
        let values: Vec<f32> = rows
            .axis_iter(Axis(0))
            .map(|row| reduce_row(row.iter().copied(), metric) as f32)
            .collect();
        let values = ArrayD::from_shape_vec(IxDyn(&kept_shape), values)
            .map_err(|_| EnsembleError::shape(format!("{} result", metric), &kept_shape, &[kept_len]))?;
        metrics.insert(metric, DataArray::new(kept_dims.clone(), values)?);
    }

    log::debug!(
        "bias metrics over {:?} of {:?}, result dims {:?}",
        dims,
        shape,
        kept_dims
    );
    Ok(BiasMetricResult { metrics })
}

/// Force two datasets and compute their bias metrics
///
/// Both must carry the same time coordinate, step for step; align and
/// aggregate them first.
pub fn dataset_bias_metrics<F: DatasetLike, R: DatasetLike>(
    forecast: &F,
    reference: &R,
    dims: &[Dim],
) -> Result<BiasMetricResult> {
    if let Some(detail) = describe_time_difference(forecast.times(), reference.times()) {
        return Err(EnsembleError::TimeMismatch {
            member: forecast.dataset().variable().to_string(),
            reference: reference.dataset().variable().to_string(),
            detail,
        });
    }
    let forecast = forecast.dataset().compute()?;
    let reference = reference.dataset().compute()?;
    compute_all_bias_metrics(&forecast, &reference, dims)
}

fn reduce_row(diffs: impl Iterator<Item = f64>, metric: BiasMetric) -> f64 {
    match metric {
        BiasMetric::Me => super::nan_mean(diffs),
        BiasMetric::Mae => super::nan_mean(diffs.map(f64::abs)),
        BiasMetric::Rmse => super::nan_mean(diffs.map(|d| d * d)).sqrt(),
    }
}

/// View of `array` with axes in `union` order, length-1 axes for absent dims
fn expand_to<'a>(array: &'a DataArray, union: &[Dim]) -> ArrayViewD<'a, f32> {
    let order: Vec<usize> = union.iter().filter_map(|d| array.axis_of(*d)).collect();
    let mut view = array.values().view().permuted_axes(IxDyn(&order));
    for (position, dim) in union.iter().enumerate() {
        if array.axis_of(*dim).is_none() {
            view = view.insert_axis(Axis(position));
        }
    }
    view
}

fn broadcast_shape(a: &[usize], b: &[usize], dims: &[Dim]) -> Result<Vec<usize>> {
    a.iter()
        .zip(b)
        .zip(dims)
        .map(|((&x, &y), dim)| match (x, y) {
            _ if x == y => Ok(x),
            (1, _) => Ok(y),
            (_, 1) => Ok(x),
            _ => Err(EnsembleError::shape(format!("dimension '{}' of forecast and reference", dim), &[x], &[y])),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ReferenceDataset;
    use crate::grid::GridDescriptor;
    use crate::time_utils::parse_datetime;
    use chrono::Duration;
    use ndarray::{arr1, Array, Array3};

    fn series(values: &[f32]) -> DataArray {
        DataArray::new(vec![Dim::Time], arr1(values).into_dyn()).unwrap()
    }

    #[test]
    fn test_scalar_metrics() {
        let result = compute_all_bias_metrics(&series(&[1.0, 2.0, 3.0]), &series(&[1.0, 1.0, 1.0]), &[Dim::Time]).unwrap();
        assert!((result.scalar(BiasMetric::Me).unwrap() - 1.0).abs() < 1e-6);
        assert!((result.scalar(BiasMetric::Mae).unwrap() - 1.0).abs() < 1e-6);
        let rmse = result.scalar(BiasMetric::Rmse).unwrap();
        assert!((rmse - (5.0f32 / 3.0).sqrt()).abs() < 1e-5);
        assert!((rmse - 1.291).abs() < 1e-3);
    }

    #[test]
    fn test_missing_values_are_skipped() {
        let result =
            compute_all_bias_metrics(&series(&[1.0, f32::NAN, 4.0]), &series(&[0.0, 1.0, f32::NAN]), &[Dim::Time]).unwrap();
        assert_eq!(result.scalar(BiasMetric::Me), Some(1.0));
        assert_eq!(result.scalar(BiasMetric::Rmse), Some(1.0));
    }

    #[test]
    fn test_reference_broadcast_over_members() {
        // forecast (time, member, x), reference (time, x)
        let forecast = DataArray::new(
            vec![Dim::Time, Dim::Member, Dim::X],
            Array::from_shape_fn((2, 3, 2), |(_, m, _)| m as f32).into_dyn(),
        )
        .unwrap();
        let reference = DataArray::new(vec![Dim::X, Dim::Time], Array::zeros((2, 2)).into_dyn()).unwrap();

        let result = compute_all_bias_metrics(&forecast, &reference, &[Dim::Time, Dim::X]).unwrap();
        let me = result.get(BiasMetric::Me).unwrap();
        assert_eq!(me.dims(), &[Dim::Member]);
        assert_eq!(me.values().iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);
        assert!(result.scalar(BiasMetric::Me).is_none());
    }

    #[test]
    fn test_unknown_dimension_and_shape_errors() {
        let err = compute_all_bias_metrics(&series(&[1.0]), &series(&[1.0]), &[Dim::Member]).unwrap_err();
        assert!(matches!(err, EnsembleError::MissingDimension(_)));

        let err = compute_all_bias_metrics(&series(&[1.0, 2.0]), &series(&[1.0, 2.0, 3.0]), &[Dim::Time]).unwrap_err();
        assert!(matches!(err, EnsembleError::ShapeMismatch { .. }));
    }

    fn daily_reference(first: &str, days: i64, value: f32) -> ReferenceDataset {
        let start = parse_datetime(first).unwrap();
        let times = (0..days).map(|d| start + Duration::days(d)).collect();
        let grid = GridDescriptor::regular(arr1(&[47.0, 48.0]), arr1(&[11.0])).unwrap();
        let values = Array3::from_elem((days as usize, 2, 1), value);
        ReferenceDataset::from_array("RR", times, grid, values).unwrap()
    }

    #[test]
    fn test_datasets_must_share_time_steps() {
        let forecast = daily_reference("2016-01-01", 2, 2.0);
        let same_days = daily_reference("2016-01-01", 2, 1.0);
        let result = dataset_bias_metrics(&forecast, &same_days, &[Dim::Time, Dim::Y, Dim::X]).unwrap();
        assert_eq!(result.scalar(BiasMetric::Me), Some(1.0));

        // same number of steps on other dates
        let later = daily_reference("2016-01-06", 2, 1.0);
        let err = dataset_bias_metrics(&forecast, &later, &[Dim::Time, Dim::Y, Dim::X]).unwrap_err();
        assert!(matches!(err, EnsembleError::TimeMismatch { .. }), "{:?}", err);

        // a single step is not stretched over the whole forecast
        let single = daily_reference("2016-01-01", 1, 1.0);
        let err = dataset_bias_metrics(&forecast, &single, &[Dim::Time, Dim::Y, Dim::X]).unwrap_err();
        assert!(matches!(err, EnsembleError::TimeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_display_lists_metrics() {
        let result = compute_all_bias_metrics(&series(&[2.0]), &series(&[1.0]), &[Dim::Time]).unwrap();
        let text = result.to_string();
        assert!(text.contains("ME: 1.0000"));
        assert!(text.contains("RMSE: 1.0000"));
    }
}
