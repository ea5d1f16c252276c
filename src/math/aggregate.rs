use crate::dataset::DatasetLike;
use crate::lazy::Reduction;
use crate::time_utils::{format_datetime, Period};
use chrono::{DateTime, Utc};
use std::ops::Range;

/// Resample to `period` with the NaN-skipping mean
///
/// With `compute_ens_mean` the member axis is averaged away first, then the
/// ensemble mean is resampled. Otherwise each member is resampled on its own
/// and the member axis is kept.
pub fn aggregate_to_period<D: DatasetLike>(dataset: &D, period: Period, compute_ens_mean: bool) -> D {
    aggregate_to_period_with(dataset, period, compute_ens_mean, Reduction::Mean)
}

/// [`aggregate_to_period`] with an explicit reduction, e.g. `Sum` for precipitation totals
pub fn aggregate_to_period_with<D: DatasetLike>(
    dataset: &D,
    period: Period,
    compute_ens_mean: bool,
    reduction: Reduction,
) -> D {
    let source = if compute_ens_mean {
        dataset.dataset().ensemble_mean()
    } else {
        dataset.dataset().clone()
    };

    let (labels, groups) = period_groups(source.times(), period);
    log::debug!(
        "{} {:?} of '{}': {} steps into {} periods",
        period,
        reduction,
        source.variable(),
        source.times().len(),
        labels.len()
    );
    if let (Some(first), Some(last)) = (labels.first(), labels.last()) {
        log::debug!("periods {} .. {}", format_datetime(first), format_datetime(last));
    }

    let data = source.data().reduce_groups(&groups, reduction);
    D::from_dataset(source.with_time(labels, data))
}

/// Period labels (period starts) and the contiguous index run of each period
///
/// Only periods containing at least one time step are produced.
pub(crate) fn period_groups(times: &[DateTime<Utc>], period: Period) -> (Vec<DateTime<Utc>>, Vec<Range<usize>>) {
    let mut labels: Vec<DateTime<Utc>> = Vec::new();
    let mut groups: Vec<Range<usize>> = Vec::new();
    for (index, time) in times.iter().enumerate() {
        let label = period.start_of(time);
        if labels.last() == Some(&label) {
            if let Some(group) = groups.last_mut() {
                group.end = index + 1;
            }
        } else {
            labels.push(label);
            groups.push(index..index + 1);
        }
    }
    (labels, groups)
}
