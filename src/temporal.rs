use crate::dataset::DatasetLike;
use crate::error::{EnsembleError, Result};
use crate::time_utils::format_datetime;
use chrono::{DateTime, Utc};

/// How datasets are brought onto one time window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignMode {
    /// Keep `[start, end]` of every input; inputs outside it end up empty
    Explicit { start: DateTime<Utc>, end: DateTime<Utc> },
    /// Keep the span covered by every input
    Intersection,
}

/// Latest start and earliest end over all datasets
///
/// # Arguments
/// * `datasets` - Datasets to intersect
///
/// # Returns
/// * `Result<(DateTime<Utc>, DateTime<Utc>)>` - Common window or `NoTemporalOverlap`
pub fn common_time_range<D: DatasetLike>(datasets: &[D]) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let ranges: Vec<(DateTime<Utc>, DateTime<Utc>)> = datasets
        .iter()
        .map(|d| match (d.times().first(), d.times().last()) {
            (Some(&first), Some(&last)) => Some((first, last)),
            _ => None,
        })
        .collect::<Option<_>>()
        .ok_or_else(|| EnsembleError::NoTemporalOverlap {
            start: "-".to_string(),
            end: "an empty time axis".to_string(),
        })?;
    intersect(&ranges)
}

fn intersect(ranges: &[(DateTime<Utc>, DateTime<Utc>)]) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = ranges.iter().map(|r| r.0).max();
    let end = ranges.iter().map(|r| r.1).min();
    match (start, end) {
        (Some(start), Some(end)) if start <= end => Ok((start, end)),
        (Some(start), Some(end)) => Err(EnsembleError::NoTemporalOverlap {
            start: format_datetime(&start),
            end: format_datetime(&end),
        }),
        _ => Err(EnsembleError::NoTemporalOverlap {
            start: "-".to_string(),
            end: "-".to_string(),
        }),
    }
}

fn window(mode: AlignMode, ranges: impl FnOnce() -> Result<(DateTime<Utc>, DateTime<Utc>)>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    match mode {
        AlignMode::Explicit { start, end } => Ok((start, end)),
        AlignMode::Intersection => ranges(),
    }
}

fn restrict<D: DatasetLike>(dataset: &D, start: DateTime<Utc>, end: DateTime<Utc>) -> D {
    let selected = dataset.dataset().select_time(start, end);
    if selected.times().is_empty() {
        log::warn!(
            "'{}' has no time step within {} .. {}",
            selected.variable(),
            format_datetime(&start),
            format_datetime(&end)
        );
    }
    D::from_dataset(selected)
}

/// Restrict datasets of one kind to a shared time window
pub fn align<D: DatasetLike>(datasets: &[D], mode: AlignMode) -> Result<Vec<D>> {
    let (start, end) = window(mode, || common_time_range(datasets))?;
    log::info!(
        "aligning {} datasets to {} .. {}",
        datasets.len(),
        format_datetime(&start),
        format_datetime(&end)
    );
    Ok(datasets.iter().map(|d| restrict(d, start, end)).collect())
}

/// Restrict two datasets of possibly different kinds to a shared time window
///
/// Typically an ensemble and its reference.
pub fn align_pair<A: DatasetLike, B: DatasetLike>(a: &A, b: &B, mode: AlignMode) -> Result<(A, B)> {
    let (start, end) = window(mode, || {
        let ranges = [a.dataset().time_range(), b.dataset().time_range()];
        match ranges {
            [Some(ra), Some(rb)] => intersect(&[ra, rb]),
            _ => Err(EnsembleError::NoTemporalOverlap {
                start: "-".to_string(),
                end: "an empty time axis".to_string(),
            }),
        }
    })?;
    log::info!(
        "aligning pair to {} .. {}",
        format_datetime(&start),
        format_datetime(&end)
    );
    Ok((restrict(a, start, end), restrict(b, start, end)))
}
