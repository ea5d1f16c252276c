pub mod aggregate;
pub mod bias;


pub use aggregate::*;
pub use bias::*;

use crate::lazy::{Block, Reduction};
use ndarray::{Array3, Axis, Zip};
use num_traits::Float;

/// Mean of the non-NaN values; NaN when there are none
pub fn nan_mean<T: Float>(values: impl IntoIterator<Item = T>) -> T {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((T::zero(), 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        T::nan()
    } else {
        sum / T::from(count).unwrap_or_else(T::one)
    }
}

/// Sum of the non-NaN values; NaN when there are none
pub fn nan_sum<T: Float>(values: impl IntoIterator<Item = T>) -> T {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<T>, v| Some(acc.map_or(v, |sum| sum + v)))
        .unwrap_or_else(T::nan)
}

/// Elementwise NaN-skipping mean over equally shaped blocks
pub(crate) fn nan_mean_blocks(blocks: &[Block], shape: [usize; 3]) -> Block {
    let mut sum = Array3::<f64>::zeros(shape);
    let mut count = Array3::<u32>::zeros(shape);

    for block in blocks {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(block)
            .for_each(|s, c, &value| {
                if !value.is_nan() {
                    *s += value as f64;
                    *c += 1;
                }
            });
    }

    let mut mean = Array3::<f32>::zeros(shape);
    Zip::from(&mut mean)
        .and(&sum)
        .and(&count)
        .par_for_each(|m, &s, &c| {
            *m = if c == 0 { f32::NAN } else { (s / c as f64) as f32 };
        });
    mean
}

/// Collapse the time axis of a block into one step
pub(crate) fn reduce_time_axis(block: &Block, reduction: Reduction) -> Block {
    let reduced = block.map_axis(Axis(0), |lane| {
        let values = lane.iter().map(|&v| v as f64);
        let value = match reduction {
            Reduction::Mean => nan_mean(values),
            Reduction::Sum => nan_sum(values),
        };
        value as f32
    });
    reduced.insert_axis(Axis(0))
}
