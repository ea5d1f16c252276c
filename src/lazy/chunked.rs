use super::task::{Reduction, Task};
use crate::error::{EnsembleError, Result};
use crate::parallel::compute_blocks;
use ndarray::{s, Array3, Array4};
use rayon::prelude::*;
use std::ops::Range;

/// A task covering time steps `start..start + task.time_len()` of one column
#[derive(Debug, Clone)]
pub struct TimeChunk {
    pub start: usize,
    pub task: Task,
}

impl TimeChunk {
    pub fn end(&self) -> usize {
        self.start + self.task.time_len()
    }
}

/// Lazily evaluated (time, column, y, x) array
///
/// Each column (ensemble member) is an ordered run of time chunks; by
/// default one chunk per source file. Operations only rewrite the task graph.
#[derive(Debug, Clone)]
pub struct ChunkedArray {
    columns: Vec<Vec<TimeChunk>>,
    nt: usize,
    ny: usize,
    nx: usize,
}

impl ChunkedArray {
    /// Stack per-column task runs; every column must cover the same number of
    /// time steps on the same (y, x) shape
    pub fn from_columns(columns: Vec<Vec<Task>>) -> Result<Self> {
        let first = columns
            .iter()
            .flatten()
            .next()
            .ok_or_else(|| EnsembleError::Config("chunked array needs at least one chunk".to_string()))?;
        let (ny, nx) = (first.shape()[1], first.shape()[2]);
        let nt = columns[0].iter().map(Task::time_len).sum();

        let mut chunked = Vec::with_capacity(columns.len());
        for (index, column) in columns.into_iter().enumerate() {
            let mut start = 0;
            let mut chunks = Vec::with_capacity(column.len());
            for task in column {
                let shape = task.shape();
                if shape[1] != ny || shape[2] != nx {
                    return Err(EnsembleError::shape(format!("chunk of column {}", index), &[ny, nx], &shape[1..]));
                }
                let len = task.time_len();
                chunks.push(TimeChunk { start, task });
                start += len;
            }
            if start != nt {
                return Err(EnsembleError::shape(format!("time length of column {}", index), &[nt], &[start]));
            }
            chunked.push(chunks);
        }

        Ok(Self {
            columns: chunked,
            nt,
            ny,
            nx,
        })
    }

    /// Wrap materialised (time, column, y, x) values, one chunk per column
    pub fn from_array(values: Array4<f32>) -> Self {
        let (nt, ncol, ny, nx) = values.dim();
        let columns = (0..ncol)
            .map(|c| {
                if nt == 0 {
                    Vec::new()
                } else {
                    vec![TimeChunk {
                        start: 0,
                        task: Task::constant(values.slice(s![.., c, .., ..]).to_owned()),
                    }]
                }
            })
            .collect();
        Self { columns, nt, ny, nx }
    }

    /// (time, column, y, x)
    pub fn shape(&self) -> [usize; 4] {
        [self.nt, self.columns.len(), self.ny, self.nx]
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_chunks(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn chunks(&self, column: usize) -> &[TimeChunk] {
        &self.columns[column]
    }

    /// One task covering `range` of a column, slicing and joining chunks as needed
    pub(crate) fn column_range(&self, column: usize, range: Range<usize>) -> Task {
        let parts: Vec<Task> = self.columns[column]
            .iter()
            .filter(|chunk| chunk.start < range.end && chunk.end() > range.start)
            .map(|chunk| {
                let lo = range.start.max(chunk.start) - chunk.start;
                let hi = range.end.min(chunk.end()) - chunk.start;
                chunk.task.slice_time(lo..hi)
            })
            .collect();
        Task::concat(parts)
    }

    /// Keep time steps `range`; chunks outside it are dropped from the graph
    pub fn slice_time(&self, range: Range<usize>) -> Self {
        let range = range.start.min(self.nt)..range.end.min(self.nt);
        let columns = self
            .columns
            .iter()
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|chunk| chunk.start < range.end && chunk.end() > range.start)
                    .map(|chunk| {
                        let lo = range.start.max(chunk.start);
                        let hi = range.end.min(chunk.end());
                        TimeChunk {
                            start: lo - range.start,
                            task: chunk.task.slice_time(lo - chunk.start..hi - chunk.start),
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            columns,
            nt: range.len(),
            ny: self.ny,
            nx: self.nx,
        }
    }

    /// Apply a per-chunk spatial operation producing blocks of (ny, nx)
    pub(crate) fn map_space(&self, ny: usize, nx: usize, op: impl Fn(&Task) -> Task) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|chunks| {
                chunks
                    .iter()
                    .map(|chunk| TimeChunk {
                        start: chunk.start,
                        task: op(&chunk.task),
                    })
                    .collect()
            })
            .collect();
        Self {
            columns,
            nt: self.nt,
            ny,
            nx,
        }
    }

    /// Collapse all columns into one by NaN-skipping mean
    ///
    /// The result follows the chunk boundaries of the first column.
    pub fn mean_over_columns(&self) -> Self {
        let column = self.columns[0]
            .iter()
            .map(|chunk| {
                let range = chunk.start..chunk.end();
                let members = (0..self.columns.len())
                    .map(|c| self.column_range(c, range.clone()))
                    .collect();
                TimeChunk {
                    start: chunk.start,
                    task: Task::member_mean(members),
                }
            })
            .collect();
        Self {
            columns: vec![column],
            nt: self.nt,
            ny: self.ny,
            nx: self.nx,
        }
    }

    /// Reduce each contiguous time group to a single step, per column
    pub fn reduce_groups(&self, groups: &[Range<usize>], reduction: Reduction) -> Self {
        let columns = (0..self.columns.len())
            .map(|c| {
                groups
                    .iter()
                    .enumerate()
                    .map(|(i, group)| TimeChunk {
                        start: i,
                        task: self.column_range(c, group.clone()).reduce_time(reduction),
                    })
                    .collect()
            })
            .collect();
        Self {
            columns,
            nt: groups.len(),
            ny: self.ny,
            nx: self.nx,
        }
    }

    /// Force the whole graph, evaluating independent chunks in parallel
    pub fn compute(&self) -> Result<Array4<f32>> {
        let placements: Vec<(usize, &TimeChunk)> = self
            .columns
            .iter()
            .enumerate()
            .flat_map(|(c, chunks)| chunks.iter().map(move |chunk| (c, chunk)))
            .collect();

        let blocks: Vec<Array3<f32>> = placements
            .par_iter()
            .map(|(_, chunk)| chunk.task.compute())
            .collect::<Result<_>>()?;

        let mut output = Array4::<f32>::from_elem(self.shape(), f32::NAN);
        for ((c, chunk), block) in placements.iter().zip(blocks) {
            output
                .slice_mut(s![chunk.start..chunk.end(), *c, .., ..])
                .assign(&block);
        }
        Ok(output)
    }

    /// Force a single column as (time, y, x)
    pub fn compute_column(&self, column: usize) -> Result<Array3<f32>> {
        let tasks: Vec<Task> = self.columns[column].iter().map(|chunk| chunk.task.clone()).collect();
        let blocks = compute_blocks(&tasks)?;
        let mut output = Array3::<f32>::from_elem((self.nt, self.ny, self.nx), f32::NAN);
        for (chunk, block) in self.columns[column].iter().zip(blocks) {
            output.slice_mut(s![chunk.start..chunk.end(), .., ..]).assign(&block);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn steps(values: &[f32]) -> Task {
        Task::constant(Array3::from_shape_fn((values.len(), 1, 1), |(t, _, _)| values[t]))
    }

    fn two_members() -> ChunkedArray {
        ChunkedArray::from_columns(vec![
            vec![steps(&[1.0, 2.0]), steps(&[3.0])],
            vec![steps(&[5.0]), steps(&[6.0, 7.0])],
        ])
        .unwrap()
    }

    #[test]
    fn test_from_columns_layout() {
        let array = two_members();
        assert_eq!(array.shape(), [3, 2, 1, 1]);
        assert_eq!(array.n_chunks(), 4);
        assert_eq!(array.chunks(1)[1].start, 1);
    }

    #[test]
    fn test_from_columns_rejects_ragged_time() {
        let result = ChunkedArray::from_columns(vec![vec![steps(&[1.0, 2.0])], vec![steps(&[1.0])]]);
        assert!(matches!(result, Err(EnsembleError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_slice_time_across_chunk_boundaries() {
        let sliced = two_members().slice_time(1..3);
        assert_eq!(sliced.shape(), [2, 2, 1, 1]);
        let values = sliced.compute().unwrap();
        assert_eq!(values[[0, 0, 0, 0]], 2.0);
        assert_eq!(values[[1, 0, 0, 0]], 3.0);
        assert_eq!(values[[0, 1, 0, 0]], 6.0);
        assert_eq!(values[[1, 1, 0, 0]], 7.0);
    }

    #[test]
    fn test_empty_time_slice() {
        let sliced = two_members().slice_time(3..3);
        assert_eq!(sliced.shape(), [0, 2, 1, 1]);
        assert_eq!(sliced.n_chunks(), 0);
        assert_eq!(sliced.compute().unwrap().len(), 0);
    }

    #[test]
    fn test_mean_over_columns_with_misaligned_chunks() {
        let mean = two_members().mean_over_columns().compute().unwrap();
        assert_eq!(mean.shape(), &[3, 1, 1, 1]);
        assert_eq!(mean[[0, 0, 0, 0]], 3.0);
        assert_eq!(mean[[1, 0, 0, 0]], 4.0);
        assert_eq!(mean[[2, 0, 0, 0]], 5.0);
    }

    #[test]
    fn test_reduce_groups() {
        let reduced = two_members().reduce_groups(&[0..2, 2..3], Reduction::Sum);
        let values = reduced.compute().unwrap();
        assert_eq!(values.shape(), &[2, 2, 1, 1]);
        assert_eq!(values[[0, 0, 0, 0]], 3.0);
        assert_eq!(values[[1, 0, 0, 0]], 3.0);
        assert_eq!(values[[0, 1, 0, 0]], 11.0);
        assert_eq!(values[[1, 1, 0, 0]], 7.0);
    }

    #[test]
    fn test_compute_column() {
        let column = two_members().compute_column(1).unwrap();
        assert_eq!(column.iter().copied().collect::<Vec<_>>(), vec![5.0, 6.0, 7.0]);
    }
}
