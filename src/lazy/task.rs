use crate::error::{EnsembleError, Result};
use crate::math::{nan_mean_blocks, reduce_time_axis};
use crate::parallel::compute_blocks;
use ndarray::{concatenate, s, Array2, Array3, Axis, Zip};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// One evaluated chunk, laid out as (time, y, x)
pub type Block = Array3<f32>;

/// Producer of raw chunk values, e.g. one variable of one file
///
/// Nothing is read until the task graph holding the source is computed.
pub trait ChunkSource: Send + Sync + fmt::Debug {
    fn load(&self) -> Result<Block>;

    /// Human readable origin, used in error messages
    fn describe(&self) -> String;
}

/// Reduction applied when collapsing time steps into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
}

#[derive(Debug)]
enum Node {
    Source(Arc<dyn ChunkSource>),
    Constant(Arc<Block>),
    SliceTime { input: Task, range: Range<usize> },
    Window { input: Task, rows: Range<usize>, cols: Range<usize> },
    Mask { input: Task, keep: Arc<Array2<bool>> },
    Concat(Vec<Task>),
    MemberMean(Vec<Task>),
    Reduce { input: Task, reduction: Reduction },
}

/// Node of a deferred computation graph producing one [`Block`]
///
/// Tasks are immutable and cheap to clone; every operation wraps its inputs in
/// a new node. Shapes are known up front, so building a graph never touches
/// the data.
#[derive(Debug, Clone)]
pub struct Task {
    node: Arc<Node>,
    shape: [usize; 3],
}

impl Task {
    pub fn source(source: Arc<dyn ChunkSource>, shape: [usize; 3]) -> Self {
        Self {
            node: Arc::new(Node::Source(source)),
            shape,
        }
    }

    pub fn constant(block: Block) -> Self {
        let shape = [block.shape()[0], block.shape()[1], block.shape()[2]];
        Self {
            node: Arc::new(Node::Constant(Arc::new(block))),
            shape,
        }
    }

    /// (time, y, x) of the block this task yields
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn time_len(&self) -> usize {
        self.shape[0]
    }

    pub(crate) fn slice_time(&self, range: Range<usize>) -> Self {
        debug_assert!(range.end <= self.shape[0]);
        if range.start == 0 && range.end == self.shape[0] {
            return self.clone();
        }
        let shape = [range.len(), self.shape[1], self.shape[2]];
        Self {
            node: Arc::new(Node::SliceTime {
                input: self.clone(),
                range,
            }),
            shape,
        }
    }

    pub(crate) fn window(&self, rows: Range<usize>, cols: Range<usize>) -> Self {
        let shape = [self.shape[0], rows.len(), cols.len()];
        Self {
            node: Arc::new(Node::Window {
                input: self.clone(),
                rows,
                cols,
            }),
            shape,
        }
    }

    /// Cells where `keep` is false become NaN; the shape is unchanged
    pub(crate) fn mask(&self, keep: Arc<Array2<bool>>) -> Self {
        debug_assert_eq!(keep.shape(), &self.shape[1..]);
        Self {
            node: Arc::new(Node::Mask {
                input: self.clone(),
                keep,
            }),
            shape: self.shape,
        }
    }

    pub(crate) fn concat(mut parts: Vec<Task>) -> Self {
        if parts.len() == 1 {
            return parts.remove(0);
        }
        let nt = parts.iter().map(Task::time_len).sum();
        let (ny, nx) = parts.first().map(|t| (t.shape[1], t.shape[2])).unwrap_or((0, 0));
        Self {
            node: Arc::new(Node::Concat(parts)),
            shape: [nt, ny, nx],
        }
    }

    /// Elementwise NaN-skipping mean across same-shaped tasks
    pub(crate) fn member_mean(members: Vec<Task>) -> Self {
        let shape = members.first().map(Task::shape).unwrap_or([0, 0, 0]);
        Self {
            node: Arc::new(Node::MemberMean(members)),
            shape,
        }
    }

    /// Collapse the time axis into a single step
    pub(crate) fn reduce_time(&self, reduction: Reduction) -> Self {
        Self {
            node: Arc::new(Node::Reduce {
                input: self.clone(),
                reduction,
            }),
            shape: [1, self.shape[1], self.shape[2]],
        }
    }

    /// Evaluate the graph below this node
    pub fn compute(&self) -> Result<Block> {
        let block = match self.node.as_ref() {
            Node::Source(source) => {
                let block = source.load()?;
                if block.shape() != self.shape {
                    return Err(EnsembleError::shape(source.describe(), &self.shape, block.shape()));
                }
                block
            }
            Node::Constant(block) => block.as_ref().clone(),
            Node::SliceTime { input, range } => input.compute()?.slice_move(s![range.clone(), .., ..]),
            Node::Window { input, rows, cols } => input
                .compute()?
                .slice_move(s![.., rows.clone(), cols.clone()]),
            Node::Mask { input, keep } => {
                let mut block = input.compute()?;
                for mut plane in block.outer_iter_mut() {
                    Zip::from(&mut plane).and(keep.as_ref()).for_each(|value, &inside| {
                        if !inside {
                            *value = f32::NAN;
                        }
                    });
                }
                block
            }
            Node::Concat(parts) => {
                let blocks = compute_blocks(parts)?;
                let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
                concatenate(Axis(0), &views)
                    .map_err(|_| EnsembleError::shape("time concatenation", &self.shape, &[]))?
            }
            Node::MemberMean(members) => {
                let blocks = compute_blocks(members)?;
                nan_mean_blocks(&blocks, self.shape)
            }
            Node::Reduce { input, reduction } => reduce_time_axis(&input.compute()?, *reduction),
        };
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingSource {
        loads: Arc<AtomicUsize>,
        value: f32,
    }

    impl ChunkSource for CountingSource {
        fn load(&self) -> Result<Block> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Array3::from_elem((2, 2, 2), self.value))
        }

        fn describe(&self) -> String {
            "counting source".to_string()
        }
    }

    #[test]
    fn test_graph_building_is_lazy() {
        let loads = Arc::new(AtomicUsize::new(0));
        let source = Task::source(
            Arc::new(CountingSource {
                loads: loads.clone(),
                value: 2.0,
            }),
            [2, 2, 2],
        );
        let graph = Task::concat(vec![source.clone(), source.slice_time(0..1)]).reduce_time(Reduction::Sum);
        assert_eq!(graph.shape(), [1, 2, 2]);
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        let block = graph.compute().unwrap();
        assert_eq!(block, Array3::from_elem((1, 2, 2), 6.0));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_source_shape_checked() {
        let source = Task::source(
            Arc::new(CountingSource {
                loads: Arc::new(AtomicUsize::new(0)),
                value: 1.0,
            }),
            [3, 2, 2],
        );
        assert!(matches!(source.compute(), Err(EnsembleError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_mask_and_window() {
        let block = array![[[1.0f32, 2.0], [3.0, 4.0]]];
        let keep = Arc::new(array![[true, false], [false, true]]);
        let masked = Task::constant(block.clone()).mask(keep).compute().unwrap();
        assert_eq!(masked[[0, 0, 0]], 1.0);
        assert!(masked[[0, 0, 1]].is_nan());
        assert!(masked[[0, 1, 0]].is_nan());
        assert_eq!(masked[[0, 1, 1]], 4.0);

        let window = Task::constant(block).window(1..2, 0..2).compute().unwrap();
        assert_eq!(window, array![[[3.0f32, 4.0]]]);
    }

    #[test]
    fn test_member_mean_skips_nan() {
        let a = Task::constant(array![[[1.0f32, f32::NAN]]]);
        let b = Task::constant(array![[[3.0f32, f32::NAN]]]);
        let c = Task::constant(array![[[5.0f32, 4.0]]]);
        let mean = Task::member_mean(vec![a, b, c]).compute().unwrap();
        assert_eq!(mean, array![[[3.0f32, 4.0]]]);
    }
}
