//! Deferred, chunked evaluation.
//!
//! Dataset operations build a graph of [`Task`] nodes over per-file chunks;
//! values are only read and combined when `compute` is called, and
//! independent chunks are then evaluated in parallel.

pub mod chunked;
pub mod task;

pub use chunked::*;
pub use task::*;
