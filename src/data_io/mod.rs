//! NetCDF reading and writing.

pub mod common;
pub mod reader;
pub mod utils;
pub mod writer;

pub use reader::*;
pub use writer::*;
