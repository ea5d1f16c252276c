pub mod assemble;
pub mod config;
pub mod data_io;
pub mod dataset;
pub mod error;
pub mod grid;
pub mod io;
pub mod lazy;
pub mod math;
pub mod member;
pub mod parallel;
pub mod subset;
pub mod temporal;
pub mod time_utils;

pub use assemble::EnsembleAssembler;
pub use config::AssemblyConfig;
pub use dataset::{DataArray, DatasetLike, Dim, ReferenceDataset, UnifiedDataset};
pub use error::{EnsembleError, Result};
pub use grid::{GridDescriptor, GridKind, SpatialBounds};
pub use math::{aggregate_to_period, compute_all_bias_metrics, BiasMetric, BiasMetricResult};
pub use member::{MemberId, MemberOrder, MemberParser};
pub use subset::subset;
pub use temporal::{align, AlignMode};
pub use time_utils::Period;
