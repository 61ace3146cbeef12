pub mod batch;
pub mod csv_chunker;
pub mod discovery;
pub mod distance;
pub mod engine;
pub mod export_pipeline;
pub mod lane_pipeline;
pub mod pair_assembly;
pub mod radius_search;
pub mod ranking;
pub mod row_expander;

pub use crate::domain::ports::{Pipeline, Storage};
pub use crate::utils::error::Result;
