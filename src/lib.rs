pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{
    city_store::InMemoryCityStore,
    csv_source::{load_city_catalog, CsvLaneSource},
    http::{HttpDiscoveryProvider, HttpTieBreakDelegate},
    storage::LocalStorage,
};
pub use config::EngineConfig;
pub use core::{
    batch::{BatchReport, BatchRunner},
    engine::ExportEngine,
    export_pipeline::ExportPipeline,
    lane_pipeline::{LaneExport, LanePlan, LaneProcessor},
};
pub use domain::ports::ExportSummary;
pub use utils::error::{PostingError, Result};
