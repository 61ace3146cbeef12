use crate::domain::ports::{ExportSummary, Pipeline};
use crate::utils::error::Result;

pub struct ExportEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> ExportEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<ExportSummary> {
        tracing::info!("🚀 Starting posting export...");

        // Extract
        let intake = self.pipeline.extract().await?;
        tracing::info!(
            "📥 Loaded {} lanes ({} rejected at intake)",
            intake.lanes.len(),
            intake.rejected.len()
        );

        // Transform
        let output = self.pipeline.transform(intake).await?;

        // Load
        let summary = self.pipeline.load(output).await?;
        tracing::info!(
            "📁 Wrote {} files ({} rows) to {}",
            summary.files.len(),
            summary.rows,
            summary.location
        );

        Ok(summary)
    }
}
