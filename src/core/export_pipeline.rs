use crate::config::engine_config::ExportConfig;
use crate::core::batch::{BatchReport, BatchRunner, LaneFailure};
use crate::core::csv_chunker::{chunk_rows, render_parts, CsvPart};
use crate::core::lane_pipeline::LaneExport;
use crate::domain::ports::{ExportSummary, LaneIntake, LaneSource, Pipeline, Storage};
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

pub const REPORT_FILE_NAME: &str = "export_report.json";

/// transform 階段的產出
#[derive(Debug)]
pub struct ExportBatch {
    pub report: BatchReport,
    pub parts: Vec<CsvPart>,
}

#[derive(Debug, Serialize)]
struct PartEntry<'a> {
    file_name: &'a str,
    row_count: usize,
}

#[derive(Debug, Serialize)]
struct ExportReport<'a> {
    generated_at: DateTime<Utc>,
    total_lanes: usize,
    total_rows: usize,
    successes: Vec<&'a LaneExport>,
    partial_lanes: Vec<&'a str>,
    failures: &'a [LaneFailure],
    skipped_lanes: &'a [String],
    parts: Vec<PartEntry<'a>>,
}

pub struct ExportPipeline<S: Storage, L: LaneSource> {
    storage: S,
    source: L,
    runner: BatchRunner,
    config: ExportConfig,
    location: String,
}

impl<S: Storage, L: LaneSource> ExportPipeline<S, L> {
    pub fn new(storage: S, source: L, runner: BatchRunner, config: ExportConfig) -> Self {
        Self {
            storage,
            source,
            runner,
            config,
            location: ".".to_string(),
        }
    }

    /// 只用於摘要顯示的輸出位置
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    fn bundle_name(&self) -> String {
        format!("{}_bundle.zip", self.config.file_prefix)
    }

    fn bundle(&self, parts: &[CsvPart], report_json: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for part in parts {
            zip.start_file::<_, ()>(part.file_name.as_str(), FileOptions::default())?;
            zip.write_all(&part.data)?;
        }
        if let Some(json) = report_json {
            zip.start_file::<_, ()>(REPORT_FILE_NAME, FileOptions::default())?;
            zip.write_all(json)?;
        }
        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}

#[async_trait::async_trait]
impl<S: Storage, L: LaneSource> Pipeline for ExportPipeline<S, L> {
    type Output = ExportBatch;

    async fn extract(&self) -> Result<LaneIntake> {
        self.source.load_lanes().await
    }

    async fn transform(&self, intake: LaneIntake) -> Result<ExportBatch> {
        let LaneIntake { lanes, rejected } = intake;
        let report = self.runner.run(lanes).await.with_rejections(rejected);

        // 只輸出成功 lane 的資料列，依輸入順序
        let rows = report
            .exports
            .iter()
            .flat_map(|export| export.rows.iter().cloned())
            .collect();
        let chunks = chunk_rows(
            rows,
            self.config.max_rows_per_part,
            self.config.keep_lanes_together,
        );
        let parts = render_parts(&chunks, &self.config.file_prefix)?;
        tracing::debug!("Split {} rows into {} parts", report.total_rows(), parts.len());

        Ok(ExportBatch { report, parts })
    }

    async fn load(&self, batch: ExportBatch) -> Result<ExportSummary> {
        let ExportBatch { report, parts } = batch;
        let mut files = Vec::new();

        for part in &parts {
            tracing::debug!("Writing {} ({} rows)", part.file_name, part.row_count);
            self.storage.write_file(&part.file_name, &part.data).await?;
            files.push(part.file_name.clone());
        }

        let report_json = if self.config.write_report {
            let document = ExportReport {
                generated_at: Utc::now(),
                total_lanes: report.exports.len() + report.failures.len() + report.skipped.len(),
                total_rows: report.total_rows(),
                successes: report.exports.iter().collect(),
                partial_lanes: report.partial_lanes().map(|e| e.lane_id()).collect(),
                failures: &report.failures,
                skipped_lanes: &report.skipped,
                parts: parts
                    .iter()
                    .map(|p| PartEntry {
                        file_name: &p.file_name,
                        row_count: p.row_count,
                    })
                    .collect(),
            };
            let json = serde_json::to_vec_pretty(&document)?;
            self.storage.write_file(REPORT_FILE_NAME, &json).await?;
            files.push(REPORT_FILE_NAME.to_string());
            Some(json)
        } else {
            None
        };

        if self.config.bundle_zip && !parts.is_empty() {
            let zip_data = self.bundle(&parts, report_json.as_deref())?;
            let name = self.bundle_name();
            tracing::debug!("Writing ZIP bundle ({} bytes) to storage", zip_data.len());
            self.storage.write_file(&name, &zip_data).await?;
            files.push(name);
        }

        Ok(ExportSummary {
            location: self.location.clone(),
            files,
            exported_lanes: report.exports.len(),
            partial_lanes: report.partial_lanes().count(),
            failed_lanes: report.failures.len(),
            skipped_lanes: report.skipped.len(),
            rows: report.total_rows(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::engine_config::EngineConfig;
    use crate::core::lane_pipeline::tests::{lane_store, processor};
    use crate::core::row_expander::tests::lane;
    use crate::domain::model::{LaneRequest, WeightSpec};
    use crate::domain::ports::{CityStore, RejectedLane};
    use crate::utils::error::PostingError;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Clone)]
    pub(crate) struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        pub(crate) fn new() -> Self {
            Self {
                files: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        pub(crate) async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                PostingError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    pub(crate) struct StaticLanes {
        lanes: Vec<LaneRequest>,
        rejected_ids: Vec<String>,
    }

    impl StaticLanes {
        pub(crate) fn new(lanes: Vec<LaneRequest>) -> Self {
            Self {
                lanes,
                rejected_ids: Vec::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl LaneSource for StaticLanes {
        async fn load_lanes(&self) -> Result<LaneIntake> {
            let rejected = self
                .rejected_ids
                .iter()
                .enumerate()
                .map(|(i, id)| RejectedLane {
                    lane_id: id.clone(),
                    row: i + 2,
                    error: PostingError::FormatViolation {
                        lane_id: id.clone(),
                        column: "pickup_earliest".to_string(),
                        message: "'someday' is not a date".to_string(),
                    },
                })
                .collect();
            Ok(LaneIntake {
                lanes: self.lanes.clone(),
                rejected,
            })
        }
    }

    fn named(id: &str, lbs: u32) -> LaneRequest {
        let mut request = lane(WeightSpec::Fixed { lbs });
        request.lane_id = id.to_string();
        request
    }

    fn pipeline(
        storage: MockStorage,
        lanes: Vec<LaneRequest>,
        export: ExportConfig,
    ) -> ExportPipeline<MockStorage, StaticLanes> {
        let store: Arc<dyn CityStore> = Arc::new(lane_store());
        let processor = Arc::new(processor(store, EngineConfig::default()));
        let runner = BatchRunner::new(processor, 2, CancellationToken::new());
        ExportPipeline::new(storage, StaticLanes::new(lanes), runner, export)
    }

    #[tokio::test]
    async fn test_export_writes_parts_and_report() {
        let storage = MockStorage::new();
        let config = ExportConfig {
            max_rows_per_part: 20,
            ..ExportConfig::default()
        };
        let pipeline = pipeline(
            storage.clone(),
            vec![named("A", 40_000), named("B", 90_000), named("C", 30_000)],
            config,
        );

        let lanes = pipeline.extract().await.unwrap();
        let batch = pipeline.transform(lanes).await.unwrap();
        assert_eq!(batch.parts.len(), 2);
        let summary = pipeline.load(batch).await.unwrap();

        assert_eq!(summary.exported_lanes, 2);
        assert_eq!(summary.failed_lanes, 1);
        assert_eq!(summary.rows, 24);
        assert_eq!(
            summary.files,
            vec!["posting_part_001.csv", "posting_part_002.csv", REPORT_FILE_NAME]
        );
        assert!(!summary.all_lanes_failed());

        let report = storage.get_file(REPORT_FILE_NAME).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&report).unwrap();
        assert_eq!(report["total_lanes"], 3);
        assert_eq!(report["failures"][0]["lane_id"], "B");
        assert_eq!(report["failures"][0]["category"], "weight");
        assert_eq!(report["successes"][1]["lane_id"], "C");
        assert_eq!(report["successes"][0]["row_count"], 12);
    }

    #[tokio::test]
    async fn test_zip_bundle_contains_every_part() {
        let storage = MockStorage::new();
        let config = ExportConfig {
            bundle_zip: true,
            write_report: false,
            ..ExportConfig::default()
        };
        let pipeline = pipeline(storage.clone(), vec![named("A", 40_000)], config);

        let lanes = pipeline.extract().await.unwrap();
        let batch = pipeline.transform(lanes).await.unwrap();
        let summary = pipeline.load(batch).await.unwrap();
        assert_eq!(summary.files, vec!["posting_part_001.csv", "posting_bundle.zip"]);
        assert!(storage.get_file(REPORT_FILE_NAME).await.is_none());

        let data = storage.get_file("posting_bundle.zip").await.unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.name_for_index(0), Some("posting_part_001.csv"));
    }

    #[tokio::test]
    async fn test_rejected_rows_are_reported_with_siblings() {
        let storage = MockStorage::new();
        let mut pipeline = pipeline(
            storage.clone(),
            vec![named("GOOD", 40_000)],
            ExportConfig::default(),
        );
        pipeline.source.rejected_ids = vec!["BAD".to_string()];

        let intake = pipeline.extract().await.unwrap();
        assert_eq!(intake.len(), 2);
        let batch = pipeline.transform(intake).await.unwrap();
        let summary = pipeline.load(batch).await.unwrap();
        assert_eq!(summary.exported_lanes, 1);
        assert_eq!(summary.failed_lanes, 1);
        assert_eq!(summary.rows, 12);

        let report = storage.get_file(REPORT_FILE_NAME).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&report).unwrap();
        assert_eq!(report["total_lanes"], 2);
        assert_eq!(report["failures"][0]["lane_id"], "BAD");
        assert_eq!(report["failures"][0]["category"], "format");
        assert_eq!(report["successes"][0]["lane_id"], "GOOD");
    }

    #[tokio::test]
    async fn test_all_failed_batch_writes_only_report() {
        let storage = MockStorage::new();
        let pipeline = pipeline(
            storage.clone(),
            vec![named("A", 90_000)],
            ExportConfig::default(),
        );

        let lanes = pipeline.extract().await.unwrap();
        let batch = pipeline.transform(lanes).await.unwrap();
        assert!(batch.parts.is_empty());
        let summary = pipeline.load(batch).await.unwrap();
        assert!(summary.all_lanes_failed());
        assert_eq!(summary.files, vec![REPORT_FILE_NAME]);
    }
}
