use crate::core::lane_pipeline::{LaneExport, LaneProcessor};
use crate::domain::model::LaneRequest;
use crate::domain::ports::RejectedLane;
use crate::utils::error::{ErrorCategory, ErrorSeverity, PostingError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// 單一 lane 的失敗紀錄
#[derive(Debug, Clone, Serialize)]
pub struct LaneFailure {
    pub lane_id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub suggestion: String,
}

impl LaneFailure {
    pub fn from_error(lane_id: &str, error: &PostingError) -> Self {
        Self {
            lane_id: lane_id.to_string(),
            category: error.category(),
            severity: error.severity(),
            message: error.to_string(),
            suggestion: error.recovery_suggestion().to_string(),
        }
    }
}

#[derive(Debug)]
pub enum LaneOutcome {
    Exported(LaneExport),
    Failed(LaneFailure),
    Skipped(String),
}

/// 批次結果，依 lane 輸入順序排列
#[derive(Debug, Default)]
pub struct BatchReport {
    pub exports: Vec<LaneExport>,
    pub failures: Vec<LaneFailure>,
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<LaneOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                LaneOutcome::Exported(export) => report.exports.push(export),
                LaneOutcome::Failed(failure) => report.failures.push(failure),
                LaneOutcome::Skipped(lane_id) => report.skipped.push(lane_id),
            }
        }
        report
    }

    /// 讀入時就被拒絕的 lane 排在處理失敗之前
    pub fn with_rejections(mut self, rejected: Vec<RejectedLane>) -> Self {
        let mut failures: Vec<LaneFailure> = rejected
            .iter()
            .map(|r| LaneFailure::from_error(&r.lane_id, &r.error))
            .collect();
        failures.append(&mut self.failures);
        self.failures = failures;
        self
    }

    pub fn total_rows(&self) -> usize {
        self.exports.iter().map(|e| e.rows.len()).sum()
    }

    pub fn partial_lanes(&self) -> impl Iterator<Item = &LaneExport> {
        self.exports.iter().filter(|e| e.is_partial())
    }
}

pub struct BatchRunner {
    processor: Arc<LaneProcessor>,
    max_workers: usize,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(processor: Arc<LaneProcessor>, max_workers: usize, cancel: CancellationToken) -> Self {
        Self {
            processor,
            max_workers: max_workers.max(1),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 每條 lane 獨立處理；取消只停止排程新的 lane，執行中的 lane 會完成
    pub async fn run(&self, lanes: Vec<LaneRequest>) -> BatchReport {
        let total = lanes.len();
        tracing::info!(
            "🚚 Processing {} lanes with up to {} workers",
            total,
            self.max_workers
        );

        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut slots: Vec<Option<LaneOutcome>> = (0..total).map(|_| None).collect();
        let mut tasks = JoinSet::new();
        let mut lane_ids = Vec::with_capacity(total);

        for (index, lane) in lanes.into_iter().enumerate() {
            lane_ids.push(lane.lane_id.clone());
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = workers.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                tracing::warn!("🛑 Batch cancelled, skipping lane {}", lane.lane_id);
                slots[index] = Some(LaneOutcome::Skipped(lane.lane_id));
                continue;
            };

            let processor = self.processor.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = match processor.process(&lane).await {
                    Ok(export) => LaneOutcome::Exported(export),
                    Err(error) => {
                        if error.is_lane_fatal() {
                            tracing::warn!("⚠️ Lane {} rejected: {}", lane.lane_id, error);
                        } else {
                            tracing::error!(
                                "❌ Lane {} failed: {} (Category: {:?})",
                                lane.lane_id,
                                error,
                                error.category()
                            );
                        }
                        LaneOutcome::Failed(LaneFailure::from_error(&lane.lane_id, &error))
                    }
                };
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!("❌ Lane worker aborted: {}", e),
            }
        }

        // 執行緒崩潰的 lane 仍須回報，不可默默遺失
        let outcomes = slots
            .into_iter()
            .zip(lane_ids)
            .map(|(slot, lane_id)| {
                slot.unwrap_or_else(|| {
                    let error = PostingError::ProcessingError {
                        message: "lane worker terminated unexpectedly".to_string(),
                    };
                    LaneOutcome::Failed(LaneFailure::from_error(&lane_id, &error))
                })
            })
            .collect();

        let report = BatchReport::from_outcomes(outcomes);
        tracing::info!(
            "📊 Batch finished: {} exported ({} partial), {} failed, {} skipped",
            report.exports.len(),
            report.partial_lanes().count(),
            report.failures.len(),
            report.skipped.len()
        );
        report
    }
}
