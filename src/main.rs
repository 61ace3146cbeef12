use clap::Parser;
use lane_poster::app::build_lane_processor;
use lane_poster::domain::ports::{CityStore, LaneSource};
use lane_poster::utils::error::{ErrorSeverity, PostingError};
use lane_poster::utils::{logger, validation::Validate};
use lane_poster::{
    load_city_catalog, BatchRunner, CliConfig, CsvLaneSource, ExportEngine, ExportPipeline,
    ExportSummary, LaneProcessor, LocalStorage,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn dry_run(processor: &LaneProcessor, source: &CsvLaneSource) -> lane_poster::Result<()> {
    let intake = source.load_lanes().await?;
    for rejected in &intake.rejected {
        println!(
            "❌ {} (row {}): {}",
            rejected.lane_id,
            rejected.row,
            rejected.error
        );
    }
    for lane in &intake.lanes {
        match processor.plan(lane).await {
            Ok(plan) => {
                println!(
                    "🧭 {} ({} → {}): {} pairs{}",
                    plan.lane_id,
                    plan.origin.city,
                    plan.destination.city,
                    plan.pairs.len(),
                    match &plan.shortfall {
                        Some(s) => format!(", short {}/{} ({})", s.found, s.required, s.reason),
                        None => String::new(),
                    }
                );
                for pair in &plan.pairs {
                    println!(
                        "   {} → {} ({:.0} mi, score {:.3})",
                        pair.origin, pair.destination, pair.distance_miles, pair.score
                    );
                }
                for note in &plan.degradations {
                    println!("   ⚠️ {}", note);
                }
            }
            Err(e) => println!("❌ {}: {}", lane.lane_id, e.user_friendly_message()),
        }
    }
    Ok(())
}

async fn run(config: CliConfig) -> lane_poster::Result<Option<ExportSummary>> {
    config.validate()?;
    let engine_config = config.engine_config()?;

    let store: Arc<dyn CityStore> = Arc::new(load_city_catalog(&config.cities).await?);
    let processor = Arc::new(build_lane_processor(store, &engine_config)?);
    let source = CsvLaneSource::new(&config.lanes);

    if config.dry_run {
        tracing::info!("🧪 Dry run: no files will be written");
        dry_run(&processor, &source).await?;
        return Ok(None);
    }

    // Ctrl-C 停止排程新的 lane，執行中的 lane 會完成
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupt received, finishing in-flight lanes");
            signal_token.cancel();
        }
    });

    let runner = BatchRunner::new(processor, engine_config.batch.max_workers, cancel);
    let storage = LocalStorage::new(&config.output);
    let pipeline = ExportPipeline::new(storage, source, runner, engine_config.export.clone())
        .with_location(config.output.display().to_string());

    let summary = ExportEngine::new(pipeline).run().await?;
    Ok(Some(summary))
}

fn exit_code(e: &PostingError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting lane-poster");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    match run(config).await {
        Ok(Some(summary)) => {
            println!(
                "✅ Exported {} lanes ({} partial), {} failed, {} skipped, {} rows",
                summary.exported_lanes,
                summary.partial_lanes,
                summary.failed_lanes,
                summary.skipped_lanes,
                summary.rows
            );
            println!("📁 Output saved to: {}", summary.location);
            if summary.all_lanes_failed() {
                eprintln!("❌ Every lane failed, see export_report.json");
                std::process::exit(1);
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(
                "❌ Export failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            let code = exit_code(&e);
            if code > 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
