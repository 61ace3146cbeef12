use crate::config::engine_config::EngineConfig;
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "lane-poster")]
#[command(about = "Generate diverse load-board postings for freight lanes")]
pub struct CliConfig {
    #[arg(long, help = "Engine configuration (TOML)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "City catalog CSV")]
    pub cities: PathBuf,

    #[arg(long, help = "Lane CSV")]
    pub lanes: PathBuf,

    #[arg(long, default_value = "./output")]
    pub output: PathBuf,

    #[arg(long, help = "Allow market-area reuse to reach the minimum pair count")]
    pub fill: bool,

    #[arg(long, help = "Emit JSON log lines")]
    pub json_logs: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Resolve and plan pairs without writing files")]
    pub dry_run: bool,
}

impl CliConfig {
    /// 載入 TOML（若有）並套用命令列覆寫
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if self.fill {
            config.pairing.fill = true;
        }
        config.validate()?;
        Ok(config)
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_input_file("cities", &self.cities)?;
        validation::validate_input_file("lanes", &self.lanes)?;
        if let Some(path) = &self.config {
            validation::validate_input_file("config", path)?;
        }
        Ok(())
    }
}
