use crate::utils::error::{PostingError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search: SearchConfig,
    pub discovery: DiscoveryConfig,
    pub ranking: RankingConfig,
    pub pairing: PairingConfig,
    pub export: ExportConfig,
    pub equipment: EquipmentConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RadiusStep {
    Fixed { miles: f64 },
    Multiplicative { factor: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub start_radius_miles: f64,
    pub ceiling_radius_miles: f64,
    pub step: RadiusStep,
    pub max_attempts: u32,
    pub target_unique_areas: usize,
    pub alternates_per_area: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            start_radius_miles: 75.0,
            ceiling_radius_miles: 150.0,
            step: RadiusStep::Fixed { miles: 25.0 },
            max_attempts: 6,
            target_unique_areas: 6,
            alternates_per_area: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub category: String,
    pub timeout_seconds: u64,
    pub max_concurrent_calls: usize,
    pub max_calls_per_batch: usize,
    pub market_area_match_radius_miles: f64,
    pub allowed_countries: Vec<String>,
    pub max_results: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            category: "populated_place".to_string(),
            timeout_seconds: 8,
            max_concurrent_calls: 2,
            max_calls_per_batch: 100,
            market_area_match_radius_miles: 75.0,
            allowed_countries: vec!["US".to_string()],
            max_results: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakMode {
    Deterministic,
    Delegated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub tie_epsilon: f64,
    pub affinity_bonus: f64,
    pub tie_break: TieBreakMode,
    pub delegate_endpoint: Option<String>,
    pub delegate_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            tie_epsilon: 0.02,
            affinity_bonus: 0.05,
            tie_break: TieBreakMode::Deterministic,
            delegate_endpoint: None,
            delegate_timeout_seconds: 5,
            cache_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    Nearest,
    LeastRecentlyUsed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub minimum_pairs: usize,
    pub fill: bool,
    pub fill_policy: FillPolicy,
    pub reject_on_shortfall: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            minimum_pairs: 6,
            fill: false,
            fill_policy: FillPolicy::Nearest,
            reject_on_shortfall: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub max_rows_per_part: usize,
    pub keep_lanes_together: bool,
    pub file_prefix: String,
    pub bundle_zip: bool,
    pub write_report: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_rows_per_part: 499,
            keep_lanes_together: true,
            file_prefix: "posting".to_string(),
            bundle_zip: false,
            write_report: true,
        }
    }
}

/// 各設備類別的法定最大載重（lbs）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, u32>", into = "BTreeMap<String, u32>")]
pub struct EquipmentConfig {
    pub legal_max_lbs: BTreeMap<String, u32>,
}

/// 設定檔中的項目覆蓋預設值，未列出的設備保留預設上限
impl From<BTreeMap<String, u32>> for EquipmentConfig {
    fn from(overrides: BTreeMap<String, u32>) -> Self {
        let mut config = Self::default();
        for (code, lbs) in overrides {
            config.legal_max_lbs.insert(code.trim().to_uppercase(), lbs);
        }
        config
    }
}

impl From<EquipmentConfig> for BTreeMap<String, u32> {
    fn from(config: EquipmentConfig) -> Self {
        config.legal_max_lbs
    }
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        let legal_max_lbs = [
            ("V", 44_000),
            ("VR", 44_000),
            ("R", 43_500),
            ("F", 48_000),
            ("FD", 48_000),
            ("SD", 48_000),
            ("DD", 42_000),
            ("RGN", 42_000),
            ("PO", 44_000),
            ("CONT", 44_000),
        ]
        .into_iter()
        .map(|(code, lbs)| (code.to_string(), lbs))
        .collect();
        Self { legal_max_lbs }
    }
}

impl EquipmentConfig {
    pub fn legal_max(&self, equipment: &str) -> Option<u32> {
        self.legal_max_lbs
            .get(&equipment.trim().to_uppercase())
            .copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

impl EngineConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(PostingError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| PostingError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DISCOVERY_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| PostingError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        let search = &self.search;
        if search.start_radius_miles <= 0.0 {
            return Err(PostingError::InvalidConfigValueError {
                field: "search.start_radius_miles".to_string(),
                value: search.start_radius_miles.to_string(),
                reason: "Radius must be positive".to_string(),
            });
        }
        if search.ceiling_radius_miles < search.start_radius_miles {
            return Err(PostingError::InvalidConfigValueError {
                field: "search.ceiling_radius_miles".to_string(),
                value: search.ceiling_radius_miles.to_string(),
                reason: "Ceiling must not be below the start radius".to_string(),
            });
        }
        match search.step {
            RadiusStep::Fixed { miles } if miles <= 0.0 => {
                return Err(PostingError::InvalidConfigValueError {
                    field: "search.step.miles".to_string(),
                    value: miles.to_string(),
                    reason: "Step must be positive".to_string(),
                });
            }
            RadiusStep::Multiplicative { factor } if factor <= 1.0 => {
                return Err(PostingError::InvalidConfigValueError {
                    field: "search.step.factor".to_string(),
                    value: factor.to_string(),
                    reason: "Factor must be greater than 1".to_string(),
                });
            }
            _ => {}
        }
        validation::validate_positive_number("search.max_attempts", search.max_attempts as usize, 1)?;
        validation::validate_positive_number(
            "search.target_unique_areas",
            search.target_unique_areas,
            1,
        )?;

        if self.discovery.enabled {
            let endpoint =
                validation::validate_required_field("discovery.endpoint", &self.discovery.endpoint)?;
            validation::validate_url("discovery.endpoint", endpoint)?;
            validation::validate_non_empty_string("discovery.category", &self.discovery.category)?;
            validation::validate_positive_number(
                "discovery.max_concurrent_calls",
                self.discovery.max_concurrent_calls,
                1,
            )?;
        }

        validation::validate_range("ranking.tie_epsilon", self.ranking.tie_epsilon, 0.0, 1.0)?;
        validation::validate_range("ranking.affinity_bonus", self.ranking.affinity_bonus, 0.0, 1.0)?;
        if self.ranking.tie_break == TieBreakMode::Delegated {
            let endpoint = validation::validate_required_field(
                "ranking.delegate_endpoint",
                &self.ranking.delegate_endpoint,
            )?;
            validation::validate_url("ranking.delegate_endpoint", endpoint)?;
        }

        validation::validate_positive_number("pairing.minimum_pairs", self.pairing.minimum_pairs, 1)?;
        validation::validate_positive_number(
            "export.max_rows_per_part",
            self.export.max_rows_per_part,
            1,
        )?;
        validation::validate_non_empty_string("export.file_prefix", &self.export.file_prefix)?;
        validation::validate_positive_number("batch.max_workers", self.batch.max_workers, 1)?;

        Ok(())
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
