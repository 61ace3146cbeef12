use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostingError {
    #[error("Cannot resolve {role} location '{query}'")]
    UnresolvableLocation { role: String, query: String },

    #[error("Lane {lane_id}: only {found} of {required} unique market-area pairs ({reason})")]
    InsufficientDiversity {
        lane_id: String,
        found: usize,
        required: usize,
        reason: String,
    },

    #[error("Equipment {equipment}: weight {weight} lbs exceeds legal maximum {legal_max} lbs")]
    EquipmentWeightViolation {
        equipment: String,
        weight: u32,
        legal_max: u32,
    },

    #[error("External provider '{provider}' failed: {message}")]
    ExternalProviderFailure { provider: String, message: String },

    #[error("Lane {lane_id}: column '{column}' violates posting format: {message}")]
    FormatViolation {
        lane_id: String,
        column: String,
        message: String,
    },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration '{field}' is invalid: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

pub type Result<T> = std::result::Result<T, PostingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Location,
    Diversity,
    Weight,
    Provider,
    Format,
    Configuration,
    Io,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl PostingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PostingError::UnresolvableLocation { .. } => ErrorCategory::Location,
            PostingError::InsufficientDiversity { .. } => ErrorCategory::Diversity,
            PostingError::EquipmentWeightViolation { .. } => ErrorCategory::Weight,
            PostingError::ExternalProviderFailure { .. } | PostingError::HttpError(_) => {
                ErrorCategory::Provider
            }
            PostingError::FormatViolation { .. } => ErrorCategory::Format,
            PostingError::ConfigError { .. }
            | PostingError::ConfigValidationError { .. }
            | PostingError::InvalidConfigValueError { .. }
            | PostingError::MissingConfigError { .. } => ErrorCategory::Configuration,
            PostingError::IoError(_) | PostingError::ZipError(_) => ErrorCategory::Io,
            PostingError::CsvError(_)
            | PostingError::SerializationError(_)
            | PostingError::ProcessingError { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Provider => ErrorSeverity::Low,
            ErrorCategory::Diversity => ErrorSeverity::Medium,
            ErrorCategory::Location
            | ErrorCategory::Weight
            | ErrorCategory::Format
            | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::Configuration | ErrorCategory::Io => ErrorSeverity::Critical,
        }
    }

    /// 是否只影響單一 lane（其他 lane 照常輸出）
    pub fn is_lane_fatal(&self) -> bool {
        matches!(
            self,
            PostingError::UnresolvableLocation { .. }
                | PostingError::InsufficientDiversity { .. }
                | PostingError::EquipmentWeightViolation { .. }
                | PostingError::FormatViolation { .. }
        )
    }

    /// 給使用者的簡短錯誤描述
    pub fn user_friendly_message(&self) -> String {
        match self {
            PostingError::UnresolvableLocation { role, query } => {
                format!("Could not find {} city '{}' in the city catalog", role, query)
            }
            PostingError::InsufficientDiversity {
                lane_id,
                found,
                required,
                ..
            } => format!(
                "Lane {} has only {} distinct market-area pairs (needs {})",
                lane_id, found, required
            ),
            PostingError::EquipmentWeightViolation {
                equipment,
                weight,
                legal_max,
            } => format!(
                "Weight {} lbs is too heavy for equipment {} (max {} lbs)",
                weight, equipment, legal_max
            ),
            PostingError::ExternalProviderFailure { provider, .. } => {
                format!("{} is unavailable; continuing with local city data", provider)
            }
            PostingError::FormatViolation { lane_id, column, .. } => {
                format!("Lane {} produced an invalid '{}' column", lane_id, column)
            }
            PostingError::ConfigError { .. }
            | PostingError::ConfigValidationError { .. }
            | PostingError::InvalidConfigValueError { .. }
            | PostingError::MissingConfigError { .. } => format!("Configuration problem: {}", self),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Location => "Check the city/state spelling or add the city to the catalog",
            ErrorCategory::Diversity => {
                "Enable fill mode (relax_diversity or --fill) or widen the search radius ceiling"
            }
            ErrorCategory::Weight => "Lower the lane weight or choose an equipment class with a higher limit",
            ErrorCategory::Provider => "Check the provider endpoint and API key; local results are still used",
            ErrorCategory::Format => "Check the lane's dates, equipment code and free-text fields",
            ErrorCategory::Configuration => "Fix the configuration file and run again",
            ErrorCategory::Io => "Check that the input files exist and the output directory is writable",
            ErrorCategory::Data => "Check the input CSV headers and values",
        }
    }
}
