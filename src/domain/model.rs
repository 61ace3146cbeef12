use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Freight market area (KMA)；多個城市對應同一個 market area
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketArea {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Verified,
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub state: String,
    pub coordinates: Option<Coordinates>,
    pub market_area: Option<MarketArea>,
    pub postal_code: Option<String>,
    pub provenance: Provenance,
}

impl City {
    /// 必須同時具備座標與 market area 才能參與配對
    pub fn is_eligible(&self) -> bool {
        self.coordinates.is_some()
            && self
                .market_area
                .as_ref()
                .map(|area| !area.code.trim().is_empty())
                .unwrap_or(false)
    }

    pub fn market_area_code(&self) -> Option<&str> {
        self.market_area.as_ref().map(|area| area.code.as_str())
    }

    pub fn key(&self) -> CityKey {
        CityKey::new(&self.name, &self.state)
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.name, self.state)
    }
}

/// Upsert key：(name, state) 不分大小寫
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CityKey {
    pub name: String,
    pub state: String,
}

impl CityKey {
    pub fn new(name: &str, state: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            state: state.trim().to_uppercase(),
        }
    }
}

/// Lane 上尚未解析的地點描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationQuery {
    pub city: String,
    pub state: String,
    pub postal_code: Option<String>,
}

impl fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.state)?;
        if let Some(zip) = &self.postal_code {
            write!(f, " {}", zip)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WeightSpec {
    Fixed { lbs: u32 },
    Randomized { min_lbs: u32, max_lbs: u32 },
}

impl WeightSpec {
    /// 決定驗證用的上限：固定重量本身，或隨機範圍的上界（範圍顛倒時自動交換）
    pub fn upper_bound(&self) -> u32 {
        match *self {
            WeightSpec::Fixed { lbs } => lbs,
            WeightSpec::Randomized { min_lbs, max_lbs } => min_lbs.max(max_lbs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSize {
    Full,
    Partial,
}

impl LoadSize {
    pub fn as_column(&self) -> &'static str {
        match self {
            LoadSize::Full => "Full",
            LoadSize::Partial => "Partial",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneRequest {
    pub lane_id: String,
    pub origin: LocationQuery,
    pub destination: LocationQuery,
    pub equipment: String,
    pub pickup_earliest: NaiveDate,
    pub pickup_latest: Option<NaiveDate>,
    pub weight: WeightSpec,
    pub length_ft: u32,
    pub load_size: LoadSize,
    pub commodity: Option<String>,
    pub comment: Option<String>,
    pub relax_diversity: bool,
}

impl LaneRequest {
    pub fn equipment_code(&self) -> String {
        self.equipment.trim().to_uppercase()
    }
}

/// 某個錨點附近的候選城市
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub city: City,
    pub distance_miles: f64,
    pub score: f64,
    pub affinity_match: bool,
}

impl ScoredCandidate {
    pub fn unscored(city: City, distance_miles: f64) -> Self {
        Self {
            city,
            distance_miles,
            score: 0.0,
            affinity_match: false,
        }
    }

    pub fn area_code(&self) -> &str {
        self.city.market_area_code().unwrap_or_default()
    }
}

/// 一組 pickup / delivery 候選；只存在於單一 lane 的處理範圍內
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub origin: City,
    pub destination: City,
    pub distance_miles: f64,
    pub score: f64,
}

impl CandidatePair {
    pub fn area_key(&self) -> AreaKey {
        AreaKey {
            origin: self.origin.market_area_code().unwrap_or_default().to_string(),
            destination: self
                .destination
                .market_area_code()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AreaKey {
    pub origin: String,
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Email,
    PrimaryPhone,
}

impl ContactMethod {
    pub const ALL: [ContactMethod; 2] = [ContactMethod::Email, ContactMethod::PrimaryPhone];

    pub fn as_column(&self) -> &'static str {
        match self {
            ContactMethod::Email => "email",
            ContactMethod::PrimaryPhone => "primary phone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallReason {
    InsufficientUniqueMarkets,
    EmptyOriginPool,
    EmptyDestinationPool,
}

impl ShortfallReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortfallReason::InsufficientUniqueMarkets => "insufficient_unique_markets",
            ShortfallReason::EmptyOriginPool => "empty_origin_pool",
            ShortfallReason::EmptyDestinationPool => "empty_destination_pool",
        }
    }
}

impl fmt::Display for ShortfallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub reason: ShortfallReason,
    pub found: usize,
    pub required: usize,
}
