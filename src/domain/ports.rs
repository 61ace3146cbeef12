use crate::core::distance::great_circle_miles;
use crate::domain::model::{City, Coordinates, LaneRequest, LocationQuery, MarketArea};
use crate::utils::error::{PostingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 城市目錄查詢介面（CityIndex）
#[async_trait]
pub trait CityStore: Send + Sync {
    /// (name, state) 精確比對，不分大小寫
    async fn find_by_name(&self, name: &str, state: &str) -> Result<Option<City>>;

    /// 同一州內的模糊比對，依相似度排序
    async fn search_by_name(&self, name: &str, state: &str, limit: usize) -> Result<Vec<City>>;

    async fn find_by_postal_code(&self, postal_code: &str) -> Result<Option<City>>;

    /// 半徑內可配對的城市與距離（英里）
    async fn within_radius(&self, center: Coordinates, radius_miles: f64)
        -> Result<Vec<(City, f64)>>;

    async fn by_market_area(&self, code: &str) -> Result<Vec<City>>;

    /// 以 (name, state) 為 key 寫入或更新
    async fn upsert(&self, city: City) -> Result<()>;

    /// 最近的已知城市所屬的 market area
    async fn nearest_market_area(
        &self,
        point: Coordinates,
        max_miles: f64,
    ) -> Result<Option<(MarketArea, f64)>> {
        let nearby = self.within_radius(point, max_miles).await?;
        Ok(nearby
            .into_iter()
            .filter_map(|(city, miles)| city.market_area.map(|area| (area, miles)))
            .min_by(|a, b| a.1.total_cmp(&b.1)))
    }

    /// 精確 → 郵遞區號 → 模糊，只回傳可配對的城市
    async fn resolve(&self, query: &LocationQuery) -> Result<Option<City>> {
        if let Some(city) = self.find_by_name(&query.city, &query.state).await? {
            if city.is_eligible() {
                return Ok(Some(city));
            }
        }
        if let Some(zip) = query.postal_code.as_deref().filter(|z| !z.trim().is_empty()) {
            if let Some(city) = self.find_by_postal_code(zip).await? {
                if city.is_eligible() {
                    return Ok(Some(city));
                }
            }
        }
        let fuzzy = self.search_by_name(&query.city, &query.state, 5).await?;
        Ok(fuzzy.into_iter().find(City::is_eligible))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryRequest {
    pub center: Coordinates,
    pub radius_miles: f64,
    pub category: String,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DiscoveredPlace {
    pub name: String,
    pub state: String,
    pub postal_code: Option<String>,
    pub country_code: String,
    pub coordinates: Coordinates,
}

impl DiscoveredPlace {
    pub fn distance_from(&self, point: Coordinates) -> f64 {
        great_circle_miles(point, self.coordinates)
    }
}

/// 外部地點探索服務（付費、有速率限制）
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn discover(&self, request: &DiscoveryRequest) -> Result<Vec<DiscoveredPlace>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieBreakCandidate {
    pub city: String,
    pub state: String,
    pub market_area: String,
    pub distance_miles: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieBreakRequest {
    pub equipment: String,
    pub candidate_a: TieBreakCandidate,
    pub candidate_b: TieBreakCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieBreakVerdict {
    pub winner: String,
    #[serde(default)]
    pub reason: String,
}

/// 可選的外部裁決服務；任何失敗都必須可以安全略過
#[async_trait]
pub trait TieBreakDelegate: Send + Sync {
    async fn judge(&self, request: &TieBreakRequest) -> Result<TieBreakVerdict>;
}

/// 無法轉成 lane 的輸入列，與其他 lane 一起回報
#[derive(Debug)]
pub struct RejectedLane {
    pub lane_id: String,
    pub row: usize,
    pub error: PostingError,
}

/// 一次讀入的 lane；單列格式錯誤不影響其他列
#[derive(Debug, Default)]
pub struct LaneIntake {
    pub lanes: Vec<LaneRequest>,
    pub rejected: Vec<RejectedLane>,
}

impl LaneIntake {
    pub fn from_lanes(lanes: Vec<LaneRequest>) -> Self {
        Self {
            lanes,
            rejected: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lane 來源（外部 lane 管理系統提供）
#[async_trait]
pub trait LaneSource: Send + Sync {
    async fn load_lanes(&self) -> Result<LaneIntake>;
}

/// 一次匯出寫入的檔案與統計
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportSummary {
    pub location: String,
    pub files: Vec<String>,
    pub exported_lanes: usize,
    pub partial_lanes: usize,
    pub failed_lanes: usize,
    pub skipped_lanes: usize,
    pub rows: usize,
}

impl ExportSummary {
    pub fn all_lanes_failed(&self) -> bool {
        self.exported_lanes == 0 && self.failed_lanes > 0
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    type Output: Send;

    async fn extract(&self) -> Result<LaneIntake>;
    async fn transform(&self, intake: LaneIntake) -> Result<Self::Output>;
    async fn load(&self, result: Self::Output) -> Result<ExportSummary>;
}
