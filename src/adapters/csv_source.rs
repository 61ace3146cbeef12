use crate::adapters::city_store::InMemoryCityStore;
use crate::domain::model::{
    City, Coordinates, LaneRequest, LoadSize, LocationQuery, MarketArea, Provenance, WeightSpec,
};
use crate::domain::ports::{LaneIntake, LaneSource, RejectedLane};
use crate::utils::error::{PostingError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 城市目錄 CSV 的一列
#[derive(Debug, Deserialize)]
struct CityRecord {
    city: String,
    state: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    kma_code: Option<String>,
    kma_name: Option<String>,
    zip: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CityRecord {
    fn into_city(self) -> City {
        let coordinates = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        };
        let market_area = non_empty(self.kma_code).map(|code| MarketArea {
            name: non_empty(self.kma_name).unwrap_or_else(|| code.clone()),
            code,
        });
        City {
            name: self.city.trim().to_string(),
            state: self.state.trim().to_uppercase(),
            coordinates,
            market_area,
            postal_code: non_empty(self.zip),
            provenance: Provenance::Verified,
        }
    }
}

/// 解析城市目錄；缺座標或 KMA 的城市保留但不可配對
pub fn parse_city_catalog(data: &[u8]) -> Result<Vec<City>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(data);
    let mut cities = Vec::new();
    for record in reader.deserialize::<CityRecord>() {
        cities.push(record?.into_city());
    }
    Ok(cities)
}

pub async fn load_city_catalog(path: impl AsRef<Path>) -> Result<InMemoryCityStore> {
    let path = path.as_ref();
    let data = tokio::fs::read(path).await?;
    let cities = parse_city_catalog(&data)?;
    let eligible = cities.iter().filter(|c| c.is_eligible()).count();
    tracing::info!(
        "🗺️ Loaded {} cities ({} pairing-eligible) from {}",
        cities.len(),
        eligible,
        path.display()
    );
    Ok(InMemoryCityStore::with_cities(cities))
}

#[derive(Debug, Deserialize)]
struct LaneRecord {
    lane_id: String,
    origin_city: String,
    origin_state: String,
    origin_zip: Option<String>,
    dest_city: String,
    dest_state: String,
    dest_zip: Option<String>,
    equipment: String,
    pickup_earliest: String,
    pickup_latest: Option<String>,
    weight_lbs: Option<u32>,
    weight_min_lbs: Option<u32>,
    weight_max_lbs: Option<u32>,
    randomize_weight: Option<bool>,
    length_ft: u32,
    full_partial: Option<String>,
    commodity: Option<String>,
    comment: Option<String>,
    relax_diversity: Option<bool>,
}

fn format_error(lane_id: &str, column: &str, message: impl Into<String>) -> PostingError {
    PostingError::FormatViolation {
        lane_id: lane_id.to_string(),
        column: column.to_string(),
        message: message.into(),
    }
}

fn parse_date(lane_id: &str, column: &str, value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .map_err(|_| format_error(lane_id, column, format!("'{}' is not a date", value)))
}

impl LaneRecord {
    fn into_request(self) -> Result<LaneRequest> {
        let lane_id = self.lane_id.trim().to_string();
        if lane_id.is_empty() {
            return Err(format_error("?", "lane_id", "lane id is empty"));
        }

        let weight = if self.randomize_weight.unwrap_or(false) {
            match (self.weight_min_lbs, self.weight_max_lbs) {
                (Some(min_lbs), Some(max_lbs)) => WeightSpec::Randomized { min_lbs, max_lbs },
                _ => {
                    return Err(format_error(
                        &lane_id,
                        "weight_min_lbs",
                        "randomized weight needs both weight_min_lbs and weight_max_lbs",
                    ))
                }
            }
        } else {
            let lbs = self
                .weight_lbs
                .ok_or_else(|| format_error(&lane_id, "weight_lbs", "weight is required"))?;
            WeightSpec::Fixed { lbs }
        };

        let load_size = match non_empty(self.full_partial)
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            None | Some("full") | Some("f") => LoadSize::Full,
            Some("partial") | Some("p") => LoadSize::Partial,
            Some(other) => {
                return Err(format_error(
                    &lane_id,
                    "full_partial",
                    format!("'{}' is neither full nor partial", other),
                ))
            }
        };

        let pickup_earliest = parse_date(&lane_id, "pickup_earliest", &self.pickup_earliest)?;
        let pickup_latest = non_empty(self.pickup_latest)
            .map(|v| parse_date(&lane_id, "pickup_latest", &v))
            .transpose()?;

        Ok(LaneRequest {
            origin: LocationQuery {
                city: self.origin_city.trim().to_string(),
                state: self.origin_state.trim().to_uppercase(),
                postal_code: non_empty(self.origin_zip),
            },
            destination: LocationQuery {
                city: self.dest_city.trim().to_string(),
                state: self.dest_state.trim().to_uppercase(),
                postal_code: non_empty(self.dest_zip),
            },
            equipment: self.equipment.trim().to_string(),
            pickup_earliest,
            pickup_latest,
            weight,
            length_ft: self.length_ft,
            load_size,
            commodity: non_empty(self.commodity),
            comment: non_empty(self.comment),
            relax_diversity: self.relax_diversity.unwrap_or(false),
            lane_id,
        })
    }
}

fn rejected_row(row: usize, lane_id: Option<&str>, error: PostingError) -> RejectedLane {
    let lane_id = lane_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("row {}", row));
    tracing::warn!("⚠️ Lane file row {} ({}) rejected: {}", row, lane_id, error);
    RejectedLane {
        lane_id,
        row,
        error,
    }
}

/// 解析 lane 檔；表頭或 CSV 結構錯誤整批拒絕，單列的欄位錯誤只拒絕該列
pub fn parse_lanes(data: &[u8]) -> Result<LaneIntake> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(data);
    let headers = reader.headers()?.clone();
    let id_column = headers.iter().position(|h| h == "lane_id");
    let mut intake = LaneIntake::default();

    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let row = index + 2;
        let lane_id = id_column.and_then(|i| record.get(i));

        let parsed = record
            .deserialize::<LaneRecord>(Some(&headers))
            .map_err(|e| {
                let column = match e.kind() {
                    csv::ErrorKind::Deserialize { err, .. } => err
                        .field()
                        .and_then(|i| headers.get(i as usize))
                        .unwrap_or("?")
                        .to_string(),
                    _ => "?".to_string(),
                };
                PostingError::FormatViolation {
                    lane_id: lane_id.unwrap_or("?").to_string(),
                    column,
                    message: e.to_string(),
                }
            })
            .and_then(LaneRecord::into_request);

        match parsed {
            Ok(lane) => intake.lanes.push(lane),
            Err(error) => intake.rejected.push(rejected_row(row, lane_id, error)),
        }
    }
    Ok(intake)
}

#[derive(Debug, Clone)]
pub struct CsvLaneSource {
    path: PathBuf,
}

impl CsvLaneSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LaneSource for CsvLaneSource {
    async fn load_lanes(&self) -> Result<LaneIntake> {
        let data = tokio::fs::read(&self.path).await?;
        parse_lanes(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorCategory;

    const CATALOG: &str = "\
city,state,latitude,longitude,kma_code,kma_name,zip
Cincinnati,oh,39.1031,-84.5120,OH_CIN,Cincinnati Mkt,45202
Dayton,OH,39.7589,-84.1916,OH_DAY,,
Nowhere,OH,,,OH_NOW,Nowhere Mkt,
";

    const LANES: &str = "\
lane_id,origin_city,origin_state,origin_zip,dest_city,dest_state,dest_zip,equipment,pickup_earliest,pickup_latest,weight_lbs,weight_min_lbs,weight_max_lbs,randomize_weight,length_ft,full_partial,commodity,comment,relax_diversity
L1,Cincinnati,oh,45202,Atlanta,GA,,V,2026-10-20,2026-10-22,40000,,,false,53,full,Paper,,
L2,Dayton,OH,,Macon,GA,,FD,10/21/2026,,,38000,42000,true,48,P,Steel coils,Tarps required,true
";

    #[test]
    fn test_parse_city_catalog() {
        let cities = parse_city_catalog(CATALOG.as_bytes()).unwrap();
        assert_eq!(cities.len(), 3);
        assert_eq!(cities[0].state, "OH");
        assert_eq!(cities[0].postal_code.as_deref(), Some("45202"));
        assert!(cities[0].is_eligible());
        // KMA 名稱缺漏時使用代碼
        assert_eq!(cities[1].market_area.as_ref().unwrap().name, "OH_DAY");
        assert!(cities[1].postal_code.is_none());
        assert!(!cities[2].is_eligible());
    }

    #[test]
    fn test_parse_lanes() {
        let intake = parse_lanes(LANES.as_bytes()).unwrap();
        assert!(intake.rejected.is_empty());
        let lanes = intake.lanes;
        assert_eq!(lanes.len(), 2);

        assert_eq!(lanes[0].origin.state, "OH");
        assert_eq!(lanes[0].weight, WeightSpec::Fixed { lbs: 40_000 });
        assert_eq!(lanes[0].pickup_latest, NaiveDate::from_ymd_opt(2026, 10, 22));
        assert!(lanes[0].comment.is_none());
        assert!(!lanes[0].relax_diversity);

        assert_eq!(
            lanes[1].weight,
            WeightSpec::Randomized {
                min_lbs: 38_000,
                max_lbs: 42_000
            }
        );
        assert_eq!(lanes[1].load_size, LoadSize::Partial);
        assert_eq!(lanes[1].pickup_earliest, NaiveDate::from_ymd_opt(2026, 10, 21).unwrap());
        assert!(lanes[1].relax_diversity);
    }

    #[test]
    fn test_randomized_lane_without_range_is_rejected() {
        let data = LANES.replace(",,38000,42000,true,", ",,38000,,true,");
        let intake = parse_lanes(data.as_bytes()).unwrap();
        assert_eq!(intake.lanes.len(), 1);
        assert_eq!(intake.rejected.len(), 1);
        assert_eq!(intake.rejected[0].row, 3);
        assert_eq!(intake.rejected[0].lane_id, "L2");
        assert!(intake.rejected[0].error.to_string().contains("weight_min_lbs"));
    }

    #[test]
    fn test_bad_row_does_not_block_sibling_lanes() {
        let data = format!(
            "{}BAD,Dayton,OH,,Macon,GA,,V,next tuesday,,40000,,,false,53,full,,,\n\
             ,Dayton,OH,,Macon,GA,,V,2026-10-20,,heavy,,,false,53,full,,,\n\
             LAST,Dayton,OH,,Macon,GA,,V,2026-10-20,,40000,,,false,53,whole,,,\n",
            LANES
        );
        let intake = parse_lanes(data.as_bytes()).unwrap();

        let ids: Vec<&str> = intake.lanes.iter().map(|l| l.lane_id.as_str()).collect();
        assert_eq!(ids, vec!["L1", "L2"]);

        let rejected: Vec<(&str, usize)> = intake
            .rejected
            .iter()
            .map(|r| (r.lane_id.as_str(), r.row))
            .collect();
        assert_eq!(rejected, vec![("BAD", 4), ("row 5", 5), ("LAST", 6)]);
        assert!(intake.rejected.iter().all(|r| r.error.category() == ErrorCategory::Format));
        assert!(intake.rejected[0].error.to_string().contains("next tuesday"));
        assert!(intake.rejected[2].error.to_string().contains("whole"));
    }

    #[test]
    fn test_structural_csv_error_fails_whole_file() {
        let data = format!("{}L9,Dayton,OH\n", LANES);
        assert!(matches!(
            parse_lanes(data.as_bytes()),
            Err(PostingError::CsvError(_))
        ));
    }

    #[tokio::test]
    async fn test_csv_lane_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanes.csv");
        std::fs::write(&path, LANES).unwrap();

        let intake = CsvLaneSource::new(&path).load_lanes().await.unwrap();
        assert_eq!(intake.lanes[1].lane_id, "L2");

        let missing = CsvLaneSource::new(dir.path().join("none.csv")).load_lanes().await;
        assert!(matches!(missing, Err(PostingError::IoError(_))));
    }
}
