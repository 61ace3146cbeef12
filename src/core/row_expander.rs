use crate::config::engine_config::EquipmentConfig;
use crate::domain::model::{CandidatePair, ContactMethod, LaneRequest, WeightSpec};
use crate::domain::posting::{is_required, PostingRow, POSTING_HEADERS, REFERENCE_ID_PATTERN};
use crate::utils::error::{PostingError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const DATE_FORMAT: &str = "%m/%d/%Y";
const MAX_ID_ATTEMPTS: usize = 10_000;

/// 產生單一匯出內不重複的 Reference ID
#[derive(Debug, Default)]
pub struct ReferenceIdGenerator {
    used: HashSet<String>,
}

impl ReferenceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> Result<String> {
        let mut rng = rand::rng();
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = format!("RR{:05}", rng.random_range(0..100_000u32));
            if self.used.insert(id.clone()) {
                return Ok(id);
            }
        }
        Err(PostingError::ProcessingError {
            message: format!("could not find an unused reference id after {} attempts", MAX_ID_ATTEMPTS),
        })
    }

    pub fn issued(&self) -> usize {
        self.used.len()
    }
}

/// 以 (lane id, pair 序號) 為種子，重新展開同一組 pair 會得到相同重量（跨版本穩定）
fn weight_seed(lane_id: &str, pair_index: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(lane_id.as_bytes());
    hasher.update([0u8]);
    hasher.update((pair_index as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

fn single_line(text: Option<&str>) -> String {
    text.map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

pub struct RowExpander {
    equipment: EquipmentConfig,
    reference_pattern: Regex,
}

impl RowExpander {
    pub fn new(equipment: EquipmentConfig) -> Result<Self> {
        let reference_pattern =
            Regex::new(REFERENCE_ID_PATTERN).map_err(|e| PostingError::ConfigError {
                message: format!("invalid reference id pattern: {}", e),
            })?;
        Ok(Self {
            equipment,
            reference_pattern,
        })
    }

    /// 在產生任何資料列之前檢查重量，超過法定上限直接拒絕（不做截斷）
    pub fn validate_weight(&self, lane: &LaneRequest) -> Result<u32> {
        let code = lane.equipment_code();
        let legal_max =
            self.equipment
                .legal_max(&code)
                .ok_or_else(|| PostingError::FormatViolation {
                    lane_id: lane.lane_id.clone(),
                    column: "Equipment*".to_string(),
                    message: format!("unknown equipment code '{}'", code),
                })?;

        let lower = match lane.weight {
            WeightSpec::Fixed { lbs } => lbs,
            WeightSpec::Randomized { min_lbs, max_lbs } => min_lbs.min(max_lbs),
        };
        if lower == 0 {
            return Err(PostingError::FormatViolation {
                lane_id: lane.lane_id.clone(),
                column: "Weight (lbs)*".to_string(),
                message: "weight must be greater than zero".to_string(),
            });
        }

        let upper = lane.weight.upper_bound();
        if upper > legal_max {
            return Err(PostingError::EquipmentWeightViolation {
                equipment: code,
                weight: upper,
                legal_max,
            });
        }
        Ok(legal_max)
    }

    pub fn sample_weight(&self, lane: &LaneRequest, pair_index: usize, legal_max: u32) -> Result<u32> {
        let weight = match lane.weight {
            WeightSpec::Fixed { lbs } => lbs,
            WeightSpec::Randomized { min_lbs, max_lbs } => {
                let (low, high) = if min_lbs <= max_lbs {
                    (min_lbs, max_lbs)
                } else {
                    (max_lbs, min_lbs)
                };
                let mut rng = StdRng::seed_from_u64(weight_seed(&lane.lane_id, pair_index));
                rng.random_range(low..=high)
            }
        };
        if weight > legal_max {
            return Err(PostingError::EquipmentWeightViolation {
                equipment: lane.equipment_code(),
                weight,
                legal_max,
            });
        }
        Ok(weight)
    }

    /// 每組 pair 依聯絡方式各產生一列；任何一列不合格式即整條 lane 失敗
    pub fn expand(&self, lane: &LaneRequest, pairs: &[CandidatePair]) -> Result<Vec<PostingRow>> {
        let legal_max = self.validate_weight(lane)?;

        let pickup_latest = lane.pickup_latest.unwrap_or(lane.pickup_earliest);
        if pickup_latest < lane.pickup_earliest {
            return Err(PostingError::FormatViolation {
                lane_id: lane.lane_id.clone(),
                column: "Pickup Latest".to_string(),
                message: format!(
                    "pickup window ends ({}) before it starts ({})",
                    pickup_latest, lane.pickup_earliest
                ),
            });
        }

        let mut ids = ReferenceIdGenerator::new();
        let mut rows = Vec::with_capacity(pairs.len() * ContactMethod::ALL.len());
        for (index, pair) in pairs.iter().enumerate() {
            let weight = self.sample_weight(lane, index, legal_max)?;
            for method in ContactMethod::ALL {
                let mut row = PostingRow::new(lane.lane_id.clone());
                row.set(
                    "Pickup Earliest*",
                    lane.pickup_earliest.format(DATE_FORMAT).to_string(),
                );
                row.set("Pickup Latest", pickup_latest.format(DATE_FORMAT).to_string());
                row.set("Length (ft)*", lane.length_ft.to_string());
                row.set("Weight (lbs)*", weight.to_string());
                row.set("Full/Partial*", lane.load_size.as_column());
                row.set("Equipment*", lane.equipment_code());
                row.set("Use Private Network*", "yes");
                row.set("Use DAT Loadboard*", "yes");
                row.set("Contact Method*", method.as_column());
                row.set("Origin City*", pair.origin.name.clone());
                row.set("Origin State*", pair.origin.state.clone());
                row.set(
                    "Origin Postal Code",
                    pair.origin.postal_code.clone().unwrap_or_default(),
                );
                row.set("Destination City*", pair.destination.name.clone());
                row.set("Destination State*", pair.destination.state.clone());
                row.set(
                    "Destination Postal Code",
                    pair.destination.postal_code.clone().unwrap_or_default(),
                );
                row.set("Comment", single_line(lane.comment.as_deref()));
                row.set("Commodity", single_line(lane.commodity.as_deref()));
                row.set("Reference ID", ids.next_id()?);

                self.validate_row(&row, legal_max)?;
                rows.push(row);
            }
        }

        tracing::debug!(
            "🧾 Lane {}: expanded {} pairs into {} rows",
            lane.lane_id,
            pairs.len(),
            rows.len()
        );
        Ok(rows)
    }

    pub fn validate_row(&self, row: &PostingRow, legal_max: u32) -> Result<()> {
        let violation = |column: &str, message: String| PostingError::FormatViolation {
            lane_id: row.lane_id.clone(),
            column: column.to_string(),
            message,
        };

        for (header, value) in POSTING_HEADERS.iter().zip(row.fields.iter()) {
            if is_required(header) && value.trim().is_empty() {
                return Err(violation(header, "required column is empty".to_string()));
            }
            if value.contains('\n') || value.contains('\r') {
                return Err(violation(header, "value spans multiple lines".to_string()));
            }
        }

        let reference = row.reference_id();
        if !self.reference_pattern.is_match(reference) {
            return Err(violation(
                "Reference ID",
                format!("'{}' does not match {}", reference, REFERENCE_ID_PATTERN),
            ));
        }

        let weight: u32 = row
            .get("Weight (lbs)*")
            .unwrap_or_default()
            .parse()
            .map_err(|_| violation("Weight (lbs)*", "weight is not a whole number".to_string()))?;
        if weight > legal_max {
            return Err(violation(
                "Weight (lbs)*",
                format!("{} exceeds legal maximum {}", weight, legal_max),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::radius_search::tests::city_at;
    use crate::domain::model::{LoadSize, LocationQuery};
    use crate::domain::posting::COLUMN_COUNT;
    use chrono::NaiveDate;

    pub(crate) fn lane(weight: WeightSpec) -> LaneRequest {
        LaneRequest {
            lane_id: "LANE-1".to_string(),
            origin: LocationQuery {
                city: "Cincinnati".to_string(),
                state: "OH".to_string(),
                postal_code: None,
            },
            destination: LocationQuery {
                city: "Atlanta".to_string(),
                state: "GA".to_string(),
                postal_code: None,
            },
            equipment: "v".to_string(),
            pickup_earliest: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            pickup_latest: NaiveDate::from_ymd_opt(2026, 10, 22),
            weight,
            length_ft: 53,
            load_size: LoadSize::Full,
            commodity: Some("Paper\nrolls".to_string()),
            comment: None,
            relax_diversity: false,
        }
    }

    pub(crate) fn pairs(n: usize) -> Vec<CandidatePair> {
        (0..n)
            .map(|i| CandidatePair {
                origin: city_at(&format!("Origin{}", i), "OH", 39.0, -84.0, &format!("OA{}", i)),
                destination: city_at(&format!("Dest{}", i), "GA", 33.7, -84.4, &format!("DA{}", i)),
                distance_miles: 370.0,
                score: 0.8,
            })
            .collect()
    }

    fn expander() -> RowExpander {
        RowExpander::new(EquipmentConfig::default()).unwrap()
    }

    #[test]
    fn test_six_pairs_make_twelve_rows() {
        let rows = expander()
            .expand(&lane(WeightSpec::Fixed { lbs: 42_000 }), &pairs(6))
            .unwrap();

        assert_eq!(rows.len(), 12);
        let pattern = Regex::new(REFERENCE_ID_PATTERN).unwrap();
        let ids: HashSet<&str> = rows.iter().map(|r| r.reference_id()).collect();
        assert_eq!(ids.len(), 12);
        for row in &rows {
            assert_eq!(row.fields.len(), COLUMN_COUNT);
            assert!(pattern.is_match(row.reference_id()));
        }
        assert_eq!(rows[0].get("Contact Method*"), Some("email"));
        assert_eq!(rows[1].get("Contact Method*"), Some("primary phone"));
        assert_eq!(rows[0].get("Pickup Earliest*"), Some("10/20/2026"));
        assert_eq!(rows[0].get("Pickup Latest"), Some("10/22/2026"));
        assert_eq!(rows[0].get("Equipment*"), Some("V"));
        assert_eq!(rows[0].get("Commodity"), Some("Paper rolls"));
        assert_eq!(rows[0].get("Origin Postal Code"), Some(""));
    }

    #[test]
    fn test_randomized_weight_over_legal_max_is_rejected() {
        let result = expander().expand(
            &lane(WeightSpec::Randomized {
                min_lbs: 46_000,
                max_lbs: 50_000,
            }),
            &pairs(6),
        );
        match result {
            Err(PostingError::EquipmentWeightViolation {
                equipment,
                weight,
                legal_max,
            }) => {
                assert_eq!(equipment, "V");
                assert_eq!(weight, 50_000);
                assert_eq!(legal_max, 44_000);
            }
            other => panic!("expected weight violation, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_weight_over_legal_max_is_rejected_not_clamped() {
        let result = expander().expand(&lane(WeightSpec::Fixed { lbs: 44_001 }), &pairs(1));
        assert!(matches!(
            result,
            Err(PostingError::EquipmentWeightViolation { .. })
        ));
    }

    #[test]
    fn test_randomized_weight_within_bounds_and_reversed_range() {
        let expander = expander();
        let lane = lane(WeightSpec::Randomized {
            min_lbs: 43_000,
            max_lbs: 38_000,
        });
        let rows = expander.expand(&lane, &pairs(20)).unwrap();
        for row in &rows {
            let w: u32 = row.get("Weight (lbs)*").unwrap().parse().unwrap();
            assert!((38_000..=43_000).contains(&w));
        }
        // both contact-method rows of a pair share the sampled weight
        assert_eq!(rows[0].get("Weight (lbs)*"), rows[1].get("Weight (lbs)*"));
    }

    #[test]
    fn test_weight_seed_is_fixed_across_builds() {
        // 固定的 SHA-256 前 8 bytes，不隨編譯器版本改變
        assert_eq!(weight_seed("LANE-1", 0), 2_258_163_370_190_010_997);
        assert_eq!(weight_seed("LANE-1", 1), 4_894_573_912_653_360_224);
        assert_ne!(weight_seed("LANE-1", 0), weight_seed("LANE-10", 0));
    }

    #[test]
    fn test_reexpansion_is_structurally_idempotent() {
        let expander = expander();
        let lane = lane(WeightSpec::Randomized {
            min_lbs: 30_000,
            max_lbs: 40_000,
        });
        let first = expander.expand(&lane, &pairs(6)).unwrap();
        let second = expander.expand(&lane, &pairs(6)).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.content_without_reference(), b.content_without_reference());
        }
    }

    #[test]
    fn test_unknown_equipment_and_bad_window() {
        let mut unknown = lane(WeightSpec::Fixed { lbs: 20_000 });
        unknown.equipment = "ZZ".to_string();
        assert!(matches!(
            expander().expand(&unknown, &pairs(1)),
            Err(PostingError::FormatViolation { .. })
        ));

        let mut backwards = lane(WeightSpec::Fixed { lbs: 20_000 });
        backwards.pickup_latest = NaiveDate::from_ymd_opt(2026, 10, 1);
        assert!(matches!(
            expander().expand(&backwards, &pairs(1)),
            Err(PostingError::FormatViolation { .. })
        ));
    }

    #[test]
    fn test_validate_row_rejects_empty_required_column() {
        let expander = expander();
        let mut row = expander
            .expand(&lane(WeightSpec::Fixed { lbs: 20_000 }), &pairs(1))
            .unwrap()
            .remove(0);
        row.set("Origin City*", "");
        let err = expander.validate_row(&row, 44_000).unwrap_err();
        assert!(err.to_string().contains("Origin City*"));

        row.set("Origin City*", "Dayton");
        row.set("Reference ID", "ABC");
        assert!(expander.validate_row(&row, 44_000).is_err());
    }

    #[test]
    fn test_reference_ids_unique_across_many_draws() {
        let mut ids = ReferenceIdGenerator::new();
        let drawn: HashSet<String> = (0..2_000).map(|_| ids.next_id().unwrap()).collect();
        assert_eq!(drawn.len(), 2_000);
        assert_eq!(ids.issued(), 2_000);
    }
}
