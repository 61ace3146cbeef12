#![allow(dead_code)]

use chrono::NaiveDate;
use lane_poster::domain::model::{LaneRequest, LoadSize, LocationQuery, WeightSpec};
use std::path::{Path, PathBuf};

/// Cincinnati 北邊與 Atlanta 南邊的走廊，每個城市各屬一個 market area
pub const CORRIDOR_CATALOG: &str = "\
city,state,latitude,longitude,kma_code,kma_name,zip
Cincinnati,OH,39.1031,-84.5120,OH_CIN,Cincinnati Mkt,45202
Middletown,OH,39.5373,-84.5120,OH_MID,Middletown Mkt,45042
Dayton,OH,39.9715,-84.5120,OH_DAY,Dayton Mkt,45402
Sidney,OH,40.4057,-84.5120,OH_LIM,Lima Mkt,45365
Atlanta,GA,33.7490,-84.3880,GA_ATL,Atlanta Mkt,30303
Griffin,GA,33.1700,-84.3880,GA_GRF,Griffin Mkt,30223
Macon,GA,32.5911,-84.3880,GA_MAC,Macon Mkt,31201
Nowhere,OH,,,,,
";

pub const LANE_HEADER: &str = "lane_id,origin_city,origin_state,origin_zip,dest_city,dest_state,dest_zip,equipment,pickup_earliest,pickup_latest,weight_lbs,weight_min_lbs,weight_max_lbs,randomize_weight,length_ft,full_partial,commodity,comment,relax_diversity";

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

pub fn lane(id: &str, origin: (&str, &str), destination: (&str, &str), weight: WeightSpec) -> LaneRequest {
    LaneRequest {
        lane_id: id.to_string(),
        origin: LocationQuery {
            city: origin.0.to_string(),
            state: origin.1.to_string(),
            postal_code: None,
        },
        destination: LocationQuery {
            city: destination.0.to_string(),
            state: destination.1.to_string(),
            postal_code: None,
        },
        equipment: "V".to_string(),
        pickup_earliest: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
        pickup_latest: NaiveDate::from_ymd_opt(2026, 10, 21),
        weight,
        length_ft: 53,
        load_size: LoadSize::Full,
        commodity: Some("Paper".to_string()),
        comment: None,
        relax_diversity: false,
    }
}
