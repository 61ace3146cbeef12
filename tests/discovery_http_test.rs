mod common;

use common::lane;
use httpmock::prelude::*;
use lane_poster::app::build_lane_processor;
use lane_poster::config::engine_config::EngineConfig;
use lane_poster::domain::model::{Coordinates, Provenance, WeightSpec};
use lane_poster::domain::ports::{CityStore, DiscoveryProvider, DiscoveryRequest};
use lane_poster::{HttpDiscoveryProvider, InMemoryCityStore};
use std::sync::Arc;
use std::time::Duration;

/// 本地只有兩個俄亥俄 market area；Toledo 在搜尋上限外，只能靠探索補上
const SPARSE_CATALOG: &str = "\
city,state,latitude,longitude,kma_code,kma_name,zip
Cincinnati,OH,39.1031,-84.5120,OH_CIN,Cincinnati Mkt,
Dayton,OH,39.9715,-84.5120,OH_DAY,Dayton Mkt,
Toledo,OH,41.8532,-84.5120,OH_TOL,Toledo Mkt,
Atlanta,GA,33.7490,-84.3880,GA_ATL,Atlanta Mkt,
Griffin,GA,33.1700,-84.3880,GA_GRF,Griffin Mkt,
Macon,GA,32.5911,-84.3880,GA_MAC,Macon Mkt,
";

fn places_body() -> serde_json::Value {
    serde_json::json!({
        "features": [
            {"properties": {"city": "Wapakoneta", "state_code": "OH", "postcode": "45895",
                            "country_code": "us", "lat": 41.1294, "lon": -84.5120}},
            {"properties": {"city": "Windsor", "state_code": "ON",
                            "country_code": "ca", "lat": 39.5, "lon": -84.5}}
        ]
    })
}

fn sparse_store() -> Arc<InMemoryCityStore> {
    let cities = lane_poster::adapters::csv_source::parse_city_catalog(SPARSE_CATALOG.as_bytes())
        .unwrap();
    Arc::new(InMemoryCityStore::with_cities(cities))
}

fn discovery_config(server: &MockServer) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.discovery.enabled = true;
    config.discovery.endpoint = Some(server.url("/places"));
    config.discovery.api_key = Some("secret".to_string());
    config.discovery.timeout_seconds = 1;
    config
}

#[tokio::test]
async fn test_provider_sends_expected_query() {
    let server = MockServer::start();
    let places_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/places")
            .query_param("radius_meters", "241402")
            .query_param("categories", "populated_place")
            .query_param("limit", "20")
            .query_param("apiKey", "secret")
            .query_param_exists("lat")
            .query_param_exists("lon");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(places_body());
    });

    let provider =
        HttpDiscoveryProvider::new(server.url("/places"), Some("secret".to_string()), Duration::from_secs(2))
            .unwrap();
    let places = provider
        .discover(&DiscoveryRequest {
            center: Coordinates::new(39.1031, -84.5120),
            radius_miles: 150.0,
            category: "populated_place".to_string(),
            limit: 20,
        })
        .await
        .unwrap();

    places_mock.assert();
    assert_eq!(places.len(), 2);
    assert_eq!(places[0].name, "Wapakoneta");
    assert_eq!(places[0].country_code, "US");
}

#[tokio::test]
async fn test_sparse_anchor_is_augmented_and_discovered_city_stored() {
    let server = MockServer::start();
    let places_mock = server.mock(|when, then| {
        when.method(GET).path("/places");
        then.status(200).json_body(places_body());
    });

    let store = sparse_store();
    let config = discovery_config(&server);
    let processor = build_lane_processor(store.clone(), &config).unwrap();

    let export = processor
        .process(&lane("D1", ("Cincinnati", "OH"), ("Atlanta", "GA"), WeightSpec::Fixed { lbs: 40_000 }))
        .await
        .unwrap();

    // 起點與終點各呼叫一次
    places_mock.assert_hits(2);
    assert!(export.plan.origin.discovery_called);
    assert_eq!(export.plan.origin.local_market_areas, 2);
    assert_eq!(export.plan.origin.discovered_market_areas, 1);
    assert_eq!(export.plan.destination.discovered_market_areas, 0);
    assert!(export.plan.degradations.is_empty());
    assert!(!export.is_partial());
    assert_eq!(export.rows.len(), 12);
    assert!(export
        .plan
        .pairs
        .iter()
        .any(|p| p.origin.name == "Wapakoneta" && p.origin.market_area_code() == Some("OH_TOL")));

    let stored = store.find_by_name("Wapakoneta", "OH").await.unwrap().unwrap();
    assert_eq!(stored.provenance, Provenance::Discovered);
    assert!(store.find_by_name("Windsor", "ON").await.unwrap().is_none());
}

#[tokio::test]
async fn test_provider_error_degrades_to_local_only() {
    let server = MockServer::start();
    let places_mock = server.mock(|when, then| {
        when.method(GET).path("/places");
        then.status(503).body("quota exceeded");
    });

    let store = sparse_store();
    let processor = build_lane_processor(store, &discovery_config(&server)).unwrap();
    let export = processor
        .process(&lane("D2", ("Cincinnati", "OH"), ("Atlanta", "GA"), WeightSpec::Fixed { lbs: 40_000 }))
        .await
        .unwrap();

    places_mock.assert_hits(2);
    assert_eq!(export.plan.degradations.len(), 2);
    assert!(export.plan.degradations[0].contains("503"));
    // 2 個起點 market area × 3 個終點 market area 仍足夠 6 組
    assert_eq!(export.plan.pairs.len(), 6);
    assert_eq!(export.rows.len(), 12);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start();
    let _places_mock = server.mock(|when, then| {
        when.method(GET).path("/places");
        then.status(200)
            .delay(Duration::from_secs(3))
            .json_body(places_body());
    });

    let store = sparse_store();
    let processor = build_lane_processor(store, &discovery_config(&server)).unwrap();
    let plan = processor
        .plan(&lane("D3", ("Cincinnati", "OH"), ("Atlanta", "GA"), WeightSpec::Fixed { lbs: 40_000 }))
        .await
        .unwrap();

    assert_eq!(plan.origin.discovered_market_areas, 0);
    assert_eq!(plan.degradations.len(), 2);
    assert_eq!(plan.pairs.len(), 6);
}

#[tokio::test]
async fn test_call_budget_is_shared_across_lanes() {
    let server = MockServer::start();
    let places_mock = server.mock(|when, then| {
        when.method(GET).path("/places");
        then.status(200).json_body(places_body());
    });

    let store = sparse_store();
    let mut config = discovery_config(&server);
    config.discovery.max_calls_per_batch = 1;
    let processor = build_lane_processor(store, &config).unwrap();

    let first = processor
        .plan(&lane("B1", ("Cincinnati", "OH"), ("Atlanta", "GA"), WeightSpec::Fixed { lbs: 40_000 }))
        .await
        .unwrap();
    let second = processor
        .plan(&lane("B2", ("Dayton", "OH"), ("Macon", "GA"), WeightSpec::Fixed { lbs: 40_000 }))
        .await
        .unwrap();

    places_mock.assert_hits(1);
    assert!(first.origin.discovery_called);
    assert!(!first.destination.discovery_called);
    assert!(first.degradations[0].contains("budget"));
    assert!(!second.origin.discovery_called);
    assert_eq!(second.degradations.len(), 2);
}
