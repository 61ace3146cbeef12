use crate::core::distance::{bounding_box, great_circle_miles, within_box};
use crate::domain::model::{City, CityKey, Coordinates, Provenance};
use crate::domain::ports::CityStore;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

const FUZZY_THRESHOLD: f64 = 0.92;

/// 記憶體內的城市目錄，以 (name, state) upsert，可在多個 lane 間共用
#[derive(Debug, Default)]
pub struct InMemoryCityStore {
    cities: RwLock<HashMap<CityKey, City>>,
}

impl InMemoryCityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cities(cities: impl IntoIterator<Item = City>) -> Self {
        let map = cities.into_iter().map(|city| (city.key(), city)).collect();
        Self {
            cities: RwLock::new(map),
        }
    }

    pub async fn len(&self) -> usize {
        self.cities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cities.read().await.is_empty()
    }
}

#[async_trait]
impl CityStore for InMemoryCityStore {
    async fn find_by_name(&self, name: &str, state: &str) -> Result<Option<City>> {
        Ok(self.cities.read().await.get(&CityKey::new(name, state)).cloned())
    }

    async fn search_by_name(&self, name: &str, state: &str, limit: usize) -> Result<Vec<City>> {
        let wanted = CityKey::new(name, state);
        let cities = self.cities.read().await;

        let mut matches: Vec<(f64, &City)> = cities
            .iter()
            .filter(|(key, _)| key.state == wanted.state)
            .map(|(key, city)| (strsim::jaro_winkler(&key.name, &wanted.name), city))
            .filter(|(similarity, _)| *similarity >= FUZZY_THRESHOLD)
            .collect();
        matches.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));

        Ok(matches
            .into_iter()
            .take(limit)
            .map(|(_, city)| city.clone())
            .collect())
    }

    async fn find_by_postal_code(&self, postal_code: &str) -> Result<Option<City>> {
        let wanted = postal_code.trim();
        let cities = self.cities.read().await;
        let mut found: Vec<&City> = cities
            .values()
            .filter(|city| city.postal_code.as_deref().map(str::trim) == Some(wanted))
            .collect();
        found.sort_by_key(|city| city.key());
        Ok(found.first().map(|city| (*city).clone()))
    }

    async fn within_radius(
        &self,
        center: Coordinates,
        radius_miles: f64,
    ) -> Result<Vec<(City, f64)>> {
        let bounds = bounding_box(center, radius_miles);
        let cities = self.cities.read().await;

        let mut nearby: Vec<(City, f64)> = cities
            .values()
            .filter(|city| city.is_eligible())
            .filter_map(|city| {
                let point = city.coordinates?;
                if !within_box(point, &bounds) {
                    return None;
                }
                let miles = great_circle_miles(center, point);
                (miles <= radius_miles).then(|| (city.clone(), miles))
            })
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.key().cmp(&b.0.key())));
        Ok(nearby)
    }

    async fn by_market_area(&self, code: &str) -> Result<Vec<City>> {
        let cities = self.cities.read().await;
        let mut found: Vec<City> = cities
            .values()
            .filter(|city| city.market_area_code() == Some(code))
            .cloned()
            .collect();
        found.sort_by_key(|city| city.key());
        Ok(found)
    }

    async fn upsert(&self, city: City) -> Result<()> {
        let mut cities = self.cities.write().await;
        let key = city.key();
        match cities.get(&key) {
            // 已驗證的資料不會被探索結果覆蓋
            Some(existing)
                if existing.provenance == Provenance::Verified
                    && city.provenance != Provenance::Verified
                    && existing.is_eligible() =>
            {
                tracing::debug!("Keeping verified record for {}", existing);
            }
            _ => {
                cities.insert(key, city);
            }
        }
        Ok(())
    }
}
