use crate::config::engine_config::{RadiusStep, SearchConfig};
use crate::domain::model::{City, ScoredCandidate};
use crate::domain::ports::CityStore;
use crate::utils::error::{PostingError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 半徑擴張的狀態機
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchState {
    Searching { radius_miles: f64, attempt: u32 },
    /// 已達到目標 market area 數量
    Satisfied { radius_miles: f64, attempts: u32 },
    /// 到達半徑上限或重試次數用盡
    Exhausted { radius_miles: f64, attempts: u32 },
}

impl SearchState {
    pub fn radius_miles(&self) -> f64 {
        match *self {
            SearchState::Searching { radius_miles, .. }
            | SearchState::Satisfied { radius_miles, .. }
            | SearchState::Exhausted { radius_miles, .. } => radius_miles,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchState::Searching { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPolicy {
    pub start_radius_miles: f64,
    pub ceiling_radius_miles: f64,
    pub step: RadiusStep,
    pub max_attempts: u32,
    pub target_unique_areas: usize,
}

impl From<&SearchConfig> for SearchPolicy {
    fn from(config: &SearchConfig) -> Self {
        Self {
            start_radius_miles: config.start_radius_miles,
            ceiling_radius_miles: config.ceiling_radius_miles,
            step: config.step,
            max_attempts: config.max_attempts.max(1),
            target_unique_areas: config.target_unique_areas,
        }
    }
}

impl SearchPolicy {
    pub fn initial(&self) -> SearchState {
        SearchState::Searching {
            radius_miles: self.start_radius_miles.min(self.ceiling_radius_miles),
            attempt: 1,
        }
    }

    pub fn next_radius(&self, radius_miles: f64) -> f64 {
        let next = match self.step {
            RadiusStep::Fixed { miles } => radius_miles + miles,
            RadiusStep::Multiplicative { factor } => radius_miles * factor,
        };
        next.min(self.ceiling_radius_miles)
    }

    /// 純函式：根據本次查到的 market area 數量決定下一個狀態
    pub fn transition(&self, state: SearchState, unique_areas: usize) -> SearchState {
        match state {
            SearchState::Searching {
                radius_miles,
                attempt,
            } => {
                if unique_areas >= self.target_unique_areas {
                    SearchState::Satisfied {
                        radius_miles,
                        attempts: attempt,
                    }
                } else if radius_miles >= self.ceiling_radius_miles
                    || attempt >= self.max_attempts
                {
                    SearchState::Exhausted {
                        radius_miles,
                        attempts: attempt,
                    }
                } else {
                    SearchState::Searching {
                        radius_miles: self.next_radius(radius_miles),
                        attempt: attempt + 1,
                    }
                }
            }
            terminal => terminal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub anchor: City,
    /// 每個 market area 一個代表城市（最近者），依距離遞增
    pub representatives: Vec<ScoredCandidate>,
    /// 同一 market area 的次近城市，僅供放寬配對時使用
    pub alternates: Vec<ScoredCandidate>,
    pub final_state: SearchState,
}

impl SearchOutcome {
    pub fn unique_area_count(&self) -> usize {
        self.representatives.len()
    }

    pub fn radius_miles(&self) -> f64 {
        self.final_state.radius_miles()
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self.final_state, SearchState::Satisfied { .. })
    }

    pub fn area_codes(&self) -> HashSet<String> {
        self.representatives
            .iter()
            .map(|c| c.area_code().to_string())
            .collect()
    }

    /// 加入探索得到的新 market area 代表，維持距離排序
    pub fn absorb(&mut self, extra: Vec<ScoredCandidate>) {
        let mut known = self.area_codes();
        for candidate in extra {
            if known.insert(candidate.area_code().to_string()) {
                self.representatives.push(candidate);
            }
        }
        sort_by_distance(&mut self.representatives);
    }
}

pub fn distinct_area_count(found: &[(City, f64)]) -> usize {
    found
        .iter()
        .filter_map(|(city, _)| city.market_area_code())
        .collect::<HashSet<_>>()
        .len()
}

fn sort_by_distance(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance_miles
            .total_cmp(&b.distance_miles)
            .then_with(|| a.area_code().cmp(b.area_code()))
            .then_with(|| a.city.key().cmp(&b.city.key()))
    });
}

/// 以 (market area, 城市名, 州) 去重後，每個 market area 取最近的城市當代表
pub fn select_representatives(
    found: Vec<(City, f64)>,
    alternates_per_area: usize,
) -> (Vec<ScoredCandidate>, Vec<ScoredCandidate>) {
    let mut seen = HashSet::new();
    let mut by_area: HashMap<String, Vec<ScoredCandidate>> = HashMap::new();

    for (city, miles) in found {
        let Some(code) = city.market_area_code().map(str::to_string) else {
            continue;
        };
        let key = city.key();
        if !seen.insert((code.clone(), key.name, key.state)) {
            continue;
        }
        by_area
            .entry(code)
            .or_default()
            .push(ScoredCandidate::unscored(city, miles));
    }

    let mut representatives = Vec::with_capacity(by_area.len());
    let mut alternates = Vec::new();
    for (_, mut cities) in by_area {
        sort_by_distance(&mut cities);
        let mut iter = cities.into_iter();
        if let Some(nearest) = iter.next() {
            representatives.push(nearest);
        }
        alternates.extend(iter.take(alternates_per_area));
    }
    sort_by_distance(&mut representatives);
    sort_by_distance(&mut alternates);
    (representatives, alternates)
}

pub struct RadiusDiversitySearch {
    store: Arc<dyn CityStore>,
    policy: SearchPolicy,
    alternates_per_area: usize,
}

impl RadiusDiversitySearch {
    pub fn new(store: Arc<dyn CityStore>, config: &SearchConfig) -> Self {
        Self {
            store,
            policy: SearchPolicy::from(config),
            alternates_per_area: config.alternates_per_area,
        }
    }

    pub async fn search(&self, anchor: &City) -> Result<SearchOutcome> {
        let center = match (anchor.coordinates, anchor.is_eligible()) {
            (Some(center), true) => center,
            _ => {
                return Err(PostingError::UnresolvableLocation {
                    role: "anchor".to_string(),
                    query: anchor.to_string(),
                })
            }
        };

        let mut state = self.policy.initial();
        let mut found = Vec::new();
        while let SearchState::Searching {
            radius_miles,
            attempt,
        } = state
        {
            found = self.store.within_radius(center, radius_miles).await?;
            let areas = distinct_area_count(&found);
            tracing::debug!(
                "🔎 {}: attempt {} at {:.0}mi found {} cities in {} market areas",
                anchor,
                attempt,
                radius_miles,
                found.len(),
                areas
            );
            state = self.policy.transition(state, areas);
        }

        let (representatives, alternates) = select_representatives(found, self.alternates_per_area);
        match state {
            SearchState::Satisfied { radius_miles, .. } => tracing::debug!(
                "🔎 {}: {} market areas within {:.0}mi",
                anchor,
                representatives.len(),
                radius_miles
            ),
            _ => tracing::info!(
                "🔎 {}: search exhausted at {:.0}mi with {} of {} market areas",
                anchor,
                state.radius_miles(),
                representatives.len(),
                self.policy.target_unique_areas
            ),
        }

        Ok(SearchOutcome {
            anchor: anchor.clone(),
            representatives,
            alternates,
            final_state: state,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::city_store::InMemoryCityStore;
    use crate::domain::model::{Coordinates, MarketArea, Provenance};

    pub(crate) const CINCINNATI: (f64, f64) = (39.1031, -84.5120);

    pub(crate) fn city_at(name: &str, state: &str, lat: f64, lon: f64, kma: &str) -> City {
        City {
            name: name.to_string(),
            state: state.to_string(),
            coordinates: Some(Coordinates::new(lat, lon)),
            market_area: Some(MarketArea {
                code: kma.to_string(),
                name: format!("{} Mkt", kma),
            }),
            postal_code: None,
            provenance: Provenance::Verified,
        }
    }

    /// 錨點正北方指定英里數的城市
    pub(crate) fn north_of(anchor: (f64, f64), miles: f64, name: &str, kma: &str) -> City {
        let lat = anchor.0 + miles / 69.09;
        city_at(name, "OH", lat, anchor.1, kma)
    }

    fn policy(target: usize) -> SearchPolicy {
        SearchPolicy {
            start_radius_miles: 75.0,
            ceiling_radius_miles: 150.0,
            step: RadiusStep::Fixed { miles: 25.0 },
            max_attempts: 10,
            target_unique_areas: target,
        }
    }

    #[test]
    fn test_transition_expands_then_satisfies() {
        let policy = policy(5);
        let s0 = policy.initial();
        assert_eq!(
            s0,
            SearchState::Searching {
                radius_miles: 75.0,
                attempt: 1
            }
        );
        let s1 = policy.transition(s0, 3);
        assert_eq!(s1.radius_miles(), 100.0);
        let s2 = policy.transition(s1, 5);
        assert_eq!(
            s2,
            SearchState::Satisfied {
                radius_miles: 100.0,
                attempts: 2
            }
        );
        // terminal states are absorbing
        assert_eq!(policy.transition(s2, 0), s2);
    }

    #[test]
    fn test_transition_clamps_to_ceiling_and_exhausts() {
        let mut policy = policy(50);
        policy.step = RadiusStep::Multiplicative { factor: 1.8 };
        let s1 = policy.transition(policy.initial(), 1);
        assert_eq!(s1.radius_miles(), 135.0);
        let s2 = policy.transition(s1, 1);
        assert_eq!(s2.radius_miles(), 150.0);
        let s3 = policy.transition(s2, 1);
        assert!(matches!(s3, SearchState::Exhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_transition_respects_attempt_budget() {
        let mut policy = policy(50);
        policy.max_attempts = 2;
        let s1 = policy.transition(policy.initial(), 0);
        let s2 = policy.transition(s1, 0);
        assert_eq!(
            s2,
            SearchState::Exhausted {
                radius_miles: 100.0,
                attempts: 2
            }
        );
    }

    #[test]
    fn test_select_representatives_keeps_same_named_cities_in_different_areas() {
        let found = vec![
            (city_at("Springfield", "OH", 39.9, -83.8, "OH_DAY"), 10.0),
            (city_at("Springfield", "OH", 39.9, -83.8, "OH_COL"), 12.0),
            (city_at("Springfield", "OH", 39.9, -83.8, "OH_DAY"), 10.0),
            (city_at("Xenia", "OH", 39.7, -83.9, "OH_DAY"), 20.0),
            (city_at("Fairborn", "OH", 39.8, -84.0, "OH_DAY"), 25.0),
            (city_at("Troy", "OH", 40.0, -84.2, "OH_DAY"), 30.0),
        ];
        let (reps, alts) = select_representatives(found, 2);
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].area_code(), "OH_DAY");
        assert_eq!(reps[1].area_code(), "OH_COL");
        let alt_names: Vec<&str> = alts.iter().map(|c| c.city.name.as_str()).collect();
        assert_eq!(alt_names, vec!["Xenia", "Fairborn"]);
    }

    pub(crate) fn cincinnati_store() -> InMemoryCityStore {
        InMemoryCityStore::with_cities(vec![
            city_at("Cincinnati", "OH", CINCINNATI.0, CINCINNATI.1, "OH_CIN"),
            north_of(CINCINNATI, 20.0, "Hamilton", "OH_CIN"),
            north_of(CINCINNATI, 30.0, "Middletown", "OH_MID"),
            north_of(CINCINNATI, 60.0, "Dayton", "OH_DAY"),
            north_of(CINCINNATI, 90.0, "Sidney", "OH_LIM"),
            north_of(CINCINNATI, 110.0, "Lima", "OH_LIM2"),
            north_of(CINCINNATI, 120.0, "Findlay", "OH_TOL"),
            north_of(CINCINNATI, 122.0, "Ottawa", "OH_TOL"),
            north_of(CINCINNATI, 140.0, "Bowling Green", "OH_BG"),
        ])
    }

    #[tokio::test]
    async fn test_search_expands_to_exactly_125_miles() {
        let store: Arc<dyn CityStore> = Arc::new(cincinnati_store());
        let config = SearchConfig {
            target_unique_areas: 5,
            ..SearchConfig::default()
        };
        let search = RadiusDiversitySearch::new(store.clone(), &config);
        let anchor = store.find_by_name("Cincinnati", "OH").await.unwrap().unwrap();

        let outcome = search.search(&anchor).await.unwrap();

        assert!(outcome.is_satisfied());
        assert_eq!(outcome.radius_miles(), 125.0);
        assert_eq!(outcome.unique_area_count(), 6);
        assert_eq!(outcome.area_codes().len(), 6);
        assert!(outcome
            .representatives
            .windows(2)
            .all(|w| w[0].distance_miles < w[1].distance_miles));
        let names: Vec<&str> = outcome
            .representatives
            .iter()
            .map(|c| c.city.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["Cincinnati", "Middletown", "Dayton", "Sidney", "Lima", "Findlay"]
        );
        let alt_names: Vec<&str> = outcome.alternates.iter().map(|c| c.city.name.as_str()).collect();
        assert_eq!(alt_names, vec!["Hamilton", "Ottawa"]);
    }

    #[tokio::test]
    async fn test_search_exhausts_at_ceiling() {
        let store: Arc<dyn CityStore> = Arc::new(cincinnati_store());
        let config = SearchConfig {
            target_unique_areas: 10,
            ..SearchConfig::default()
        };
        let search = RadiusDiversitySearch::new(store.clone(), &config);
        let anchor = store.find_by_name("Cincinnati", "OH").await.unwrap().unwrap();

        let outcome = search.search(&anchor).await.unwrap();

        assert!(!outcome.is_satisfied());
        assert_eq!(outcome.radius_miles(), 150.0);
        assert_eq!(outcome.unique_area_count(), 7);
    }

    #[tokio::test]
    async fn test_search_rejects_anchor_without_market_area() {
        let store: Arc<dyn CityStore> = Arc::new(cincinnati_store());
        let search = RadiusDiversitySearch::new(store, &SearchConfig::default());
        let mut anchor = city_at("Somewhere", "OH", 39.0, -84.0, "X");
        anchor.market_area = None;

        let err = search.search(&anchor).await.unwrap_err();
        assert!(matches!(err, PostingError::UnresolvableLocation { .. }));
    }
}
