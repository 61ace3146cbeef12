use crate::config::engine_config::DiscoveryConfig;
use crate::core::radius_search::SearchOutcome;
use crate::domain::model::{City, Provenance, ScoredCandidate};
use crate::domain::ports::{CityStore, DiscoveredPlace, DiscoveryProvider, DiscoveryRequest};
use crate::utils::error::PostingError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// 所有 lane 共用的付費 API 閘門：限制同時呼叫數與整批呼叫總數
#[derive(Debug)]
pub struct DiscoveryGate {
    permits: Semaphore,
    calls_made: AtomicUsize,
    budget: usize,
}

impl DiscoveryGate {
    pub fn new(max_concurrent_calls: usize, budget: usize) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent_calls.max(1)),
            calls_made: AtomicUsize::new(0),
            budget,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.max_concurrent_calls, config.max_calls_per_batch)
    }

    /// 預先扣除一次呼叫額度；額度用盡時回傳 false
    pub fn try_reserve(&self) -> bool {
        self.calls_made
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |made| {
                (made < self.budget).then_some(made + 1)
            })
            .is_ok()
    }

    pub fn calls_made(&self) -> usize {
        self.calls_made.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackStatus {
    NotNeeded,
    Disabled,
    BudgetExhausted,
    Completed { returned: usize },
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub added: Vec<ScoredCandidate>,
    pub upserted: usize,
    pub status: FallbackStatus,
}

impl FallbackOutcome {
    fn without_call(status: FallbackStatus) -> Self {
        Self {
            added: Vec::new(),
            upserted: 0,
            status,
        }
    }

    pub fn provider_called(&self) -> bool {
        matches!(
            self.status,
            FallbackStatus::Completed { .. } | FallbackStatus::Failed { .. }
        )
    }

    /// 非致命的降級訊息，寫入 lane 報告
    pub fn degradation(&self) -> Option<String> {
        match &self.status {
            FallbackStatus::Failed { message } => Some(message.clone()),
            FallbackStatus::BudgetExhausted => {
                Some("discovery call budget exhausted; using local cities only".to_string())
            }
            _ => None,
        }
    }
}

pub struct DiscoveryFallback {
    provider: Option<Arc<dyn DiscoveryProvider>>,
    store: Arc<dyn CityStore>,
    gate: Arc<DiscoveryGate>,
    config: DiscoveryConfig,
}

impl DiscoveryFallback {
    pub fn new(
        provider: Option<Arc<dyn DiscoveryProvider>>,
        store: Arc<dyn CityStore>,
        gate: Arc<DiscoveryGate>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            provider,
            store,
            gate,
            config,
        }
    }

    pub fn disabled(store: Arc<dyn CityStore>) -> Self {
        Self::new(
            None,
            store,
            Arc::new(DiscoveryGate::new(1, 0)),
            DiscoveryConfig::default(),
        )
    }

    /// 本地搜尋不足時才呼叫外部服務一次；任何失敗都只會回傳零筆新候選
    pub async fn augment(&self, local: &SearchOutcome, target: usize) -> FallbackOutcome {
        let have = local.unique_area_count();
        if have >= target {
            return FallbackOutcome::without_call(FallbackStatus::NotNeeded);
        }
        let provider = match &self.provider {
            Some(provider) if self.config.enabled => provider.clone(),
            _ => return FallbackOutcome::without_call(FallbackStatus::Disabled),
        };
        let Some(center) = local.anchor.coordinates else {
            return FallbackOutcome::without_call(FallbackStatus::Disabled);
        };
        if !self.gate.try_reserve() {
            tracing::warn!(
                "💸 Discovery budget exhausted ({} calls); skipping {}",
                self.gate.calls_made(),
                local.anchor
            );
            return FallbackOutcome::without_call(FallbackStatus::BudgetExhausted);
        }

        let request = DiscoveryRequest {
            center,
            radius_miles: local.radius_miles(),
            category: self.config.category.clone(),
            limit: self.config.max_results,
        };

        let places = {
            let _permit = match self.gate.permits.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    return FallbackOutcome::without_call(FallbackStatus::Failed {
                        message: format!("discovery gate closed: {}", e),
                    })
                }
            };
            tracing::info!(
                "🌐 {}: local search found {} of {} market areas, calling {}",
                local.anchor,
                have,
                target,
                provider.name()
            );
            let timeout = Duration::from_secs(self.config.timeout_seconds.max(1));
            match tokio::time::timeout(timeout, provider.discover(&request)).await {
                Ok(Ok(places)) => places,
                Ok(Err(e)) => return self.failed(provider.name(), e.to_string()),
                Err(_) => {
                    return self.failed(
                        provider.name(),
                        format!("timed out after {}s", timeout.as_secs()),
                    )
                }
            }
        };

        let returned = places.len();
        let (added, upserted) = self
            .enrich(local, places, target.saturating_sub(have))
            .await;
        tracing::info!(
            "🌐 {}: provider returned {} places, {} new market areas, {} cities stored",
            local.anchor,
            returned,
            added.len(),
            upserted
        );

        FallbackOutcome {
            added,
            upserted,
            status: FallbackStatus::Completed { returned },
        }
    }

    fn failed(&self, provider: &str, message: String) -> FallbackOutcome {
        let error = PostingError::ExternalProviderFailure {
            provider: provider.to_string(),
            message,
        };
        tracing::warn!("⚠️ {} ({})", error, error.recovery_suggestion());
        FallbackOutcome::without_call(FallbackStatus::Failed {
            message: error.to_string(),
        })
    }

    /// 解析 market area、寫回城市目錄，並挑出本地沒有的新 market area
    async fn enrich(
        &self,
        local: &SearchOutcome,
        places: Vec<DiscoveredPlace>,
        wanted: usize,
    ) -> (Vec<ScoredCandidate>, usize) {
        let Some(center) = local.anchor.coordinates else {
            return (Vec::new(), 0);
        };
        let known = local.area_codes();
        let mut fresh: HashMap<String, ScoredCandidate> = HashMap::new();
        let mut upserted = 0;

        for place in places {
            if !self.is_domestic(&place) {
                tracing::debug!("Skipping non-domestic place {} ({})", place.name, place.country_code);
                continue;
            }
            let miles = place.distance_from(center);
            if miles > local.radius_miles() {
                continue;
            }
            let area = match self
                .store
                .nearest_market_area(place.coordinates, self.config.market_area_match_radius_miles)
                .await
            {
                Ok(Some((area, _))) => area,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Market area lookup failed for {}: {}", place.name, e);
                    continue;
                }
            };

            let city = City {
                name: place.name.trim().to_string(),
                state: place.state.trim().to_uppercase(),
                coordinates: Some(place.coordinates),
                market_area: Some(area),
                postal_code: place.postal_code.clone(),
                provenance: Provenance::Discovered,
            };
            if let Err(e) = self.store.upsert(city.clone()).await {
                tracing::warn!("Could not store discovered city {}: {}", city, e);
                continue;
            }
            upserted += 1;

            // 目錄中若已有驗證過的同名城市，以目錄版本為準
            let stored = match self.store.find_by_name(&city.name, &city.state).await {
                Ok(Some(stored)) if stored.is_eligible() => stored,
                _ => city,
            };
            let code = stored.market_area_code().unwrap_or_default().to_string();
            if known.contains(&code) {
                continue;
            }
            let candidate = ScoredCandidate::unscored(stored, miles);
            match fresh.get(&code) {
                Some(existing) if existing.distance_miles <= miles => {}
                _ => {
                    fresh.insert(code, candidate);
                }
            }
        }

        let mut added: Vec<ScoredCandidate> = fresh.into_values().collect();
        added.sort_by(|a, b| {
            a.distance_miles
                .total_cmp(&b.distance_miles)
                .then_with(|| a.area_code().cmp(b.area_code()))
        });
        added.truncate(wanted);
        (added, upserted)
    }

    fn is_domestic(&self, place: &DiscoveredPlace) -> bool {
        self.config
            .allowed_countries
            .iter()
            .any(|code| code.eq_ignore_ascii_case(place.country_code.trim()))
    }
}
