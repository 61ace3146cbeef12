//! 依 `EngineConfig` 組裝 lane 處理所需的協作者

use crate::adapters::http::{HttpDiscoveryProvider, HttpTieBreakDelegate};
use crate::config::engine_config::{EngineConfig, TieBreakMode};
use crate::core::discovery::{DiscoveryFallback, DiscoveryGate};
use crate::core::lane_pipeline::LaneProcessor;
use crate::core::ranking::{
    CandidateRanker, DelegatedTieBreaker, DeterministicTieBreaker, TieBreakCache, TieBreaker,
};
use crate::domain::ports::{CityStore, DiscoveryProvider};
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;

pub fn build_tie_breaker(config: &EngineConfig) -> Result<Arc<dyn TieBreaker>> {
    if config.ranking.tie_break == TieBreakMode::Deterministic {
        return Ok(Arc::new(DeterministicTieBreaker));
    }
    match HttpTieBreakDelegate::from_config(&config.ranking)? {
        Some(delegate) => {
            let cache = Arc::new(TieBreakCache::new(Duration::from_secs(
                config.ranking.cache_ttl_seconds,
            )));
            Ok(Arc::new(DelegatedTieBreaker::new(
                Arc::new(delegate),
                cache,
                Duration::from_secs(config.ranking.delegate_timeout_seconds.max(1)),
            )))
        }
        None => {
            tracing::warn!("⚖️ Delegated tie-break requested without an endpoint, using deterministic rule");
            Ok(Arc::new(DeterministicTieBreaker))
        }
    }
}

/// 同一批次的所有 lane 共用同一個 discovery gate
pub fn build_lane_processor(
    store: Arc<dyn CityStore>,
    config: &EngineConfig,
) -> Result<LaneProcessor> {
    let provider: Option<Arc<dyn DiscoveryProvider>> =
        match HttpDiscoveryProvider::from_config(&config.discovery)? {
            Some(provider) => Some(Arc::new(provider)),
            None => None,
        };
    let gate = Arc::new(DiscoveryGate::from_config(&config.discovery));
    let fallback = DiscoveryFallback::new(provider, store.clone(), gate, config.discovery.clone());
    let ranker = CandidateRanker::new(build_tie_breaker(config)?, &config.ranking);

    LaneProcessor::new(store, fallback, ranker, config.clone())
}
