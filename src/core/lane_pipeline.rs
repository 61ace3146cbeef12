use crate::config::engine_config::EngineConfig;
use crate::core::discovery::{DiscoveryFallback, FallbackOutcome};
use crate::core::pair_assembly::{assemble_pairs, PairPools, PairingSettings};
use crate::core::radius_search::{RadiusDiversitySearch, SearchOutcome};
use crate::core::ranking::CandidateRanker;
use crate::core::row_expander::RowExpander;
use crate::domain::model::{CandidatePair, City, LaneRequest, LocationQuery, Shortfall};
use crate::domain::ports::CityStore;
use crate::domain::posting::PostingRow;
use crate::utils::error::{PostingError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

/// 單一錨點（起點或終點）的搜尋摘要
#[derive(Debug, Clone, Serialize)]
pub struct AnchorSummary {
    pub city: City,
    pub radius_miles: f64,
    pub local_market_areas: usize,
    pub discovered_market_areas: usize,
    pub discovery_called: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LanePlan {
    pub lane_id: String,
    pub origin: AnchorSummary,
    pub destination: AnchorSummary,
    pub pairs: Vec<CandidatePair>,
    pub relaxed_pairs: usize,
    pub shortfall: Option<Shortfall>,
    pub degradations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneExport {
    #[serde(flatten)]
    pub plan: LanePlan,
    pub row_count: usize,
    #[serde(skip)]
    pub rows: Vec<PostingRow>,
}

impl LaneExport {
    pub fn lane_id(&self) -> &str {
        &self.plan.lane_id
    }

    pub fn is_partial(&self) -> bool {
        self.plan.shortfall.is_some()
    }
}

pub struct LaneProcessor {
    store: Arc<dyn CityStore>,
    search: RadiusDiversitySearch,
    fallback: DiscoveryFallback,
    ranker: CandidateRanker,
    expander: RowExpander,
    config: EngineConfig,
}

impl LaneProcessor {
    pub fn new(
        store: Arc<dyn CityStore>,
        fallback: DiscoveryFallback,
        ranker: CandidateRanker,
        config: EngineConfig,
    ) -> Result<Self> {
        Ok(Self {
            search: RadiusDiversitySearch::new(store.clone(), &config.search),
            expander: RowExpander::new(config.equipment.clone())?,
            store,
            fallback,
            ranker,
            config,
        })
    }

    async fn resolve(&self, role: &str, query: &LocationQuery) -> Result<City> {
        self.store
            .resolve(query)
            .await?
            .ok_or_else(|| PostingError::UnresolvableLocation {
                role: role.to_string(),
                query: query.to_string(),
            })
    }

    /// 半徑搜尋 → 必要時外部探索 → 排序
    async fn explore(
        &self,
        equipment: &str,
        anchor: &City,
        degradations: &mut Vec<String>,
    ) -> Result<(AnchorSummary, SearchOutcome)> {
        let target = self.config.search.target_unique_areas;
        let mut outcome = self.search.search(anchor).await?;
        let local_market_areas = outcome.unique_area_count();

        let fallback: FallbackOutcome = self.fallback.augment(&outcome, target).await;
        if let Some(note) = fallback.degradation() {
            degradations.push(format!("{}: {}", anchor, note));
        }
        let discovered_market_areas = fallback.added.len();
        outcome.absorb(fallback.added.clone());

        let max_radius = self.config.search.ceiling_radius_miles;
        let representatives = std::mem::take(&mut outcome.representatives);
        outcome.representatives = self.ranker.rank(equipment, representatives, max_radius).await;
        let alternates = std::mem::take(&mut outcome.alternates);
        outcome.alternates = self.ranker.rank(equipment, alternates, max_radius).await;

        let summary = AnchorSummary {
            city: anchor.clone(),
            radius_miles: outcome.radius_miles(),
            local_market_areas,
            discovered_market_areas,
            discovery_called: fallback.provider_called(),
        };
        Ok((summary, outcome))
    }

    /// 檢查重量、解析、搜尋並配對，不產生資料列（dry run 也使用）
    pub async fn plan(&self, lane: &LaneRequest) -> Result<LanePlan> {
        // 重量不合法時在任何搜尋或付費呼叫之前就拒絕
        self.expander.validate_weight(lane)?;
        self.plan_pairs(lane).await
    }

    async fn plan_pairs(&self, lane: &LaneRequest) -> Result<LanePlan> {
        let origin = self.resolve("origin", &lane.origin).await?;
        let destination = self.resolve("destination", &lane.destination).await?;
        let equipment = lane.equipment_code();

        let mut degradations = Vec::new();
        let (origin_summary, origin_outcome) =
            self.explore(&equipment, &origin, &mut degradations).await?;
        let (destination_summary, destination_outcome) =
            self.explore(&equipment, &destination, &mut degradations).await?;

        let pools = PairPools {
            origins: origin_outcome.representatives,
            destinations: destination_outcome.representatives,
            origin_alternates: origin_outcome.alternates,
            destination_alternates: destination_outcome.alternates,
        };
        let settings = PairingSettings::from_config(&self.config.pairing, lane.relax_diversity);
        let assembly = assemble_pairs(&pools, &settings);

        if let Some(shortfall) = &assembly.shortfall {
            tracing::warn!(
                "⚠️ Lane {}: {} of {} pairs ({})",
                lane.lane_id,
                shortfall.found,
                shortfall.required,
                shortfall.reason
            );
        }
        if assembly.relaxed_pairs > 0 {
            tracing::info!(
                "♻️ Lane {}: fill mode reused market areas for {} pairs",
                lane.lane_id,
                assembly.relaxed_pairs
            );
        }

        Ok(LanePlan {
            lane_id: lane.lane_id.clone(),
            origin: origin_summary,
            destination: destination_summary,
            pairs: assembly.pairs,
            relaxed_pairs: assembly.relaxed_pairs,
            shortfall: assembly.shortfall,
            degradations,
        })
    }

    pub async fn process(&self, lane: &LaneRequest) -> Result<LaneExport> {
        let span = tracing::info_span!("lane", lane_id = %lane.lane_id);
        self.process_inner(lane).instrument(span).await
    }

    async fn process_inner(&self, lane: &LaneRequest) -> Result<LaneExport> {
        let plan = self.plan(lane).await?;
        if let Some(shortfall) = &plan.shortfall {
            if self.config.pairing.reject_on_shortfall {
                return Err(PostingError::InsufficientDiversity {
                    lane_id: lane.lane_id.clone(),
                    found: shortfall.found,
                    required: shortfall.required,
                    reason: shortfall.reason.to_string(),
                });
            }
        }

        let rows = self.expander.expand(lane, &plan.pairs)?;
        tracing::info!(
            "✅ Lane {}: {} pairs, {} rows{}",
            lane.lane_id,
            plan.pairs.len(),
            rows.len(),
            if plan.shortfall.is_some() { " (partial)" } else { "" }
        );

        Ok(LaneExport {
            row_count: rows.len(),
            plan,
            rows,
        })
    }
}
