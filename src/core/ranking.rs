use crate::config::engine_config::RankingConfig;
use crate::domain::model::ScoredCandidate;
use crate::domain::ports::{TieBreakCandidate, TieBreakDelegate, TieBreakRequest};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const FLATBED_TERMS: &[&str] = &[
    "port", "harbor", "industrial", "steel", "mill", "yard", "terminal", "works", "forge",
];
const REEFER_TERMS: &[&str] = &[
    "cold", "produce", "farm", "dairy", "orchard", "fresh", "valley", "grove", "packing",
];

/// 設備類別偏好的地名關鍵字
pub fn affinity_terms(equipment: &str) -> &'static [&'static str] {
    match equipment.trim().to_uppercase().as_str() {
        "F" | "FD" | "SD" | "DD" | "RGN" | "FT" | "LB" => FLATBED_TERMS,
        "R" | "RV" | "RZ" | "VR" => REEFER_TERMS,
        _ => &[],
    }
}

pub fn affinity_match(equipment: &str, candidate: &ScoredCandidate) -> bool {
    let terms = affinity_terms(equipment);
    if terms.is_empty() {
        return false;
    }
    let mut haystack = candidate.city.name.to_lowercase();
    if let Some(area) = &candidate.city.market_area {
        haystack.push(' ');
        haystack.push_str(&area.name.to_lowercase());
    }
    terms.iter().any(|term| haystack.contains(term))
}

/// 距離越近分數越高（0..=1），不含設備加分
pub fn base_score(distance_miles: f64, max_radius_miles: f64) -> f64 {
    if max_radius_miles <= 0.0 {
        return 0.0;
    }
    (1.0 - distance_miles / max_radius_miles).clamp(0.0, 1.0)
}

/// 決定性的全序：分數高者優先，再比設備偏好、原始分數、距離、market area、城市
pub fn deterministic_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.affinity_match.cmp(&a.affinity_match))
        .then_with(|| a.distance_miles.total_cmp(&b.distance_miles))
        .then_with(|| a.area_code().cmp(b.area_code()))
        .then_with(|| a.city.key().cmp(&b.city.key()))
}

/// 近似平手時的裁決規則（不含分數本身）
pub fn tie_rule(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.affinity_match
        .cmp(&a.affinity_match)
        .then_with(|| deterministic_order(a, b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakDecision {
    First,
    Second,
}

impl From<Ordering> for TieBreakDecision {
    fn from(order: Ordering) -> Self {
        match order {
            Ordering::Greater => TieBreakDecision::Second,
            _ => TieBreakDecision::First,
        }
    }
}

#[async_trait]
pub trait TieBreaker: Send + Sync {
    async fn decide(
        &self,
        equipment: &str,
        a: &ScoredCandidate,
        b: &ScoredCandidate,
    ) -> TieBreakDecision;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicTieBreaker;

#[async_trait]
impl TieBreaker for DeterministicTieBreaker {
    async fn decide(
        &self,
        _equipment: &str,
        a: &ScoredCandidate,
        b: &ScoredCandidate,
    ) -> TieBreakDecision {
        tie_rule(a, b).into()
    }
}

type CacheKey = (String, String, String);

/// 外部裁決結果快取，以 (設備, market area A, market area B) 為 key，逾時失效
#[derive(Debug)]
pub struct TieBreakCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, (Instant, String)>>,
}

impl TieBreakCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(equipment: &str, a: &str, b: &str) -> CacheKey {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        (equipment.to_uppercase(), low.to_string(), high.to_string())
    }

    pub fn get(&self, equipment: &str, a: &str, b: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        let (stored_at, winner) = entries.get(&Self::key(equipment, a, b))?;
        (stored_at.elapsed() < self.ttl).then(|| winner.clone())
    }

    pub fn put(&self, equipment: &str, a: &str, b: &str, winner: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            let ttl = self.ttl;
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
            entries.insert(
                Self::key(equipment, a, b),
                (Instant::now(), winner.to_string()),
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 委派外部判斷；任何錯誤、逾時或格式不符都視為「沒有意見」，改用決定性規則
pub struct DelegatedTieBreaker {
    delegate: Arc<dyn TieBreakDelegate>,
    cache: Arc<TieBreakCache>,
    timeout: Duration,
    fallback: DeterministicTieBreaker,
}

impl DelegatedTieBreaker {
    pub fn new(delegate: Arc<dyn TieBreakDelegate>, cache: Arc<TieBreakCache>, timeout: Duration) -> Self {
        Self {
            delegate,
            cache,
            timeout,
            fallback: DeterministicTieBreaker,
        }
    }

    fn to_request_candidate(candidate: &ScoredCandidate) -> TieBreakCandidate {
        TieBreakCandidate {
            city: candidate.city.name.clone(),
            state: candidate.city.state.clone(),
            market_area: candidate.area_code().to_string(),
            distance_miles: candidate.distance_miles,
            score: candidate.score,
        }
    }

    fn decision_for(winner: &str, a: &ScoredCandidate, b: &ScoredCandidate) -> Option<TieBreakDecision> {
        if winner == a.area_code() {
            Some(TieBreakDecision::First)
        } else if winner == b.area_code() {
            Some(TieBreakDecision::Second)
        } else {
            None
        }
    }

    async fn opinion(&self, equipment: &str, a: &ScoredCandidate, b: &ScoredCandidate) -> Option<String> {
        if let Some(winner) = self.cache.get(equipment, a.area_code(), b.area_code()) {
            tracing::debug!("⚖️ Tie-break cache hit for {} vs {}", a.area_code(), b.area_code());
            return Some(winner);
        }

        let request = TieBreakRequest {
            equipment: equipment.to_string(),
            candidate_a: Self::to_request_candidate(a),
            candidate_b: Self::to_request_candidate(b),
        };
        match tokio::time::timeout(self.timeout, self.delegate.judge(&request)).await {
            Ok(Ok(verdict)) => {
                let winner = verdict.winner.trim().to_string();
                if Self::decision_for(&winner, a, b).is_none() {
                    tracing::warn!("⚖️ Tie-break delegate returned unknown winner '{}'", winner);
                    return None;
                }
                tracing::debug!("⚖️ Delegate picked {} ({})", winner, verdict.reason);
                self.cache.put(equipment, a.area_code(), b.area_code(), &winner);
                Some(winner)
            }
            Ok(Err(e)) => {
                tracing::warn!("⚖️ Tie-break delegate failed: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("⚖️ Tie-break delegate timed out after {:?}", self.timeout);
                None
            }
        }
    }
}

#[async_trait]
impl TieBreaker for DelegatedTieBreaker {
    async fn decide(
        &self,
        equipment: &str,
        a: &ScoredCandidate,
        b: &ScoredCandidate,
    ) -> TieBreakDecision {
        // 同一個 market area 無從裁決
        if a.area_code() == b.area_code() {
            return self.fallback.decide(equipment, a, b).await;
        }
        match self.opinion(equipment, a, b).await {
            Some(winner) => match Self::decision_for(&winner, a, b) {
                Some(decision) => decision,
                None => self.fallback.decide(equipment, a, b).await,
            },
            None => self.fallback.decide(equipment, a, b).await,
        }
    }
}

pub struct CandidateRanker {
    tie_breaker: Arc<dyn TieBreaker>,
    tie_epsilon: f64,
    affinity_bonus: f64,
}

impl CandidateRanker {
    pub fn new(tie_breaker: Arc<dyn TieBreaker>, config: &RankingConfig) -> Self {
        Self {
            tie_breaker,
            tie_epsilon: config.tie_epsilon,
            affinity_bonus: config.affinity_bonus,
        }
    }

    pub fn deterministic(config: &RankingConfig) -> Self {
        Self::new(Arc::new(DeterministicTieBreaker), config)
    }

    pub fn score(&self, equipment: &str, candidate: &mut ScoredCandidate, max_radius_miles: f64) {
        candidate.affinity_match = affinity_match(equipment, candidate);
        let bonus = if candidate.affinity_match {
            self.affinity_bonus
        } else {
            0.0
        };
        candidate.score = base_score(candidate.distance_miles, max_radius_miles) + bonus;
    }

    /// 計分、排序，再對相鄰的近似平手做一次裁決
    pub async fn rank(
        &self,
        equipment: &str,
        mut candidates: Vec<ScoredCandidate>,
        max_radius_miles: f64,
    ) -> Vec<ScoredCandidate> {
        for candidate in candidates.iter_mut() {
            self.score(equipment, candidate, max_radius_miles);
        }
        candidates.sort_by(deterministic_order);

        let mut i = 0;
        while i + 1 < candidates.len() {
            let gap = (candidates[i].score - candidates[i + 1].score).abs();
            if gap < self.tie_epsilon {
                let decision = self
                    .tie_breaker
                    .decide(equipment, &candidates[i], &candidates[i + 1])
                    .await;
                if decision == TieBreakDecision::Second {
                    candidates.swap(i, i + 1);
                    // 已交換的這一對不再重複比較
                    i += 1;
                }
            }
            i += 1;
        }
        candidates
    }
}
