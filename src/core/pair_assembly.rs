use crate::config::engine_config::{FillPolicy, PairingConfig};
use crate::core::distance::great_circle_miles;
use crate::domain::model::{
    AreaKey, CandidatePair, CityKey, ScoredCandidate, Shortfall, ShortfallReason,
};
use std::collections::{HashMap, HashSet};

/// 已排序的候選池；alternates 只在放寬模式使用
#[derive(Debug, Clone, Default)]
pub struct PairPools {
    pub origins: Vec<ScoredCandidate>,
    pub destinations: Vec<ScoredCandidate>,
    pub origin_alternates: Vec<ScoredCandidate>,
    pub destination_alternates: Vec<ScoredCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingSettings {
    pub minimum_pairs: usize,
    pub fill: bool,
    pub fill_policy: FillPolicy,
}

impl PairingSettings {
    pub fn from_config(config: &PairingConfig, lane_relax: bool) -> Self {
        Self {
            minimum_pairs: config.minimum_pairs,
            fill: config.fill || lane_relax,
            fill_policy: config.fill_policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairAssembly {
    pub pairs: Vec<CandidatePair>,
    /// 放寬模式補上的組數（重複使用 market-area key）
    pub relaxed_pairs: usize,
    pub shortfall: Option<Shortfall>,
}

impl PairAssembly {
    pub fn is_complete(&self) -> bool {
        self.shortfall.is_none()
    }
}

pub fn make_pair(origin: &ScoredCandidate, destination: &ScoredCandidate) -> CandidatePair {
    let distance_miles = match (origin.city.coordinates, destination.city.coordinates) {
        (Some(a), Some(b)) => great_circle_miles(a, b),
        _ => 0.0,
    };
    CandidatePair {
        origin: origin.city.clone(),
        destination: destination.city.clone(),
        distance_miles,
        score: (origin.score + destination.score) / 2.0,
    }
}

fn city_pair_key(pair: &CandidatePair) -> (CityKey, CityKey) {
    (pair.origin.key(), pair.destination.key())
}

/// 嚴格模式：每個 (origin-area, destination-area) key 只能出現一次
///
/// 依對角線順序走訪排名，先讓排名相近的起訖點互相配對，
/// 到達 `target` 或候選池耗盡即停止。
pub fn assemble_strict(
    origins: &[ScoredCandidate],
    destinations: &[ScoredCandidate],
    target: usize,
) -> Vec<CandidatePair> {
    let mut pairs = Vec::new();
    if origins.is_empty() || destinations.is_empty() || target == 0 {
        return pairs;
    }

    let mut used: HashSet<AreaKey> = HashSet::new();
    for offset in 0..destinations.len() {
        for (i, origin) in origins.iter().enumerate() {
            let destination = &destinations[(i + offset) % destinations.len()];
            if origin.city.key() == destination.city.key() {
                continue;
            }
            let pair = make_pair(origin, destination);
            if !used.insert(pair.area_key()) {
                continue;
            }
            pairs.push(pair);
            if pairs.len() == target {
                return pairs;
            }
        }
    }
    pairs
}

/// 放寬模式：允許重複使用 market-area key，但不重複同一組城市
pub fn assemble_relaxed(
    origins: &[ScoredCandidate],
    destinations: &[ScoredCandidate],
    existing: &[CandidatePair],
    needed: usize,
    policy: FillPolicy,
) -> Vec<CandidatePair> {
    let mut taken: HashSet<(CityKey, CityKey)> = existing.iter().map(city_pair_key).collect();
    let mut uses: HashMap<AreaKey, usize> = HashMap::new();
    let mut first_use: HashMap<AreaKey, usize> = HashMap::new();
    for (index, pair) in existing.iter().enumerate() {
        let key = pair.area_key();
        *uses.entry(key.clone()).or_default() += 1;
        first_use.entry(key).or_insert(index);
    }

    let mut added = Vec::new();
    while added.len() < needed {
        let mut best: Option<(CandidatePair, (usize, usize, f64))> = None;
        for origin in origins {
            for destination in destinations {
                if origin.city.key() == destination.city.key() {
                    continue;
                }
                if taken.contains(&(origin.city.key(), destination.city.key())) {
                    continue;
                }
                let pair = make_pair(origin, destination);
                let combined = origin.distance_miles + destination.distance_miles;
                let key = pair.area_key();
                let rank = match policy {
                    FillPolicy::Nearest => (0, 0, combined),
                    FillPolicy::LeastRecentlyUsed => (
                        uses.get(&key).copied().unwrap_or(0),
                        first_use.get(&key).copied().unwrap_or(usize::MAX),
                        combined,
                    ),
                };
                let better = match &best {
                    None => true,
                    Some((_, current)) => {
                        (rank.0, rank.1)
                            .cmp(&(current.0, current.1))
                            .then_with(|| rank.2.total_cmp(&current.2))
                            .is_lt()
                    }
                };
                if better {
                    best = Some((pair, rank));
                }
            }
        }

        let Some((pair, _)) = best else {
            break;
        };
        let key = pair.area_key();
        let index = existing.len() + added.len();
        *uses.entry(key.clone()).or_default() += 1;
        first_use.entry(key).or_insert(index);
        taken.insert(city_pair_key(&pair));
        added.push(pair);
    }
    added
}

/// 組合嚴格與放寬兩個步驟；不足最低組數時明確回報原因
pub fn assemble_pairs(pools: &PairPools, settings: &PairingSettings) -> PairAssembly {
    let required = settings.minimum_pairs;
    if pools.origins.is_empty() || pools.destinations.is_empty() {
        let reason = if pools.origins.is_empty() {
            ShortfallReason::EmptyOriginPool
        } else {
            ShortfallReason::EmptyDestinationPool
        };
        return PairAssembly {
            pairs: Vec::new(),
            relaxed_pairs: 0,
            shortfall: Some(Shortfall {
                reason,
                found: 0,
                required,
            }),
        };
    }

    let mut pairs = assemble_strict(&pools.origins, &pools.destinations, required);
    let mut relaxed_pairs = 0;

    if pairs.len() < required && settings.fill {
        let origins: Vec<ScoredCandidate> = pools
            .origins
            .iter()
            .chain(pools.origin_alternates.iter())
            .cloned()
            .collect();
        let destinations: Vec<ScoredCandidate> = pools
            .destinations
            .iter()
            .chain(pools.destination_alternates.iter())
            .cloned()
            .collect();
        let extra = assemble_relaxed(
            &origins,
            &destinations,
            &pairs,
            required - pairs.len(),
            settings.fill_policy,
        );
        relaxed_pairs = extra.len();
        pairs.extend(extra);
    }

    let shortfall = (pairs.len() < required).then(|| Shortfall {
        reason: ShortfallReason::InsufficientUniqueMarkets,
        found: pairs.len(),
        required,
    });

    PairAssembly {
        pairs,
        relaxed_pairs,
        shortfall,
    }
}
