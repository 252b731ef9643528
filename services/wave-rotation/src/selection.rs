//! Candidate eligibility and ranking

use std::cmp::Ordering;
use tracing::debug;

use crate::config::SelectionConfig;
use crate::scoring::{PoolCandidate, ScoredSet};
use crate::venue::VenueRegistry;

/// Ranked eligible candidates for one cycle
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub ranked: Vec<PoolCandidate>,
    /// (pool id, reason) for everything dropped
    pub excluded: Vec<(String, String)>,
}

impl Selection {
    pub fn best(&self) -> Option<&PoolCandidate> {
        self.ranked.first()
    }

    pub fn find(&self, pool_id: &str) -> Option<&PoolCandidate> {
        self.ranked.iter().find(|c| c.pool_id.eq_ignore_ascii_case(pool_id))
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

fn listed(list: &[String], pool: &PoolCandidate) -> bool {
    list.iter().any(|entry| {
        entry.eq_ignore_ascii_case(&pool.pool_id) || entry.eq_ignore_ascii_case(&pool.project)
    })
}

/// Why a candidate is not eligible, if it isn't
pub fn exclusion_reason(
    pool: &PoolCandidate,
    rules: &SelectionConfig,
    registry: &VenueRegistry,
) -> Option<String> {
    if !rules.chains.is_empty() && !rules.chains.iter().any(|c| c.eq_ignore_ascii_case(&pool.chain)) {
        return Some(format!("chain:{}", pool.chain));
    }
    if listed(&rules.denylist, pool) {
        return Some("denylist".to_string());
    }
    if !rules.allowlist.is_empty() && !listed(&rules.allowlist, pool) {
        return Some("not_allowlisted".to_string());
    }
    if pool.tvl_usd < rules.min_tvl_usd {
        return Some(format!("tvl<{}", rules.min_tvl_usd.normalize()));
    }
    if !registry.contains(&pool.pool_id) {
        return Some("no_venue".to_string());
    }
    None
}

/// Filter scored candidates and rank by score, ties broken by pool id
pub fn select(scored: ScoredSet, rules: &SelectionConfig, registry: &VenueRegistry) -> Selection {
    let mut excluded = scored.excluded;
    let mut ranked = Vec::with_capacity(scored.candidates.len());

    for candidate in scored.candidates {
        match exclusion_reason(&candidate, rules, registry) {
            Some(reason) => {
                debug!("Ineligible {}: {}", candidate.pool_id, reason);
                excluded.push((candidate.pool_id, reason));
            }
            None => ranked.push(candidate),
        }
    }

    ranked.sort_by(|a, b| match b.score.cmp(&a.score) {
        Ordering::Equal => a.pool_id.cmp(&b.pool_id),
        other => other,
    });

    Selection { ranked, excluded }
}
