use std::sync::Arc;

use shopassist_core::domain::catalog::{Catalog, CatalogEntry};
use shopassist_core::domain::requirement::RequirementProfile;
use shopassist_core::matching::{
    rank, within_budget, MatchingPolicy, ScoredCandidate, ValidationFilter,
};
use tracing::info;

use crate::features::FeatureDeriver;

/// Result of one ranking pass: the ranked list and the subset that passed
/// the acceptance threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shortlist {
    pub ranked: Vec<ScoredCandidate>,
    pub accepted: Vec<ScoredCandidate>,
}

impl Shortlist {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

#[derive(Clone)]
pub struct CatalogRanker {
    catalog: Arc<Catalog>,
    deriver: FeatureDeriver,
    policy: MatchingPolicy,
    filter: ValidationFilter,
}

impl CatalogRanker {
    pub fn new(catalog: Arc<Catalog>, deriver: FeatureDeriver, policy: MatchingPolicy) -> Self {
        Self { catalog, deriver, policy, filter: ValidationFilter::new(policy.acceptance_threshold) }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn policy(&self) -> MatchingPolicy {
        self.policy
    }

    /// Budget filter, feature derivation for the affordable entries only,
    /// then ordinal scoring.
    pub async fn rank(&self, profile: &RequirementProfile) -> Vec<ScoredCandidate> {
        let affordable = within_budget(profile, self.catalog.entries())
            .into_iter()
            .cloned()
            .collect::<Vec<CatalogEntry>>();
        let features = self.deriver.derive_many(&affordable).await;
        rank(profile, affordable.into_iter().zip(features).collect(), self.policy.shortlist_size)
    }

    pub async fn shortlist(&self, profile: &RequirementProfile, correlation_id: &str) -> Shortlist {
        let ranked = self.rank(profile).await;
        let accepted = self.filter.filter(ranked.clone());

        info!(
            event_name = "matching.shortlist_ready",
            correlation_id,
            catalog_size = self.catalog.len(),
            ranked = ranked.len(),
            accepted = accepted.len(),
            top_score = ranked.first().map(|candidate| candidate.score).unwrap_or(0),
            "catalog ranked against requirements"
        );

        Shortlist { ranked, accepted }
    }
}
