//! Ordinal scoring and ranking of catalog entries

use serde::{Deserialize, Serialize};

use crate::domain::catalog::CatalogEntry;
use crate::domain::features::FeatureProfile;
use crate::domain::requirement::{Attribute, Level, RequirementProfile};

/// Ordinal assigned to a missing or invalid derived attribute. Sits below
/// `Low`, so such an attribute never meets any requirement.
pub const UNSATISFIED_ORDINAL: i8 = -1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub entry: CatalogEntry,
    pub features: FeatureProfile,
    /// Attributes met or exceeded, out of five
    pub score: u8,
    /// 1-based position in the ranking
    pub rank: usize,
}

fn feature_ordinal(level: Option<Level>) -> i8 {
    level.map(Level::ordinal).unwrap_or(UNSATISFIED_ORDINAL)
}

/// Number of attributes where the entry meets or exceeds the requirement.
pub fn score(profile: &RequirementProfile, features: &FeatureProfile) -> u8 {
    Attribute::ALL
        .iter()
        .filter(|attribute| {
            feature_ordinal(features.level(**attribute)) >= profile.level(**attribute).ordinal()
        })
        .count() as u8
}

/// Entries affordable under the profile's budget, in catalog order.
pub fn within_budget<'a>(
    profile: &RequirementProfile,
    entries: &'a [CatalogEntry],
) -> Vec<&'a CatalogEntry> {
    entries.iter().filter(|entry| entry.price <= profile.budget()).collect()
}

/// Scores derived entries, orders them by descending score and keeps the top
/// `shortlist_size`. Equal scores keep their input (catalog) order. Entries
/// over budget are dropped even if the caller forgot to pre-filter.
pub fn rank(
    profile: &RequirementProfile,
    derived: Vec<(CatalogEntry, FeatureProfile)>,
    shortlist_size: usize,
) -> Vec<ScoredCandidate> {
    let mut scored = derived
        .into_iter()
        .filter(|(entry, _)| entry.price <= profile.budget())
        .map(|(entry, features)| {
            let score = score(profile, &features);
            ScoredCandidate { entry, features, score, rank: 0 }
        })
        .collect::<Vec<_>>();

    // `sort_by` is stable
    scored.sort_by(|left, right| right.score.cmp(&left.score));
    scored.truncate(shortlist_size);

    for (index, candidate) in scored.iter_mut().enumerate() {
        candidate.rank = index + 1;
    }
    scored
}
