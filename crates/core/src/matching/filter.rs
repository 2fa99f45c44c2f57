use super::scoring::ScoredCandidate;
use super::DEFAULT_ACCEPTANCE_THRESHOLD;

/// Drops ranked candidates that satisfy too few attributes to be worth
/// recommending. An empty result is a legitimate "no good match" outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationFilter {
    threshold: u8,
}

impl Default for ValidationFilter {
    fn default() -> Self {
        Self { threshold: DEFAULT_ACCEPTANCE_THRESHOLD }
    }
}

impl ValidationFilter {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn filter(&self, candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        candidates.into_iter().filter(|candidate| candidate.score > self.threshold).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::catalog::{CatalogEntry, CatalogEntryId};
    use crate::domain::features::FeatureProfile;
    use crate::matching::ScoredCandidate;

    use super::ValidationFilter;

    fn candidate(id: &str, score: u8, rank: usize) -> ScoredCandidate {
        ScoredCandidate {
            entry: CatalogEntry {
                id: CatalogEntryId(id.to_string()),
                name: id.to_string(),
                price: 50_000,
                description: String::new(),
            },
            features: FeatureProfile::unclassified(),
            score,
            rank,
        }
    }

    #[test]
    fn keeps_only_scores_strictly_above_two() {
        let kept = ValidationFilter::default().filter(vec![
            candidate("five", 5, 1),
            candidate("three", 3, 2),
            candidate("two", 2, 3),
        ]);

        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|candidate| candidate.score > 2));
        assert_eq!(kept[1].entry.id.0, "three");
    }

    #[test]
    fn may_return_empty_shortlist() {
        let kept = ValidationFilter::default().filter(vec![candidate("zero", 0, 1)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn custom_threshold_is_respected() {
        let filter = ValidationFilter::new(4);
        assert_eq!(filter.threshold(), 4);
        assert_eq!(filter.filter(vec![candidate("four", 4, 1), candidate("five", 5, 2)]).len(), 1);
    }
}
