//! Catalog matching
//!
//! Deterministic half of the recommendation pipeline: budget gate, ordinal
//! scoring against a [`RequirementProfile`](crate::domain::requirement::RequirementProfile),
//! stable ranking, and the acceptance filter applied to the shortlist.
//! Feature derivation (an oracle call) happens upstream in the agent crate.

mod filter;
mod scoring;

pub use filter::ValidationFilter;
pub use scoring::{rank, score, within_budget, ScoredCandidate, UNSATISFIED_ORDINAL};

use serde::{Deserialize, Serialize};

/// Maximum candidates kept after ranking
pub const DEFAULT_SHORTLIST_SIZE: usize = 3;

/// Candidates must score strictly above this to be recommended
pub const DEFAULT_ACCEPTANCE_THRESHOLD: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingPolicy {
    pub shortlist_size: usize,
    pub acceptance_threshold: u8,
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            shortlist_size: DEFAULT_SHORTLIST_SIZE,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
        }
    }
}
