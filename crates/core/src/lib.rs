pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod matching;

pub use domain::catalog::{Catalog, CatalogEntry, CatalogEntryId, CatalogError};
pub use domain::features::{FeatureProfile, Taxonomy};
pub use domain::requirement::{
    Attribute, Level, RequirementProfile, ValidationError, MIN_BUDGET,
};
pub use domain::transcript::{ConversationTurn, Role, SessionId, Transcript};
pub use errors::{ApplicationError, DomainError, FailureKind, InterfaceError};
pub use flows::{DialogueAction, DialogueEvent, DialogueFlow, DialoguePhase};
pub use matching::{MatchingPolicy, ScoredCandidate};
