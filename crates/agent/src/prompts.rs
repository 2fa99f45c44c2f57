use std::sync::Arc;

use serde::Serialize;
use shopassist_core::domain::features::Taxonomy;
use shopassist_core::domain::requirement::{Level, RequirementProfile, MIN_BUDGET};
use shopassist_core::matching::ScoredCandidate;
use tera::{Context, Tera};
use thiserror::Error;

/// Used when the greeting cannot be generated or is rejected by moderation.
pub const FALLBACK_GREETING: &str = "Hi, I'm ShopAssist! I can help you find the right laptop. \
What will you mostly use it for?";

pub const FETCHING_PRODUCTS_MESSAGE: &str =
    "Thank you for providing all the information. Kindly wait while I fetch the products.";

const ELICITATION_SYSTEM: &str = "elicitation_system";
const ELICITATION_REMINDER: &str = "elicitation_reminder";
const RECOMMENDATION_SYSTEM: &str = "recommendation_system";
const PROFILE_MESSAGE: &str = "profile_message";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template `{name}` failed: {source}")]
    Template { name: &'static str, source: tera::Error },
}

#[derive(Serialize)]
struct CandidateView<'a> {
    rank: usize,
    name: &'a str,
    price: u64,
    score: u8,
    description: &'a str,
}

/// Compiled prompt templates. Cheap to clone.
#[derive(Clone)]
pub struct PromptLibrary {
    tera: Arc<Tera>,
    taxonomy: Arc<Taxonomy>,
}

impl PromptLibrary {
    pub fn new(taxonomy: Taxonomy) -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        for (name, body) in [
            (ELICITATION_SYSTEM, include_str!("../../../templates/prompts/elicitation_system.tera")),
            (
                ELICITATION_REMINDER,
                include_str!("../../../templates/prompts/elicitation_reminder.tera"),
            ),
            (
                RECOMMENDATION_SYSTEM,
                include_str!("../../../templates/prompts/recommendation_system.tera"),
            ),
            (PROFILE_MESSAGE, include_str!("../../../templates/prompts/profile_message.tera")),
        ] {
            tera.add_raw_template(name, body)
                .map_err(|source| PromptError::Template { name, source })?;
        }
        // prompts are plain text
        tera.autoescape_on(Vec::new());

        Ok(Self { tera: Arc::new(tera), taxonomy: Arc::new(taxonomy) })
    }

    pub fn elicitation_system(&self) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("levels", &Level::ALL.iter().map(|level| level.as_str()).collect::<Vec<_>>());
        context.insert("min_budget", &MIN_BUDGET);
        context.insert("taxonomy", &self.taxonomy.render());
        self.render(ELICITATION_SYSTEM, &context)
    }

    /// User text as sent to the elicitation context, with the scope reminder.
    pub fn elicitation_user(&self, user_text: &str) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("user_text", user_text);
        self.render(ELICITATION_REMINDER, &context)
    }

    pub fn recommendation_system(&self, candidates: &[ScoredCandidate]) -> Result<String, PromptError> {
        let views = candidates
            .iter()
            .map(|candidate| CandidateView {
                rank: candidate.rank,
                name: &candidate.entry.name,
                price: candidate.entry.price,
                score: candidate.score,
                description: &candidate.entry.description,
            })
            .collect::<Vec<_>>();
        let mut context = Context::new();
        context.insert("candidates", &views);
        self.render(RECOMMENDATION_SYSTEM, &context)
    }

    pub fn profile_message(&self, profile: &RequirementProfile) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("summary", &profile.summary());
        self.render(PROFILE_MESSAGE, &context)
    }

    fn render(&self, name: &'static str, context: &Context) -> Result<String, PromptError> {
        self.tera
            .render(name, context)
            .map(|rendered| rendered.trim().to_string())
            .map_err(|source| PromptError::Template { name, source })
    }
}
