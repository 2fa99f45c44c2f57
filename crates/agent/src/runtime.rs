use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shopassist_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use shopassist_core::config::{AppConfig, ModerationFailMode};
use shopassist_core::domain::catalog::Catalog;
use shopassist_core::domain::features::Taxonomy;
use shopassist_core::domain::requirement::RequirementProfile;
use shopassist_core::domain::transcript::{ConversationTurn, Role, SessionId};
use shopassist_core::errors::{
    ApplicationError, DomainError, FailureKind, MODERATION_POLICY_MESSAGE,
    NO_MATCH_ESCALATION_MESSAGE, ORACLE_UNAVAILABLE_MESSAGE,
};
use shopassist_core::flows::{
    DialogueContext, DialogueEvent, DialogueFlow, DialoguePhase, FlowTransitionError,
};
use shopassist_core::matching::MatchingPolicy;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation::RequirementNormalizer;
use crate::features::FeatureDeriver;
use crate::guardrails::ModerationGate;
use crate::oracles::{ChatMessage, Confirmation, OracleError, Oracles};
use crate::prompts::{PromptError, PromptLibrary, FALLBACK_GREETING, FETCHING_PRODUCTS_MESSAGE};
use crate::ranker::CatalogRanker;
use crate::retry::RetryPolicy;
use crate::session::{
    SessionSlot, SessionState, SessionStore, SessionView, DEFAULT_SESSION_IDLE,
};

const ACTOR: &str = "dialogue-controller";

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub retry: RetryPolicy,
    pub matching: MatchingPolicy,
    pub moderation_fail_mode: ModerationFailMode,
    pub max_concurrency: usize,
    pub session_idle: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            matching: MatchingPolicy::default(),
            moderation_fail_mode: ModerationFailMode::Closed,
            max_concurrency: 4,
            session_idle: DEFAULT_SESSION_IDLE,
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy::from_llm_config(&config.llm),
            matching: config.matching,
            moderation_fail_mode: config.moderation.fail_mode,
            max_concurrency: config.llm.max_concurrency,
            session_idle: Duration::from_secs(config.server.session_idle_secs),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unknown session `{0}`")]
    UnknownSession(SessionId),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl From<ControllerError> for ApplicationError {
    fn from(value: ControllerError) -> Self {
        match value {
            ControllerError::UnknownSession(session_id) => Self::UnknownSession(session_id.0),
            ControllerError::Flow(error) => Self::Domain(DomainError::FlowTransition(error)),
            ControllerError::Prompt(error) => Self::Configuration(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The assistant asked for more detail
    FollowUp,
    BudgetRejected,
    Recommended { shortlisted: usize },
    NoMatch,
    Answered,
    /// Moderation flagged the exchange and the session was reset
    Terminated,
    Degraded { failure: FailureKind },
    /// The session was reset while this turn was in flight
    Discarded,
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnReport {
    pub session_id: SessionId,
    pub correlation_id: String,
    pub phase: DialoguePhase,
    pub outcome: TurnOutcome,
    pub appended: Vec<ConversationTurn>,
}

/// Per-session dialogue driver: moderation, elicitation, normalization,
/// ranking and follow-up answering, one turn at a time per session.
pub struct DialogueController {
    store: SessionStore,
    oracles: Oracles,
    gate: ModerationGate,
    normalizer: RequirementNormalizer,
    ranker: CatalogRanker,
    prompts: PromptLibrary,
    retry: RetryPolicy,
    flow: DialogueFlow,
    audit: Arc<dyn AuditSink>,
}

impl DialogueController {
    pub fn new(
        oracles: Oracles,
        catalog: Arc<Catalog>,
        settings: ControllerSettings,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ControllerError> {
        let taxonomy = Taxonomy::default();
        let prompts = PromptLibrary::new(taxonomy.clone())?;
        let deriver = FeatureDeriver::new(
            oracles.classification.clone(),
            taxonomy,
            settings.retry.clone(),
            settings.max_concurrency,
        );

        Ok(Self {
            store: SessionStore::with_idle_timeout(settings.session_idle),
            gate: ModerationGate::new(
                oracles.moderation.clone(),
                settings.retry.clone(),
                settings.moderation_fail_mode,
                audit.clone(),
            ),
            normalizer: RequirementNormalizer::new(
                oracles.extraction.clone(),
                settings.retry.clone(),
            ),
            ranker: CatalogRanker::new(catalog, deriver, settings.matching),
            prompts,
            retry: settings.retry,
            flow: DialogueFlow,
            audit,
            oracles,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        self.ranker.catalog()
    }

    pub async fn session_count(&self) -> usize {
        self.store.len().await
    }

    /// Creates a session and greets the user. Idle sessions are evicted
    /// first.
    pub async fn open_session(&self) -> Result<SessionView, ControllerError> {
        self.evict_idle_sessions().await;

        let session_id = SessionId::generate();
        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(Some(session_id.clone()), correlation_id.clone(), ACTOR);

        let mut state = SessionState::new(self.prompts.elicitation_system()?);
        self.greet(&mut state, &audit).await;
        let slot = self.store.insert(session_id.clone(), state).await;

        info!(
            event_name = "dialogue.session.opened",
            session_id = %session_id,
            correlation_id = %correlation_id,
            "dialogue session opened"
        );
        Ok(slot.view(&session_id).await)
    }

    /// Drops the session. A turn still in flight finishes against the
    /// detached slot and its results are lost.
    pub async fn close(&self, session_id: &SessionId) -> Result<(), ControllerError> {
        self.store
            .remove(session_id)
            .await
            .ok_or_else(|| ControllerError::UnknownSession(session_id.clone()))?;

        let correlation_id = Uuid::new_v4().to_string();
        self.audit.emit(AuditEvent::new(
            Some(session_id.clone()),
            correlation_id.clone(),
            "session.closed",
            AuditCategory::System,
            ACTOR,
            AuditOutcome::Success,
        ));
        info!(
            event_name = "dialogue.session.closed",
            session_id = %session_id,
            correlation_id = %correlation_id,
            "dialogue session closed"
        );
        Ok(())
    }

    /// Evicts sessions idle past the configured timeout and returns how many
    /// were dropped.
    pub async fn evict_idle_sessions(&self) -> usize {
        let expired = self.store.evict_idle().await;
        if expired.is_empty() {
            return 0;
        }

        let correlation_id = Uuid::new_v4().to_string();
        for session_id in &expired {
            self.audit.emit(
                AuditEvent::new(
                    Some(session_id.clone()),
                    correlation_id.clone(),
                    "session.expired",
                    AuditCategory::System,
                    ACTOR,
                    AuditOutcome::Success,
                )
                .with_metadata("idle_secs", self.store.idle_timeout().as_secs().to_string()),
            );
        }
        info!(
            event_name = "dialogue.session.expired",
            correlation_id = %correlation_id,
            evicted = expired.len(),
            "idle dialogue sessions evicted"
        );
        expired.len()
    }

    pub async fn view(&self, session_id: &SessionId) -> Result<SessionView, ControllerError> {
        Ok(self.slot(session_id).await?.view(session_id).await)
    }

    pub async fn transcript(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConversationTurn>, ControllerError> {
        let slot = self.slot(session_id).await?;
        let state = slot.state.lock().await;
        Ok(state.transcript.turns().to_vec())
    }

    /// Clears the session and greets again. Any turn in flight is cancelled:
    /// its results are discarded when it tries to commit. A message queued
    /// behind that turn greets before it is handled, so the greeting always
    /// opens the new transcript.
    pub async fn reset(&self, session_id: &SessionId) -> Result<SessionView, ControllerError> {
        let slot = self.slot(session_id).await?;
        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(Some(session_id.clone()), correlation_id.clone(), ACTOR);

        {
            let mut state = slot.state.lock().await;
            self.flow.apply_with_audit(
                state.phase,
                &DialogueEvent::SessionReset,
                &DialogueContext::default(),
                self.audit.as_ref(),
                &audit,
            )?;
            state.restart();
            state.greeting_pending = true;
        }

        let _turn = slot.turn_lock.lock().await;
        let mut working = slot.state.lock().await.clone();
        let base_generation = working.generation;
        if working.greeting_pending {
            self.greet(&mut working, &audit).await;
            let mut state = slot.state.lock().await;
            if state.generation == base_generation {
                *state = working;
            }
        }

        info!(
            event_name = "dialogue.session.reset",
            session_id = %session_id,
            correlation_id = %correlation_id,
            generation = base_generation,
            "dialogue session reset"
        );
        Ok(slot.view(session_id).await)
    }

    /// Processes one user message. Messages for the same session are handled
    /// strictly one after another.
    pub async fn handle_message(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<TurnReport, ControllerError> {
        let slot = self.slot(session_id).await?;
        let _turn = slot.turn_lock.lock().await;

        let mut working = slot.state.lock().await.clone();
        let base_generation = working.generation;
        let base_len = working.transcript.len();
        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(Some(session_id.clone()), correlation_id.clone(), ACTOR);

        info!(
            event_name = "dialogue.turn.start",
            session_id = %session_id,
            correlation_id = %correlation_id,
            phase = ?working.phase,
            "processing user message"
        );

        if working.greeting_pending {
            self.greet(&mut working, &audit).await;
        }
        let outcome = self.run_turn(&mut working, text, &correlation_id, &audit).await?;

        let mut state = slot.state.lock().await;
        if state.generation != base_generation {
            info!(
                event_name = "dialogue.turn.discarded",
                session_id = %session_id,
                correlation_id = %correlation_id,
                stale_generation = base_generation,
                current_generation = state.generation,
                "session was reset during the turn; discarding results"
            );
            return Ok(TurnReport {
                session_id: session_id.clone(),
                correlation_id,
                phase: state.phase,
                outcome: TurnOutcome::Discarded,
                appended: Vec::new(),
            });
        }

        let skip = if working.generation == base_generation { base_len } else { 0 };
        let appended = working.transcript.turns().iter().skip(skip).cloned().collect::<Vec<_>>();
        let phase = working.phase;
        *state = working;
        drop(state);

        info!(
            event_name = "dialogue.turn.completed",
            session_id = %session_id,
            correlation_id = %correlation_id,
            phase = ?phase,
            outcome = ?outcome,
            appended = appended.len(),
            "user message processed"
        );

        Ok(TurnReport { session_id: session_id.clone(), correlation_id, phase, outcome, appended })
    }

    async fn slot(&self, session_id: &SessionId) -> Result<Arc<SessionSlot>, ControllerError> {
        self.store
            .get(session_id)
            .await
            .ok_or_else(|| ControllerError::UnknownSession(session_id.clone()))
    }

    async fn run_turn(
        &self,
        state: &mut SessionState,
        text: &str,
        correlation_id: &str,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, ControllerError> {
        if self.gate.screen(text, "user", audit).await.is_blocked() {
            return self.terminate(state, audit);
        }

        if state.phase.is_recommendation() {
            self.answer_followup(state, text, correlation_id, audit).await
        } else {
            self.elicit(state, text, correlation_id, audit).await
        }
    }

    async fn elicit(
        &self,
        state: &mut SessionState,
        text: &str,
        correlation_id: &str,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, ControllerError> {
        self.transition(state, DialogueEvent::UserUtterance, DialogueContext::default(), audit)?;
        state.transcript.push(Role::User, text);
        state.elicitation.push(ChatMessage::user(self.prompts.elicitation_user(text)?));

        let reply = match self.complete(&state.elicitation).await {
            Ok(reply) => reply,
            Err(error) => return Ok(degrade(state, &error, correlation_id)),
        };
        if self.gate.screen(&reply, "assistant", audit).await.is_blocked() {
            return self.terminate(state, audit);
        }

        let confirmation_oracle = &self.oracles.confirmation;
        let reply_text = reply.as_str();
        let confirmation = match self
            .retry
            .run("confirmation", move || confirmation_oracle.confirm(reply_text))
            .await
        {
            Ok(confirmation) => confirmation,
            Err(error) => {
                warn!(
                    event_name = "dialogue.confirmation_failed",
                    correlation_id,
                    error = %error,
                    "confirmation oracle failed; continuing elicitation"
                );
                Confirmation::Incomplete
            }
        };

        match confirmation {
            Confirmation::Incomplete => {
                self.transition(
                    state,
                    DialogueEvent::RequirementsIncomplete,
                    DialogueContext::default(),
                    audit,
                )?;
                state.elicitation.push(ChatMessage::assistant(reply.clone()));
                state.transcript.push(Role::Assistant, reply);
                Ok(TurnOutcome::FollowUp)
            }
            Confirmation::Complete => {
                self.confirm_requirements(state, reply, correlation_id, audit).await
            }
        }
    }

    async fn confirm_requirements(
        &self,
        state: &mut SessionState,
        summary: String,
        correlation_id: &str,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, ControllerError> {
        self.transition(
            state,
            DialogueEvent::RequirementsConfirmed,
            DialogueContext::default(),
            audit,
        )?;
        state.elicitation.push(ChatMessage::assistant(summary.clone()));
        state.transcript.push(Role::Assistant, summary.clone());

        let error = match self.normalizer.normalize(&summary, correlation_id).await {
            Ok(profile) => {
                self.transition(
                    state,
                    DialogueEvent::ProfileValidated,
                    DialogueContext::default(),
                    audit,
                )?;
                state.transcript.push(Role::Assistant, FETCHING_PRODUCTS_MESSAGE);
                return self.recommend(state, profile, correlation_id, audit).await;
            }
            Err(error) => error,
        };

        match error.failure_kind() {
            FailureKind::BudgetBelowMinimum => {
                self.transition(
                    state,
                    DialogueEvent::BudgetRejected,
                    DialogueContext::default(),
                    audit,
                )?;
                let notice = FailureKind::BudgetBelowMinimum.user_message().unwrap_or_default();
                state.elicitation.push(ChatMessage::assistant(notice.clone()));
                state.transcript.push(Role::Assistant, notice);
                Ok(TurnOutcome::BudgetRejected)
            }
            kind => {
                self.transition(
                    state,
                    DialogueEvent::ProfileRejected,
                    DialogueContext::default(),
                    audit,
                )?;
                if kind.is_transient() {
                    state.transcript.push(
                        Role::Assistant,
                        kind.user_message()
                            .unwrap_or_else(|| ORACLE_UNAVAILABLE_MESSAGE.to_string()),
                    );
                    Ok(TurnOutcome::Degraded { failure: kind })
                } else {
                    info!(
                        event_name = "dialogue.reelicit",
                        correlation_id,
                        error = %error,
                        "summary did not normalize; continuing elicitation"
                    );
                    Ok(TurnOutcome::FollowUp)
                }
            }
        }
    }

    async fn recommend(
        &self,
        state: &mut SessionState,
        profile: RequirementProfile,
        correlation_id: &str,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, ControllerError> {
        let shortlist = self.ranker.shortlist(&profile, correlation_id).await;
        let empty = shortlist.is_empty();
        self.audit.emit(
            AuditEvent::new(
                audit.session_id.clone(),
                audit.correlation_id.clone(),
                "matching.shortlist_built",
                AuditCategory::Matching,
                audit.actor.clone(),
                if empty { AuditOutcome::Rejected } else { AuditOutcome::Success },
            )
            .with_metadata("budget", profile.budget().to_string())
            .with_metadata("ranked", shortlist.ranked.len().to_string())
            .with_metadata("accepted", shortlist.accepted.len().to_string()),
        );
        self.transition(
            state,
            DialogueEvent::ShortlistReady,
            DialogueContext { shortlist_empty: empty, ..DialogueContext::default() },
            audit,
        )?;

        let shortlisted = shortlist.accepted.len();
        state.recommendation =
            vec![ChatMessage::system(self.prompts.recommendation_system(&shortlist.accepted)?)];
        state.recommendation.push(ChatMessage::user(self.prompts.profile_message(&profile)?));
        state.requirements = Some(profile);
        state.shortlist = Some(shortlist.accepted);

        if empty {
            state.transcript.push(Role::Assistant, NO_MATCH_ESCALATION_MESSAGE);
            return Ok(TurnOutcome::NoMatch);
        }

        let summary = match self.complete(&state.recommendation).await {
            Ok(summary) => summary,
            Err(error) => return Ok(degrade(state, &error, correlation_id)),
        };
        if self.gate.screen(&summary, "assistant", audit).await.is_blocked() {
            return self.terminate(state, audit);
        }
        state.recommendation.push(ChatMessage::assistant(summary.clone()));
        state.transcript.push(Role::Assistant, summary);
        Ok(TurnOutcome::Recommended { shortlisted })
    }

    async fn answer_followup(
        &self,
        state: &mut SessionState,
        text: &str,
        correlation_id: &str,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, ControllerError> {
        self.transition(state, DialogueEvent::UserUtterance, DialogueContext::default(), audit)?;
        state.transcript.push(Role::User, text);
        state.recommendation.push(ChatMessage::user(text));

        let answer = match self.complete(&state.recommendation).await {
            Ok(answer) => answer,
            Err(error) => return Ok(degrade(state, &error, correlation_id)),
        };
        if self.gate.screen(&answer, "assistant", audit).await.is_blocked() {
            return self.terminate(state, audit);
        }
        state.recommendation.push(ChatMessage::assistant(answer.clone()));
        state.transcript.push(Role::Assistant, answer);
        Ok(TurnOutcome::Answered)
    }

    /// Flagged content: record the termination, wipe the session and leave
    /// only the policy notice.
    fn terminate(
        &self,
        state: &mut SessionState,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, ControllerError> {
        self.transition(state, DialogueEvent::ModerationFlagged, DialogueContext::default(), audit)?;
        state.restart();
        state.transcript.push(Role::Assistant, MODERATION_POLICY_MESSAGE);
        Ok(TurnOutcome::Terminated)
    }

    async fn greet(&self, state: &mut SessionState, audit: &AuditContext) {
        let correlation_id = audit.correlation_id.as_str();
        state.greeting_pending = false;
        let greeting = match self.complete(&state.elicitation).await {
            Ok(greeting) => {
                if self.gate.screen(&greeting, "assistant", audit).await.is_blocked() {
                    FALLBACK_GREETING.to_string()
                } else {
                    greeting
                }
            }
            Err(error) => {
                warn!(
                    event_name = "dialogue.greeting_failed",
                    correlation_id,
                    error = %error,
                    "greeting generation failed; using fixed greeting"
                );
                FALLBACK_GREETING.to_string()
            }
        };
        state.elicitation.push(ChatMessage::assistant(greeting.clone()));
        state.transcript.push(Role::Assistant, greeting);
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        let completion = &self.oracles.completion;
        self.retry.run("completion", move || completion.complete(messages)).await
    }

    fn transition(
        &self,
        state: &mut SessionState,
        event: DialogueEvent,
        context: DialogueContext,
        audit: &AuditContext,
    ) -> Result<(), ControllerError> {
        let outcome =
            self.flow.apply_with_audit(state.phase, &event, &context, self.audit.as_ref(), audit)?;
        state.phase = outcome.to;
        Ok(())
    }
}

fn degrade(state: &mut SessionState, error: &OracleError, correlation_id: &str) -> TurnOutcome {
    let failure = error.failure_kind();
    warn!(
        event_name = "dialogue.oracle_degraded",
        correlation_id,
        failure = ?failure,
        error = %error,
        "completion oracle failed; answering with fixed notice"
    );
    state.transcript.push(
        Role::Assistant,
        failure.user_message().unwrap_or_else(|| ORACLE_UNAVAILABLE_MESSAGE.to_string()),
    );
    TurnOutcome::Degraded { failure }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use shopassist_core::audit::{AuditCategory, InMemoryAuditSink};
    use shopassist_core::config::ModerationFailMode;
    use shopassist_core::domain::catalog::{Catalog, CatalogEntry, CatalogEntryId};
    use shopassist_core::domain::transcript::{Role, SessionId};
    use shopassist_core::errors::{
        FailureKind, MODERATION_POLICY_MESSAGE, NO_MATCH_ESCALATION_MESSAGE,
        ORACLE_UNAVAILABLE_MESSAGE,
    };
    use shopassist_core::flows::DialoguePhase;
    use shopassist_core::matching::MatchingPolicy;

    use super::{ControllerError, ControllerSettings, DialogueController, TurnOutcome};
    use crate::oracles::{Confirmation, ModerationVerdict, OracleError, Oracles, StructuredRecord};
    use crate::prompts::{FALLBACK_GREETING, FETCHING_PRODUCTS_MESSAGE};
    use crate::retry::RetryPolicy;
    use crate::testing::{
        Hold, ScriptedClassification, ScriptedCompletion, ScriptedConfirmation,
        ScriptedExtraction, ScriptedModeration,
    };

    struct Harness {
        controller: Arc<DialogueController>,
        completion: Arc<ScriptedCompletion>,
        moderation: Arc<ScriptedModeration>,
        confirmation: Arc<ScriptedConfirmation>,
        extraction: Arc<ScriptedExtraction>,
        classification: Arc<ScriptedClassification>,
        audit: InMemoryAuditSink,
    }

    fn object(value: serde_json::Value) -> StructuredRecord {
        match value {
            serde_json::Value::Object(map) => map,
            _ => StructuredRecord::new(),
        }
    }

    fn levels(values: [&str; 5]) -> StructuredRecord {
        object(json!({
            "GPU intensity": values[0],
            "Display quality": values[1],
            "Portability": values[2],
            "Multitasking": values[3],
            "Processing speed": values[4],
        }))
    }

    fn requirements(budget: i64) -> StructuredRecord {
        let mut record = levels(["high", "high", "low", "high", "high"]);
        record.insert("Budget".to_string(), json!(budget));
        record
    }

    fn laptop(id: &str, price: u64) -> CatalogEntry {
        CatalogEntry {
            id: CatalogEntryId(id.to_string()),
            name: format!("Laptop {id}"),
            price,
            description: format!("description of {id}"),
        }
    }

    async fn harness(completions: Vec<Result<String, OracleError>>) -> Harness {
        harness_with(completions, ScriptedModeration::flagging(&["forbidden"]), |_| {}).await
    }

    async fn harness_with(
        completions: Vec<Result<String, OracleError>>,
        moderation: ScriptedModeration,
        configure: impl FnOnce(&mut ControllerSettings),
    ) -> Harness {
        let completion = Arc::new(ScriptedCompletion::with_script(completions));
        let moderation = Arc::new(moderation);
        let confirmation = Arc::new(ScriptedConfirmation::default());
        let extraction = Arc::new(ScriptedExtraction::default());
        let classification = Arc::new(ScriptedClassification::default());
        classification
            .respond("description of A", Ok(levels(["high", "high", "low", "high", "high"])))
            .await;
        classification
            .respond("description of B", Ok(levels(["high", "high", "high", "high", "high"])))
            .await;
        classification
            .respond("description of C", Ok(levels(["low", "low", "high", "low", "low"])))
            .await;
        let audit = InMemoryAuditSink::default();
        let mut settings = ControllerSettings {
            retry: RetryPolicy {
                max_retries: 0,
                base_delay_ms: 0,
                max_delay_ms: 0,
                timeout: Duration::from_secs(5),
            },
            matching: MatchingPolicy::default(),
            moderation_fail_mode: ModerationFailMode::Closed,
            max_concurrency: 2,
            ..ControllerSettings::default()
        };
        configure(&mut settings);

        let controller = DialogueController::new(
            Oracles {
                completion: completion.clone(),
                moderation: moderation.clone(),
                confirmation: confirmation.clone(),
                extraction: extraction.clone(),
                classification: classification.clone(),
            },
            Arc::new(Catalog::new(vec![
                laptop("A", 140_000),
                laptop("B", 160_000),
                laptop("C", 100_000),
            ])),
            settings,
            Arc::new(audit.clone()),
        )
        .expect("controller builds");

        Harness {
            controller: Arc::new(controller),
            completion,
            moderation,
            confirmation,
            extraction,
            classification,
            audit,
        }
    }

    fn ok(text: &str) -> Result<String, OracleError> {
        Ok(text.to_string())
    }

    #[tokio::test]
    async fn opening_a_session_greets_the_user() {
        let harness = harness(vec![ok("Hello! What will you use the laptop for?")]).await;

        let view = harness.controller.open_session().await.expect("session opens");

        assert_eq!(view.phase, DialoguePhase::Welcome);
        assert_eq!(view.transcript.len(), 1);
        assert_eq!(
            view.transcript.turns()[0].text,
            "Hello! What will you use the laptop for?"
        );
        let requests = harness.completion.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0][0].content.contains("25000"));
    }

    #[tokio::test]
    async fn greeting_falls_back_when_the_oracle_fails() {
        let harness =
            harness(vec![Err(OracleError::Unavailable("connection refused".into()))]).await;

        let view = harness.controller.open_session().await.expect("session opens");

        assert_eq!(view.transcript.turns()[0].text, FALLBACK_GREETING);
    }

    #[tokio::test]
    async fn end_to_end_recommendation_and_followup() {
        let harness = harness(vec![
            ok("Hi! What will you use the laptop for?"),
            ok("Great, editing needs power. What is your budget?"),
            ok("I need a laptop with high GPU intensity, high display quality, low portability, \
                high multitasking, high processing speed and a budget of 150000."),
            ok("1. Laptop A: RTX, 32GB, 140000"),
            ok("Laptop A has a 4K display."),
        ])
        .await;
        harness.confirmation.push(Ok(Confirmation::Incomplete)).await;
        harness.confirmation.push(Ok(Confirmation::Complete)).await;
        harness.extraction.push(Ok(requirements(150_000))).await;

        let session = harness.controller.open_session().await.expect("open").session_id;

        let first = harness
            .controller
            .handle_message(&session, "I edit videos in After Effects")
            .await
            .expect("first turn");
        assert_eq!(first.outcome, TurnOutcome::FollowUp);
        assert_eq!(first.phase, DialoguePhase::Eliciting);
        assert_eq!(first.appended.len(), 2);

        let second = harness
            .controller
            .handle_message(&session, "About 1.5 lakh")
            .await
            .expect("second turn");
        assert_eq!(second.outcome, TurnOutcome::Recommended { shortlisted: 1 });
        assert_eq!(second.phase, DialoguePhase::Recommending);
        let texts = second.appended.iter().map(|turn| turn.text.as_str()).collect::<Vec<_>>();
        assert!(texts.contains(&FETCHING_PRODUCTS_MESSAGE));
        assert_eq!(texts.last(), Some(&"1. Laptop A: RTX, 32GB, 140000"));

        let view = harness.controller.view(&session).await.expect("view");
        let shortlist = view.shortlist.expect("shortlist attached");
        assert_eq!(shortlist.len(), 1);
        assert_eq!(shortlist[0].entry.id.0, "A");
        assert_eq!(shortlist[0].score, 5);
        assert_eq!(harness.classification.calls_for("description of B").await, 0);

        let third = harness
            .controller
            .handle_message(&session, "Does it have a good screen?")
            .await
            .expect("followup");
        assert_eq!(third.outcome, TurnOutcome::Answered);
        assert_eq!(third.phase, DialoguePhase::Followup);

        let requests = harness.completion.requests().await;
        let followup_request = requests.last().expect("followup request");
        assert!(followup_request[0].content.contains("Laptop A"));
        assert!(!followup_request[0].content.contains("Laptop C"));
        assert_eq!(
            followup_request.last().map(|message| message.content.as_str()),
            Some("Does it have a good screen?")
        );
        assert_eq!(harness.classification.total_calls().await, 2);
    }

    #[tokio::test]
    async fn low_budget_never_reaches_scoring() {
        let harness = harness(vec![
            ok("Hi!"),
            ok("I need a laptop with low GPU intensity ... and a budget of 20000."),
        ])
        .await;
        harness.confirmation.push(Ok(Confirmation::Complete)).await;
        harness.extraction.push(Ok(requirements(20_000))).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report =
            harness.controller.handle_message(&session, "20k max").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::BudgetRejected);
        assert_eq!(report.phase, DialoguePhase::Eliciting);
        let notice = report.appended.last().expect("notice appended");
        assert!(notice.text.contains("25000"));
        assert_eq!(harness.classification.total_calls().await, 0);
        let view = harness.controller.view(&session).await.expect("view");
        assert!(view.requirements.is_none());
        assert!(view.shortlist.is_none());
    }

    #[tokio::test]
    async fn flagged_user_text_terminates_without_further_oracle_calls() {
        let harness = harness(vec![ok("Hi!")]).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report = harness
            .controller
            .handle_message(&session, "something forbidden")
            .await
            .expect("turn");

        assert_eq!(report.outcome, TurnOutcome::Terminated);
        assert_eq!(report.phase, DialoguePhase::Welcome);
        assert_eq!(harness.completion.requests().await.len(), 1, "only the greeting");
        assert!(harness.confirmation.seen().await.is_empty());
        assert_eq!(harness.extraction.calls().await, 0);

        let view = harness.controller.view(&session).await.expect("view");
        assert_eq!(view.generation, 1);
        assert_eq!(view.transcript.len(), 1);
        assert_eq!(view.transcript.turns()[0].text, MODERATION_POLICY_MESSAGE);

        let events = harness.audit.events();
        assert!(events.iter().any(|event| {
            event.event_type == "dialogue.transition_applied"
                && event.metadata.get("to").map(String::as_str) == Some("Terminated")
        }));
    }

    #[tokio::test]
    async fn flagged_assistant_reply_terminates() {
        let harness = harness(vec![ok("Hi!"), ok("a forbidden reply")]).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report =
            harness.controller.handle_message(&session, "I game a lot").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::Terminated);
        assert!(harness.confirmation.seen().await.is_empty());
        let transcript = harness.controller.transcript(&session).await.expect("transcript");
        assert!(transcript.iter().all(|turn| !turn.text.contains("forbidden")));
        assert_eq!(
            harness.moderation.seen().await.last().map(String::as_str),
            Some("a forbidden reply")
        );
    }

    #[tokio::test]
    async fn empty_shortlist_escalates_without_summary() {
        let harness = harness(vec![ok("Hi!"), ok("summary with budget 30000")]).await;
        harness.confirmation.push(Ok(Confirmation::Complete)).await;
        harness.extraction.push(Ok(requirements(30_000))).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report = harness.controller.handle_message(&session, "cheap").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::NoMatch);
        assert_eq!(report.phase, DialoguePhase::Recommending);
        assert_eq!(
            report.appended.last().map(|turn| turn.text.as_str()),
            Some(NO_MATCH_ESCALATION_MESSAGE)
        );
        assert_eq!(harness.completion.requests().await.len(), 2);
        let view = harness.controller.view(&session).await.expect("view");
        assert_eq!(view.shortlist.map(|shortlist| shortlist.len()), Some(0));
    }

    #[tokio::test]
    async fn unnormalizable_summary_resumes_elicitation_silently() {
        let harness = harness(vec![ok("Hi!"), ok("You want something nice.")]).await;
        harness.confirmation.push(Ok(Confirmation::Complete)).await;
        harness.extraction.push(Err(OracleError::Schema("no arguments".into()))).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report = harness.controller.handle_message(&session, "anything").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::FollowUp);
        assert_eq!(report.phase, DialoguePhase::Eliciting);
        assert!(report.appended.iter().all(|turn| !turn.text.contains("no arguments")));
    }

    #[tokio::test]
    async fn unavailable_oracle_degrades_with_fixed_message() {
        let harness =
            harness(vec![ok("Hi!"), Err(OracleError::Unavailable("HTTP 503 upstream".into()))])
                .await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report = harness.controller.handle_message(&session, "hello").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::Degraded { failure: FailureKind::OracleUnavailable });
        let last = report.appended.last().expect("notice");
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text, ORACLE_UNAVAILABLE_MESSAGE);
        assert!(report.appended.iter().all(|turn| !turn.text.contains("503")));
    }

    #[tokio::test]
    async fn reset_during_turn_discards_stale_results() {
        let harness = harness(vec![ok("Hi!"), ok("stale reply")]).await;
        let session = harness.controller.open_session().await.expect("open").session_id;
        let hold = Hold::new();
        harness.completion.hold_next(hold.clone()).await;

        let turn = {
            let controller = harness.controller.clone();
            let session = session.clone();
            tokio::spawn(async move { controller.handle_message(&session, "I code").await })
        };
        hold.entered.notified().await;

        let reset = {
            let controller = harness.controller.clone();
            let session = session.clone();
            tokio::spawn(async move { controller.reset(&session).await })
        };
        loop {
            let generation =
                harness.controller.view(&session).await.expect("view").generation;
            if generation == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        hold.release.notify_one();

        let report = turn.await.expect("turn task").expect("turn");
        assert_eq!(report.outcome, TurnOutcome::Discarded);
        assert!(report.appended.is_empty());

        let view = reset.await.expect("reset task").expect("reset");
        assert_eq!(view.phase, DialoguePhase::Welcome);
        assert_eq!(view.transcript.len(), 1, "only the new greeting");
        assert!(view.transcript.turns().iter().all(|turn| turn.text != "stale reply"));
        assert!(view.transcript.turns().iter().all(|turn| turn.text != "I code"));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let harness = harness(Vec::new()).await;
        let first = harness.controller.open_session().await.expect("open").session_id;
        let second = harness.controller.open_session().await.expect("open").session_id;

        let (a, b) = tokio::join!(
            harness.controller.handle_message(&first, "gaming laptop"),
            harness.controller.handle_message(&second, "office laptop"),
        );
        a.expect("first turn");
        b.expect("second turn");

        let first_transcript = harness.controller.transcript(&first).await.expect("first");
        let second_transcript = harness.controller.transcript(&second).await.expect("second");
        assert!(first_transcript.iter().any(|turn| turn.text == "gaming laptop"));
        assert!(first_transcript.iter().all(|turn| turn.text != "office laptop"));
        assert!(second_transcript.iter().any(|turn| turn.text == "office laptop"));
        assert_eq!(harness.controller.session_count().await, 2);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let harness = harness(Vec::new()).await;

        let error = harness
            .controller
            .handle_message(&SessionId("missing".into()), "hi")
            .await
            .expect_err("unknown session");

        assert!(matches!(error, ControllerError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn flagged_recommendation_summary_resets_the_session() {
        let harness = harness(vec![
            ok("Hi!"),
            ok("You need high GPU, high display, low portability, high multitasking, \
                high processing speed and a budget of 150000."),
            ok("1. Laptop A is forbidden fruit"),
        ])
        .await;
        harness.confirmation.push(Ok(Confirmation::Complete)).await;
        harness.extraction.push(Ok(requirements(150_000))).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report =
            harness.controller.handle_message(&session, "video editing").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::Terminated);
        assert_eq!(report.phase, DialoguePhase::Welcome);
        let view = harness.controller.view(&session).await.expect("view");
        assert_eq!(view.generation, 1);
        assert!(view.shortlist.is_none());
        assert!(view.requirements.is_none());
        assert_eq!(view.transcript.len(), 1);
        assert_eq!(view.transcript.turns()[0].text, MODERATION_POLICY_MESSAGE);

        let events = harness.audit.events();
        assert!(events.iter().any(|event| {
            event.event_type == "moderation.flagged"
                && event.metadata.get("source").map(String::as_str) == Some("assistant")
        }));
        assert!(events.iter().any(|event| {
            event.event_type == "matching.shortlist_built" && event.category == AuditCategory::Matching
        }));
    }

    #[tokio::test]
    async fn flagged_followup_answer_resets_the_session() {
        let harness = harness(vec![
            ok("Hi!"),
            ok("summary with a budget of 150000"),
            ok("1. Laptop A: RTX, 32GB, 140000"),
            ok("a forbidden answer"),
        ])
        .await;
        harness.confirmation.push(Ok(Confirmation::Complete)).await;
        harness.extraction.push(Ok(requirements(150_000))).await;
        let session = harness.controller.open_session().await.expect("open").session_id;
        let recommended =
            harness.controller.handle_message(&session, "video editing").await.expect("turn");
        assert_eq!(recommended.outcome, TurnOutcome::Recommended { shortlisted: 1 });

        let report = harness
            .controller
            .handle_message(&session, "What about battery life?")
            .await
            .expect("followup");

        assert_eq!(report.outcome, TurnOutcome::Terminated);
        assert_eq!(report.phase, DialoguePhase::Welcome);
        let transcript = harness.controller.transcript(&session).await.expect("transcript");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, MODERATION_POLICY_MESSAGE);
        assert!(transcript.iter().all(|turn| !turn.text.contains("forbidden")));
    }

    #[tokio::test]
    async fn moderation_outage_on_user_text_terminates_when_fail_closed() {
        let moderation = ScriptedModeration::with_script(vec![
            Ok(ModerationVerdict::NotFlagged),
            Err(OracleError::Unavailable("moderation down".into())),
        ]);
        let harness = harness_with(vec![ok("Hi!")], moderation, |_| {}).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report = harness.controller.handle_message(&session, "hello").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::Terminated);
        assert_eq!(harness.completion.requests().await.len(), 1, "only the greeting");
        let transcript = harness.controller.transcript(&session).await.expect("transcript");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, MODERATION_POLICY_MESSAGE);
        assert!(harness.audit.events().iter().any(|event| {
            event.event_type == "moderation.oracle_failed"
                && event.category == AuditCategory::Moderation
        }));
    }

    #[tokio::test]
    async fn oracle_timeout_degrades_with_timeout_notice() {
        let harness = harness(vec![ok("Hi!"), Err(OracleError::Timeout(30_000))]).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        let report = harness.controller.handle_message(&session, "hello").await.expect("turn");

        assert_eq!(report.outcome, TurnOutcome::Degraded { failure: FailureKind::OracleTimeout });
        assert_eq!(report.phase, DialoguePhase::Eliciting);
        let notice = report.appended.last().expect("notice");
        assert_eq!(Some(notice.text.clone()), FailureKind::OracleTimeout.user_message());
        assert!(report.appended.iter().all(|turn| !turn.text.contains("30000")));
    }

    #[tokio::test]
    async fn message_queued_behind_a_cancelled_turn_follows_the_new_greeting() {
        let harness = harness(vec![ok("Hi!"), ok("stale reply")]).await;
        let session = harness.controller.open_session().await.expect("open").session_id;
        let hold = Hold::new();
        harness.completion.hold_next(hold.clone()).await;

        let stale = {
            let controller = harness.controller.clone();
            let session = session.clone();
            tokio::spawn(async move { controller.handle_message(&session, "I code").await })
        };
        hold.entered.notified().await;

        let queued = {
            let controller = harness.controller.clone();
            let session = session.clone();
            tokio::spawn(async move { controller.handle_message(&session, "second message").await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let reset = {
            let controller = harness.controller.clone();
            let session = session.clone();
            tokio::spawn(async move { controller.reset(&session).await })
        };
        loop {
            let generation =
                harness.controller.view(&session).await.expect("view").generation;
            if generation == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        hold.release.notify_one();

        let stale = stale.await.expect("stale task").expect("stale turn");
        assert_eq!(stale.outcome, TurnOutcome::Discarded);
        queued.await.expect("queued task").expect("queued turn");
        reset.await.expect("reset task").expect("reset");

        let transcript = harness.controller.transcript(&session).await.expect("transcript");
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].role, Role::Assistant, "greeting opens the transcript");
        assert_eq!(transcript[1].text, "second message");
        assert_eq!(transcript[2].role, Role::Assistant);
        assert!(transcript.iter().all(|turn| turn.text != "stale reply" && turn.text != "I code"));
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_when_a_new_session_opens() {
        let harness = harness_with(
            Vec::new(),
            ScriptedModeration::flagging(&["forbidden"]),
            |settings| settings.session_idle = Duration::from_millis(30),
        )
        .await;
        let stale = harness.controller.open_session().await.expect("open").session_id;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let fresh = harness.controller.open_session().await.expect("open").session_id;

        assert_eq!(harness.controller.session_count().await, 1);
        let error = harness
            .controller
            .handle_message(&stale, "still there?")
            .await
            .expect_err("expired session");
        assert!(matches!(error, ControllerError::UnknownSession(_)));
        assert!(harness.controller.view(&fresh).await.is_ok());
        assert!(harness.audit.events().iter().any(|event| {
            event.event_type == "session.expired"
                && event.category == AuditCategory::System
                && event.session_id.as_ref() == Some(&stale)
        }));
    }

    #[tokio::test]
    async fn closed_sessions_are_released() {
        let harness = harness(Vec::new()).await;
        let session = harness.controller.open_session().await.expect("open").session_id;

        harness.controller.close(&session).await.expect("close");

        assert_eq!(harness.controller.session_count().await, 0);
        assert!(matches!(
            harness.controller.view(&session).await,
            Err(ControllerError::UnknownSession(_))
        ));
        assert!(matches!(
            harness.controller.close(&session).await,
            Err(ControllerError::UnknownSession(_))
        ));
        assert!(harness.audit.events().iter().any(|event| event.event_type == "session.closed"));
    }
}
