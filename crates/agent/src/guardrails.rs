use std::sync::Arc;

use shopassist_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use shopassist_core::config::ModerationFailMode;
use tracing::{debug, warn};

use crate::oracles::{ModerationOracle, ModerationVerdict, OracleError};
use crate::retry::RetryPolicy;

/// Raw result of asking the moderation oracle about one piece of text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModerationCheck {
    NotFlagged,
    Flagged,
    OracleError(OracleError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Block { reason_code: &'static str },
}

impl GateDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

/// Screens every user utterance and every oracle-produced reply before it
/// is appended or shown.
#[derive(Clone)]
pub struct ModerationGate {
    oracle: Arc<dyn ModerationOracle>,
    retry: RetryPolicy,
    fail_mode: ModerationFailMode,
    audit: Arc<dyn AuditSink>,
}

impl ModerationGate {
    pub fn new(
        oracle: Arc<dyn ModerationOracle>,
        retry: RetryPolicy,
        fail_mode: ModerationFailMode,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { oracle, retry, fail_mode, audit }
    }

    pub fn fail_mode(&self) -> ModerationFailMode {
        self.fail_mode
    }

    pub async fn check(&self, text: &str) -> ModerationCheck {
        if text.trim().is_empty() {
            return ModerationCheck::NotFlagged;
        }

        let oracle = &self.oracle;
        match self.retry.run("moderation", move || oracle.moderate(text)).await {
            Ok(ModerationVerdict::NotFlagged) => ModerationCheck::NotFlagged,
            Ok(ModerationVerdict::Flagged) => ModerationCheck::Flagged,
            Err(error) => ModerationCheck::OracleError(error),
        }
    }

    pub fn decide(&self, check: &ModerationCheck) -> GateDecision {
        match check {
            ModerationCheck::NotFlagged => GateDecision::Admit,
            ModerationCheck::Flagged => GateDecision::Block { reason_code: "content_flagged" },
            ModerationCheck::OracleError(_) => match self.fail_mode {
                ModerationFailMode::Closed => {
                    GateDecision::Block { reason_code: "moderation_unavailable_fail_closed" }
                }
                ModerationFailMode::Open => GateDecision::Admit,
            },
        }
    }

    /// Checks `text` and applies the configured fail mode. Blocks and oracle
    /// failures are audited; admitted text is only logged.
    pub async fn screen(
        &self,
        text: &str,
        source: &'static str,
        context: &AuditContext,
    ) -> GateDecision {
        let check = self.check(text).await;
        let decision = self.decide(&check);
        let correlation_id = context.correlation_id.as_str();

        match (&check, &decision) {
            (ModerationCheck::OracleError(error), _) => {
                warn!(
                    event_name = "moderation.oracle_failed",
                    correlation_id,
                    source,
                    error = %error,
                    blocked = decision.is_blocked(),
                    "moderation oracle failed; applying fail mode"
                );
                let outcome =
                    if decision.is_blocked() { AuditOutcome::Rejected } else { AuditOutcome::Failed };
                self.audit.emit(
                    self.event(context, "moderation.oracle_failed", outcome, source)
                        .with_metadata("fail_mode", self.fail_mode.as_str())
                        .with_metadata("failure", format!("{:?}", error.failure_kind())),
                );
            }
            (_, GateDecision::Block { reason_code }) => {
                warn!(
                    event_name = "moderation.flagged",
                    correlation_id,
                    source,
                    reason_code,
                    "text flagged by moderation"
                );
                self.audit.emit(
                    self.event(context, "moderation.flagged", AuditOutcome::Rejected, source)
                        .with_metadata("reason_code", *reason_code),
                );
            }
            (_, GateDecision::Admit) => debug!(
                event_name = "moderation.admitted",
                correlation_id,
                source,
                "text admitted by moderation"
            ),
        }

        decision
    }

    fn event(
        &self,
        context: &AuditContext,
        event_type: &str,
        outcome: AuditOutcome,
        source: &str,
    ) -> AuditEvent {
        AuditEvent::new(
            context.session_id.clone(),
            context.correlation_id.clone(),
            event_type,
            AuditCategory::Moderation,
            context.actor.clone(),
            outcome,
        )
        .with_metadata("source", source)
    }
}
