use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    DialogueAction, DialogueContext, DialogueEvent, DialoguePhase, TransitionOutcome,
};

/// Pure transition table for the requirement-elicitation dialogue. Holds no
/// session state; callers pass the current phase and apply the outcome.
#[derive(Clone, Debug, Default)]
pub struct DialogueFlow;

impl DialogueFlow {
    pub fn initial_phase(&self) -> DialoguePhase {
        DialoguePhase::Welcome
    }

    pub fn apply(
        &self,
        current: DialoguePhase,
        event: &DialogueEvent,
        context: &DialogueContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: DialoguePhase,
        event: &DialogueEvent,
        context: &DialogueContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "dialogue.transition_applied",
                        AuditCategory::Dialogue,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "dialogue.transition_rejected",
                        AuditCategory::Dialogue,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: DialoguePhase, missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: DialoguePhase, event: DialogueEvent },
}

fn transition(
    current: DialoguePhase,
    event: &DialogueEvent,
    context: &DialogueContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use DialogueAction::{
        AnswerFromShortlist, AskFollowUp, ClearSession, EscalateToHuman, Greet,
        NormalizeRequirements, NotifyBudgetBelowMinimum, OpenRecommendationContext, RankCatalog,
        RecordPolicyMessage, RequestCompletion, ResumeElicitation, SummarizeShortlist,
    };
    use DialogueEvent::{
        BudgetRejected, ModerationFlagged, ProfileRejected, ProfileValidated,
        RequirementsConfirmed, RequirementsIncomplete, SessionReset, ShortlistReady,
        UserUtterance,
    };
    use DialoguePhase::{
        Confirming, Eliciting, Followup, Recommending, Scoring, Terminated, Welcome,
    };

    let (to, actions) = match (current, event) {
        (_, ModerationFlagged) => (Terminated, vec![ClearSession, RecordPolicyMessage]),
        (_, SessionReset) => (Welcome, vec![ClearSession, Greet]),
        (Welcome, UserUtterance) | (Eliciting, UserUtterance) => {
            (Eliciting, vec![RequestCompletion])
        }
        (Eliciting, RequirementsIncomplete) => (Eliciting, vec![AskFollowUp]),
        (Eliciting, RequirementsConfirmed) => (Confirming, vec![NormalizeRequirements]),
        (Confirming, ProfileRejected) => (Eliciting, vec![ResumeElicitation]),
        (Confirming, BudgetRejected) => (Eliciting, vec![NotifyBudgetBelowMinimum]),
        (Confirming, ProfileValidated) => {
            if !context.missing_required_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: current,
                    missing_fields: context.missing_required_fields.clone(),
                });
            }
            (Scoring, vec![RankCatalog])
        }
        (Scoring, ShortlistReady) => {
            if context.shortlist_empty {
                (Recommending, vec![EscalateToHuman, OpenRecommendationContext])
            } else {
                (Recommending, vec![OpenRecommendationContext, SummarizeShortlist])
            }
        }
        (Recommending, UserUtterance) | (Followup, UserUtterance) => {
            (Followup, vec![AnswerFromShortlist])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current, to, event: event.clone(), actions })
}
