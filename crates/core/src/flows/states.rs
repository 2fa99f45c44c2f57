use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialoguePhase {
    Welcome,
    Eliciting,
    Confirming,
    Scoring,
    Recommending,
    Followup,
    Terminated,
}

impl DialoguePhase {
    /// Phases in which a user message is answered from the seeded shortlist.
    pub fn is_recommendation(self) -> bool {
        matches!(self, Self::Recommending | Self::Followup)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    UserUtterance,
    RequirementsIncomplete,
    RequirementsConfirmed,
    ProfileRejected,
    BudgetRejected,
    ProfileValidated,
    ShortlistReady,
    ModerationFlagged,
    SessionReset,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DialogueContext {
    pub missing_required_fields: Vec<String>,
    pub shortlist_empty: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueAction {
    RequestCompletion,
    AskFollowUp,
    NormalizeRequirements,
    ResumeElicitation,
    NotifyBudgetBelowMinimum,
    RankCatalog,
    OpenRecommendationContext,
    SummarizeShortlist,
    EscalateToHuman,
    AnswerFromShortlist,
    ClearSession,
    RecordPolicyMessage,
    Greet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialoguePhase,
    pub to: DialoguePhase,
    pub event: DialogueEvent,
    pub actions: Vec<DialogueAction>,
}
