pub mod engine;
pub mod states;

pub use engine::{DialogueFlow, FlowTransitionError};
pub use states::{
    DialogueAction, DialogueContext, DialogueEvent, DialoguePhase, TransitionOutcome,
};
