//! Dialogue runtime for the laptop shopping assistant.
//!
//! A session moves through requirement elicitation, normalization of the
//! confirmed summary into a typed profile, catalog ranking and finally
//! follow-up answers grounded in the shortlist. Every model interaction goes
//! through the narrow oracle traits in [`oracles`], so the runtime can be
//! driven by a real provider or by the scripted doubles in `testing`.
//!
//! # Safety Principle
//!
//! Oracles only translate and phrase. Budget checks, scoring, ranking and the
//! acceptance threshold are deterministic and live in `shopassist-core`.

pub mod conversation;
pub mod features;
pub mod guardrails;
pub mod oracles;
pub mod prompts;
pub mod ranker;
pub mod retry;
pub mod runtime;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use oracles::{ChatMessage, OracleError, Oracles};
pub use runtime::{
    ControllerError, ControllerSettings, DialogueController, TurnOutcome, TurnReport,
};
pub use session::SessionView;
