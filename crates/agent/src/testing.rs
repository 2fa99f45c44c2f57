//! Scripted oracle doubles for tests. Each double replays a queue of canned
//! results and records what it was asked.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shopassist_core::domain::features::Taxonomy;
use tokio::sync::{Mutex, Notify};

use crate::oracles::{
    ChatMessage, ClassificationOracle, CompletionOracle, Confirmation, ConfirmationOracle,
    ExtractionOracle, ModerationOracle, ModerationVerdict, OracleError, StructuredRecord,
};

/// Pauses one call until the test releases it.
#[derive(Clone)]
pub struct Hold {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Hold {
    pub fn new() -> Self {
        Self { entered: Arc::new(Notify::new()), release: Arc::new(Notify::new()) }
    }
}

impl Default for Hold {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ScriptedCompletion {
    state: Mutex<CompletionState>,
}

struct CompletionState {
    script: VecDeque<Result<String, OracleError>>,
    fallback: String,
    requests: Vec<Vec<ChatMessage>>,
    hold: Option<Hold>,
}

impl ScriptedCompletion {
    pub fn with_script(script: Vec<Result<String, OracleError>>) -> Self {
        Self {
            state: Mutex::new(CompletionState {
                script: script.into(),
                fallback: "Could you tell me more about how you will use the laptop?".to_string(),
                requests: Vec::new(),
                hold: None,
            }),
        }
    }

    pub async fn push(&self, result: Result<String, OracleError>) {
        self.state.lock().await.script.push_back(result);
    }

    /// The next call blocks after being recorded until `hold.release` fires.
    pub async fn hold_next(&self, hold: Hold) {
        self.state.lock().await.hold = Some(hold);
    }

    pub async fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.state.lock().await.requests.clone()
    }
}

#[async_trait]
impl CompletionOracle for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        let (result, hold) = {
            let mut state = self.state.lock().await;
            state.requests.push(messages.to_vec());
            let result = state.script.pop_front().unwrap_or_else(|| Ok(state.fallback.clone()));
            (result, state.hold.take())
        };

        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        result
    }
}

#[derive(Default)]
pub struct ScriptedModeration {
    state: Mutex<ModerationState>,
}

#[derive(Default)]
struct ModerationState {
    script: VecDeque<Result<ModerationVerdict, OracleError>>,
    markers: Vec<String>,
    seen: Vec<String>,
}

impl ScriptedModeration {
    pub fn with_script(script: Vec<Result<ModerationVerdict, OracleError>>) -> Self {
        Self {
            state: Mutex::new(ModerationState {
                script: script.into(),
                ..ModerationState::default()
            }),
        }
    }

    /// Flags any text containing one of `markers` once the script runs out.
    pub fn flagging(markers: &[&str]) -> Self {
        Self {
            state: Mutex::new(ModerationState {
                markers: markers.iter().map(|marker| marker.to_string()).collect(),
                ..ModerationState::default()
            }),
        }
    }

    pub async fn seen(&self) -> Vec<String> {
        self.state.lock().await.seen.clone()
    }
}

#[async_trait]
impl ModerationOracle for ScriptedModeration {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, OracleError> {
        let mut state = self.state.lock().await;
        state.seen.push(text.to_string());
        if let Some(result) = state.script.pop_front() {
            return result;
        }
        if state.markers.iter().any(|marker| text.contains(marker.as_str())) {
            Ok(ModerationVerdict::Flagged)
        } else {
            Ok(ModerationVerdict::NotFlagged)
        }
    }
}

#[derive(Default)]
pub struct ScriptedConfirmation {
    state: Mutex<ConfirmationState>,
}

#[derive(Default)]
struct ConfirmationState {
    script: VecDeque<Result<Confirmation, OracleError>>,
    seen: Vec<String>,
}

impl ScriptedConfirmation {
    pub fn with_script(script: Vec<Result<Confirmation, OracleError>>) -> Self {
        Self {
            state: Mutex::new(ConfirmationState { script: script.into(), seen: Vec::new() }),
        }
    }

    pub async fn push(&self, result: Result<Confirmation, OracleError>) {
        self.state.lock().await.script.push_back(result);
    }

    pub async fn seen(&self) -> Vec<String> {
        self.state.lock().await.seen.clone()
    }
}

#[async_trait]
impl ConfirmationOracle for ScriptedConfirmation {
    async fn confirm(&self, assistant_text: &str) -> Result<Confirmation, OracleError> {
        let mut state = self.state.lock().await;
        state.seen.push(assistant_text.to_string());
        state.script.pop_front().unwrap_or(Ok(Confirmation::Incomplete))
    }
}

#[derive(Default)]
pub struct ScriptedExtraction {
    state: Mutex<ExtractionState>,
}

#[derive(Default)]
struct ExtractionState {
    script: VecDeque<Result<StructuredRecord, OracleError>>,
    inputs: Vec<String>,
}

impl ScriptedExtraction {
    pub fn with_script(script: Vec<Result<StructuredRecord, OracleError>>) -> Self {
        Self { state: Mutex::new(ExtractionState { script: script.into(), inputs: Vec::new() }) }
    }

    pub async fn push(&self, result: Result<StructuredRecord, OracleError>) {
        self.state.lock().await.script.push_back(result);
    }

    pub async fn calls(&self) -> usize {
        self.state.lock().await.inputs.len()
    }

    pub async fn inputs(&self) -> Vec<String> {
        self.state.lock().await.inputs.clone()
    }
}

#[async_trait]
impl ExtractionOracle for ScriptedExtraction {
    async fn extract(&self, text: &str, _schema: &Value) -> Result<StructuredRecord, OracleError> {
        let mut state = self.state.lock().await;
        state.inputs.push(text.to_string());
        state
            .script
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Schema("extraction script exhausted".to_string())))
    }
}

/// Answers per description. Unknown descriptions fail as unavailable.
#[derive(Default)]
pub struct ScriptedClassification {
    state: Mutex<ClassificationState>,
}

#[derive(Default)]
struct ClassificationState {
    responses: HashMap<String, Result<StructuredRecord, OracleError>>,
    calls: HashMap<String, usize>,
    in_flight: usize,
    max_in_flight: usize,
}

impl ScriptedClassification {
    pub async fn respond(&self, description: &str, result: Result<StructuredRecord, OracleError>) {
        self.state.lock().await.responses.insert(description.to_string(), result);
    }

    pub async fn calls_for(&self, description: &str) -> usize {
        self.state.lock().await.calls.get(description).copied().unwrap_or(0)
    }

    pub async fn total_calls(&self) -> usize {
        self.state.lock().await.calls.values().sum()
    }

    pub async fn max_in_flight(&self) -> usize {
        self.state.lock().await.max_in_flight
    }
}

#[async_trait]
impl ClassificationOracle for ScriptedClassification {
    async fn classify(
        &self,
        description: &str,
        _taxonomy: &Taxonomy,
    ) -> Result<StructuredRecord, OracleError> {
        let result = {
            let mut state = self.state.lock().await;
            *state.calls.entry(description.to_string()).or_insert(0) += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.responses.get(description).cloned().unwrap_or_else(|| {
                Err(OracleError::Unavailable(format!("no classification for `{description}`")))
            })
        };

        tokio::task::yield_now().await;
        self.state.lock().await.in_flight -= 1;
        result
    }
}
