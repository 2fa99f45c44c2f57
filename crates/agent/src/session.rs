use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use shopassist_core::domain::requirement::RequirementProfile;
use shopassist_core::domain::transcript::{SessionId, Transcript};
use shopassist_core::flows::DialoguePhase;
use shopassist_core::matching::ScoredCandidate;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::oracles::ChatMessage;

/// Everything one conversation owns. Replaced wholesale when a turn commits.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub phase: DialoguePhase,
    pub transcript: Transcript,
    pub requirements: Option<RequirementProfile>,
    pub shortlist: Option<Vec<ScoredCandidate>>,
    /// Oracle-facing history used while eliciting requirements
    pub elicitation: Vec<ChatMessage>,
    /// Oracle-facing history seeded with the shortlist
    pub recommendation: Vec<ChatMessage>,
    /// Bumped on every reset or termination; turns started under an older
    /// generation must not commit.
    pub generation: u64,
    /// Set by a reset; whoever takes the turn lock next greets first.
    pub greeting_pending: bool,
}

impl SessionState {
    pub fn new(elicitation_system_prompt: String) -> Self {
        Self {
            phase: DialoguePhase::Welcome,
            transcript: Transcript::default(),
            requirements: None,
            shortlist: None,
            elicitation: vec![ChatMessage::system(elicitation_system_prompt)],
            recommendation: Vec::new(),
            generation: 0,
            greeting_pending: false,
        }
    }

    /// Clears everything except the elicitation system prompt and advances
    /// the generation.
    pub fn restart(&mut self) {
        let system_prompt = self.elicitation.first().cloned();
        self.phase = DialoguePhase::Welcome;
        self.transcript.clear();
        self.requirements = None;
        self.shortlist = None;
        self.elicitation = system_prompt.into_iter().collect();
        self.recommendation.clear();
        self.generation += 1;
        self.greeting_pending = false;
    }
}

/// Serializable read-only view of a session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub phase: DialoguePhase,
    pub generation: u64,
    pub transcript: Transcript,
    pub requirements: Option<RequirementProfile>,
    pub shortlist: Option<Vec<ScoredCandidate>>,
}

pub struct SessionSlot {
    /// Held for a whole turn so messages on one session run one at a time.
    pub turn_lock: Mutex<()>,
    /// Held only to snapshot or commit, never across an oracle call.
    pub state: Mutex<SessionState>,
    last_activity: StdMutex<Instant>,
}

impl SessionSlot {
    pub fn new(state: SessionState) -> Self {
        Self {
            turn_lock: Mutex::new(()),
            state: Mutex::new(state),
            last_activity: StdMutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        match self.last_activity.lock() {
            Ok(mut last) => *last = Instant::now(),
            Err(poisoned) => *poisoned.into_inner() = Instant::now(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        match self.last_activity.lock() {
            Ok(last) => last.elapsed(),
            Err(poisoned) => poisoned.into_inner().elapsed(),
        }
    }

    /// A turn or reset currently holds the turn lock.
    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    pub async fn view(&self, session_id: &SessionId) -> SessionView {
        let state = self.state.lock().await;
        SessionView {
            session_id: session_id.clone(),
            phase: state.phase,
            generation: state.generation,
            transcript: state.transcript.clone(),
            requirements: state.requirements.clone(),
            shortlist: state.shortlist.clone(),
        }
    }
}

/// Process-local registry of live sessions. The map lock is only held for
/// lookup, insertion and eviction.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_SESSION_IDLE)
    }
}

pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

impl SessionStore {
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), idle_timeout }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub async fn insert(&self, session_id: SessionId, state: SessionState) -> Arc<SessionSlot> {
        let slot = Arc::new(SessionSlot::new(state));
        self.sessions.write().await.insert(session_id, slot.clone());
        slot
    }

    /// Looks up a session and marks it active.
    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<SessionSlot>> {
        let slot = self.sessions.read().await.get(session_id).cloned()?;
        slot.touch();
        Some(slot)
    }

    pub async fn remove(&self, session_id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Drops every session idle for at least the idle timeout. Sessions with
    /// a turn in progress are kept.
    pub async fn evict_idle(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let expired = sessions
            .iter()
            .filter(|(_, slot)| slot.idle_for() >= self.idle_timeout && !slot.is_busy())
            .map(|(session_id, _)| session_id.clone())
            .collect::<Vec<_>>();
        for session_id in &expired {
            sessions.remove(session_id);
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
