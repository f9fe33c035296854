//! Generation workflow: validate, authorize, render with simulated
//! progress, then record the result in history.
//!
//! ```text
//! idle       -> validating
//! validating -> authorizing | rejected
//! authorizing-> rendering    | rejected
//! rendering  -> rendering (higher progress) | completed | idle (cancel)
//! completed  -> validating | idle
//! rejected   -> validating | idle
//! ```

pub mod run;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use qrstudio_db::models::QrType;

use crate::authz::{self, AuthzError};
use crate::history::{HistoryEntry, HistoryStore};
use crate::render::{RenderError, Renderer, Surface};
use crate::request::{AppearanceError, QrCodeRequest};
use crate::session::Session;

pub use run::{CommitDraft, CommitHook, ProgressObserver, RunHandle};

/// Length of generated short-link codes.
pub const SHORT_CODE_LEN: usize = 8;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Validating,
    Authorizing,
    Rendering { progress: u8 },
    Completed,
    Rejected { reason: String },
}

impl WorkflowState {
    /// Check whether `from -> to` is an edge in the state graph.
    pub fn is_valid_transition(from: &WorkflowState, to: &WorkflowState) -> bool {
        use WorkflowState::*;
        match (from, to) {
            (Rendering { progress: a }, Rendering { progress: b }) => b > a,
            _ => matches!(
                (from, to),
                (Idle | Completed | Rejected { .. }, Validating)
                    | (Validating, Authorizing)
                    | (Validating | Authorizing, Rejected { .. })
                    | (Authorizing, Rendering { progress: 0 })
                    | (Rendering { .. }, Completed)
                    | (Rendering { .. }, Idle)
                    | (Completed | Rejected { .. }, Idle)
            ),
        }
    }

    /// States from which a new run may start.
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            WorkflowState::Idle | WorkflowState::Completed | WorkflowState::Rejected { .. }
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Idle => f.write_str("idle"),
            WorkflowState::Validating => f.write_str("validating"),
            WorkflowState::Authorizing => f.write_str("authorizing"),
            WorkflowState::Rendering { progress } => write!(f, "rendering ({progress}%)"),
            WorkflowState::Completed => f.write_str("completed"),
            WorkflowState::Rejected { reason } => write!(f, "rejected: {reason}"),
        }
    }
}

/// Shared cell holding the workflow state; every write is checked against
/// the transition graph.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<Mutex<WorkflowState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(WorkflowState::Idle)))
    }

    pub(crate) fn get(&self) -> WorkflowState {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn transition(&self, to: WorkflowState) -> Result<(), GenerationError> {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !WorkflowState::is_valid_transition(&state, &to) {
            return Err(GenerationError::InvalidTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = %*state, to = %to, "workflow transition");
        *state = to;
        Ok(())
    }

    /// Unconditional return to idle.
    pub(crate) fn force_idle(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = WorkflowState::Idle;
    }
}

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("empty content: enter a URL or text to encode")]
    EmptyContent,

    #[error("{message}")]
    QuotaExceeded { limit: u32, message: String },

    #[error("{0}")]
    CustomizationLocked(String),

    #[error("invalid appearance: {0}")]
    InvalidAppearance(#[from] AppearanceError),

    #[error("cannot encode content: {0}")]
    Unencodable(RenderError),

    #[error("rendering is not available")]
    RenderingUnavailable,

    #[error("a generation is already running")]
    AlreadyRunning,

    #[error("generation was cancelled")]
    Cancelled,

    #[error("could not save the generated code: {0}")]
    Commit(String),

    #[error("invalid workflow transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("generation task failed: {0}")]
    Internal(String),
}

impl From<AuthzError> for GenerationError {
    fn from(err: AuthzError) -> Self {
        let message = err.to_string();
        match err {
            AuthzError::DynamicRequiresAccount => GenerationError::QuotaExceeded { limit: 0, message },
            AuthzError::DynamicQuotaReached { limit, .. } => {
                GenerationError::QuotaExceeded { limit, message }
            }
            AuthzError::CustomizationLocked => GenerationError::CustomizationLocked(message),
        }
    }
}

/// Redirect target for a dynamic code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortLink {
    pub code: String,
    pub url: String,
    pub destination: String,
}

impl ShortLink {
    /// Build `<base>/r/<account_id>/<code>` with a fresh random code.
    pub fn generate(base: &str, account_id: Uuid, destination: &str) -> Self {
        let code: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SHORT_CODE_LEN)
            .map(char::from)
            .collect();
        let url = format!("{}/r/{account_id}/{code}", base.trim_end_matches('/'));
        Self {
            code,
            url,
            destination: destination.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub run_id: Uuid,
    pub entry: HistoryEntry,
    pub surface: Surface,
    pub short_link: Option<ShortLink>,
    /// Set when the history entry was kept in memory but could not be
    /// written to its backend.
    pub persistence_warning: Option<String>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub duration: Duration,
    pub tick: Duration,
    pub short_link_base: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(1000),
            tick: Duration::from_millis(50),
            short_link_base: String::from("http://127.0.0.1:8787"),
        }
    }
}

impl WorkflowConfig {
    /// Number of progress ticks per run, kept within 1..=100 so each tick
    /// raises the percentage.
    pub fn steps(&self) -> u32 {
        let tick = self.tick.as_millis().max(1);
        (self.duration.as_millis() / tick).clamp(1, 100) as u32
    }
}

pub struct GenerationWorkflow {
    history: Arc<Mutex<HistoryStore>>,
    renderer: Arc<dyn Renderer>,
    config: WorkflowConfig,
    state: StateCell,
    active: Option<run::RunControl>,
    commit_hook: Option<Arc<dyn CommitHook>>,
}

impl fmt::Debug for GenerationWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationWorkflow")
            .field("renderer", &self.renderer.name())
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("commit_hook", &self.commit_hook.is_some())
            .finish()
    }
}

impl GenerationWorkflow {
    pub fn new(
        history: Arc<Mutex<HistoryStore>>,
        renderer: Arc<dyn Renderer>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            history,
            renderer,
            config,
            state: StateCell::new(),
            active: None,
            commit_hook: None,
        }
    }

    /// Run `hook` before every completed run is written to history.
    pub fn with_commit_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.commit_hook = Some(hook);
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state.get()
    }

    pub fn history(&self) -> Arc<Mutex<HistoryStore>> {
        Arc::clone(&self.history)
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Whether `start` would be accepted right now.
    pub fn can_generate(&self) -> bool {
        self.renderer.is_ready() && self.state.get().is_resting()
    }

    /// Begin a run. Validation and authorization happen synchronously;
    /// on success the progress ticker is spawned on the current tokio
    /// runtime and a handle to it is returned.
    ///
    /// `observer` is called with each progress value while the run is
    /// live. It must not call back into this workflow.
    pub fn start<O: ProgressObserver>(
        &mut self,
        session: &Session,
        request: QrCodeRequest,
        observer: O,
    ) -> Result<RunHandle, GenerationError> {
        let current = self.state.get();
        if matches!(current, WorkflowState::Rendering { .. }) {
            return Err(GenerationError::AlreadyRunning);
        }
        if !self.renderer.is_ready() {
            tracing::warn!(renderer = self.renderer.name(), "renderer not ready");
            return Err(GenerationError::RenderingUnavailable);
        }

        let run_id = Uuid::new_v4();
        self.state.transition(WorkflowState::Validating)?;

        let content = match request.trimmed_content() {
            Some(c) => c.to_string(),
            None => return Err(self.reject(run_id, GenerationError::EmptyContent)),
        };
        if let Err(e) = request.appearance.validate() {
            return Err(self.reject(run_id, e.into()));
        }

        self.state.transition(WorkflowState::Authorizing)?;
        if let Err(e) = authz::check_request(session, &request) {
            return Err(self.reject(run_id, e.into()));
        }

        let short_link = match request.qr_type {
            QrType::Dynamic => Some(ShortLink::generate(
                &self.config.short_link_base,
                session.account().id,
                &content,
            )),
            QrType::Static => None,
        };
        let payload = short_link.as_ref().map_or(content.as_str(), |l| l.url.as_str());
        let surface = match self.renderer.encode(payload, &request.appearance) {
            Ok(s) => s,
            Err(e) => return Err(self.reject(run_id, GenerationError::Unencodable(e))),
        };

        self.state.transition(WorkflowState::Rendering { progress: 0 })?;
        tracing::info!(
            run_id = %run_id,
            qr_type = %request.qr_type,
            plan = %session.plan(),
            "generation started"
        );
        observer.on_progress(0);

        let pending = run::PendingEntry {
            content,
            request,
            surface,
            short_link,
        };
        let (control, handle) = run::spawn(
            run_id,
            self.state.clone(),
            run::RunParts {
                config: self.config.clone(),
                history: Arc::clone(&self.history),
                pending,
                observer: Arc::new(observer),
                hook: self.commit_hook.clone(),
            },
        );
        self.active = Some(control);
        Ok(handle)
    }

    /// Stop the active run, if any. Once this returns no progress callback
    /// is in flight and no history change will happen for that run.
    pub fn cancel(&mut self) {
        if let Some(control) = self.active.take() {
            control.cancel();
        }
    }

    /// Cancel any run and return to idle.
    pub fn reset(&mut self) {
        self.cancel();
        self.state.force_idle();
    }

    fn reject(&self, run_id: Uuid, err: GenerationError) -> GenerationError {
        let reason = err.to_string();
        tracing::info!(run_id = %run_id, reason = %reason, "generation rejected");
        if let Err(e) = self.state.transition(WorkflowState::Rejected { reason }) {
            tracing::error!(run_id = %run_id, error = %e, "failed to record rejection");
        }
        err
    }
}

impl Drop for GenerationWorkflow {
    fn drop(&mut self) {
        self.cancel();
    }
}
