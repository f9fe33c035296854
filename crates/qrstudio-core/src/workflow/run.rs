//! The progress ticker behind a started generation.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::history::{HistoryEntry, HistoryStore};
use crate::render::Surface;
use crate::request::QrCodeRequest;

use super::{GenerationError, GenerationOutcome, ShortLink, StateCell, WorkflowConfig, WorkflowState};

/// Receives progress percentages while a run is live.
pub trait ProgressObserver: Send + Sync + 'static {
    fn on_progress(&self, percent: u8);
}

impl<F> ProgressObserver for F
where
    F: Fn(u8) + Send + Sync + 'static,
{
    fn on_progress(&self, percent: u8) {
        self(percent)
    }
}

/// What a run is about to record.
#[derive(Debug, Clone, Copy)]
pub struct CommitDraft<'a> {
    pub run_id: Uuid,
    pub content: &'a str,
    pub request: &'a QrCodeRequest,
    pub surface: &'a Surface,
    pub short_link: Option<&'a ShortLink>,
}

/// Work that has to succeed before a run writes its history entry.
#[async_trait]
pub trait CommitHook: Send + Sync {
    /// Called once after the last tick, before anything is recorded. An
    /// error ends the run and leaves history untouched.
    async fn before_commit(&self, draft: CommitDraft<'_>) -> Result<(), GenerationError>;

    /// Undo a successful `before_commit` for a run that was cancelled
    /// before it could record.
    async fn abandon(&self, draft: CommitDraft<'_>);
}

/// Everything the completion step needs, prepared before the ticker starts.
pub(crate) struct PendingEntry {
    pub content: String,
    pub request: QrCodeRequest,
    pub surface: Surface,
    pub short_link: Option<ShortLink>,
}

impl PendingEntry {
    fn draft(&self, run_id: Uuid) -> CommitDraft<'_> {
        CommitDraft {
            run_id,
            content: &self.content,
            request: &self.request,
            surface: &self.surface,
            short_link: self.short_link.as_ref(),
        }
    }
}

/// Cancellation side of a run, shared by the workflow and the handle.
///
/// `live` is held while a callback or the completion step runs, and while
/// cancelling, so cancellation and delivery never interleave.
#[derive(Debug, Clone)]
pub(crate) struct RunControl {
    run_id: Uuid,
    live: Arc<Mutex<bool>>,
    state: StateCell,
    token: CancellationToken,
}

impl RunControl {
    pub(crate) fn cancel(&self) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if *live {
            *live = false;
            if let Err(e) = self.state.transition(WorkflowState::Idle) {
                tracing::warn!(run_id = %self.run_id, error = %e, "cancel found unexpected state");
            }
            tracing::info!(run_id = %self.run_id, "generation cancelled");
        }
        self.token.cancel();
    }

    /// Release a run that stopped without completing or being cancelled.
    fn release(&self) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if !*live {
            return;
        }
        *live = false;
        if let Err(e) = self.state.transition(WorkflowState::Idle) {
            tracing::warn!(run_id = %self.run_id, error = %e, "forcing workflow back to idle");
            self.state.force_idle();
        }
        tracing::warn!(run_id = %self.run_id, "generation stopped before completion");
    }
}

/// Returns the workflow to idle when the ticker exits early, panics
/// included. A completed or cancelled run is no longer live, so this is a
/// no-op for them.
struct ReleaseOnExit<'a>(&'a RunControl);

impl Drop for ReleaseOnExit<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Owner's view of a running generation.
#[derive(Debug)]
pub struct RunHandle {
    control: RunControl,
    task: JoinHandle<Result<GenerationOutcome, GenerationError>>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.control.run_id
    }

    /// Stop the run. After this returns no progress callback fires and
    /// history is not touched by this run.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to complete, fail, or be cancelled.
    pub async fn outcome(self) -> Result<GenerationOutcome, GenerationError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(GenerationError::Cancelled),
            Err(e) => Err(GenerationError::Internal(e.to_string())),
        }
    }
}

pub(crate) struct RunParts {
    pub config: WorkflowConfig,
    pub history: Arc<Mutex<HistoryStore>>,
    pub pending: PendingEntry,
    pub observer: Arc<dyn ProgressObserver>,
    pub hook: Option<Arc<dyn CommitHook>>,
}

pub(crate) fn spawn(run_id: Uuid, state: StateCell, parts: RunParts) -> (RunControl, RunHandle) {
    let control = RunControl {
        run_id,
        live: Arc::new(Mutex::new(true)),
        state,
        token: CancellationToken::new(),
    };

    let task = tokio::spawn(tick(control.clone(), parts));
    let handle = RunHandle {
        control: control.clone(),
        task,
    };
    (control, handle)
}

enum Finish {
    Completed(GenerationOutcome),
    Stopped(PendingEntry),
}

async fn tick(control: RunControl, parts: RunParts) -> Result<GenerationOutcome, GenerationError> {
    let _release = ReleaseOnExit(&control);
    let RunParts {
        config,
        history,
        pending,
        observer,
        hook,
    } = parts;

    let steps = config.steps();
    let mut interval = tokio::time::interval(config.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; progress 0 was already reported.
    interval.tick().await;

    for step in 1..steps {
        next_tick(&control, &mut interval).await?;
        let progress = (step * 100 / steps) as u8;
        if !report(&control, progress, observer.as_ref())? {
            return Err(GenerationError::Cancelled);
        }
    }
    next_tick(&control, &mut interval).await?;

    if let Some(hook) = &hook {
        hook.before_commit(pending.draft(control.run_id)).await?;
    }

    // The history write hits the backend; keep it off the async workers.
    let finishing = {
        let control = control.clone();
        let observer = Arc::clone(&observer);
        tokio::task::spawn_blocking(move || finish(&control, &history, pending, observer.as_ref()))
    };

    match finishing.await {
        Ok(Ok(Finish::Completed(outcome))) => Ok(outcome),
        Ok(Ok(Finish::Stopped(pending))) => {
            if let Some(hook) = &hook {
                hook.abandon(pending.draft(control.run_id)).await;
            }
            Err(GenerationError::Cancelled)
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(GenerationError::Internal(e.to_string())),
    }
}

async fn next_tick(control: &RunControl, interval: &mut Interval) -> Result<(), GenerationError> {
    tokio::select! {
        biased;
        _ = control.token.cancelled() => Err(GenerationError::Cancelled),
        _ = interval.tick() => Ok(()),
    }
}

/// Deliver one intermediate progress value. `false` means the run was
/// cancelled first.
fn report(
    control: &RunControl,
    progress: u8,
    observer: &dyn ProgressObserver,
) -> Result<bool, GenerationError> {
    let live = control.live.lock().unwrap_or_else(PoisonError::into_inner);
    if !*live {
        return Ok(false);
    }
    control
        .state
        .transition(WorkflowState::Rendering { progress })?;
    observer.on_progress(progress);
    Ok(true)
}

fn finish(
    control: &RunControl,
    history: &Mutex<HistoryStore>,
    pending: PendingEntry,
    observer: &dyn ProgressObserver,
) -> Result<Finish, GenerationError> {
    let mut live = control.live.lock().unwrap_or_else(PoisonError::into_inner);
    if !*live {
        return Ok(Finish::Stopped(pending));
    }

    control
        .state
        .transition(WorkflowState::Rendering { progress: 100 })?;
    observer.on_progress(100);

    let outcome = record(control.run_id, history, pending);
    control.state.transition(WorkflowState::Completed)?;
    *live = false;
    tracing::info!(
        run_id = %control.run_id,
        entry_id = outcome.entry.id,
        "generation completed"
    );
    Ok(Finish::Completed(outcome))
}

fn record(run_id: Uuid, history: &Mutex<HistoryStore>, pending: PendingEntry) -> GenerationOutcome {
    let mut store = history.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = HistoryEntry {
        id: store.next_id(),
        content: pending.content,
        foreground_color: pending.request.appearance.foreground,
        size_px: pending.request.appearance.size_px,
        created_at: Utc::now(),
        qr_type: pending.request.qr_type,
        content_category: pending.request.content_category,
    };

    let persistence_warning = match store.append(entry.clone()) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "history kept in memory only");
            Some(e.to_string())
        }
    };

    GenerationOutcome {
        run_id,
        entry,
        surface: pending.surface,
        short_link: pending.short_link,
        persistence_warning,
    }
}
