//! End-to-end generation runs against a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use qrstudio_core::history::{FileBackend, HistoryStore, MemoryBackend};
use qrstudio_core::render::{QrCodeRenderer, RenderError, Renderer, Surface};
use qrstudio_core::request::{Appearance, QrCodeRequest};
use qrstudio_core::session::{Session, UserAccount};
use qrstudio_core::workflow::{
    CommitDraft, CommitHook, GenerationError, GenerationWorkflow, WorkflowConfig, WorkflowState,
};
use qrstudio_core::{EcLevel, PlanTier, QrType};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn workflow_with(backend: MemoryBackend) -> GenerationWorkflow {
    let history = Arc::new(Mutex::new(HistoryStore::open(Box::new(backend))));
    GenerationWorkflow::new(
        history,
        Arc::new(QrCodeRenderer::new()),
        WorkflowConfig {
            short_link_base: "https://qr.test".to_string(),
            ..WorkflowConfig::default()
        },
    )
}

fn workflow() -> (GenerationWorkflow, MemoryBackend) {
    let backend = MemoryBackend::new();
    (workflow_with(backend.clone()), backend)
}

fn session(plan: PlanTier, dynamic_count: u32) -> Session {
    Session::new(UserAccount::new(Uuid::new_v4(), "user@example.com", plan))
        .with_dynamic_code_count(dynamic_count)
}

fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |p| sink.lock().unwrap().push(p))
}

fn history_len(wf: &GenerationWorkflow) -> usize {
    wf.history().lock().unwrap().len()
}

struct OfflineRenderer;

impl Renderer for OfflineRenderer {
    fn name(&self) -> &str {
        "offline"
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn encode(&self, _: &str, _: &Appearance) -> Result<Surface, RenderError> {
        Err(RenderError::NotReady(self.name().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Validation and authorization
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn whitespace_content_is_rejected_every_time() {
    let (mut wf, backend) = workflow();
    let session = Session::guest();

    for _ in 0..2 {
        let (seen, obs) = recorder();
        let err = wf
            .start(&session, QrCodeRequest::new("   \t "), obs)
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyContent));
        assert!(matches!(wf.state(), WorkflowState::Rejected { .. }));
        assert!(seen.lock().unwrap().is_empty());
    }
    assert_eq!(history_len(&wf), 0);
    assert!(backend.stored().is_empty());
}

#[tokio::test(start_paused = true)]
async fn guest_cannot_start_dynamic() {
    let (mut wf, _) = workflow();
    let err = wf
        .start(
            &Session::guest(),
            QrCodeRequest::new("https://example.com").dynamic(),
            |_| {},
        )
        .unwrap_err();

    match err {
        GenerationError::QuotaExceeded { limit, message } => {
            assert_eq!(limit, 0);
            assert!(message.contains("free"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(history_len(&wf), 0);
}

#[tokio::test(start_paused = true)]
async fn free_plan_at_cap_is_rejected_with_limit() {
    let (mut wf, _) = workflow();
    let err = wf
        .start(
            &session(PlanTier::Free, 2),
            QrCodeRequest::new("https://example.com").dynamic(),
            |_| {},
        )
        .unwrap_err();

    let GenerationError::QuotaExceeded { limit, message } = err else {
        panic!("expected quota error");
    };
    assert_eq!(limit, 2);
    assert!(message.contains('2'));
    match wf.state() {
        WorkflowState::Rejected { reason } => assert!(reason.contains('2')),
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(history_len(&wf), 0);
}

#[tokio::test(start_paused = true)]
async fn free_plan_below_cap_may_generate_dynamic() {
    let (mut wf, _) = workflow();
    let handle = wf
        .start(
            &session(PlanTier::Free, 1),
            QrCodeRequest::new("https://example.com").dynamic(),
            |_| {},
        )
        .unwrap();
    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.entry.qr_type, QrType::Dynamic);
}

#[tokio::test(start_paused = true)]
async fn free_plan_cannot_customize() {
    let (mut wf, _) = workflow();
    let appearance = Appearance {
        error_correction: EcLevel::H,
        ..Appearance::default()
    };
    let err = wf
        .start(
            &session(PlanTier::Free, 0),
            QrCodeRequest::new("https://example.com").with_appearance(appearance),
            |_| {},
        )
        .unwrap_err();
    assert!(matches!(err, GenerationError::CustomizationLocked(_)));
}

#[tokio::test(start_paused = true)]
async fn unsupported_size_is_invalid_appearance() {
    let (mut wf, _) = workflow();
    let appearance = Appearance {
        size_px: 300,
        ..Appearance::default()
    };
    let err = wf
        .start(
            &session(PlanTier::Paid, 0),
            QrCodeRequest::new("https://example.com").with_appearance(appearance),
            |_| {},
        )
        .unwrap_err();
    assert!(matches!(err, GenerationError::InvalidAppearance(_)));
}

#[tokio::test(start_paused = true)]
async fn unavailable_renderer_refuses_to_start() {
    let history = Arc::new(Mutex::new(HistoryStore::in_memory()));
    let mut wf = GenerationWorkflow::new(
        history,
        Arc::new(OfflineRenderer),
        WorkflowConfig::default(),
    );
    assert!(!wf.can_generate());
    let err = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), |_| {})
        .unwrap_err();
    assert!(matches!(err, GenerationError::RenderingUnavailable));
    assert_eq!(wf.state(), WorkflowState::Idle);
}

// ---------------------------------------------------------------------------
// Rendering and completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn static_generation_appends_one_entry() {
    let (mut wf, backend) = workflow();
    let (seen, obs) = recorder();

    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("  https://example.com "), obs)
        .unwrap();
    assert_eq!(wf.state(), WorkflowState::Rendering { progress: 0 });

    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.entry.content, "https://example.com");
    assert_eq!(outcome.surface.payload(), "https://example.com");
    assert!(outcome.short_link.is_none());
    assert!(outcome.persistence_warning.is_none());
    assert_eq!(wf.state(), WorkflowState::Completed);

    let history = wf.history();
    let store = history.lock().unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.list()[0], outcome.entry);
    assert_eq!(backend.stored(), store.list());

    let progress = seen.lock().unwrap().clone();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(progress.len(), 21);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn run_takes_configured_duration() {
    let (mut wf, _) = workflow();
    let started = tokio::time::Instant::now();
    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), |_| {})
        .unwrap();
    handle.outcome().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn dynamic_generation_encodes_short_link() {
    let (mut wf, _) = workflow();
    let session = session(PlanTier::Paid, 19);

    let handle = wf
        .start(
            &session,
            QrCodeRequest::new("https://menu.example/today").dynamic(),
            |_| {},
        )
        .unwrap();
    let outcome = handle.outcome().await.unwrap();

    let link = outcome.short_link.expect("dynamic run has a short link");
    assert_eq!(
        link.url,
        format!("https://qr.test/r/{}/{}", session.account().id, link.code)
    );
    assert_eq!(link.destination, "https://menu.example/today");
    assert_eq!(outcome.surface.payload(), link.url);
    assert_eq!(outcome.entry.content, "https://menu.example/today");
}

#[tokio::test(start_paused = true)]
async fn second_start_while_rendering_is_refused() {
    let (mut wf, _) = workflow();
    let session = Session::guest();
    let first = wf
        .start(&session, QrCodeRequest::new("first"), |_| {})
        .unwrap();

    let err = wf
        .start(&session, QrCodeRequest::new("second"), |_| {})
        .unwrap_err();
    assert!(matches!(err, GenerationError::AlreadyRunning));
    assert!(!wf.can_generate());

    first.outcome().await.unwrap();
    assert!(wf.can_generate());

    let again = wf
        .start(&session, QrCodeRequest::new("third"), |_| {})
        .unwrap();
    again.outcome().await.unwrap();
    let contents: Vec<String> = wf
        .history()
        .lock()
        .unwrap()
        .list()
        .iter()
        .map(|e| e.content.clone())
        .collect();
    assert_eq!(contents, vec!["third", "first"]);
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_is_a_warning() {
    let mut wf = workflow_with(MemoryBackend::failing());
    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), |_| {})
        .unwrap();
    let outcome = handle.outcome().await.unwrap();

    assert!(outcome.persistence_warning.is_some());
    assert_eq!(history_len(&wf), 1);
    assert_eq!(wf.state(), WorkflowState::Completed);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_stops_callbacks_and_history() {
    let (mut wf, backend) = workflow();
    let (seen, obs) = recorder();
    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), obs)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(275)).await;
    handle.cancel();
    let at_cancel = seen.lock().unwrap().len();
    assert_eq!(at_cancel, 6);
    assert_eq!(wf.state(), WorkflowState::Idle);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(seen.lock().unwrap().len(), at_cancel);
    assert_eq!(history_len(&wf), 0);
    assert!(backend.stored().is_empty());
    assert!(matches!(
        handle.outcome().await,
        Err(GenerationError::Cancelled)
    ));
}

#[tokio::test(start_paused = true)]
async fn workflow_cancel_and_reset() {
    let (mut wf, _) = workflow();
    let (seen, obs) = recorder();
    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), obs)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    wf.reset();
    let at_cancel = seen.lock().unwrap().len();
    assert_eq!(wf.state(), WorkflowState::Idle);
    assert!(matches!(
        handle.outcome().await,
        Err(GenerationError::Cancelled)
    ));
    assert_eq!(seen.lock().unwrap().len(), at_cancel);
    assert_eq!(history_len(&wf), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_workflow_cancels_run() {
    let (mut wf, backend) = workflow();
    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), |_| {})
        .unwrap();
    drop(wf);

    assert!(matches!(
        handle.outcome().await,
        Err(GenerationError::Cancelled)
    ));
    assert!(backend.stored().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_after_completion_is_harmless() {
    let (mut wf, _) = workflow();
    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), |_| {})
        .unwrap();
    let id = handle.id();
    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.run_id, id);

    wf.cancel();
    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(history_len(&wf), 1);
}

// ---------------------------------------------------------------------------
// Failed runs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn panicking_observer_releases_the_workflow() {
    let (mut wf, backend) = workflow();
    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), |p| {
            if p == 50 {
                panic!("observer failed at {p}");
            }
        })
        .unwrap();

    assert!(matches!(
        handle.outcome().await,
        Err(GenerationError::Internal(_))
    ));
    assert_eq!(wf.state(), WorkflowState::Idle);
    assert!(wf.can_generate());
    assert!(backend.stored().is_empty());

    let again = wf
        .start(&Session::guest(), QrCodeRequest::new("again"), |_| {})
        .unwrap();
    again.outcome().await.unwrap();
    assert_eq!(history_len(&wf), 1);
}

struct RefuseCommit;

#[async_trait]
impl CommitHook for RefuseCommit {
    async fn before_commit(&self, _draft: CommitDraft<'_>) -> Result<(), GenerationError> {
        Err(GenerationError::Commit("store offline".to_string()))
    }

    async fn abandon(&self, _draft: CommitDraft<'_>) {}
}

#[tokio::test(start_paused = true)]
async fn refused_commit_records_nothing_and_releases() {
    let backend = MemoryBackend::new();
    let mut wf = workflow_with(backend.clone()).with_commit_hook(Arc::new(RefuseCommit));
    let (seen, obs) = recorder();

    let handle = wf
        .start(&Session::guest(), QrCodeRequest::new("hello"), obs)
        .unwrap();
    assert!(matches!(
        handle.outcome().await,
        Err(GenerationError::Commit(_))
    ));

    assert_eq!(history_len(&wf), 0);
    assert!(backend.stored().is_empty());
    assert_eq!(seen.lock().unwrap().last(), Some(&95));
    assert_eq!(wf.state(), WorkflowState::Idle);
    assert!(wf.can_generate());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completes_with_file_history_on_multi_thread_runtime() {
    let tmp = tempfile::TempDir::new().unwrap();
    let backend = FileBackend::new(tmp.path(), "worker");
    let history = Arc::new(Mutex::new(HistoryStore::open(Box::new(backend.clone()))));
    let mut wf = GenerationWorkflow::new(
        history,
        Arc::new(QrCodeRenderer::new()),
        WorkflowConfig {
            duration: Duration::from_millis(20),
            tick: Duration::from_millis(5),
            ..WorkflowConfig::default()
        },
    );

    let outcome = wf
        .start(&Session::guest(), QrCodeRequest::new("on disk"), |_| {})
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert!(outcome.persistence_warning.is_none());
    assert_eq!(wf.state(), WorkflowState::Completed);

    let reopened = HistoryStore::open(Box::new(backend));
    assert_eq!(reopened.list(), &[outcome.entry]);
}
