//! Saved codes: dynamic codes persisted in the row store, their redirect
//! targets and scan counters.

pub mod memory;
pub mod pg;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use qrstudio_db::models::{PlanTier, QrType, SavedQrCode};
use qrstudio_db::queries::qrcodes::NewQrCode;

use crate::authz;
use crate::plan::{PlanLimits, limits_for};
use crate::session::{Session, UserAccount};
use crate::workflow::{CommitDraft, CommitHook, GenerationError, ShortLink};

pub use memory::MemoryCodeRepository;
pub use pg::PgCodeRepository;

/// Storage for accounts and their saved codes.
#[async_trait]
pub trait CodeRepository: Send + Sync {
    fn name(&self) -> &str;

    /// Create or refresh the account for `email`, returning it with no
    /// usage filled in.
    async fn upsert_account(&self, email: &str, plan: PlanTier) -> Result<UserAccount>;

    async fn owner_plan(&self, user_id: Uuid) -> Result<Option<PlanTier>>;

    async fn insert(&self, code: NewQrCode) -> Result<SavedQrCode>;

    async fn get_by_short_code(
        &self,
        user_id: Uuid,
        short_code: &str,
    ) -> Result<Option<SavedQrCode>>;

    /// Newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SavedQrCode>>;

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool>;

    async fn count_dynamic(&self, user_id: Uuid) -> Result<i64>;

    /// Retarget a dynamic code. Static codes are never changed.
    async fn update_destination(
        &self,
        user_id: Uuid,
        id: Uuid,
        destination_url: &str,
    ) -> Result<Option<SavedQrCode>>;

    /// Returns the new scan count.
    async fn increment_scan(&self, id: Uuid) -> Result<i64>;
}

/// Result of resolving a scanned short link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRedirect {
    pub destination_url: String,
    /// `None` when the owner's plan does not track scans.
    pub scan_count: Option<i64>,
}

/// `account` with `dynamic_code_count` taken from the repository.
pub async fn account_with_usage(
    repo: &dyn CodeRepository,
    account: &UserAccount,
) -> Result<UserAccount> {
    let mut account = account.clone();
    if account.is_guest() {
        account.dynamic_code_count = 0;
        return Ok(account);
    }
    let count = repo
        .count_dynamic(account.id)
        .await
        .with_context(|| format!("failed to count dynamic codes for {}", account.id))?;
    account.dynamic_code_count = u32::try_from(count).unwrap_or(u32::MAX);
    Ok(account)
}

/// Saves the dynamic code of a run before the run records it in history,
/// so a code that cannot be saved never appears there.
///
/// The quota is checked again against a fresh count, since other sessions
/// may have saved codes since the run was authorized.
pub struct DynamicCodeSaver {
    repo: Arc<dyn CodeRepository>,
    account: UserAccount,
    limits: PlanLimits,
    name: Option<String>,
    saved: Mutex<Option<SavedQrCode>>,
}

impl DynamicCodeSaver {
    pub fn new(repo: Arc<dyn CodeRepository>, session: &Session, name: Option<String>) -> Self {
        Self {
            repo,
            account: session.account().clone(),
            limits: *session.limits(),
            name,
            saved: Mutex::new(None),
        }
    }

    /// The row saved by the most recent committed run.
    pub fn saved(&self) -> Option<SavedQrCode> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn save(&self, link: &ShortLink, draft: CommitDraft<'_>) -> Result<SavedQrCode> {
        let appearance = draft.surface.appearance();
        let code = self
            .repo
            .insert(NewQrCode {
                user_id: self.account.id,
                name: self.name.clone(),
                destination_url: link.destination.clone(),
                short_code: Some(link.code.clone()),
                short_url: Some(link.url.clone()),
                qr_type: QrType::Dynamic,
                content_category: draft.request.content_category,
                fg_color: appearance.foreground.to_string(),
                bg_color: appearance.background.to_string(),
                ec_level: appearance.error_correction,
            })
            .await
            .context("failed to save dynamic code")?;
        Ok(code)
    }
}

#[async_trait]
impl CommitHook for DynamicCodeSaver {
    async fn before_commit(&self, draft: CommitDraft<'_>) -> Result<(), GenerationError> {
        let Some(link) = draft.short_link else {
            return Ok(());
        };

        let account = account_with_usage(self.repo.as_ref(), &self.account)
            .await
            .map_err(|e| GenerationError::Commit(format!("{e:#}")))?;
        if let Err(denied) = authz::require_dynamic(&account, &self.limits) {
            tracing::info!(
                run_id = %draft.run_id,
                user_id = %account.id,
                count = account.dynamic_code_count,
                "dynamic code refused at save"
            );
            return Err(denied.into());
        }

        let code = self
            .save(link, draft)
            .await
            .map_err(|e| GenerationError::Commit(format!("{e:#}")))?;
        tracing::info!(
            run_id = %draft.run_id,
            code_id = %code.id,
            user_id = %account.id,
            short_code = %link.code,
            "saved dynamic code"
        );
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
        Ok(())
    }

    async fn abandon(&self, draft: CommitDraft<'_>) {
        let saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(code) = saved else {
            return;
        };
        match self.repo.delete(code.user_id, code.id).await {
            Ok(_) => tracing::info!(run_id = %draft.run_id, code_id = %code.id, "removed code of cancelled run"),
            Err(e) => tracing::warn!(
                run_id = %draft.run_id,
                code_id = %code.id,
                error = %e,
                "failed to remove code of cancelled run"
            ),
        }
    }
}

/// The account's saved codes, newest first. Guests have none.
pub async fn list_codes(repo: &dyn CodeRepository, account: &UserAccount) -> Result<Vec<SavedQrCode>> {
    if account.is_guest() {
        return Ok(Vec::new());
    }
    repo.list_for_user(account.id).await
}

pub async fn delete_code(repo: &dyn CodeRepository, account: &UserAccount, id: Uuid) -> Result<bool> {
    if account.is_guest() {
        return Ok(false);
    }
    let deleted = repo.delete(account.id, id).await?;
    if deleted {
        tracing::info!(code_id = %id, user_id = %account.id, "deleted saved code");
    }
    Ok(deleted)
}

/// Point a dynamic code at a new destination. Returns `None` when the code
/// does not exist, belongs to someone else, or is static.
pub async fn update_destination(
    repo: &dyn CodeRepository,
    account: &UserAccount,
    id: Uuid,
    destination_url: &str,
) -> Result<Option<SavedQrCode>> {
    let destination_url = destination_url.trim();
    if destination_url.is_empty() {
        bail!("destination URL must not be empty");
    }
    if account.is_guest() {
        return Ok(None);
    }
    let updated = repo.update_destination(account.id, id, destination_url).await?;
    if updated.is_some() {
        tracing::info!(code_id = %id, destination = %destination_url, "retargeted dynamic code");
    }
    Ok(updated)
}

/// Resolve a scanned short link, counting the scan when the owner's plan
/// tracks analytics.
pub async fn record_scan(
    repo: &dyn CodeRepository,
    user_id: Uuid,
    short_code: &str,
) -> Result<Option<ScanRedirect>> {
    let Some(code) = repo.get_by_short_code(user_id, short_code).await? else {
        return Ok(None);
    };

    let plan = repo.owner_plan(user_id).await?.unwrap_or_default();
    let scan_count = if limits_for(plan).can_track_analytics {
        Some(repo.increment_scan(code.id).await?)
    } else {
        None
    };

    tracing::debug!(
        code_id = %code.id,
        plan = %plan,
        tracked = scan_count.is_some(),
        "resolved short link"
    );
    Ok(Some(ScanRedirect {
        destination_url: code.destination_url,
        scan_count,
    }))
}
