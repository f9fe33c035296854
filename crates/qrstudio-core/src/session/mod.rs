//! Sessions: the explicit identity handed to authorization and generation.
//!
//! A [`Session`] is created from whatever the [`SessionProvider`] reports
//! and replaced wholesale on sign-in / sign-out. Nothing reads the current
//! account from ambient state.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use qrstudio_db::models::PlanTier;

use crate::plan::{self, PlanLimits};

/// Key under which the guest account's history is stored.
pub const GUEST_KEY: &str = "guest";

/// Namespace for account ids derived from an email address.
const LOCAL_ACCOUNT_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f3c2e_9b47_4d5a_8e21_0c7f5b93d4e6);

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot sign in with the guest plan")]
    GuestSignIn,

    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),
}

/// An identity as reported by the session provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub plan: PlanTier,
    pub dynamic_code_count: u32,
    pub storage_used_mb: f64,
}

impl UserAccount {
    /// The unauthenticated account every session falls back to.
    pub fn guest() -> Self {
        Self {
            id: Uuid::nil(),
            email: String::from("guest"),
            plan: PlanTier::Guest,
            dynamic_code_count: 0,
            storage_used_mb: 0.0,
        }
    }

    /// A signed-in account with no recorded usage.
    pub fn new(id: Uuid, email: impl Into<String>, plan: PlanTier) -> Self {
        Self {
            id,
            email: email.into(),
            plan,
            dynamic_code_count: 0,
            storage_used_mb: 0.0,
        }
    }

    /// An account with no row store behind it. The id is derived from the
    /// email, so signing in again with the same address finds the same
    /// per-account state.
    pub fn local(email: &str, plan: PlanTier) -> Self {
        let email = email.trim();
        let id = Uuid::new_v5(
            &LOCAL_ACCOUNT_NAMESPACE,
            email.to_ascii_lowercase().as_bytes(),
        );
        Self::new(id, email, plan)
    }

    pub fn is_guest(&self) -> bool {
        self.plan == PlanTier::Guest || self.id.is_nil()
    }

    /// Storage key for per-account state such as history.
    pub fn storage_key(&self) -> String {
        if self.is_guest() {
            GUEST_KEY.to_string()
        } else {
            self.id.simple().to_string()
        }
    }
}

/// An account paired with the limits of its plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    account: UserAccount,
    limits: PlanLimits,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(account: UserAccount) -> Self {
        let limits = plan::limits_for(account.plan);
        Self {
            account,
            limits,
            started_at: Utc::now(),
        }
    }

    pub fn guest() -> Self {
        Self::new(UserAccount::guest())
    }

    pub fn account(&self) -> &UserAccount {
        &self.account
    }

    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    pub fn plan(&self) -> PlanTier {
        self.account.plan
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The same session with a freshly counted dynamic-code usage.
    pub fn with_dynamic_code_count(mut self, count: u32) -> Self {
        self.account.dynamic_code_count = count;
        self
    }
}

/// Sign-in state changes published by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(UserAccount),
    SignedOut { previous: Uuid },
}

/// Source of the current identity.
pub trait SessionProvider: Send + Sync {
    /// The signed-in account, or `None` when signed out.
    fn current_account(&self) -> Option<UserAccount>;

    /// Subscribe to sign-in / sign-out notifications.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// A session for the current account, falling back to the guest.
    fn session(&self) -> Session {
        Session::new(self.current_account().unwrap_or_else(UserAccount::guest))
    }
}

/// In-process provider. The CLI seeds it from the session file.
pub struct LocalSessionProvider {
    account: Mutex<Option<UserAccount>>,
    events: broadcast::Sender<SessionEvent>,
}

impl LocalSessionProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            account: Mutex::new(None),
            events,
        }
    }

    /// A provider that starts out signed in as `account`.
    pub fn with_account(account: UserAccount) -> Self {
        let provider = Self::new();
        if !account.is_guest() {
            *provider.lock() = Some(account);
        }
        provider
    }

    /// Replace the current identity and notify subscribers.
    pub fn sign_in(&self, account: UserAccount) -> Result<Session, SessionError> {
        if account.plan == PlanTier::Guest || account.id.is_nil() {
            return Err(SessionError::GuestSignIn);
        }
        let email = account.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(SessionError::InvalidEmail(account.email.clone()));
        }

        *self.lock() = Some(account.clone());
        tracing::info!(account_id = %account.id, plan = %account.plan, "signed in");
        // No subscribers is fine.
        let _ = self.events.send(SessionEvent::SignedIn(account.clone()));
        Ok(Session::new(account))
    }

    /// Drop the current identity; the session reverts to the guest.
    pub fn sign_out(&self) -> Session {
        let previous = self.lock().take();
        if let Some(prev) = previous {
            tracing::info!(account_id = %prev.id, "signed out");
            let _ = self
                .events
                .send(SessionEvent::SignedOut { previous: prev.id });
        }
        Session::guest()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<UserAccount>> {
        self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalSessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider for LocalSessionProvider {
    fn current_account(&self) -> Option<UserAccount> {
        self.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Limit;

    fn free_account() -> UserAccount {
        UserAccount::new(Uuid::new_v4(), "free@example.com", PlanTier::Free)
    }

    #[test]
    fn new_provider_yields_guest_session() {
        let provider = LocalSessionProvider::new();
        assert!(provider.current_account().is_none());
        let session = provider.session();
        assert_eq!(session.plan(), PlanTier::Guest);
        assert_eq!(session.limits().max_dynamic_codes, Limit::Finite(0));
        assert_eq!(session.account().storage_key(), GUEST_KEY);
    }

    #[test]
    fn sign_in_derives_limits_from_plan() {
        let provider = LocalSessionProvider::new();
        let session = provider.sign_in(free_account()).unwrap();
        assert_eq!(session.plan(), PlanTier::Free);
        assert_eq!(session.limits().max_dynamic_codes, Limit::Finite(2));
        assert_eq!(provider.session().plan(), PlanTier::Free);
    }

    #[test]
    fn sign_in_rejects_guest_and_bad_email() {
        let provider = LocalSessionProvider::new();
        assert!(matches!(
            provider.sign_in(UserAccount::guest()),
            Err(SessionError::GuestSignIn)
        ));

        let mut account = free_account();
        account.email = "not-an-email".to_string();
        assert!(matches!(
            provider.sign_in(account),
            Err(SessionError::InvalidEmail(_))
        ));
        assert!(provider.current_account().is_none());
    }

    #[test]
    fn sign_out_resets_to_guest() {
        let provider = LocalSessionProvider::with_account(free_account());
        assert!(provider.current_account().is_some());
        let session = provider.sign_out();
        assert_eq!(session.plan(), PlanTier::Guest);
        assert!(provider.current_account().is_none());
    }

    #[tokio::test]
    async fn subscribers_see_sign_in_then_sign_out() {
        let provider = LocalSessionProvider::new();
        let mut rx = provider.subscribe();
        let account = free_account();

        provider.sign_in(account.clone()).unwrap();
        provider.sign_out();

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::SignedIn(account.clone())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::SignedOut {
                previous: account.id
            }
        );
    }

    #[test]
    fn sign_out_when_signed_out_is_silent() {
        let provider = LocalSessionProvider::new();
        let mut rx = provider.subscribe();
        provider.sign_out();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn local_accounts_keep_their_id_per_email() {
        let first = UserAccount::local("Someone@Example.com", PlanTier::Free);
        let again = UserAccount::local(" someone@example.com ", PlanTier::Paid);
        let other = UserAccount::local("other@example.com", PlanTier::Free);

        assert_eq!(first.id, again.id);
        assert_eq!(first.storage_key(), again.storage_key());
        assert_ne!(first.id, other.id);
        assert!(!first.is_guest());
        assert_eq!(again.email, "someone@example.com");
    }

    #[test]
    fn with_dynamic_code_count_keeps_limits() {
        let session = Session::new(free_account()).with_dynamic_code_count(2);
        assert_eq!(session.account().dynamic_code_count, 2);
        assert_eq!(session.limits().max_dynamic_codes, Limit::Finite(2));
    }
}
