//! Persisted sign-in state: `<data_dir>/session.toml`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use qrstudio_core::session::{SessionEvent, UserAccount};

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    signed_in_at: DateTime<Utc>,
    account: StoredAccount,
}

/// Usage counters are not stored; they are recounted on every run.
#[derive(Debug, Serialize, Deserialize)]
struct StoredAccount {
    id: uuid::Uuid,
    email: String,
    plan: qrstudio_core::PlanTier,
}

/// Read the signed-in account. A missing file means signed out; an
/// unreadable one is logged and treated the same way.
pub fn load(path: &Path) -> Option<UserAccount> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read session file");
            return None;
        }
    };
    match toml::from_str::<SessionFile>(&contents) {
        Ok(file) => Some(UserAccount::new(
            file.account.id,
            file.account.email,
            file.account.plan,
        )),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt session file");
            None
        }
    }
}

pub fn save(path: &Path, account: &UserAccount) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    }
    let file = SessionFile {
        signed_in_at: Utc::now(),
        account: StoredAccount {
            id: account.id,
            email: account.email.clone(),
            plan: account.plan,
        },
    };
    let contents = toml::to_string_pretty(&file).context("failed to serialize session")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write session file at {}", path.display()))
}

/// Remove the session file. Returns whether one existed.
pub fn remove(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            Err(e).with_context(|| format!("failed to remove session file at {}", path.display()))
        }
    }
}

/// Mirror queued provider events into the session file. Returns how many
/// events were applied.
pub fn apply_events(
    path: &Path,
    events: &mut broadcast::Receiver<SessionEvent>,
) -> Result<usize> {
    let mut applied = 0;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::SignedIn(account)) => save(path, &account)?,
            Ok(SessionEvent::SignedOut { previous }) => {
                remove(path)?;
                tracing::debug!(account_id = %previous, "session file cleared");
            }
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed session events");
                continue;
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(applied),
        }
        applied += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrstudio_core::PlanTier;
    use qrstudio_core::session::{LocalSessionProvider, SessionProvider};
    use uuid::Uuid;

    #[test]
    fn save_load_remove() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("session.toml");
        let mut account = UserAccount::new(Uuid::new_v4(), "me@example.com", PlanTier::Paid);
        account.dynamic_code_count = 7;

        save(&path, &account).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.id, account.id);
        assert_eq!(loaded.email, "me@example.com");
        assert_eq!(loaded.plan, PlanTier::Paid);
        assert_eq!(loaded.dynamic_code_count, 0);

        assert!(remove(&path).unwrap());
        assert!(!remove(&path).unwrap());
        assert!(load(&path).is_none());
    }

    #[test]
    fn corrupt_file_means_signed_out() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("session.toml");
        std::fs::write(&path, "account = 3").unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn provider_events_drive_the_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("session.toml");
        let provider = LocalSessionProvider::new();
        let mut events = provider.subscribe();

        let account = UserAccount::local("me@example.com", PlanTier::Free);
        provider.sign_in(account.clone()).unwrap();
        assert_eq!(apply_events(&path, &mut events).unwrap(), 1);
        assert_eq!(load(&path).unwrap().id, account.id);

        assert_eq!(apply_events(&path, &mut events).unwrap(), 0);

        provider.sign_out();
        assert_eq!(apply_events(&path, &mut events).unwrap(), 1);
        assert!(!path.exists());

        // Signing out again publishes nothing.
        provider.sign_out();
        assert_eq!(apply_events(&path, &mut events).unwrap(), 0);
    }
}
