//! In-process repository, used by tests and by the CLI when no database is
//! configured.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use qrstudio_db::models::{PlanTier, QrType, SavedQrCode};
use qrstudio_db::queries::qrcodes::NewQrCode;

use crate::session::UserAccount;

use super::CodeRepository;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, UserAccount>,
    codes: Vec<SavedQrCode>,
}

#[derive(Debug, Default)]
pub struct MemoryCodeRepository {
    tables: Mutex<Tables>,
}

impl MemoryCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CodeRepository for MemoryCodeRepository {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_account(&self, email: &str, plan: PlanTier) -> Result<UserAccount> {
        let mut tables = self.tables();
        let account = tables
            .accounts
            .entry(email.to_string())
            .or_insert_with(|| UserAccount::new(Uuid::new_v4(), email, plan));
        account.plan = plan;
        Ok(account.clone())
    }

    async fn owner_plan(&self, user_id: Uuid) -> Result<Option<PlanTier>> {
        Ok(self
            .tables()
            .accounts
            .values()
            .find(|a| a.id == user_id)
            .map(|a| a.plan))
    }

    async fn insert(&self, code: NewQrCode) -> Result<SavedQrCode> {
        let mut tables = self.tables();
        if let Some(short_code) = &code.short_code {
            let taken = tables.codes.iter().any(|c| {
                c.user_id == code.user_id && c.short_code.as_ref() == Some(short_code)
            });
            if taken {
                bail!("short code {short_code} already exists for {}", code.user_id);
            }
        }
        let row = SavedQrCode {
            id: Uuid::new_v4(),
            user_id: code.user_id,
            name: code.name,
            destination_url: code.destination_url,
            short_code: code.short_code,
            short_url: code.short_url,
            qr_type: code.qr_type,
            content_category: code.content_category,
            scan_count: 0,
            fg_color: code.fg_color,
            bg_color: code.bg_color,
            ec_level: code.ec_level,
            created_at: Utc::now(),
        };
        tables.codes.push(row.clone());
        Ok(row)
    }

    async fn get_by_short_code(
        &self,
        user_id: Uuid,
        short_code: &str,
    ) -> Result<Option<SavedQrCode>> {
        Ok(self
            .tables()
            .codes
            .iter()
            .find(|c| c.user_id == user_id && c.short_code.as_deref() == Some(short_code))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SavedQrCode>> {
        // Insertion order stands in for created_at, which may tie.
        Ok(self
            .tables()
            .codes
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let mut tables = self.tables();
        let before = tables.codes.len();
        tables.codes.retain(|c| !(c.id == id && c.user_id == user_id));
        Ok(tables.codes.len() != before)
    }

    async fn count_dynamic(&self, user_id: Uuid) -> Result<i64> {
        let count = self
            .tables()
            .codes
            .iter()
            .filter(|c| c.user_id == user_id && c.qr_type == QrType::Dynamic)
            .count();
        Ok(count as i64)
    }

    async fn update_destination(
        &self,
        user_id: Uuid,
        id: Uuid,
        destination_url: &str,
    ) -> Result<Option<SavedQrCode>> {
        let mut tables = self.tables();
        let Some(code) = tables
            .codes
            .iter_mut()
            .find(|c| c.id == id && c.user_id == user_id && c.qr_type == QrType::Dynamic)
        else {
            return Ok(None);
        };
        code.destination_url = destination_url.to_string();
        Ok(Some(code.clone()))
    }

    async fn increment_scan(&self, id: Uuid) -> Result<i64> {
        let mut tables = self.tables();
        let Some(code) = tables.codes.iter_mut().find(|c| c.id == id) else {
            bail!("saved code {id} not found");
        };
        code.scan_count += 1;
        Ok(code.scan_count)
    }
}
