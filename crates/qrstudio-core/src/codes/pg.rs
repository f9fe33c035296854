//! PostgreSQL-backed repository over the `qrstudio-db` queries.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use qrstudio_db::models::{PlanTier, SavedQrCode};
use qrstudio_db::queries::{profiles, qrcodes};

use crate::session::UserAccount;

use super::CodeRepository;

#[derive(Debug, Clone)]
pub struct PgCodeRepository {
    pool: PgPool,
}

impl PgCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CodeRepository for PgCodeRepository {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn upsert_account(&self, email: &str, plan: PlanTier) -> Result<UserAccount> {
        let profile = profiles::upsert_profile(&self.pool, email, plan).await?;
        let mut account = UserAccount::new(profile.id, profile.email, profile.plan);
        account.storage_used_mb = profile.storage_used_mb;
        Ok(account)
    }

    async fn owner_plan(&self, user_id: Uuid) -> Result<Option<PlanTier>> {
        Ok(profiles::get_profile(&self.pool, user_id)
            .await?
            .map(|p| p.plan))
    }

    async fn insert(&self, code: qrcodes::NewQrCode) -> Result<SavedQrCode> {
        qrcodes::insert_qrcode(&self.pool, &code).await
    }

    async fn get_by_short_code(
        &self,
        user_id: Uuid,
        short_code: &str,
    ) -> Result<Option<SavedQrCode>> {
        qrcodes::get_by_short_code(&self.pool, user_id, short_code).await
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SavedQrCode>> {
        qrcodes::list_qrcodes_for_user(&self.pool, user_id).await
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        qrcodes::delete_qrcode(&self.pool, user_id, id).await
    }

    async fn count_dynamic(&self, user_id: Uuid) -> Result<i64> {
        qrcodes::count_dynamic_for_user(&self.pool, user_id).await
    }

    async fn update_destination(
        &self,
        user_id: Uuid,
        id: Uuid,
        destination_url: &str,
    ) -> Result<Option<SavedQrCode>> {
        qrcodes::update_destination(&self.pool, user_id, id, destination_url).await
    }

    async fn increment_scan(&self, id: Uuid) -> Result<i64> {
        qrcodes::increment_scan_count(&self.pool, id).await
    }
}
