//! Database query functions for the `qrcodes` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ContentCategory, EcLevel, QrType, SavedQrCode};

/// Parameters for inserting a new saved code.
#[derive(Debug, Clone)]
pub struct NewQrCode {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub destination_url: String,
    pub short_code: Option<String>,
    pub short_url: Option<String>,
    pub qr_type: QrType,
    pub content_category: ContentCategory,
    pub fg_color: String,
    pub bg_color: String,
    pub ec_level: EcLevel,
}

/// Insert a saved code and return the stored row.
pub async fn insert_qrcode(pool: &PgPool, new: &NewQrCode) -> Result<SavedQrCode> {
    let code = sqlx::query_as::<_, SavedQrCode>(
        "INSERT INTO qrcodes \
         (user_id, name, destination_url, short_code, short_url, qr_type, content_category, \
          fg_color, bg_color, ec_level) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(new.user_id)
    .bind(&new.name)
    .bind(&new.destination_url)
    .bind(&new.short_code)
    .bind(&new.short_url)
    .bind(new.qr_type)
    .bind(new.content_category)
    .bind(&new.fg_color)
    .bind(&new.bg_color)
    .bind(new.ec_level)
    .fetch_one(pool)
    .await
    .context("failed to insert qrcode")?;

    Ok(code)
}

/// Fetch a saved code by ID.
pub async fn get_qrcode(pool: &PgPool, id: Uuid) -> Result<Option<SavedQrCode>> {
    let code = sqlx::query_as::<_, SavedQrCode>("SELECT * FROM qrcodes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch qrcode")?;

    Ok(code)
}

/// Look up a dynamic code by its owner and short code.
pub async fn get_by_short_code(
    pool: &PgPool,
    user_id: Uuid,
    short_code: &str,
) -> Result<Option<SavedQrCode>> {
    let code = sqlx::query_as::<_, SavedQrCode>(
        "SELECT * FROM qrcodes WHERE user_id = $1 AND short_code = $2",
    )
    .bind(user_id)
    .bind(short_code)
    .fetch_optional(pool)
    .await
    .context("failed to fetch qrcode by short code")?;

    Ok(code)
}

/// List all codes saved by a user, newest first.
pub async fn list_qrcodes_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<SavedQrCode>> {
    let codes = sqlx::query_as::<_, SavedQrCode>(
        "SELECT * FROM qrcodes WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list qrcodes")?;

    Ok(codes)
}

/// Delete a code owned by `user_id`. Returns `true` when a row was removed.
pub async fn delete_qrcode(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM qrcodes WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to delete qrcode")?;

    Ok(result.rows_affected() > 0)
}

/// Count the dynamic codes a user currently owns.
pub async fn count_dynamic_for_user(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM qrcodes WHERE user_id = $1 AND qr_type = 'dynamic'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("failed to count dynamic qrcodes")?;

    Ok(count)
}

/// Point a dynamic code at a new destination.
///
/// Returns `None` when no dynamic code with that ID belongs to `user_id`.
pub async fn update_destination(
    pool: &PgPool,
    user_id: Uuid,
    id: Uuid,
    destination_url: &str,
) -> Result<Option<SavedQrCode>> {
    let code = sqlx::query_as::<_, SavedQrCode>(
        "UPDATE qrcodes SET destination_url = $1 \
         WHERE id = $2 AND user_id = $3 AND qr_type = 'dynamic' \
         RETURNING *",
    )
    .bind(destination_url)
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("failed to update qrcode destination")?;

    Ok(code)
}

/// Atomically bump the scan counter and return the new value.
pub async fn increment_scan_count(pool: &PgPool, id: Uuid) -> Result<i64> {
    let count: Option<i64> = sqlx::query_scalar(
        "UPDATE qrcodes SET scan_count = scan_count + 1 WHERE id = $1 RETURNING scan_count",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to increment scan count")?;

    count.with_context(|| format!("qrcode {id} not found"))
}
