//! Database query functions for the `profiles` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PlanTier, Profile};

/// Insert a profile for `email`, or update the plan of the existing one.
///
/// Returns the stored profile.
pub async fn upsert_profile(pool: &PgPool, email: &str, plan: PlanTier) -> Result<Profile> {
    let profile = sqlx::query_as::<_, Profile>(
        "INSERT INTO profiles (email, plan) \
         VALUES ($1, $2) \
         ON CONFLICT (email) DO UPDATE SET plan = EXCLUDED.plan, updated_at = now() \
         RETURNING *",
    )
    .bind(email)
    .bind(plan)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert profile for {email}"))?;

    Ok(profile)
}

/// Fetch a profile by its ID.
pub async fn get_profile(pool: &PgPool, id: Uuid) -> Result<Option<Profile>> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch profile")?;

    Ok(profile)
}

/// Fetch a profile by email address.
pub async fn get_profile_by_email(pool: &PgPool, email: &str) -> Result<Option<Profile>> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("failed to fetch profile by email")?;

    Ok(profile)
}

/// Change the plan tier of a profile.
pub async fn update_plan(pool: &PgPool, id: Uuid, plan: PlanTier) -> Result<Profile> {
    let profile = sqlx::query_as::<_, Profile>(
        "UPDATE profiles SET plan = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(plan)
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to update profile plan")?;

    profile.with_context(|| format!("profile {id} not found"))
}
