//! Persistent statistics sink.
//!
//! Every write here is best-effort: callers log failures and carry on, and a
//! failed write never changes a message's retry or dead-letter outcome.
//!
//! Tenants are an ordinary bound column (`''` when absent) in a fixed schema,
//! never part of a table name.

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sqlx::PgPool;

use crate::error::StoreError;

#[async_trait]
pub trait StatStore: Send + Sync {
    /// Add deltas to the per-minute totals for the minute containing `at`.
    async fn upsert_minute_stat(
        &self,
        at: DateTime<Utc>,
        success_delta: i64,
        fail_delta: i64,
        tenant: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Record a flushed failure-reason count.
    async fn append_fail_reason(
        &self,
        at: DateTime<Utc>,
        reason: &str,
        count: u64,
        tenant: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Bump the per-identity success or failure count. `opaque_id` is only
    /// stored when the row is created; an existing row keeps its identifier
    /// and [`StatStore::update_cached_identity`] fills an empty one.
    async fn upsert_identity_stat(
        &self,
        target_key: &str,
        opaque_id: Option<&str>,
        success: bool,
        tenant: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Remember the resolved identifier for `target_key` if none is cached yet.
    async fn update_cached_identity(
        &self,
        target_key: &str,
        opaque_id: &str,
        tenant: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// PostgreSQL stat store over the schema in `migrations/`.
#[derive(Clone)]
pub struct PgStatStore {
    pool: PgPool,
}

impl PgStatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn tenant_column(tenant: Option<&str>) -> &str {
    tenant.unwrap_or("")
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at)
}

#[async_trait]
impl StatStore for PgStatStore {
    async fn upsert_minute_stat(
        &self,
        at: DateTime<Utc>,
        success_delta: i64,
        fail_delta: i64,
        tenant: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO push_minute_stat (stat_minute, tenant_id, success_count, fail_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (stat_minute, tenant_id) DO UPDATE SET
                success_count = push_minute_stat.success_count + EXCLUDED.success_count,
                fail_count = push_minute_stat.fail_count + EXCLUDED.fail_count
            "#,
        )
        .bind(truncate_to_minute(at))
        .bind(tenant_column(tenant))
        .bind(success_delta)
        .bind(fail_delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_fail_reason(
        &self,
        at: DateTime<Utc>,
        reason: &str,
        count: u64,
        tenant: Option<&str>,
    ) -> Result<(), StoreError> {
        let count = i64::try_from(count)
            .map_err(|_| StoreError::Invalid(format!("count {} out of range", count)))?;

        sqlx::query(
            r#"
            INSERT INTO push_fail_reason (stat_time, tenant_id, reason, count)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(at)
        .bind(tenant_column(tenant))
        .bind(reason)
        .bind(count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_identity_stat(
        &self,
        target_key: &str,
        opaque_id: Option<&str>,
        success: bool,
        tenant: Option<&str>,
    ) -> Result<(), StoreError> {
        if target_key.is_empty() {
            return Err(StoreError::Invalid("target_key must not be empty".to_string()));
        }
        let (success_delta, fail_delta) = if success { (1_i64, 0_i64) } else { (0, 1) };

        sqlx::query(
            r#"
            INSERT INTO push_identity_stat (target_key, tenant_id, opaque_id, success_count, fail_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (target_key, tenant_id) DO UPDATE SET
                success_count = push_identity_stat.success_count + EXCLUDED.success_count,
                fail_count = push_identity_stat.fail_count + EXCLUDED.fail_count,
                updated_at = NOW()
            "#,
        )
        .bind(target_key)
        .bind(tenant_column(tenant))
        .bind(opaque_id.unwrap_or(""))
        .bind(success_delta)
        .bind(fail_delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_cached_identity(
        &self,
        target_key: &str,
        opaque_id: &str,
        tenant: Option<&str>,
    ) -> Result<(), StoreError> {
        if target_key.is_empty() || opaque_id.is_empty() {
            return Err(StoreError::Invalid(
                "target_key and opaque_id must not be empty".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE push_identity_stat
            SET opaque_id = $1, updated_at = NOW()
            WHERE target_key = $2 AND tenant_id = $3 AND opaque_id = ''
            "#,
        )
        .bind(opaque_id)
        .bind(target_key)
        .bind(tenant_column(tenant))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::debug!(target_key, "Cached resolved identity");
        }
        Ok(())
    }
}
