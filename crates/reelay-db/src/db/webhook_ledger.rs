use anyhow::{Context, Result};
use async_trait::async_trait;
use reelay_core::models::{WebhookEvent, WebhookOutcome};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// A ledger row together with whether this call inserted it.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub event: WebhookEvent,
    pub first_delivery: bool,
}

impl LedgerEntry {
    /// A delivery is skipped only when an earlier copy was already settled.
    pub fn should_skip(&self) -> bool {
        !self.first_delivery && self.event.is_settled()
    }
}

/// Deduplication ledger for provider callbacks, keyed on `(external_asset_id, payload_hash)`.
#[async_trait]
pub trait WebhookLedger: Send + Sync {
    async fn record_delivery(
        &self,
        event_type: &str,
        external_asset_id: &str,
        payload_hash: &str,
    ) -> Result<LedgerEntry>;

    async fn mark_outcome(&self, id: Uuid, outcome: WebhookOutcome) -> Result<()>;

    /// Delete ledger rows received more than `retention_days` ago.
    async fn purge_older_than(&self, retention_days: i64) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgWebhookLedger {
    pool: PgPool,
}

impl PgWebhookLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookLedger for PgWebhookLedger {
    #[tracing::instrument(skip(self, payload_hash), fields(db.table = "webhook_events", db.operation = "insert"))]
    async fn record_delivery(
        &self,
        event_type: &str,
        external_asset_id: &str,
        payload_hash: &str,
    ) -> Result<LedgerEntry> {
        let inserted = sqlx::query_as::<Postgres, WebhookEvent>(
            r#"
            INSERT INTO webhook_events (id, event_type, external_asset_id, payload_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT webhook_events_delivery_key DO NOTHING
            RETURNING id, event_type, external_asset_id, payload_hash, outcome, received_at, applied_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_type)
        .bind(external_asset_id)
        .bind(payload_hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to record webhook delivery")?;

        if let Some(event) = inserted {
            return Ok(LedgerEntry {
                event,
                first_delivery: true,
            });
        }

        let existing = sqlx::query_as::<Postgres, WebhookEvent>(
            r#"
            SELECT id, event_type, external_asset_id, payload_hash, outcome, received_at, applied_at
            FROM webhook_events
            WHERE external_asset_id = $1 AND payload_hash = $2
            "#,
        )
        .bind(external_asset_id)
        .bind(payload_hash)
        .fetch_one(&self.pool)
        .await
        .context("Failed to load existing webhook delivery")?;

        tracing::debug!(
            event_id = %existing.id,
            external_asset_id = %external_asset_id,
            outcome = ?existing.outcome,
            "Repeated webhook delivery"
        );

        Ok(LedgerEntry {
            event: existing,
            first_delivery: false,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "webhook_events", db.operation = "update"))]
    async fn mark_outcome(&self, id: Uuid, outcome: WebhookOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET outcome = $2, applied_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(outcome.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to record webhook outcome")?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "webhook_events", db.operation = "delete"))]
    async fn purge_older_than(&self, retention_days: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            WITH deleted AS (
                DELETE FROM webhook_events
                WHERE received_at < NOW() - ($1 * interval '1 day')
                RETURNING 1
            )
            SELECT COUNT(*) FROM deleted
            "#,
        )
        .bind(retention_days as f64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to purge webhook ledger")?;

        Ok(count as u64)
    }
}
