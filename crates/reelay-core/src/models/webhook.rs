use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// What the event processor did with a ledgered delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    Applied,
    Ignored,
    Orphaned,
}

impl Display for WebhookOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WebhookOutcome::Applied => write!(f, "applied"),
            WebhookOutcome::Ignored => write!(f, "ignored"),
            WebhookOutcome::Orphaned => write!(f, "orphaned"),
        }
    }
}

impl FromStr for WebhookOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(WebhookOutcome::Applied),
            "ignored" => Ok(WebhookOutcome::Ignored),
            "orphaned" => Ok(WebhookOutcome::Orphaned),
            _ => Err(anyhow::anyhow!("Invalid webhook outcome: {}", s)),
        }
    }
}

/// Ledger row for one inbound provider callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: String,
    pub external_asset_id: String,
    pub payload_hash: String,
    pub outcome: Option<WebhookOutcome>,
    pub received_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for WebhookEvent {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let outcome = match row.try_get::<Option<String>, _>("outcome")? {
            Some(raw) => Some(raw.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse outcome: {}", e).into())
            })?),
            None => None,
        };
        Ok(WebhookEvent {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            external_asset_id: row.try_get("external_asset_id")?,
            payload_hash: row.try_get("payload_hash")?,
            outcome,
            received_at: row.try_get("received_at")?,
            applied_at: row.try_get("applied_at")?,
        })
    }
}

impl WebhookEvent {
    /// Applied and ignored deliveries are final; an orphaned one may be redelivered.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.outcome,
            Some(WebhookOutcome::Applied) | Some(WebhookOutcome::Ignored)
        )
    }
}
