//! The C2 → C5 change-notification contract: every write that touches
//! `files`, `tasks`, `results`, `document_versions` issues `NOTIFY
//! docflow_changes, '<json>'` inside the same transaction that made the
//! write, so the notification becomes visible only once the write commits.

use serde::Serialize;
use sqlx::{Postgres, Transaction};

pub const CHANNEL: &str = "docflow_changes";

#[derive(Debug, Serialize)]
pub struct ChangeNotification<'a> {
    pub table: &'a str,
    pub operation: &'a str,
    pub record_id: String,
    pub owner_id: String,
    pub summary: serde_json::Value,
}

pub async fn notify(
    tx: &mut Transaction<'_, Postgres>,
    notification: &ChangeNotification<'_>,
) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_string(notification).unwrap_or_else(|_| "{}".to_string());
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANNEL)
        .bind(payload)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
