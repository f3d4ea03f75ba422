use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use enquote_core::audit::{AuditAction, AuditEntry, AuditEvent, AuditOutcome};
use enquote_core::errors::EntityKind;
use enquote_core::store::{AuditRecorder, StoreError};

use super::codec::{encode_timestamp, enumeration, integer, optional_text, text, timestamp};
use super::{unique_violation, RepositoryError, SqlQuotationStore};

/// Seals `event` onto the tail of its entity's chain inside the caller's transaction.
pub(crate) async fn append_entry(
    conn: &mut SqliteConnection,
    event: AuditEvent,
) -> Result<AuditEntry, RepositoryError> {
    let previous: Option<(i64, String)> = sqlx::query_as(
        "SELECT sequence, entry_hash FROM audit_entry
         WHERE entity_type = ? AND entity_id = ?
         ORDER BY sequence DESC LIMIT 1",
    )
    .bind(event.entity_type.as_str())
    .bind(&event.entity_id)
    .fetch_optional(&mut *conn)
    .await?;

    let previous = previous
        .map(|(sequence, hash)| {
            u64::try_from(sequence)
                .map(|sequence| (sequence, hash))
                .map_err(|_| RepositoryError::Decode(format!("negative audit sequence {sequence}")))
        })
        .transpose()?;
    let entry = AuditEntry::seal(event, previous.as_ref().map(|(seq, hash)| (*seq, hash.as_str())));

    let before = entry.event.before.as_ref().map(Value::to_string);
    let after = entry.event.after.as_ref().map(Value::to_string);
    let metadata = serde_json::to_string(&entry.event.metadata).map_err(RepositoryError::decode)?;
    let sequence = i64::try_from(entry.sequence)
        .map_err(|_| {
            RepositoryError::Decode(format!("audit sequence {} overflows", entry.sequence))
        })?;

    sqlx::query(
        "INSERT INTO audit_entry (event_id, entity_type, entity_id, sequence, action, outcome,
                                  actor_id, before_json, after_json, metadata_json, occurred_at,
                                  prev_hash, entry_hash)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.event.event_id)
    .bind(entry.event.entity_type.as_str())
    .bind(&entry.event.entity_id)
    .bind(sequence)
    .bind(entry.event.action.as_str())
    .bind(entry.event.outcome.as_str())
    .bind(&entry.event.actor_id)
    .bind(before)
    .bind(after)
    .bind(metadata)
    .bind(encode_timestamp(entry.event.occurred_at))
    .bind(&entry.prev_hash)
    .bind(&entry.entry_hash)
    .execute(&mut *conn)
    .await
    .map_err(|error| match unique_violation(&error) {
        Some(message) => RepositoryError::conflict(
            entry.event.entity_type,
            entry.event.entity_id.clone(),
            format!("audit trail advanced concurrently ({message})"),
        ),
        None => RepositoryError::Database(error),
    })?;

    Ok(entry)
}

pub(crate) async fn load_entries(
    conn: &mut SqliteConnection,
    entity_type: EntityKind,
    entity_id: &str,
) -> Result<Vec<AuditEntry>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT event_id, entity_type, entity_id, sequence, action, outcome, actor_id,
                before_json, after_json, metadata_json, occurred_at, prev_hash, entry_hash
         FROM audit_entry
         WHERE entity_type = ? AND entity_id = ?
         ORDER BY sequence ASC",
    )
    .bind(entity_type.as_str())
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let sequence = integer(row, "sequence")?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&text(row, "metadata_json")?).map_err(RepositoryError::decode)?;

    let event = AuditEvent {
        event_id: text(row, "event_id")?,
        entity_type: enumeration(row, "entity_type", EntityKind::parse)?,
        entity_id: text(row, "entity_id")?,
        action: enumeration(row, "action", AuditAction::parse)?,
        actor_id: optional_text(row, "actor_id")?,
        outcome: enumeration(row, "outcome", AuditOutcome::parse)?,
        before: json_column(row, "before_json")?,
        after: json_column(row, "after_json")?,
        metadata,
        occurred_at: timestamp(row, "occurred_at")?,
    };

    Ok(AuditEntry {
        sequence: u64::try_from(sequence)
            .map_err(|_| RepositoryError::Decode(format!("negative audit sequence {sequence}")))?,
        prev_hash: optional_text(row, "prev_hash")?,
        entry_hash: text(row, "entry_hash")?,
        event,
    })
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>, RepositoryError> {
    optional_text(row, column)?
        .map(|raw| serde_json::from_str(&raw).map_err(RepositoryError::decode))
        .transpose()
}

#[async_trait]
impl AuditRecorder for SqlQuotationStore {
    async fn record(&self, event: AuditEvent) -> Result<AuditEntry, StoreError> {
        let mut tx = self.pool().begin().await.map_err(RepositoryError::from)?;
        let entry = append_entry(&mut tx, event).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(entry)
    }

    async fn list_entries(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut conn = self.pool().acquire().await.map_err(RepositoryError::from)?;
        Ok(load_entries(&mut conn, entity_type, entity_id).await?)
    }
}
