use crate::effects::AuditEntry;
use crate::store::Store;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::params;
use tracing::info;

/// Compliance trail of state transitions. Writes happen after the financial
/// transaction committed and their failure is only logged.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditLog;

#[async_trait]
impl AuditLog for LogAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        info!(
            "AUDIT {} {} {} by {:?}: {}",
            entry.action, entry.entity, entry.entity_id, entry.actor, entry.details
        );
        Ok(())
    }
}

/// Appends to the `audit_log` table on its own connection, outside any
/// ledger transaction.
#[derive(Debug, Clone)]
pub struct SqliteAuditLog {
    store: Store,
}

impl SqliteAuditLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn entries_for(&self, entity_id: String) -> Result<Vec<(String, String)>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            let mut stmt = conn.prepare(
                "SELECT action, details FROM audit_log WHERE entity_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map([entity_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok::<_, anyhow::Error>(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
        .context("audit reader panicked")?
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let store = self.store.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            conn.execute(
                "INSERT INTO audit_log (action, entity, entity_id, actor, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.action,
                    entry.entity,
                    entry.entity_id,
                    entry.actor.map(|id| id.to_string()),
                    entry.details.to_string(),
                    entry.at.timestamp_millis(),
                ],
            )
            .context("insert audit entry")?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("audit writer panicked")?
    }
}
