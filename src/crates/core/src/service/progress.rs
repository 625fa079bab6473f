//! Token refresh progress
//!
//! Singleton durable record (row id=1) consulted by the admin surface.
//! Partial updates preserve absent fields (COALESCE) and every write
//! bumps `updated_at`.

use crate::infrastructure::storage::SqliteStore;
use crate::util::errors::GatewayResult;
use serde::Serialize;

/// The current refresh snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshProgress {
    pub running: bool,
    pub current: i64,
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub updated_at: i64,
}

/// A partial write; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub running: Option<bool>,
    pub current: Option<i64>,
    pub total: Option<i64>,
    pub success: Option<i64>,
    pub failed: Option<i64>,
}

impl ProgressUpdate {
    /// Reset to a fresh running state at the start of a refresh.
    pub fn started(total: i64) -> Self {
        Self {
            running: Some(true),
            current: Some(0),
            total: Some(total),
            success: Some(0),
            failed: Some(0),
        }
    }

    pub fn finished() -> Self {
        Self {
            running: Some(false),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct RefreshProgressStore {
    store: SqliteStore,
}

impl RefreshProgressStore {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub async fn get(&self) -> GatewayResult<RefreshProgress> {
        self.store
            .call(|conn| {
                let row = conn
                    .query_row(
                        "SELECT running, current, total, success, failed, updated_at \
                         FROM token_refresh_progress WHERE id = 1",
                        [],
                        |row| {
                            Ok(RefreshProgress {
                                running: row.get::<_, i64>(0)? != 0,
                                current: row.get(1)?,
                                total: row.get(2)?,
                                success: row.get(3)?,
                                failed: row.get(4)?,
                                updated_at: row.get(5)?,
                            })
                        },
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                Ok(row.unwrap_or_default())
            })
            .await
    }

    /// COALESCE-preserving partial update; always bumps `updated_at`.
    pub async fn update(&self, update: ProgressUpdate) -> GatewayResult<()> {
        let updated_at = chrono::Utc::now().timestamp();
        let running = update.running.map(i64::from);
        self.store
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO token_refresh_progress \
                     (id, running, current, total, success, failed, updated_at) \
                     VALUES (1, COALESCE(?1, 0), COALESCE(?2, 0), COALESCE(?3, 0), \
                             COALESCE(?4, 0), COALESCE(?5, 0), ?6) \
                     ON CONFLICT(id) DO UPDATE SET \
                     running = COALESCE(?1, running), \
                     current = COALESCE(?2, current), \
                     total = COALESCE(?3, total), \
                     success = COALESCE(?4, success), \
                     failed = COALESCE(?5, failed), \
                     updated_at = ?6",
                    rusqlite::params![
                        running,
                        update.current,
                        update.total,
                        update.success,
                        update.failed,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RefreshProgressStore {
        RefreshProgressStore::new(SqliteStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_missing_row_reads_defaults() {
        let progress = store().get().await.unwrap();
        assert!(!progress.running);
        assert_eq!(progress.total, 0);
        assert_eq!(progress.updated_at, 0);
    }

    #[tokio::test]
    async fn test_partial_update_preserves_fields() {
        let store = store();
        store.update(ProgressUpdate::started(10)).await.unwrap();
        store
            .update(ProgressUpdate {
                current: Some(4),
                success: Some(3),
                failed: Some(1),
                ..ProgressUpdate::default()
            })
            .await
            .unwrap();

        let progress = store.get().await.unwrap();
        // `running` and `total` were absent from the second write
        assert!(progress.running);
        assert_eq!(progress.total, 10);
        assert_eq!(progress.current, 4);
        assert_eq!(progress.success, 3);
        assert_eq!(progress.failed, 1);
        assert!(progress.updated_at > 0);
    }

    #[tokio::test]
    async fn test_every_write_bumps_updated_at() {
        let store = store();
        store.update(ProgressUpdate::started(1)).await.unwrap();
        let first = store.get().await.unwrap().updated_at;
        // Same-second writes still rewrite the stamp; assert monotonic
        store.update(ProgressUpdate::finished()).await.unwrap();
        let second = store.get().await.unwrap().updated_at;
        assert!(second >= first);
        let progress = store.get().await.unwrap();
        assert!(!progress.running);
        // Counters preserved by the finish write
        assert_eq!(progress.total, 1);
    }
}
