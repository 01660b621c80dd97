use super::{expiry_millis, StateStore, StoreResult, UpdateFn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// [`StateStore`] on a SQLite database shared by all local processes
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (creating if needed) the database at `url` and ensure the schema
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let db_url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite:{url}")
        };

        if db_url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!("Connected state store at {}", db_url);
        Self::with_pool(pool).await
    }

    /// Private in-memory database on a single pinned connection
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS counters (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL,
                expires_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS window_entries (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                expires_at INTEGER,
                PRIMARY KEY (key, member)
            );

            CREATE INDEX IF NOT EXISTS idx_window_entries_key_ts ON window_entries (key, ts_ms);
            CREATE INDEX IF NOT EXISTS idx_kv_entries_expires ON kv_entries (expires_at);
            CREATE INDEX IF NOT EXISTS idx_counters_expires ON counters (expires_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// `SELECT key, value` over the live entries among `keys`
fn live_values_query(keys: &[String], now: DateTime<Utc>) -> QueryBuilder<'_, Sqlite> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT key, value FROM kv_entries WHERE (expires_at IS NULL OR expires_at > ",
    );
    query.push_bind(now.timestamp_millis());
    query.push(") AND key IN (");
    let mut separated = query.separated(", ");
    for key in keys {
        separated.push_bind(key.as_str());
    }
    separated.push_unseparated(")");
    query
}

const UPSERT_ENTRY: &str = r#"
    INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
"#;

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv_entries WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(key)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn get_many(
        &self,
        keys: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = live_values_query(keys, now);
        let rows: Vec<(String, String)> = query.build_query_as().fetch_all(&self.pool).await?;
        let mut found: HashMap<String, String> = rows.into_iter().collect();

        Ok(keys.iter().map(|key| found.remove(key)).collect())
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT key, value FROM kv_entries
            WHERE substr(key, 1, length(?1)) = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
            "#,
        )
        .bind(prefix)
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(UPSERT_ENTRY)
            .bind(key)
            .bind(value)
            .bind(ttl.map(|ttl| expiry_millis(now, ttl)))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let expires_at = ttl.map(|ttl| expiry_millis(now, ttl));
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(UPSERT_ENTRY)
                .bind(key)
                .bind(value)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("Wrote {} entries in one transaction", entries.len());
        Ok(())
    }

    async fn update_many(
        &self,
        keys: &[String],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
        update: &UpdateFn<'_>,
    ) -> StoreResult<()> {
        // IMMEDIATE takes the write lock up front; a deferred read would let
        // two writers read the same version and one would fail on upgrade.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let current = if keys.is_empty() {
            Vec::new()
        } else {
            let mut query = live_values_query(keys, now);
            let rows: Vec<(String, String)> = query.build_query_as().fetch_all(&mut *tx).await?;
            let mut found: HashMap<String, String> = rows.into_iter().collect();
            keys.iter().map(|key| found.remove(key)).collect()
        };

        // Dropping `tx` on error rolls it back
        let entries = update(current)?;

        let expires_at = ttl.map(|ttl| expiry_millis(now, ttl));
        for (key, value) in &entries {
            sqlx::query(UPSERT_ENTRY)
                .bind(key)
                .bind(value)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("Updated {} entries in one transaction", entries.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM kv_entries WHERE key = ?1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM counters WHERE key = ?1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM window_entries WHERE key = ?1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn counter(&self, key: &str, now: DateTime<Utc>) -> StoreResult<i64> {
        let value = sqlx::query_scalar::<_, i64>(
            "SELECT value FROM counters WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(key)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.unwrap_or(0))
    }

    async fn counters(&self, keys: &[String], now: DateTime<Utc>) -> StoreResult<Vec<i64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT key, value FROM counters WHERE (expires_at IS NULL OR expires_at > ",
        );
        query.push_bind(now.timestamp_millis());
        query.push(") AND key IN (");
        let mut separated = query.separated(", ");
        for key in keys {
            separated.push_bind(key.as_str());
        }
        separated.push_unseparated(")");

        let rows: Vec<(String, i64)> = query.build_query_as().fetch_all(&self.pool).await?;
        let found: HashMap<String, i64> = rows.into_iter().collect();

        Ok(keys
            .iter()
            .map(|key| found.get(key).copied().unwrap_or(0))
            .collect())
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: i64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        if limit <= 0 {
            return Ok(None);
        }

        // Single statement: SQLite serialises writers, so the bound check and
        // the increment observe the same row version. An expired row restarts
        // from 1.
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO counters (key, value, expires_at) VALUES (?1, 1, ?2)
            ON CONFLICT(key) DO UPDATE SET
                value = CASE
                    WHEN counters.expires_at IS NOT NULL AND counters.expires_at <= ?3 THEN 1
                    ELSE counters.value + 1
                END,
                expires_at = excluded.expires_at
            WHERE (counters.expires_at IS NOT NULL AND counters.expires_at <= ?3)
               OR counters.value < ?4
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(expiry_millis(now, ttl))
        .bind(now.timestamp_millis())
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn admit_to_window(
        &self,
        key: &str,
        now: DateTime<Utc>,
        period: Duration,
        max_entries: u32,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now_ms = now.timestamp_millis();
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(period_ms);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM window_entries
            WHERE key = ?1 AND (ts_ms <= ?2 OR (expires_at IS NOT NULL AND expires_at <= ?3))
            "#,
        )
        .bind(key)
        .bind(cutoff)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM window_entries WHERE key = ?1")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

        if count >= i64::from(max_entries) {
            tx.commit().await?;
            return Ok(false);
        }

        let expires_at = expiry_millis(now, ttl);
        sqlx::query(
            "INSERT INTO window_entries (key, member, ts_ms, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(key)
        .bind(Uuid::new_v4().to_string())
        .bind(now_ms)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE window_entries SET expires_at = ?2 WHERE key = ?1")
            .bind(key)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let now_ms = now.timestamp_millis();
        let mut removed = 0;

        for table in ["kv_entries", "counters", "window_entries"] {
            let result = sqlx::query(&format!(
                "DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= ?1"
            ))
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
            removed += result.rows_affected();
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let store = SqliteStateStore::in_memory().await.unwrap();

        store
            .set("a", "1", Some(Duration::from_secs(10)), t(0))
            .await
            .unwrap();
        store.set("b", "2", None, t(0)).await.unwrap();

        assert_eq!(store.get("a", t(5)).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("a", t(10)).await.unwrap(), None);
        assert_eq!(store.get("b", t(10_000)).await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("missing", t(0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        store.set("x", "10", None, t(0)).await.unwrap();
        store.set("z", "30", None, t(0)).await.unwrap();

        let keys = vec!["z".to_string(), "y".to_string(), "x".to_string()];
        let values = store.get_many(&keys, t(0)).await.unwrap();
        assert_eq!(
            values,
            vec![Some("30".to_string()), None, Some("10".to_string())]
        );
    }

    #[tokio::test]
    async fn test_scan_prefix_ignores_other_keys() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let entries = vec![
            ("scores:average:a".to_string(), "0.1".to_string()),
            ("scores:average:b".to_string(), "0.2".to_string()),
            ("scores:history:a".to_string(), "[]".to_string()),
        ];
        store.set_many(&entries, None, t(0)).await.unwrap();

        let found = store.scan_prefix("scores:average:", t(0)).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("scores:average:b").map(String::as_str), Some("0.2"));
    }

    #[tokio::test]
    async fn test_increment_below_stops_at_limit() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let ttl = Duration::from_secs(60);

        for expected in 1..=3 {
            let value = store.increment_below("c", 3, ttl, t(0)).await.unwrap();
            assert_eq!(value, Some(expected));
        }
        assert_eq!(store.increment_below("c", 3, ttl, t(0)).await.unwrap(), None);
        assert_eq!(store.counter("c", t(0)).await.unwrap(), 3);

        // Expired counters restart
        assert_eq!(store.increment_below("c", 3, ttl, t(60)).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_increment_below_zero_limit_never_writes() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let value = store
            .increment_below("c", 0, Duration::from_secs(60), t(0))
            .await
            .unwrap();
        assert_eq!(value, None);
        assert_eq!(store.counter("c", t(0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_below_concurrent_file_store() {
        let db = tempfile::NamedTempFile::new().unwrap();
        let url = format!("sqlite:{}", db.path().display());
        let store = Arc::new(SqliteStateStore::connect(&url, 4).await.unwrap());

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .increment_below("shared", 7, Duration::from_secs(60), t(0))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 7);
        assert_eq!(store.counter("shared", t(0)).await.unwrap(), 7);
    }

    fn append_to(
        key: &str,
        suffix: &'static str,
    ) -> impl Fn(Vec<Option<String>>) -> StoreResult<Vec<(String, String)>> + Send + Sync {
        let key = key.to_string();
        move |current| {
            let mut value = current.into_iter().next().flatten().unwrap_or_default();
            value.push_str(suffix);
            Ok(vec![(key.clone(), value)])
        }
    }

    #[tokio::test]
    async fn test_update_many_reads_and_writes() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        store.set("a", "x", None, t(0)).await.unwrap();

        let keys = vec!["a".to_string()];
        store
            .update_many(&keys, None, t(0), &append_to("a", "y"))
            .await
            .unwrap();
        assert_eq!(store.get("a", t(0)).await.unwrap().as_deref(), Some("xy"));

        let failing = |_: Vec<Option<String>>| -> StoreResult<Vec<(String, String)>> {
            Err(StoreError::Malformed {
                key: "a".to_string(),
                message: "rejected".to_string(),
            })
        };
        assert!(store.update_many(&keys, None, t(0), &failing).await.is_err());
        assert_eq!(store.get("a", t(0)).await.unwrap().as_deref(), Some("xy"));

        // The store stays usable after the rollback
        store
            .update_many(&keys, None, t(0), &append_to("a", "z"))
            .await
            .unwrap();
        assert_eq!(store.get("a", t(0)).await.unwrap().as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_update_many_concurrent_file_store() {
        let db = tempfile::NamedTempFile::new().unwrap();
        let url = format!("sqlite:{}", db.path().display());
        let store = Arc::new(SqliteStateStore::connect(&url, 4).await.unwrap());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let keys = vec!["log".to_string()];
                    store
                        .update_many(&keys, None, t(0), &append_to("log", "+"))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let value = store.get("log", t(0)).await.unwrap().unwrap_or_default();
        assert_eq!(value, "+".repeat(10));
    }

    #[tokio::test]
    async fn test_counters_default_to_zero() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        store
            .increment_below("k1", 10, Duration::from_secs(60), t(0))
            .await
            .unwrap();

        let values = store
            .counters(&["k0".to_string(), "k1".to_string()], t(0))
            .await
            .unwrap();
        assert_eq!(values, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_window_admission_prunes_old_entries() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let period = Duration::from_secs(100);
        let ttl = Duration::from_secs(200);

        assert!(store.admit_to_window("w", t(0), period, 2, ttl).await.unwrap());
        assert!(store.admit_to_window("w", t(10), period, 2, ttl).await.unwrap());
        assert!(!store.admit_to_window("w", t(20), period, 2, ttl).await.unwrap());

        // The entry at t(0) falls out of the window at t(100)
        assert!(store.admit_to_window("w", t(100), period, 2, ttl).await.unwrap());
        assert!(!store.admit_to_window("w", t(100), period, 2, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_same_instant_entries_are_distinct() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let period = Duration::from_secs(100);
        let ttl = Duration::from_secs(200);

        for _ in 0..3 {
            assert!(store.admit_to_window("w", t(0), period, 3, ttl).await.unwrap());
        }
        assert!(!store.admit_to_window("w", t(0), period, 3, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_and_delete() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let ttl = Some(Duration::from_secs(5));
        store.set("a", "1", ttl, t(0)).await.unwrap();
        store.set("b", "1", None, t(0)).await.unwrap();
        store
            .increment_below("c", 5, Duration::from_secs(5), t(0))
            .await
            .unwrap();

        let removed = store.purge_expired(t(10)).await.unwrap();
        assert_eq!(removed, 2);

        store.delete("b").await.unwrap();
        assert_eq!(store.get("b", t(10)).await.unwrap(), None);
    }
}
