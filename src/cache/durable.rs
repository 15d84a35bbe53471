use std::{io::Cursor, path::Path, sync::Mutex};

use chrono::Utc;
use polars::prelude::{DataFrame, IpcReader, IpcWriter, SerReader, SerWriter};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::{
    cache::{CacheStats, DataCache, cache_key},
    error::CacheError,
};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Durable cache backed by a SQLite table, one row per key.
///
/// Payloads are Arrow IPC bytes of the frame. Entries expire after a TTL;
/// `get` promotes `last_accessed_at`, `set` deletes expired rows and then
/// evicts by `last_accessed_at` ascending until the new payload fits.
/// Every mutation runs inside a transaction.
pub struct DurableCache {
    conn: Mutex<Connection>,
    max_size_mb: f64,
    ttl_hours: i64,
    counters: Mutex<(u64, u64)>,
}

impl DurableCache {
    pub fn open(
        path: impl AsRef<Path>,
        max_size_mb: f64,
        ttl_hours: i64,
    ) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open(path)?, max_size_mb, ttl_hours)
    }

    pub fn in_memory(max_size_mb: f64, ttl_hours: i64) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?, max_size_mb, ttl_hours)
    }

    fn from_connection(
        conn: Connection,
        max_size_mb: f64,
        ttl_hours: i64,
    ) -> Result<Self, CacheError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dataframe_cache (
                cache_key        TEXT PRIMARY KEY,
                symbols          TEXT NOT NULL,
                start_date       TEXT,
                end_date         TEXT,
                payload          BLOB NOT NULL,
                payload_size_mb  REAL NOT NULL,
                row_count        INTEGER NOT NULL,
                created_at       INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL,
                expires_at       INTEGER NOT NULL,
                hit_count        INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_cache_lru
                ON dataframe_cache (last_accessed_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_size_mb,
            ttl_hours,
            counters: Mutex::new((0, 0)),
        })
    }

    fn serialize(data: &DataFrame) -> Result<Vec<u8>, CacheError> {
        let mut buffer = Vec::new();
        IpcWriter::new(&mut buffer)
            .finish(&mut data.clone())
            .map_err(|e| CacheError::Serialize(e.to_string()))?;
        Ok(buffer)
    }

    fn deserialize(bytes: &[u8]) -> Result<DataFrame, CacheError> {
        IpcReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|e| CacheError::Deserialize(e.to_string()))
    }

    fn try_get(&self, key: &str) -> Result<Option<DataFrame>, CacheError> {
        let now = Utc::now().timestamp();
        let conn = self
            .conn
            .lock()
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT payload, expires_at FROM dataframe_cache WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at < now {
            debug!(key = &key[..8], "Cache entry expired");
            conn.execute(
                "DELETE FROM dataframe_cache WHERE cache_key = ?1",
                params![key],
            )?;
            return Ok(None);
        }

        conn.execute(
            "UPDATE dataframe_cache
             SET last_accessed_at = ?1, hit_count = hit_count + 1
             WHERE cache_key = ?2",
            params![now, key],
        )?;

        Self::deserialize(&payload).map(Some)
    }

    fn try_set(
        &self,
        key: &str,
        symbols: &[String],
        start: Option<&str>,
        end: Option<&str>,
        data: &DataFrame,
    ) -> Result<(), CacheError> {
        let payload = Self::serialize(data)?;
        let size_mb = payload.len() as f64 / BYTES_PER_MB;

        if size_mb > self.max_size_mb {
            warn!(
                size_mb,
                max_size_mb = self.max_size_mb,
                "Data too large to cache"
            );
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let expires_at = now + self.ttl_hours * 3600;

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM dataframe_cache WHERE cache_key = ?1",
            params![key],
        )?;
        tx.execute(
            "DELETE FROM dataframe_cache WHERE expires_at < ?1",
            params![now],
        )?;

        let mut total: f64 = tx.query_row(
            "SELECT COALESCE(SUM(payload_size_mb), 0) FROM dataframe_cache",
            [],
            |row| row.get(0),
        )?;

        while total + size_mb > self.max_size_mb {
            let oldest: Option<(String, f64)> = tx
                .query_row(
                    "SELECT cache_key, payload_size_mb FROM dataframe_cache
                     ORDER BY last_accessed_at ASC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((oldest_key, oldest_size)) = oldest else {
                break;
            };
            tx.execute(
                "DELETE FROM dataframe_cache WHERE cache_key = ?1",
                params![oldest_key],
            )?;
            total -= oldest_size;
            debug!(key = &oldest_key[..8], "Evicted cache entry");
        }

        tx.execute(
            "INSERT INTO dataframe_cache
             (cache_key, symbols, start_date, end_date, payload, payload_size_mb,
              row_count, created_at, last_accessed_at, expires_at, hit_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9, 0)",
            params![
                key,
                symbols.join(","),
                start,
                end,
                payload,
                size_mb,
                data.height() as i64,
                now,
                expires_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    #[cfg(test)]
    fn age_entry(&self, key: &str, seconds: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE dataframe_cache
             SET expires_at = expires_at - ?1, last_accessed_at = last_accessed_at - ?1
             WHERE cache_key = ?2",
            params![seconds, key],
        )
        .unwrap();
    }
}

impl DataCache for DurableCache {
    fn get(
        &self,
        symbols: &[String],
        start: Option<&str>,
        end: Option<&str>,
    ) -> Option<DataFrame> {
        let key = cache_key(symbols, start, end);
        let result = self.try_get(&key);
        let mut counters = self.counters.lock().ok()?;
        match result {
            Ok(Some(frame)) => {
                counters.0 += 1;
                Some(frame)
            }
            Ok(None) => {
                counters.1 += 1;
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache get failed");
                counters.1 += 1;
                None
            }
        }
    }

    fn set(&self, symbols: &[String], start: Option<&str>, end: Option<&str>, data: &DataFrame) {
        let key = cache_key(symbols, start, end);
        if let Err(e) = self.try_set(&key, symbols, start, end, data) {
            warn!(error = %e, "Cache set failed");
        }
    }

    fn clear(&self) {
        if let Ok(conn) = self.conn.lock()
            && let Err(e) = conn.execute("DELETE FROM dataframe_cache", [])
        {
            warn!(error = %e, "Cache clear failed");
        }
        if let Ok(mut counters) = self.counters.lock() {
            *counters = (0, 0);
        }
    }

    fn stats(&self) -> CacheStats {
        let (hits, misses) = self.counters.lock().map(|c| *c).unwrap_or((0, 0));
        let (entries, size_mb) = self
            .conn
            .lock()
            .ok()
            .and_then(|conn| {
                conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(payload_size_mb), 0) FROM dataframe_cache",
                    [],
                    |row| Ok((row.get::<_, i64>(0)? as usize, row.get::<_, f64>(1)?)),
                )
                .ok()
            })
            .unwrap_or((0, 0.0));

        CacheStats {
            entries,
            size_mb,
            max_size_mb: self.max_size_mb,
            hits,
            misses,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::test_support::bars;

    fn symbols(name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    #[test]
    fn round_trip_preserves_the_frame() {
        let cache = DurableCache::in_memory(64.0, 24).unwrap();
        let frame = bars(&[0, 1, 2], 100.0);

        assert!(cache.get(&symbols("INFY"), Some("2024-01-01"), None).is_none());
        cache.set(&symbols("INFY"), Some("2024-01-01"), None, &frame);
        assert_eq!(
            cache.get(&symbols("INFY"), Some("2024-01-01"), None),
            Some(frame)
        );

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entries_read_as_misses_and_are_deleted() {
        let cache = DurableCache::in_memory(64.0, 24).unwrap();
        cache.set(&symbols("TCS"), None, None, &bars(&[0], 1.0));

        let key = cache_key(&symbols("TCS"), None, None);
        cache.age_entry(&key, 25 * 3600);

        assert!(cache.get(&symbols("TCS"), None, None).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn eviction_prefers_stale_last_accessed_rows() {
        let frame = bars(&[0, 1, 2, 3], 100.0);
        let payload_mb = DurableCache::serialize(&frame).unwrap().len() as f64 / (1024.0 * 1024.0);
        let cache = DurableCache::in_memory(payload_mb * 2.5, 24).unwrap();

        cache.set(&symbols("A"), None, None, &frame);
        cache.set(&symbols("B"), None, None, &frame);

        // Make A the LRU candidate, then insert a third entry.
        cache.age_entry(&cache_key(&symbols("A"), None, None), 3600);
        cache.set(&symbols("C"), None, None, &frame);

        assert!(cache.get(&symbols("A"), None, None).is_none());
        assert!(cache.get(&symbols("B"), None, None).is_some());
        assert!(cache.get(&symbols("C"), None, None).is_some());
    }

    #[test]
    fn oversized_entries_are_rejected() {
        let cache = DurableCache::in_memory(0.0, 24).unwrap();
        cache.set(&symbols("A"), None, None, &bars(&[0], 1.0));
        assert_eq!(cache.stats().entries, 0);
    }
}
