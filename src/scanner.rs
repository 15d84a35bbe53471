use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};

use chrono::Utc;
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};
use strum::Display;
use tokio::sync::{Semaphore, oneshot};
use tracing::{info, warn};

use crate::{
    backtest::{BacktestRequest, BacktestService, Mode},
    error::{CacheError, EngineError, HermesResult},
    metrics::parse_total_return,
    strategy::{self, Params},
};

/// Default scan result TTL.
pub const SCAN_CACHE_TTL_HOURS: i64 = 24;

/// A batch scan request: one strategy over many symbols.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Symbols to scan; `None` scans everything in the sink.
    pub symbols: Option<Vec<String>>,
    pub strategy: String,
    pub params: Params,
    pub initial_cash: f64,
    pub mode: Mode,
    pub timeframe: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub max_concurrency: usize,
}

impl ScanRequest {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            symbols: None,
            strategy: strategy.into(),
            params: Params::new(),
            initial_cash: 100_000.0,
            mode: Mode::Vector,
            timeframe: "1m".to_string(),
            start_date: None,
            end_date: None,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScanStatus {
    Success,
    Cached,
    Error,
}

/// Per-symbol scan outcome.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub symbol: String,
    pub metrics: BTreeMap<String, String>,
    pub signal_count: usize,
    pub last_signal: Option<String>,
    pub last_signal_time: Option<i64>,
    pub status: ScanStatus,
    pub cached: bool,
    pub error: Option<String>,
}

/// Batch scan summary.
#[derive(Debug)]
pub struct ScanResponse {
    pub strategy: String,
    pub total_symbols: usize,
    pub completed: usize,
    pub failed: usize,
    pub cached_count: usize,
    pub fresh_count: usize,
    /// Sorted non-increasing by the numeric Total Return.
    pub results: Vec<ScanResult>,
    pub elapsed_ms: u128,
}

/// Deterministic fingerprint over everything that shapes a scan result.
///
/// `timeframe` participates: two requests differing only in timeframe
/// must not collide.
fn params_hash(request: &ScanRequest) -> String {
    let payload = serde_json::json!({
        "params": request.params,
        "mode": request.mode.to_string(),
        "timeframe": request.timeframe,
        "start_date": request.start_date,
        "end_date": request.end_date,
    });
    let digest = Sha256::digest(payload.to_string().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ================================================================================================
// Result cache
// ================================================================================================

/// SQLite-backed scan result cache, keyed `(symbol, strategy, params_hash)`.
pub struct ScanCache {
    conn: Mutex<Connection>,
}

impl ScanCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scan_results (
                symbol           TEXT NOT NULL,
                strategy         TEXT NOT NULL,
                params_hash      TEXT NOT NULL,
                mode             TEXT NOT NULL,
                metrics          TEXT NOT NULL,
                signal_count     INTEGER NOT NULL,
                last_signal      TEXT,
                last_signal_time INTEGER,
                created_at       INTEGER NOT NULL,
                expires_at       INTEGER NOT NULL,
                status           TEXT NOT NULL,
                error_message    TEXT,
                PRIMARY KEY (symbol, strategy, params_hash)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fresh, successful cached rows for the given symbols.
    fn get_fresh(
        &self,
        symbols: &[String],
        strategy: &str,
        hash: &str,
    ) -> Result<HashMap<String, ScanResult>, CacheError> {
        let now = Utc::now().timestamp();
        let conn = self
            .conn
            .lock()
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut statement = conn.prepare(
            "SELECT symbol, metrics, signal_count, last_signal, last_signal_time
             FROM scan_results
             WHERE strategy = ?1 AND params_hash = ?2
               AND expires_at > ?3 AND status = 'success'",
        )?;

        let rows = statement.query_map(params![strategy, hash, now], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?;

        let mut cached = HashMap::new();
        for row in rows {
            let (symbol, metrics_json, signal_count, last_signal, last_signal_time) = row?;
            if !symbols.contains(&symbol) {
                continue;
            }
            let metrics = serde_json::from_str(&metrics_json)
                .map_err(|e| CacheError::Deserialize(e.to_string()))?;
            cached.insert(
                symbol.clone(),
                ScanResult {
                    symbol,
                    metrics,
                    signal_count: signal_count as usize,
                    last_signal,
                    last_signal_time,
                    status: ScanStatus::Cached,
                    cached: true,
                    error: None,
                },
            );
        }
        Ok(cached)
    }

    /// Batch-upserts fresh successes with a renewed expiry stamp.
    fn store(
        &self,
        results: &[ScanResult],
        strategy: &str,
        hash: &str,
        mode: Mode,
        ttl_hours: i64,
    ) -> Result<(), CacheError> {
        let now = Utc::now().timestamp();
        let expires_at = now + ttl_hours * 3600;

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let tx = conn.transaction()?;

        for result in results {
            let metrics_json = serde_json::to_string(&result.metrics)
                .map_err(|e| CacheError::Serialize(e.to_string()))?;
            tx.execute(
                "INSERT INTO scan_results
                 (symbol, strategy, params_hash, mode, metrics, signal_count,
                  last_signal, last_signal_time, created_at, expires_at, status, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'success', NULL)
                 ON CONFLICT (symbol, strategy, params_hash) DO UPDATE SET
                    mode = excluded.mode,
                    metrics = excluded.metrics,
                    signal_count = excluded.signal_count,
                    last_signal = excluded.last_signal,
                    last_signal_time = excluded.last_signal_time,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at,
                    status = 'success',
                    error_message = NULL",
                params![
                    result.symbol,
                    strategy,
                    hash,
                    mode.to_string(),
                    metrics_json,
                    result.signal_count as i64,
                    result.last_signal,
                    result.last_signal_time,
                    now,
                    expires_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    #[cfg(test)]
    fn expire_all(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE scan_results SET expires_at = 0", [])
            .unwrap();
    }
}

// ================================================================================================
// Scanner
// ================================================================================================

/// Batch strategy execution over many symbols with result caching.
pub struct Scanner {
    backtest: Arc<BacktestService>,
    cache: Option<Arc<ScanCache>>,
    ttl_hours: i64,
}

impl Scanner {
    pub fn new(backtest: Arc<BacktestService>, cache: Option<Arc<ScanCache>>) -> Self {
        Self {
            backtest,
            cache,
            ttl_hours: SCAN_CACHE_TTL_HOURS,
        }
    }

    pub fn with_ttl_hours(mut self, ttl_hours: i64) -> Self {
        self.ttl_hours = ttl_hours;
        self
    }

    /// Runs the strategy across all requested symbols, serving fresh
    /// cached rows where possible and computing the rest concurrently.
    #[tracing::instrument(skip_all, fields(strategy = %request.strategy))]
    pub async fn scan(&self, request: ScanRequest) -> HermesResult<ScanResponse> {
        let started = Instant::now();

        if !strategy::STRATEGY_NAMES.contains(&request.strategy.as_str()) {
            return Err(EngineError::UnknownStrategy(
                request.strategy.clone(),
                strategy::STRATEGY_NAMES.join(", "),
            )
            .into());
        }

        // Resolve, uppercase, deduplicate.
        let mut symbols: Vec<String> = match &request.symbols {
            Some(symbols) => symbols.iter().map(|s| s.to_uppercase()).collect(),
            None => self.backtest.data().list_symbols().await?,
        };
        symbols.sort();
        symbols.dedup();

        if symbols.is_empty() {
            return Ok(ScanResponse {
                strategy: request.strategy.clone(),
                total_symbols: 0,
                completed: 0,
                failed: 0,
                cached_count: 0,
                fresh_count: 0,
                results: Vec::new(),
                elapsed_ms: started.elapsed().as_millis(),
            });
        }

        let hash = params_hash(&request);

        // CHECK: serve fresh cached rows as-is.
        let cached: HashMap<String, ScanResult> = match &self.cache {
            Some(cache) => match cache.get_fresh(&symbols, &request.strategy, &hash) {
                Ok(cached) => cached,
                Err(e) => {
                    warn!(error = %e, "Cache read failed, computing all");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };
        info!(
            hits = cached.len(),
            total = symbols.len(),
            "Scan cache lookup"
        );

        let to_compute: Vec<String> = symbols
            .iter()
            .filter(|s| !cached.contains_key(*s))
            .cloned()
            .collect();

        // RUN: bounded fan-out; the columnar work runs on rayon so the
        // async executor is never blocked.
        let semaphore = Arc::new(Semaphore::new(request.max_concurrency.max(1)));
        let mut tasks = tokio::task::JoinSet::new();
        for symbol in to_compute {
            let backtest = self.backtest.clone();
            let request = request.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                scan_symbol(backtest, request, symbol).await
            });
        }

        let mut fresh: Vec<ScanResult> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => fresh.push(result),
                Err(e) => warn!(error = %e, "Scan task panicked"),
            }
        }

        // STORE: batch-upsert fresh successes.
        if let Some(cache) = &self.cache {
            let successes: Vec<ScanResult> = fresh
                .iter()
                .filter(|r| r.status == ScanStatus::Success)
                .cloned()
                .collect();
            if !successes.is_empty()
                && let Err(e) = cache.store(
                    &successes,
                    &request.strategy,
                    &hash,
                    request.mode,
                    self.ttl_hours,
                )
            {
                warn!(error = %e, "Cache store failed");
            }
        }

        // SERVE: merge and rank by Total Return.
        let fresh_count = fresh.len();
        let cached_count = cached.len();
        let mut results: Vec<ScanResult> = cached.into_values().chain(fresh).collect();
        results.sort_by(|a, b| {
            parse_total_return(&b.metrics)
                .partial_cmp(&parse_total_return(&a.metrics))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let completed = results.iter().filter(|r| r.status != ScanStatus::Error).count();
        let failed = results.len() - completed;

        Ok(ScanResponse {
            strategy: request.strategy.clone(),
            total_symbols: symbols.len(),
            completed,
            failed,
            cached_count,
            fresh_count,
            results,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }
}

/// Backtests one symbol; never propagates. Errors become error rows.
async fn scan_symbol(
    backtest: Arc<BacktestService>,
    request: ScanRequest,
    symbol: String,
) -> ScanResult {
    let backtest_request = BacktestRequest {
        symbol: symbol.clone(),
        strategy: request.strategy.clone(),
        params: request.params.clone(),
        initial_cash: request.initial_cash,
        mode: request.mode,
        timeframe: request.timeframe.clone(),
        start_date: request.start_date.clone(),
        end_date: request.end_date.clone(),
        ..BacktestRequest::new("", "")
    };

    let outcome = async {
        let frame = backtest
            .data()
            .get_market_data(
                &[symbol.clone()],
                backtest_request.start_date.as_deref(),
                backtest_request.end_date.as_deref(),
            )
            .await?;

        // Offload the columnar pipeline to the rayon pool.
        let (send, recv) = oneshot::channel();
        let worker_request = backtest_request.clone();
        rayon::spawn(move || {
            let result = BacktestService::run_on_frame(&worker_request, frame);
            let _ = send.send(result);
        });
        recv.await
            .map_err(|_| EngineError::Execution("scan worker dropped".to_string()))?
    }
    .await;

    match outcome {
        Ok(response) => {
            let last = response.signals.last();
            ScanResult {
                symbol,
                metrics: response.metrics,
                signal_count: response.signals.len(),
                last_signal: last.map(|s| s.side.to_string()),
                last_signal_time: last.map(|s| s.time),
                status: ScanStatus::Success,
                cached: false,
                error: None,
            }
        }
        Err(e) => {
            warn!(%symbol, error = %e, "Scan failed");
            ScanResult {
                symbol,
                metrics: BTreeMap::new(),
                signal_count: 0,
                last_signal: None,
                last_signal_time: None,
                status: ScanStatus::Error,
                cached: false,
                error: Some(e.to_string()),
            }
        }
    }
}
