use std::{collections::HashMap, sync::Arc};

use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::Settings,
    data::Instrument,
    error::{DataError, HermesResult},
    ingest::progress::ProgressTracker,
    sink::DataSink,
    source::DataSource,
};

/// Coordinates concurrent, resumable ingestion from a source into a sink.
///
/// Each symbol resumes from its last stored bar, streams bounded date
/// chunks, and writes every chunk to the sink as soon as it arrives.
/// Failures are isolated per symbol; a failed symbol never aborts its
/// peers.
#[derive(Clone)]
pub struct IngestOrchestrator {
    source: Arc<dyn DataSource>,
    sink: Arc<dyn DataSink>,
    progress: Arc<dyn ProgressTracker>,
    settings: Arc<Settings>,
    cancel: CancellationToken,
}

impl IngestOrchestrator {
    pub fn new(
        source: Arc<dyn DataSource>,
        sink: Arc<dyn DataSink>,
        progress: Arc<dyn ProgressTracker>,
        settings: Settings,
    ) -> Self {
        Self {
            source,
            sink,
            progress,
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
        }
    }

    /// Installs an external cancellation token. Cancelling it stops all
    /// in-flight symbol tasks at their next suspension point.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetches one symbol end to end. Returns `true` on success; all
    /// failures are caught, reported through the progress tracker, and
    /// collapsed to `false`.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_symbol(&self, symbol: &str, token: u32) -> bool {
        match self.try_fetch_symbol(symbol, token).await {
            Ok(()) => {
                self.progress.complete_symbol(symbol, true);
                true
            }
            Err(e) => {
                error!(symbol, error = %e, "Fetch failed");
                self.progress.complete_symbol(symbol, false);
                false
            }
        }
    }

    async fn try_fetch_symbol(&self, symbol: &str, token: u32) -> HermesResult<()> {
        let end = Utc::now().date_naive();
        let mut start: NaiveDate = self
            .settings
            .start_date
            .parse()
            .map_err(|_| DataError::InvalidDate(self.settings.start_date.clone()))?;

        // Resume from the last stored day. The broker range is inclusive and
        // the sink deduplicates, so re-fetching that day is idempotent.
        if self.sink.exists(symbol).await
            && let Some(last) = self.sink.last_timestamp(symbol).await?
        {
            start = last.date();
            info!(symbol, %start, "Resuming");
        }

        if start >= end {
            info!(symbol, "Already up to date");
            self.progress.start_symbol(symbol, 0);
            return Ok(());
        }

        let total_chunks = self.source.calculate_chunks(start, end);
        self.progress.start_symbol(symbol, total_chunks);

        let mut chunks = self.source.fetch_chunks(symbol, token, start, end);
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(symbol, "Fetch cancelled");
                    return Ok(());
                }
                chunk = chunks.next() => chunk,
            };

            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;

            if chunk.is_empty() {
                self.progress.update_symbol(symbol, 1, 0);
                continue;
            }

            let rows = chunk.frame.height();
            // Written immediately; chunks are never accumulated in memory.
            self.sink.write(symbol, chunk.frame).await?;
            self.progress.update_symbol(symbol, 1, rows);
        }

        Ok(())
    }

    /// Syncs many symbols with bounded concurrency.
    ///
    /// Resolves the instrument list (optionally filtered by `symbols`,
    /// truncated to `limit`), fans out over a semaphore of `concurrency`
    /// permits, awaits every task, closes the source exactly once, and
    /// returns the per-symbol outcome map.
    #[tracing::instrument(skip_all)]
    pub async fn sync(
        &self,
        symbols: Option<Vec<String>>,
        limit: Option<usize>,
        concurrency: Option<usize>,
    ) -> HermesResult<HashMap<String, bool>> {
        let concurrency = concurrency.unwrap_or(self.settings.max_concurrency).max(1);
        let instruments = self.resolve_instruments(symbols, limit)?;

        if instruments.is_empty() {
            warn!("No instruments to process");
            return Ok(HashMap::new());
        }

        info!(
            symbols = instruments.len(),
            concurrency, "Starting sync"
        );
        self.progress.start(instruments.len());

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        for instrument in instruments {
            let this = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let ok = this
                    .fetch_symbol(&instrument.symbol, instrument.token)
                    .await;
                (instrument.symbol, ok)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, ok)) => {
                    results.insert(symbol, ok);
                }
                Err(e) => error!(error = %e, "Symbol task panicked"),
            }
        }

        // The scope has joined; release the source exactly once.
        self.source.close().await;

        let succeeded = results.values().filter(|ok| **ok).count();
        info!(succeeded, total = results.len(), "Sync complete");
        Ok(results)
    }

    fn resolve_instruments(
        &self,
        symbols: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> HermesResult<Vec<Instrument>> {
        let mut instruments = self.source.list_instruments()?;

        if let Some(symbols) = symbols {
            let wanted: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
            instruments.retain(|i| wanted.contains(&i.symbol));
        }
        if let Some(limit) = limit {
            instruments.truncate(limit);
        }
        Ok(instruments)
    }
}
