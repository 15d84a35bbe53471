//! Convenience re-exports for the common entry points.

pub use crate::{
    backtest::{BacktestRequest, BacktestResponse, BacktestService, Mode},
    cache::{DataCache, DurableCache, MemoryCache},
    config::{CacheBackend, Compression, Settings, SinkType},
    engine::{
        EventEngine, EventHandler, Portfolio, RiskParams, VectorEngine,
        VolumeAwareExecutionHandler,
    },
    error::{HermesError, HermesResult},
    ingest::{IngestOrchestrator, ProgressTracker, TerminalProgress},
    metrics::MetricsService,
    scanner::{ScanCache, ScanRequest, ScanResponse, Scanner},
    service::MarketDataService,
    sink::{DataSink, LocalFileSink, ObjectStoreSink, build_sink},
    source::{DataSource, RateLimiter, ZerodhaSource},
    strategy::Strategy,
};
