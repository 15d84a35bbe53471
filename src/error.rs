use thiserror::Error;

pub type HermesResult<T> = Result<T, HermesError>;

#[derive(Debug, Error)]
pub enum HermesError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Failed to parse enum setting: {0}")]
    ParseEnum(#[from] strum::ParseError),
}

/// Errors related to data loading, parsing, and frame invariants.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Data frame error: {0}")]
    DataFrame(String),

    #[error("No data loaded for symbols: {0}")]
    NoData(String),

    #[error("Failed timestamp conversion: {0}")]
    TimestampConversion(String),

    #[error("Invalid date string: '{0}'")]
    InvalidDate(String),

    #[error("Invalid timeframe string: '{0}'")]
    InvalidTimeframe(String),

    #[error("Instrument file not found: {0}")]
    InstrumentFileNotFound(String),

    #[error("Symbol not found in instruments: '{0}'")]
    UnknownSymbol(String),

    #[error("Failed to parse float: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("Failed to parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

impl From<polars::error::PolarsError> for DataError {
    fn from(e: polars::error::PolarsError) -> Self {
        DataError::DataFrame(e.to_string())
    }
}

impl From<polars::error::PolarsError> for HermesError {
    fn from(e: polars::error::PolarsError) -> Self {
        HermesError::Data(DataError::from(e))
    }
}

/// Errors related to the upstream broker transport.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Rate limit retries exhausted for token {0}")]
    RateLimitExhausted(u32),

    #[error("Broker API error for token {token}: {message}")]
    Api { token: u32, message: String },

    #[error("Malformed broker response: {0}")]
    MalformedResponse(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Transport(e.to_string())
    }
}

/// Errors related to sink storage (local files and object stores).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Failed to write data: {0}")]
    WriteFailed(String),

    #[error("Failed to read data: {0}")]
    ReadFailed(String),

    #[error("Failed to build object store: {0}")]
    ObjectStoreBuild(String),

    #[error("Object store operation failed: {0}")]
    ObjectStore(String),
}

impl From<object_store::Error> for SinkError {
    fn from(e: object_store::Error) -> Self {
        SinkError::ObjectStore(e.to_string())
    }
}

/// Errors raised by cache backends.
///
/// Callers swallow these (a broken cache never fails the primary
/// operation), so the variants exist mostly for logging.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Failed to serialize cache payload: {0}")]
    Serialize(String),

    #[error("Failed to deserialize cache payload: {0}")]
    Deserialize(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Errors raised by the backtest engines and the strategy layer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Strategy must output a 'signal' column")]
    MissingSignal,

    #[error("Strategy '{0}' not found. Available: {1}")]
    UnknownStrategy(String, String),

    #[error("Invalid params for strategy: {0}")]
    InvalidParams(String),

    #[error("Backtest execution failed: {0}")]
    Execution(String),
}
