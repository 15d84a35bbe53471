use std::{env, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{ConfigError, HermesResult};

const ENV_PREFIX: &str = "HERMES_";

/// Storage backend for the ingestion sink.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[strum(serialize_all = "snake_case")]
pub enum SinkType {
    #[default]
    Local,
    CloudflareR2,
    OracleObjectStorage,
}

/// Cache backend for the read-through market data cache.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[strum(serialize_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Durable,
}

/// Parquet compression codec. Decompression is auto-detected on read.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
    Default,
)]
#[strum(serialize_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    Snappy,
    Lz4,
    Gzip,
    Uncompressed,
}

/// Cloudflare R2 credentials and bucket layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct R2Settings {
    pub account_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket_name: String,
    pub prefix: String,
}

/// Oracle OCI Object Storage (S3 compatibility API) credentials and layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OciSettings {
    pub namespace: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket_name: String,
    pub prefix: String,
}

/// Immutable runtime configuration, loaded once from `HERMES_*` environment
/// variables (with `.env` support). Services receive it by value or `Arc`;
/// there is no process-wide mutable configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Broker credentials
    pub zerodha_enctoken: Option<String>,
    pub zerodha_user_id: Option<String>,

    // Sink selection
    pub sink_type: SinkType,
    pub sink_path: PathBuf,
    pub compression: Compression,

    pub r2: R2Settings,
    pub oci: OciSettings,

    // Ingestion pacing
    pub rate_limit_per_sec: f64,
    pub max_concurrency: usize,
    pub chunk_days: i64,
    pub start_date: String,
    pub instrument_file: PathBuf,

    // Cache layer
    pub cache_enabled: bool,
    pub cache_max_size_mb: f64,
    pub cache_backend: CacheBackend,
    pub cache_ttl_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            zerodha_enctoken: None,
            zerodha_user_id: None,
            sink_type: SinkType::Local,
            sink_path: PathBuf::from("data/minute"),
            compression: Compression::Zstd,
            r2: R2Settings {
                bucket_name: "hermes-market-data".to_string(),
                prefix: "minute".to_string(),
                ..Default::default()
            },
            oci: OciSettings {
                bucket_name: "hermes-market-data".to_string(),
                prefix: "minute".to_string(),
                ..Default::default()
            },
            rate_limit_per_sec: 2.5,
            max_concurrency: 5,
            chunk_days: 60,
            start_date: "2020-01-01".to_string(),
            instrument_file: PathBuf::from("data/instruments/NSE.csv"),
            cache_enabled: true,
            cache_max_size_mb: 512.0,
            cache_backend: CacheBackend::Memory,
            cache_ttl_hours: 24,
        }
    }
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults.
    ///
    /// A `.env` file in the working directory is honored if present.
    pub fn from_env() -> HermesResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Settings::default();
        Ok(Settings {
            zerodha_enctoken: var("ZERODHA_ENCTOKEN"),
            zerodha_user_id: var("ZERODHA_USER_ID"),
            sink_type: parse_var("SINK_TYPE", defaults.sink_type)?,
            sink_path: var("SINK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sink_path),
            compression: parse_var("COMPRESSION", defaults.compression)?,
            r2: R2Settings {
                account_id: var("R2_ACCOUNT_ID"),
                access_key_id: var("R2_ACCESS_KEY_ID"),
                secret_access_key: var("R2_SECRET_ACCESS_KEY"),
                bucket_name: var("R2_BUCKET_NAME").unwrap_or(defaults.r2.bucket_name),
                prefix: var("R2_PREFIX").unwrap_or(defaults.r2.prefix),
            },
            oci: OciSettings {
                namespace: var("OCI_NAMESPACE"),
                region: var("OCI_REGION"),
                access_key_id: var("OCI_ACCESS_KEY_ID"),
                secret_access_key: var("OCI_SECRET_ACCESS_KEY"),
                bucket_name: var("OCI_BUCKET_NAME").unwrap_or(defaults.oci.bucket_name),
                prefix: var("OCI_PREFIX").unwrap_or(defaults.oci.prefix),
            },
            rate_limit_per_sec: parse_var("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec)?,
            max_concurrency: parse_var("MAX_CONCURRENCY", defaults.max_concurrency)?,
            chunk_days: parse_var("CHUNK_DAYS", defaults.chunk_days)?,
            start_date: var("START_DATE").unwrap_or(defaults.start_date),
            instrument_file: var("INSTRUMENT_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.instrument_file),
            cache_enabled: parse_var("CACHE_ENABLED", defaults.cache_enabled)?,
            cache_max_size_mb: parse_var("CACHE_MAX_SIZE_MB", defaults.cache_max_size_mb)?,
            cache_backend: parse_var("CACHE_BACKEND", defaults.cache_backend)?,
            cache_ttl_hours: parse_var("CACHE_TTL_HOURS", defaults.cache_ttl_hours)?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{key}"),
            value: raw,
        }),
        None => Ok(default),
    }
}
