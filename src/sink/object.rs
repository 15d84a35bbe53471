use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{ObjectStore, aws::AmazonS3Builder, path::Path as ObjectPath};
use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::{
    config::Compression,
    error::{HermesResult, SinkError},
    sink::{DataSink, from_parquet_bytes, merge_and_deduplicate, to_parquet_bytes},
};

/// Endpoint flavor for S3-compatible object stores.
#[derive(Debug, Clone)]
pub enum S3Endpoint {
    /// Cloudflare R2. Region is the literal `auto`.
    CloudflareR2 { account_id: String },
    /// Oracle OCI Object Storage via the S3 Compatibility API.
    ///
    /// OCI requires an explicit Content-Length on PUT and rejects chunked
    /// transfer encoding; the sink only issues single-shot puts, which
    /// carry the full body length.
    Oracle { namespace: String, region: String },
}

impl S3Endpoint {
    fn url(&self) -> String {
        match self {
            Self::CloudflareR2 { account_id } => {
                format!("https://{account_id}.r2.cloudflarestorage.com")
            }
            Self::Oracle { namespace, region } => {
                format!("https://{namespace}.compat.objectstorage.{region}.oraclecloud.com")
            }
        }
    }

    fn region(&self) -> String {
        match self {
            Self::CloudflareR2 { .. } => "auto".to_string(),
            Self::Oracle { region, .. } => region.clone(),
        }
    }
}

/// Writes market data to an S3-compatible object store at
/// `{prefix}/{symbol}.parquet`, mirroring [`super::LocalFileSink`]
/// semantics. Object writes are atomic at object granularity.
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    compression: Compression,
}

impl ObjectStoreSink {
    pub fn new(
        endpoint: S3Endpoint,
        access_key_id: &str,
        secret_access_key: &str,
        bucket_name: &str,
        prefix: impl Into<String>,
        compression: Compression,
    ) -> HermesResult<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint.url())
            .with_region(endpoint.region())
            .with_bucket_name(bucket_name)
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_access_key)
            .build()
            .map_err(|e| SinkError::ObjectStoreBuild(e.to_string()))?;

        info!(
            endpoint = endpoint.url(),
            bucket = bucket_name,
            "ObjectStoreSink initialized"
        );

        Ok(Self {
            store: Arc::new(store),
            prefix: prefix.into(),
            compression,
        })
    }

    /// Wraps an already-built store. Test seam.
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        compression: Compression,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            compression,
        }
    }

    fn key_for(&self, symbol: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{symbol}.parquet", self.prefix))
    }
}

#[async_trait]
impl DataSink for ObjectStoreSink {
    async fn write(&self, symbol: &str, frame: DataFrame) -> HermesResult<()> {
        let key = self.key_for(symbol);
        let existing = self.read(symbol).await?;
        let merged = merge_and_deduplicate(frame, existing)?;
        let rows = merged.height();

        let bytes = Bytes::from(to_parquet_bytes(merged, self.compression)?);
        self.store
            .put(&key, bytes.into())
            .await
            .map_err(SinkError::from)?;

        info!(symbol, rows, key = %key, "Wrote frame");
        Ok(())
    }

    async fn read(&self, symbol: &str) -> HermesResult<Option<DataFrame>> {
        let key = self.key_for(symbol);
        let result = match self.store.get(&key).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                warn!(symbol, error = %e, "Error reading from object store");
                return Ok(None);
            }
        };
        let bytes = result.bytes().await.map_err(SinkError::from)?;
        Ok(Some(from_parquet_bytes(&bytes)?))
    }

    async fn exists(&self, symbol: &str) -> bool {
        self.store.head(&self.key_for(symbol)).await.is_ok()
    }

    async fn list_symbols(&self) -> HermesResult<Vec<String>> {
        let prefix = ObjectPath::from(self.prefix.clone());
        let objects: Vec<_> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(SinkError::from)?;

        let mut symbols: Vec<String> = objects
            .into_iter()
            .filter_map(|meta| {
                let name = meta.location.filename()?;
                name.strip_suffix(".parquet").map(str::to_string)
            })
            .collect();
        symbols.sort();
        Ok(symbols)
    }
}
