use std::sync::Arc;

use crate::{
    config::{Settings, SinkType},
    error::{ConfigError, HermesResult},
    sink::{DataSink, LocalFileSink, ObjectStoreSink, S3Endpoint},
};

/// Builds the configured sink backend.
pub fn build_sink(settings: &Settings) -> HermesResult<Arc<dyn DataSink>> {
    match settings.sink_type {
        SinkType::Local => Ok(Arc::new(LocalFileSink::new(
            settings.sink_path.clone(),
            settings.compression,
        )?)),
        SinkType::CloudflareR2 => {
            let r2 = &settings.r2;
            let account_id = require(&r2.account_id, "HERMES_R2_ACCOUNT_ID")?;
            let access_key_id = require(&r2.access_key_id, "HERMES_R2_ACCESS_KEY_ID")?;
            let secret = require(&r2.secret_access_key, "HERMES_R2_SECRET_ACCESS_KEY")?;
            Ok(Arc::new(ObjectStoreSink::new(
                S3Endpoint::CloudflareR2 {
                    account_id: account_id.to_string(),
                },
                access_key_id,
                secret,
                &r2.bucket_name,
                r2.prefix.clone(),
                settings.compression,
            )?))
        }
        SinkType::OracleObjectStorage => {
            let oci = &settings.oci;
            let namespace = require(&oci.namespace, "HERMES_OCI_NAMESPACE")?;
            let region = require(&oci.region, "HERMES_OCI_REGION")?;
            let access_key_id = require(&oci.access_key_id, "HERMES_OCI_ACCESS_KEY_ID")?;
            let secret = require(&oci.secret_access_key, "HERMES_OCI_SECRET_ACCESS_KEY")?;
            Ok(Arc::new(ObjectStoreSink::new(
                S3Endpoint::Oracle {
                    namespace: namespace.to_string(),
                    region: region.to_string(),
                },
                access_key_id,
                secret,
                &oci.bucket_name,
                oci.prefix.clone(),
                settings.compression,
            )?))
        }
    }
}

fn require<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .ok_or_else(|| ConfigError::MissingSetting(key.to_string()))
}
