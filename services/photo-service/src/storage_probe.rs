use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Object storage connectivity failure
#[derive(Debug, Error)]
#[error("S3 connectivity check failed: {0}")]
pub struct ProbeError(pub String);

/// Diagnostic check against object storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProbe: Send + Sync {
    /// Names of the buckets visible to the configured credentials
    async fn list_buckets(&self) -> Result<Vec<String>, ProbeError>;
}

/// S3 implementation of [`StorageProbe`]
pub struct S3StorageProbe {
    client: S3Client,
}

impl S3StorageProbe {
    /// Create a probe. No request is made until [`StorageProbe::list_buckets`].
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(RetryConfig::disabled());

        // Static keys take precedence over the default provider chain
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key.expose_secret(),
                None,
                None,
                "photo-service-config",
            ));
        }

        let aws_config = loader.load().await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "S3 probe initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl StorageProbe for S3StorageProbe {
    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<String>, ProbeError> {
        let response = self.client.list_buckets().send().await.map_err(|e| {
            let message = DisplayErrorContext(&e).to_string();
            warn!(error = %message, "S3 bucket listing failed");
            metrics::counter!("photos.probe.failures").increment(1);
            ProbeError(message)
        })?;

        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(String::from))
            .collect())
    }
}
