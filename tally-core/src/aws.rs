//! Shared AWS SDK configuration for the S3 and Bedrock clients.
//!
//! Credentials always come from the default provider chain (environment,
//! `~/.aws/credentials`, SSO, instance role). The `[aws]` section only pins
//! region, profile, endpoint and retry attempts.

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};

use crate::config::AwsConfig;

/// Load the shared SDK configuration described by `[aws]`.
pub async fn load_sdk_config(config: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)));

    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(profile) = &config.profile {
        loader = loader.profile_name(profile);
    }
    if let Some(endpoint) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;

    tracing::debug!(
        region = sdk_config.region().map(|r| r.as_ref()).unwrap_or("<unset>"),
        max_attempts = config.max_attempts,
        "Loaded AWS SDK configuration"
    );

    sdk_config
}

/// Build an S3 client, honouring `force_path_style` for S3-compatible endpoints.
pub fn s3_client(sdk_config: &SdkConfig, config: &AwsConfig) -> aws_sdk_s3::Client {
    let s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
        .force_path_style(config.force_path_style)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

/// Build a Bedrock runtime client.
pub fn bedrock_client(sdk_config: &SdkConfig) -> aws_sdk_bedrockruntime::Client {
    aws_sdk_bedrockruntime::Client::new(sdk_config)
}
