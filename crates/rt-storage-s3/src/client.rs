// SPDX-License-Identifier: MIT OR Apache-2.0
//! S3 client construction (spec §4.9 "S3-compatible backend").

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client;

/// Connection parameters for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    /// Endpoint URL override, for non-AWS S3-compatible services (e.g.
    /// MinIO). `None` uses AWS's default endpoint resolution.
    pub endpoint: Option<String>,
    /// AWS region (or a placeholder region for non-AWS endpoints).
    pub region: String,
    /// Static access key id.
    pub access_key_id: String,
    /// Static secret access key.
    pub secret_access_key: String,
    /// Use path-style addressing (`https://host/bucket/key`) instead of
    /// virtual-hosted style (`https://bucket.host/key`); required by most
    /// non-AWS S3-compatible services.
    pub force_path_style: bool,
}

/// Build a client from static credentials (spec §9: no credential-chain
/// discovery — this system takes credentials from its own config layer).
#[must_use]
pub fn build_client(config: &S3ClientConfig) -> Client {
    let credentials = Credentials::new(
        &config.access_key_id,
        &config.secret_access_key,
        None,
        None,
        "rt-storage-s3",
    );

    let mut builder = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .force_path_style(config.force_path_style);

    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    Client::from_conf(builder.build())
}
