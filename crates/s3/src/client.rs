//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from clonus-core.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration, ObjectCannedAcl,
};
use clonus_core::{
    AccessPolicy, Config, Error, ListPage, ObjectStore, ObjectSummary, RemoteMetadata, Result,
};

/// Object metadata entry holding the local modification time
const MTIME_METADATA_KEY: &str = "mtime";

/// Error codes that mean the credentials were rejected
const AUTH_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "AccountProblem",
];

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    region: String,
}

impl S3Client {
    /// Create a new S3 client from the backup configuration
    ///
    /// Static credentials are used when configured, otherwise the default
    /// AWS provider chain (environment, profile, instance metadata).
    pub async fn new(config: &Config) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(creds) = &config.credentials {
            let credentials = aws_credential_types::Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                None, // session token
                None, // expiry
                "clonus-static-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        tracing::debug!(
            region = %config.region,
            endpoint = config.endpoint.as_deref().unwrap_or("default"),
            path_style = config.path_style,
            "Created S3 client"
        );

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            region: config.region.clone(),
        })
    }

    /// Format AWS SDK error into a detailed error message
    fn format_sdk_error<E>(error: &SdkError<E>) -> String
    where
        E: std::fmt::Display + ProvideErrorMetadata,
    {
        match error {
            SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let mut msg = format!("Service error: {err}");
                if let Some(code) = err.code() {
                    msg.push_str(&format!(" (code: {code})"));
                }
                msg.push_str(&format!(" [HTTP {}]", service_err.raw().status().as_u16()));
                msg
            }
            SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {err:?}")
            }
            SdkError::TimeoutError(_) => "Request timeout".to_string(),
            SdkError::DispatchFailure(err) => {
                format!("Network dispatch error: {err:?}")
            }
            SdkError::ResponseError(err) => {
                format!("Response error: {err:?}")
            }
            _ => error.to_string(),
        }
    }

    /// Map an SDK error onto the engine's error taxonomy
    fn map_sdk_error<E>(error: SdkError<E>) -> Error
    where
        E: std::fmt::Display + ProvideErrorMetadata,
    {
        let message = Self::format_sdk_error(&error);
        match error.code() {
            Some(code) if is_auth_code(code) => Error::Auth(message),
            Some("NoSuchBucket") => Error::Bucket(message),
            _ => Error::Network(message),
        }
    }
}

fn is_auth_code(code: &str) -> bool {
    AUTH_ERROR_CODES.contains(&code)
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn strip_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn create_bucket(&self, bucket: &str, acl: Option<AccessPolicy>) -> Result<()> {
        let mut request = self.inner.create_bucket().bucket(bucket);

        if let Some(acl) = acl {
            request = request.acl(BucketCannedAcl::from(acl.as_str()));
        }

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            let configuration = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            request = request.create_bucket_configuration(configuration);
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket, "Created bucket");
                Ok(())
            }
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|s| s.is_bucket_already_owned_by_you()) =>
            {
                tracing::debug!(bucket, "Bucket already exists");
                if let Some(acl) = acl {
                    self.inner
                        .put_bucket_acl()
                        .bucket(bucket)
                        .acl(BucketCannedAcl::from(acl.as_str()))
                        .send()
                        .await
                        .map_err(Self::map_sdk_error)?;
                }
                Ok(())
            }
            Err(e) => Err(Self::map_sdk_error(e)),
        }
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<RemoteMetadata>> {
        let response = match self.inner.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => {
                return Ok(None);
            }
            Err(e) => return Err(Self::map_sdk_error(e)),
        };

        // Objects written by other tools carry no mtime and never match
        let mtime = response
            .metadata()
            .and_then(|m| m.get(MTIME_METADATA_KEY))
            .cloned()
            .unwrap_or_default();
        let size = response.content_length().unwrap_or(0).max(0);
        let etag = response.e_tag().map(strip_etag).unwrap_or_default();

        Ok(Some(RemoteMetadata {
            mtime,
            size: size.to_string(),
            etag,
        }))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        mtime: i64,
        acl: Option<AccessPolicy>,
    ) -> Result<()> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

        let mut request = self
            .inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(source))
            .metadata(MTIME_METADATA_KEY, mtime.to_string());

        if let Some(acl) = acl {
            request = request.acl(ObjectCannedAcl::from(acl.as_str()));
        }

        let response = request.send().await.map_err(Self::map_sdk_error)?;
        tracing::trace!(key, etag = response.e_tag().unwrap_or_default(), "Stored object");

        Ok(())
    }

    async fn set_object_acl(&self, bucket: &str, key: &str, acl: AccessPolicy) -> Result<()> {
        self.inner
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(acl.as_str()))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;

        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;

        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let response = self
            .inner
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    etag: object.e_tag().map(strip_etag).unwrap_or_default(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let continuation_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(|s| s.to_string())
        } else {
            None
        };

        Ok(ListPage {
            objects,
            continuation_token,
        })
    }
}
