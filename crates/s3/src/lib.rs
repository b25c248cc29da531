//! clonus-s3: S3 adapter for clonus
//!
//! Implements the `ObjectStore` trait from clonus-core on top of aws-sdk-s3.
//! Works with AWS and with S3-compatible services reachable through a custom
//! endpoint.

mod client;

pub use client::S3Client;
