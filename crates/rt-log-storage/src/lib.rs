// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified log entry model and three interchangeable [`LogStorage`]
//! backends (spec C12 "Log Storage Tier"): Postgres, S3-compatible NDJSON
//! chunks, and local-filesystem NDJSON.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod local;
mod postgres;
mod s3;
mod storage;

pub use entry::{
    is_static_asset_path, LogCategory, LogEntry, LogLevel, LogQueryOptions, LogQueryResult,
    LogStorageStats, STATIC_ASSET_EXTENSIONS,
};
pub use local::{stream_execution_logs, LocalLogStorage};
pub use postgres::PostgresLogStorage;
pub use s3::S3LogStorage;
pub use storage::LogStorage;
