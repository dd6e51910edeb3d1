// SPDX-License-Identifier: MIT OR Apache-2.0
//! Storage provider contract and path guard (spec C7).
//!
//! This crate only defines the shape: [`Provider`] (the uniform blob
//! operation contract), [`ChunkedUpload`] (the secondary multipart
//! capability), the shared data model ([`Object`] and friends), and the
//! filesystem [`path_guard`] the local backend uses to reject traversal.
//! Concrete backends live in `rt-storage-local` and `rt-storage-s3`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod object;
mod provider;

pub mod path_guard;

pub use object::{
    ByteRange, ChunkedUploadSession, ChunkedUploadStatus, DownloadOptions, ListOptions,
    ListResult, Object, SignedUrlOptions, SignedUrlTransform, UploadOptions,
};
pub use provider::{BoxAsyncRead, ChunkUploadResult, ChunkedUpload, Provider};
