// SPDX-License-Identifier: MIT OR Apache-2.0
//! Size-bounded decode -> resize -> re-encode pipeline with dimension
//! bucketing (spec C10).
//!
//! [`validate`] turns a raw [`TransformRequest`] into bucketed, limit-checked
//! [`TransformOptions`] (or `None` if no transform is requested);
//! [`transform`] runs the actual pipeline against decoded bytes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod options;

pub use engine::{TransformResult, transform};
pub use options::{
    Fit, ImageLimits, OutputFormat, TRANSFORMABLE_CONTENT_TYPES, TransformError, TransformOptions,
    TransformRequest, bucket_dimension, can_transform, validate,
};
