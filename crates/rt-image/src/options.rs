// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transform option parsing, dimension bucketing, and validation (spec
//! §4.10 bullets 1-2).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output image format (spec §3 output allowlist).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// WebP.
    Webp,
    /// JPEG (`jpg` alias accepted on input).
    Jpg,
    /// JPEG.
    Jpeg,
    /// PNG.
    Png,
    /// AVIF.
    Avif,
}

impl OutputFormat {
    /// Parse a format name, accepting the `jpg`/`jpeg` alias pair
    /// case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "webp" => Some(Self::Webp),
            "jpg" => Some(Self::Jpg),
            "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// MIME content type for this format.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Avif => "image/avif",
        }
    }
}

/// Resize fit mode (spec §3, default `cover`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Scale to fully cover the target box, center-cropping the overflow.
    #[default]
    Cover,
    /// Scale to fit entirely within the target box, no cropping.
    Contain,
    /// Stretch to the exact target box. Implemented as uniform scale
    /// (same as `Cover`) — a documented library-parity limitation, not a
    /// true non-uniform stretch; see `DESIGN.md`.
    Fill,
    /// Like `Contain`, but never upscales past the source size.
    Inside,
    /// Scale so the target box is fully contained within the image
    /// (the inverse of `Contain`), no cropping.
    Outside,
}

/// Raw, unvalidated transform request (the wire shape before bucketing).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TransformRequest {
    /// Requested width in pixels.
    pub width: Option<i64>,
    /// Requested height in pixels.
    pub height: Option<i64>,
    /// Requested output format name.
    pub format: Option<String>,
    /// Requested quality, 1-100.
    pub quality: Option<u8>,
    /// Requested fit mode name.
    pub fit: Option<String>,
}

/// A validated, bucketed transform intent (spec §3 `TransformOptions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Target width, after bucketing, if requested.
    pub width: Option<u32>,
    /// Target height, after bucketing, if requested.
    pub height: Option<u32>,
    /// Output format; `None` means "keep the source format".
    pub format: Option<OutputFormat>,
    /// Output quality, clamped to `1..=100`.
    pub quality: u8,
    /// Fit mode.
    pub fit: Fit,
}

/// Dimension and pixel-count limits enforced during validation (spec §4.10
/// bullet 2; mirrors [`rt_config::ImageConfig`](../rt_config/struct.ImageConfig.html)).
#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    /// Dimension bucket size in pixels.
    pub bucket_size: u32,
    /// Hard cap on output width.
    pub max_width: u32,
    /// Hard cap on output height.
    pub max_height: u32,
    /// Hard cap on width × height.
    pub max_total_pixels: u64,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            bucket_size: 50,
            max_width: 8192,
            max_height: 8192,
            max_total_pixels: 16_000_000,
        }
    }
}

/// Errors from option validation and transform execution (spec §4.10
/// "Errors are typed").
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// A requested dimension was negative, zero-after-bucketing, or
    /// otherwise malformed.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),
    /// The requested output format is not in the output allowlist.
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
    /// The input bytes could not be decoded as an image at all.
    #[error("input is not a decodable image: {0}")]
    NotAnImage(String),
    /// Decode succeeded but resize/encode failed.
    #[error("transform failed: {0}")]
    TransformFailed(String),
    /// Requested (or source) dimensions exceed `max_width`/`max_height`.
    #[error("image dimensions exceed the configured maximum")]
    ImageTooLarge,
    /// `width * height` exceeds `max_total_pixels`.
    #[error("pixel count exceeds the configured maximum")]
    TooManyPixels,
    /// The codec needed to encode the requested output format is not
    /// available in this build (spec's `ErrVipsNotInitialized`, generalized
    /// since this engine embeds a pure-Rust codec set rather than libvips).
    #[error("required image codec is not available: {0}")]
    CodecUnavailable(String),
}

/// Spec §4.10 bullet 1: allowlisted input content types (`;…` suffix
/// stripped, case-insensitive).
pub const TRANSFORMABLE_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/tiff",
    "image/bmp",
    "image/svg+xml",
    "image/avif",
];

/// `true` if `content_type` (ignoring a trailing `;…` parameter list and
/// case) is in the input allowlist.
#[must_use]
pub fn can_transform(content_type: &str) -> bool {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    TRANSFORMABLE_CONTENT_TYPES.contains(&base.as_str())
}

/// Quantize `d` to the nearest multiple of `bucket` (spec §8 universal
/// invariant: `bucket_dimension(d, b) mod b == 0` and
/// `|bucket_dimension(d, b) - d| <= b/2`).
#[must_use]
pub fn bucket_dimension(d: u32, bucket: u32) -> u32 {
    if bucket == 0 {
        return d;
    }
    let half = bucket / 2;
    ((d + half) / bucket) * bucket
}

/// Validate and bucket a raw request against `limits`.
///
/// Returns `Ok(None)` when neither dimension is requested and no format
/// change is requested — spec §4.10: "the call returns nil (no
/// transform)".
pub fn validate(
    req: &TransformRequest,
    limits: &ImageLimits,
) -> Result<Option<TransformOptions>, TransformError> {
    if req.width.is_none() && req.height.is_none() && req.format.is_none() {
        return Ok(None);
    }

    if let Some(w) = req.width
        && w < 0
    {
        return Err(TransformError::InvalidDimensions(format!(
            "width must not be negative: {w}"
        )));
    }
    if let Some(h) = req.height
        && h < 0
    {
        return Err(TransformError::InvalidDimensions(format!(
            "height must not be negative: {h}"
        )));
    }

    let width = req
        .width
        .map(|w| bucket_dimension(w as u32, limits.bucket_size));
    let height = req
        .height
        .map(|h| bucket_dimension(h as u32, limits.bucket_size));

    if let Some(w) = width
        && w > limits.max_width
    {
        return Err(TransformError::InvalidDimensions(format!(
            "width {w} exceeds max_width {}",
            limits.max_width
        )));
    }
    if let Some(h) = height
        && h > limits.max_height
    {
        return Err(TransformError::InvalidDimensions(format!(
            "height {h} exceeds max_height {}",
            limits.max_height
        )));
    }
    if let (Some(w), Some(h)) = (width, height)
        && (w as u64) * (h as u64) > limits.max_total_pixels
    {
        return Err(TransformError::InvalidDimensions(format!(
            "{w}x{h} exceeds max_total_pixels {}",
            limits.max_total_pixels
        )));
    }

    let format = match &req.format {
        Some(name) => Some(
            OutputFormat::parse(name)
                .ok_or_else(|| TransformError::UnsupportedFormat(name.clone()))?,
        ),
        None => None,
    };

    let quality = match req.quality {
        None | Some(0) => 80,
        Some(q) => q.clamp(1, 100),
    };

    let fit = match req.fit.as_deref() {
        None => Fit::Cover,
        Some("cover") => Fit::Cover,
        Some("contain") => Fit::Contain,
        Some("fill") => Fit::Fill,
        Some("inside") => Fit::Inside,
        Some("outside") => Fit::Outside,
        Some(other) => {
            return Err(TransformError::InvalidDimensions(format!(
                "unknown fit mode: {other}"
            )));
        }
    };

    Ok(Some(TransformOptions {
        width,
        height,
        format,
        quality,
        fit,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn can_transform_strips_params_and_ignores_case() {
        assert!(can_transform("image/jpeg"));
        assert!(can_transform("IMAGE/JPEG; charset=binary"));
        assert!(!can_transform("text/plain"));
    }

    #[test]
    fn no_dims_no_format_returns_none() {
        let req = TransformRequest::default();
        assert!(validate(&req, &ImageLimits::default()).unwrap().is_none());
    }

    #[test]
    fn negative_width_is_rejected() {
        let req = TransformRequest {
            width: Some(-1),
            ..Default::default()
        };
        assert!(matches!(
            validate(&req, &ImageLimits::default()),
            Err(TransformError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn oversized_pixel_count_is_rejected() {
        let req = TransformRequest {
            width: Some(8000),
            height: Some(8000),
            ..Default::default()
        };
        assert!(matches!(
            validate(&req, &ImageLimits::default()),
            Err(TransformError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn zero_quality_defaults_to_eighty() {
        let req = TransformRequest {
            width: Some(100),
            quality: Some(0),
            ..Default::default()
        };
        let opts = validate(&req, &ImageLimits::default()).unwrap().unwrap();
        assert_eq!(opts.quality, 80);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let req = TransformRequest {
            width: Some(100),
            format: Some("tiff".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            validate(&req, &ImageLimits::default()),
            Err(TransformError::UnsupportedFormat(_))
        ));
    }

    proptest! {
        #[test]
        fn bucketing_invariant_holds(d in 0u32..20000, b in 1u32..500) {
            let bucketed = bucket_dimension(d, b);
            prop_assert_eq!(bucketed % b, 0);
            let diff = if bucketed > d { bucketed - d } else { d - bucketed };
            prop_assert!(diff <= b / 2 + 1);
        }
    }
}
