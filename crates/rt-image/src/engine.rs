// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decode -> resize -> re-encode pipeline (spec §4.10 bullets 3-5).

use crate::options::{Fit, ImageLimits, OutputFormat, TransformError, TransformOptions};
use image::{DynamicImage, GenericImageView, ImageFormat, imageops::FilterType};
use std::io::Cursor;

/// Product of a successful transform (spec §3 `TransformResult`).
#[derive(Debug, Clone)]
pub struct TransformResult {
    /// Re-encoded image bytes.
    pub data: Vec<u8>,
    /// MIME content type of `data`.
    pub content_type: String,
    /// Actual output width.
    pub width: u32,
    /// Actual output height.
    pub height: u32,
}

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// Run the full decode/resize/re-encode pipeline.
///
/// This is CPU-bound, synchronous work (the `image` crate has no async
/// API); callers on an async runtime should wrap this in
/// `tokio::task::spawn_blocking`.
pub fn transform(
    data: &[u8],
    source_content_type: &str,
    opts: &TransformOptions,
    limits: &ImageLimits,
) -> Result<TransformResult, TransformError> {
    if !crate::options::can_transform(source_content_type) {
        return Err(TransformError::UnsupportedFormat(
            source_content_type.to_string(),
        ));
    }

    let source_format = guess_format(source_content_type);
    let image = match source_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt),
        None => image::load_from_memory(data),
    }
    .map_err(|e| TransformError::NotAnImage(e.to_string()))?;

    let (src_w, src_h) = image.dimensions();
    if src_w > limits.max_width || src_h > limits.max_height {
        return Err(TransformError::ImageTooLarge);
    }
    if (src_w as u64) * (src_h as u64) > limits.max_total_pixels {
        return Err(TransformError::TooManyPixels);
    }

    let (target_w, target_h) = resolve_target_dimensions(src_w, src_h, opts.width, opts.height);

    let output_format = opts.format.unwrap_or_else(|| {
        source_format_to_output(source_format).unwrap_or(OutputFormat::Png)
    });

    let needs_resize = target_w != src_w || target_h != src_h;
    let resized = if needs_resize {
        resize(&image, target_w, target_h, opts.fit)
    } else {
        image
    };

    let (out_w, out_h) = resized.dimensions();
    let encoded = encode(&resized, output_format, opts.quality)?;

    Ok(TransformResult {
        data: encoded,
        content_type: output_format.content_type().to_string(),
        width: out_w,
        height: out_h,
    })
}

/// Derive target dimensions from requested width/height and source aspect
/// ratio (spec §4.10 bullet 3: "Target dimensions are derived from source
/// aspect ratio when only one axis is provided").
fn resolve_target_dimensions(
    src_w: u32,
    src_h: u32,
    req_w: Option<u32>,
    req_h: Option<u32>,
) -> (u32, u32) {
    match (req_w, req_h) {
        (Some(w), Some(h)) => (w.max(1), h.max(1)),
        (Some(w), None) => {
            let h = ((w as f64) * (src_h as f64) / (src_w as f64)).round().max(1.0) as u32;
            (w.max(1), h)
        }
        (None, Some(h)) => {
            let w = ((h as f64) * (src_w as f64) / (src_h as f64)).round().max(1.0) as u32;
            (w, h.max(1))
        }
        (None, None) => (src_w, src_h),
    }
}

/// Apply the requested [`Fit`] mode (spec §4.10 bullet "Fit semantics").
fn resize(image: &DynamicImage, target_w: u32, target_h: u32, fit: Fit) -> DynamicImage {
    let (src_w, src_h) = image.dimensions();
    match fit {
        // `Fill` is implemented as uniform scale, same as `Cover` — a
        // documented library-parity limitation (DESIGN.md Open Question 2),
        // not a true non-uniform stretch.
        Fit::Cover | Fit::Fill => image.resize_to_fill(target_w, target_h, RESIZE_FILTER),
        Fit::Contain => image.resize(target_w, target_h, RESIZE_FILTER),
        Fit::Inside => {
            if target_w >= src_w && target_h >= src_h {
                image.clone()
            } else {
                image.resize(target_w, target_h, RESIZE_FILTER)
            }
        }
        Fit::Outside => {
            let h_scale = target_w as f64 / src_w as f64;
            let v_scale = target_h as f64 / src_h as f64;
            let scale = h_scale.max(v_scale);
            let w = ((src_w as f64) * scale).round().max(1.0) as u32;
            let h = ((src_h as f64) * scale).round().max(1.0) as u32;
            image.resize_exact(w, h, RESIZE_FILTER)
        }
    }
}

fn guess_format(content_type: &str) -> Option<ImageFormat> {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/webp" => Some(ImageFormat::WebP),
        "image/gif" => Some(ImageFormat::Gif),
        "image/tiff" => Some(ImageFormat::Tiff),
        "image/bmp" => Some(ImageFormat::Bmp),
        "image/avif" => Some(ImageFormat::Avif),
        _ => None,
    }
}

fn source_format_to_output(fmt: Option<ImageFormat>) -> Option<OutputFormat> {
    match fmt? {
        ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::WebP => Some(OutputFormat::Webp),
        ImageFormat::Avif => Some(OutputFormat::Avif),
        _ => None,
    }
}

/// Re-encode with per-format parameters derived from the quality knob
/// (spec §4.10 bullet "Output is re-encoded...").
fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, TransformError> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpg | OutputFormat::Jpeg => {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            image
                .write_with_encoder(encoder)
                .map_err(|e| TransformError::TransformFailed(e.to_string()))?;
        }
        OutputFormat::Png => {
            // Map the 1-100 quality knob onto PNG's compression levels:
            // high "quality" means spend more effort on a smaller file.
            let compression = if quality >= 90 {
                image::codecs::png::CompressionType::Best
            } else if quality >= 40 {
                image::codecs::png::CompressionType::Default
            } else {
                image::codecs::png::CompressionType::Fast
            };
            let encoder = image::codecs::png::PngEncoder::new_with_quality(
                &mut buf,
                compression,
                image::codecs::png::FilterType::Adaptive,
            );
            image
                .write_with_encoder(encoder)
                .map_err(|e| TransformError::TransformFailed(e.to_string()))?;
        }
        OutputFormat::Webp => {
            let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buf);
            image
                .write_with_encoder(encoder)
                .map_err(|e| TransformError::TransformFailed(e.to_string()))?;
        }
        OutputFormat::Avif => {
            // Speed 5 per spec §4.10; quality is passed through directly.
            let encoder =
                image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut buf, 5, quality);
            image.write_with_encoder(encoder).map_err(|e| {
                TransformError::CodecUnavailable(format!("avif encoder failed: {e}"))
            })?;
        }
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ImageLimits;

    fn make_png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(w, h);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn rejects_non_image_bytes() {
        let opts = TransformOptions {
            width: Some(10),
            height: Some(10),
            format: None,
            quality: 80,
            fit: Fit::Cover,
        };
        let err = transform(b"not an image", "image/png", &opts, &ImageLimits::default())
            .unwrap_err();
        assert!(matches!(err, TransformError::NotAnImage(_)));
    }

    #[test]
    fn resizes_and_reencodes_to_target_dimensions() {
        let png = make_png(200, 100);
        let opts = TransformOptions {
            width: Some(50),
            height: Some(50),
            format: Some(OutputFormat::Png),
            quality: 80,
            fit: Fit::Cover,
        };
        let result = transform(&png, "image/png", &opts, &ImageLimits::default()).unwrap();
        assert_eq!(result.width, 50);
        assert_eq!(result.height, 50);
        assert_eq!(result.content_type, "image/png");
    }

    #[test]
    fn derives_missing_axis_from_aspect_ratio() {
        let png = make_png(200, 100);
        let opts = TransformOptions {
            width: Some(100),
            height: None,
            format: Some(OutputFormat::Png),
            quality: 80,
            fit: Fit::Contain,
        };
        let result = transform(&png, "image/png", &opts, &ImageLimits::default()).unwrap();
        assert_eq!(result.width, 100);
        assert_eq!(result.height, 50);
    }

    #[test]
    fn inside_never_upscales() {
        let png = make_png(50, 50);
        let opts = TransformOptions {
            width: Some(500),
            height: Some(500),
            format: Some(OutputFormat::Png),
            quality: 80,
            fit: Fit::Inside,
        };
        let result = transform(&png, "image/png", &opts, &ImageLimits::default()).unwrap();
        assert_eq!(result.width, 50);
        assert_eq!(result.height, 50);
    }

    #[test]
    fn oversized_source_is_rejected() {
        let limits = ImageLimits {
            max_width: 10,
            ..ImageLimits::default()
        };
        let png = make_png(200, 100);
        let opts = TransformOptions {
            width: Some(5),
            height: Some(5),
            format: None,
            quality: 80,
            fit: Fit::Cover,
        };
        let err = transform(&png, "image/png", &opts, &limits).unwrap_err();
        assert!(matches!(err, TransformError::ImageTooLarge));
    }
}
