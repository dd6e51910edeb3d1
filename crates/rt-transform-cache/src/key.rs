// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cache-key derivation (spec §4.11: `SHA-256(bucket/key:W:H:fmt:Q:fit)`).

use rt_image::{Fit, OutputFormat, TransformOptions};
use sha2::{Digest, Sha256};

/// Derive the hex cache key for `(bucket, key)` under the given transform
/// options. Width/height/format are rendered empty when absent, matching
/// the source request's own "no-op on that axis" meaning.
#[must_use]
pub fn cache_key(bucket: &str, key: &str, opts: &TransformOptions) -> String {
    let width = opts.width.map(|w| w.to_string()).unwrap_or_default();
    let height = opts.height.map(|h| h.to_string()).unwrap_or_default();
    let format = opts.format.map(format_str).unwrap_or_default();
    let fit = fit_str(opts.fit);

    let canonical = format!("{bucket}/{key}:{width}:{height}:{format}:{}:{fit}", opts.quality);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn format_str(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Webp => "webp",
        OutputFormat::Jpg => "jpg",
        OutputFormat::Jpeg => "jpeg",
        OutputFormat::Png => "png",
        OutputFormat::Avif => "avif",
    }
}

fn fit_str(fit: Fit) -> &'static str {
    match fit {
        Fit::Cover => "cover",
        Fit::Contain => "contain",
        Fit::Fill => "fill",
        Fit::Inside => "inside",
        Fit::Outside => "outside",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_the_same_key() {
        let opts = TransformOptions {
            width: Some(100),
            height: Some(200),
            format: Some(OutputFormat::Webp),
            quality: 80,
            fit: Fit::Cover,
        };
        assert_eq!(cache_key("b", "k", &opts), cache_key("b", "k", &opts));
    }

    #[test]
    fn differing_options_produce_different_keys() {
        let base = TransformOptions {
            width: Some(100),
            height: Some(200),
            format: Some(OutputFormat::Webp),
            quality: 80,
            fit: Fit::Cover,
        };
        let mut other = base;
        other.quality = 81;
        assert_ne!(cache_key("b", "k", &base), cache_key("b", "k", &other));
    }

    #[test]
    fn key_is_64_hex_characters() {
        let opts = TransformOptions {
            width: None,
            height: None,
            format: None,
            quality: 80,
            fit: Fit::Cover,
        };
        let key = cache_key("b", "k", &opts);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
