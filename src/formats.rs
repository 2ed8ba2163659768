//! Output format taxonomy and the `AUTO`/`ORIGINAL` inheritance rule.
//!
//! Formats appear in three places with three spellings: the pixel engine
//! wants its own `image::ImageFormat`, storage wants a content type, and
//! filename templates want the standardized lowercase token (`jpg`, not
//! `JPEG`). This module is the single translation point.

use crate::errors::{ImageError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The formats a derived image can carry.
///
/// `Pdf` participates in the taxonomy (content types, filename tokens,
/// simple-access storage of externally produced files) but the pure-Rust
/// pixel engine neither decodes nor encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Pdf,
}

impl Format {
    /// Standardized lowercase token used in filename templates.
    pub fn standardized(self) -> &'static str {
        match self {
            Format::Jpeg => "jpg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Pdf => "pdf",
        }
    }

    /// Content type sent to storage backends.
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Pdf => "application/pdf",
        }
    }

    /// Parse a filename extension or format name, case-insensitively.
    pub fn from_extension(ext: &str) -> Result<Format> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Format::Jpeg),
            "png" => Ok(Format::Png),
            "gif" => Ok(Format::Gif),
            "pdf" => Ok(Format::Pdf),
            other => Err(ImageError::Parsing(format!(
                "unrecognized image format `{other}`"
            ))),
        }
    }

    /// Graphic formats (flat color, palettes, transparency) as opposed to
    /// photographic ones. Drives the `AUTO`/`ORIGINAL` inheritance rule.
    pub fn is_graphic(self) -> bool {
        matches!(self, Format::Png | Format::Gif)
    }

    /// The pixel engine's encoder format, where one exists.
    pub fn encoder_format(self) -> Option<image::ImageFormat> {
        match self {
            Format::Jpeg => Some(image::ImageFormat::Jpeg),
            Format::Png => Some(image::ImageFormat::Png),
            Format::Gif => Some(image::ImageFormat::Gif),
            Format::Pdf => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.standardized())
    }
}

/// A schema entry's requested output format: a concrete format, or one of
/// the sentinels that inherit from the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatSpec {
    /// Pick a sensible format from the source: graphic sources stay PNG,
    /// everything else becomes JPEG.
    Auto,
    /// Same resolution rule as `Auto`; kept as a distinct spelling.
    Original,
    Explicit(Format),
}

impl FormatSpec {
    /// Parse `"AUTO"`, `"ORIGINAL"`, or a format name, case-insensitively.
    pub fn parse(token: &str) -> Result<FormatSpec> {
        match token.to_ascii_uppercase().as_str() {
            "AUTO" => Ok(FormatSpec::Auto),
            "ORIGINAL" => Ok(FormatSpec::Original),
            _ => Format::from_extension(token).map(FormatSpec::Explicit),
        }
    }

    /// Resolve against the source image's format.
    ///
    /// Collapses GIF sources to PNG, so an animated GIF resolved through
    /// `Auto` comes out as a single-frame PNG; animated output requires an
    /// explicit GIF format plus the `allow_animated` opt-in.
    pub fn resolve(self, original: Format) -> Format {
        match self {
            FormatSpec::Explicit(format) => format,
            FormatSpec::Auto | FormatSpec::Original => {
                if original.is_graphic() {
                    Format::Png
                } else {
                    Format::Jpeg
                }
            }
        }
    }
}

impl Default for FormatSpec {
    fn default() -> Self {
        FormatSpec::Explicit(Format::Jpeg)
    }
}

impl TryFrom<String> for FormatSpec {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self> {
        FormatSpec::parse(&value)
    }
}

impl From<FormatSpec> for String {
    fn from(spec: FormatSpec) -> String {
        match spec {
            FormatSpec::Auto => "AUTO".to_string(),
            FormatSpec::Original => "ORIGINAL".to_string(),
            FormatSpec::Explicit(format) => format.standardized().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardized_tokens_are_lowercase() {
        assert_eq!(Format::Jpeg.standardized(), "jpg");
        assert_eq!(Format::Png.standardized(), "png");
        assert_eq!(Format::Gif.standardized(), "gif");
        assert_eq!(Format::Pdf.standardized(), "pdf");
    }

    #[test]
    fn extension_parsing_accepts_both_jpeg_spellings() {
        assert_eq!(Format::from_extension("jpg").unwrap(), Format::Jpeg);
        assert_eq!(Format::from_extension("JPEG").unwrap(), Format::Jpeg);
    }

    #[test]
    fn unknown_extension_is_a_parsing_error() {
        assert!(matches!(
            Format::from_extension("tiff"),
            Err(ImageError::Parsing(_))
        ));
    }

    #[test]
    fn auto_resolves_graphic_sources_to_png() {
        assert_eq!(FormatSpec::Auto.resolve(Format::Png), Format::Png);
        assert_eq!(FormatSpec::Auto.resolve(Format::Gif), Format::Png);
    }

    #[test]
    fn auto_resolves_photographic_sources_to_jpeg() {
        assert_eq!(FormatSpec::Auto.resolve(Format::Jpeg), Format::Jpeg);
        assert_eq!(FormatSpec::Auto.resolve(Format::Pdf), Format::Jpeg);
    }

    #[test]
    fn original_follows_the_same_rule_as_auto() {
        assert_eq!(FormatSpec::Original.resolve(Format::Gif), Format::Png);
        assert_eq!(FormatSpec::Original.resolve(Format::Jpeg), Format::Jpeg);
    }

    #[test]
    fn explicit_passes_through_untouched() {
        assert_eq!(
            FormatSpec::Explicit(Format::Gif).resolve(Format::Jpeg),
            Format::Gif
        );
    }

    #[test]
    fn spec_parses_sentinels_case_insensitively() {
        assert_eq!(FormatSpec::parse("auto").unwrap(), FormatSpec::Auto);
        assert_eq!(FormatSpec::parse("Original").unwrap(), FormatSpec::Original);
        assert_eq!(
            FormatSpec::parse("JPEG").unwrap(),
            FormatSpec::Explicit(Format::Jpeg)
        );
    }

    #[test]
    fn content_types() {
        assert_eq!(Format::Jpeg.content_type(), "image/jpeg");
        assert_eq!(Format::Pdf.content_type(), "application/pdf");
    }
}
