//! Decode-once image wrapping and derived-image production.
//!
//! [`ImageWrapper`] reads a payload exactly once, keeps both the decoded
//! pixels and the original encoded bytes, and answers any number of
//! independent [`resize`](ImageWrapper::resize) calls without mutating
//! itself. Decoding is eager: corrupt payloads fail at construction, not
//! later in the middle of a resize loop.
//!
//! [`DerivedImage`] is the unit everything downstream consumes: one owned
//! byte buffer plus the metadata persistence needs (format, dimensions,
//! checksum). Buffers are never shared between derived images.

use crate::errors::{ImageError, Result};
use crate::formats::Format;
use crate::geometry::{self, Resolution};
use crate::params::{EncoderOptions, ResizeInstruction};
use crate::source::ImageSource;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::gif::{GifDecoder, GifEncoder};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, Frame};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// Default JPEG quality when the instruction does not set one.
const DEFAULT_JPEG_QUALITY: u8 = 75;

/// One produced image: an owned encoded buffer plus its metadata.
#[derive(Debug, Clone)]
pub struct DerivedImage {
    bytes: Vec<u8>,
    format: Format,
    width: Option<u32>,
    height: Option<u32>,
    color: Option<ColorType>,
    name: Option<String>,
    animated: bool,
    frame_count: Option<u32>,
    is_optimized: Option<bool>,
    optimization_savings: u64,
    optimizations: Vec<(String, bool)>,
}

impl DerivedImage {
    /// Wrap already-encoded bytes without decoding them. Used for ad-hoc
    /// storage of files the pipeline did not produce (e.g. a PDF).
    pub fn from_parts(bytes: Vec<u8>, format: Format, name: Option<String>) -> DerivedImage {
        DerivedImage {
            bytes,
            format,
            width: None,
            height: None,
            color: None,
            name,
            animated: false,
            frame_count: None,
            is_optimized: None,
            optimization_savings: 0,
            optimizations: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_encoded(
        bytes: Vec<u8>,
        format: Format,
        width: u32,
        height: u32,
        color: ColorType,
        name: Option<String>,
        animated: bool,
        frame_count: Option<u32>,
    ) -> DerivedImage {
        DerivedImage {
            bytes,
            format,
            width: Some(width),
            height: Some(height),
            color: Some(color),
            name,
            animated,
            frame_count,
            is_optimized: None,
            optimization_savings: 0,
            optimizations: Vec::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn color(&self) -> Option<ColorType> {
        self.color
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_animated(&self) -> bool {
        self.animated
    }

    pub fn frame_count(&self) -> Option<u32> {
        self.frame_count
    }

    /// Size of the encoded buffer in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 of the encoded bytes, hex-encoded. Reported to logger hooks.
    pub fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }

    /// Base64 of the encoded bytes, for handing off through message brokers.
    pub fn as_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// `Some(true)` once an optimizer pass shrank this image, `Some(false)`
    /// once a pass ran without improvement, `None` before any pass.
    pub fn is_optimized(&self) -> Option<bool> {
        self.is_optimized
    }

    /// Bytes saved by the most recent optimizer pass.
    pub fn optimization_savings(&self) -> u64 {
        self.optimization_savings
    }

    /// Per-tool outcomes of the most recent optimizer pass.
    pub fn optimizations(&self) -> &[(String, bool)] {
        &self.optimizations
    }

    pub(crate) fn record_optimization(
        &mut self,
        outcomes: Vec<(String, bool)>,
        optimized: Option<Vec<u8>>,
    ) {
        self.optimizations = outcomes;
        match optimized {
            Some(new_bytes) => {
                self.optimization_savings = self.len().saturating_sub(new_bytes.len() as u64);
                self.bytes = new_bytes;
                self.is_optimized = Some(true);
            }
            None => {
                self.optimization_savings = 0;
                self.is_optimized = Some(false);
            }
        }
    }
}

/// A placeholder carrying only the metadata needed to plan filenames, with
/// no real bytes behind it. Produced by fake resizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakedImage {
    format: Format,
    width: Option<u32>,
    height: Option<u32>,
    name: Option<String>,
}

impl FakedImage {
    /// A placeholder for an original file, its format taken from the
    /// filename extension.
    pub fn from_filename(filename: &str) -> Result<FakedImage> {
        let extension = filename.rsplit('.').next().unwrap_or_default();
        Ok(FakedImage {
            format: Format::from_extension(extension)?,
            width: None,
            height: None,
            name: Some(filename.to_string()),
        })
    }

    /// A placeholder for a derivative, dimensions taken from the schema.
    pub fn from_schema(format: Format, width: Option<u32>, height: Option<u32>) -> FakedImage {
        FakedImage {
            format,
            width,
            height,
            name: None,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Owns one decoded source image and produces derivatives from it.
pub struct ImageWrapper {
    pixels: DynamicImage,
    original: DerivedImage,
}

impl std::fmt::Debug for ImageWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageWrapper")
            .field("width", &self.pixels.width())
            .field("height", &self.pixels.height())
            .field("format", &self.original.format())
            .finish()
    }
}

impl ImageWrapper {
    /// Read and decode a payload. The whole payload is buffered and fully
    /// decoded here so bad inputs fail immediately.
    pub fn new(mut source: ImageSource) -> Result<ImageWrapper> {
        let name = source.name().map(str::to_owned);
        let data = source.read_all()?;
        ImageWrapper::from_bytes(data, name)
    }

    /// Decode an owned buffer directly.
    pub fn from_bytes(data: Vec<u8>, name: Option<String>) -> Result<ImageWrapper> {
        let guessed = image::guess_format(&data)
            .map_err(|err| ImageError::Parsing(format!("unrecognized image data: {err}")))?;
        let format = match guessed {
            image::ImageFormat::Jpeg => Format::Jpeg,
            image::ImageFormat::Png => Format::Png,
            image::ImageFormat::Gif => Format::Gif,
            other => {
                return Err(ImageError::Parsing(format!(
                    "unsupported source format {other:?}"
                )))
            }
        };

        let frame_count = if format == Format::Gif {
            Some(count_gif_frames(&data)?)
        } else {
            None
        };
        let animated = frame_count.is_some_and(|count| count > 1);

        let pixels = image::load_from_memory_with_format(&data, guessed)
            .map_err(|err| ImageError::Parsing(format!("could not decode image: {err}")))?;

        let original = DerivedImage::from_encoded(
            data,
            format,
            pixels.width(),
            pixels.height(),
            pixels.color(),
            name,
            animated,
            frame_count,
        );

        Ok(ImageWrapper { pixels, original })
    }

    /// The original as first decoded, backed by the raw encoded bytes.
    pub fn original(&self) -> &DerivedImage {
        &self.original
    }

    /// A caller-owned copy of the original.
    pub fn get_original(&self) -> DerivedImage {
        self.original.clone()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub(crate) fn original_mut(&mut self) -> &mut DerivedImage {
        &mut self.original
    }

    /// Produce one derivative. Side-effect free: every call works from the
    /// wrapper's canonical pixels and returns a brand-new image.
    pub fn resize(&self, instruction: &ResizeInstruction) -> Result<DerivedImage> {
        if self.original.is_animated() && !instruction.allow_animated {
            return Err(ImageError::Resize(format!(
                "source is animated ({} frames) and the instruction does not allow it",
                self.original.frame_count().unwrap_or(0)
            )));
        }

        let source_size = (self.pixels.width(), self.pixels.height());
        let resolution = if instruction.method.requires_box() {
            geometry::resolve(source_size, instruction.target_box()?, instruction.method)?
        } else {
            Resolution {
                width: source_size.0,
                height: source_size.1,
                crop: None,
            }
        };

        let format = instruction.format.resolve(self.original.format());

        // Skip the pixel work when geometry is a no-op; format conversion
        // still happens below.
        let scaled = if resolution.is_identity_scale(source_size) {
            log::debug!("geometry is identity for {source_size:?}, skipping resample");
            None
        } else {
            Some(
                self.pixels
                    .resize_exact(resolution.width, resolution.height, FilterType::Lanczos3),
            )
        };
        let working = scaled.as_ref().unwrap_or(&self.pixels);

        let cropped = resolution.crop.map(|crop| {
            working.crop_imm(crop.x0, crop.y0, crop.width(), crop.height())
        });
        let final_pixels = cropped.as_ref().unwrap_or(working);

        let encoded = encode(final_pixels, format, &instruction.options)?;

        Ok(DerivedImage::from_encoded(
            encoded,
            format,
            final_pixels.width(),
            final_pixels.height(),
            final_pixels.color(),
            None,
            false,
            None,
        ))
    }
}

/// Count the frames of an encoded GIF.
fn count_gif_frames(data: &[u8]) -> Result<u32> {
    use image::AnimationDecoder;

    let decoder = GifDecoder::new(Cursor::new(data))
        .map_err(|err| ImageError::Parsing(format!("could not decode GIF: {err}")))?;
    let mut count = 0u32;
    for frame in decoder.into_frames() {
        frame.map_err(|err| ImageError::Parsing(format!("could not decode GIF frame: {err}")))?;
        count += 1;
    }
    Ok(count)
}

/// Encode pixels into `format`, honoring the options that format supports.
fn encode(pixels: &DynamicImage, format: Format, options: &EncoderOptions) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        Format::Jpeg => {
            let quality = options.quality.unwrap_or(DEFAULT_JPEG_QUALITY);
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            // JPEG has no alpha channel
            if pixels.color().has_alpha() {
                DynamicImage::ImageRgb8(pixels.to_rgb8()).write_with_encoder(encoder)?;
            } else {
                pixels.write_with_encoder(encoder)?;
            }
        }
        Format::Png => {
            let compression = if options.optimize.unwrap_or(false) {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            let encoder = PngEncoder::new_with_quality(&mut buf, compression, PngFilterType::Adaptive);
            pixels.write_with_encoder(encoder)?;
        }
        Format::Gif => {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.encode_frame(Frame::new(pixels.to_rgba8()))?;
        }
        Format::Pdf => {
            return Err(ImageError::Resize(
                "the pixel engine cannot encode PDF output".to_string(),
            ));
        }
    }
    Ok(buf.into_inner())
}
