//! Parameter types for resize recipes.
//!
//! These structs describe *what* to produce, not *how* to produce it. A
//! [`ResizesSchema`] maps size names to [`ResizeInstruction`]s and is
//! validated once, at construction; afterwards it is immutable and safe to
//! share behind an `Arc` across any number of resize operations.
//!
//! Schemas are plain data: build them in code or load them from JSON via
//! serde. All validation failures are configuration errors raised before
//! any pixel or storage work happens.

use crate::errors::{ImageError, Result};
use crate::formats::FormatSpec;
use crate::geometry::ConstraintMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size names beginning with this character are reserved for synthetic
/// entries (the archived original).
pub const RESERVED_PREFIX: char = '@';

/// Encoder knobs, filtered by output format at encode time.
///
/// JPEG (and PDF) honor `quality`, `optimize`, `progressive`; PNG honors
/// `optimize`, `transparency`, `bit_depth`, `dictionary`. Options that do
/// not apply to the active format are silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderOptions {
    /// Lossy quality, 1-100. JPEG only; defaults to 75 when unset.
    pub quality: Option<u8>,
    /// Spend extra effort for a smaller file.
    pub optimize: Option<bool>,
    /// Progressive encoding (JPEG).
    pub progressive: Option<bool>,
    /// Preserve transparency (PNG).
    pub transparency: Option<bool>,
    /// Bit depth (PNG).
    pub bit_depth: Option<u8>,
    /// Pre-seeded compression dictionary (PNG).
    pub dictionary: Option<Vec<u8>>,
}

/// Extra metadata attached to stored objects, merged over the backend's
/// defaults. Keys in `metadata` become custom object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageExtras {
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl StorageExtras {
    /// Overlay `self` on top of `defaults`; fields set here win, metadata
    /// maps are unioned with this side taking precedence.
    pub fn merged_over(&self, defaults: &StorageExtras) -> StorageExtras {
        let mut metadata = defaults.metadata.clone();
        metadata.extend(self.metadata.clone());
        StorageExtras {
            cache_control: self.cache_control.clone().or_else(|| defaults.cache_control.clone()),
            content_disposition: self
                .content_disposition
                .clone()
                .or_else(|| defaults.content_disposition.clone()),
            content_encoding: self
                .content_encoding
                .clone()
                .or_else(|| defaults.content_encoding.clone()),
            content_language: self
                .content_language
                .clone()
                .or_else(|| defaults.content_language.clone()),
            metadata,
        }
    }
}

/// One entry of a resize schema: a target box, a constraint method, an
/// output format, and persistence hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeInstruction {
    /// Target width in pixels. Optional only for `passthrough:no-resize`.
    pub width: Option<u32>,
    /// Target height in pixels. Optional only for `passthrough:no-resize`.
    pub height: Option<u32>,
    pub method: ConstraintMethod,
    pub format: FormatSpec,
    pub options: EncoderOptions,
    /// Filename template overriding the saver default. Placeholders:
    /// `%(guid)s`, `%(suffix)s`, `%(format)s`.
    pub filename_template: Option<String>,
    /// Suffix substituted into the template; defaults to the size name.
    pub suffix: Option<String>,
    /// Per-size storage target (bucket or subdirectory) overriding the
    /// saver's default.
    pub storage_target: Option<String>,
    /// Per-size storage metadata, merged over the saver's defaults.
    pub storage_extras: Option<StorageExtras>,
    /// Opt-in to resizing multi-frame sources. Without it, an animated
    /// source is rejected rather than silently flattened.
    pub allow_animated: bool,
}

impl Default for ResizeInstruction {
    fn default() -> Self {
        ResizeInstruction {
            width: None,
            height: None,
            method: ConstraintMethod::FitWithin,
            format: FormatSpec::default(),
            options: EncoderOptions::default(),
            filename_template: None,
            suffix: None,
            storage_target: None,
            storage_extras: None,
            allow_animated: false,
        }
    }
}

impl ResizeInstruction {
    /// A sized instruction with the given constraint method.
    pub fn new(width: u32, height: u32, method: ConstraintMethod) -> ResizeInstruction {
        ResizeInstruction {
            width: Some(width),
            height: Some(height),
            method,
            ..ResizeInstruction::default()
        }
    }

    /// A `passthrough:no-resize` instruction (no target box).
    pub fn passthrough() -> ResizeInstruction {
        ResizeInstruction {
            method: ConstraintMethod::PassthroughNoResize,
            ..ResizeInstruction::default()
        }
    }

    pub fn with_format(mut self, format: FormatSpec) -> ResizeInstruction {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> ResizeInstruction {
        self.options.quality = Some(quality);
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> ResizeInstruction {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_filename_template(mut self, template: impl Into<String>) -> ResizeInstruction {
        self.filename_template = Some(template.into());
        self
    }

    pub fn with_storage_target(mut self, target: impl Into<String>) -> ResizeInstruction {
        self.storage_target = Some(target.into());
        self
    }

    pub fn allow_animated(mut self) -> ResizeInstruction {
        self.allow_animated = true;
        self
    }

    /// The target box, or a configuration error for methods that need one.
    pub fn target_box(&self) -> Result<(u32, u32)> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Ok((width, height)),
            _ => Err(ImageError::Config(format!(
                "constraint method `{}` requires both width and height",
                self.method
            ))),
        }
    }
}

/// A validated, immutable mapping of size name → instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, ResizeInstruction>",
    into = "BTreeMap<String, ResizeInstruction>"
)]
pub struct ResizesSchema {
    sizes: BTreeMap<String, ResizeInstruction>,
}

impl ResizesSchema {
    /// Validate and freeze a schema.
    ///
    /// Rejected: an empty map, size names starting with `@`, and sized
    /// methods missing their target box.
    pub fn new(sizes: BTreeMap<String, ResizeInstruction>) -> Result<ResizesSchema> {
        if sizes.is_empty() {
            return Err(ImageError::Config("resizes schema is empty".to_string()));
        }
        for (name, instruction) in &sizes {
            if name.starts_with(RESERVED_PREFIX) {
                return Err(ImageError::Config(format!(
                    "`{RESERVED_PREFIX}` is a reserved initial character for image sizes (`{name}`)"
                )));
            }
            if instruction.method.requires_box() {
                instruction.target_box().map_err(|_| {
                    ImageError::Config(format!(
                        "size `{name}`: method `{}` requires both width and height",
                        instruction.method
                    ))
                })?;
            }
        }
        Ok(ResizesSchema { sizes })
    }

    /// Load a schema from its JSON representation.
    pub fn from_json(json: &str) -> Result<ResizesSchema> {
        let sizes: BTreeMap<String, ResizeInstruction> = serde_json::from_str(json)
            .map_err(|err| ImageError::Config(format!("schema JSON: {err}")))?;
        ResizesSchema::new(sizes)
    }

    pub fn get(&self, size: &str) -> Option<&ResizeInstruction> {
        self.sizes.get(size)
    }

    pub fn contains(&self, size: &str) -> bool {
        self.sizes.contains_key(size)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sizes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

impl TryFrom<BTreeMap<String, ResizeInstruction>> for ResizesSchema {
    type Error = ImageError;

    fn try_from(sizes: BTreeMap<String, ResizeInstruction>) -> Result<Self> {
        ResizesSchema::new(sizes)
    }
}

impl From<ResizesSchema> for BTreeMap<String, ResizeInstruction> {
    fn from(schema: ResizesSchema) -> Self {
        schema.sizes
    }
}
