//! The resize orchestrator: one registered image, many derivatives.
//!
//! A [`Resizer`] is a two-state machine. It starts *empty*; registering a
//! payload moves it to *registered*; registering again without an explicit
//! [`reset`](Resizer::reset) is a duplicate-action error. Each registration
//! produces at most one [`ResizerResultset`]. Configuration lives in an
//! immutable [`ResizerConfig`] that a [`ResizerFactory`] shares across any
//! number of resizer instances, so the factory is the thing applications
//! keep around.
//!
//! [`fake_resize`](Resizer::fake_resize) plans filenames for images that
//! were resized in some earlier life (e.g. to delete their stored
//! derivatives) without fetching or decoding anything.

use crate::errors::{ImageError, Result};
use crate::formats::Format;
use crate::optimize::Optimizer;
use crate::params::{ResizesSchema, RESERVED_PREFIX};
use crate::source::ImageSource;
use crate::wrapper::{DerivedImage, FakedImage, ImageWrapper};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One entry of a resultset: a real derivative, or a planning placeholder.
#[derive(Debug, Clone)]
pub enum ResultImage {
    Real(DerivedImage),
    Faked(FakedImage),
}

impl ResultImage {
    pub fn format(&self) -> Format {
        match self {
            ResultImage::Real(image) => image.format(),
            ResultImage::Faked(faked) => faked.format(),
        }
    }

    pub fn width(&self) -> Option<u32> {
        match self {
            ResultImage::Real(image) => image.width(),
            ResultImage::Faked(faked) => faked.width(),
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            ResultImage::Real(image) => image.height(),
            ResultImage::Faked(faked) => faked.height(),
        }
    }

    /// The backing image, when there is one.
    pub fn as_real(&self) -> Option<&DerivedImage> {
        match self {
            ResultImage::Real(image) => Some(image),
            ResultImage::Faked(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ResultImage::Faked(_))
    }
}

/// The outcome of one resize call: the original plus every selected
/// derivative. Immutable; savers only read it.
#[derive(Debug, Clone)]
pub struct ResizerResultset {
    original: Option<ResultImage>,
    resized: BTreeMap<String, ResultImage>,
}

impl ResizerResultset {
    pub fn new(
        resized: BTreeMap<String, ResultImage>,
        original: Option<ResultImage>,
    ) -> ResizerResultset {
        ResizerResultset { original, resized }
    }

    pub fn original(&self) -> Option<&ResultImage> {
        self.original.as_ref()
    }

    pub fn has_original(&self) -> bool {
        self.original.is_some()
    }

    pub fn get(&self, size: &str) -> Option<&ResultImage> {
        self.resized.get(size)
    }

    pub fn contains(&self, size: &str) -> bool {
        self.resized.contains_key(size)
    }

    pub fn sizes(&self) -> impl Iterator<Item = &str> {
        self.resized.keys().map(String::as_str)
    }

    pub fn resized(&self) -> &BTreeMap<String, ResultImage> {
        &self.resized
    }

    pub fn len(&self) -> usize {
        self.resized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resized.is_empty()
    }
}

/// Immutable orchestrator configuration: the schema, the default selection,
/// and the optimizer toggles.
#[derive(Debug, Clone)]
pub struct ResizerConfig {
    schema: Arc<ResizesSchema>,
    selected: Vec<String>,
    optimize_original: bool,
    optimize_resized: bool,
}

impl ResizerConfig {
    /// A config selecting every size in the schema.
    pub fn new(schema: ResizesSchema) -> ResizerConfig {
        let selected = schema.names().map(str::to_owned).collect();
        ResizerConfig {
            schema: Arc::new(schema),
            selected,
            optimize_original: false,
            optimize_resized: false,
        }
    }

    /// Restrict the default selection. Every name must exist in the schema.
    pub fn with_selected(mut self, selected: Vec<String>) -> Result<ResizerConfig> {
        self.selected = normalize_selection(&self.schema, &selected)?;
        Ok(self)
    }

    /// Run the optimizer over the original at registration time.
    pub fn with_optimize_original(mut self, optimize: bool) -> ResizerConfig {
        self.optimize_original = optimize;
        self
    }

    /// Run the optimizer over every derivative after resizing.
    pub fn with_optimize_resized(mut self, optimize: bool) -> ResizerConfig {
        self.optimize_resized = optimize;
        self
    }

    pub fn schema(&self) -> &Arc<ResizesSchema> {
        &self.schema
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }
}

/// The one payload a registration accepts.
#[derive(Debug)]
pub enum RegisterPayload {
    /// A raw payload (file handle, buffer, multipart field, path).
    Source(ImageSource),
    /// An already-decoded wrapper.
    Wrapper(ImageWrapper),
    /// A base64-encoded image, as handed through message brokers.
    Base64(String),
}

/// The workhorse. Single-flight: hold one per image being processed.
pub struct Resizer {
    config: Arc<ResizerConfig>,
    optimizer: Optimizer,
    wrapped: Option<ImageWrapper>,
}

impl Resizer {
    pub fn new(config: Arc<ResizerConfig>) -> Resizer {
        Resizer {
            config,
            optimizer: Optimizer::new(),
            wrapped: None,
        }
    }

    /// Swap in a non-default optimizer (e.g. one with injected tool
    /// availability).
    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Resizer {
        self.optimizer = optimizer;
        self
    }

    pub fn is_registered(&self) -> bool {
        self.wrapped.is_some()
    }

    /// Attach an image. Fails with a duplicate-action error if one is
    /// already attached; `reset()` first to reuse the instance.
    pub fn register(&mut self, payload: RegisterPayload) -> Result<()> {
        if self.wrapped.is_some() {
            return Err(ImageError::DuplicateAction(
                "an image file is already registered; call reset() first".to_string(),
            ));
        }

        let wrapper = match payload {
            RegisterPayload::Source(source) => ImageWrapper::new(source)?,
            RegisterPayload::Wrapper(wrapper) => wrapper,
            RegisterPayload::Base64(encoded) => {
                let data = BASE64.decode(encoded.trim()).map_err(|err| {
                    ImageError::Parsing(format!("invalid base64 payload: {err}"))
                })?;
                ImageWrapper::from_bytes(data, None)?
            }
        };
        self.wrapped = Some(wrapper);

        if self.config.optimize_original {
            self.optimize_original()?;
        }
        Ok(())
    }

    /// Back to the empty state.
    pub fn reset(&mut self) {
        self.wrapped = None;
    }

    /// Run the optimizer over the registered original, in place.
    pub fn optimize_original(&mut self) -> Result<()> {
        let wrapper = self.wrapped.as_mut().ok_or_else(|| {
            ImageError::Config("no image registered to optimize".to_string())
        })?;
        self.optimizer.optimize(wrapper.original_mut())
    }

    /// A copy of the registered original.
    pub fn get_original(&self) -> Result<DerivedImage> {
        self.wrapped
            .as_ref()
            .map(ImageWrapper::get_original)
            .ok_or_else(|| ImageError::Config("no image registered".to_string()))
    }

    /// Resize the registered image through the configured selection.
    pub fn resize(&mut self) -> Result<ResizerResultset> {
        self.resize_selected(None)
    }

    /// Register `payload` and resize in one call.
    pub fn resize_with(&mut self, payload: RegisterPayload) -> Result<ResizerResultset> {
        self.register(payload)?;
        self.resize_selected(None)
    }

    /// Resize with a per-call selection overriding the configured one.
    pub fn resize_selected(&mut self, selected: Option<&[String]>) -> Result<ResizerResultset> {
        let schema = Arc::clone(self.config.schema());
        let selected = match selected {
            Some(names) => normalize_selection(&schema, names)?,
            None => normalize_selection(&schema, self.config.selected())?,
        };

        let wrapper = self.wrapped.as_ref().ok_or_else(|| {
            ImageError::Config("register an image file before resizing".to_string())
        })?;

        let mut resized = BTreeMap::new();
        for size in selected {
            let instruction = schema.get(&size).ok_or_else(|| {
                ImageError::Config(format!("selected size `{size}` is not in the schema"))
            })?;
            let mut derived = wrapper.resize(instruction)?;
            if self.config.optimize_resized {
                self.optimizer.optimize(&mut derived)?;
            }
            resized.insert(size, ResultImage::Real(derived));
        }

        Ok(ResizerResultset::new(
            resized,
            Some(ResultImage::Real(wrapper.get_original())),
        ))
    }

    /// Plan a resultset without touching pixels: formats are derived from
    /// the filename's extension, dimensions from the schema, and no entry
    /// carries bytes. Placeholder resultsets generate filenames; they are
    /// rejected by real save operations.
    pub fn fake_resize(
        &self,
        original_filename: &str,
        selected: Option<&[String]>,
    ) -> Result<ResizerResultset> {
        let schema = self.config.schema();
        let selected = match selected {
            Some(names) => normalize_selection(schema, names)?,
            None => normalize_selection(schema, self.config.selected())?,
        };

        let faked_original = FakedImage::from_filename(original_filename)?;

        let mut resized = BTreeMap::new();
        for size in selected {
            let instruction = schema.get(&size).ok_or_else(|| {
                ImageError::Config(format!("selected size `{size}` is not in the schema"))
            })?;
            let format = instruction.format.resolve(faked_original.format());
            resized.insert(
                size,
                ResultImage::Faked(FakedImage::from_schema(
                    format,
                    instruction.width,
                    instruction.height,
                )),
            );
        }

        Ok(ResizerResultset::new(
            resized,
            Some(ResultImage::Faked(faked_original)),
        ))
    }
}

/// Stateless front door: holds the shared config and stamps out
/// single-flight resizers.
#[derive(Clone)]
pub struct ResizerFactory {
    config: Arc<ResizerConfig>,
}

impl ResizerFactory {
    pub fn new(config: ResizerConfig) -> ResizerFactory {
        ResizerFactory {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Arc<ResizerConfig> {
        &self.config
    }

    /// A fresh, empty resizer sharing this factory's configuration.
    pub fn resizer(&self) -> Resizer {
        Resizer::new(Arc::clone(&self.config))
    }

    /// Register + resize in one idempotent call.
    pub fn resize_source(&self, payload: RegisterPayload) -> Result<ResizerResultset> {
        self.resizer().resize_with(payload)
    }
}

/// Deduplicate and validate a selection against a schema: non-empty, no
/// reserved names, every member present.
fn normalize_selection(schema: &ResizesSchema, selected: &[String]) -> Result<Vec<String>> {
    if selected.is_empty() {
        return Err(ImageError::Config("no resizes selected".to_string()));
    }
    let unique: BTreeSet<&str> = selected.iter().map(String::as_str).collect();
    for name in &unique {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(ImageError::Config(format!(
                "`{RESERVED_PREFIX}` is a reserved initial character for image sizes (`{name}`)"
            )));
        }
        if !schema.contains(name) {
            return Err(ImageError::Config(format!(
                "selected size `{name}` is not in the schema"
            )));
        }
    }
    Ok(unique.into_iter().map(str::to_owned).collect())
}
