//! # Thumbsmith
//!
//! Declarative resize recipes: one source image in, a named set of derived
//! images out, optionally persisted — originals included — to a local
//! directory tree or an object store, with best-effort rollback when a save
//! fails partway.
//!
//! # Architecture: Resolve → Resize → Persist
//!
//! ```text
//! 1. Schema     size name → instruction      (validated once, shared forever)
//! 2. Resize     source image → resultset     (decode once, derive many)
//! 3. Persist    resultset → named files      (templated names, rollback)
//! ```
//!
//! The stages are deliberately independent: a [`params::ResizesSchema`] is
//! plain validated data, a [`resizer::ResizerResultset`] is an immutable
//! value the savers only read, and either saver backend can persist any
//! resultset. Filenames can even be planned for images that are not on hand
//! anymore (see [`resizer::Resizer::fake_resize`]) — handy for deleting the
//! stored derivatives of yesterday's uploads.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`geometry`] | Pure constraint-method resolution: target box → final dimensions + optional crop |
//! | [`formats`] | Format taxonomy, content types, and the `AUTO`/`ORIGINAL` inheritance rule |
//! | [`params`] | Resize instructions, schemas, encoder options — validated at construction |
//! | [`source`] | The closed set of accepted input payloads (file, buffer, multipart field, path) |
//! | [`wrapper`] | Decode-once image wrapper producing independent derived images |
//! | [`resizer`] | The orchestrator: registration state machine, resultsets, fake resizes |
//! | [`optimize`] | Best-effort lossless recompression via external tools |
//! | [`saver`] | Filename templating, transactional save/delete, local + object backends |
//! | [`errors`] | The crate-wide error taxonomy |
//!
//! # Design Decisions
//!
//! ## Shrink-Only Geometry
//!
//! Every constraint method caps its scale factor at 1.0 (or errors when an
//! exact match is impossible). Upscaling is never silent; a recipe that
//! would enlarge simply returns the original dimensions.
//!
//! ## Eager Decoding
//!
//! Sources are fully decoded at registration. Corrupt uploads surface as
//! parsing errors immediately, not halfway through a ten-size resize loop
//! that already wrote three files somewhere.
//!
//! ## All-Or-Nothing Persistence
//!
//! A save call either persists every selected derivative or none of them:
//! each successful write is recorded, and the first failure unwinds the
//! record in reverse order before the original error propagates. Rollback
//! steps that themselves fail are logged and skipped so they can never mask
//! the root cause.
//!
//! ## Blocking Surface
//!
//! Everything here is synchronous, blocking, and single-flight: schemas,
//! configs, and factories are the shareable pieces; `Resizer` and saver
//! instances hold per-operation state and are meant to be used once at a
//! time. The object backend drives its async client through a private
//! tokio runtime — no async surface leaks out, and callers wanting
//! concurrency run independent instances on their own threads.

pub mod errors;
pub mod formats;
pub mod geometry;
pub mod optimize;
pub mod params;
pub mod resizer;
pub mod saver;
pub mod source;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use errors::{ImageError, Result};
pub use formats::{Format, FormatSpec};
pub use geometry::{ConstraintMethod, CropBox, Resolution};
pub use optimize::{Optimizer, Tool, ToolRegistry};
pub use params::{EncoderOptions, ResizeInstruction, ResizesSchema, StorageExtras};
pub use resizer::{
    RegisterPayload, Resizer, ResizerConfig, ResizerFactory, ResizerResultset, ResultImage,
};
pub use saver::localfile::{LocalSaver, LocalSaverConfig, LocalSaverFactory, LocalSimpleAccess};
pub use saver::object::{
    ObjectSaver, ObjectSaverConfig, ObjectSaverFactory, ObjectSimpleAccess,
};
pub use saver::{NullLogger, SavedEntry, SavedFiles, SaverLogger};
pub use source::ImageSource;
pub use wrapper::{DerivedImage, FakedImage, ImageWrapper};
