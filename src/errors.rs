//! Crate-wide error taxonomy.
//!
//! One enum covers the whole pipeline so callers can match on the *kind* of
//! failure (missing input, bad schema, unsatisfiable resize, failed upload)
//! without caring which module raised it. Persistence variants carry the
//! size name, storage target, and filename so a partial failure can be
//! traced to the exact derivative that caused it.

use std::io;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ImageError>;

#[derive(Error, Debug)]
pub enum ImageError {
    /// The input payload is absent or empty.
    #[error("missing image file: {0}")]
    MissingFile(String),

    /// The input bytes could not be decoded as a supported image.
    #[error("could not parse image data: {0}")]
    Parsing(String),

    /// Schema, selection, or registration misuse. Raised before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required call argument (e.g. the guid) is missing or empty.
    #[error("missing required argument: {0}")]
    Args(String),

    /// Invalid or unsatisfiable constraint method.
    #[error("resize error: {0}")]
    Resize(String),

    /// A second image was registered on an orchestrator without `reset()`.
    #[error("duplicate action: {0}")]
    DuplicateAction(String),

    /// A write failed during a save call. Everything already written in the
    /// same call has been rolled back (best effort) before this is returned.
    #[error("saving `{size}` to `{target}/{filename}` failed: {source}")]
    Upload {
        size: String,
        target: String,
        filename: String,
        #[source]
        source: Box<ImageError>,
    },

    /// A delete failed while draining a saved-files mapping.
    #[error("deleting `{size}` (`{target}/{filename}`) failed: {source}")]
    Delete {
        size: String,
        target: String,
        filename: String,
        #[source]
        source: Box<ImageError>,
    },

    /// Object storage backend failure.
    #[error("storage backend error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Encode/decode failure surfaced by the pixel engine.
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

impl ImageError {
    /// Wrap a backend failure with the derivative it occurred on.
    pub(crate) fn upload_context(self, size: &str, target: &str, filename: &str) -> ImageError {
        ImageError::Upload {
            size: size.to_string(),
            target: target.to_string(),
            filename: filename.to_string(),
            source: Box::new(self),
        }
    }

    pub(crate) fn delete_context(self, size: &str, target: &str, filename: &str) -> ImageError {
        ImageError::Delete {
            size: size.to_string(),
            target: target.to_string(),
            filename: filename.to_string(),
            source: Box::new(self),
        }
    }
}
