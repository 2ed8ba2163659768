//! Input adapters for the closed set of accepted image payloads.
//!
//! Callers hand the pipeline an already-open file, an in-memory buffer, a
//! field from a decoded multipart upload, or a filesystem path. Each variant
//! answers the same two questions — `read_all` and `name` — so everything
//! downstream is payload-agnostic.

use crate::errors::{ImageError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// A source image payload.
#[derive(Debug)]
pub enum ImageSource {
    /// An already-open file handle. The handle is rewound after reading so
    /// a caller holding a duplicate descriptor can still use it.
    File {
        file: File,
        name: Option<String>,
    },
    /// An in-memory buffer.
    Bytes {
        data: Vec<u8>,
        name: Option<String>,
    },
    /// One file field of a decoded multipart upload.
    Multipart {
        field_name: String,
        file_name: Option<String>,
        data: Vec<u8>,
    },
    /// A path on the local filesystem.
    Path(PathBuf),
}

impl ImageSource {
    pub fn from_file(file: File) -> ImageSource {
        ImageSource::File { file, name: None }
    }

    pub fn from_named_file(file: File, name: impl Into<String>) -> ImageSource {
        ImageSource::File {
            file,
            name: Some(name.into()),
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> ImageSource {
        ImageSource::Bytes { data, name: None }
    }

    pub fn from_named_bytes(data: Vec<u8>, name: impl Into<String>) -> ImageSource {
        ImageSource::Bytes {
            data,
            name: Some(name.into()),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> ImageSource {
        ImageSource::Path(path.into())
    }

    pub fn from_multipart(
        field_name: impl Into<String>,
        file_name: Option<String>,
        data: Vec<u8>,
    ) -> ImageSource {
        ImageSource::Multipart {
            field_name: field_name.into(),
            file_name,
            data,
        }
    }

    /// The informational name attached to the payload, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            ImageSource::File { name, .. } => name.as_deref(),
            ImageSource::Bytes { name, .. } => name.as_deref(),
            ImageSource::Multipart { file_name, .. } => file_name.as_deref(),
            ImageSource::Path(path) => path.file_name().and_then(|n| n.to_str()),
        }
    }

    /// Read the entire payload into an owned buffer.
    ///
    /// An empty payload or a nonexistent path is a [`ImageError::MissingFile`];
    /// whether the bytes decode is the wrapper's concern, not ours.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let data = match self {
            ImageSource::File { file, .. } => {
                file.seek(SeekFrom::Start(0))?;
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                // be kind, rewind
                file.seek(SeekFrom::Start(0))?;
                data
            }
            ImageSource::Bytes { data, .. } => data.clone(),
            ImageSource::Multipart { data, .. } => data.clone(),
            ImageSource::Path(path) => std::fs::read(&path).map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    ImageError::MissingFile(path.display().to_string())
                } else {
                    ImageError::Io(err)
                }
            })?,
        };

        if data.is_empty() {
            return Err(ImageError::MissingFile(
                self.name().unwrap_or("<unnamed payload>").to_string(),
            ));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bytes_source_round_trips() {
        let mut source = ImageSource::from_named_bytes(vec![1, 2, 3], "blob.jpg");
        assert_eq!(source.name(), Some("blob.jpg"));
        assert_eq!(source.read_all().unwrap(), vec![1, 2, 3]);
        // repeatable
        assert_eq!(source.read_all().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn empty_bytes_are_a_missing_file() {
        let mut source = ImageSource::from_bytes(Vec::new());
        assert!(matches!(
            source.read_all(),
            Err(ImageError::MissingFile(_))
        ));
    }

    #[test]
    fn file_source_reads_and_rewinds() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"payload").unwrap();

        let mut source = ImageSource::from_file(tmp.reopen().unwrap());
        assert_eq!(source.read_all().unwrap(), b"payload");

        // the handle was rewound, so a second pass sees the same bytes
        assert_eq!(source.read_all().unwrap(), b"payload");
    }

    #[test]
    fn missing_path_is_a_missing_file() {
        let mut source = ImageSource::from_path("/nonexistent/image.jpg");
        assert!(matches!(
            source.read_all(),
            Err(ImageError::MissingFile(_))
        ));
    }

    #[test]
    fn path_source_name_is_the_file_name() {
        let source = ImageSource::from_path("/some/dir/photo.png");
        assert_eq!(source.name(), Some("photo.png"));
    }

    #[test]
    fn multipart_source_prefers_the_file_name() {
        let source =
            ImageSource::from_multipart("upload", Some("cat.gif".to_string()), vec![0u8; 4]);
        assert_eq!(source.name(), Some("cat.gif"));
    }
}
