//! Local-filesystem persistence.
//!
//! Storage targets are subdirectory names under a configured root.
//! Directories are created on demand; deleting the last file of a target
//! also removes the now-empty directory.

use super::{
    plan_filenames, plan_writes, run_delete, run_save, PlannedWrite, SavedFiles, SaverLogger,
    StorageOps, TargetDefaults,
};
use crate::errors::Result;
use crate::params::{ResizesSchema, StorageExtras};
use crate::resizer::ResizerResultset;
use crate::wrapper::DerivedImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where and how the local backend stores files.
#[derive(Debug, Clone)]
pub struct LocalSaverConfig {
    /// Root directory all targets live under.
    pub root: PathBuf,
    /// Default target for derivatives.
    pub public_subdir: String,
    /// Target for archived originals.
    pub archive_subdir: String,
    /// Default archive behavior when a call passes `None`.
    pub archive_original: Option<bool>,
}

impl LocalSaverConfig {
    pub fn new(root: impl Into<PathBuf>) -> LocalSaverConfig {
        LocalSaverConfig {
            root: root.into(),
            public_subdir: "public".to_string(),
            archive_subdir: "archive".to_string(),
            archive_original: None,
        }
    }
}

/// Filesystem writes/removes behind the shared save/delete loops.
struct LocalOps<'a> {
    root: &'a Path,
    remove_empty_dirs: bool,
}

impl LocalOps<'_> {
    fn target_path(&self, target: &str, filename: &str) -> PathBuf {
        self.root.join(target).join(filename)
    }
}

impl StorageOps for LocalOps<'_> {
    fn write(
        &mut self,
        target: &str,
        filename: &str,
        image: &DerivedImage,
        _extras: &StorageExtras,
    ) -> Result<()> {
        let path = self.target_path(target, filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, image.bytes())?;
        log::debug!("wrote {}", path.display());
        Ok(())
    }

    fn remove(&mut self, target: &str, filename: &str) -> Result<()> {
        let path = self.target_path(target, filename);
        fs::remove_file(&path)?;
        log::debug!("removed {}", path.display());

        if self.remove_empty_dirs {
            let dir = self.root.join(target);
            if let Ok(mut entries) = fs::read_dir(&dir) {
                if entries.next().is_none() {
                    let _ = fs::remove_dir(&dir);
                }
            }
        }
        Ok(())
    }
}

/// Bundles config + schema + logger and stamps out single-flight managers.
#[derive(Clone)]
pub struct LocalSaverFactory {
    config: Arc<LocalSaverConfig>,
    schema: Arc<ResizesSchema>,
    logger: Arc<dyn SaverLogger>,
}

impl LocalSaverFactory {
    pub fn new(
        config: LocalSaverConfig,
        schema: Arc<ResizesSchema>,
        logger: Arc<dyn SaverLogger>,
    ) -> LocalSaverFactory {
        LocalSaverFactory {
            config: Arc::new(config),
            schema,
            logger,
        }
    }

    pub fn manager(&self) -> LocalSaver {
        LocalSaver {
            config: Arc::clone(&self.config),
            schema: Arc::clone(&self.schema),
            logger: Arc::clone(&self.logger),
        }
    }

    pub fn simple_access(&self) -> LocalSimpleAccess {
        LocalSimpleAccess {
            config: Arc::clone(&self.config),
            logger: Arc::clone(&self.logger),
        }
    }
}

/// Schema-driven persistence of whole resultsets to the local filesystem.
pub struct LocalSaver {
    config: Arc<LocalSaverConfig>,
    schema: Arc<ResizesSchema>,
    logger: Arc<dyn SaverLogger>,
}

impl LocalSaver {
    pub fn new(
        config: Arc<LocalSaverConfig>,
        schema: Arc<ResizesSchema>,
        logger: Arc<dyn SaverLogger>,
    ) -> LocalSaver {
        LocalSaver {
            config,
            schema,
            logger,
        }
    }

    fn targets(&self) -> TargetDefaults<'_> {
        TargetDefaults {
            default_target: &self.config.public_subdir,
            archive_target: Some(&self.config.archive_subdir),
        }
    }

    /// The filenames and targets a save call would produce. Useful for
    /// planning and for deleting files stored by an earlier run.
    pub fn generate_filenames(
        &self,
        resultset: &ResizerResultset,
        guid: &str,
        selected: Option<&[String]>,
        archive_original: Option<bool>,
    ) -> Result<SavedFiles> {
        plan_filenames(
            resultset,
            &self.schema,
            guid,
            selected,
            archive_original.or(self.config.archive_original),
            self.targets(),
        )
    }

    /// Write every selected derivative (and the archived original where
    /// the tri-state flag says so). All-or-nothing: a failed write unwinds
    /// the earlier ones before the error is returned.
    pub fn files_save(
        &mut self,
        resultset: &ResizerResultset,
        guid: &str,
        selected: Option<&[String]>,
        archive_original: Option<bool>,
        dry_run: bool,
    ) -> Result<SavedFiles> {
        let mapping = self.generate_filenames(resultset, guid, selected, archive_original)?;
        let plan = plan_writes(
            resultset,
            &self.schema,
            &mapping,
            &StorageExtras::default(),
            &StorageExtras::default(),
        )?;
        let mut ops = LocalOps {
            root: &self.config.root,
            remove_empty_dirs: true,
        };
        run_save(&mut ops, self.logger.as_ref(), plan, dry_run)
    }

    /// Delete a saved-files mapping, draining it in place.
    pub fn files_delete(&mut self, mut files: SavedFiles, dry_run: bool) -> Result<SavedFiles> {
        let mut ops = LocalOps {
            root: &self.config.root,
            remove_empty_dirs: true,
        };
        run_delete(&mut ops, self.logger.as_ref(), &mut files, dry_run)?;
        Ok(files)
    }
}

/// Ad-hoc single-file storage sharing the local backend's config and
/// delete conventions, without the schema machinery.
pub struct LocalSimpleAccess {
    config: Arc<LocalSaverConfig>,
    logger: Arc<dyn SaverLogger>,
}

impl LocalSimpleAccess {
    pub fn new(config: Arc<LocalSaverConfig>, logger: Arc<dyn SaverLogger>) -> LocalSimpleAccess {
        LocalSimpleAccess { config, logger }
    }

    /// Store one image under an explicit subdirectory and filename.
    pub fn file_save(
        &mut self,
        subdir: &str,
        filename: &str,
        image: &DerivedImage,
        dry_run: bool,
    ) -> Result<SavedFiles> {
        let plan = vec![PlannedWrite {
            size: simple_key(subdir, filename),
            filename: filename.to_string(),
            target: subdir.to_string(),
            image,
            extras: StorageExtras::default(),
        }];
        let mut ops = LocalOps {
            root: &self.config.root,
            remove_empty_dirs: true,
        };
        run_save(&mut ops, self.logger.as_ref(), plan, dry_run)
    }

    /// The mapping `file_save` would record, for symmetric deletes.
    pub fn saves_mapping(&self, subdir: &str, filename: &str) -> SavedFiles {
        SavedFiles::from([(
            simple_key(subdir, filename),
            super::SavedEntry {
                filename: filename.to_string(),
                target: subdir.to_string(),
            },
        )])
    }

    pub fn files_delete(&mut self, mut files: SavedFiles, dry_run: bool) -> Result<SavedFiles> {
        let mut ops = LocalOps {
            root: &self.config.root,
            remove_empty_dirs: true,
        };
        run_delete(&mut ops, self.logger.as_ref(), &mut files, dry_run)?;
        Ok(files)
    }
}

fn simple_key(target: &str, filename: &str) -> String {
    format!("{target}||{filename}")
}

#[cfg(test)]
mod tests {
    use super::super::testing::RecordingLogger;
    use super::super::{NullLogger, ARCHIVE_KEY};
    use super::*;
    use crate::errors::ImageError;
    use crate::formats::Format;
    use crate::geometry::ConstraintMethod;
    use crate::params::ResizeInstruction;
    use crate::resizer::{ResizerResultset, ResultImage};

    fn schema() -> Arc<ResizesSchema> {
        Arc::new(
            ResizesSchema::new(
                [
                    (
                        "thumb".to_string(),
                        ResizeInstruction::new(120, 120, ConstraintMethod::FitWithinCropTo),
                    ),
                    (
                        "medium".to_string(),
                        ResizeInstruction::new(400, 400, ConstraintMethod::FitWithin),
                    ),
                ]
                .into(),
            )
            .unwrap(),
        )
    }

    fn resultset() -> ResizerResultset {
        let entry = |byte: u8| {
            ResultImage::Real(DerivedImage::from_parts(
                vec![byte; 24],
                Format::Jpeg,
                None,
            ))
        };
        ResizerResultset::new(
            [
                ("thumb".to_string(), entry(1)),
                ("medium".to_string(), entry(2)),
            ]
            .into(),
            Some(entry(3)),
        )
    }

    fn manager(root: &Path) -> LocalSaver {
        LocalSaver::new(
            Arc::new(LocalSaverConfig::new(root)),
            schema(),
            Arc::new(NullLogger),
        )
    }

    #[test]
    fn save_writes_to_the_predicted_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut saver = manager(tmp.path());
        let resultset = resultset();

        let predicted = saver
            .generate_filenames(&resultset, "guid1", None, None)
            .unwrap();
        let saved = saver
            .files_save(&resultset, "guid1", None, None, false)
            .unwrap();
        assert_eq!(saved, predicted);

        for entry in saved.values() {
            let path = tmp.path().join(&entry.target).join(&entry.filename);
            assert!(path.exists(), "missing {}", path.display());
        }
    }

    #[test]
    fn archive_entry_stores_the_original_bytes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut saver = manager(tmp.path());
        let resultset = resultset();

        let saved = saver
            .files_save(&resultset, "guid1", None, Some(true), false)
            .unwrap();
        let archive = &saved[ARCHIVE_KEY];
        assert_eq!(archive.filename, "guid1.jpg");
        assert_eq!(archive.target, "archive");

        let stored = fs::read(tmp.path().join("archive").join("guid1.jpg")).unwrap();
        assert_eq!(stored, vec![3u8; 24]);
    }

    #[test]
    fn delete_removes_files_and_prunes_empty_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut saver = manager(tmp.path());
        let resultset = resultset();

        let saved = saver
            .files_save(&resultset, "guid1", None, None, false)
            .unwrap();
        let drained = saver.files_delete(saved, false).unwrap();
        assert!(drained.is_empty());

        assert!(!tmp.path().join("public").exists());
        assert!(!tmp.path().join("archive").exists());
    }

    #[test]
    fn failed_write_mid_loop_rolls_back_earlier_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        // block the "thumb" write by occupying its target with a file
        fs::write(tmp.path().join("thumb-target"), b"in the way").unwrap();

        let schema = Arc::new(
            ResizesSchema::new(
                [
                    (
                        "medium".to_string(),
                        ResizeInstruction::new(400, 400, ConstraintMethod::FitWithin),
                    ),
                    (
                        "thumb".to_string(),
                        ResizeInstruction::new(120, 120, ConstraintMethod::FitWithin)
                            .with_storage_target("thumb-target"),
                    ),
                ]
                .into(),
            )
            .unwrap(),
        );
        let logger = Arc::new(RecordingLogger::default());
        let mut saver = LocalSaver::new(
            Arc::new(LocalSaverConfig::new(tmp.path())),
            schema,
            Arc::clone(&logger) as Arc<dyn SaverLogger>,
        );

        let resultset = resultset();
        let err = saver
            .files_save(&resultset, "guid1", None, Some(false), false)
            .unwrap_err();
        match err {
            ImageError::Upload { size, .. } => assert_eq!(size, "thumb"),
            other => panic!("expected upload error, got {other:?}"),
        }

        // the successfully written "medium" file was rolled back again
        assert!(!tmp.path().join("public").join("guid1-medium.jpg").exists());
        // one save hook, one compensating delete hook
        assert_eq!(logger.saves.lock().unwrap().len(), 1);
        assert_eq!(logger.deletes.lock().unwrap().len(), 1);
    }

    #[test]
    fn dry_run_save_writes_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut saver = manager(tmp.path());
        let saved = saver
            .files_save(&resultset(), "guid1", None, None, true)
            .unwrap();
        assert_eq!(saved.len(), 3);
        assert!(!tmp.path().join("public").exists());
    }

    #[test]
    fn simple_access_saves_and_deletes_one_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let factory = LocalSaverFactory::new(
            LocalSaverConfig::new(tmp.path()),
            schema(),
            Arc::new(NullLogger),
        );
        let mut simple = factory.simple_access();

        let image = DerivedImage::from_parts(vec![9u8; 8], Format::Pdf, None);
        let saved = simple.file_save("reports", "summary.pdf", &image, false).unwrap();
        assert_eq!(saved, simple.saves_mapping("reports", "summary.pdf"));
        assert!(tmp.path().join("reports").join("summary.pdf").exists());

        simple.files_delete(saved, false).unwrap();
        assert!(!tmp.path().join("reports").exists());
    }

    #[test]
    fn selection_subset_saves_only_those_sizes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut saver = manager(tmp.path());
        let saved = saver
            .files_save(
                &resultset(),
                "guid1",
                Some(&["thumb".to_string()]),
                Some(false),
                false,
            )
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert!(tmp.path().join("public").join("guid1-thumb.jpg").exists());
        assert!(!tmp.path().join("public").join("guid1-medium.jpg").exists());
    }
}
