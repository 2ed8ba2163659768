//! Persistence: filename derivation, transactional save, delete.
//!
//! Both backends (subdirectories under a root, buckets in an object store)
//! share everything except the actual byte movement: selection validation,
//! the filename template language, the archive-the-original decision, and
//! the all-or-nothing save loop. The shared pieces live here, generic over
//! a small internal [`StorageOps`] seam; the backends supply the I/O.
//!
//! ## The save transaction
//!
//! `files_save` records every successful write. If any write fails, every
//! recorded write is deleted again in reverse order — best effort, a failed
//! rollback step is logged and skipped — and the *original* error is
//! returned, annotated with the size, target, and filename that failed.
//! Callers are never left with a silently half-persisted set.
//!
//! ## Filename templates
//!
//! Templates substitute `%(guid)s`, `%(suffix)s`, and `%(format)s`
//! verbatim; the format value is the standardized lowercase token. The
//! default is [`FILENAME_TEMPLATE_DEFAULT`]; archived originals use the
//! simpler [`FILENAME_TEMPLATE_ARCHIVE`].

pub mod localfile;
pub mod object;

use crate::errors::{ImageError, Result};
use crate::params::{ResizesSchema, StorageExtras, RESERVED_PREFIX};
use crate::resizer::{ResizerResultset, ResultImage};
use crate::wrapper::DerivedImage;
use std::collections::{BTreeMap, BTreeSet};

/// Default filename template for derivatives.
pub const FILENAME_TEMPLATE_DEFAULT: &str = "%(guid)s-%(suffix)s.%(format)s";
/// Filename template for the archived original.
pub const FILENAME_TEMPLATE_ARCHIVE: &str = "%(guid)s.%(format)s";
/// Synthetic mapping key for the archived original.
pub const ARCHIVE_KEY: &str = "@archive";

/// Hook invoked synchronously after each successful backend operation.
///
/// Implementations must not panic: the hook runs inside the save loop, so
/// an unwinding hook aborts the save exactly like a failed write would.
pub trait SaverLogger: Send + Sync {
    fn log_save(&self, target: &str, key: &str, size: u64, checksum: &str) {
        let _ = (target, key, size, checksum);
    }

    fn log_delete(&self, target: &str, key: &str) {
        let _ = (target, key);
    }
}

/// The do-nothing logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl SaverLogger for NullLogger {}

/// Where one entry ended up: its filename and its storage target (bucket
/// or subdirectory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedEntry {
    pub filename: String,
    pub target: String,
}

/// Mapping of size name (plus [`ARCHIVE_KEY`]) to its saved location.
pub type SavedFiles = BTreeMap<String, SavedEntry>;

/// Substitute the three template placeholders.
pub fn render_template(template: &str, guid: &str, suffix: &str, format_token: &str) -> String {
    template
        .replace("%(guid)s", guid)
        .replace("%(suffix)s", suffix)
        .replace("%(format)s", format_token)
}

/// Internal seam between the shared save/delete loops and the two backends.
pub(crate) trait StorageOps {
    fn write(
        &mut self,
        target: &str,
        filename: &str,
        image: &DerivedImage,
        extras: &StorageExtras,
    ) -> Result<()>;

    fn remove(&mut self, target: &str, filename: &str) -> Result<()>;
}

/// Resolve the tri-state archive flag against a resultset.
///
/// `Some(false)`: never archive. `Some(true)`: archive, erroring when the
/// resultset has no original. `None`: archive exactly when an original is
/// present.
pub(crate) fn check_archive_original(
    resultset: &ResizerResultset,
    archive_original: Option<bool>,
) -> Result<bool> {
    match archive_original {
        Some(false) => Ok(false),
        None => Ok(resultset.has_original()),
        Some(true) => {
            if resultset.has_original() {
                Ok(true)
            } else {
                Err(ImageError::Config(
                    "archiving was requested but the resultset has no original".to_string(),
                ))
            }
        }
    }
}

/// Validate a saver-level selection: every name must exist in both the
/// resultset and the schema and must not be reserved. `None` selects every
/// size the resultset carries. Unlike the orchestrator, an explicit empty
/// selection is allowed — it saves nothing but the archive entry.
pub(crate) fn validate_selected(
    resultset: &ResizerResultset,
    schema: &ResizesSchema,
    selected: Option<&[String]>,
) -> Result<Vec<String>> {
    let selected: BTreeSet<String> = match selected {
        Some(names) => names.iter().cloned().collect(),
        None => resultset.sizes().map(str::to_owned).collect(),
    };

    for name in &selected {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(ImageError::Config(format!(
                "`{RESERVED_PREFIX}` is a reserved initial character for image sizes (`{name}`)"
            )));
        }
        if !resultset.contains(name) {
            return Err(ImageError::Config(format!(
                "selected size `{name}` is not in the resultset"
            )));
        }
        if !schema.contains(name) {
            return Err(ImageError::Config(format!(
                "selected size `{name}` is not in the schema"
            )));
        }
    }
    Ok(selected.into_iter().collect())
}

/// Backend-specific defaults fed into filename planning.
pub(crate) struct TargetDefaults<'a> {
    /// Target used when an instruction has no per-size override.
    pub default_target: &'a str,
    /// Target for the archived original, when the backend has one.
    pub archive_target: Option<&'a str>,
}

/// Derive the full target mapping for a save call. Works for both real and
/// placeholder resultsets; this is the "what filenames *would* this
/// produce" operation.
pub(crate) fn plan_filenames(
    resultset: &ResizerResultset,
    schema: &ResizesSchema,
    guid: &str,
    selected: Option<&[String]>,
    archive_original: Option<bool>,
    targets: TargetDefaults<'_>,
) -> Result<SavedFiles> {
    if guid.trim().is_empty() {
        return Err(ImageError::Args(
            "a guid is required for filename templating".to_string(),
        ));
    }

    let selected = validate_selected(resultset, schema, selected)?;

    let mut mapping = SavedFiles::new();
    for size in &selected {
        let entry = resultset
            .get(size)
            .ok_or_else(|| ImageError::Config(format!("size `{size}` missing from resultset")))?;
        let instruction = schema
            .get(size)
            .ok_or_else(|| ImageError::Config(format!("size `{size}` missing from schema")))?;

        let template = instruction
            .filename_template
            .as_deref()
            .unwrap_or(FILENAME_TEMPLATE_DEFAULT);
        let suffix = instruction.suffix.as_deref().unwrap_or(size);
        let filename = render_template(template, guid, suffix, entry.format().standardized());

        let target = instruction
            .storage_target
            .clone()
            .unwrap_or_else(|| targets.default_target.to_string());

        mapping.insert(size.clone(), SavedEntry { filename, target });
    }

    if check_archive_original(resultset, archive_original)? {
        let original = resultset
            .original()
            .ok_or_else(|| ImageError::Config("resultset has no original".to_string()))?;
        let filename = render_template(
            FILENAME_TEMPLATE_ARCHIVE,
            guid,
            "",
            original.format().standardized(),
        );
        let target = targets.archive_target.ok_or_else(|| {
            ImageError::Config("no archive storage target is configured".to_string())
        })?;
        mapping.insert(
            ARCHIVE_KEY.to_string(),
            SavedEntry {
                filename,
                target: target.to_string(),
            },
        );
    }

    Ok(mapping)
}

/// One pending write of the save transaction.
#[derive(Debug)]
pub(crate) struct PlannedWrite<'a> {
    pub size: String,
    pub filename: String,
    pub target: String,
    pub image: &'a DerivedImage,
    pub extras: StorageExtras,
}

/// Expand a target mapping into concrete writes: derivatives first (in
/// mapping order), the archived original last. Placeholder entries cannot
/// be written and fail here, before any I/O.
pub(crate) fn plan_writes<'a>(
    resultset: &'a ResizerResultset,
    schema: &ResizesSchema,
    mapping: &SavedFiles,
    default_extras: &StorageExtras,
    archive_extras: &StorageExtras,
) -> Result<Vec<PlannedWrite<'a>>> {
    let mut plan = Vec::new();

    for (size, saved) in mapping.iter().filter(|(size, _)| *size != ARCHIVE_KEY) {
        let entry = resultset
            .get(size)
            .ok_or_else(|| ImageError::Config(format!("size `{size}` missing from resultset")))?;
        let image = require_real(entry, size)?;
        let instruction = schema
            .get(size)
            .ok_or_else(|| ImageError::Config(format!("size `{size}` missing from schema")))?;
        let extras = match &instruction.storage_extras {
            Some(extras) => extras.merged_over(default_extras),
            None => default_extras.clone(),
        };
        plan.push(PlannedWrite {
            size: size.clone(),
            filename: saved.filename.clone(),
            target: saved.target.clone(),
            image,
            extras,
        });
    }

    if let Some(saved) = mapping.get(ARCHIVE_KEY) {
        let original = resultset
            .original()
            .ok_or_else(|| ImageError::Config("resultset has no original".to_string()))?;
        let image = require_real(original, ARCHIVE_KEY)?;
        plan.push(PlannedWrite {
            size: ARCHIVE_KEY.to_string(),
            filename: saved.filename.clone(),
            target: saved.target.clone(),
            image,
            extras: archive_extras.clone(),
        });
    }

    Ok(plan)
}

fn require_real<'a>(entry: &'a ResultImage, size: &str) -> Result<&'a DerivedImage> {
    entry.as_real().ok_or_else(|| {
        ImageError::Config(format!(
            "size `{size}` is a planning placeholder with no image data"
        ))
    })
}

/// The transactional save loop. Every successful write is recorded; on the
/// first failure all recorded writes are unwound (reverse order, best
/// effort) and the original failure propagates.
pub(crate) fn run_save<O: StorageOps>(
    ops: &mut O,
    logger: &dyn SaverLogger,
    plan: Vec<PlannedWrite<'_>>,
    dry_run: bool,
) -> Result<SavedFiles> {
    let mut committed: Vec<(String, SavedEntry)> = Vec::new();

    for item in plan {
        if !dry_run {
            if let Err(err) = ops.write(&item.target, &item.filename, item.image, &item.extras) {
                let err = err.upload_context(&item.size, &item.target, &item.filename);
                log::warn!(
                    "save of `{}` failed, rolling back {} earlier write(s)",
                    item.size,
                    committed.len()
                );
                unwind(ops, logger, committed);
                return Err(err);
            }
            logger.log_save(
                &item.target,
                &item.filename,
                item.image.len(),
                &item.image.checksum(),
            );
            log::info!("saved `{}` as `{}/{}`", item.size, item.target, item.filename);
        }
        committed.push((
            item.size,
            SavedEntry {
                filename: item.filename,
                target: item.target,
            },
        ));
    }

    Ok(committed.into_iter().collect())
}

/// Reverse-order compensation for a failed save. A failing rollback step is
/// logged and skipped so it can never mask the write error that started the
/// unwind.
fn unwind<O: StorageOps>(
    ops: &mut O,
    logger: &dyn SaverLogger,
    committed: Vec<(String, SavedEntry)>,
) {
    for (size, entry) in committed.into_iter().rev() {
        match ops.remove(&entry.target, &entry.filename) {
            Ok(()) => logger.log_delete(&entry.target, &entry.filename),
            Err(err) => log::warn!(
                "rollback of `{size}` (`{}/{}`) failed: {err}",
                entry.target,
                entry.filename
            ),
        }
    }
}

/// The delete loop: remove each entry from its backend and drain the
/// mapping in place. Entries are not pre-checked for existence; a missing
/// key is the backend's concern.
pub(crate) fn run_delete<O: StorageOps>(
    ops: &mut O,
    logger: &dyn SaverLogger,
    files: &mut SavedFiles,
    dry_run: bool,
) -> Result<()> {
    let sizes: Vec<String> = files.keys().cloned().collect();
    for size in sizes {
        let Some(entry) = files.get(&size).cloned() else {
            continue;
        };
        if !dry_run {
            ops.remove(&entry.target, &entry.filename)
                .map_err(|err| err.delete_context(&size, &entry.target, &entry.filename))?;
            logger.log_delete(&entry.target, &entry.filename);
            log::info!("deleted `{size}` (`{}/{}`)", entry.target, entry.filename);
        }
        files.remove(&size);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::{MockOps, RecordingLogger};
    use super::*;
    use crate::formats::{Format, FormatSpec};
    use crate::geometry::ConstraintMethod;
    use crate::params::ResizeInstruction;
    use crate::resizer::ResultImage;
    use crate::wrapper::{DerivedImage, FakedImage};

    fn schema() -> ResizesSchema {
        ResizesSchema::new(
            [
                (
                    "thumb".to_string(),
                    ResizeInstruction::new(120, 120, ConstraintMethod::FitWithinCropTo),
                ),
                (
                    "banner".to_string(),
                    ResizeInstruction::new(600, 200, ConstraintMethod::FitWithin)
                        .with_suffix("wide")
                        .with_filename_template("%(suffix)s/%(guid)s.%(format)s")
                        .with_storage_target("banners"),
                ),
            ]
            .into(),
        )
        .unwrap()
    }

    fn real_entry(format: Format) -> ResultImage {
        ResultImage::Real(DerivedImage::from_parts(vec![7u8; 16], format, None))
    }

    fn resultset() -> ResizerResultset {
        ResizerResultset::new(
            [
                ("thumb".to_string(), real_entry(Format::Jpeg)),
                ("banner".to_string(), real_entry(Format::Png)),
            ]
            .into(),
            Some(real_entry(Format::Jpeg)),
        )
    }

    fn targets() -> TargetDefaults<'static> {
        TargetDefaults {
            default_target: "public",
            archive_target: Some("archive"),
        }
    }

    #[test]
    fn template_substitutes_all_placeholders() {
        assert_eq!(
            render_template(FILENAME_TEMPLATE_DEFAULT, "abc123", "thumb", "jpg"),
            "abc123-thumb.jpg"
        );
        assert_eq!(
            render_template(FILENAME_TEMPLATE_ARCHIVE, "abc123", "", "png"),
            "abc123.png"
        );
    }

    #[test]
    fn plan_uses_default_template_and_size_name_suffix() {
        let mapping =
            plan_filenames(&resultset(), &schema(), "guid1", None, Some(false), targets()).unwrap();
        assert_eq!(mapping["thumb"].filename, "guid1-thumb.jpg");
        assert_eq!(mapping["thumb"].target, "public");
    }

    #[test]
    fn plan_honors_template_suffix_and_target_overrides() {
        let mapping =
            plan_filenames(&resultset(), &schema(), "guid1", None, Some(false), targets()).unwrap();
        assert_eq!(mapping["banner"].filename, "wide/guid1.png");
        assert_eq!(mapping["banner"].target, "banners");
    }

    #[test]
    fn plan_adds_archive_entry_with_simple_template() {
        let mapping =
            plan_filenames(&resultset(), &schema(), "guid1", None, None, targets()).unwrap();
        assert_eq!(mapping[ARCHIVE_KEY].filename, "guid1.jpg");
        assert_eq!(mapping[ARCHIVE_KEY].target, "archive");
    }

    #[test]
    fn plan_rejects_empty_guid() {
        let err =
            plan_filenames(&resultset(), &schema(), "  ", None, Some(false), targets()).unwrap_err();
        assert!(matches!(err, ImageError::Args(_)));
    }

    #[test]
    fn plan_rejects_selection_missing_from_resultset() {
        let err = plan_filenames(
            &resultset(),
            &schema(),
            "guid1",
            Some(&["huge".to_string()]),
            Some(false),
            targets(),
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::Config(_)));
    }

    #[test]
    fn plan_rejects_reserved_selection() {
        let err = plan_filenames(
            &resultset(),
            &schema(),
            "guid1",
            Some(&["@foo".to_string()]),
            Some(false),
            targets(),
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::Config(_)));
    }

    #[test]
    fn plan_works_on_placeholder_resultsets() {
        let faked = ResizerResultset::new(
            [(
                "thumb".to_string(),
                ResultImage::Faked(FakedImage::from_schema(Format::Png, Some(120), Some(120))),
            )]
            .into(),
            Some(ResultImage::Faked(
                FakedImage::from_filename("old.gif").unwrap(),
            )),
        );
        let mapping =
            plan_filenames(&faked, &schema(), "guid1", None, None, targets()).unwrap();
        assert_eq!(mapping["thumb"].filename, "guid1-thumb.png");
        assert_eq!(mapping[ARCHIVE_KEY].filename, "guid1.gif");
    }

    #[test]
    fn archive_tristate_explicit_false_never_archives() {
        assert!(!check_archive_original(&resultset(), Some(false)).unwrap());
    }

    #[test]
    fn archive_tristate_default_follows_the_original() {
        assert!(check_archive_original(&resultset(), None).unwrap());
        let without = ResizerResultset::new(
            [("thumb".to_string(), real_entry(Format::Jpeg))].into(),
            None,
        );
        assert!(!check_archive_original(&without, None).unwrap());
    }

    #[test]
    fn archive_tristate_explicit_true_requires_an_original() {
        assert!(check_archive_original(&resultset(), Some(true)).unwrap());
        let without = ResizerResultset::new(
            [("thumb".to_string(), real_entry(Format::Jpeg))].into(),
            None,
        );
        assert!(matches!(
            check_archive_original(&without, Some(true)),
            Err(ImageError::Config(_))
        ));
    }

    #[test]
    fn save_writes_derivatives_then_archive_and_logs_each() {
        let resultset = resultset();
        let schema = schema();
        let mapping =
            plan_filenames(&resultset, &schema, "guid1", None, None, targets()).unwrap();
        let plan = plan_writes(
            &resultset,
            &schema,
            &mapping,
            &StorageExtras::default(),
            &StorageExtras::default(),
        )
        .unwrap();

        let mut ops = MockOps::default();
        let logger = RecordingLogger::default();
        let saved = run_save(&mut ops, &logger, plan, false).unwrap();

        assert_eq!(saved.len(), 3);
        let written: Vec<&str> = ops.writes.iter().map(|(_, f)| f.as_str()).collect();
        // mapping order for derivatives, archive last
        assert_eq!(written, ["wide/guid1.png", "guid1-thumb.jpg", "guid1.jpg"]);
        assert_eq!(logger.saves.lock().unwrap().len(), 3);
    }

    #[test]
    fn save_round_trip_matches_planned_filenames() {
        let resultset = resultset();
        let schema = schema();
        let mapping =
            plan_filenames(&resultset, &schema, "guid1", None, None, targets()).unwrap();
        let plan = plan_writes(
            &resultset,
            &schema,
            &mapping,
            &StorageExtras::default(),
            &StorageExtras::default(),
        )
        .unwrap();

        let mut ops = MockOps::default();
        let saved = run_save(&mut ops, &NullLogger, plan, false).unwrap();
        assert_eq!(saved, mapping);
    }

    #[test]
    fn failed_write_rolls_back_every_earlier_write() {
        let resultset = resultset();
        let schema = schema();
        let mapping =
            plan_filenames(&resultset, &schema, "guid1", None, None, targets()).unwrap();
        let plan = plan_writes(
            &resultset,
            &schema,
            &mapping,
            &StorageExtras::default(),
            &StorageExtras::default(),
        )
        .unwrap();

        let mut ops = MockOps {
            fail_on_write: Some(2),
            ..MockOps::default()
        };
        let logger = RecordingLogger::default();
        let err = run_save(&mut ops, &logger, plan, false).unwrap_err();

        assert!(matches!(err, ImageError::Upload { .. }));
        // exactly the two successful writes were deleted, newest first
        assert_eq!(ops.removes.len(), ops.writes.len());
        assert_eq!(
            ops.removes,
            vec![
                ("public".to_string(), "guid1-thumb.jpg".to_string()),
                ("banners".to_string(), "wide/guid1.png".to_string()),
            ]
        );
        assert_eq!(logger.deletes.lock().unwrap().len(), 2);
    }

    #[test]
    fn rollback_failures_do_not_mask_the_write_error() {
        let resultset = resultset();
        let schema = schema();
        let mapping =
            plan_filenames(&resultset, &schema, "guid1", None, None, targets()).unwrap();
        let plan = plan_writes(
            &resultset,
            &schema,
            &mapping,
            &StorageExtras::default(),
            &StorageExtras::default(),
        )
        .unwrap();

        let mut ops = MockOps {
            fail_on_write: Some(1),
            fail_removes: true,
            ..MockOps::default()
        };
        let err = run_save(&mut ops, &NullLogger, plan, false).unwrap_err();
        match err {
            ImageError::Upload { size, .. } => assert_eq!(size, "thumb"),
            other => panic!("expected the write error, got {other:?}"),
        }
    }

    #[test]
    fn dry_run_save_touches_nothing_but_returns_the_mapping() {
        let resultset = resultset();
        let schema = schema();
        let mapping =
            plan_filenames(&resultset, &schema, "guid1", None, None, targets()).unwrap();
        let plan = plan_writes(
            &resultset,
            &schema,
            &mapping,
            &StorageExtras::default(),
            &StorageExtras::default(),
        )
        .unwrap();

        let mut ops = MockOps::default();
        let logger = RecordingLogger::default();
        let saved = run_save(&mut ops, &logger, plan, true).unwrap();

        assert_eq!(saved, mapping);
        assert!(ops.writes.is_empty());
        assert!(logger.saves.lock().unwrap().is_empty());
    }

    #[test]
    fn placeholder_entries_refuse_real_saves() {
        let faked = ResizerResultset::new(
            [(
                "thumb".to_string(),
                ResultImage::Faked(FakedImage::from_schema(Format::Jpeg, Some(120), Some(120))),
            )]
            .into(),
            None,
        );
        let mapping =
            plan_filenames(&faked, &schema(), "guid1", None, Some(false), targets()).unwrap();
        let err = plan_writes(
            &faked,
            &schema(),
            &mapping,
            &StorageExtras::default(),
            &StorageExtras::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::Config(_)));
    }

    #[test]
    fn delete_drains_the_mapping_and_logs() {
        let mut files = SavedFiles::from([
            (
                "thumb".to_string(),
                SavedEntry {
                    filename: "guid1-thumb.jpg".to_string(),
                    target: "public".to_string(),
                },
            ),
            (
                ARCHIVE_KEY.to_string(),
                SavedEntry {
                    filename: "guid1.jpg".to_string(),
                    target: "archive".to_string(),
                },
            ),
        ]);

        let mut ops = MockOps::default();
        let logger = RecordingLogger::default();
        run_delete(&mut ops, &logger, &mut files, false).unwrap();

        assert!(files.is_empty());
        assert_eq!(ops.removes.len(), 2);
        assert_eq!(logger.deletes.lock().unwrap().len(), 2);
    }

    #[test]
    fn dry_run_delete_drains_without_touching_the_backend() {
        let mut files = SavedFiles::from([(
            "thumb".to_string(),
            SavedEntry {
                filename: "guid1-thumb.jpg".to_string(),
                target: "public".to_string(),
            },
        )]);

        let mut ops = MockOps::default();
        run_delete(&mut ops, &NullLogger, &mut files, true).unwrap();
        assert!(files.is_empty());
        assert!(ops.removes.is_empty());
    }

    #[test]
    fn delete_failure_carries_context_and_keeps_the_entry() {
        let mut files = SavedFiles::from([(
            "thumb".to_string(),
            SavedEntry {
                filename: "guid1-thumb.jpg".to_string(),
                target: "public".to_string(),
            },
        )]);

        let mut ops = MockOps {
            fail_removes: true,
            ..MockOps::default()
        };
        let err = run_delete(&mut ops, &NullLogger, &mut files, false).unwrap_err();
        assert!(matches!(err, ImageError::Delete { .. }));
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn auto_format_entries_standardize_through_the_entry_format() {
        let schema = ResizesSchema::new(
            [(
                "thumb".to_string(),
                ResizeInstruction::new(120, 120, ConstraintMethod::FitWithin)
                    .with_format(FormatSpec::Auto),
            )]
            .into(),
        )
        .unwrap();
        // a PNG derivative produced from an AUTO instruction names itself .png
        let resultset = ResizerResultset::new(
            [("thumb".to_string(), real_entry(Format::Png))].into(),
            None,
        );
        let mapping =
            plan_filenames(&resultset, &schema, "guid1", None, Some(false), targets()).unwrap();
        assert_eq!(mapping["thumb"].filename, "guid1-thumb.png");
    }
}
