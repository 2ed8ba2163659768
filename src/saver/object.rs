//! Object-storage persistence backed by `object_store`.
//!
//! Storage targets are bucket names. Two synthetic targets always resolve:
//! [`PUBLIC_TARGET`] (the configured public bucket) and `@archive` (the
//! configured archive bucket); per-size overrides in the schema register
//! their buckets as well, and anything else is a configuration error.
//!
//! `object_store` is async-only while this crate's surface is blocking, so
//! each manager owns a small tokio runtime and drives the client with
//! `block_on`. The runtime and one client per bucket are created lazily on
//! the first real write and memoized for the life of the manager; dry runs
//! and filename planning never touch the network.
//!
//! Upload payloads are copied into the client's buffer, so the derived
//! image keeps its bytes after a save.

use super::{
    plan_filenames, plan_writes, run_delete, run_save, PlannedWrite, SavedFiles, SaverLogger,
    StorageOps, TargetDefaults, ARCHIVE_KEY,
};
use crate::errors::{ImageError, Result};
use crate::params::{ResizesSchema, StorageExtras};
use crate::resizer::ResizerResultset;
use crate::wrapper::DerivedImage;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Synthetic target resolving to the configured public bucket.
pub const PUBLIC_TARGET: &str = "@public";

/// Credentials, buckets, and default object metadata for the bucket
/// backend. Credential fields left `None` fall back to the environment.
#[derive(Debug, Clone, Default)]
pub struct ObjectSaverConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, Spaces, ...).
    pub endpoint: Option<String>,
    /// Default bucket for derivatives.
    pub bucket_public: String,
    /// Bucket for archived originals, when archiving is wanted.
    pub bucket_archive: Option<String>,
    /// Default metadata for derivative uploads.
    pub extras_public: StorageExtras,
    /// Default metadata for archive uploads.
    pub extras_archive: StorageExtras,
    /// Default archive behavior when a call passes `None`.
    pub archive_original: Option<bool>,
}

impl ObjectSaverConfig {
    pub fn new(bucket_public: impl Into<String>) -> ObjectSaverConfig {
        ObjectSaverConfig {
            bucket_public: bucket_public.into(),
            ..ObjectSaverConfig::default()
        }
    }

    pub fn with_archive_bucket(mut self, bucket: impl Into<String>) -> ObjectSaverConfig {
        self.bucket_archive = Some(bucket.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> ObjectSaverConfig {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> ObjectSaverConfig {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> ObjectSaverConfig {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Blocking facade over `object_store`: lazily-created runtime, one
/// memoized client per bucket, and the target-name resolution table.
struct ObjectBackend {
    config: Arc<ObjectSaverConfig>,
    bucket_names: HashMap<String, String>,
    runtime: Option<Runtime>,
    clients: HashMap<String, AmazonS3>,
}

impl ObjectBackend {
    fn new(config: Arc<ObjectSaverConfig>, schema: Option<&ResizesSchema>) -> ObjectBackend {
        let mut bucket_names = HashMap::new();
        bucket_names.insert(config.bucket_public.clone(), config.bucket_public.clone());
        bucket_names.insert(PUBLIC_TARGET.to_string(), config.bucket_public.clone());
        if let Some(archive) = &config.bucket_archive {
            bucket_names.insert(archive.clone(), archive.clone());
            bucket_names.insert(ARCHIVE_KEY.to_string(), archive.clone());
        }
        if let Some(schema) = schema {
            for name in schema.names() {
                if let Some(instruction) = schema.get(name) {
                    if let Some(target) = &instruction.storage_target {
                        bucket_names.insert(target.clone(), target.clone());
                    }
                }
            }
        }
        ObjectBackend {
            config,
            bucket_names,
            runtime: None,
            clients: HashMap::new(),
        }
    }

    fn resolve_target(&self, target: &str) -> Result<String> {
        self.bucket_names.get(target).cloned().ok_or_else(|| {
            ImageError::Config(format!("unknown storage target `{target}`"))
        })
    }

    fn runtime(&mut self) -> Result<&Runtime> {
        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => Runtime::new()?,
        };
        Ok(self.runtime.insert(runtime))
    }

    fn client(&mut self, bucket: &str) -> Result<AmazonS3> {
        if let Some(client) = self.clients.get(bucket) {
            return Ok(client.clone());
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(key) = &self.config.access_key_id {
            builder = builder.with_access_key_id(key.clone());
        }
        if let Some(secret) = &self.config.secret_access_key {
            builder = builder.with_secret_access_key(secret.clone());
        }
        if let Some(region) = &self.config.region {
            builder = builder.with_region(region.clone());
        }
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let client = builder.build()?;
        self.clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

impl StorageOps for ObjectBackend {
    fn write(
        &mut self,
        target: &str,
        filename: &str,
        image: &DerivedImage,
        extras: &StorageExtras,
    ) -> Result<()> {
        let bucket = self.resolve_target(target)?;
        let client = self.client(&bucket)?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, image.format().content_type().into());
        if let Some(value) = &extras.cache_control {
            attributes.insert(Attribute::CacheControl, value.clone().into());
        }
        if let Some(value) = &extras.content_disposition {
            attributes.insert(Attribute::ContentDisposition, value.clone().into());
        }
        if let Some(value) = &extras.content_encoding {
            attributes.insert(Attribute::ContentEncoding, value.clone().into());
        }
        if let Some(value) = &extras.content_language {
            attributes.insert(Attribute::ContentLanguage, value.clone().into());
        }
        for (key, value) in &extras.metadata {
            attributes.insert(
                Attribute::Metadata(key.clone().into()),
                value.clone().into(),
            );
        }
        let options = PutOptions {
            attributes,
            ..PutOptions::default()
        };

        let location = ObjectPath::from(filename);
        // copy, so the caller's image keeps its buffer
        let payload = PutPayload::from(Bytes::copy_from_slice(image.bytes()));

        let runtime = self.runtime()?;
        runtime.block_on(client.put_opts(&location, payload, options))?;
        log::debug!("uploaded `{filename}` to `{bucket}`");
        Ok(())
    }

    fn remove(&mut self, target: &str, filename: &str) -> Result<()> {
        let bucket = self.resolve_target(target)?;
        let client = self.client(&bucket)?;
        let location = ObjectPath::from(filename);

        let runtime = self.runtime()?;
        match runtime.block_on(client.delete(&location)) {
            Ok(()) => {}
            // an already-absent key is fine for both deletes and rollback
            Err(object_store::Error::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        log::debug!("deleted `{filename}` from `{bucket}`");
        Ok(())
    }
}

/// Bundles config + schema + logger and stamps out single-flight managers.
#[derive(Clone)]
pub struct ObjectSaverFactory {
    config: Arc<ObjectSaverConfig>,
    schema: Arc<ResizesSchema>,
    logger: Arc<dyn SaverLogger>,
}

impl ObjectSaverFactory {
    pub fn new(
        config: ObjectSaverConfig,
        schema: Arc<ResizesSchema>,
        logger: Arc<dyn SaverLogger>,
    ) -> ObjectSaverFactory {
        ObjectSaverFactory {
            config: Arc::new(config),
            schema,
            logger,
        }
    }

    pub fn manager(&self) -> ObjectSaver {
        ObjectSaver::new(
            Arc::clone(&self.config),
            Arc::clone(&self.schema),
            Arc::clone(&self.logger),
        )
    }

    pub fn simple_access(&self) -> ObjectSimpleAccess {
        ObjectSimpleAccess {
            backend: ObjectBackend::new(Arc::clone(&self.config), None),
            logger: Arc::clone(&self.logger),
        }
    }
}

/// Schema-driven persistence of whole resultsets to object storage.
pub struct ObjectSaver {
    schema: Arc<ResizesSchema>,
    logger: Arc<dyn SaverLogger>,
    backend: ObjectBackend,
}

impl ObjectSaver {
    pub fn new(
        config: Arc<ObjectSaverConfig>,
        schema: Arc<ResizesSchema>,
        logger: Arc<dyn SaverLogger>,
    ) -> ObjectSaver {
        let backend = ObjectBackend::new(config, Some(&schema));
        ObjectSaver {
            schema,
            logger,
            backend,
        }
    }

    fn targets(&self) -> TargetDefaults<'_> {
        TargetDefaults {
            default_target: &self.backend.config.bucket_public,
            archive_target: self.backend.config.bucket_archive.as_deref(),
        }
    }

    /// The keys and buckets a save call would produce.
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
            archive_original.or(self.backend.config.archive_original),
            self.targets(),
        )
    }

    /// Upload every selected derivative (and the archived original where
    /// the tri-state flag says so). All-or-nothing: a failed upload deletes
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
            &self.backend.config.extras_public,
            &self.backend.config.extras_archive,
        )?;
        run_save(&mut self.backend, self.logger.as_ref(), plan, dry_run)
    }

    /// Delete a saved-files mapping, draining it in place.
    pub fn files_delete(&mut self, mut files: SavedFiles, dry_run: bool) -> Result<SavedFiles> {
        run_delete(&mut self.backend, self.logger.as_ref(), &mut files, dry_run)?;
        Ok(files)
    }
}

/// Ad-hoc single-object storage sharing the bucket backend's connections
/// and delete conventions, without the schema machinery.
pub struct ObjectSimpleAccess {
    backend: ObjectBackend,
    logger: Arc<dyn SaverLogger>,
}

impl ObjectSimpleAccess {
    pub fn new(config: Arc<ObjectSaverConfig>, logger: Arc<dyn SaverLogger>) -> ObjectSimpleAccess {
        ObjectSimpleAccess {
            backend: ObjectBackend::new(config, None),
            logger,
        }
    }

    /// Store one image under an explicit bucket (or synthetic target) and
    /// key.
    pub fn file_save(
        &mut self,
        bucket: &str,
        filename: &str,
        image: &DerivedImage,
        dry_run: bool,
    ) -> Result<SavedFiles> {
        // fail on unknown targets before any upload
        self.backend.resolve_target(bucket)?;
        let plan = vec![PlannedWrite {
            size: simple_key(bucket, filename),
            filename: filename.to_string(),
            target: bucket.to_string(),
            image,
            extras: self.backend.config.extras_public.clone(),
        }];
        run_save(&mut self.backend, self.logger.as_ref(), plan, dry_run)
    }

    /// The mapping `file_save` would record, for symmetric deletes.
    pub fn saves_mapping(&self, bucket: &str, filename: &str) -> SavedFiles {
        SavedFiles::from([(
            simple_key(bucket, filename),
            super::SavedEntry {
                filename: filename.to_string(),
                target: bucket.to_string(),
            },
        )])
    }

    pub fn files_delete(&mut self, mut files: SavedFiles, dry_run: bool) -> Result<SavedFiles> {
        run_delete(&mut self.backend, self.logger.as_ref(), &mut files, dry_run)?;
        Ok(files)
    }
}

fn simple_key(target: &str, filename: &str) -> String {
    format!("{target}||{filename}")
}
