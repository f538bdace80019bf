use std::{
    collections::HashSet,
    fs, panic,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;

use super::{object_key, UploadClient, UploadOptions};
use crate::{
    config::{ResolvedConfig, DEFAULT_CONCURRENCY},
    LogOptions, LogSink, ObjectStore, PutObjectRequest, RustS3Store,
};

lazy_static! {
    static ref CHARSET_CONTENT_TYPE: Regex =
        Regex::new("^text/|^application/(javascript|json)").unwrap();
}

const GZIP_ENCODING: &str = "gzip";

/// Default [`UploadClient`]: puts every file into the bucket, skipping the
/// ones a previously uploaded manifest already lists.
pub struct S3Uploader {
    store: Arc<dyn ObjectStore + Send + Sync>,
    log_sink: Arc<dyn LogSink + Send + Sync>,
    concurrency: usize,
}

impl S3Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore + Send + Sync>,
        log_sink: Arc<dyn LogSink + Send + Sync>,
    ) -> S3Uploader {
        S3Uploader {
            store,
            log_sink,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Builds the uploader from resolved config, creating a `rust-s3` store
    /// unless one was injected.
    pub fn configure(
        config: &ResolvedConfig,
        log_sink: Arc<dyn LogSink + Send + Sync>,
    ) -> anyhow::Result<S3Uploader> {
        let store: Arc<dyn ObjectStore + Send + Sync> = match &config.s3_client {
            Some(store) => store.clone(),
            None => Arc::new(
                RustS3Store::new(
                    &config.region,
                    config.access_key_id.as_deref(),
                    config.secret_access_key.as_deref(),
                    config.endpoint.as_deref(),
                )
                .context("Could not create S3 client")?,
            ),
        };
        Ok(S3Uploader::new(store, log_sink).with_concurrency(config.concurrency))
    }

    fn determine_file_paths(&self, options: &UploadOptions) -> Vec<String> {
        let file_paths = options.file_paths.clone();
        let Some(manifest_path) = &options.manifest_path else {
            return file_paths;
        };

        let key = object_key(&options.prefix, manifest_path);
        self.log_sink.log(
            &format!("Downloading manifest for differential deploy from `{}`...", key),
            LogOptions::verbose(),
        );
        let manifest = self
            .store
            .get_object(&options.bucket, &key)
            .and_then(|body| Ok(String::from_utf8(body)?));

        match manifest {
            Ok(manifest) => {
                self.log_sink.log(
                    "Manifest found. Differential deploy will be applied.",
                    LogOptions::verbose(),
                );
                let uploaded: HashSet<&str> = manifest
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect();
                file_paths
                    .into_iter()
                    .filter(|path| !uploaded.contains(path.as_str()))
                    .collect()
            }
            Err(e) => {
                debug!("Could not fetch manifest {}: {:?}", key, e);
                self.log_sink.log(
                    "Manifest not found. Disabling differential deploy.",
                    LogOptions::warning(),
                );
                file_paths
            }
        }
    }

    fn put_object(&self, file_path: &str, options: &UploadOptions) -> anyhow::Result<String> {
        let local_path = options.cwd.join(file_path);
        let body = fs::read(&local_path)
            .with_context(|| format!("Could not read {}", local_path.display()))?;
        let key = object_key(&options.prefix, file_path);
        let is_gzipped = options.gzipped_file_paths.iter().any(|p| p == file_path);

        let request = PutObjectRequest {
            bucket: options.bucket.clone(),
            key: key.clone(),
            body,
            content_type: content_type(&local_path),
            acl: options.acl.clone(),
            cache_control: options.cache_control.clone(),
            expires: options.expires,
            content_encoding: is_gzipped.then(|| GZIP_ENCODING.to_owned()),
        };

        self.store
            .put_object(&request)
            .with_context(|| format!("Failed to upload `{}`", key))?;
        self.log_sink
            .log(&format!("✔  {}", key), LogOptions::verbose());
        Ok(key)
    }

    // Workers pull files off a shared cursor and stop picking new ones once
    // any upload failed. Keys come back in input order.
    fn put_objects(
        &self,
        file_paths: &[String],
        options: &UploadOptions,
    ) -> anyhow::Result<Vec<String>> {
        if file_paths.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let workers = self.concurrency.clamp(1, file_paths.len());

        let results: Vec<anyhow::Result<Vec<(usize, String)>>> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        let mut uploaded = Vec::new();
                        while !failed.load(Ordering::Relaxed) {
                            let index = cursor.fetch_add(1, Ordering::Relaxed);
                            let Some(file_path) = file_paths.get(index) else {
                                break;
                            };
                            match self.put_object(file_path, options) {
                                Ok(key) => uploaded.push((index, key)),
                                Err(e) => {
                                    failed.store(true, Ordering::Relaxed);
                                    return Err(e);
                                }
                            }
                        }
                        Ok(uploaded)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(e) => panic::resume_unwind(e),
                })
                .collect()
        });

        let mut uploaded = Vec::with_capacity(file_paths.len());
        for result in results {
            uploaded.extend(result?);
        }
        uploaded.sort_by_key(|(index, _)| *index);
        Ok(uploaded.into_iter().map(|(_, key)| key).collect())
    }
}

impl UploadClient for S3Uploader {
    fn upload(&self, options: &UploadOptions) -> anyhow::Result<Vec<String>> {
        let mut file_paths = self.determine_file_paths(options);
        // Only a manifest the pattern selected is uploaded, and it goes last
        // so a failed run never marks files as deployed.
        let manifest_path = options
            .manifest_path
            .as_ref()
            .filter(|manifest| options.file_paths.contains(manifest));
        if let Some(manifest_path) = manifest_path {
            file_paths.retain(|path| path != manifest_path);
        }

        let mut uploaded = self.put_objects(&file_paths, options)?;

        if let Some(manifest_path) = manifest_path {
            uploaded.push(self.put_object(manifest_path, options)?);
        }
        Ok(uploaded)
    }
}

fn content_type(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let essence = mime.essence_str();
    if CHARSET_CONTENT_TYPE.is_match(essence) {
        format!("{}; charset=utf-8", essence)
    } else {
        essence.to_owned()
    }
}
