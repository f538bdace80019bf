use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{ObjectStore, UploadClient};

/// Snapshot of a deployment run, handed to the plugin by the host pipeline.
#[derive(Clone, Default)]
pub struct DeploymentContext {
    pub dist_dir: PathBuf,
    pub dist_files: Vec<String>,
    pub gzipped_files: Vec<String>,
    pub manifest_path: Option<String>,
    pub upload_client: Option<Arc<dyn UploadClient + Send + Sync>>,
    pub s3_client: Option<Arc<dyn ObjectStore + Send + Sync>>,
}

impl DeploymentContext {
    pub fn new(dist_dir: impl AsRef<Path>) -> DeploymentContext {
        DeploymentContext {
            dist_dir: dist_dir.as_ref().to_owned(),
            ..Default::default()
        }
    }

    pub fn with_dist_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dist_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_gzipped_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gzipped_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_manifest_path(mut self, manifest_path: impl Into<String>) -> Self {
        self.manifest_path = Some(manifest_path.into());
        self
    }

    pub fn with_upload_client(mut self, client: Arc<dyn UploadClient + Send + Sync>) -> Self {
        self.upload_client = Some(client);
        self
    }

    pub fn with_s3_client(mut self, client: Arc<dyn ObjectStore + Send + Sync>) -> Self {
        self.s3_client = Some(client);
        self
    }
}

impl fmt::Debug for DeploymentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentContext")
            .field("dist_dir", &self.dist_dir)
            .field("dist_files", &self.dist_files)
            .field("gzipped_files", &self.gzipped_files)
            .field("manifest_path", &self.manifest_path)
            .field("upload_client", &self.upload_client.is_some())
            .field("s3_client", &self.s3_client.is_some())
            .finish()
    }
}
