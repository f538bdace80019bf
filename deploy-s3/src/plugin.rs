use std::{
    backtrace::{Backtrace, BacktraceStatus},
    error, fmt,
    sync::Arc,
};

use figment::{value::Value, Figment};
use serde::Serialize;

use crate::{
    config::{ConfigResolver, ConfigurationError, ResolvedConfig},
    DeploymentContext, FilePattern, LogFacadeSink, LogOptions, LogSink, ObjectStore, S3Uploader,
    UploadClient, UploadOptions,
};

/// What the host pipeline gets back from a successful upload.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub files_uploaded: Vec<String>,
}

#[derive(Debug)]
pub enum UploadError {
    Configuration(ConfigurationError),
    Transfer(anyhow::Error),
}

impl UploadError {
    /// Backtrace captured where the transfer failed, if any.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            UploadError::Configuration(_) => None,
            UploadError::Transfer(e) => {
                Some(e.backtrace()).filter(|b| b.status() == BacktraceStatus::Captured)
            }
        }
    }
}

impl From<ConfigurationError> for UploadError {
    fn from(error: ConfigurationError) -> Self {
        UploadError::Configuration(error)
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Configuration(e) => write!(f, "{}", e),
            UploadError::Transfer(e) => write!(f, "{:#}", e),
        }
    }
}

impl error::Error for UploadError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            UploadError::Configuration(e) => Some(e),
            UploadError::Transfer(e) => Some(&**e),
        }
    }
}

/// The hooks a deployment pipeline drives a plugin through.
pub trait DeployPlugin {
    fn name(&self) -> &str;

    fn read_config(
        &self,
        context: &DeploymentContext,
        key: &str,
    ) -> Result<Option<Value>, ConfigurationError>;

    fn log(&self, message: &str, options: LogOptions);

    fn upload(&self, context: &DeploymentContext) -> Result<UploadSummary, UploadError>;
}

type DefaultClientFactory = fn(
    &ResolvedConfig,
    Arc<dyn LogSink + Send + Sync>,
) -> anyhow::Result<Arc<dyn UploadClient + Send + Sync>>;

fn default_upload_client(
    config: &ResolvedConfig,
    log_sink: Arc<dyn LogSink + Send + Sync>,
) -> anyhow::Result<Arc<dyn UploadClient + Send + Sync>> {
    Ok(Arc::new(S3Uploader::configure(config, log_sink)?))
}

/// Uploads the distributed assets of a build to an S3 bucket.
///
/// Options are read from `figment` under the plugin name, e.g.
/// `<name>.bucket`.
pub struct S3DeployPlugin {
    name: String,
    figment: Figment,
    log_sink: Arc<dyn LogSink + Send + Sync>,
    upload_client: Option<Arc<dyn UploadClient + Send + Sync>>,
    s3_client: Option<Arc<dyn ObjectStore + Send + Sync>>,
    default_client: DefaultClientFactory,
}

impl S3DeployPlugin {
    pub fn new(name: impl AsRef<str>, figment: Figment) -> S3DeployPlugin {
        S3DeployPlugin {
            name: name.as_ref().to_owned(),
            figment,
            log_sink: Arc::new(LogFacadeSink),
            upload_client: None,
            s3_client: None,
            default_client: default_upload_client,
        }
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink + Send + Sync>) -> Self {
        self.log_sink = log_sink;
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

    fn resolver<'a>(&'a self, context: &'a DeploymentContext) -> ConfigResolver<'a> {
        ConfigResolver::new(&self.name, &self.figment, context)
            .with_upload_client(self.upload_client.clone())
            .with_s3_client(self.s3_client.clone())
    }

    pub fn resolve_config(
        &self,
        context: &DeploymentContext,
    ) -> Result<ResolvedConfig, ConfigurationError> {
        self.resolver(context).resolve()
    }

    fn try_upload(&self, context: &DeploymentContext) -> Result<UploadSummary, UploadError> {
        let config = self.resolve_config(context)?;
        let files_to_upload = FilePattern::new(&config.file_pattern)?.filter(&config.dist_files);

        let client = match &config.upload_client {
            Some(client) => client.clone(),
            None => (self.default_client)(&config, self.log_sink.clone())
                .map_err(UploadError::Transfer)?,
        };

        let options = UploadOptions {
            cwd: config.dist_dir,
            file_paths: files_to_upload,
            gzipped_file_paths: config.gzipped_files,
            prefix: config.prefix,
            bucket: config.bucket,
            acl: config.acl,
            cache_control: config.cache_control,
            expires: config.expires,
            manifest_path: config.manifest_path,
        };

        self.log(
            &format!("preparing to upload to S3 bucket `{}`", options.bucket),
            LogOptions::verbose(),
        );

        let files_uploaded = client.upload(&options).map_err(UploadError::Transfer)?;
        self.log(
            &format!("uploaded {} files ok", files_uploaded.len()),
            LogOptions::verbose(),
        );
        Ok(UploadSummary { files_uploaded })
    }

    fn log_error(&self, message: &str, backtrace: Option<&Backtrace>) {
        self.log(message, LogOptions::error());
        if let Some(backtrace) = backtrace {
            self.log(&backtrace.to_string(), LogOptions::error());
        }
    }
}

impl DeployPlugin for S3DeployPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_config(
        &self,
        context: &DeploymentContext,
        key: &str,
    ) -> Result<Option<Value>, ConfigurationError> {
        self.resolver(context).read_value(key)
    }

    fn log(&self, message: &str, options: LogOptions) {
        self.log_sink.log(message, options);
    }

    fn upload(&self, context: &DeploymentContext) -> Result<UploadSummary, UploadError> {
        self.try_upload(context)
            .inspect_err(|e| self.log_error(&e.to_string(), e.backtrace()))
    }
}
