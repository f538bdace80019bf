use std::{collections::HashMap, error, fmt, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use figment::{providers::Serialized, value::Value, Figment};
use serde::de::DeserializeOwned;

use crate::{DeploymentContext, ObjectStore, UploadClient};

#[derive(Debug)]
pub enum ConfigurationError {
    MissingConfigurationValues(Vec<String>),
    InvalidConfigurationValue { key: String, reason: String },
    Other(Box<dyn error::Error + Send + Sync>),
}

impl From<figment::Error> for ConfigurationError {
    fn from(error: figment::Error) -> Self {
        match error.kind {
            figment::error::Kind::MissingField(cow) => {
                Self::MissingConfigurationValues(vec![cow.to_string()])
            }
            _ => Self::Other(Box::new(error)),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingConfigurationValues(keys) => {
                write!(f, "Missing required config: `{}`", keys.join("`, `"))
            }
            Self::InvalidConfigurationValue { key, reason } => {
                write!(f, "Invalid value for config `{}`: {}", key, reason)
            }
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl error::Error for ConfigurationError {}

pub const FILE_PATTERN: &str = "file_pattern";
pub const PREFIX: &str = "prefix";
pub const ACL: &str = "acl";
pub const CACHE_CONTROL: &str = "cache_control";
pub const EXPIRES: &str = "expires";
pub const DIST_DIR: &str = "dist_dir";
pub const DIST_FILES: &str = "dist_files";
pub const GZIPPED_FILES: &str = "gzipped_files";
pub const MANIFEST_PATH: &str = "manifest_path";
pub const BUCKET: &str = "bucket";
pub const REGION: &str = "region";
pub const ACCESS_KEY_ID: &str = "access_key_id";
pub const SECRET_ACCESS_KEY: &str = "secret_access_key";
pub const ENDPOINT: &str = "endpoint";
pub const CONCURRENCY: &str = "concurrency";

pub const DEFAULT_FILE_PATTERN: &str =
    "**/*.{js,css,png,gif,ico,jpg,map,xml,txt,svg,swf,eot,ttf,woff,woff2}";
pub const TWO_YEAR_CACHE_PERIOD_IN_SEC: u64 = 60 * 60 * 24 * 365 * 2;
pub const DEFAULT_CACHE_CONTROL: &str = "max-age=63072000, public";
pub const DEFAULT_EXPIRES: &str = "2030-01-01T00:00:00Z";
pub const DEFAULT_ACL: &str = "public-read";
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Static defaults, nested under the plugin name like user config is.
pub fn figment_default_values(plugin_name: &str) -> Figment {
    Figment::from(Serialized::default(
        plugin_name,
        serde_json::json!({
            FILE_PATTERN: DEFAULT_FILE_PATTERN,
            PREFIX: "",
            ACL: DEFAULT_ACL,
            CACHE_CONTROL: DEFAULT_CACHE_CONTROL,
            EXPIRES: DEFAULT_EXPIRES,
            CONCURRENCY: DEFAULT_CONCURRENCY,
        }),
    ))
}

type ContextDefault = fn(&DeploymentContext) -> Result<Option<Value>, figment::Error>;

fn context_default_values() -> HashMap<&'static str, ContextDefault> {
    let mut defaults: HashMap<&'static str, ContextDefault> = HashMap::new();
    defaults.insert(DIST_DIR, |context| {
        Value::serialize(&context.dist_dir).map(Some)
    });
    defaults.insert(DIST_FILES, |context| {
        Value::serialize(&context.dist_files).map(Some)
    });
    defaults.insert(GZIPPED_FILES, |context| {
        Value::serialize(&context.gzipped_files).map(Some)
    });
    defaults.insert(MANIFEST_PATH, |context| {
        context.manifest_path.as_ref().map(Value::serialize).transpose()
    });
    defaults
}

/// Everything one upload call needs, resolved up front.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub file_pattern: String,
    pub prefix: String,
    pub bucket: String,
    pub region: String,
    pub acl: String,
    pub cache_control: String,
    pub expires: DateTime<Utc>,
    pub dist_dir: PathBuf,
    pub dist_files: Vec<String>,
    pub gzipped_files: Vec<String>,
    pub manifest_path: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
    pub concurrency: usize,
    pub upload_client: Option<Arc<dyn UploadClient + Send + Sync>>,
    pub s3_client: Option<Arc<dyn ObjectStore + Send + Sync>>,
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("file_pattern", &self.file_pattern)
            .field("prefix", &self.prefix)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("acl", &self.acl)
            .field("cache_control", &self.cache_control)
            .field("expires", &self.expires)
            .field("dist_dir", &self.dist_dir)
            .field("dist_files", &self.dist_files)
            .field("gzipped_files", &self.gzipped_files)
            .field("manifest_path", &self.manifest_path)
            .field("endpoint", &self.endpoint)
            .field("concurrency", &self.concurrency)
            .field("upload_client", &self.upload_client.is_some())
            .field("s3_client", &self.s3_client.is_some())
            .finish_non_exhaustive()
    }
}

/// Reads plugin options for one deployment run.
///
/// A key is looked up in the user's config first, then in the values
/// derived from the [`DeploymentContext`], then in the static defaults.
/// Nothing is evaluated until the key is read.
pub struct ConfigResolver<'a> {
    plugin_name: &'a str,
    overrides: &'a Figment,
    defaults: Figment,
    context: &'a DeploymentContext,
    context_defaults: HashMap<&'static str, ContextDefault>,
    upload_client: Option<Arc<dyn UploadClient + Send + Sync>>,
    s3_client: Option<Arc<dyn ObjectStore + Send + Sync>>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(
        plugin_name: &'a str,
        overrides: &'a Figment,
        context: &'a DeploymentContext,
    ) -> ConfigResolver<'a> {
        ConfigResolver {
            plugin_name,
            overrides,
            defaults: figment_default_values(plugin_name),
            context,
            context_defaults: context_default_values(),
            upload_client: None,
            s3_client: None,
        }
    }

    pub fn with_upload_client(
        mut self,
        client: Option<Arc<dyn UploadClient + Send + Sync>>,
    ) -> Self {
        self.upload_client = client;
        self
    }

    pub fn with_s3_client(mut self, client: Option<Arc<dyn ObjectStore + Send + Sync>>) -> Self {
        self.s3_client = client;
        self
    }

    fn path(&self, key: &str) -> String {
        format!("{}.{}", self.plugin_name, key)
    }

    pub fn read_value(&self, key: &str) -> Result<Option<Value>, ConfigurationError> {
        let path = self.path(key);
        if self.overrides.contains(&path) {
            return Ok(Some(self.overrides.find_value(&path)?));
        }
        if let Some(default) = self.context_defaults.get(key) {
            let value = default(self.context).map_err(|e| {
                ConfigurationError::InvalidConfigurationValue {
                    key: key.to_owned(),
                    reason: e.to_string(),
                }
            })?;
            if value.is_some() {
                return Ok(value);
            }
        }
        if self.defaults.contains(&path) {
            return Ok(Some(self.defaults.find_value(&path)?));
        }
        Ok(None)
    }

    pub fn read_config<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ConfigurationError> {
        self.read_value(key)?
            .map(|value| {
                value
                    .deserialize::<T>()
                    .map_err(|e| ConfigurationError::InvalidConfigurationValue {
                        key: key.to_owned(),
                        reason: e.to_string(),
                    })
            })
            .transpose()
    }

    fn read_required<T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: DeserializeOwned,
    {
        self.read_config(key)?
            .ok_or_else(|| ConfigurationError::MissingConfigurationValues(vec![key.to_owned()]))
    }

    fn read_non_empty(&self, key: &str) -> Result<Option<String>, ConfigurationError> {
        Ok(self
            .read_config::<String>(key)?
            .filter(|value| !value.is_empty()))
    }

    pub fn upload_client(&self) -> Option<Arc<dyn UploadClient + Send + Sync>> {
        self.upload_client
            .clone()
            .or_else(|| self.context.upload_client.clone())
    }

    pub fn s3_client(&self) -> Option<Arc<dyn ObjectStore + Send + Sync>> {
        self.s3_client
            .clone()
            .or_else(|| self.context.s3_client.clone())
    }

    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigurationError> {
        let bucket = self.read_non_empty(BUCKET)?;
        let region = self.read_non_empty(REGION)?;
        let (bucket, region) = match (bucket, region) {
            (Some(bucket), Some(region)) => (bucket, region),
            (bucket, region) => {
                let missing = [(BUCKET, bucket.is_none()), (REGION, region.is_none())]
                    .into_iter()
                    .filter(|(_, missing)| *missing)
                    .map(|(key, _)| key.to_owned())
                    .collect();
                return Err(ConfigurationError::MissingConfigurationValues(missing));
            }
        };

        Ok(ResolvedConfig {
            file_pattern: self.read_required(FILE_PATTERN)?,
            prefix: self.read_required(PREFIX)?,
            bucket,
            region,
            acl: self.read_required(ACL)?,
            cache_control: self.read_required(CACHE_CONTROL)?,
            expires: self.read_required(EXPIRES)?,
            dist_dir: self.read_required(DIST_DIR)?,
            dist_files: self.read_config(DIST_FILES)?.unwrap_or_default(),
            gzipped_files: self.read_config(GZIPPED_FILES)?.unwrap_or_default(),
            manifest_path: self.read_non_empty(MANIFEST_PATH)?,
            access_key_id: self.read_non_empty(ACCESS_KEY_ID)?,
            secret_access_key: self.read_non_empty(SECRET_ACCESS_KEY)?,
            endpoint: self.read_non_empty(ENDPOINT)?,
            concurrency: self.read_required(CONCURRENCY)?,
            upload_client: self.upload_client(),
            s3_client: self.s3_client(),
        })
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use figment::providers::Serialized;

    use super::*;
    use crate::upload::MockUploadClient;

    const PLUGIN: &str = "s3";

    fn user_config(value: serde_json::Value) -> Figment {
        Figment::from(Serialized::globals(serde_json::json!({ PLUGIN: value })))
    }

    fn context() -> DeploymentContext {
        DeploymentContext::new("/tmp/dist")
            .with_dist_files(["app.js", "index.html"])
            .with_gzipped_files(["app.js"])
    }

    #[test]
    fn test_load_default_values_work() {
        let figment = user_config(serde_json::json!({
            BUCKET: "assets",
            REGION: "eu-west-1",
        }));
        let context = context();
        let config = ConfigResolver::new(PLUGIN, &figment, &context)
            .resolve()
            .unwrap();

        assert_eq!(config.file_pattern, DEFAULT_FILE_PATTERN);
        assert_eq!(config.prefix, "");
        assert_eq!(config.acl, "public-read");
        assert_eq!(config.cache_control, "max-age=63072000, public");
        assert_eq!(
            config.expires,
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(config.dist_dir, PathBuf::from("/tmp/dist"));
        assert_eq!(config.dist_files, vec!["app.js", "index.html"]);
        assert_eq!(config.gzipped_files, vec!["app.js"]);
        assert_eq!(config.manifest_path, None);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(config.upload_client.is_none());
        assert!(config.s3_client.is_none());
    }

    #[test]
    fn test_default_cache_control_is_two_years() {
        assert_eq!(
            DEFAULT_CACHE_CONTROL,
            format!("max-age={}, public", TWO_YEAR_CACHE_PERIOD_IN_SEC)
        );
    }

    #[test]
    fn test_missing_bucket_and_region_are_both_reported() {
        let figment = Figment::new();
        let context = context();
        let result = ConfigResolver::new(PLUGIN, &figment, &context).resolve();

        match result {
            Err(ConfigurationError::MissingConfigurationValues(keys)) => {
                assert_eq!(keys, vec!["bucket", "region"])
            }
            other => panic!("Expected missing values, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_region_counts_as_missing() {
        let figment = user_config(serde_json::json!({
            BUCKET: "assets",
            REGION: "",
        }));
        let context = context();
        let result = ConfigResolver::new(PLUGIN, &figment, &context).resolve();

        match result {
            Err(ConfigurationError::MissingConfigurationValues(keys)) => {
                assert_eq!(keys, vec!["region"])
            }
            other => panic!("Expected missing region, got {:?}", other),
        }
    }

    #[test]
    fn test_user_override_beats_context_and_static_defaults() {
        let figment = user_config(serde_json::json!({
            BUCKET: "assets",
            REGION: "eu-west-1",
            DIST_DIR: "/srv/build",
            PREFIX: "release-42",
            ACL: "private",
            MANIFEST_PATH: "manifest.txt",
        }));
        let context = context().with_manifest_path("from-context.txt");
        let config = ConfigResolver::new(PLUGIN, &figment, &context)
            .resolve()
            .unwrap();

        assert_eq!(config.dist_dir, PathBuf::from("/srv/build"));
        assert_eq!(config.prefix, "release-42");
        assert_eq!(config.acl, "private");
        assert_eq!(config.manifest_path.as_deref(), Some("manifest.txt"));
        assert_eq!(config.dist_files, vec!["app.js", "index.html"]);
    }

    #[test]
    fn test_context_value_is_used_when_not_overridden() {
        let figment = user_config(serde_json::json!({
            BUCKET: "assets",
            REGION: "eu-west-1",
        }));
        let context = context().with_manifest_path("manifest.txt");
        let resolver = ConfigResolver::new(PLUGIN, &figment, &context);

        let manifest: Option<String> = resolver.read_config(MANIFEST_PATH).unwrap();
        assert_eq!(manifest.as_deref(), Some("manifest.txt"));
        let unknown: Option<String> = resolver.read_config("not_an_option").unwrap();
        assert_eq!(unknown, None);
    }

    #[test]
    fn test_options_of_other_plugins_are_ignored() {
        let figment = Figment::from(Serialized::globals(serde_json::json!({
            "other": { BUCKET: "assets", REGION: "eu-west-1" },
        })));
        let context = context();
        let result = ConfigResolver::new(PLUGIN, &figment, &context).resolve();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingConfigurationValues(_))
        ));
    }

    #[test]
    fn test_wrong_type_is_reported_with_key() {
        let figment = user_config(serde_json::json!({
            BUCKET: "assets",
            REGION: "eu-west-1",
            CONCURRENCY: "lots",
        }));
        let context = context();
        let result = ConfigResolver::new(PLUGIN, &figment, &context).resolve();

        match result {
            Err(ConfigurationError::InvalidConfigurationValue { key, .. }) => {
                assert_eq!(key, CONCURRENCY)
            }
            other => panic!("Expected invalid value, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_dist_dir_is_invalid() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let figment = user_config(serde_json::json!({
            BUCKET: "assets",
            REGION: "eu-west-1",
        }));
        let context = DeploymentContext::new(OsStr::from_bytes(b"/tmp/dist-\xff"));
        let result = ConfigResolver::new(PLUGIN, &figment, &context).resolve();

        match result {
            Err(ConfigurationError::InvalidConfigurationValue { key, .. }) => {
                assert_eq!(key, DIST_DIR)
            }
            other => panic!("Expected invalid dist_dir, got {:?}", other),
        }
    }

    #[test]
    fn test_plugin_client_beats_context_client() {
        let figment = user_config(serde_json::json!({
            BUCKET: "assets",
            REGION: "eu-west-1",
        }));
        let from_context: Arc<dyn UploadClient + Send + Sync> = Arc::new(MockUploadClient::new());
        let from_plugin: Arc<dyn UploadClient + Send + Sync> = Arc::new(MockUploadClient::new());
        let context = context().with_upload_client(from_context.clone());

        let config = ConfigResolver::new(PLUGIN, &figment, &context)
            .with_upload_client(Some(from_plugin.clone()))
            .resolve()
            .unwrap();
        assert!(Arc::ptr_eq(config.upload_client.as_ref().unwrap(), &from_plugin));

        let config = ConfigResolver::new(PLUGIN, &figment, &context)
            .resolve()
            .unwrap();
        assert!(Arc::ptr_eq(config.upload_client.as_ref().unwrap(), &from_context));
    }
}
