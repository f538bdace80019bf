use std::path::PathBuf;

use chrono::{DateTime, Utc};

pub mod s3;

#[cfg(test)]
use mockall::{automock, predicate::*};

/// The options object handed to an [`UploadClient`] for one upload pass.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadOptions {
    pub cwd: PathBuf,
    pub file_paths: Vec<String>,
    pub gzipped_file_paths: Vec<String>,
    pub prefix: String,
    pub bucket: String,
    pub acl: String,
    pub cache_control: String,
    pub expires: DateTime<Utc>,
    pub manifest_path: Option<String>,
}

/// Transfers a set of local files to a bucket.
///
/// Returns the destination key of every uploaded file. Any failure fails
/// the whole call.
#[cfg_attr(test, automock)]
pub trait UploadClient {
    fn upload(&self, options: &UploadOptions) -> anyhow::Result<Vec<String>>;
}

/// Joins a key prefix and a relative path the way object keys are written:
/// `/` separated, no empty segments, no leading slash.
pub fn object_key(prefix: &str, file_path: &str) -> String {
    prefix
        .split('/')
        .chain(file_path.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[test]
fn test_object_key() {
    assert_eq!(object_key("", "app.js"), "app.js");
    assert_eq!(object_key("release-42", "assets/app.js"), "release-42/assets/app.js");
    assert_eq!(object_key("/release-42/", "/assets//app.js"), "release-42/assets/app.js");
    assert_eq!(object_key("./", "./app.js"), "app.js");
}
