use anyhow::anyhow;
use chrono::{DateTime, Utc};
use s3::{creds::Credentials, Bucket, Region};

#[cfg(test)]
use mockall::{automock, predicate::*};

#[derive(Clone, Debug, PartialEq)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub acl: String,
    pub cache_control: String,
    pub expires: DateTime<Utc>,
    pub content_encoding: Option<String>,
}

/// Low level object storage operations used by the uploader.
#[cfg_attr(test, automock)]
pub trait ObjectStore {
    fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>>;
    fn put_object(&self, request: &PutObjectRequest) -> anyhow::Result<()>;
}

/// [`ObjectStore`] backed by the blocking `rust-s3` client.
pub struct RustS3Store {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl RustS3Store {
    /// Uses the static credentials when both halves are given, the default
    /// credential chain (environment, profile, instance metadata) otherwise.
    /// A custom endpoint switches to path style addressing.
    pub fn new(
        region: &str,
        access_key_id: Option<&str>,
        secret_access_key: Option<&str>,
        endpoint: Option<&str>,
    ) -> anyhow::Result<RustS3Store> {
        let credentials = match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Credentials::new(
                Some(access_key_id),
                Some(secret_access_key),
                None,
                None,
                None,
            )?,
            _ => Credentials::default()?,
        };
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_owned(),
                endpoint: endpoint.trim_end_matches('/').to_owned(),
            },
            None => region.parse()?,
        };
        Ok(RustS3Store {
            region,
            credentials,
            path_style: endpoint.is_some(),
        })
    }

    fn bucket(&self, name: &str) -> anyhow::Result<Bucket> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())?;
        let bucket = if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        };
        Ok(*bucket)
    }
}

fn http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl ObjectStore for RustS3Store {
    fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.bucket(bucket)?.get_object(key)?;
        if !(200..300).contains(&response.status_code()) {
            return Err(anyhow!(
                "Fetching `{}` from bucket `{}` failed with status {}",
                key,
                bucket,
                response.status_code()
            ));
        }
        Ok(response.bytes().to_vec())
    }

    fn put_object(&self, request: &PutObjectRequest) -> anyhow::Result<()> {
        let mut bucket = self.bucket(&request.bucket)?;
        bucket.add_header("x-amz-acl", &request.acl);
        bucket.add_header("cache-control", &request.cache_control);
        bucket.add_header("expires", &http_date(&request.expires));
        if let Some(encoding) = &request.content_encoding {
            bucket.add_header("content-encoding", encoding);
        }

        let response =
            bucket.put_object_with_content_type(&request.key, &request.body, &request.content_type)?;
        if !(200..300).contains(&response.status_code()) {
            return Err(anyhow!(
                "Uploading `{}` to bucket `{}` failed with status {}",
                request.key,
                request.bucket,
                response.status_code()
            ));
        }
        debug!("Uploaded {} to {}", request.key, request.bucket);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn store(server: &mockito::Server) -> RustS3Store {
        RustS3Store::new(
            "us-east-1",
            Some("AKIDEXAMPLE"),
            Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
            Some(&server.url()),
        )
        .unwrap()
    }

    fn request(content_encoding: Option<&str>) -> PutObjectRequest {
        PutObjectRequest {
            bucket: "assets".to_owned(),
            key: "release/app.js".to_owned(),
            body: b"console.log(1)".to_vec(),
            content_type: "application/javascript; charset=utf-8".to_owned(),
            acl: "public-read".to_owned(),
            cache_control: "max-age=63072000, public".to_owned(),
            expires: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            content_encoding: content_encoding.map(str::to_owned),
        }
    }

    #[test]
    fn test_http_date() {
        let date = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(http_date(&date), "Tue, 01 Jan 2030 00:00:00 GMT");
    }

    #[test]
    fn test_put_object_sends_metadata_headers() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PUT", "/assets/release/app.js")
            .match_header("x-amz-acl", "public-read")
            .match_header("cache-control", "max-age=63072000, public")
            .match_header("expires", "Tue, 01 Jan 2030 00:00:00 GMT")
            .match_header("content-type", "application/javascript; charset=utf-8")
            .match_header("content-encoding", "gzip")
            .match_body("console.log(1)")
            .with_status(200)
            .create();

        store(&server).put_object(&request(Some("gzip"))).unwrap();

        mock.assert();
    }

    #[test]
    fn test_put_object_without_encoding_omits_header() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PUT", "/assets/release/app.js")
            .match_header("content-encoding", mockito::Matcher::Missing)
            .with_status(200)
            .create();

        store(&server).put_object(&request(None)).unwrap();

        mock.assert();
    }

    #[test]
    fn test_put_object_failure_is_an_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("PUT", "/assets/release/app.js")
            .with_status(403)
            .with_body("<Error><Code>AccessDenied</Code></Error>")
            .create();

        let result = store(&server).put_object(&request(None));
        assert!(result.is_err());
    }

    #[test]
    fn test_get_object_returns_body() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/assets/release/manifest.txt")
            .with_status(200)
            .with_body("app.js\napp.css\n")
            .create();

        let body = store(&server)
            .get_object("assets", "release/manifest.txt")
            .unwrap();
        assert_eq!(body, b"app.js\napp.css\n");
    }

    #[test]
    fn test_get_missing_object_is_an_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/assets/release/manifest.txt")
            .with_status(404)
            .with_body("<Error><Code>NoSuchKey</Code></Error>")
            .create();

        let result = store(&server).get_object("assets", "release/manifest.txt");
        assert!(result.is_err());
    }
}
