use common::config::AwsCredentials;
use common::{Error, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Clone, Debug)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: Option<AwsCredentials>,
    pub timeout: Duration,
}

/// A resolved storage root: the backing store plus the key prefix under it.
#[derive(Clone, Debug)]
pub struct StorageLocation {
    pub store: Arc<dyn ObjectStore>,
    pub prefix: Path,
    pub uri: String,
}

impl StorageLocation {
    pub fn child(&self, segment: &str) -> Path {
        self.prefix.child(segment)
    }
}

#[derive(Clone)]
pub struct StorageManager {
    pub config: S3Config,
    store_cache: Arc<dashmap::DashMap<String, Arc<dyn ObjectStore>>>,
}

enum LocationKind {
    Local(std::path::PathBuf),
    S3 { bucket: String, prefix: Path },
}

impl StorageManager {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            store_cache: Arc::new(dashmap::DashMap::new()),
        }
    }

    /// Whether `location` needs remote credentials.
    pub fn is_remote(location: &str) -> bool {
        matches!(parse_location(location), Ok(LocationKind::S3 { .. }))
    }

    /// Fails with `CredentialMissing` if any of `locations` is remote and no
    /// credentials are configured.
    pub fn ensure_credentials(&self, locations: &[&str]) -> Result<()> {
        if self.config.credentials.is_some() {
            return Ok(());
        }
        match locations.iter().find(|l| Self::is_remote(l)) {
            Some(location) => Err(Error::CredentialMissing(format!(
                "access key id and secret access key are required for {}",
                location
            ))),
            None => Ok(()),
        }
    }

    /// Resolves an input location. Local directories must already exist.
    pub fn resolve_source(&self, location: &str) -> Result<StorageLocation> {
        self.resolve(location, false)
            .map_err(|e| match e {
                Error::CredentialMissing(msg) => Error::CredentialMissing(msg),
                other => Error::SourceUnavailable(format!("{}: {}", location, other)),
            })
    }

    /// Resolves an output location, creating a local directory if needed.
    pub fn resolve_sink(&self, location: &str) -> Result<StorageLocation> {
        self.resolve(location, true)
            .map_err(|e| match e {
                Error::CredentialMissing(msg) => Error::CredentialMissing(msg),
                other => Error::WriteFailure(format!("{}: {}", location, other)),
            })
    }

    fn resolve(&self, location: &str, create: bool) -> Result<StorageLocation> {
        match parse_location(location)? {
            LocationKind::Local(dir) => {
                if create {
                    std::fs::create_dir_all(&dir)?;
                }
                let store = self.local_store(&dir)?;
                Ok(StorageLocation {
                    store,
                    prefix: Path::default(),
                    uri: location.to_string(),
                })
            }
            LocationKind::S3 { bucket, prefix } => Ok(StorageLocation {
                store: self.s3_store(&bucket)?,
                prefix,
                uri: location.to_string(),
            }),
        }
    }

    fn local_store(&self, dir: &std::path::Path) -> Result<Arc<dyn ObjectStore>> {
        let canonical = std::fs::canonicalize(dir)?;
        let key = format!("file://{}", canonical.display());
        if let Some(store) = self.store_cache.get(&key) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(&canonical)?);
        self.store_cache.insert(key, store.clone());
        Ok(store)
    }

    fn s3_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let key = format!("s3://{}", bucket);
        if let Some(store) = self.store_cache.get(&key) {
            return Ok(store.clone());
        }

        let credentials = self.config.credentials.as_ref().ok_or_else(|| {
            Error::CredentialMissing(format!("no credentials available for bucket '{}'", bucket))
        })?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.config.region)
            .with_access_key_id(&credentials.access_key_id)
            .with_secret_access_key(&credentials.secret_access_key)
            .with_client_options(ClientOptions::new().with_timeout(self.config.timeout));

        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        debug!(bucket, region = %self.config.region, "Creating S3 object store");
        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);
        self.store_cache.insert(key, store.clone());
        Ok(store)
    }
}

fn parse_location(location: &str) -> Result<LocationKind> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUri("empty storage location".to_string()));
    }

    if !trimmed.contains("://") {
        return Ok(LocationKind::Local(std::path::PathBuf::from(trimmed)));
    }

    let url = Url::parse(trimmed)?;
    match url.scheme() {
        "file" => {
            let dir = url
                .to_file_path()
                .map_err(|_| Error::InvalidUri(format!("'{}' is not a valid file URL", location)))?;
            Ok(LocationKind::Local(dir))
        }
        "s3" | "s3a" => {
            let bucket = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| Error::InvalidUri(format!("'{}' has no bucket", location)))?
                .to_string();
            let prefix = Path::from(url.path().trim_matches('/'));
            Ok(LocationKind::S3 { bucket, prefix })
        }
        scheme => Err(Error::InvalidUri(format!(
            "Unsupported scheme '{}' in '{}' (expected a path, file://, s3:// or s3a://)",
            scheme, location
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(credentials: Option<AwsCredentials>) -> StorageManager {
        StorageManager::new(S3Config {
            region: "us-west-2".into(),
            endpoint: None,
            credentials,
            timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn test_parse_s3_locations() {
        match parse_location("s3a://udacity-dend/").unwrap() {
            LocationKind::S3 { bucket, prefix } => {
                assert_eq!(bucket, "udacity-dend");
                assert_eq!(prefix.as_ref(), "");
            }
            _ => panic!("expected S3 location"),
        }

        match parse_location("s3://ud-nd-dl-bucket/Sparkify/").unwrap() {
            LocationKind::S3 { bucket, prefix } => {
                assert_eq!(bucket, "ud-nd-dl-bucket");
                assert_eq!(prefix.as_ref(), "Sparkify");
            }
            _ => panic!("expected S3 location"),
        }
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            parse_location("gs://bucket/data"),
            Err(Error::InvalidUri(_))
        ));
    }

    #[test]
    fn test_remote_without_credentials() {
        let manager = manager(None);
        assert!(matches!(
            manager.ensure_credentials(&["data/", "s3://bucket/out"]),
            Err(Error::CredentialMissing(_))
        ));
        assert!(manager.ensure_credentials(&["data/", "/tmp/out"]).is_ok());
        assert!(matches!(
            manager.resolve_source("s3a://udacity-dend/"),
            Err(Error::CredentialMissing(_))
        ));
    }

    #[test]
    fn test_remote_with_credentials() {
        let manager = manager(Some(AwsCredentials {
            access_key_id: "AKIAEXAMPLE".into(),
            secret_access_key: "secret".into(),
        }));
        assert!(manager.ensure_credentials(&["s3://bucket/out"]).is_ok());
        let location = manager.resolve_sink("s3://bucket/out/").unwrap();
        assert_eq!(location.child("songs").as_ref(), "out/songs");
    }

    #[test]
    fn test_missing_local_source_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            manager(None).resolve_source(missing.to_str().unwrap()),
            Err(Error::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_local_sink_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("lake").join("sparkify");
        let location = manager(None).resolve_sink(out.to_str().unwrap()).unwrap();
        assert!(out.is_dir());
        assert_eq!(location.child("users").as_ref(), "users");
    }
}
