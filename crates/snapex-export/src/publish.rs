//! Object-store publisher
//!
//! Uploads an entity's output tree to S3-compatible storage under
//! `<prefix>/<entity_type>/<relative path>`. Part files go first and the
//! manifest last, so a reader that sees the new manifest finds every file
//! it lists. Manifest URLs are built from the configured remote base, which
//! must name the same bucket and prefix the publisher writes to.

use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use snapex_common::{Result, SnapexError};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::manifest::MANIFEST_FILE_NAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Key prefix inside the bucket
    pub prefix: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl PublishConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "openalex".to_string()),
            prefix: env::var("S3_PREFIX").unwrap_or_else(|_| "data".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .map_err(|_| anyhow::anyhow!("S3_ACCESS_KEY or AWS_ACCESS_KEY_ID must be set"))?,
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .map_err(|_| anyhow::anyhow!("S3_SECRET_KEY or AWS_SECRET_ACCESS_KEY must be set"))?,
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    /// `s3://<bucket>/<prefix>`, the base manifest URLs must use
    pub fn remote_base(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, prefix)
        }
    }

    /// Fail unless `remote_base` points at this bucket and prefix
    pub fn check_remote_base(&self, remote_base: &str) -> Result<()> {
        let expected = self.remote_base();
        if remote_base.trim_end_matches('/') != expected {
            return Err(SnapexError::Config(format!(
                "manifest remote base '{}' does not match upload target '{}'",
                remote_base, expected
            )));
        }
        Ok(())
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            prefix: "data".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

/// `<prefix>/<entity_type>/<relative path>` with `/` separators
pub fn object_key(prefix: &str, entity_type: &str, relative: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    parts.push(entity_type.to_string());
    parts.extend(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}

/// Summary of one entity upload
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishSummary {
    pub objects: usize,
    pub bytes: u64,
}

#[derive(Clone)]
pub struct Publisher {
    client: Client,
    bucket: String,
    prefix: String,
}

impl Publisher {
    pub fn new(config: PublishConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "snapex-publish",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());
        info!(bucket = %config.bucket, prefix = %config.prefix, "Publisher initialized");

        Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Every regular file under `entity_dir`, sorted by relative path with
    /// the manifest moved to the end
    pub fn collect_files(entity_dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut files = Vec::new();
        if !entity_dir.exists() {
            return Ok(files);
        }
        for entry in WalkDir::new(entity_dir) {
            let entry = entry.map_err(|e| SnapexError::Publish(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(entity_dir)
                .map_err(|e| SnapexError::Publish(e.to_string()))?
                .to_path_buf();
            files.push((relative, entry.path().to_path_buf()));
        }
        files.sort_by(|(a, _), (b, _)| {
            let a_manifest = a.as_os_str() == MANIFEST_FILE_NAME;
            let b_manifest = b.as_os_str() == MANIFEST_FILE_NAME;
            a_manifest.cmp(&b_manifest).then_with(|| a.cmp(b))
        });
        Ok(files)
    }

    #[instrument(skip(self, entity_dir))]
    pub async fn upload_entity(&self, entity_type: &str, entity_dir: &Path) -> Result<PublishSummary> {
        let mut summary = PublishSummary::default();

        for (relative, path) in Self::collect_files(entity_dir)? {
            let key = object_key(&self.prefix, entity_type, &relative);
            let size = std::fs::metadata(&path)?.len();
            debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

            let body = ByteStream::from_path(&path)
                .await
                .map_err(|e| SnapexError::Publish(format!("{}: {}", path.display(), e)))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(body)
                .send()
                .await
                .map_err(|e| SnapexError::Publish(format!("s3://{}/{}: {}", self.bucket, key, e)))?;

            summary.objects += 1;
            summary.bytes += size;
        }

        info!(objects = summary.objects, bytes = summary.bytes, "Entity published");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_object_key() {
        let rel = Path::new("updated_date=2024-01-02/part_000.gz");
        assert_eq!(object_key("data", "works", rel), "data/works/updated_date=2024-01-02/part_000.gz");
        assert_eq!(object_key("/data/", "works", Path::new("manifest")), "data/works/manifest");
        assert_eq!(object_key("", "works", Path::new("manifest")), "works/manifest");
    }

    #[test]
    fn test_for_minio() {
        let config = PublishConfig::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.path_style);
    }

    #[test]
    fn test_collect_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("works");
        for day in ["2024-01-02", "2024-01-01"] {
            let partition = dir.join(format!("updated_date={}", day));
            std::fs::create_dir_all(&partition).unwrap();
            std::fs::write(partition.join("part_000.gz"), b"x").unwrap();
        }
        std::fs::write(dir.join("manifest"), b"{}").unwrap();

        let files = Publisher::collect_files(&dir).unwrap();
        let rels: Vec<_> = files.iter().map(|(rel, _)| rel.to_string_lossy().into_owned()).collect();
        assert_eq!(
            rels,
            vec![
                "updated_date=2024-01-01/part_000.gz",
                "updated_date=2024-01-02/part_000.gz",
                "manifest",
            ]
        );
        assert!(Publisher::collect_files(&tmp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_remote_base_must_match_upload_target() {
        let config = PublishConfig::for_minio("http://localhost:9000", "openalex");
        assert_eq!(config.remote_base(), "s3://openalex/data");
        assert!(config.check_remote_base("s3://openalex/data").is_ok());
        assert!(config.check_remote_base("s3://openalex/data/").is_ok());
        assert!(matches!(
            config.check_remote_base("s3://elsewhere/data"),
            Err(SnapexError::Config(_))
        ));
        assert!(config.check_remote_base(crate::config::DEFAULT_REMOTE_BASE).is_ok());
    }
}
