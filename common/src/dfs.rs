/// Helper functions and structures for dealing with the input store.
use aws_sdk_s3 as s3;
use globset::{Glob, GlobMatcher};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

const DEFAULT_REGION: &str = "us-east-1";

/// Characters that make a path segment a glob rather than a literal key.
const GLOB_META: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Error)]
pub enum DfsError {
    #[error("unsupported file source: {0}")]
    UnsupportedScheme(String),
    #[error("could not parse input path {path}: {reason}")]
    BadPath { path: String, reason: String },
    #[error("no file matches {0}")]
    NoSuchFile(String),
    #[error("listing {path} failed: {reason}")]
    ListFail { path: String, reason: String },
}

/// Access coordinates of a job's filesystem, as carried in the job
/// descriptor. `user` doubles as the access key on S3-compatible stores.
#[derive(Debug, Clone, Default)]
pub struct DfsAccess {
    pub user: String,
    pub host: String,
    pub port: String,
}

/// One enumerated input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Full path including scheme and bucket, e.g. `s3://data/part-00000`.
    pub path: String,
    pub size: u64,
}

#[derive(Debug)]
pub struct BucketKey {
    pub bucket: String,
    pub key: String,
}

/// Splits a DFS path into bucket and key. The path must carry an `s3` or
/// `hdfs` scheme; anything else is reported as unsupported so the caller can
/// surface a not-implemented status.
pub fn path_to_bucket_key(path: &str) -> Result<BucketKey, DfsError> {
    let parsed = Url::parse(path).map_err(|e| DfsError::BadPath {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "s3" | "hdfs" => {}
        other => return Err(DfsError::UnsupportedScheme(other.to_string())),
    }

    let bucket = parsed.domain().ok_or_else(|| DfsError::BadPath {
        path: path.to_string(),
        reason: "missing bucket".to_string(),
    })?;

    let mut key = "";
    if !parsed.path().is_empty() {
        key = &parsed.path()[1..]; // we slice out the first `/` character
    }

    Ok(BucketKey {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

/// The literal portion of a glob, usable as a listing prefix.
fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(GLOB_META) {
        Some(pos) => &pattern[..pos],
        None => pattern,
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    pub client: s3::Client,
}

impl Client {
    /// Builds a client for the store named by a job's DFS coordinates.
    pub fn from_access(access: &DfsAccess) -> Self {
        let cred = s3::config::Credentials::new(
            access.user.clone(),
            access.user.clone(),
            None,
            None,
            "job descriptor",
        );
        let region = s3::config::Region::new(DEFAULT_REGION);
        let conf = s3::config::Builder::new()
            .credentials_provider(cred)
            .region(region)
            .endpoint_url(format!("http://{}:{}", access.host, access.port))
            .behavior_version_latest()
            .build();

        Self {
            client: s3::Client::from_conf(conf),
        }
    }

    /// Enumerates every object matching a glob path, with sizes, sorted by
    /// path so callers get stable numbering. An empty result is an error:
    /// a job over zero inputs is a submission mistake, not an empty phase.
    pub async fn list_matching(&self, glob_path: &str) -> Result<Vec<FileInfo>, DfsError> {
        let parsed = Url::parse(glob_path).map_err(|e| DfsError::BadPath {
            path: glob_path.to_string(),
            reason: e.to_string(),
        })?;
        let scheme = parsed.scheme().to_string();
        let BucketKey { bucket, key } = path_to_bucket_key(glob_path)?;

        let matcher = compile_matcher(glob_path, &key)?;
        let prefix = literal_prefix(&key).to_string();
        debug!("listing {}://{} under prefix {:?}", scheme, bucket, prefix);

        let mut response = self
            .client
            .list_objects_v2()
            .bucket(&bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        let mut files = vec![];
        while let Some(result) = response.next().await {
            let output = result.map_err(|e| {
                error!("list_objects_v2 on {} failed: {e:?}", bucket);
                DfsError::ListFail {
                    path: glob_path.to_string(),
                    reason: e.to_string(),
                }
            })?;
            for object in output.contents() {
                let Some(object_key) = object.key() else {
                    continue;
                };
                if matcher.is_match(object_key) {
                    files.push(FileInfo {
                        path: format!("{}://{}/{}", scheme, bucket, object_key),
                        size: object.size().unwrap_or(0) as u64,
                    });
                }
            }
        }

        if files.is_empty() {
            return Err(DfsError::NoSuchFile(glob_path.to_string()));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

fn compile_matcher(path: &str, pattern: &str) -> Result<GlobMatcher, DfsError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| DfsError::BadPath {
            path: path.to_string(),
            reason: e.to_string(),
        })
}
