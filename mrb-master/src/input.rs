//! Input-enumeration seam between job trackers and the DFS.

use common::dfs::{self, DfsAccess, DfsError, FileInfo};

use crate::core::master::DfsInfo;

#[tonic::async_trait]
pub trait InputDfs: Send + Sync + 'static {
    /// Expands every glob against the job's filesystem. Results are sorted
    /// by path and deduplicated so split numbering is stable.
    async fn enumerate(&self, dfs: &DfsInfo, globs: &[String]) -> Result<Vec<FileInfo>, DfsError>;
}

/// Production enumerator: builds one client per job from the descriptor's
/// DFS coordinates.
#[derive(Debug, Default)]
pub struct S3Input;

#[tonic::async_trait]
impl InputDfs for S3Input {
    async fn enumerate(&self, dfs: &DfsInfo, globs: &[String]) -> Result<Vec<FileInfo>, DfsError> {
        let client = dfs::Client::from_access(&DfsAccess {
            user: dfs.user.clone(),
            host: dfs.host.clone(),
            port: dfs.port.clone(),
        });
        let mut files = vec![];
        for glob in globs {
            files.extend(client.list_matching(glob).await?);
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        Ok(files)
    }
}
