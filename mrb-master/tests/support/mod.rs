//! In-memory collaborators for driving the master without a network: a
//! resource platform that records pod-group calls, a lock service over a
//! hash map, and a fixed input listing.

// Not every test target exercises every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use common::dfs::{DfsError, FileInfo};
use mrb_master::core::master::{DfsInfo, JobDescriptor, JobPriority, PipeStyle};
use mrb_master::executor::DelayedTaskExecutor;
use mrb_master::galaxy::{GalaxyError, PodGroupSpec, ResourcePlatform};
use mrb_master::input::InputDfs;
use mrb_master::master_impl::{MasterConfig, MasterImpl};
use mrb_master::nexus::{LockChange, LockService, NexusError, SessionEvent};

#[derive(Default)]
pub struct FakePlatform {
    pub submitted: Mutex<Vec<PodGroupSpec>>,
    pub updated: Mutex<Vec<(String, Option<String>, Option<u32>)>>,
    pub killed: Mutex<Vec<String>>,
    pub refuse_submissions: AtomicBool,
    next_handle: AtomicU32,
}

impl FakePlatform {
    pub fn refusing() -> Self {
        let platform = Self::default();
        platform.refuse_submissions.store(true, Ordering::SeqCst);
        platform
    }
}

#[tonic::async_trait]
impl ResourcePlatform for FakePlatform {
    async fn submit_pod_group(&self, spec: PodGroupSpec) -> Result<String, GalaxyError> {
        if self.refuse_submissions.load(Ordering::SeqCst) {
            return Err(GalaxyError::Refused("submit"));
        }
        let handle = format!("pg-{}", self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.submitted.lock().await.push(spec);
        Ok(handle)
    }

    async fn update_pod_group(
        &self,
        handle: &str,
        priority: Option<String>,
        capacity: Option<u32>,
    ) -> Result<(), GalaxyError> {
        self.updated
            .lock()
            .await
            .push((handle.to_string(), priority, capacity));
        Ok(())
    }

    async fn kill_pod_group(&self, handle: &str) -> Result<(), GalaxyError> {
        self.killed.lock().await.push(handle.to_string());
        Ok(())
    }
}

pub struct FakeNexus {
    pub kv: Mutex<HashMap<String, Vec<u8>>>,
    session: String,
    watchers: Mutex<Vec<mpsc::Sender<LockChange>>>,
    session_listeners: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl FakeNexus {
    pub fn new(session: &str) -> Self {
        Self {
            kv: Mutex::new(HashMap::new()),
            session: session.to_string(),
            watchers: Mutex::new(Vec::new()),
            session_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Simulates the lock changing hands.
    pub async fn fire_lock_change(&self, key: &str, holder_session: &str) {
        let change = LockChange {
            key: key.to_string(),
            holder_session: holder_session.to_string(),
        };
        for watcher in self.watchers.lock().await.iter() {
            let _ = watcher.send(change.clone()).await;
        }
    }

    pub async fn expire_session(&self) {
        for listener in self.session_listeners.lock().await.iter() {
            let _ = listener.try_send(SessionEvent::Expired);
        }
    }
}

#[tonic::async_trait]
impl LockService for FakeNexus {
    async fn lock(&self, _key: &str) -> Result<(), NexusError> {
        Ok(())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), NexusError> {
        self.kv.lock().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NexusError> {
        Ok(self.kv.lock().await.get(key).cloned())
    }

    async fn scan(
        &self,
        start_key: &str,
        end_key: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, NexusError> {
        let kv = self.kv.lock().await;
        let mut entries: Vec<(String, Vec<u8>)> = kv
            .iter()
            .filter(|(key, _)| key.as_str() >= start_key && key.as_str() < end_key)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn watch(&self, _key: &str) -> Result<mpsc::Receiver<LockChange>, NexusError> {
        let (tx, rx) = mpsc::channel(16);
        self.watchers.lock().await.push(tx);
        Ok(rx)
    }

    fn session_id(&self) -> String {
        self.session.clone()
    }

    async fn session_events(&self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(4);
        self.session_listeners.lock().await.push(tx);
        rx
    }
}

pub struct FakeInput {
    pub files: Vec<FileInfo>,
}

#[tonic::async_trait]
impl InputDfs for FakeInput {
    async fn enumerate(&self, _dfs: &DfsInfo, globs: &[String]) -> Result<Vec<FileInfo>, DfsError> {
        if self.files.is_empty() {
            let glob = globs.first().cloned().unwrap_or_default();
            return Err(DfsError::NoSuchFile(glob));
        }
        Ok(self.files.clone())
    }
}

pub fn file(path: &str, size: u64) -> FileInfo {
    FileInfo {
        path: path.to_string(),
        size,
    }
}

pub fn test_config(recovery: bool) -> MasterConfig {
    MasterConfig {
        galaxy_address: "localhost:8101".to_string(),
        nexus_server_list: vec!["localhost:8868".to_string()],
        nexus_root_path: "/mrb/".to_string(),
        master_port: "7810".to_string(),
        master_lock_path: "master_lock".to_string(),
        master_path: "master".to_string(),
        jobdata_header: "jobdata_".to_string(),
        gc_interval: std::time::Duration::from_secs(600),
        backup_interval: std::time::Duration::from_secs(30),
        recovery,
    }
}

/// A job over one 64 MB input split unless callers override the descriptor.
pub fn descriptor(reduce_total: u32, max_attempts: u32) -> JobDescriptor {
    JobDescriptor {
        name: "wordcount".to_string(),
        pipe_style: PipeStyle::Streaming as i32,
        input_dfs: Some(DfsInfo {
            user: "mrb".to_string(),
            host: "127.0.0.1".to_string(),
            port: "9000".to_string(),
        }),
        output_dfs: Some(DfsInfo {
            user: "mrb".to_string(),
            host: "127.0.0.1".to_string(),
            port: "9000".to_string(),
        }),
        map_command: "./app --map".to_string(),
        reduce_command: "./app --reduce".to_string(),
        map_capacity: 1,
        reduce_capacity: 1,
        priority: JobPriority::Offline as i32,
        reduce_total,
        inputs: vec!["hdfs://x/a".to_string()],
        split_size: 64 << 20,
        task_timeout: 600,
        max_attempts,
    }
}

pub struct TestCluster {
    pub master: Arc<MasterImpl>,
    pub platform: Arc<FakePlatform>,
    pub nexus: Arc<FakeNexus>,
    pub executor: DelayedTaskExecutor,
}

pub fn cluster(files: Vec<FileInfo>) -> TestCluster {
    cluster_on(Arc::new(FakeNexus::new("session-1")), files, false)
}

/// Builds a master over an existing lock service, so tests can hand the
/// same KV store to a successor master.
pub fn cluster_on(nexus: Arc<FakeNexus>, files: Vec<FileInfo>, recovery: bool) -> TestCluster {
    let platform = Arc::new(FakePlatform::default());
    let (executor, _handle) = DelayedTaskExecutor::spawn();
    let master = MasterImpl::new(
        test_config(recovery),
        Arc::clone(&platform) as Arc<dyn ResourcePlatform>,
        Arc::clone(&nexus) as Arc<dyn LockService>,
        Arc::new(FakeInput { files }),
        executor.clone(),
    );
    TestCluster {
        master,
        platform,
        nexus,
        executor,
    }
}
