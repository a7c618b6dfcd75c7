//! Per-job state machine. A tracker owns the map phase's split manager and
//! the reduce phase's slot pool, an append-only allocation history, and the
//! pod-group handles it requested from the resource platform. One mutex
//! covers all of that; platform calls are made with parameters copied out
//! and no lock held.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::alloc::{
    AssignDenied, Counts, Finish, IdAllocator, IdItem, InputChunk, ResourceItem, ResourceManager,
};
use crate::core::master::{
    JobDescriptor, JobOverview, JobPriority, JobState, Status, TaskState, TaskStatistics,
};
use crate::galaxy::{PodGroupSpec, ResourcePlatform};
use crate::input::InputDfs;
use common::dfs::DfsError;

/// How many allocation records a progress check reports, newest last.
pub const RECENT_HISTORY: usize = 32;

/// One attempt's lifetime in the allocation history: a `Running` record is
/// appended at assignment, a second record with the worker-reported final
/// state and the measured period at completion.
#[derive(Debug, Clone)]
pub struct AllocateItem {
    pub resource_no: i32,
    pub attempt: i32,
    pub endpoint: String,
    pub state: TaskState,
    /// Unix milliseconds at assignment.
    pub alloc_time: i64,
    /// Milliseconds from assignment to the worker's report.
    pub period: i64,
    pub is_map: bool,
}

struct Inner {
    state: JobState,
    map: Option<ResourceManager>,
    reduce: Option<IdAllocator>,
    history: Vec<AllocateItem>,
    map_handle: Option<String>,
    reduce_handle: Option<String>,
}

pub struct JobTracker {
    job_id: String,
    desc: JobDescriptor,
    galaxy: Arc<dyn ResourcePlatform>,
    input: Arc<dyn InputDfs>,
    inner: Mutex<Inner>,
}

impl JobTracker {
    pub fn new(
        desc: JobDescriptor,
        galaxy: Arc<dyn ResourcePlatform>,
        input: Arc<dyn InputDfs>,
    ) -> Self {
        Self {
            job_id: generate_job_id(),
            desc,
            galaxy,
            input,
            inner: Mutex::new(Inner {
                state: JobState::Pending,
                map: None,
                reduce: None,
                history: Vec::new(),
                map_handle: None,
                reduce_handle: None,
            }),
        }
    }

    /// Rebuilds a tracker from a snapshot. Splits are restored as pending or
    /// done only: completed history records are replayed to mark done slots,
    /// mid-flight attempt progress is not reconstructed. Pod-group handles
    /// are not persisted, so a recovered tracker cannot reach its old pods.
    pub fn recovered(
        job_id: String,
        desc: JobDescriptor,
        galaxy: Arc<dyn ResourcePlatform>,
        input: Arc<dyn InputDfs>,
        state: JobState,
        history: Vec<AllocateItem>,
        inputs: Vec<InputChunk>,
    ) -> Self {
        let max_attempts = desc.max_attempts.max(1);
        let mut map = ResourceManager::from_chunks(inputs, max_attempts);
        let mut reduce = IdAllocator::new(desc.reduce_total, max_attempts);
        for item in &history {
            if item.state == TaskState::Completed {
                if item.is_map {
                    map.mark_done(item.resource_no, item.attempt);
                } else {
                    reduce.mark_done(item.resource_no, item.attempt);
                }
            }
        }
        Self {
            job_id,
            desc,
            galaxy,
            input,
            inner: Mutex::new(Inner {
                state,
                map: Some(map),
                reduce: Some(reduce),
                history,
                map_handle: None,
                reduce_handle: None,
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.desc
    }

    pub async fn state(&self) -> JobState {
        self.inner.lock().await.state
    }

    fn reduce_required(&self) -> bool {
        self.desc.reduce_total > 0
    }

    /// Enumerates inputs, builds both phase schedulers, and requests the
    /// worker pod groups. Any failure leaves the job failed with the
    /// corresponding status.
    pub async fn start(&self) -> Status {
        let dfs = self.desc.input_dfs.clone().unwrap_or_default();
        let files = match self.input.enumerate(&dfs, &self.desc.inputs).await {
            Ok(files) => files,
            Err(err) => {
                error!("{}: input enumeration failed: {}", self.job_id, err);
                self.inner.lock().await.state = JobState::Failed;
                return match err {
                    DfsError::NoSuchFile(_) => Status::NoSuchFile,
                    DfsError::UnsupportedScheme(_) => Status::NotImplement,
                    _ => Status::ReadFileFail,
                };
            }
        };

        let max_attempts = self.desc.max_attempts.max(1);
        let split_total;
        {
            let mut inner = self.inner.lock().await;
            let map = ResourceManager::from_files(&files, self.desc.split_size, max_attempts);
            split_total = map.counts().total;
            inner.map = Some(map);
            inner.reduce = Some(IdAllocator::new(self.desc.reduce_total, max_attempts));
        }

        let priority = priority_label(self.desc.priority()).to_string();
        let map_spec = PodGroupSpec {
            name: format!("{}_map", self.job_id),
            command: self.desc.map_command.clone(),
            capacity: self.desc.map_capacity,
            priority: priority.clone(),
        };
        let map_handle = match self.galaxy.submit_pod_group(map_spec).await {
            Ok(handle) => handle,
            Err(err) => {
                error!("{}: map pod group rejected: {}", self.job_id, err);
                self.inner.lock().await.state = JobState::Failed;
                return Status::GalaxyError;
            }
        };

        let reduce_handle = if self.reduce_required() {
            let reduce_spec = PodGroupSpec {
                name: format!("{}_reduce", self.job_id),
                command: self.desc.reduce_command.clone(),
                capacity: self.desc.reduce_capacity,
                priority,
            };
            match self.galaxy.submit_pod_group(reduce_spec).await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    error!("{}: reduce pod group rejected: {}", self.job_id, err);
                    if let Err(err) = self.galaxy.kill_pod_group(&map_handle).await {
                        warn!("{}: map pod group teardown failed: {}", self.job_id, err);
                    }
                    self.inner.lock().await.state = JobState::Failed;
                    return Status::GalaxyError;
                }
            }
        } else {
            None
        };

        let mut inner = self.inner.lock().await;
        inner.map_handle = Some(map_handle);
        inner.reduce_handle = reduce_handle;
        inner.state = JobState::Running;
        info!(
            "{} running: {} splits, {} reduce slots",
            self.job_id, split_total, self.desc.reduce_total
        );
        Status::Ok
    }

    /// Forwards capacity and priority changes to the platform. Absent
    /// arguments leave the corresponding setting untouched.
    pub async fn update(
        &self,
        priority: Option<JobPriority>,
        map_capacity: Option<u32>,
        reduce_capacity: Option<u32>,
    ) -> Status {
        let (map_handle, reduce_handle) = {
            let inner = self.inner.lock().await;
            (inner.map_handle.clone(), inner.reduce_handle.clone())
        };
        let priority = priority.map(|p| priority_label(p).to_string());

        if let Some(handle) = map_handle {
            if priority.is_some() || map_capacity.is_some() {
                if let Err(err) = self
                    .galaxy
                    .update_pod_group(&handle, priority.clone(), map_capacity)
                    .await
                {
                    warn!("{}: map pod group update failed: {}", self.job_id, err);
                    return Status::GalaxyError;
                }
            }
        }
        if let Some(handle) = reduce_handle {
            if priority.is_some() || reduce_capacity.is_some() {
                if let Err(err) = self
                    .galaxy
                    .update_pod_group(&handle, priority, reduce_capacity)
                    .await
                {
                    warn!("{}: reduce pod group update failed: {}", self.job_id, err);
                    return Status::GalaxyError;
                }
            }
        }
        Status::Ok
    }

    /// Requests teardown of both pod groups. Idempotent; an already-terminal
    /// state (completed, failed) is preserved.
    pub async fn kill(&self) -> Status {
        let (map_handle, reduce_handle) = {
            let inner = self.inner.lock().await;
            (inner.map_handle.clone(), inner.reduce_handle.clone())
        };
        if map_handle.is_none() && reduce_handle.is_none() {
            warn!("{}: no pod groups to kill", self.job_id);
        }
        for handle in [map_handle, reduce_handle].into_iter().flatten() {
            if let Err(err) = self.galaxy.kill_pod_group(&handle).await {
                warn!("{}: pod group {} teardown failed: {}", self.job_id, handle, err);
            }
        }
        let mut inner = self.inner.lock().await;
        if !is_terminal(inner.state) {
            inner.state = JobState::Killed;
            info!("{} killed", self.job_id);
        }
        Status::Ok
    }

    pub async fn assign_map(&self, endpoint: &str) -> (Option<ResourceItem>, Status) {
        let mut inner = self.inner.lock().await;
        if inner.state != JobState::Running {
            return (None, Status::NoMore);
        }
        let Some(map) = inner.map.as_mut() else {
            return (None, Status::Suspend);
        };
        match map.assign() {
            Ok(item) => {
                let record = AllocateItem {
                    resource_no: item.no,
                    attempt: item.attempt,
                    endpoint: endpoint.to_string(),
                    state: TaskState::Running,
                    alloc_time: unix_time_ms(),
                    period: 0,
                    is_map: true,
                };
                inner.history.push(record);
                info!(
                    "{}: map <{},{}> assigned to {}",
                    self.job_id, item.no, item.attempt, endpoint
                );
                (Some(item), Status::Ok)
            }
            Err(AssignDenied::NoMore) => (None, Status::NoMore),
            Err(AssignDenied::Suspend) => (None, Status::Suspend),
        }
    }

    /// Refuses work until every map split is done, then behaves like the map
    /// side over the reduce slot pool.
    pub async fn assign_reduce(&self, endpoint: &str) -> (Option<IdItem>, Status) {
        let mut inner = self.inner.lock().await;
        if inner.state != JobState::Running {
            return (None, Status::NoMore);
        }
        let map_finished = inner.map.as_ref().map(|m| m.is_finished()).unwrap_or(false);
        if !map_finished {
            return (None, Status::Suspend);
        }
        let Some(reduce) = inner.reduce.as_mut() else {
            return (None, Status::Suspend);
        };
        match reduce.assign() {
            Ok(item) => {
                let record = AllocateItem {
                    resource_no: item.no,
                    attempt: item.attempt,
                    endpoint: endpoint.to_string(),
                    state: TaskState::Running,
                    alloc_time: unix_time_ms(),
                    period: 0,
                    is_map: false,
                };
                inner.history.push(record);
                info!(
                    "{}: reduce <{},{}> assigned to {}",
                    self.job_id, item.no, item.attempt, endpoint
                );
                (Some(item), Status::Ok)
            }
            Err(AssignDenied::NoMore) => (None, Status::NoMore),
            Err(AssignDenied::Suspend) => (None, Status::Suspend),
        }
    }

    pub async fn finish_map(&self, no: i32, attempt: i32, task_state: TaskState) -> Status {
        let mut inner = self.inner.lock().await;
        let Some(map) = inner.map.as_mut() else {
            return Status::NoSuchTask;
        };
        let outcome = map.finish(no, attempt, task_state);
        if outcome == Finish::NoSuchTask {
            return Status::NoSuchTask;
        }
        record_finish(&mut inner, no, attempt, task_state, true);
        if outcome == Finish::Exhausted {
            error!(
                "{}: map <{},{}> out of attempts, job failed",
                self.job_id, no, attempt
            );
            inner.state = JobState::Failed;
            return Status::Ok;
        }
        if task_state == TaskState::Completed {
            let map_finished = inner.map.as_ref().map(|m| m.is_finished()).unwrap_or(false);
            if map_finished {
                if self.reduce_required() {
                    info!("{}: map phase complete, reduce may begin", self.job_id);
                } else {
                    inner.state = JobState::Completed;
                    info!("{} completed", self.job_id);
                }
            }
        }
        Status::Ok
    }

    pub async fn finish_reduce(&self, no: i32, attempt: i32, task_state: TaskState) -> Status {
        let mut inner = self.inner.lock().await;
        let Some(reduce) = inner.reduce.as_mut() else {
            return Status::NoSuchTask;
        };
        let outcome = reduce.finish(no, attempt, task_state);
        if outcome == Finish::NoSuchTask {
            return Status::NoSuchTask;
        }
        record_finish(&mut inner, no, attempt, task_state, false);
        if outcome == Finish::Exhausted {
            error!(
                "{}: reduce <{},{}> out of attempts, job failed",
                self.job_id, no, attempt
            );
            inner.state = JobState::Failed;
            return Status::Ok;
        }
        if task_state == TaskState::Completed {
            let reduce_finished = inner
                .reduce
                .as_ref()
                .map(|r| r.is_finished())
                .unwrap_or(false);
            if reduce_finished {
                inner.state = JobState::Completed;
                info!("{} completed", self.job_id);
            }
        }
        Status::Ok
    }

    /// Progress summary: phase statistics plus the most recent allocation
    /// records.
    pub async fn check(&self) -> Vec<AllocateItem> {
        let inner = self.inner.lock().await;
        let skip = inner.history.len().saturating_sub(RECENT_HISTORY);
        inner.history[skip..].to_vec()
    }

    pub async fn overview(&self) -> JobOverview {
        let inner = self.inner.lock().await;
        JobOverview {
            desc: Some(self.desc.clone()),
            jobid: self.job_id.clone(),
            state: inner.state as i32,
            map_stat: Some(statistics(inner.map.as_ref().map(|m| m.counts()))),
            reduce_stat: Some(statistics(inner.reduce.as_ref().map(|r| r.counts()))),
        }
    }

    /// Produces the two persistence blobs. Both are taken under the tracker
    /// lock so state, history and inputs are mutually consistent.
    pub async fn snapshot(&self) -> Result<(Vec<u8>, Vec<u8>), crate::snapshot::SnapshotError> {
        let inner = self.inner.lock().await;
        let descriptor = crate::snapshot::encode_descriptor(&self.desc)?;
        let inputs = inner
            .map
            .as_ref()
            .map(|m| m.inputs().to_vec())
            .unwrap_or_default();
        let data = crate::snapshot::encode_job_data(inner.state, &inner.history, &inputs)?;
        Ok((descriptor, data))
    }
}

/// Appends the final-state record for an attempt, recovering the assignment
/// time and endpoint from its `Running` record.
fn record_finish(inner: &mut Inner, no: i32, attempt: i32, state: TaskState, is_map: bool) {
    let now = unix_time_ms();
    let running = inner.history.iter().rev().find(|record| {
        record.is_map == is_map
            && record.resource_no == no
            && record.attempt == attempt
            && record.state == TaskState::Running
    });
    let (alloc_time, endpoint) = match running {
        Some(record) => (record.alloc_time, record.endpoint.clone()),
        None => (now, String::new()),
    };
    inner.history.push(AllocateItem {
        resource_no: no,
        attempt,
        endpoint,
        state,
        alloc_time,
        period: now.saturating_sub(alloc_time),
        is_map,
    });
}

fn statistics(counts: Option<Counts>) -> TaskStatistics {
    let counts = counts.unwrap_or_default();
    TaskStatistics {
        pending: counts.pending,
        allocated: counts.allocated,
        done: counts.done,
        total: counts.total,
    }
}

pub fn is_terminal(state: JobState) -> bool {
    matches!(
        state,
        JobState::Completed | JobState::Failed | JobState::Killed
    )
}

/// The literal strings the resource platform understands.
pub fn priority_label(priority: JobPriority) -> &'static str {
    match priority {
        JobPriority::Monitor => "kMonitor",
        JobPriority::Online => "kOnline",
        JobPriority::Offline => "kOffline",
        JobPriority::BestEffort => "kBestEffort",
    }
}

fn generate_job_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("job_{timestamp}{suffix:04}")
}

pub fn unix_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_carry_the_expected_prefix() {
        let id = generate_job_id();
        assert!(id.starts_with("job_"));
        assert!(id.len() > "job_".len());
    }

    #[test]
    fn priority_labels_match_the_platform_contract() {
        assert_eq!(priority_label(JobPriority::Monitor), "kMonitor");
        assert_eq!(priority_label(JobPriority::Online), "kOnline");
        assert_eq!(priority_label(JobPriority::Offline), "kOffline");
        assert_eq!(priority_label(JobPriority::BestEffort), "kBestEffort");
    }

    #[test]
    fn terminal_states() {
        assert!(is_terminal(JobState::Completed));
        assert!(is_terminal(JobState::Failed));
        assert!(is_terminal(JobState::Killed));
        assert!(!is_terminal(JobState::Pending));
        assert!(!is_terminal(JobState::Running));
    }
}
