//! The process singleton. Owns every job tracker in a single registry keyed
//! by job id, where each entry is live (still accepting work) or dead
//! (terminal, kept for queries until the GC loop reaps it). Runs leader
//! election against the lock service and the periodic persistence and GC
//! chores on the delayed-task executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::alloc::{IdItem, ResourceItem};
use crate::core::master::{
    JobDescriptor, JobOverview, JobPriority, JobState, Status, TaskState, WorkMode,
};
use crate::executor::{DelayedTaskExecutor, Task};
use crate::galaxy::ResourcePlatform;
use crate::input::InputDfs;
use crate::job_tracker::{is_terminal, AllocateItem, JobTracker};
use crate::nexus::{LockChange, LockService, NexusError, SessionEvent};
use crate::snapshot;

/// Options recognized by the master, injected at construction.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub galaxy_address: String,
    pub nexus_server_list: Vec<String>,
    pub nexus_root_path: String,
    pub master_port: String,
    pub master_lock_path: String,
    pub master_path: String,
    pub jobdata_header: String,
    pub gc_interval: Duration,
    pub backup_interval: Duration,
    pub recovery: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Live,
    Dead,
}

struct RegisteredJob {
    liveness: Liveness,
    tracker: Arc<JobTracker>,
}

/// A unit of work handed to a polling worker.
pub enum AssignedTask {
    Map(ResourceItem),
    Reduce(IdItem),
}

pub struct MasterImpl {
    config: MasterConfig,
    galaxy: Arc<dyn ResourcePlatform>,
    nexus: Arc<dyn LockService>,
    input: Arc<dyn InputDfs>,
    executor: DelayedTaskExecutor,
    jobs: Mutex<HashMap<String, RegisteredJob>>,
}

impl MasterImpl {
    pub fn new(
        config: MasterConfig,
        galaxy: Arc<dyn ResourcePlatform>,
        nexus: Arc<dyn LockService>,
        input: Arc<dyn InputDfs>,
        executor: DelayedTaskExecutor,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            galaxy,
            nexus,
            input,
            executor,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Takes the master lock (blocking until this process holds it),
    /// publishes our endpoint, optionally restores persisted jobs, and
    /// starts the housekeeping loops. Fatal conditions discovered later
    /// (lock loss, session loss) arrive on `fatal_tx`.
    pub async fn init(self: &Arc<Self>, fatal_tx: mpsc::Sender<String>) -> Result<(), NexusError> {
        self.acquire_master_lock(fatal_tx).await?;
        info!("master alive, recovering");
        if self.config.recovery {
            self.reload().await;
            info!("master recovered");
        }
        self.schedule_gc();
        self.schedule_persistence();
        Ok(())
    }

    async fn acquire_master_lock(
        self: &Arc<Self>,
        fatal_tx: mpsc::Sender<String>,
    ) -> Result<(), NexusError> {
        let lock_key = format!(
            "{}{}",
            self.config.nexus_root_path, self.config.master_lock_path
        );
        self.nexus.lock(&lock_key).await?;

        let master_key = format!("{}{}", self.config.nexus_root_path, self.config.master_path);
        let endpoint = self.self_endpoint();
        self.nexus.put(&master_key, endpoint.as_bytes()).await?;

        let watch_rx = self.nexus.watch(&lock_key).await?;
        let session_rx = self.nexus.session_events().await;
        let own_session = self.nexus.session_id();
        tokio::spawn(watch_lock(own_session, watch_rx, session_rx, fatal_tx));

        info!("master lock acquired. {} -> {}", master_key, endpoint);
        Ok(())
    }

    fn self_endpoint(&self) -> String {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("{}:{}", hostname, self.config.master_port)
    }

    pub async fn submit_job(&self, desc: JobDescriptor) -> (Status, String) {
        info!("submit job: {}", desc.name);
        let tracker = Arc::new(JobTracker::new(
            desc,
            Arc::clone(&self.galaxy),
            Arc::clone(&self.input),
        ));
        let status = tracker.start().await;
        let job_id = tracker.job_id().to_string();
        let liveness = if status == Status::Ok {
            Liveness::Live
        } else {
            Liveness::Dead
        };
        self.jobs
            .lock()
            .await
            .insert(job_id.clone(), RegisteredJob { liveness, tracker });
        (status, job_id)
    }

    pub async fn update_job(
        &self,
        jobid: &str,
        priority: Option<JobPriority>,
        map_capacity: Option<u32>,
        reduce_capacity: Option<u32>,
    ) -> Status {
        let Some(tracker) = self.live_tracker(jobid).await else {
            warn!("try to update an inexist job: {}", jobid);
            return Status::NoSuchJob;
        };
        tracker.update(priority, map_capacity, reduce_capacity).await
    }

    pub async fn kill_job(&self, jobid: &str) -> Status {
        if self.live_tracker(jobid).await.is_none() {
            warn!("try to kill an inexist job: {}", jobid);
            return Status::NoSuchJob;
        }
        self.retract_job(jobid).await
    }

    /// Moves a job to the retired side and tears its pods down. Unknown or
    /// already-retired ids are tolerated: retraction races with itself when
    /// a kill and a final completion land together.
    pub async fn retract_job(&self, jobid: &str) -> Status {
        let tracker = {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(jobid) {
                Some(job) if job.liveness == Liveness::Live => {
                    job.liveness = Liveness::Dead;
                    Arc::clone(&job.tracker)
                }
                Some(_) => {
                    warn!("retract job {}: already retired", jobid);
                    return Status::Ok;
                }
                None => {
                    warn!("retract job failed: job inexist: {}", jobid);
                    return Status::Ok;
                }
            }
        };
        tracker.kill().await
    }

    pub async fn list_jobs(&self, all: bool) -> Vec<JobOverview> {
        let trackers = self.collect_trackers(all).await;
        let mut jobs = Vec::with_capacity(trackers.len());
        for (_, tracker) in trackers {
            jobs.push(tracker.overview().await);
        }
        jobs
    }

    pub async fn show_job(
        &self,
        jobid: &str,
        all: bool,
    ) -> (Status, Option<JobOverview>, Vec<AllocateItem>) {
        let tracker = match self.any_tracker(jobid).await {
            Some((Liveness::Live, tracker)) => tracker,
            Some((Liveness::Dead, tracker)) if all => tracker,
            _ => {
                warn!("try to access an inexist job: {}", jobid);
                return (Status::NoSuchJob, None, Vec::new());
            }
        };
        let overview = tracker.overview().await;
        let tasks = tracker.check().await;
        (Status::Ok, Some(overview), tasks)
    }

    pub async fn assign_task(
        &self,
        jobid: &str,
        endpoint: &str,
        mode: WorkMode,
    ) -> (Status, Option<(AssignedTask, JobDescriptor)>) {
        let Some((liveness, tracker)) = self.any_tracker(jobid).await else {
            warn!("assign task failed: job inexist: {}", jobid);
            return (Status::NoSuchJob, None);
        };
        if liveness == Liveness::Dead {
            // A lagging worker learns the job is over without an error.
            return (Status::NoMore, None);
        }
        match mode {
            WorkMode::Map => {
                let (item, status) = tracker.assign_map(endpoint).await;
                let task =
                    item.map(|item| (AssignedTask::Map(item), tracker.descriptor().clone()));
                (status, task)
            }
            WorkMode::Reduce => {
                let (item, status) = tracker.assign_reduce(endpoint).await;
                let task =
                    item.map(|item| (AssignedTask::Reduce(item), tracker.descriptor().clone()));
                (status, task)
            }
        }
    }

    pub async fn finish_task(
        &self,
        jobid: &str,
        task_id: i32,
        attempt: i32,
        mode: WorkMode,
        task_state: TaskState,
    ) -> Status {
        let Some((liveness, tracker)) = self.any_tracker(jobid).await else {
            warn!("finish task failed: job inexist: {}", jobid);
            return Status::NoSuchJob;
        };
        if liveness == Liveness::Dead {
            return Status::Ok;
        }
        let status = match mode {
            WorkMode::Map => tracker.finish_map(task_id, attempt, task_state).await,
            WorkMode::Reduce => tracker.finish_reduce(task_id, attempt, task_state).await,
        };
        // A report can complete or fail the whole job; fold the tracker into
        // the retired side so later polls see NoMore.
        if is_terminal(tracker.state().await) {
            self.retract_job(jobid).await;
        }
        status
    }

    /// Drops every retired tracker. Runs once per GC interval.
    pub async fn collect_garbage(&self) {
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|jobid, job| {
            if job.liveness == Liveness::Dead {
                info!("[gc] remove dead job tracker: {}", jobid);
                false
            } else {
                true
            }
        });
    }

    /// Writes both snapshot blobs for every tracker, live first. A failed
    /// put is logged and skipped; the next tick retries.
    pub async fn persist_all(&self) {
        let trackers = self.collect_trackers(true).await;
        for (liveness, tracker) in trackers {
            let jobid = tracker.job_id().to_string();
            let (descriptor, data) = match tracker.snapshot().await {
                Ok(blobs) => blobs,
                Err(err) => {
                    error!("snapshot {} failed: {}", jobid, err);
                    continue;
                }
            };
            let desc_key = format!("{}{}", self.config.nexus_root_path, jobid);
            let data_key = format!(
                "{}{}{}",
                self.config.nexus_root_path, self.config.jobdata_header, jobid
            );
            if let Err(err) = self.nexus.put(&desc_key, &descriptor).await {
                error!("persistence put {} failed: {}", desc_key, err);
                continue;
            }
            if let Err(err) = self.nexus.put(&data_key, &data).await {
                error!("persistence put {} failed: {}", data_key, err);
                continue;
            }
            debug!(
                "{} job persistence: {}, desc: {} bytes, data: {} bytes",
                match liveness {
                    Liveness::Live => "running",
                    Liveness::Dead => "finished",
                },
                jobid,
                descriptor.len(),
                data.len()
            );
        }
    }

    /// Restores every persisted job from the lock service. Each invocation
    /// is a fresh scan. Trackers restored in the running state rejoin the
    /// live side; everything else is retired immediately.
    pub async fn reload(&self) {
        let root = self.config.nexus_root_path.clone();
        let start = format!("{root}job_");
        // The end key is the code point after '_'; a conservative bound for
        // ASCII-ordered stores. The prefix filter below guards the rest.
        let end = format!("{root}job`");
        let entries = match self.nexus.scan(&start, &end).await {
            Ok(entries) => entries,
            Err(err) => {
                error!("recovery scan failed: {}", err);
                return;
            }
        };
        for (key, value) in entries {
            let Some(jobid) = key.strip_prefix(root.as_str()) else {
                continue;
            };
            if !jobid.starts_with("job_") {
                continue;
            }
            let desc = match snapshot::decode_descriptor(&value) {
                Ok(desc) => desc,
                Err(err) => {
                    warn!("skip {}: undecodable descriptor: {}", jobid, err);
                    continue;
                }
            };
            let data_key = format!("{}{}{}", root, self.config.jobdata_header, jobid);
            let (state, history, inputs) = match self.nexus.get(&data_key).await {
                Ok(Some(blob)) => match snapshot::decode_job_data(&blob) {
                    Ok(data) => data,
                    Err(err) => {
                        warn!("{}: undecodable job data: {}", jobid, err);
                        (JobState::Pending, Vec::new(), Vec::new())
                    }
                },
                Ok(None) => (JobState::Pending, Vec::new(), Vec::new()),
                Err(err) => {
                    warn!("{}: job data fetch failed: {}", jobid, err);
                    (JobState::Pending, Vec::new(), Vec::new())
                }
            };
            let liveness = if state == JobState::Running {
                Liveness::Live
            } else {
                Liveness::Dead
            };
            let tracker = Arc::new(JobTracker::recovered(
                jobid.to_string(),
                desc,
                Arc::clone(&self.galaxy),
                Arc::clone(&self.input),
                state,
                history,
                inputs,
            ));
            info!("recovered job {} as {:?}", jobid, state);
            self.jobs
                .lock()
                .await
                .insert(jobid.to_string(), RegisteredJob { liveness, tracker });
        }
    }

    fn schedule_gc(self: &Arc<Self>) {
        let master = Arc::clone(self);
        self.executor.add_task(MasterImpl::gc_loop(master));
    }

    fn gc_loop(master: Arc<MasterImpl>) -> Task {
        Box::pin(async move {
            master.collect_garbage().await;
            let delay = master.config.gc_interval;
            let next = Arc::clone(&master);
            let task: Task = MasterImpl::gc_loop(next);
            master.executor.delay_task(delay, task);
        })
    }

    fn schedule_persistence(self: &Arc<Self>) {
        let master = Arc::clone(self);
        self.executor
            .add_task(async move { MasterImpl::persistence_loop(master).await });
    }

    fn persistence_loop(master: Arc<MasterImpl>) -> Task {
        Box::pin(async move {
            master.persist_all().await;
            let delay = master.config.backup_interval;
            let next = Arc::clone(&master);
            let task: Task = MasterImpl::persistence_loop(next);
            master.executor.delay_task(delay, task);
        })
    }

    /// Snapshot of the registry: the minimum done under the lock is cloning
    /// the tracker handles; everything else happens after release. Live
    /// entries come first.
    async fn collect_trackers(&self, all: bool) -> Vec<(Liveness, Arc<JobTracker>)> {
        let jobs = self.jobs.lock().await;
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for job in jobs.values() {
            match job.liveness {
                Liveness::Live => live.push((job.liveness, Arc::clone(&job.tracker))),
                Liveness::Dead if all => dead.push((job.liveness, Arc::clone(&job.tracker))),
                Liveness::Dead => {}
            }
        }
        live.append(&mut dead);
        live
    }

    async fn live_tracker(&self, jobid: &str) -> Option<Arc<JobTracker>> {
        let jobs = self.jobs.lock().await;
        jobs.get(jobid)
            .filter(|job| job.liveness == Liveness::Live)
            .map(|job| Arc::clone(&job.tracker))
    }

    async fn any_tracker(&self, jobid: &str) -> Option<(Liveness, Arc<JobTracker>)> {
        let jobs = self.jobs.lock().await;
        jobs.get(jobid)
            .map(|job| (job.liveness, Arc::clone(&job.tracker)))
    }
}

/// Watches the master lock and our session. Any holder change away from our
/// session, a closed watch, or session expiry is fatal: the process must die
/// so a standby can take the lock.
async fn watch_lock(
    own_session: String,
    mut watch_rx: mpsc::Receiver<LockChange>,
    mut session_rx: mpsc::Receiver<SessionEvent>,
    fatal_tx: mpsc::Sender<String>,
) {
    loop {
        tokio::select! {
            change = watch_rx.recv() => match change {
                Some(change) if change.holder_session == own_session => {
                    debug!("lock watch: still holding {}", change.key);
                }
                Some(change) => {
                    let _ = fatal_tx
                        .send(format!("master lost lock to session {}", change.holder_session))
                        .await;
                    return;
                }
                None => {
                    let _ = fatal_tx.send("master lock watch closed".to_string()).await;
                    return;
                }
            },
            event = session_rx.recv() => {
                let reason = match event {
                    Some(SessionEvent::Expired) => "master lost session with nexus",
                    None => "nexus session channel closed",
                };
                let _ = fatal_tx.send(reason.to_string()).await;
                return;
            }
        }
    }
}
