//! End-to-end job lifecycles driven through the master with in-memory
//! collaborators: submission, assignment, retries, phase gating, kill and
//! update semantics.

mod support;

use mrb_master::core::master::{JobPriority, JobState, Status, TaskState, WorkMode};
use mrb_master::master_impl::{AssignedTask, MasterImpl};
use mrb_master::executor::DelayedTaskExecutor;
use mrb_master::galaxy::ResourcePlatform;
use mrb_master::input::InputDfs;
use mrb_master::nexus::LockService;
use std::sync::Arc;
use support::*;

async fn assign_map(
    cluster: &TestCluster,
    jobid: &str,
    endpoint: &str,
) -> (Status, Option<(i32, i32)>) {
    let (status, task) = cluster
        .master
        .assign_task(jobid, endpoint, WorkMode::Map)
        .await;
    let ids = task.map(|(task, _)| match task {
        AssignedTask::Map(item) => (item.no, item.attempt),
        AssignedTask::Reduce(_) => panic!("map request yielded a reduce task"),
    });
    (status, ids)
}

async fn assign_reduce(
    cluster: &TestCluster,
    jobid: &str,
    endpoint: &str,
) -> (Status, Option<(i32, i32)>) {
    let (status, task) = cluster
        .master
        .assign_task(jobid, endpoint, WorkMode::Reduce)
        .await;
    let ids = task.map(|(task, _)| match task {
        AssignedTask::Reduce(item) => (item.no, item.attempt),
        AssignedTask::Map(_) => panic!("reduce request yielded a map task"),
    });
    (status, ids)
}

#[tokio::test]
async fn single_split_single_reducer_runs_to_completion() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (status, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;
    assert_eq!(status, Status::Ok);

    let (status, task) = cluster
        .master
        .assign_task(&jobid, "w1:7710", WorkMode::Map)
        .await;
    assert_eq!(status, Status::Ok);
    let (task, desc) = task.expect("a map task");
    let AssignedTask::Map(item) = task else {
        panic!("expected a map task");
    };
    assert_eq!((item.no, item.attempt), (0, 0));
    assert_eq!(item.input.input_file, "hdfs://x/a");
    assert_eq!((item.input.offset, item.input.size), (0, 64 << 20));
    assert_eq!(desc.name, "wordcount");

    let status = cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Completed)
        .await;
    assert_eq!(status, Status::Ok);

    let (status, _) = assign_map(&cluster, &jobid, "w1:7710").await;
    assert_eq!(status, Status::NoMore);

    let (status, ids) = assign_reduce(&cluster, &jobid, "w1:7710").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(ids, Some((0, 0)));

    let status = cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Reduce, TaskState::Completed)
        .await;
    assert_eq!(status, Status::Ok);

    // The job is terminal and retired: visible with all=true, gone from the
    // live side, and a lagging worker only gets NoMore.
    let (status, job, _) = cluster.master.show_job(&jobid, true).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(job.expect("overview").state(), JobState::Completed);
    let (status, _, _) = cluster.master.show_job(&jobid, false).await;
    assert_eq!(status, Status::NoSuchJob);
    let (status, _) = assign_map(&cluster, &jobid, "w2:7710").await;
    assert_eq!(status, Status::NoMore);
}

#[tokio::test]
async fn failed_attempt_is_reassigned_and_late_report_does_not_double_count() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (_, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;

    let (_, ids) = assign_map(&cluster, &jobid, "w1:7710").await;
    assert_eq!(ids, Some((0, 0)));
    cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Failed)
        .await;

    let (status, ids) = assign_map(&cluster, &jobid, "w2:7710").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(ids, Some((0, 1)));
    let status = cluster
        .master
        .finish_task(&jobid, 0, 1, WorkMode::Map, TaskState::Completed)
        .await;
    assert_eq!(status, Status::Ok);

    // W1 comes back late with a completion for the dead attempt.
    let status = cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Completed)
        .await;
    assert_eq!(status, Status::Ok);

    let (_, job, _) = cluster.master.show_job(&jobid, false).await;
    let stat = job.expect("overview").map_stat.expect("map stats");
    assert_eq!((stat.done, stat.total), (1, 1));
}

#[tokio::test]
async fn attempts_exhausted_fail_the_job() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (_, jobid) = cluster.master.submit_job(descriptor(1, 2)).await;

    let (_, ids) = assign_map(&cluster, &jobid, "w1:7710").await;
    assert_eq!(ids, Some((0, 0)));
    cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Failed)
        .await;

    let (_, ids) = assign_map(&cluster, &jobid, "w1:7710").await;
    assert_eq!(ids, Some((0, 1)));
    let status = cluster
        .master
        .finish_task(&jobid, 0, 1, WorkMode::Map, TaskState::Failed)
        .await;
    assert_eq!(status, Status::Ok);

    let (status, _) = assign_map(&cluster, &jobid, "w1:7710").await;
    assert_eq!(status, Status::NoMore);
    let (status, job, _) = cluster.master.show_job(&jobid, true).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(job.expect("overview").state(), JobState::Failed);

    // Retraction tears the pod groups down.
    assert_eq!(cluster.platform.killed.lock().await.len(), 2);
}

#[tokio::test]
async fn reduce_assignment_waits_for_every_map_split() {
    let files = vec![file("hdfs://x/a", 64 << 20), file("hdfs://x/b", 64 << 20)];
    let cluster = cluster(files);
    let mut desc = descriptor(2, 3);
    desc.inputs = vec!["hdfs://x/*".to_string()];
    let (_, jobid) = cluster.master.submit_job(desc).await;

    let (status, _) = assign_reduce(&cluster, &jobid, "w9:7710").await;
    assert_eq!(status, Status::Suspend);

    for no in 0..2 {
        let (_, ids) = assign_map(&cluster, &jobid, "w1:7710").await;
        assert_eq!(ids, Some((no, 0)));
    }
    cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Completed)
        .await;
    // One split done is not enough.
    let (status, _) = assign_reduce(&cluster, &jobid, "w9:7710").await;
    assert_eq!(status, Status::Suspend);

    cluster
        .master
        .finish_task(&jobid, 1, 0, WorkMode::Map, TaskState::Completed)
        .await;
    let (status, ids) = assign_reduce(&cluster, &jobid, "w9:7710").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(ids, Some((0, 0)));
}

#[tokio::test]
async fn unknown_jobs_are_reported_as_such() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (status, _) = assign_map(&cluster, "job_0000000000", "w1:7710").await;
    assert_eq!(status, Status::NoSuchJob);
    let status = cluster
        .master
        .finish_task("job_0000000000", 0, 0, WorkMode::Map, TaskState::Completed)
        .await;
    assert_eq!(status, Status::NoSuchJob);
    assert_eq!(
        cluster.master.kill_job("job_0000000000").await,
        Status::NoSuchJob
    );
}

#[tokio::test]
async fn reports_for_unknown_splits_are_no_such_task() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (_, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;
    let status = cluster
        .master
        .finish_task(&jobid, 7, 0, WorkMode::Map, TaskState::Completed)
        .await;
    assert_eq!(status, Status::NoSuchTask);
}

#[tokio::test]
async fn kill_retires_the_job_and_tears_pods_down() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (_, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;

    assert_eq!(cluster.master.kill_job(&jobid).await, Status::Ok);
    let (status, job, _) = cluster.master.show_job(&jobid, true).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(job.expect("overview").state(), JobState::Killed);
    assert_eq!(cluster.platform.killed.lock().await.len(), 2);

    // Kill is live-only; a second kill no longer finds the job.
    assert_eq!(cluster.master.kill_job(&jobid).await, Status::NoSuchJob);

    // Lagging workers drain quietly against the retired entry.
    let (status, _) = assign_map(&cluster, &jobid, "w1:7710").await;
    assert_eq!(status, Status::NoMore);
    let status = cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Killed)
        .await;
    assert_eq!(status, Status::Ok);
}

#[tokio::test]
async fn update_forwards_priority_labels_and_capacities() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (_, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;

    let status = cluster
        .master
        .update_job(&jobid, Some(JobPriority::Online), Some(4), Some(2))
        .await;
    assert_eq!(status, Status::Ok);

    let updated = cluster.platform.updated.lock().await;
    assert_eq!(updated.len(), 2);
    assert_eq!(updated[0].1.as_deref(), Some("kOnline"));
    assert_eq!(updated[0].2, Some(4));
    assert_eq!(updated[1].1.as_deref(), Some("kOnline"));
    assert_eq!(updated[1].2, Some(2));
    drop(updated);

    cluster.master.kill_job(&jobid).await;
    let status = cluster.master.update_job(&jobid, None, Some(8), None).await;
    assert_eq!(status, Status::NoSuchJob);
}

#[tokio::test]
async fn empty_enumeration_fails_the_submission() {
    let cluster = cluster(vec![]);
    let (status, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;
    assert_eq!(status, Status::NoSuchFile);

    // The tracker is registered on the retired side for post-mortem queries.
    let (status, job, _) = cluster.master.show_job(&jobid, true).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(job.expect("overview").state(), JobState::Failed);
}

#[tokio::test]
async fn platform_refusal_fails_the_submission() {
    let nexus = Arc::new(FakeNexus::new("session-1"));
    let platform = Arc::new(FakePlatform::refusing());
    let (executor, _handle) = DelayedTaskExecutor::spawn();
    let master = MasterImpl::new(
        test_config(false),
        Arc::clone(&platform) as Arc<dyn ResourcePlatform>,
        nexus as Arc<dyn LockService>,
        Arc::new(FakeInput {
            files: vec![file("hdfs://x/a", 64 << 20)],
        }) as Arc<dyn InputDfs>,
        executor,
    );

    let (status, jobid) = master.submit_job(descriptor(1, 3)).await;
    assert_eq!(status, Status::GalaxyError);
    let (status, job, _) = master.show_job(&jobid, true).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(job.expect("overview").state(), JobState::Failed);
}

#[tokio::test]
async fn list_jobs_hides_retired_entries_unless_asked() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (_, first) = cluster.master.submit_job(descriptor(1, 3)).await;
    let (_, second) = cluster.master.submit_job(descriptor(0, 3)).await;
    cluster.master.kill_job(&first).await;

    let live = cluster.master.list_jobs(false).await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].jobid, second);

    let everything = cluster.master.list_jobs(true).await;
    assert_eq!(everything.len(), 2);
    // Live entries lead the listing.
    assert_eq!(everything[0].jobid, second);
    assert_eq!(everything[1].jobid, first);
}

#[tokio::test]
async fn job_without_reducers_completes_after_map_phase() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let mut desc = descriptor(0, 3);
    desc.reduce_command = String::new();
    let (status, jobid) = cluster.master.submit_job(desc).await;
    assert_eq!(status, Status::Ok);
    // Only a map pod group was requested.
    assert_eq!(cluster.platform.submitted.lock().await.len(), 1);

    let (_, ids) = assign_map(&cluster, &jobid, "w1:7710").await;
    assert_eq!(ids, Some((0, 0)));
    cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Completed)
        .await;

    let (status, job, _) = cluster.master.show_job(&jobid, true).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(job.expect("overview").state(), JobState::Completed);
}

#[tokio::test]
async fn malformed_requests_are_rejected_at_the_surface() {
    use mrb_master::core::master::{FinishTaskRequest, SubmitJobRequest};
    use mrb_master::core::{Master, MasterService};

    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let service = MasterService::new(Arc::clone(&cluster.master));

    let mut desc = descriptor(1, 3);
    desc.inputs.clear();
    let response = service
        .submit_job(tonic::Request::new(SubmitJobRequest { job: Some(desc) }))
        .await
        .expect("transport ok")
        .into_inner();
    assert_eq!(response.status(), Status::InvalidArg);

    // Running is not a reportable final state.
    let (_, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;
    let response = service
        .finish_task(tonic::Request::new(FinishTaskRequest {
            jobid,
            task_id: 0,
            attempt_id: 0,
            work_mode: WorkMode::Map as i32,
            task_state: TaskState::Running as i32,
        }))
        .await
        .expect("transport ok")
        .into_inner();
    assert_eq!(response.status(), Status::InvalidArg);
}

#[tokio::test]
async fn show_job_reports_recent_attempts() {
    let cluster = cluster(vec![file("hdfs://x/a", 64 << 20)]);
    let (_, jobid) = cluster.master.submit_job(descriptor(1, 3)).await;

    assign_map(&cluster, &jobid, "w1:7710").await;
    cluster
        .master
        .finish_task(&jobid, 0, 0, WorkMode::Map, TaskState::Completed)
        .await;

    let (_, _, tasks) = cluster.master.show_job(&jobid, false).await;
    // One record at assignment, one at completion.
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].state, TaskState::Running);
    assert_eq!(tasks[1].state, TaskState::Completed);
    assert_eq!(tasks[1].endpoint, "w1:7710");
    assert!(tasks[1].is_map);
}
