//! RPC surface: parameter validation and dispatch from the wire contract to
//! the master. Every response carries an application-level [`Status`];
//! transport-level errors are never used for business outcomes.

use std::sync::Arc;

use tonic::{Request, Response};
use tracing::{info, warn};

pub mod master {
    tonic::include_proto!("master");
}

pub use master::master_server::{Master, MasterServer};
use master::*;

use crate::job_tracker::AllocateItem;
use crate::master_impl::{AssignedTask, MasterImpl};

pub struct MasterService {
    inner: Arc<MasterImpl>,
}

impl MasterService {
    pub fn new(inner: Arc<MasterImpl>) -> Self {
        Self { inner }
    }
}

fn respond<T>(message: T) -> Result<Response<T>, tonic::Status> {
    Ok(Response::new(message))
}

fn validate_descriptor(desc: &JobDescriptor) -> Result<(), &'static str> {
    if desc.name.is_empty() {
        return Err("empty job name");
    }
    if desc.inputs.is_empty() {
        return Err("empty input file list");
    }
    if desc.map_command.is_empty() {
        return Err("empty map command");
    }
    if desc.split_size == 0 {
        return Err("zero split size");
    }
    if desc.max_attempts == 0 {
        return Err("zero attempt budget");
    }
    if desc.reduce_total > 0 && desc.reduce_command.is_empty() {
        return Err("reduce slots configured without a reduce command");
    }
    Ok(())
}

impl From<&AllocateItem> for TaskOverview {
    fn from(item: &AllocateItem) -> Self {
        TaskOverview {
            task_id: item.resource_no,
            attempt: item.attempt,
            endpoint: item.endpoint.clone(),
            state: item.state as i32,
            alloc_time: item.alloc_time,
            period: item.period,
            is_map: item.is_map,
        }
    }
}

#[tonic::async_trait]
impl Master for MasterService {
    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, tonic::Status> {
        info!("[REQUEST] SUBMIT from {:?}", request.remote_addr());
        let Some(desc) = request.into_inner().job else {
            return respond(SubmitJobResponse {
                status: Status::InvalidArg as i32,
                jobid: String::new(),
            });
        };
        if let Err(reason) = validate_descriptor(&desc) {
            warn!("rejected submission of {:?}: {}", desc.name, reason);
            return respond(SubmitJobResponse {
                status: Status::InvalidArg as i32,
                jobid: String::new(),
            });
        }
        let (status, jobid) = self.inner.submit_job(desc).await;
        respond(SubmitJobResponse {
            status: status as i32,
            jobid,
        })
    }

    async fn update_job(
        &self,
        request: Request<UpdateJobRequest>,
    ) -> Result<Response<UpdateJobResponse>, tonic::Status> {
        info!("[REQUEST] UPDATE from {:?}", request.remote_addr());
        let request = request.into_inner();
        let priority = match request.priority {
            Some(raw) => match JobPriority::try_from(raw) {
                Ok(priority) => Some(priority),
                Err(_) => {
                    return respond(UpdateJobResponse {
                        status: Status::InvalidArg as i32,
                    })
                }
            },
            None => None,
        };
        let status = self
            .inner
            .update_job(
                &request.jobid,
                priority,
                request.map_capacity,
                request.reduce_capacity,
            )
            .await;
        respond(UpdateJobResponse {
            status: status as i32,
        })
    }

    async fn kill_job(
        &self,
        request: Request<KillJobRequest>,
    ) -> Result<Response<KillJobResponse>, tonic::Status> {
        info!("[REQUEST] KILL from {:?}", request.remote_addr());
        let request = request.into_inner();
        let status = self.inner.kill_job(&request.jobid).await;
        respond(KillJobResponse {
            status: status as i32,
        })
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, tonic::Status> {
        info!("[REQUEST] LIST from {:?}", request.remote_addr());
        let request = request.into_inner();
        let jobs = self.inner.list_jobs(request.all).await;
        respond(ListJobsResponse { jobs })
    }

    async fn show_job(
        &self,
        request: Request<ShowJobRequest>,
    ) -> Result<Response<ShowJobResponse>, tonic::Status> {
        info!("[REQUEST] SHOW from {:?}", request.remote_addr());
        let request = request.into_inner();
        let (status, job, tasks) = self.inner.show_job(&request.jobid, request.all).await;
        respond(ShowJobResponse {
            status: status as i32,
            job,
            tasks: tasks.iter().map(TaskOverview::from).collect(),
        })
    }

    async fn assign_task(
        &self,
        request: Request<AssignTaskRequest>,
    ) -> Result<Response<AssignTaskResponse>, tonic::Status> {
        let request = request.into_inner();
        if request.endpoint.is_empty() {
            return respond(AssignTaskResponse {
                status: Status::InvalidArg as i32,
                task: None,
            });
        }
        let mode = request.work_mode();
        let (status, assigned) = self
            .inner
            .assign_task(&request.jobid, &request.endpoint, mode)
            .await;
        let task = assigned.map(|(task, desc)| match task {
            AssignedTask::Map(item) => TaskInfo {
                task_id: item.no,
                attempt_id: item.attempt,
                job: Some(desc),
                input: Some(TaskInput {
                    input_file: item.input.input_file,
                    offset: item.input.offset,
                    size: item.input.size,
                }),
            },
            AssignedTask::Reduce(item) => TaskInfo {
                task_id: item.no,
                attempt_id: item.attempt,
                job: Some(desc),
                input: None,
            },
        });
        respond(AssignTaskResponse {
            status: status as i32,
            task,
        })
    }

    async fn finish_task(
        &self,
        request: Request<FinishTaskRequest>,
    ) -> Result<Response<FinishTaskResponse>, tonic::Status> {
        let request = request.into_inner();
        let task_state = request.task_state();
        // Workers report final states only; Running is not a report.
        if task_state == TaskState::Running || request.task_id < 0 || request.attempt_id < 0 {
            return respond(FinishTaskResponse {
                status: Status::InvalidArg as i32,
            });
        }
        let mode = request.work_mode();
        let status = self
            .inner
            .finish_task(
                &request.jobid,
                request.task_id,
                request.attempt_id,
                mode,
                task_state,
            )
            .await;
        respond(FinishTaskResponse {
            status: status as i32,
        })
    }
}
