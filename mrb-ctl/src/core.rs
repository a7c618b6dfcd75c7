use anyhow::{anyhow, Result};

//
// Import gRPC stubs/definitions.
//
use master::master_client::MasterClient;
use master::*;

pub mod master {
    tonic::include_proto!("master");
}

/// Parses a `user@host:port` filesystem coordinate.
fn parse_dfs(value: &str) -> Result<DfsInfo> {
    let (user, endpoint) = value
        .split_once('@')
        .ok_or_else(|| anyhow!("expected user@host:port, got {value}"))?;
    let (host, port) = endpoint
        .split_once(':')
        .ok_or_else(|| anyhow!("expected user@host:port, got {value}"))?;
    Ok(DfsInfo {
        user: user.to_string(),
        host: host.to_string(),
        port: port.to_string(),
    })
}

fn format_stat(stat: Option<&TaskStatistics>) -> String {
    match stat {
        Some(stat) => format!(
            "{}/{} done, {} running, {} pending",
            stat.done, stat.total, stat.allocated, stat.pending
        ),
        None => "-".to_string(),
    }
}

fn print_overview(job: &JobOverview) {
    let name = job.desc.as_ref().map(|d| d.name.as_str()).unwrap_or("?");
    println!("{}  {}  {}", job.jobid, name, job.state().as_str_name());
    println!("  map:    {}", format_stat(job.map_stat.as_ref()));
    println!("  reduce: {}", format_stat(job.reduce_stat.as_ref()));
}

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    address: String,
    name: String,
    input: Vec<String>,
    map: String,
    reduce: String,
    reduce_total: u32,
    map_capacity: u32,
    reduce_capacity: u32,
    split_size: u64,
    task_timeout: u32,
    max_attempts: u32,
    input_dfs: String,
    output_dfs: String,
) -> Result<()> {
    let mut client = MasterClient::connect(address).await?;
    let job = JobDescriptor {
        name,
        pipe_style: PipeStyle::Streaming as i32,
        input_dfs: Some(parse_dfs(&input_dfs)?),
        output_dfs: Some(parse_dfs(&output_dfs)?),
        map_command: map,
        reduce_command: reduce,
        map_capacity,
        reduce_capacity,
        priority: JobPriority::Offline as i32,
        reduce_total,
        inputs: input,
        split_size,
        task_timeout,
        max_attempts,
    };
    let request = tonic::Request::new(SubmitJobRequest { job: Some(job) });
    let response = client.submit_job(request).await?.into_inner();

    println!("[Submit] {}", response.status().as_str_name());
    if !response.jobid.is_empty() {
        println!("jobid: {}", response.jobid);
    }
    Ok(())
}

pub async fn list(address: String, all: bool) -> Result<()> {
    let mut client = MasterClient::connect(address).await?;
    let request = tonic::Request::new(ListJobsRequest { all });
    let response = client.list_jobs(request).await?.into_inner();

    println!("[Jobs] {}", response.jobs.len());
    for job in &response.jobs {
        print_overview(job);
    }
    Ok(())
}

pub async fn show(address: String, jobid: String, all: bool) -> Result<()> {
    let mut client = MasterClient::connect(address).await?;
    let request = tonic::Request::new(ShowJobRequest { jobid, all });
    let response = client.show_job(request).await?.into_inner();

    println!("[Show] {}", response.status().as_str_name());
    if let Some(job) = &response.job {
        print_overview(job);
    }
    if !response.tasks.is_empty() {
        println!("recent attempts:");
        for task in &response.tasks {
            println!(
                "  {} <{},{}> {} on {} ({} ms)",
                if task.is_map { "map" } else { "reduce" },
                task.task_id,
                task.attempt,
                task.state().as_str_name(),
                task.endpoint,
                task.period,
            );
        }
    }
    Ok(())
}

pub async fn kill(address: String, jobid: String) -> Result<()> {
    let mut client = MasterClient::connect(address).await?;
    let request = tonic::Request::new(KillJobRequest { jobid });
    let response = client.kill_job(request).await?.into_inner();

    println!("[Kill] {}", response.status().as_str_name());
    Ok(())
}

pub async fn update(
    address: String,
    jobid: String,
    priority: Option<i32>,
    map_capacity: Option<u32>,
    reduce_capacity: Option<u32>,
) -> Result<()> {
    let mut client = MasterClient::connect(address).await?;
    let request = tonic::Request::new(UpdateJobRequest {
        jobid,
        priority,
        map_capacity,
        reduce_capacity,
    });
    let response = client.update_job(request).await?.into_inner();

    println!("[Update] {}", response.status().as_str_name());
    Ok(())
}
