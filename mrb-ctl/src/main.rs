mod args;
mod core;

use anyhow::Result;
use clap::Parser;

use args::{Args, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let master = args.master;

    match args.command {
        Commands::Submit {
            name,
            input,
            map,
            reduce,
            reduce_total,
            map_capacity,
            reduce_capacity,
            split_size,
            task_timeout,
            max_attempts,
            input_dfs,
            output_dfs,
        } => {
            core::submit(
                master,
                name,
                input,
                map,
                reduce,
                reduce_total,
                map_capacity,
                reduce_capacity,
                split_size,
                task_timeout,
                max_attempts,
                input_dfs,
                output_dfs,
            )
            .await?
        }
        Commands::List { all } => core::list(master, all).await?,
        Commands::Show { jobid, all } => core::show(master, jobid, all).await?,
        Commands::Kill { jobid } => core::kill(master, jobid).await?,
        Commands::Update {
            jobid,
            priority,
            map_capacity,
            reduce_capacity,
        } => core::update(master, jobid, priority, map_capacity, reduce_capacity).await?,
    }

    Ok(())
}
