use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Master endpoint.
    #[arg(short, long, default_value = "http://127.0.0.1:7810")]
    pub master: String,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a job to the cluster.
    Submit {
        /// Job name.
        #[arg(short, long)]
        name: String,

        /// Input file globs, repeatable.
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Map command line.
        #[arg(long)]
        map: String,

        /// Reduce command line.
        #[arg(long, default_value = "")]
        reduce: String,

        /// Number of reduce slots.
        #[arg(long, default_value_t = 0)]
        reduce_total: u32,

        /// Target concurrent map workers.
        #[arg(long, default_value_t = 1)]
        map_capacity: u32,

        /// Target concurrent reduce workers.
        #[arg(long, default_value_t = 1)]
        reduce_capacity: u32,

        /// Input split size in bytes.
        #[arg(long, default_value_t = 64 << 20)]
        split_size: u64,

        /// Per-task timeout in seconds.
        #[arg(long, default_value_t = 600)]
        task_timeout: u32,

        /// Attempts allowed per task.
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Input filesystem, `user@host:port`.
        #[arg(long, default_value = "mrb@127.0.0.1:9000")]
        input_dfs: String,

        /// Output filesystem, `user@host:port`.
        #[arg(long, default_value = "mrb@127.0.0.1:9000")]
        output_dfs: String,
    },

    /// List jobs and their phase statistics.
    List {
        /// Include retired jobs.
        #[arg(short, long)]
        all: bool,
    },

    /// Show one job with its recent task attempts.
    Show {
        jobid: String,

        /// Look on the retired side too.
        #[arg(short, long)]
        all: bool,
    },

    /// Kill a job.
    Kill { jobid: String },

    /// Change priority or worker capacities of a running job.
    Update {
        jobid: String,

        /// 0 = monitor, 1 = online, 2 = offline, 3 = best effort.
        #[arg(long)]
        priority: Option<i32>,

        #[arg(long)]
        map_capacity: Option<u32>,

        #[arg(long)]
        reduce_capacity: Option<u32>,
    },
}
