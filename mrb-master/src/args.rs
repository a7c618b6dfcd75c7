use std::time::Duration;

use clap::Parser;

use crate::master_impl::MasterConfig;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Resource-platform endpoint.
    #[arg(long, env = "MRB_GALAXY_ADDRESS", default_value = "localhost:8101")]
    pub galaxy_address: String,

    /// Lock/KV cluster seeds, comma separated.
    #[arg(
        long,
        env = "MRB_NEXUS_SERVER_LIST",
        default_value = "localhost:8868",
        value_delimiter = ','
    )]
    pub nexus_server_list: Vec<String>,

    /// Key prefix every master artifact lives under.
    #[arg(long, default_value = "/mrb/")]
    pub nexus_root_path: String,

    /// Port the master RPC server listens on.
    #[arg(long, default_value = "7810")]
    pub master_port: String,

    /// Lock name under the root path.
    #[arg(long, default_value = "master_lock")]
    pub master_lock_path: String,

    /// Key under the root path holding the active master's endpoint.
    #[arg(long, default_value = "master")]
    pub master_path: String,

    /// Key prefix for the per-job data blob.
    #[arg(long, default_value = "jobdata_")]
    pub jobdata_header: String,

    /// Seconds between retired-tracker reaps.
    #[arg(long, default_value_t = 600)]
    pub gc_interval: u64,

    /// Milliseconds between job snapshots.
    #[arg(long, default_value_t = 30_000)]
    pub backup_interval: u64,

    /// Restore persisted jobs from the lock service on startup.
    #[arg(long, default_value_t = false)]
    pub recovery: bool,
}

impl Args {
    pub fn to_config(&self) -> MasterConfig {
        MasterConfig {
            galaxy_address: self.galaxy_address.clone(),
            nexus_server_list: self.nexus_server_list.clone(),
            nexus_root_path: self.nexus_root_path.clone(),
            master_port: self.master_port.clone(),
            master_lock_path: self.master_lock_path.clone(),
            master_path: self.master_path.clone(),
            jobdata_header: self.jobdata_header.clone(),
            gc_interval: Duration::from_secs(self.gc_interval),
            backup_interval: Duration::from_millis(self.backup_interval),
            recovery: self.recovery,
        }
    }
}
