use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mrb_master::args::Args;
use mrb_master::core::{MasterServer, MasterService};
use mrb_master::executor::DelayedTaskExecutor;
use mrb_master::galaxy::GalaxyClient;
use mrb_master::input::S3Input;
use mrb_master::master_impl::MasterImpl;
use mrb_master::nexus::NexusClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.to_config();

    let galaxy = Arc::new(GalaxyClient::connect(&config.galaxy_address).await?);
    let nexus = NexusClient::connect(&config.nexus_server_list).await?;
    let input = Arc::new(S3Input);
    let (executor, executor_handle) = DelayedTaskExecutor::spawn();

    let master = MasterImpl::new(config.clone(), galaxy, nexus, input, executor.clone());

    // Fatal events (lost lock, lost session) arrive here from the election
    // watcher; either one must end the process so a standby can take over.
    let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
    master.init(fatal_tx).await?;

    let addr = format!("0.0.0.0:{}", config.master_port).parse()?;
    info!("master listening on {}", addr);
    let service = MasterService::new(Arc::clone(&master));
    let server = Server::builder()
        .add_service(MasterServer::new(service))
        .serve(addr);
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            executor.stop();
            executor_handle.await?;
            result?;
            Ok(())
        }
        reason = fatal_rx.recv() => {
            let reason = reason.unwrap_or_else(|| "fatal channel closed".to_string());
            error!("{}, die", reason);
            executor.stop();
            executor_handle.await?;
            anyhow::bail!(reason)
        }
    }
}
