//! Resource-platform seam. The platform runs worker pods on the master's
//! behalf; the master only submits, updates and kills pod groups through
//! [`ResourcePlatform`]. Production uses the tonic client below; tests plug
//! in an in-memory platform.

use thiserror::Error;
use tonic::transport::Channel;

pub mod proto {
    tonic::include_proto!("galaxy");
}

use proto::galaxy_client::GalaxyClient as RpcClient;
use proto::{KillPodGroupRequest, SubmitPodGroupRequest, UpdatePodGroupRequest};

#[derive(Debug, Error)]
pub enum GalaxyError {
    #[error("galaxy connect: {0}")]
    Connect(#[from] tonic::transport::Error),
    #[error("galaxy transport: {0}")]
    Transport(#[from] tonic::Status),
    #[error("galaxy refused to {0} pod group")]
    Refused(&'static str),
}

/// One group of identical worker pods, sized to the phase's capacity.
#[derive(Debug, Clone)]
pub struct PodGroupSpec {
    pub name: String,
    pub command: String,
    pub capacity: u32,
    pub priority: String,
}

#[tonic::async_trait]
pub trait ResourcePlatform: Send + Sync + 'static {
    /// Returns the platform's handle for the new group.
    async fn submit_pod_group(&self, spec: PodGroupSpec) -> Result<String, GalaxyError>;

    async fn update_pod_group(
        &self,
        handle: &str,
        priority: Option<String>,
        capacity: Option<u32>,
    ) -> Result<(), GalaxyError>;

    async fn kill_pod_group(&self, handle: &str) -> Result<(), GalaxyError>;
}

#[derive(Debug, Clone)]
pub struct GalaxyClient {
    client: RpcClient<Channel>,
}

impl GalaxyClient {
    pub async fn connect(address: &str) -> Result<Self, GalaxyError> {
        let client = RpcClient::connect(format!("http://{address}")).await?;
        Ok(Self { client })
    }
}

#[tonic::async_trait]
impl ResourcePlatform for GalaxyClient {
    async fn submit_pod_group(&self, spec: PodGroupSpec) -> Result<String, GalaxyError> {
        let mut client = self.client.clone();
        let request = SubmitPodGroupRequest {
            spec: Some(proto::PodGroupSpec {
                name: spec.name,
                command: spec.command,
                capacity: spec.capacity,
                priority: spec.priority,
            }),
        };
        let response = client.submit_pod_group(request).await?.into_inner();
        if !response.ok {
            return Err(GalaxyError::Refused("submit"));
        }
        Ok(response.handle)
    }

    async fn update_pod_group(
        &self,
        handle: &str,
        priority: Option<String>,
        capacity: Option<u32>,
    ) -> Result<(), GalaxyError> {
        let mut client = self.client.clone();
        let request = UpdatePodGroupRequest {
            handle: handle.to_string(),
            priority,
            capacity,
        };
        let response = client.update_pod_group(request).await?.into_inner();
        if !response.ok {
            return Err(GalaxyError::Refused("update"));
        }
        Ok(())
    }

    async fn kill_pod_group(&self, handle: &str) -> Result<(), GalaxyError> {
        let mut client = self.client.clone();
        let request = KillPodGroupRequest {
            handle: handle.to_string(),
        };
        let response = client.kill_pod_group(request).await?.into_inner();
        if !response.ok {
            return Err(GalaxyError::Refused("kill"));
        }
        Ok(())
    }
}
