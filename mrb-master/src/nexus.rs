//! Lock-service seam. The service is the sole authority on master identity:
//! it hands out exclusive named locks tied to a session, watches them for
//! holder changes, and doubles as the small KV store that job snapshots live
//! in. The original context-pointer callbacks become channels here: watches
//! and session loss arrive as events on receivers the election task owns.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tonic::transport::Channel;
use tracing::warn;

pub mod proto {
    tonic::include_proto!("nexus");
}

use proto::nexus_client::NexusClient as RpcClient;
use proto::{
    CreateSessionRequest, GetRequest, LockRequest, PingRequest, PutRequest, ScanRequest,
    WatchRequest,
};

/// Keepalive cadence; the session is declared lost after this many
/// consecutive failed pings.
const SESSION_PING_PERIOD: Duration = Duration::from_secs(2);
const SESSION_PING_TOLERANCE: u32 = 3;

#[derive(Debug, Error)]
pub enum NexusError {
    #[error("nexus connect: {0}")]
    Connect(#[from] tonic::transport::Error),
    #[error("nexus transport: {0}")]
    Transport(#[from] tonic::Status),
    #[error("nexus refused to {0}")]
    Refused(&'static str),
    #[error("no nexus servers configured")]
    NoServers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Expired,
}

/// A change of a lock's holder, as observed by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    pub key: String,
    pub holder_session: String,
}

#[tonic::async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Takes the named lock, blocking until this session holds it.
    async fn lock(&self, key: &str) -> Result<(), NexusError>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), NexusError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NexusError>;

    /// Returns every `(key, value)` with `start_key <= key < end_key`.
    async fn scan(&self, start_key: &str, end_key: &str)
        -> Result<Vec<(String, Vec<u8>)>, NexusError>;

    /// Streams holder changes for a lock. A closed receiver means the watch
    /// is gone and the caller can no longer trust its view of the lock.
    async fn watch(&self, key: &str) -> Result<mpsc::Receiver<LockChange>, NexusError>;

    fn session_id(&self) -> String;

    /// Subscribes to session-lifecycle events.
    async fn session_events(&self) -> mpsc::Receiver<SessionEvent>;
}

pub struct NexusClient {
    client: RpcClient<Channel>,
    session_id: String,
    session_listeners: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl NexusClient {
    /// Connects to the cluster and opens a session, spawning the keepalive
    /// task that detects session loss.
    pub async fn connect(servers: &[String]) -> Result<Arc<Self>, NexusError> {
        let server = servers.first().ok_or(NexusError::NoServers)?;
        let mut client = RpcClient::connect(format!("http://{server}")).await?;
        let session_id = client
            .create_session(CreateSessionRequest {})
            .await?
            .into_inner()
            .session_id;

        let this = Arc::new(Self {
            client,
            session_id,
            session_listeners: Mutex::new(Vec::new()),
        });
        this.spawn_keepalive();
        Ok(this)
    }

    fn spawn_keepalive(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut failures = 0u32;
            let mut ticker = tokio::time::interval(SESSION_PING_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut client = this.client.clone();
                let request = PingRequest {
                    session_id: this.session_id.clone(),
                };
                let alive = match client.ping(request).await {
                    Ok(response) => response.into_inner().ok,
                    Err(err) => {
                        warn!("nexus ping failed: {err}");
                        false
                    }
                };
                if alive {
                    failures = 0;
                    continue;
                }
                failures += 1;
                if failures >= SESSION_PING_TOLERANCE {
                    this.broadcast(SessionEvent::Expired).await;
                    return;
                }
            }
        });
    }

    async fn broadcast(&self, event: SessionEvent) {
        let listeners = self.session_listeners.lock().await;
        for listener in listeners.iter() {
            let _ = listener.try_send(event);
        }
    }
}

#[tonic::async_trait]
impl LockService for NexusClient {
    async fn lock(&self, key: &str) -> Result<(), NexusError> {
        let mut client = self.client.clone();
        let request = LockRequest {
            session_id: self.session_id.clone(),
            key: key.to_string(),
        };
        let response = client.lock(request).await?.into_inner();
        if !response.ok {
            return Err(NexusError::Refused("lock"));
        }
        Ok(())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), NexusError> {
        let mut client = self.client.clone();
        let request = PutRequest {
            session_id: self.session_id.clone(),
            key: key.to_string(),
            value: value.to_vec(),
        };
        let response = client.put(request).await?.into_inner();
        if !response.ok {
            return Err(NexusError::Refused("put"));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NexusError> {
        let mut client = self.client.clone();
        let request = GetRequest {
            key: key.to_string(),
        };
        let response = client.get(request).await?.into_inner();
        Ok(response.found.then_some(response.value))
    }

    async fn scan(
        &self,
        start_key: &str,
        end_key: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, NexusError> {
        let mut client = self.client.clone();
        let request = ScanRequest {
            start_key: start_key.to_string(),
            end_key: end_key.to_string(),
        };
        let response = client.scan(request).await?.into_inner();
        Ok(response
            .entries
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect())
    }

    async fn watch(&self, key: &str) -> Result<mpsc::Receiver<LockChange>, NexusError> {
        let mut client = self.client.clone();
        let request = WatchRequest {
            key: key.to_string(),
        };
        let mut stream = client.watch(request).await?.into_inner();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(event)) => {
                        let change = LockChange {
                            key: event.key,
                            holder_session: event.value,
                        };
                        if tx.send(change).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        warn!("lock watch stream error: {err}");
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    async fn session_events(&self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(4);
        self.session_listeners.lock().await.push(tx);
        rx
    }
}
