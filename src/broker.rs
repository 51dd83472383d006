//! In-process coordination broker.
//!
//! The broker owns two listeners: the task channel, which relays
//! newline-delimited frames between every connected worker, and the meta
//! channel, which answers each connection with a one-line JSON snapshot.
//! It runs as a detached task for the lifetime of the launching process.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::error::{LaunchError, Result};

const RELAY_CAPACITY: usize = 1024;

/// Address workers use to reach the broker. Immutable once the broker is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub task_port: u16,
    pub info_port: u16,
}

impl BrokerEndpoint {
    pub fn task_address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.task_port)
    }

    pub fn meta_address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.info_port)
    }

    /// The endpoint as seen from the far end of a reverse tunnel.
    pub fn via_tunnel(&self) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ..self.clone()
        }
    }
}

/// Snapshot served on the meta channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub task_port: u16,
    pub info_port: u16,
    pub connections: usize,
}

pub struct BrokerSupervisor {
    config: BrokerConfig,
    host: String,
    endpoint: Option<BrokerEndpoint>,
    token: CancellationToken,
}

impl BrokerSupervisor {
    /// `host` is the externally routable name advertised to workers.
    pub fn new(config: BrokerConfig, host: impl Into<String>) -> Self {
        Self {
            config,
            host: host.into(),
            endpoint: None,
            token: CancellationToken::new(),
        }
    }

    pub fn endpoint(&self) -> Option<&BrokerEndpoint> {
        self.endpoint.as_ref()
    }

    /// Bind both broker ports and start serving them in the background.
    ///
    /// Only a broker local to this run can be started. Calling `start` again
    /// returns the endpoint bound the first time.
    pub async fn start(&mut self, local: bool, debug: bool) -> Result<BrokerEndpoint> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        if !local {
            return Err(LaunchError::UnsupportedRemoteBroker(self.host.clone()));
        }

        let bind_addr = SocketAddr::new(self.config.bind_addr, 0);
        let timeout = Duration::from_millis(self.config.start_timeout_ms);
        let (task_listener, info_listener) = tokio::time::timeout(timeout, async {
            let task = TcpListener::bind(bind_addr).await?;
            let info = TcpListener::bind(bind_addr).await?;
            Ok::<_, std::io::Error>((task, info))
        })
        .await
        .map_err(|_| LaunchError::BrokerStartFailure("timed out binding ports".to_string()))?
        .map_err(|e| LaunchError::BrokerStartFailure(e.to_string()))?;

        let task_port = local_port(&task_listener)?;
        let info_port = local_port(&info_listener)?;
        if task_port == 0 || info_port == 0 {
            return Err(LaunchError::BrokerStartFailure(
                "listener reported port 0".to_string(),
            ));
        }

        let endpoint = BrokerEndpoint {
            host: self.host.clone(),
            task_port,
            info_port,
        };
        tracing::info!(
            host = %endpoint.host,
            task_port,
            info_port,
            "Broker listening"
        );

        let token = self.token.clone();
        tokio::spawn(async move {
            run_broker(task_listener, info_listener, token, debug).await;
        });

        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Stop accepting and drop every broker connection.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

fn local_port(listener: &TcpListener) -> Result<u16> {
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| LaunchError::BrokerStartFailure(e.to_string()))
}

async fn run_broker(
    task_listener: TcpListener,
    info_listener: TcpListener,
    token: CancellationToken,
    debug: bool,
) {
    let (relay_tx, _) = broadcast::channel::<(u64, String)>(RELAY_CAPACITY);
    let connections = Arc::new(AtomicUsize::new(0));
    let mut next_id: u64 = 0;
    let info = BrokerInfo {
        task_port: task_listener.local_addr().map(|a| a.port()).unwrap_or(0),
        info_port: info_listener.local_addr().map(|a| a.port()).unwrap_or(0),
        connections: 0,
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("Broker stopped");
                break;
            }
            accepted = task_listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_id += 1;
                    tracing::debug!(peer = %peer, conn_id = next_id, "Task channel connection");
                    let relay = Relay {
                        id: next_id,
                        tx: relay_tx.clone(),
                        connections: connections.clone(),
                        token: token.child_token(),
                        debug,
                    };
                    let rx = relay_tx.subscribe();
                    tokio::spawn(relay.run(stream, rx));
                }
                Err(e) => tracing::warn!(error = %e, "Task channel accept failed"),
            },
            accepted = info_listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "Meta channel connection");
                    let snapshot = BrokerInfo {
                        connections: connections.load(Ordering::SeqCst),
                        ..info.clone()
                    };
                    tokio::spawn(serve_info(stream, snapshot));
                }
                Err(e) => tracing::warn!(error = %e, "Meta channel accept failed"),
            },
        }
    }
}

async fn serve_info(mut stream: TcpStream, snapshot: BrokerInfo) {
    let mut line = match serde_json::to_string(&snapshot) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode broker info");
            return;
        }
    };
    line.push('\n');
    if let Err(e) = stream.write_all(line.as_bytes()).await {
        tracing::debug!(error = %e, "Meta channel write failed");
    }
    let _ = stream.shutdown().await;
}

struct Relay {
    id: u64,
    tx: broadcast::Sender<(u64, String)>,
    connections: Arc<AtomicUsize>,
    token: CancellationToken,
    debug: bool,
}

impl Relay {
    /// Forward every line this connection sends to all other connections.
    async fn run(self, stream: TcpStream, mut rx: broadcast::Receiver<(u64, String)>) {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if self.debug {
                            tracing::debug!(conn_id = self.id, frame = %line, "Relaying frame");
                        }
                        // No receivers besides ourselves is fine
                        let _ = self.tx.send((self.id, line));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(conn_id = self.id, error = %e, "Task channel read failed");
                        break;
                    }
                },
                msg = rx.recv() => match msg {
                    Ok((from, line)) if from != self.id => {
                        let frame = format!("{}\n", line);
                        if writer.write_all(frame.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(conn_id = self.id, skipped, "Relay lagged, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.connections.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(conn_id = self.id, "Task channel connection closed");
    }
}
