//! Node handles
//!
//! A [`NodeHandle`] is the harness's own client connection to one
//! participant. Test code uses it to issue commands directly, and every link
//! whose destination is that participant uses it to deliver drained
//! messages. Calls are strictly one at a time.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use cordon_core::{Command, CommandError, CommandTarget, Frame, NodeId};

use crate::protocol::RespCodec;

/// Configuration for node handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-call timeout in milliseconds (`None` waits indefinitely)
    pub request_timeout_ms: Option<u64>,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: Some(30_000),
        }
    }
}

type NodeConnection = Framed<TcpStream, RespCodec>;

/// Request/response client for one participant
///
/// No retries and no queueing: a failed call is reported to the caller. A
/// connection that failed mid-call is dropped and the next call dials again.
pub struct NodeHandle {
    /// Participant this handle talks to
    id: NodeId,
    /// `host:port` of the participant
    addr: String,
    /// Configuration
    config: HandleConfig,
    /// Open connection, if any
    conn: Mutex<Option<NodeConnection>>,
}

impl NodeHandle {
    /// Connect to a participant
    #[instrument(skip(addr, config), fields(node = %id))]
    pub async fn connect(
        id: NodeId,
        addr: impl Into<String>,
        config: HandleConfig,
    ) -> Result<Self, CommandError> {
        let addr = addr.into();
        let conn = Self::open(&addr, &config).await?;

        info!(addr = %addr, "Node handle connected");

        Ok(Self {
            id,
            addr,
            config,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Address of the participant
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Drop the current connection; the next call reconnects
    pub async fn close(&self) {
        if self.conn.lock().await.take().is_some() {
            debug!(node = %self.id, "Node handle closed");
        }
    }

    async fn open(addr: &str, config: &HandleConfig) -> Result<NodeConnection, CommandError> {
        let stream = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| {
            warn!(addr, timeout_ms = config.connect_timeout_ms, "Connection timeout");
            CommandError::Timeout(config.connect_timeout_ms)
        })?
        .map_err(|e| {
            warn!(addr, error = %e, "Connection failed");
            CommandError::Connection(format!("{}: {}", addr, e))
        })?;

        stream
            .set_nodelay(true)
            .map_err(|e| CommandError::Connection(e.to_string()))?;

        Ok(Framed::new(stream, RespCodec))
    }

    async fn exchange(conn: &mut NodeConnection, command: &Command) -> Result<Frame, CommandError> {
        conn.send(command).await?;
        match conn.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(CommandError::Protocol(e)),
            None => Err(CommandError::Closed),
        }
    }
}

#[async_trait]
impl CommandTarget for NodeHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }

    async fn call(&self, command: &Command) -> Result<Frame, CommandError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            debug!(node = %self.id, "Reconnecting node handle");
            *guard = Some(Self::open(&self.addr, &self.config).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(CommandError::Closed);
        };

        let result = match self.config.request_timeout_ms {
            Some(ms) => tokio::time::timeout(
                Duration::from_millis(ms),
                Self::exchange(conn, command),
            )
            .await
            .unwrap_or(Err(CommandError::Timeout(ms))),
            None => Self::exchange(conn, command).await,
        };

        if let Err(e) = &result {
            // The reply stream may be out of step now; start over next time
            warn!(node = %self.id, command = %command.name, error = %e, "Command failed");
            *guard = None;
        }
        result
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}
