//! In-process toy participant for harness tests
//!
//! A tiny RESP server that understands the routing configuration, greets its
//! peers, and keeps one last-writer-wins register ordered by Lamport stamp
//! and origin. Everything it sends to a peer goes through the route the
//! harness gave it, so the harness decides when the peer sees it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use cordon_core::{ClusterSetCommand, Command, Frame, NodeId};
use cordon_transport::RespCodec;

pub const HELLO: &str = "TOY.HELLO";
pub const UPDATE: &str = "TOY.UPDATE";
pub const DELIVER: &str = "TOY.DELIVER";

type Egress = SplitSink<Framed<TcpStream, RespCodec>, Frame>;

/// Register contents: (stamp, origin, value)
type Register = Option<(u64, u16, String)>;

#[derive(Default)]
struct ToyState {
    routes: BTreeMap<u16, String>,
    greeted: Vec<u16>,
    clock: u64,
    register: Register,
    delivered: BTreeMap<u16, Vec<String>>,
}

struct ToyInner {
    id: u16,
    reject_cluster_set: bool,
    state: Mutex<ToyState>,
    egress: tokio::sync::Mutex<BTreeMap<u16, Egress>>,
}

/// Handle to a running toy participant
pub struct ToyNode {
    addr: SocketAddr,
    inner: Arc<ToyInner>,
    task: JoinHandle<()>,
}

impl ToyNode {
    pub async fn spawn(id: u16) -> Self {
        Self::start(id, false).await
    }

    /// A node that answers the routing configuration with an error
    pub async fn spawn_rejecting(id: u16) -> Self {
        Self::start(id, true).await
    }

    async fn start(id: u16, reject_cluster_set: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let inner = Arc::new(ToyInner {
            id,
            reject_cluster_set,
            state: Mutex::new(ToyState::default()),
            egress: tokio::sync::Mutex::new(BTreeMap::new()),
        });

        let serving = Arc::clone(&inner);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(Arc::clone(&serving), stream));
            }
        });

        Self { addr, inner, task }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn greeted_by(&self) -> Vec<u16> {
        let mut greeted = self.inner.state.lock().greeted.clone();
        greeted.sort_unstable();
        greeted
    }

    pub fn value(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .register
            .as_ref()
            .map(|(_, _, value)| value.clone())
    }

    pub fn delivered_from(&self, peer: u16) -> Vec<String> {
        self.inner
            .state
            .lock()
            .delivered
            .get(&peer)
            .cloned()
            .unwrap_or_default()
    }
}

impl Drop for ToyNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn `count` toy nodes with ids 1..=count
pub async fn spawn_cluster(count: u16) -> Vec<ToyNode> {
    let mut nodes = Vec::new();
    for id in 1..=count {
        nodes.push(ToyNode::spawn(id).await);
    }
    nodes
}

pub fn addrs(nodes: &[ToyNode]) -> Vec<String> {
    nodes.iter().map(ToyNode::addr).collect()
}

pub fn node(n: u16) -> NodeId {
    NodeId::new(n).unwrap()
}

async fn serve(inner: Arc<ToyInner>, stream: TcpStream) {
    let mut conn = Framed::new(stream, RespCodec);
    while let Some(Ok(frame)) = conn.next().await {
        let reply = match Command::from_frame(frame) {
            Ok(command) => handle(&inner, &command).await,
            Err(e) => Frame::Error(format!("ERR {}", e)),
        };
        if conn.send(reply).await.is_err() {
            break;
        }
    }
}

fn text(command: &Command, index: usize) -> String {
    command.arg_str(index).unwrap_or_default().to_string()
}

fn number<T: std::str::FromStr + Default>(command: &Command, index: usize) -> T {
    command
        .arg_str(index)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

async fn handle(inner: &ToyInner, command: &Command) -> Frame {
    let mut outgoing: Vec<(u16, Command)> = Vec::new();

    let reply = {
        let mut state = inner.state.lock();
        match command.name.to_ascii_uppercase().as_str() {
            "RG.CLUSTERSET" if inner.reject_cluster_set => {
                Frame::Error("ERR cluster set refused".to_string())
            }
            "RG.CLUSTERSET" => match ClusterSetCommand::parse(command) {
                Ok(config) => {
                    state.routes = config
                        .entries
                        .iter()
                        .filter_map(|e| Some((e.id.get(), e.route.clone()?)))
                        .collect();
                    for &peer in state.routes.keys() {
                        outgoing.push((peer, Command::new(HELLO).arg(inner.id.to_string())));
                    }
                    Frame::ok()
                }
                Err(e) => Frame::Error(format!("ERR {}", e)),
            },
            HELLO => {
                state.greeted.push(number(command, 0));
                Frame::ok()
            }
            "TOY.GREETED" => Frame::Integer(state.greeted.len() as i64),
            "TOY.SET" => {
                let value = text(command, 0);
                state.clock += 1;
                let stamp = state.clock;
                state.register = Some((stamp, inner.id, value.clone()));
                for &peer in state.routes.keys() {
                    let update = Command::new(UPDATE)
                        .arg(stamp.to_string())
                        .arg(inner.id.to_string())
                        .arg(value.clone());
                    outgoing.push((peer, update));
                }
                Frame::ok()
            }
            UPDATE => {
                let stamp: u64 = number(command, 0);
                let origin: u16 = number(command, 1);
                state.clock = state.clock.max(stamp);
                let newer = match &state.register {
                    Some((s, o, _)) => (stamp, origin) > (*s, *o),
                    None => true,
                };
                if newer {
                    state.register = Some((stamp, origin, text(command, 2)));
                }
                Frame::ok()
            }
            "TOY.GET" => match &state.register {
                Some((_, _, value)) => Frame::bulk(Bytes::from(value.clone())),
                None => Frame::Null,
            },
            "TOY.SEND" => {
                let peer: u16 = number(command, 0);
                let deliver = Command::new(DELIVER)
                    .arg(inner.id.to_string())
                    .arg(text(command, 1));
                outgoing.push((peer, deliver));
                Frame::ok()
            }
            DELIVER => {
                let from: u16 = number(command, 0);
                state.delivered.entry(from).or_default().push(text(command, 1));
                Frame::ok()
            }
            "TOY.LOG" => {
                let from: u16 = number(command, 0);
                let log = state.delivered.get(&from).cloned().unwrap_or_default();
                Frame::Array(log.into_iter().map(|m| Frame::bulk(Bytes::from(m))).collect())
            }
            other => Frame::Error(format!("ERR unknown command '{}'", other)),
        }
    };

    for (peer, message) in outgoing {
        if let Err(e) = send(inner, peer, message).await {
            return Frame::Error(format!("ERR sending to {}: {}", peer, e));
        }
    }
    reply
}

/// Write `message` to `peer`'s route, dialing it on first use
///
/// Returns once the message is on the wire; replies are read and discarded
/// in the background.
async fn send(inner: &ToyInner, peer: u16, message: Command) -> Result<(), String> {
    let mut egress = inner.egress.lock().await;
    if !egress.contains_key(&peer) {
        let route = inner
            .state
            .lock()
            .routes
            .get(&peer)
            .cloned()
            .ok_or_else(|| format!("no route to {}", peer))?;
        let stream = TcpStream::connect(&route).await.map_err(|e| e.to_string())?;
        let (sink, mut replies) = Framed::new(stream, RespCodec).split();
        tokio::spawn(async move { while let Some(Ok(_)) = replies.next().await {} });
        egress.insert(peer, sink);
    }

    let Some(sink) = egress.get_mut(&peer) else {
        return Err(format!("no connection to {}", peer));
    };
    sink.send(message.to_frame()).await.map_err(|e| e.to_string())
}
