//! Intercepting links
//!
//! An [`InterceptingLink`] impersonates participant `to` toward participant
//! `from`. It listens on the address `from` was told to use for `to`,
//! accepts the connection `from` opens, and queues every request it reads
//! instead of passing it on. Nothing reaches `to` until the harness drains
//! the link, one message at a time, in arrival order.
//!
//! ## Lifecycle
//!
//! ```text
//! Unbound --start--> Listening --accept--> Connected { session, peer }
//!    |                   |                      |    ^
//!    |                   |                      +----+ (new connection replaces the session)
//!    +-------------------+------------stop----------+--> Stopped
//! ```
//!
//! Each accepted connection becomes a session with a reader task and a
//! writer task. The reader parses requests and pushes them onto the link
//! queue along with a reply slot; the writer answers the requests of its own
//! session strictly in the order they were read, waiting for each drain to
//! fill the slot. The queue belongs to the link, not the session, so
//! messages survive a reconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn};

use cordon_core::{Command, CommandTarget, Frame, MessageSummary, NodeId, summarize};

use crate::error::LinkError;
use crate::protocol::RespCodec;

/// Pause after a failed accept before listening again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type LinkConnection = Framed<TcpStream, RespCodec>;

/// Where a link is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, not yet listening
    Unbound,
    /// Listening, no live session
    Listening,
    /// A session from the `from` participant is live
    Connected {
        /// Session number, starting at 1 and never reused
        session: u64,
        /// Remote address of the session
        peer: SocketAddr,
    },
    /// Stopped for good
    Stopped,
}

/// A request waiting in the link queue
struct QueuedMessage {
    command: Command,
    summary: Option<MessageSummary>,
    session: u64,
    reply: oneshot::Sender<Frame>,
}

/// Reader and writer tasks of one accepted connection
struct SessionTasks {
    id: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SessionTasks {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// State shared between the link and its background tasks
struct LinkShared {
    from: NodeId,
    to: NodeId,
    state: Mutex<LinkState>,
    session: Mutex<Option<SessionTasks>>,
    next_session: AtomicU64,
    queue_tx: mpsc::UnboundedSender<QueuedMessage>,
    pending: AtomicUsize,
}

impl LinkShared {
    fn enqueue(&self, message: QueuedMessage) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.queue_tx.send(message).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Install a freshly accepted connection as the live session
    fn attach(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(from = %self.from, to = %self.to, error = %e, "Failed to set TCP_NODELAY");
        }

        let mut state = self.state.lock();
        if *state == LinkState::Stopped {
            return;
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let (sink, stream) = Framed::new(stream, RespCodec).split::<Frame>();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_requests(Arc::clone(self), id, stream, replies_tx));
        let writer = tokio::spawn(write_replies(self.from, self.to, id, sink, replies_rx));

        let previous = self.session.lock().replace(SessionTasks { id, reader, writer });
        if let Some(previous) = previous {
            previous.abort();
            info!(
                from = %self.from,
                to = %self.to,
                old_session = previous.id,
                new_session = id,
                "Session replaced"
            );
        }

        *state = LinkState::Connected { session: id, peer };
        info!(from = %self.from, to = %self.to, session = id, peer = %peer, "Session accepted");
    }

    /// Called by a reader that hit end of stream
    fn session_closed(&self, id: u64) {
        let mut state = self.state.lock();
        if matches!(*state, LinkState::Connected { session, .. } if session == id) {
            *state = LinkState::Listening;
        }
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.id == id) {
            // Dropping the handles detaches the writer so it can flush
            session.take();
        }
        debug!(from = %self.from, to = %self.to, session = id, "Session closed");
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<LinkShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => shared.attach(stream, peer),
            Err(e) => {
                warn!(from = %shared.from, to = %shared.to, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn read_requests(
    shared: Arc<LinkShared>,
    session: u64,
    mut stream: SplitStream<LinkConnection>,
    replies: mpsc::UnboundedSender<oneshot::Receiver<Frame>>,
) {
    while let Some(result) = stream.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!(from = %shared.from, to = %shared.to, session, error = %e, "Unreadable request");
                break;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        match Command::from_frame(frame) {
            Ok(command) => {
                let summary = summarize(&command);
                trace!(from = %shared.from, to = %shared.to, session, command = %command.name, "Queued");
                shared.enqueue(QueuedMessage {
                    command,
                    summary,
                    session,
                    reply: reply_tx,
                });
            }
            Err(e) => {
                // Answered in place; never queued
                let _ = reply_tx.send(Frame::Error(format!("ERR {}", e)));
            }
        }

        if replies.send(reply_rx).is_err() {
            break;
        }
    }
    shared.session_closed(session);
}

async fn write_replies(
    from: NodeId,
    to: NodeId,
    session: u64,
    mut sink: SplitSink<LinkConnection, Frame>,
    mut replies: mpsc::UnboundedReceiver<oneshot::Receiver<Frame>>,
) {
    while let Some(reply) = replies.recv().await {
        let Ok(frame) = reply.await else {
            debug!(%from, %to, session, "Reply slot dropped, closing writer");
            break;
        };
        if let Err(e) = sink.send(frame).await {
            debug!(%from, %to, session, error = %e, "Reply write failed");
            break;
        }
    }
}

/// Harness-owned stand-in for the `from -> to` connection
pub struct InterceptingLink {
    shared: Arc<LinkShared>,
    bind_addr: String,
    local_addr: Mutex<Option<SocketAddr>>,
    queue_rx: AsyncMutex<mpsc::UnboundedReceiver<QueuedMessage>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    target: Arc<dyn CommandTarget>,
}

impl InterceptingLink {
    /// Create a link that will listen on `bind_addr` and deliver to `target`
    ///
    /// `target` must reach participant `to`.
    pub fn new(
        from: NodeId,
        to: NodeId,
        bind_addr: impl Into<String>,
        target: Arc<dyn CommandTarget>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(LinkShared {
                from,
                to,
                state: Mutex::new(LinkState::Unbound),
                session: Mutex::new(None),
                next_session: AtomicU64::new(0),
                queue_tx,
                pending: AtomicUsize::new(0),
            }),
            bind_addr: bind_addr.into(),
            local_addr: Mutex::new(None),
            queue_rx: AsyncMutex::new(queue_rx),
            accept_task: Mutex::new(None),
            target,
        }
    }

    /// Bind the listener and start accepting
    ///
    /// Returns the bound address, which differs from the configured one when
    /// an ephemeral port was requested.
    #[instrument(skip(self), fields(from = %self.shared.from, to = %self.shared.to))]
    pub async fn start(&self) -> Result<SocketAddr, LinkError> {
        if let Some(e) = self.start_refused(self.state()) {
            return Err(e);
        }

        let bind_error = |source| LinkError::Bind {
            from: self.shared.from,
            to: self.shared.to,
            addr: self.bind_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        {
            // A concurrent start or stop may have won while we were binding
            let mut state = self.shared.state.lock();
            if let Some(e) = self.start_refused(*state) {
                return Err(e);
            }
            *state = LinkState::Listening;
        }
        *self.local_addr.lock() = Some(local);

        let task = tokio::spawn(accept_loop(listener, Arc::clone(&self.shared)));
        *self.accept_task.lock() = Some(task);

        info!(addr = %local, "Link listening");
        Ok(local)
    }

    fn start_refused(&self, state: LinkState) -> Option<LinkError> {
        match state {
            LinkState::Unbound => None,
            LinkState::Stopped => Some(self.stopped()),
            _ => Some(LinkError::AlreadyStarted {
                from: self.shared.from,
                to: self.shared.to,
            }),
        }
    }

    fn stopped(&self) -> LinkError {
        LinkError::Stopped {
            from: self.shared.from,
            to: self.shared.to,
        }
    }

    /// Release the head of the queue, if one arrives within `wait`
    ///
    /// Returns `Ok(true)` when a message was forwarded and its reply handed
    /// back to the sender, `Ok(false)` when the queue stayed empty. A failed
    /// delivery still consumes the message: the sender gets an error reply
    /// and the message is never retried.
    pub async fn drain_one(&self, wait: Duration) -> Result<bool, LinkError> {
        if self.state() == LinkState::Stopped {
            return Err(self.stopped());
        }

        // Held across delivery so concurrent drains cannot reorder
        let mut queue = self.queue_rx.lock().await;
        let message = match tokio::time::timeout(wait, queue.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) | Err(_) => return Ok(false),
        };
        self.shared.pending.fetch_sub(1, Ordering::SeqCst);

        let (from, to) = (self.shared.from, self.shared.to);
        match &message.summary {
            Some(summary) => debug!(%from, %to, session = message.session, "{}", summary),
            None => debug!(%from, %to, session = message.session, command = %message.command.name, "Releasing message"),
        }

        match self.target.call(&message.command).await {
            Ok(reply) => {
                if message.reply.send(reply).is_err() {
                    debug!(%from, %to, session = message.session, "Sender gone, reply discarded");
                }
                Ok(true)
            }
            Err(source) => {
                warn!(%from, %to, error = %source, "Forwarding failed, message dropped");
                let _ = message.reply.send(Frame::Error(format!(
                    "ERR forwarding to node {} failed: {}",
                    to, source
                )));
                Err(LinkError::Forward { from, to, source })
            }
        }
    }

    /// Release messages until one wait of `wait` passes with the queue empty
    ///
    /// Returns how many were released.
    pub async fn drain(&self, wait: Duration) -> Result<usize, LinkError> {
        let mut released = 0;
        while self.drain_one(wait).await? {
            released += 1;
        }
        Ok(released)
    }

    /// Stop listening and close the live session
    ///
    /// The listening port is free once this returns. Queued messages are
    /// never delivered.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == LinkState::Stopped {
                return;
            }
            *state = LinkState::Stopped;
        }

        let accept = self.accept_task.lock().take();
        if let Some(task) = accept {
            task.abort();
            let _ = task.await;
        }
        if let Some(session) = self.shared.session.lock().take() {
            session.abort();
        }

        info!(
            from = %self.shared.from,
            to = %self.shared.to,
            undelivered = self.pending(),
            "Link stopped"
        );
    }

    /// Sender side of the pair
    pub fn from(&self) -> NodeId {
        self.shared.from
    }

    /// Receiver side of the pair
    pub fn to(&self) -> NodeId {
        self.shared.to
    }

    /// Configured listen address
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    /// Messages queued and not yet drained
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

impl Drop for InterceptingLink {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.get_mut().take() {
            task.abort();
        }
        if let Some(session) = self.shared.session.lock().take() {
            session.abort();
        }
    }
}

impl std::fmt::Debug for InterceptingLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptingLink")
            .field("from", &self.shared.from)
            .field("to", &self.shared.to)
            .field("bind_addr", &self.bind_addr)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}
