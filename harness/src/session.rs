//! Harness sessions
//!
//! A [`Harness`] owns everything one test needs: a node handle per
//! participant, the links between them, and a drain controller over those
//! links. Tests talk to participants through [`Participant`] views.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{Instrument, info, info_span, instrument};

use cordon_core::{Command, CommandTarget, Frame, NodeId};
use cordon_logging::ParticipantContextGuard;
use cordon_transport::NodeHandle;

use crate::config::HarnessConfig;
use crate::drain::DrainController;
use crate::error::{HarnessError, HarnessResult};
use crate::topology::TopologyController;

/// One test session against a set of participants
pub struct Harness {
    config: HarnessConfig,
    handles: BTreeMap<NodeId, Arc<NodeHandle>>,
    topology: Arc<TopologyController>,
    drains: DrainController,
}

impl Harness {
    /// Connect to the participants at `addrs` and wire them together
    ///
    /// The participant at `addrs[i]` becomes node `i + 1`. Every ordered pair
    /// gets a link, every participant is sent its routes, and with
    /// `settle_on_start` one full drain pass delivers the handshake traffic
    /// that publishing provokes.
    #[instrument(skip_all, fields(participants = addrs.len()))]
    pub async fn connect<A: AsRef<str>>(config: HarnessConfig, addrs: &[A]) -> HarnessResult<Self> {
        let count = u16::try_from(addrs.len()).map_err(|_| HarnessError::InvalidConfig {
            key: "participants".to_string(),
            value: addrs.len().to_string(),
        })?;

        let mut handles = BTreeMap::new();
        for (node, addr) in NodeId::range(count).into_iter().zip(addrs) {
            let addr = addr.as_ref();
            let handle = NodeHandle::connect(node, addr, config.handle.clone())
                .await
                .map_err(|source| HarnessError::Connect {
                    node,
                    addr: addr.to_string(),
                    source,
                })?;
            handles.insert(node, Arc::new(handle));
        }

        let targets: Vec<Arc<dyn CommandTarget>> = handles
            .values()
            .map(|handle| Arc::clone(handle) as Arc<dyn CommandTarget>)
            .collect();
        let topology = TopologyController::build(targets, &config.allocator()).await?;

        if let Err(e) = topology.publish().await {
            topology.stop_all().await;
            return Err(e);
        }

        let topology = Arc::new(topology);
        let drains = DrainController::new(
            Arc::clone(&topology),
            config.drain_timeout(),
            config.drain_mode,
        );

        if config.settle_on_start {
            let participants = topology.participants().to_vec();
            let settled = drains.drain(&participants, &participants).await?;
            info!(settled, "Settle pass complete");
        }

        info!(mode = %config.drain_mode, "Harness ready");
        Ok(Self {
            config,
            handles,
            topology,
            drains,
        })
    }

    /// View of participant `id`
    pub fn participant(&self, id: NodeId) -> HarnessResult<Participant<'_>> {
        let handle = self
            .handles
            .get(&id)
            .ok_or(HarnessError::UnknownParticipant(id))?;
        Ok(Participant {
            id,
            handle,
            drains: &self.drains,
        })
    }

    /// Views of every participant, ascending by id
    pub fn participants(&self) -> impl Iterator<Item = Participant<'_>> {
        self.handles.iter().map(|(&id, handle)| Participant {
            id,
            handle,
            drains: &self.drains,
        })
    }

    pub fn drains(&self) -> &DrainController {
        &self.drains
    }

    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Deliver until nothing is in flight anywhere
    pub async fn drain_all(&self) -> HarnessResult<usize> {
        self.drains.drain_all().await
    }

    /// Stop every link and close every node handle
    ///
    /// Queued messages are discarded.
    pub async fn shutdown(&self) {
        self.topology.stop_all().await;
        for handle in self.handles.values() {
            handle.close().await;
        }
        info!("Harness shut down");
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("participants", &self.handles.len())
            .field("drains", &self.drains)
            .finish()
    }
}

/// A participant as seen from the test
#[derive(Debug, Clone, Copy)]
pub struct Participant<'a> {
    id: NodeId,
    handle: &'a Arc<NodeHandle>,
    drains: &'a DrainController,
}

impl<'a> Participant<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn handle(&self) -> &'a NodeHandle {
        self.handle
    }

    /// Issue `name args...` directly to this participant
    ///
    /// Error replies come back as [`cordon_core::CommandError::Server`].
    pub async fn execute<I, A>(&self, name: &str, args: I) -> HarnessResult<Frame>
    where
        I: IntoIterator<Item = A>,
        A: Into<bytes::Bytes>,
    {
        let command = Command::new(name).args(args);
        self.call(&command).await
    }

    /// Issue a prepared command directly to this participant
    pub async fn call(&self, command: &Command) -> HarnessResult<Frame> {
        let span = {
            let _context = ParticipantContextGuard::participant(self.id);
            info_span!("execute", node = %self.id, command = %command.name)
        };
        Ok(self.handle.execute(command).instrument(span).await?)
    }

    /// One drain step on each link from this participant to `ids`
    pub async fn pass_messages_to(&self, ids: &[NodeId]) -> HarnessResult<bool> {
        self.drains.drain(&[self.id], ids).await
    }
}
