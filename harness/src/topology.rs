//! Link mesh ownership and routing configuration
//!
//! The [`TopologyController`] creates one intercepting link for every ordered
//! pair of participants, splits the keyspace between them, and tells each
//! participant (through a cluster-set command) to reach every peer through
//! the harness-owned link for that pair.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use cordon_core::{
    AddressAllocator, ClusterEntry, ClusterSetCommand, CommandTarget, NodeId, SlotRange,
    partition_slots,
};
use cordon_transport::InterceptingLink;

use crate::error::{HarnessError, HarnessResult};

/// Owner of the full N·(N-1) link mesh
pub struct TopologyController {
    /// Participants in id order
    participants: Vec<NodeId>,
    /// Delivery targets, one per participant
    targets: BTreeMap<NodeId, Arc<dyn CommandTarget>>,
    /// Links keyed by (from, to); iteration order is the drain order
    links: BTreeMap<(NodeId, NodeId), InterceptingLink>,
    /// Slot range per participant, indexed by `NodeId::index`
    slots: Vec<SlotRange>,
    /// Host advertised in routes
    host: String,
}

impl TopologyController {
    /// Create and start every link
    ///
    /// `targets` must be exactly participants 1..=N, in any order. If any
    /// link fails to start, the ones already listening are stopped.
    #[instrument(skip_all, fields(participants = targets.len()))]
    pub async fn build(
        targets: Vec<Arc<dyn CommandTarget>>,
        allocator: &AddressAllocator,
    ) -> HarnessResult<Self> {
        allocator.validate(targets.len())?;
        let slots = partition_slots(targets.len())?;

        let mut by_id = BTreeMap::new();
        for target in targets {
            by_id.insert(target.node_id(), target);
        }
        let participants: Vec<NodeId> = by_id.keys().copied().collect();
        for (index, &found) in participants.iter().enumerate() {
            if found.index() != index {
                let expected = u16::try_from(index + 1)
                    .ok()
                    .and_then(NodeId::new)
                    .unwrap_or(found);
                return Err(HarnessError::ParticipantOrder { expected, found });
            }
        }

        let mut topology = Self {
            participants,
            targets: by_id,
            links: BTreeMap::new(),
            slots,
            host: allocator.host.clone(),
        };

        if let Err(e) = topology.start_links(allocator).await {
            topology.stop_all().await;
            return Err(e);
        }

        info!(links = topology.links.len(), "Topology built");
        Ok(topology)
    }

    async fn start_links(&mut self, allocator: &AddressAllocator) -> HarnessResult<()> {
        for &from in &self.participants {
            for (&to, target) in &self.targets {
                if from == to {
                    continue;
                }
                let addr = allocator.address(from, to)?;
                let link = InterceptingLink::new(from, to, addr, Arc::clone(target));
                // Insert before starting so a failure path still stops it
                let link = self.links.entry((from, to)).or_insert(link);
                let bound = link.start().await?;
                debug!(%from, %to, addr = %bound, "Link started");
            }
        }
        Ok(())
    }

    /// The cluster-set configuration for participant `node`
    pub fn cluster_set(&self, node: NodeId) -> HarnessResult<ClusterSetCommand> {
        if !self.targets.contains_key(&node) {
            return Err(HarnessError::UnknownParticipant(node));
        }

        let entries = self
            .participants
            .iter()
            .zip(&self.slots)
            .map(|(&peer, &slots)| ClusterEntry {
                id: peer,
                slots,
                route: self.route(node, peer),
            })
            .collect();

        Ok(ClusterSetCommand {
            node,
            host: self.host.clone(),
            entries,
        })
    }

    /// Address `from` must use to reach `to`, `None` for itself
    fn route(&self, from: NodeId, to: NodeId) -> Option<String> {
        let link = self.links.get(&(from, to))?;
        Some(match link.local_addr() {
            Some(bound) => format!("{}:{}", self.host, bound.port()),
            None => link.bind_addr().to_string(),
        })
    }

    /// Send each participant its routing configuration
    ///
    /// Stops at the first participant that rejects it.
    #[instrument(skip(self), fields(participants = self.participants.len()))]
    pub async fn publish(&self) -> HarnessResult<()> {
        for (&node, target) in &self.targets {
            let command = self.cluster_set(node)?.to_command();
            target
                .execute(&command)
                .await
                .map_err(|source| HarnessError::Configuration { node, source })?;
            info!(%node, "Cluster set published");
        }
        Ok(())
    }

    /// Stop every link
    pub async fn stop_all(&self) {
        for link in self.links.values() {
            link.stop().await;
        }
        info!(links = self.links.len(), "All links stopped");
    }

    /// The link carrying `from`'s traffic to `to`
    pub fn link(&self, from: NodeId, to: NodeId) -> Option<&InterceptingLink> {
        self.links.get(&(from, to))
    }

    /// Every link in ascending (from, to) order
    pub fn links(&self) -> impl Iterator<Item = &InterceptingLink> {
        self.links.values()
    }

    pub fn participants(&self) -> &[NodeId] {
        &self.participants
    }

    /// Slot ranges in participant order
    pub fn slot_ranges(&self) -> &[SlotRange] {
        &self.slots
    }

    /// Delivery target for a participant
    pub fn target(&self, id: NodeId) -> Option<&Arc<dyn CommandTarget>> {
        self.targets.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.targets.contains_key(&id)
    }

    /// Messages queued across all links
    pub fn pending(&self) -> usize {
        self.links.values().map(InterceptingLink::pending).sum()
    }
}

impl std::fmt::Debug for TopologyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyController")
            .field("participants", &self.participants)
            .field("links", &self.links.len())
            .field("host", &self.host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cordon_core::{CLUSTER_SET_COMMAND, Command, CommandError, Frame, TOTAL_SLOTS};
    use cordon_transport::LinkState;
    use std::sync::Mutex;

    /// Command target that remembers what it was asked, no network needed
    struct Recorder {
        id: NodeId,
        reject: bool,
        seen: Mutex<Vec<Command>>,
    }

    impl Recorder {
        fn new(id: u16) -> Self {
            Self {
                id: NodeId::new(id).unwrap(),
                reject: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandTarget for Recorder {
        fn node_id(&self) -> NodeId {
            self.id
        }

        async fn call(&self, command: &Command) -> Result<Frame, CommandError> {
            self.seen.lock().unwrap().push(command.clone());
            if self.reject {
                Ok(Frame::Error("ERR cluster set refused".to_string()))
            } else {
                Ok(Frame::ok())
            }
        }
    }

    fn targets(count: u16) -> Vec<Arc<Recorder>> {
        (1..=count).map(|i| Arc::new(Recorder::new(i))).collect()
    }

    fn as_dyn(targets: &[Arc<Recorder>]) -> Vec<Arc<dyn CommandTarget>> {
        targets
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn CommandTarget>)
            .collect()
    }

    fn node(n: u16) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_build_creates_every_ordered_pair() {
        let recorders = targets(4);
        let topology = TopologyController::build(as_dyn(&recorders), &AddressAllocator::ephemeral("127.0.0.1"))
            .await
            .unwrap();

        assert_eq!(topology.participants(), NodeId::range(4).as_slice());
        assert_eq!(topology.links().count(), 12);
        for from in NodeId::range(4) {
            for to in NodeId::range(4) {
                let link = topology.link(from, to);
                assert_eq!(link.is_some(), from != to);
                if let Some(link) = link {
                    assert_eq!(link.state(), LinkState::Listening);
                }
            }
        }

        // Deterministic (from, to) traversal
        let order: Vec<(u16, u16)> = topology.links().map(|l| (l.from().get(), l.to().get())).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);

        topology.stop_all().await;
        assert!(topology.links().all(|l| l.state() == LinkState::Stopped));
    }

    #[tokio::test]
    async fn test_cluster_set_routes_through_links() {
        let recorders = targets(3);
        let topology = TopologyController::build(as_dyn(&recorders), &AddressAllocator::ephemeral("127.0.0.1"))
            .await
            .unwrap();

        let config = topology.cluster_set(node(2)).unwrap();
        assert_eq!(config.node, node(2));
        assert_eq!(config.entries.len(), 3);
        assert_eq!(config.entries[0].slots, SlotRange { start: 0, end: 5460 });
        assert_eq!(config.entries[2].slots.end, TOTAL_SLOTS - 1);

        assert!(config.route_to(node(2)).is_none());
        let port = topology.link(node(2), node(3)).unwrap().local_addr().unwrap().port();
        assert_eq!(config.route_to(node(3)), Some(format!("127.0.0.1:{}", port).as_str()));

        let wire = config.to_command();
        assert!(wire.is(CLUSTER_SET_COMMAND));
        assert!(wire.args.iter().any(|a| a.as_ref() == b"127.0.0.1:0"));

        assert!(matches!(
            topology.cluster_set(node(9)),
            Err(HarnessError::UnknownParticipant(_))
        ));

        topology.stop_all().await;
    }

    #[tokio::test]
    async fn test_publish_sends_one_command_per_participant() {
        let recorders = targets(3);
        let topology = TopologyController::build(as_dyn(&recorders), &AddressAllocator::ephemeral("127.0.0.1"))
            .await
            .unwrap();
        topology.publish().await.unwrap();

        for recorder in &recorders {
            let seen = recorder.seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            let parsed = ClusterSetCommand::parse(&seen[0]).unwrap();
            assert_eq!(parsed, topology.cluster_set(recorder.id).unwrap());
        }

        topology.stop_all().await;
    }

    #[tokio::test]
    async fn test_publish_failure_names_the_node() {
        let mut recorders: Vec<Recorder> = (1..=3).map(Recorder::new).collect();
        recorders[1].reject = true;
        let recorders: Vec<Arc<Recorder>> = recorders.into_iter().map(Arc::new).collect();

        let topology = TopologyController::build(as_dyn(&recorders), &AddressAllocator::ephemeral("127.0.0.1"))
            .await
            .unwrap();
        let err = topology.publish().await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { node, .. } if node.get() == 2));

        topology.stop_all().await;
    }

    #[tokio::test]
    async fn test_build_rejects_gaps_and_empty() {
        let recorders = vec![Arc::new(Recorder::new(1)), Arc::new(Recorder::new(3))];
        let err = TopologyController::build(as_dyn(&recorders), &AddressAllocator::ephemeral("127.0.0.1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ParticipantOrder { expected, found } if expected.get() == 2 && found.get() == 3
        ));

        let err = TopologyController::build(Vec::new(), &AddressAllocator::ephemeral("127.0.0.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Topology(_)));
    }

    #[tokio::test]
    async fn test_build_stops_links_on_bind_failure() {
        // Two OS-chosen ports: the lower is released for 1->2, the higher
        // stays occupied so 2->1 cannot bind
        let a = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let b = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let (released, blocker) = if a.local_addr().unwrap().port() < b.local_addr().unwrap().port() {
            (a, b)
        } else {
            (b, a)
        };
        let low = released.local_addr().unwrap().port();
        let high = blocker.local_addr().unwrap().port();
        drop(released);
        let allocator = AddressAllocator::new("127.0.0.1", low).with_strides(high - low, 1);

        let recorders = targets(2);
        let err = TopologyController::build(as_dyn(&recorders), &allocator)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Link(_)));

        // The 1->2 link released its port again
        assert!(std::net::TcpListener::bind(("127.0.0.1", low)).is_ok());
    }
}
