//! Test-facing control over message delivery
//!
//! Nothing a participant sends reaches its peer until one of these calls
//! releases it. Within one (from, to) pair delivery is strictly FIFO; across
//! pairs a call visits links in ascending (from, to) order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, debug_span, info, warn};
use uuid::Uuid;

use cordon_core::NodeId;
use cordon_logging::{ContextScope, ParticipantContextGuard};
use cordon_transport::InterceptingLink;

use crate::config::DrainMode;
use crate::error::{HarnessError, HarnessResult};
use crate::topology::TopologyController;

/// Releases queued messages on command
///
/// Cheap to clone; derived controllers share the topology.
#[derive(Clone)]
pub struct DrainController {
    topology: Arc<TopologyController>,
    timeout: Duration,
    mode: DrainMode,
    /// Tags every drain span of this controller family in the logs
    run_id: Uuid,
}

impl DrainController {
    pub fn new(topology: Arc<TopologyController>, timeout: Duration, mode: DrainMode) -> Self {
        Self {
            topology,
            timeout,
            mode,
            run_id: Uuid::new_v4(),
        }
    }

    /// Same links, different wait on empty queues
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Same links, different drain mode
    pub fn with_mode(&self, mode: DrainMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> DrainMode {
        self.mode
    }

    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    /// One drain step on one link, by the configured mode
    async fn step(&self, link: &InterceptingLink) -> HarnessResult<usize> {
        let span = {
            let scope = ContextScope::Link {
                from: link.from(),
                to: link.to(),
            };
            let _context = ParticipantContextGuard::with_instance_id(scope, self.run_id);
            debug_span!("drain", from = %link.from(), to = %link.to(), mode = %self.mode)
        };

        let released = match self.mode {
            DrainMode::Single => {
                usize::from(link.drain_one(self.timeout).instrument(span).await?)
            }
            DrainMode::Exhaust => link.drain(self.timeout).instrument(span).await?,
        };
        Ok(released)
    }

    fn link(&self, from: NodeId, to: NodeId) -> HarnessResult<&InterceptingLink> {
        for id in [from, to] {
            if !self.topology.contains(id) {
                return Err(HarnessError::UnknownParticipant(id));
            }
        }
        // Only self-pairs are missing once both ids are known
        self.topology
            .link(from, to)
            .ok_or(HarnessError::UnknownParticipant(to))
    }

    /// One step on the (from, to) link; returns how many were released
    pub async fn drain_count(&self, from: NodeId, to: NodeId) -> HarnessResult<usize> {
        let link = self.link(from, to)?;
        self.step(link).await
    }

    /// One step on the (from, to) link; true if anything was released
    pub async fn drain_pair(&self, from: NodeId, to: NodeId) -> HarnessResult<bool> {
        Ok(self.drain_count(from, to).await? > 0)
    }

    /// One step on every link in `from_set × to_set`, self-pairs skipped
    ///
    /// Returns true if at least one message was released. A failing link
    /// does not stop the pass; the first failure is returned once every
    /// link has been visited.
    pub async fn drain(&self, from_set: &[NodeId], to_set: &[NodeId]) -> HarnessResult<bool> {
        Ok(self.drain_sets(from_set, to_set).await? > 0)
    }

    async fn drain_sets(&self, from_set: &[NodeId], to_set: &[NodeId]) -> HarnessResult<usize> {
        let from_set = self.known(from_set)?;
        let to_set = self.known(to_set)?;

        let mut released = 0;
        let mut first_error = None;
        for &from in &from_set {
            for &to in &to_set {
                if from == to {
                    continue;
                }
                let Some(link) = self.topology.link(from, to) else {
                    continue;
                };
                match self.step(link).await {
                    Ok(count) => released += count,
                    Err(e) => {
                        warn!(%from, %to, error = %e, "Drain step failed, continuing pass");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }

    /// Sorted, deduplicated, and checked against the topology
    fn known(&self, ids: &[NodeId]) -> HarnessResult<BTreeSet<NodeId>> {
        ids.iter()
            .map(|&id| {
                if self.topology.contains(id) {
                    Ok(id)
                } else {
                    Err(HarnessError::UnknownParticipant(id))
                }
            })
            .collect()
    }

    /// Full passes over every link until one releases nothing
    ///
    /// Returns the number of messages delivered. Does not return while the
    /// participants keep generating traffic in response to deliveries.
    pub async fn drain_all(&self) -> HarnessResult<usize> {
        let participants = self.topology.participants().to_vec();
        self.drain_until_quiet(&participants).await
    }

    /// Full passes over the links among `participants` until one releases
    /// nothing
    ///
    /// A pass with a failing link is completed, then its error returned.
    pub async fn drain_until_quiet(&self, participants: &[NodeId]) -> HarnessResult<usize> {
        let mut total = 0;
        let mut passes = 0;
        loop {
            let released = self.drain_sets(participants, participants).await?;
            passes += 1;
            if released == 0 {
                break;
            }
            debug!(released, pass = passes, "Drain pass");
            total += released;
        }
        info!(delivered = total, passes, "Quiescent");
        Ok(total)
    }
}

impl std::fmt::Debug for DrainController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainController")
            .field("timeout", &self.timeout)
            .field("mode", &self.mode)
            .field("run_id", &self.run_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cordon_core::{AddressAllocator, Command, CommandError, CommandTarget, Frame};
    use cordon_transport::LinkError;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_millis(20);

    /// Target that records which participant received what
    struct Sink {
        id: NodeId,
        seen: Seen,
        /// Refuse every delivery instead of recording it
        broken: bool,
    }

    #[async_trait]
    impl CommandTarget for Sink {
        fn node_id(&self) -> NodeId {
            self.id
        }

        async fn call(&self, command: &Command) -> Result<Frame, CommandError> {
            if self.broken {
                return Err(CommandError::Closed);
            }
            let tag = command.arg_str(0).unwrap_or_default().to_string();
            self.seen.lock().unwrap().push((self.id.get(), tag));
            Ok(Frame::ok())
        }
    }

    fn node(n: u16) -> NodeId {
        NodeId::new(n).unwrap()
    }

    type Seen = Arc<Mutex<Vec<(u16, String)>>>;

    async fn controller(count: u16, mode: DrainMode) -> (DrainController, Seen) {
        controller_with_broken(count, mode, &[]).await
    }

    async fn controller_with_broken(
        count: u16,
        mode: DrainMode,
        broken: &[u16],
    ) -> (DrainController, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let targets: Vec<Arc<dyn CommandTarget>> = NodeId::range(count)
            .into_iter()
            .map(|id| {
                Arc::new(Sink {
                    id,
                    seen: Arc::clone(&seen),
                    broken: broken.contains(&id.get()),
                }) as Arc<dyn CommandTarget>
            })
            .collect();
        let topology = TopologyController::build(targets, &AddressAllocator::ephemeral("127.0.0.1"))
            .await
            .unwrap();
        (DrainController::new(Arc::new(topology), WAIT, mode), seen)
    }

    /// Pipeline `tags` into the (from, to) link as participant `from` would
    async fn send(
        drains: &DrainController,
        from: u16,
        to: u16,
        tags: &[&str],
    ) -> tokio_util::codec::Framed<tokio::net::TcpStream, cordon_transport::RespCodec> {
        use futures::SinkExt;

        let link = drains.topology().link(node(from), node(to)).unwrap();
        let stream = tokio::net::TcpStream::connect(link.local_addr().unwrap())
            .await
            .unwrap();
        let mut conn = tokio_util::codec::Framed::new(stream, cordon_transport::RespCodec);
        for tag in tags {
            conn.send(&Command::new("MSG").arg(tag.to_string())).await.unwrap();
        }
        for _ in 0..200 {
            if link.pending() >= tags.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        conn
    }

    #[tokio::test]
    async fn test_single_mode_releases_one_per_link() {
        let (drains, seen) = controller(3, DrainMode::Single).await;
        let _c12 = send(&drains, 1, 2, &["a", "b"]).await;
        let _c13 = send(&drains, 1, 3, &["x"]).await;

        // One step over {1} x {2, 3}
        assert!(drains.drain(&[node(1)], &[node(2), node(3)]).await.unwrap());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(2, "a".to_string()), (3, "x".to_string())]
        );

        assert_eq!(drains.drain_count(node(1), node(2)).await.unwrap(), 1);
        assert!(!drains.drain_pair(node(1), node(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_exhaust_mode_empties_the_link() {
        let (drains, seen) = controller(2, DrainMode::Exhaust).await;
        let _conn = send(&drains, 2, 1, &["1", "2", "3"]).await;

        assert_eq!(drains.drain_count(node(2), node(1)).await.unwrap(), 3);
        let tags: Vec<String> = seen.lock().unwrap().iter().map(|(_, t)| t.clone()).collect();
        assert_eq!(tags, vec!["1", "2", "3"]);

        let single = drains.with_mode(DrainMode::Single);
        assert_eq!(single.mode(), DrainMode::Single);
        assert_eq!(drains.mode(), DrainMode::Exhaust);
    }

    #[tokio::test]
    async fn test_drain_all_reaches_quiescence() {
        let (drains, seen) = controller(3, DrainMode::Single).await;
        let _a = send(&drains, 1, 2, &["a1", "a2", "a3"]).await;
        let _b = send(&drains, 3, 1, &["b1"]).await;
        let _c = send(&drains, 2, 3, &["c1", "c2"]).await;

        assert_eq!(drains.drain_all().await.unwrap(), 6);
        assert_eq!(seen.lock().unwrap().len(), 6);
        assert_eq!(drains.topology().pending(), 0);

        // Nothing left: a further pass is a no-op
        let quick = drains.with_timeout(Duration::from_millis(1));
        assert_eq!(quick.drain_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_until_quiet_respects_subset() {
        let (drains, _seen) = controller(3, DrainMode::Single).await;
        let _inside = send(&drains, 1, 2, &["in"]).await;
        let _outside = send(&drains, 1, 3, &["out"]).await;

        assert_eq!(drains.drain_until_quiet(&[node(1), node(2)]).await.unwrap(), 1);
        assert_eq!(drains.topology().link(node(1), node(3)).unwrap().pending(), 1);
    }

    #[tokio::test]
    async fn test_failing_link_does_not_cut_the_pass_short() {
        let (drains, seen) = controller_with_broken(3, DrainMode::Single, &[2]).await;
        let _c12 = send(&drains, 1, 2, &["lost"]).await;
        let _c13 = send(&drains, 1, 3, &["x"]).await;

        let result = drains.drain(&[node(1)], &[node(2), node(3)]).await;
        assert!(matches!(
            result,
            Err(HarnessError::Link(LinkError::Forward { to, .. })) if to.get() == 2
        ));
        assert_eq!(*seen.lock().unwrap(), vec![(3, "x".to_string())]);
        assert_eq!(drains.topology().pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_all_reports_failure_after_full_pass() {
        let (drains, seen) = controller_with_broken(3, DrainMode::Exhaust, &[1]).await;
        let _c21 = send(&drains, 2, 1, &["lost"]).await;
        let _c23 = send(&drains, 2, 3, &["y1", "y2"]).await;
        let _c32 = send(&drains, 3, 2, &["z"]).await;

        assert!(matches!(
            drains.drain_all().await,
            Err(HarnessError::Link(LinkError::Forward { .. }))
        ));
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(drains.topology().pending(), 0);

        // The failed message was consumed; the next pass is clean
        assert_eq!(drains.drain_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_participants_rejected() {
        let (drains, _seen) = controller(2, DrainMode::Single).await;

        assert!(matches!(
            drains.drain_pair(node(1), node(5)).await,
            Err(HarnessError::UnknownParticipant(id)) if id.get() == 5
        ));
        assert!(matches!(
            drains.drain(&[node(7)], &[node(1)]).await,
            Err(HarnessError::UnknownParticipant(_))
        ));
        assert!(matches!(
            drains.drain_pair(node(1), node(1)).await,
            Err(HarnessError::UnknownParticipant(_))
        ));

        // Self-pairs inside sets are just skipped
        assert!(!drains.drain(&[node(1)], &[node(1)]).await.unwrap());
    }

    #[tokio::test]
    async fn test_derived_controllers_share_settings() {
        let (drains, _seen) = controller(2, DrainMode::Single).await;
        let slow = drains.with_timeout(Duration::from_secs(2));
        assert_eq!(slow.timeout(), Duration::from_secs(2));
        assert_eq!(slow.mode(), DrainMode::Single);
        assert_eq!(slow.run_id, drains.run_id);
    }
}
