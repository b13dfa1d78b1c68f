//! Cluster-set configuration command
//!
//! The consensus module learns its peers from a single cluster-set command.
//! The harness sends one to every participant, pointing each peer entry at
//! the link that impersonates that peer. The layout is positional and keeps
//! placeholder fields the module ignores:
//!
//! ```text
//! RG.CLUSTERSET NO-USED x5 <self-id> NO-USED <count>
//!   per participant q = 1..=count:
//!   NO-USED <q> NO-USED <first-slot> <last-slot> NO-USED <host:port> NO-USED
//! ```
//!
//! A participant's own entry carries `host:0`, meaning "no route".

use bytes::Bytes;

use crate::error::ClusterSetError;
use crate::frame::Command;
use crate::identity::NodeId;
use crate::keyspace::SlotRange;

/// Name of the configuration command
pub const CLUSTER_SET_COMMAND: &str = "RG.CLUSTERSET";
/// Placeholder for fields the consensus module does not read
pub const UNUSED_FIELD: &str = "NO-USED";

const HEADER_UNUSED: usize = 5;
const HEADER_LEN: usize = HEADER_UNUSED + 3;
const ENTRY_LEN: usize = 8;

/// One participant's entry in the cluster-set command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEntry {
    /// Participant described by this entry
    pub id: NodeId,
    /// Slots it owns
    pub slots: SlotRange,
    /// `host:port` to dial it at, `None` when no route is configured
    pub route: Option<String>,
}

/// The full configuration sent to one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSetCommand {
    /// Participant receiving this configuration
    pub node: NodeId,
    /// Host used for the "no route" sentinel
    pub host: String,
    /// Entries for every participant, in id order
    pub entries: Vec<ClusterEntry>,
}

impl ClusterSetCommand {
    /// Route to `peer`, if one is configured
    pub fn route_to(&self, peer: NodeId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == peer)
            .and_then(|e| e.route.as_deref())
    }

    /// Encode as a wire command
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(CLUSTER_SET_COMMAND)
            .args(std::iter::repeat_n(UNUSED_FIELD, HEADER_UNUSED))
            .arg(self.node.to_string())
            .arg(UNUSED_FIELD)
            .arg(self.entries.len().to_string());

        for entry in &self.entries {
            let route = entry
                .route
                .clone()
                .unwrap_or_else(|| format!("{}:0", self.host));
            cmd = cmd
                .arg(UNUSED_FIELD)
                .arg(entry.id.to_string())
                .arg(UNUSED_FIELD)
                .arg(entry.slots.start.to_string())
                .arg(entry.slots.end.to_string())
                .arg(UNUSED_FIELD)
                .arg(route)
                .arg(UNUSED_FIELD);
        }
        cmd
    }

    /// Decode a wire command
    pub fn parse(cmd: &Command) -> Result<Self, ClusterSetError> {
        if !cmd.is(CLUSTER_SET_COMMAND) {
            return Err(ClusterSetError::WrongCommand {
                expected: CLUSTER_SET_COMMAND.to_string(),
                actual: cmd.name.clone(),
            });
        }
        if cmd.args.len() < HEADER_LEN {
            return Err(ClusterSetError::TooShort {
                expected: HEADER_LEN,
                actual: cmd.args.len(),
            });
        }

        let node: NodeId = parse_field(cmd, HEADER_UNUSED)?;
        let count: usize = parse_field(cmd, HEADER_UNUSED + 2)?;
        let expected = count
            .checked_mul(ENTRY_LEN)
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| invalid(cmd, HEADER_UNUSED + 2))?;
        if cmd.args.len() < expected {
            return Err(ClusterSetError::TooShort {
                expected,
                actual: cmd.args.len(),
            });
        }

        let mut host = None;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let base = HEADER_LEN + i * ENTRY_LEN;
            let id: NodeId = parse_field(cmd, base + 1)?;
            let start: u16 = parse_field(cmd, base + 3)?;
            let end: u16 = parse_field(cmd, base + 4)?;
            let addr = text_field(cmd, base + 6)?;

            let (addr_host, port) = addr.rsplit_once(':').ok_or_else(|| invalid(cmd, base + 6))?;
            let port: u16 = port.parse().map_err(|_| invalid(cmd, base + 6))?;
            if host.is_none() {
                host = Some(addr_host.to_string());
            }

            entries.push(ClusterEntry {
                id,
                slots: SlotRange { start, end },
                route: (port != 0).then(|| addr.to_string()),
            });
        }

        Ok(Self {
            node,
            host: host.unwrap_or_default(),
            entries,
        })
    }
}

impl From<ClusterSetCommand> for Command {
    fn from(value: ClusterSetCommand) -> Self {
        value.to_command()
    }
}

fn text_field(cmd: &Command, index: usize) -> Result<&str, ClusterSetError> {
    cmd.arg_str(index).ok_or_else(|| invalid(cmd, index))
}

fn parse_field<T: std::str::FromStr>(cmd: &Command, index: usize) -> Result<T, ClusterSetError> {
    text_field(cmd, index)?
        .trim()
        .parse()
        .map_err(|_| invalid(cmd, index))
}

fn invalid(cmd: &Command, index: usize) -> ClusterSetError {
    let value = cmd
        .args
        .get(index)
        .map(|b: &Bytes| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    ClusterSetError::InvalidField { index, value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::partition_slots;

    fn sample() -> ClusterSetCommand {
        let slots = partition_slots(3).unwrap();
        ClusterSetCommand {
            node: NodeId::new(2).unwrap(),
            host: "localhost".to_string(),
            entries: NodeId::range(3)
                .into_iter()
                .zip(slots)
                .map(|(id, slots)| ClusterEntry {
                    id,
                    slots,
                    route: (id.get() != 2).then(|| format!("localhost:{}", 10100 + id.get())),
                })
                .collect(),
        }
    }

    #[test]
    fn test_cluster_set_layout() {
        let cmd = sample().to_command();
        let args: Vec<&str> = (0..cmd.args.len()).map(|i| cmd.arg_str(i).unwrap()).collect();

        assert_eq!(cmd.name, "RG.CLUSTERSET");
        assert_eq!(&args[..8], &["NO-USED", "NO-USED", "NO-USED", "NO-USED", "NO-USED", "2", "NO-USED", "3"]);
        assert_eq!(
            &args[8..16],
            &["NO-USED", "1", "NO-USED", "0", "5460", "NO-USED", "localhost:10101", "NO-USED"]
        );
        // Own entry carries the no-route sentinel
        assert_eq!(args[16 + 6], "localhost:0");
        assert_eq!(args.len(), 8 + 3 * 8);
    }

    #[test]
    fn test_cluster_set_parse() {
        let original = sample();
        let parsed = ClusterSetCommand::parse(&original.to_command()).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.route_to(NodeId::new(1).unwrap()), Some("localhost:10101"));
        assert_eq!(parsed.route_to(NodeId::new(2).unwrap()), None);
    }

    #[test]
    fn test_cluster_set_parse_errors() {
        let err = ClusterSetCommand::parse(&Command::new("PING")).unwrap_err();
        assert!(matches!(err, ClusterSetError::WrongCommand { .. }));

        let mut cmd = sample().to_command();
        cmd.args.truncate(20);
        assert!(matches!(
            ClusterSetCommand::parse(&cmd),
            Err(ClusterSetError::TooShort { expected: 32, actual: 20 })
        ));

        let mut cmd = sample().to_command();
        cmd.args[8 + 3] = Bytes::from("not-a-slot");
        assert!(matches!(
            ClusterSetCommand::parse(&cmd),
            Err(ClusterSetError::InvalidField { index: 11, .. })
        ));
    }

    #[test]
    fn test_cluster_set_parse_rejects_overflowing_count() {
        let cmd = Command::new(CLUSTER_SET_COMMAND)
            .args(std::iter::repeat_n(UNUSED_FIELD, HEADER_UNUSED))
            .arg("1")
            .arg(UNUSED_FIELD)
            .arg("2305843009213693952");
        assert!(matches!(
            ClusterSetCommand::parse(&cmd),
            Err(ClusterSetError::InvalidField { index: 7, .. })
        ));
    }
}
