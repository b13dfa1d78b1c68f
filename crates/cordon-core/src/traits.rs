//! Core traits for Cordon
//!
//! ## Key Traits
//!
//! - [`CommandTarget`]: The seam a link forwards released messages through

use async_trait::async_trait;

use crate::error::CommandError;
use crate::frame::{Command, Frame};
use crate::identity::NodeId;

/// Something that accepts a command and answers with a reply frame
///
/// The real implementation is the node handle in `cordon-transport`, a thin
/// synchronous request/response client. Error replies from the node are
/// returned as `Ok(Frame::Error(..))` so callers that impersonate the node
/// can pass them on unchanged; only transport failures are `Err`.
///
/// # Example
///
/// ```rust,ignore
/// use cordon_core::{Command, CommandTarget};
///
/// async fn ping<T: CommandTarget>(target: &T) -> bool {
///     matches!(target.call(&Command::new("PING")).await, Ok(frame) if !frame.is_error())
/// }
/// ```
#[async_trait]
pub trait CommandTarget: Send + Sync {
    /// Participant this target reaches
    fn node_id(&self) -> NodeId;

    /// Issue one command and wait for its reply
    async fn call(&self, command: &Command) -> Result<Frame, CommandError>;

    /// Issue one command, mapping an error reply to [`CommandError::Server`]
    async fn execute(&self, command: &Command) -> Result<Frame, CommandError> {
        match self.call(command).await? {
            Frame::Error(message) => Err(CommandError::Server(message)),
            frame => Ok(frame),
        }
    }
}
