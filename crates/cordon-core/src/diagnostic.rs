//! Best-effort decoding of internal consensus messages for logs
//!
//! Consensus traffic travels as `rg.innermsgcommand <tag> <function> <payload>`.
//! The payload starts with:
//!
//! ```text
//! u64 LE   name length L (includes a trailing NUL)
//! L bytes  consensus name
//! u64 LE   instance id
//! u64 LE   proposal id
//! ```
//!
//! Only these leading fields are read. Nothing here may influence delivery:
//! callers log the summary when present and move on otherwise.

use std::fmt;

use crate::error::DecodeError;
use crate::frame::Command;

/// Command name carrying consensus-internal messages
pub const INNER_MESSAGE_COMMAND: &str = "rg.innermsgcommand";

const FUNCTION_ARG: usize = 1;
const PAYLOAD_ARG: usize = 2;
const FIELD_LEN: usize = 8;

/// Human-readable view of one internal message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    /// Remote function the message invokes
    pub function: String,
    /// Name of the consensus instance family
    pub consensus: String,
    /// Consensus instance id
    pub instance_id: i64,
    /// Proposal number
    pub proposal_id: i64,
}

impl fmt::Display for MessageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - name:{}, id:{}, proposal:{}",
            self.function, self.consensus, self.instance_id, self.proposal_id
        )
    }
}

/// Decode the diagnostic summary of a command
pub fn decode_summary(cmd: &Command) -> Result<MessageSummary, DecodeError> {
    if !cmd.is(INNER_MESSAGE_COMMAND) {
        return Err(DecodeError::NotInnerMessage(cmd.name.clone()));
    }

    let function = cmd
        .args
        .get(FUNCTION_ARG)
        .ok_or(DecodeError::MissingArgument(FUNCTION_ARG))?;
    let payload = cmd
        .args
        .get(PAYLOAD_ARG)
        .ok_or(DecodeError::MissingArgument(PAYLOAD_ARG))?;

    let name_len = read_u64(payload, 0)?;
    if name_len == 0 {
        return Err(DecodeError::InvalidNameLength(name_len));
    }
    let name_len = usize::try_from(name_len).map_err(|_| DecodeError::InvalidNameLength(name_len))?;

    let name_end = FIELD_LEN
        .checked_add(name_len)
        .ok_or(DecodeError::InvalidNameLength(name_len as u64))?;
    let name = payload
        .get(FIELD_LEN..name_end - 1)
        .ok_or(DecodeError::Truncated {
            needed: name_end,
            available: payload.len(),
        })?;

    let instance_id = read_u64(payload, name_end)? as i64;
    let proposal_id = read_u64(payload, name_end + FIELD_LEN)? as i64;

    Ok(MessageSummary {
        function: String::from_utf8_lossy(function).into_owned(),
        consensus: String::from_utf8_lossy(name).into_owned(),
        instance_id,
        proposal_id,
    })
}

/// Summary if the command decodes, `None` otherwise
pub fn summarize(cmd: &Command) -> Option<MessageSummary> {
    decode_summary(cmd).ok()
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64, DecodeError> {
    let needed = offset + FIELD_LEN;
    let bytes: [u8; FIELD_LEN] = data
        .get(offset..needed)
        .and_then(|s| s.try_into().ok())
        .ok_or(DecodeError::Truncated {
            needed,
            available: data.len(),
        })?;
    Ok(u64::from_le_bytes(bytes))
}
