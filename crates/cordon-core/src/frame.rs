//! RESP values and typed commands
//!
//! Participants speak RESP2. A request is an array of bulk strings whose
//! first element names the command; a reply is any frame. The harness never
//! interprets replies, it only carries them back, so [`Frame`] keeps every
//! variant distinct (a status `+OK` and a bulk `$2 OK` are not the same
//! reply to the caller).

use bytes::Bytes;

use crate::error::ProtocolError;

/// A single RESP2 value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$3\r\nfoo\r\n`
    Bulk(Bytes),
    /// `$-1\r\n` (and `*-1\r\n`, which RESP2 treats the same way)
    Null,
    /// `*2\r\n...`
    Array(Vec<Frame>),
}

impl Frame {
    /// The canonical `+OK` status reply
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    /// Bulk string from anything byte-like
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// Whether this is an error reply
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Text of a status, error, or UTF-8 bulk reply
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) | Frame::Error(s) => Some(s),
            Frame::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Bytes of a bulk reply
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Frame::Bulk(b) => Some(b),
            _ => None,
        }
    }
}

/// A request to a participant: a name plus ordered opaque arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command name, exactly as sent (case preserved)
    pub name: String,
    /// Arguments in order
    pub args: Vec<Bytes>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Case-insensitive name check (RESP command names are case-insensitive)
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Argument as UTF-8 text, if present and valid
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|a| std::str::from_utf8(a).ok())
    }

    /// Encode as the array-of-bulk-strings frame used on the wire
    pub fn to_frame(&self) -> Frame {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(Frame::Bulk(Bytes::copy_from_slice(self.name.as_bytes())));
        items.extend(self.args.iter().cloned().map(Frame::Bulk));
        Frame::Array(items)
    }

    /// Build a command from a request frame
    ///
    /// Accepts bulk and simple strings as elements (inline clients send the
    /// latter) and integers, which are rendered as decimal text.
    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let items = match frame {
            Frame::Array(items) => items,
            other => {
                return Err(ProtocolError::NotACommand(format!(
                    "expected array, got {:?}",
                    other
                )));
            }
        };

        let mut parts = items.into_iter().map(|item| match item {
            Frame::Bulk(b) => Ok(b),
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Integer(i) => Ok(Bytes::from(i.to_string())),
            other => Err(ProtocolError::NotACommand(format!(
                "unexpected element {:?}",
                other
            ))),
        });

        let name = match parts.next() {
            Some(name) => name?,
            None => return Err(ProtocolError::NotACommand("empty array".to_string())),
        };
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| ProtocolError::NotACommand("command name is not UTF-8".to_string()))?;

        let args = parts.collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, args })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
