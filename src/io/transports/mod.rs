use std::fmt::{Debug, Display};
use std::time::Duration;

use dyn_clone::DynClone;

use crate::errors::Error;

pub mod serial;
pub mod tcp;

dyn_clone::clone_trait_object!(Transport);

/// Byte-oriented bidirectional stream to the board.
///
/// Implementations keep their connection behind an internal `Arc<Mutex<_>>` so a
/// cloned transport talks to the same device; this is what lets the dispatcher
/// task read while API verbs and the keep-alive task write.
pub trait Transport: Debug + Display + DynClone + Send + Sync {
    /// Opens the connection (in a blocking way).
    fn open(&mut self) -> Result<(), Error>;

    /// Gracefully shuts down the connection.
    fn close(&mut self) -> Result<(), Error>;

    /// Sets the read timeout honored by [`Transport::read_byte`].
    fn set_timeout(&mut self, duration: Duration) -> Result<(), Error>;

    /// Reads a single byte; `None` when the read timeout elapsed without data.
    fn read_byte(&mut self) -> Result<Option<u8>, Error>;

    /// Reads bytes up to and including `delim`, or `None` when `timeout` elapses
    /// before the delimiter shows up.
    fn read_until(&mut self, delim: u8, timeout: Duration) -> Result<Option<Vec<u8>>, Error>;

    /// Writes a complete message. A whole SysEx frame goes through one call so
    /// concurrent writers interleave at message granularity only.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), Error>;

    /// Discards any unread inbound bytes.
    fn reset_input_buffer(&mut self) -> Result<(), Error>;
}
