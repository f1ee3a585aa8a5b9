use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::errors::{Disconnected, Error};
use crate::io::Transport;

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    read_buf: Vec<u8>,
    read_index: usize,
    write_buf: Vec<u8>,
    /// When set, reads return nothing until the first write lands. Lets a test
    /// script a reply that only becomes visible once the query went out.
    gate_reads_until_write: bool,
    /// When set, every write fails as if the connection dropped.
    fail_writes: bool,
}

/// Scripted [`Transport`] for tests: reads pop from a pre-loaded buffer, writes
/// accumulate for inspection. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A mock whose reads will serve the given bytes.
    pub fn with_read_data(data: &[u8]) -> Self {
        let mock = Self::default();
        mock.push_read_data(data);
        mock
    }

    /// Same as [`MockTransport::with_read_data`], but the bytes stay invisible
    /// until something is written to the transport.
    pub fn gated(data: &[u8]) -> Self {
        let mock = Self::with_read_data(data);
        mock.state.lock().gate_reads_until_write = true;
        mock
    }

    /// Appends bytes to the scripted read buffer.
    pub fn push_read_data(&self, data: &[u8]) {
        self.state.lock().read_buf.extend_from_slice(data);
    }

    /// Snapshot of everything written so far.
    pub fn write_buf(&self) -> Vec<u8> {
        self.state.lock().write_buf.clone()
    }

    /// Whether scripted bytes remain to be read.
    pub fn bytes_available(&self) -> bool {
        let state = self.state.lock();
        state.read_index < state.read_buf.len()
    }

    /// Makes every subsequent write fail with [`Disconnected`].
    pub fn fail_writes(&self) {
        self.state.lock().fail_writes = true;
    }
}

impl Display for MockTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MockTransport{}",
            if self.state.lock().connected { " [*]" } else { "" }
        )
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), Error> {
        self.state.lock().connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.state.lock().connected = false;
        Ok(())
    }

    fn set_timeout(&mut self, _: Duration) -> Result<(), Error> {
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Error> {
        let mut state = self.state.lock();
        if state.gate_reads_until_write && state.write_buf.is_empty() {
            return Ok(None);
        }
        if state.read_index < state.read_buf.len() {
            let byte = state.read_buf[state.read_index];
            state.read_index += 1;
            Ok(Some(byte))
        } else {
            Ok(None)
        }
    }

    fn read_until(&mut self, delim: u8, _timeout: Duration) -> Result<Option<Vec<u8>>, Error> {
        let mut state = self.state.lock();
        let remaining = &state.read_buf[state.read_index..];
        match remaining.iter().position(|&byte| byte == delim) {
            Some(position) => {
                let collected = remaining[..=position].to_vec();
                state.read_index += position + 1;
                Ok(Some(collected))
            }
            None => Ok(None),
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(Disconnected);
        }
        state.write_buf.extend_from_slice(buf);
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
