use std::fmt::{Display, Formatter};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::{Disconnected, Error};
use crate::io::Transport;

const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A [`Transport`] over a raw TCP socket, for boards running StandardFirmataWifi
/// or an equivalent network-attached sketch.
///
/// Datagram boundaries are irrelevant: the framer upstream reassembles messages
/// from the byte stream.
#[derive(Clone, Debug)]
pub struct Tcp {
    /// Remote host name or IP address.
    address: String,
    /// Remote TCP port.
    port: u16,
    /// The connected stream, shared by all clones of this transport.
    io: Arc<Mutex<Option<TcpStream>>>,
}

impl Tcp {
    /// Constructs a new `Tcp` transport for the specified address and port.
    pub fn new<A: Into<String>>(address: A, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            io: Arc::new(Mutex::new(None)),
        }
    }
}

impl Display for Tcp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tcp({}:{}{})",
            self.address,
            self.port,
            if self.io.lock().is_some() { " [*]" } else { "" }
        )
    }
}

impl Transport for Tcp {
    fn open(&mut self) -> Result<(), Error> {
        let stream = TcpStream::connect((self.address.as_str(), self.port))?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        *self.io.lock() = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(stream) = self.io.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn set_timeout(&mut self, duration: Duration) -> Result<(), Error> {
        self.io
            .lock()
            .as_mut()
            .ok_or(Disconnected)?
            .set_read_timeout(Some(duration))?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Error> {
        let mut lock = self.io.lock();
        let stream = lock.as_mut().ok_or(Disconnected)?;
        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            // A zero-length read on TCP means the peer closed the stream.
            Ok(0) => Err(Disconnected),
            Ok(_) => Ok(Some(buf[0])),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_until(&mut self, delim: u8, timeout: Duration) -> Result<Option<Vec<u8>>, Error> {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        while Instant::now() < deadline {
            match self.read_byte()? {
                Some(byte) => {
                    collected.push(byte);
                    if byte == delim {
                        return Ok(Some(collected));
                    }
                }
                None => continue,
            }
        }
        Ok(None)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut lock = self.io.lock();
        lock.as_mut().ok_or(Disconnected)?.write_all(buf)?;
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), Error> {
        // Drain whatever is already buffered; a timeout marks the buffer empty.
        while self.read_byte()?.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tcp_transport() {
        let transport = Tcp::new("192.168.1.50", 3030);
        assert_eq!(transport.address, "192.168.1.50");
        assert_eq!(transport.port, 3030);
        assert!(transport.io.lock().is_none());
    }

    #[test]
    fn test_unopened_tcp_errors() {
        let mut transport = Tcp::new("192.168.1.50", 3030);
        assert!(transport.read_byte().is_err());
        assert!(transport.write_bytes(&[1, 2, 3]).is_err());
        assert!(transport.set_timeout(Duration::from_secs(1)).is_err());
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_display_tcp_transport() {
        let transport = Tcp::new("192.168.1.50", 3030);
        assert_eq!(format!("{}", transport), "Tcp(192.168.1.50:3030)");
    }
}
