use std::fmt::{Display, Formatter};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::errors::{Disconnected, Error};
use crate::io::Transport;

/// Default UART baud rate matching the FirmataExpress sketch.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Read timeout applied to the port once open; the dispatcher polls at this pace.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A [`Transport`] over a UART, 8N1 framing.
///
/// Uses the [serialport](https://crates.io/crates/serialport) crate.
#[derive(Clone, Debug)]
pub struct Serial {
    /// The connection port, e.g. `COM3` or `/dev/ttyACM0`.
    port: String,
    /// UART baud rate.
    baud_rate: u32,
    /// A Read/Write io object, shared by all clones of this transport.
    io: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
}

impl Serial {
    /// Constructs a new `Serial` transport for the specified port.
    pub fn new<P: Into<String>>(port: P, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            io: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the configured port.
    pub fn get_port(&self) -> String {
        self.port.clone()
    }
}

/// Lists the names of serial ports that look like an attached board (USB only,
/// mirroring the auto-discovery filter).
#[cfg(not(tarpaulin_include))]
pub fn available_port_names() -> Vec<String> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .filter(|port| matches!(port.port_type, serialport::SerialPortType::UsbPort(_)))
        .map(|port| port.port_name)
        .collect()
}

impl Display for Serial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Serial({}{})",
            self.port,
            if self.io.lock().is_some() { " [*]" } else { "" }
        )
    }
}

impl Transport for Serial {
    #[cfg(not(tarpaulin_include))]
    fn open(&mut self) -> Result<(), Error> {
        let connexion = serialport::new(self.port.clone(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;

        *self.io.lock() = Some(connexion);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        *self.io.lock() = None;
        Ok(())
    }

    fn set_timeout(&mut self, duration: Duration) -> Result<(), Error> {
        self.io
            .lock()
            .as_mut()
            .ok_or(Disconnected)?
            .set_timeout(duration)?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Error> {
        let mut lock = self.io.lock();
        let port = lock.as_mut().ok_or(Disconnected)?;
        let mut buf = [0u8; 1];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
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
        self.io
            .lock()
            .as_mut()
            .ok_or(Disconnected)?
            .clear(ClearBuffer::Input)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_serial_transport() {
        let transport = Serial::new("/dev/ttyACM0", DEFAULT_BAUD_RATE);
        assert_eq!(transport.get_port(), "/dev/ttyACM0");
        assert_eq!(transport.baud_rate, 115_200);
        assert!(transport.io.lock().is_none());
    }

    #[test]
    fn test_unopened_serial_errors() {
        let mut transport = Serial::new("/dev/ttyACM0", DEFAULT_BAUD_RATE);
        assert!(transport.read_byte().is_err());
        assert!(transport.write_bytes(&[1, 2, 3]).is_err());
        assert!(transport.set_timeout(Duration::from_secs(1)).is_err());
        assert!(transport.reset_input_buffer().is_err());
        // Closing a never-opened transport is harmless.
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_display_serial_transport() {
        let transport = Serial::new("/dev/ttyACM0", DEFAULT_BAUD_RATE);
        assert_eq!(format!("{}", transport), "Serial(/dev/ttyACM0)");
    }

    #[test]
    fn test_clones_share_the_connection() {
        let transport = Serial::new("/dev/ttyACM0", DEFAULT_BAUD_RATE);
        let clone = transport.clone();
        assert!(Arc::ptr_eq(&transport.io, &clone.io));
    }
}
