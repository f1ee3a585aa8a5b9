//! Client-side image of the board state.
//!
//! One [`IoData`] lives behind an `Arc<RwLock<_>>` owned by the client; the
//! dispatcher task mutates it as reports arrive and the public API reads it for
//! the polling getters (`digital_read`, `analog_read`, ...).

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::errors::Error;
use crate::io::constants::PinModeId;

/// A report forwarded to a user callback. The variant mirrors the pin mode that
/// produced it; every variant carries the wall-clock time of the observation.
#[derive(Clone, Debug)]
pub enum Report {
    /// A digital input (or pullup input) pin changed level.
    Digital {
        pin_type: PinModeId,
        pin: u8,
        level: u8,
        time_stamp: SystemTime,
    },
    /// An analog channel moved by at least its differential.
    Analog {
        channel: u8,
        value: u16,
        time_stamp: SystemTime,
    },
    /// An I2C device answered a read request.
    I2c {
        address: u16,
        register: u16,
        data: Vec<u16>,
        time_stamp: SystemTime,
    },
    /// A sonar device reported a new distance (centimeters).
    Sonar {
        trigger_pin: u8,
        distance_cm: u16,
        time_stamp: SystemTime,
    },
    /// A DHT sensor produced a reading.
    Dht {
        pin: u8,
        dht_type: u8,
        validation: u8,
        humidity: f32,
        temperature: f32,
        time_stamp: SystemTime,
    },
    /// Bytes returned by an SPI read or transfer; empty when the request could
    /// not be issued.
    SpiData {
        data: Vec<u8>,
        time_stamp: SystemTime,
    },
    /// Completion status of an SPI write request.
    SpiWrite {
        success: bool,
        time_stamp: SystemTime,
    },
}

/// An async user callback invoked by the dispatcher.
pub type ReportCallback =
    Arc<dyn Fn(Report) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Boxes an async closure into a [`ReportCallback`].
///
/// # Example
/// ```
/// use firmata_express::io::{report_callback, Report};
///
/// let callback = report_callback(|report: Report| async move {
///     println!("{:?}", report);
///     Ok(())
/// });
/// ```
pub fn report_callback<F, Fut>(callback: F) -> ReportCallback
where
    F: Fn(Report) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |report| callback(report).boxed())
}

/// Awaits a user callback, logging (not propagating) its failure.
pub(crate) async fn invoke_callback(callback: ReportCallback, report: Report) {
    if let Err(error) = callback(report).await {
        log::warn!("user callback failed: {}", error);
    }
}

// ########################################

/// Last value reported for a pin. DHT pins carry a humidity/temperature pair,
/// every other mode a plain level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PinValue {
    Level(u16),
    Dht { humidity: f32, temperature: f32 },
}

impl Default for PinValue {
    fn default() -> Self {
        PinValue::Level(0)
    }
}

impl PinValue {
    /// The plain level, 0 for a DHT pair.
    pub fn level(&self) -> u16 {
        match self {
            PinValue::Level(value) => *value,
            PinValue::Dht { .. } => 0,
        }
    }

    /// The humidity/temperature pair, zeros for a plain level.
    pub fn dht(&self) -> (f32, f32) {
        match self {
            PinValue::Level(_) => (0.0, 0.0),
            PinValue::Dht {
                humidity,
                temperature,
            } => (*humidity, *temperature),
        }
    }
}

/// Per-pin record: last reported value, configured mode and the callback wiring.
#[derive(Clone, Default)]
pub struct PinRecord {
    /// Last value reported by the firmware for this pin.
    pub value: PinValue,
    /// Wall-clock time of the last accepted report.
    pub event_time: Option<SystemTime>,
    /// Currently configured mode.
    pub mode: PinModeId,
    /// Distinguishes PULLUP from INPUT in callback payloads.
    pub pull_up: bool,
    /// Minimum absolute change between readings required to fire the callback.
    pub differential: f64,
    /// Optional async user callback.
    pub callback: Option<ReportCallback>,
}

impl Debug for PinRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinRecord")
            .field("value", &self.value)
            .field("event_time", &self.event_time)
            .field("mode", &self.mode)
            .field("pull_up", &self.pull_up)
            .field("differential", &self.differential)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Cached data for one I2C device address.
#[derive(Clone, Default)]
pub struct I2cEntry {
    /// Last data bytes returned by the device (address/register stripped).
    pub value: Option<Vec<u16>>,
    /// Wall-clock time of the last reply.
    pub time_stamp: Option<SystemTime>,
    /// Callback fired on every reply for this address. Reconfiguring the address
    /// replaces the previous callback.
    pub callback: Option<ReportCallback>,
}

impl Debug for I2cEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I2cEntry")
            .field("value", &self.value)
            .field("time_stamp", &self.time_stamp)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// State for one sonar device, keyed by its trigger pin.
#[derive(Clone, Default)]
pub struct SonarEntry {
    /// Callback fired when the measured distance changes.
    pub callback: Option<ReportCallback>,
    /// Last distance reported, in centimeters.
    pub value: u16,
    /// Wall-clock time of the last change.
    pub time_stamp: Option<SystemTime>,
}

impl Debug for SonarEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SonarEntry")
            .field("value", &self.value)
            .field("time_stamp", &self.time_stamp)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// An outstanding SPI request awaiting its reply, keyed by a 7-bit request id.
#[derive(Clone)]
pub struct SpiRequest {
    /// Callback receiving the reply (or the synchronous failure report).
    pub callback: ReportCallback,
    /// Write requests report completion instead of data.
    pub skip_read: bool,
}

impl Debug for SpiRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpiRequest")
            .field("skip_read", &self.skip_read)
            .finish()
    }
}

// ########################################

/// Represents the internal data the client tracks for the attached board.
#[derive(Clone, Debug, Default)]
pub struct IoData {
    /// One record per firmware pin number.
    pub digital_pins: Vec<PinRecord>,
    /// One record per analog channel (A0, A1, ...).
    pub analog_pins: Vec<PinRecord>,
    /// Digital index of analog channel 0; `digital_pins.len() - analog_pins.len()`.
    pub first_analog_pin: usize,
    /// Shadow of the last commanded output level per digital port; bit `p` of
    /// byte `b` is pin `8*b + p`. Mutated only by `digital_write`.
    pub port_shadow: [u8; 16],
    /// Cached I2C data and callbacks, keyed by device address.
    pub i2c_map: HashMap<u16, I2cEntry>,
    /// Active sonar devices keyed by trigger pin; at most six entries.
    pub sonar_map: HashMap<u8, SonarEntry>,
    /// Pins already configured for a DHT device.
    pub dht_pins: Vec<u8>,
    /// Outstanding SPI requests keyed by request id.
    pub spi_requests: HashMap<u8, SpiRequest>,
    /// Next SPI request id candidate, advanced modulo 128.
    pub next_spi_request_id: u8,
    /// Firmware name and version as reported, e.g. "1.2 FirmataExpress.ino".
    pub firmware_version: String,
    /// Protocol version as reported, e.g. "2.5".
    pub protocol_version: String,
    /// Whether the board answered an ARE_YOU_THERE probe (FirmataExpress).
    pub using_firmata_express: bool,
    /// Whether the client finished its handshake and is operational.
    pub connected: bool,
}

impl IoData {
    /// Retrieves a digital pin record by its firmware pin number.
    ///
    /// # Errors
    /// * `InvalidArgument` - the pin number is out of bounds.
    pub fn digital_pin(&self, pin: u8) -> Result<&PinRecord, Error> {
        self.digital_pins
            .get(pin as usize)
            .ok_or_else(|| unknown_pin("digital", pin))
    }

    /// Mutable variant of [`IoData::digital_pin`].
    pub fn digital_pin_mut(&mut self, pin: u8) -> Result<&mut PinRecord, Error> {
        self.digital_pins
            .get_mut(pin as usize)
            .ok_or_else(|| unknown_pin("digital", pin))
    }

    /// Retrieves an analog pin record by its channel number (A2 is 2).
    ///
    /// # Errors
    /// * `InvalidArgument` - the channel number is out of bounds.
    pub fn analog_pin(&self, channel: u8) -> Result<&PinRecord, Error> {
        self.analog_pins
            .get(channel as usize)
            .ok_or_else(|| unknown_pin("analog", channel))
    }

    /// Mutable variant of [`IoData::analog_pin`].
    pub fn analog_pin_mut(&mut self, channel: u8) -> Result<&mut PinRecord, Error> {
        self.analog_pins
            .get_mut(channel as usize)
            .ok_or_else(|| unknown_pin("analog", channel))
    }
}

fn unknown_pin(kind: &str, pin: u8) -> Error {
    Error::InvalidArgument {
        context: format!("unknown {} pin {}", kind, pin),
    }
}

// ########################################

/// Rendezvous slot for one kind of one-shot query.
///
/// The requestor arms the slot before sending its query and awaits the receiver;
/// the dispatcher resolves it when the matching response arrives. Replies with no
/// waiter are parked in `latest` so an early answer is not lost.
pub(crate) struct QuerySlot<T> {
    waiter: Option<oneshot::Sender<T>>,
    latest: Option<T>,
}

impl<T> Default for QuerySlot<T> {
    fn default() -> Self {
        Self {
            waiter: None,
            latest: None,
        }
    }
}

impl<T: Clone> QuerySlot<T> {
    /// Clears any stale reply and registers a fresh waiter.
    pub(crate) fn arm(&mut self) -> oneshot::Receiver<T> {
        self.latest = None;
        let (sender, receiver) = oneshot::channel();
        self.waiter = Some(sender);
        receiver
    }

    /// Hands a reply to the armed waiter (if any) and caches it.
    pub(crate) fn resolve(&mut self, value: T) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(value.clone());
        }
        self.latest = Some(value);
    }

    /// Peeks at the cached reply without consuming it.
    pub(crate) fn latest(&self) -> Option<T> {
        self.latest.clone()
    }
}

/// One rendezvous slot per one-shot query kind.
#[derive(Default)]
pub(crate) struct QueryRegistry {
    pub(crate) firmware: QuerySlot<String>,
    pub(crate) protocol: QuerySlot<String>,
    pub(crate) analog_map: QuerySlot<Vec<u8>>,
    pub(crate) capability: QuerySlot<Vec<u8>>,
    pub(crate) pin_state: QuerySlot<Vec<u8>>,
}
