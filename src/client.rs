//! The public client API: configuration, board discovery, pin-mode verbs,
//! read/write operations, one-shot queries, keep-alive and shutdown.

use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::errors::{Disconnected, Error, InvalidArgument, NoBoard, Timeout, VersionMismatch};
use crate::io::codec;
use crate::io::constants::*;
use crate::io::{
    invoke_callback, serial, IoData, PinValue, QueryRegistry, Report, ReportCallback, Serial,
    SonarEntry, SpiRequest, Tcp, Transport,
};
use crate::pause;
use crate::utils::task::{self, TaskHandler};

/// How long a one-shot query waits for its reply before failing with `Timeout`.
pub(crate) const QUERY_TIMEOUT: Duration = Duration::from_secs(4);

/// Constructor options for an [`ExpressClient`].
///
/// The defaults match a FirmataExpress sketch on an auto-detected serial port.
/// Set `com_port` to skip auto-discovery, or `ip_address` to reach a
/// StandardFirmataWifi board over TCP instead.
#[derive(Clone, Debug)]
pub struct ExpressConfig {
    /// Serial port to use, e.g. `COM3` or `/dev/ttyACM0`. `None` enables
    /// auto-discovery over all candidate ports.
    pub com_port: Option<String>,
    /// UART baud rate; must match the sketch on the board.
    pub baud_rate: u32,
    /// Instance id compiled into the FirmataExpress sketch; auto-discovery picks
    /// the first board answering with this id.
    pub arduino_instance_id: u8,
    /// Time to allow an opened board to finish its hardware reset.
    pub arduino_wait: Duration,
    /// Idle pause of the dispatcher between transport polls.
    pub sleep_tune: Duration,
    /// Remote host for a TCP-attached board; takes precedence over serial.
    pub ip_address: Option<String>,
    /// Remote port for a TCP-attached board.
    pub ip_port: u16,
    /// Shut the client down before surfacing a fatal startup/dispatch error.
    pub shutdown_on_exception: bool,
}

impl Default for ExpressConfig {
    fn default() -> Self {
        Self {
            com_port: None,
            baud_rate: serial::DEFAULT_BAUD_RATE,
            arduino_instance_id: 1,
            arduino_wait: Duration::from_secs(4),
            sleep_tune: Duration::from_micros(100),
            ip_address: None,
            ip_port: 3030,
            shutdown_on_exception: true,
        }
    }
}

/// An asynchronous client driving one Firmata board.
///
/// The client owns all board state; clones share it (the dispatcher task is a
/// clone reading the same transport). All verbs are non-blocking: they encode
/// the command, write it in one piece and return, while inbound reports flow
/// through the dispatcher into the state store and the registered callbacks.
#[derive(Clone)]
pub struct ExpressClient {
    /// Transport to the board; clones talk to the same connection.
    pub(crate) transport: Box<dyn Transport>,
    /// Shared board state (pins, registries, handshake results).
    pub(crate) data: Arc<RwLock<IoData>>,
    /// Rendezvous slots for one-shot queries.
    pub(crate) queries: Arc<Mutex<QueryRegistry>>,
    /// Handle to the dispatcher task.
    pub(crate) dispatcher: Arc<RwLock<Option<TaskHandler>>>,
    /// Handle to the keep-alive task.
    pub(crate) keep_alive_task: Arc<RwLock<Option<TaskHandler>>>,
    /// Observed by every task loop; set once by [`ExpressClient::shutdown`].
    pub(crate) shutdown_flag: Arc<AtomicBool>,
    /// Constructor options.
    pub(crate) config: ExpressConfig,
}

impl<T: Transport + 'static> From<T> for ExpressClient {
    fn from(transport: T) -> Self {
        Self::with_transport(Box::new(transport), ExpressConfig::default())
    }
}

impl ExpressClient {
    /// Wraps an already-constructed transport. No discovery or handshake is
    /// performed; most users want [`ExpressClient::connect`] instead.
    pub fn with_transport(transport: Box<dyn Transport>, config: ExpressConfig) -> Self {
        Self {
            transport,
            data: Arc::new(RwLock::new(IoData::default())),
            queries: Arc::new(Mutex::new(QueryRegistry::default())),
            dispatcher: Arc::new(RwLock::new(None)),
            keep_alive_task: Arc::new(RwLock::new(None)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Opens a connection to the board and performs the full startup sequence:
    /// transport selection (TCP, explicit serial port, or auto-discovery by
    /// instance id), dispatcher start, firmware check, analog-map driven pin
    /// table sizing and sampling-interval setup.
    ///
    /// # Errors
    /// * `NoBoard` - no candidate port answered with the configured instance id.
    /// * `VersionMismatch` - a FirmataExpress board reported an unsupported version.
    /// * `Timeout` - the board never answered the firmware or analog-map query.
    #[cfg(not(tarpaulin_include))]
    pub async fn connect(config: ExpressConfig) -> Result<Self, Error> {
        let mut client = if let Some(address) = config.ip_address.clone() {
            info!("connecting to {}:{}", address, config.ip_port);
            let mut transport = Tcp::new(address, config.ip_port);
            transport.open()?;
            Self::with_transport(Box::new(transport), config)
        } else if let Some(port) = config.com_port.clone() {
            Self::open_serial_port(port, config).await?
        } else {
            Self::find_arduino(config).await?
        };

        match client.initialize().await {
            Ok(()) => Ok(client),
            Err(failure) => {
                if client.config.shutdown_on_exception {
                    client.shutdown().await;
                }
                Err(failure)
            }
        }
    }

    /// Opens the serial port the user named, waits out the board reset, then
    /// verifies the instance id when the baud rate allows a FirmataExpress probe.
    #[cfg(not(tarpaulin_include))]
    async fn open_serial_port(port: String, config: ExpressConfig) -> Result<Self, Error> {
        info!("opening {} ...", port);
        let mut transport = Serial::new(&port, config.baud_rate);
        transport.open()?;
        let _ = transport.reset_input_buffer();
        info!(
            "waiting {:?} for the board to reset...",
            config.arduino_wait
        );
        tokio::time::sleep(config.arduino_wait).await;

        let mut client = Self::with_transport(Box::new(transport), config);
        if client.config.baud_rate == serial::DEFAULT_BAUD_RATE {
            client.verify_instance_id()?;
        }
        Ok(client)
    }

    /// Probes every candidate serial port with ARE_YOU_THERE and picks the first
    /// board whose I_AM_HERE reply carries the configured instance id.
    #[cfg(not(tarpaulin_include))]
    async fn find_arduino(config: ExpressConfig) -> Result<Self, Error> {
        info!(
            "probing serial ports for arduino_instance_id {}...",
            config.arduino_instance_id
        );
        let mut candidates: Vec<Serial> = Vec::new();
        for name in serial::available_port_names() {
            let mut transport = Serial::new(&name, config.baud_rate);
            if transport.open().is_err() {
                continue;
            }
            let _ = transport.reset_input_buffer();
            info!("  opened {}", name);
            candidates.push(transport);
        }

        // One shared reset window for all opened boards.
        info!(
            "waiting {:?} for the boards to reset...",
            config.arduino_wait
        );
        tokio::time::sleep(config.arduino_wait).await;

        for mut transport in candidates {
            let mut client = Self::with_transport(Box::new(transport.clone()), config.clone());
            match client.verify_instance_id() {
                Ok(()) => {
                    info!("board found on {}", transport.get_port());
                    return Ok(client);
                }
                Err(_) => {
                    let _ = transport.close();
                }
            }
        }
        Err(NoBoard {
            instance_id: config.arduino_instance_id,
        })
    }

    /// Sends ARE_YOU_THERE and expects `F0 52 <instance_id> F7` back.
    fn verify_instance_id(&mut self) -> Result<(), Error> {
        self.transport.write_bytes(&codec::encode_are_you_there())?;
        let reply = self
            .transport
            .read_until(END_SYSEX, Duration::from_secs(2))?;
        match reply {
            Some(frame)
                if frame.len() == 4
                    && frame[1] == I_AM_HERE
                    && frame[2] == self.config.arduino_instance_id =>
            {
                self.data.write().using_firmata_express = true;
                Ok(())
            }
            _ => Err(NoBoard {
                instance_id: self.config.arduino_instance_id,
            }),
        }
    }

    /// Post-transport startup: dispatcher, firmware check, pin tables, sampling.
    pub(crate) async fn initialize(&mut self) -> Result<(), Error> {
        self.start_dispatcher();

        let firmware = self.get_firmware_version().await?;
        if self.data.read().using_firmata_express
            && !firmware.starts_with(FIRMATA_EXPRESS_VERSION)
        {
            return Err(VersionMismatch {
                expected: FIRMATA_EXPRESS_VERSION,
                found: firmware,
            });
        }
        info!("firmware: {}", firmware);

        let report = self.get_analog_map().await?;
        {
            let mut lock = self.data.write();
            for &capability in &report {
                lock.digital_pins.push(Default::default());
                if capability != IGNORE {
                    lock.analog_pins.push(Default::default());
                }
            }
            lock.first_analog_pin = lock.digital_pins.len() - lock.analog_pins.len();
            lock.connected = true;
            info!(
                "auto-discovery complete: found {} digital and {} analog pins",
                lock.digital_pins.len(),
                lock.analog_pins.len()
            );
        }

        self.set_sampling_interval(19).await?;
        Ok(())
    }

    /// Easy access to the shared board state.
    pub fn get_io(&self) -> &Arc<RwLock<IoData>> {
        &self.data
    }

    /// Whether the startup handshake completed and no shutdown happened since.
    pub fn is_connected(&self) -> bool {
        self.data.read().connected && !self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Writes one complete message to the transport.
    pub(crate) fn write(&mut self, frame: &[u8]) -> Result<(), Error> {
        if self.shutdown_flag.load(Ordering::SeqCst) {
            return Err(Disconnected);
        }
        self.transport.write_bytes(frame)
    }

    // ########################################
    // Pin mode setters

    /// Sets a pin as a digital input; its reports flow to `callback`.
    pub async fn set_pin_mode_digital_input(
        &mut self,
        pin: u8,
        callback: Option<ReportCallback>,
    ) -> Result<(), Error> {
        self.set_pin_mode(pin, PinModeId::INPUT, callback, 0.0).await
    }

    /// Sets a pin as a digital input with the internal pull-up enabled.
    pub async fn set_pin_mode_digital_input_pullup(
        &mut self,
        pin: u8,
        callback: Option<ReportCallback>,
    ) -> Result<(), Error> {
        self.set_pin_mode(pin, PinModeId::PULLUP, callback, 0.0)
            .await
    }

    /// Sets a pin as a digital output.
    pub async fn set_pin_mode_digital_output(&mut self, pin: u8) -> Result<(), Error> {
        self.set_pin_mode(pin, PinModeId::OUTPUT, None, 0.0).await
    }

    /// Sets an analog channel (A2 is 2) as an input. The callback fires whenever
    /// the value moves by at least `differential`.
    pub async fn set_pin_mode_analog_input(
        &mut self,
        channel: u8,
        callback: Option<ReportCallback>,
        differential: u16,
    ) -> Result<(), Error> {
        self.set_pin_mode(channel, PinModeId::ANALOG, callback, differential as f64)
            .await
    }

    /// Sets a pin as a PWM output.
    pub async fn set_pin_mode_pwm_output(&mut self, pin: u8) -> Result<(), Error> {
        self.set_pin_mode(pin, PinModeId::PWM, None, 0.0).await
    }

    /// Configures a servo pin with its pulse range in microseconds.
    pub async fn set_pin_mode_servo(
        &mut self,
        pin: u8,
        min_pulse: u16,
        max_pulse: u16,
    ) -> Result<(), Error> {
        self.data.read().digital_pin(pin)?;
        self.write(&codec::encode_servo_config(pin, min_pulse, max_pulse))
    }

    /// Sets a PWM-capable pin to tone mode (FirmataExpress).
    pub async fn set_pin_mode_tone(&mut self, pin: u8) -> Result<(), Error> {
        self.set_pin_mode(pin, PinModeId::TONE, None, 0.0).await
    }

    /// Sets a pin to SPI mode (FirmataExpress).
    pub async fn set_pin_mode_spi(&mut self, pin: u8) -> Result<(), Error> {
        self.set_pin_mode(pin, PinModeId::SPI, None, 0.0).await
    }

    /// Initializes Firmata for I2C operations, with an optional delay (in
    /// microseconds) between writing a register and reading it back.
    ///
    /// Must be called before any other I2C request.
    pub async fn set_pin_mode_i2c(&mut self, read_delay: u16) -> Result<(), Error> {
        self.write(&codec::encode_i2c_config(read_delay))
    }

    /// Configures a DHT sensor (FirmataExpress). Re-configuring a pin already in
    /// the DHT table only updates its differential.
    ///
    /// `sensor_type` is 11 or 22, matching the DHT11/DHT22 families.
    pub async fn set_pin_mode_dht(
        &mut self,
        pin: u8,
        sensor_type: u8,
        differential: f32,
        callback: Option<ReportCallback>,
    ) -> Result<(), Error> {
        {
            let mut lock = self.data.write();
            if lock.dht_pins.contains(&pin) {
                lock.digital_pin_mut(pin)?.differential = differential as f64;
                return Ok(());
            }
            lock.dht_pins.push(pin);
            let record = lock.digital_pin_mut(pin)?;
            record.mode = PinModeId::DHT;
            record.callback = callback;
            record.differential = differential as f64;
            record.value = PinValue::Dht {
                humidity: 0.0,
                temperature: 0.0,
            };
        }
        self.write(&codec::encode_dht_config(pin, sensor_type))
    }

    /// Configures an HC-SR04 style sonar device (FirmataExpress). Distance
    /// changes are keyed by (and reported for) the trigger pin.
    ///
    /// At most six sonar devices are supported; a duplicate trigger pin is
    /// ignored. `timeout` is the firmware-side echo timeout in microseconds.
    pub async fn set_pin_mode_sonar(
        &mut self,
        trigger_pin: u8,
        echo_pin: u8,
        callback: Option<ReportCallback>,
        timeout: u16,
    ) -> Result<(), Error> {
        {
            let lock = self.data.read();
            if lock.sonar_map.contains_key(&trigger_pin) {
                return Ok(());
            }
            if lock.sonar_map.len() >= 6 {
                return Err(InvalidArgument {
                    context: String::from("maximum number of sonar devices (6) already assigned"),
                });
            }
        }
        self.set_pin_mode(trigger_pin, PinModeId::SONAR, None, 0.0)
            .await?;
        self.set_pin_mode(echo_pin, PinModeId::SONAR, None, 0.0)
            .await?;
        self.data.write().sonar_map.insert(
            trigger_pin,
            SonarEntry {
                callback,
                ..Default::default()
            },
        );
        self.write(&codec::encode_sonar_config(trigger_pin, echo_pin, timeout))
    }

    /// Configures a (single) stepper motor with either a 2 or 4 pin interface
    /// (FirmataExpress).
    pub async fn set_pin_mode_stepper(
        &mut self,
        steps_per_revolution: u16,
        pins: &[u8],
    ) -> Result<(), Error> {
        if pins.len() != 2 && pins.len() != 4 {
            return Err(InvalidArgument {
                context: format!("stepper interface needs 2 or 4 pins, got {}", pins.len()),
            });
        }
        self.write(&codec::encode_stepper_config(steps_per_revolution, pins))
    }

    /// Records the callback/differential, transmits SET_PIN_MODE (offsetting
    /// analog channels to their digital pin number), enables digital reporting
    /// for input modes, then yields briefly so the firmware settles.
    async fn set_pin_mode(
        &mut self,
        pin: u8,
        mode: PinModeId,
        callback: Option<ReportCallback>,
        differential: f64,
    ) -> Result<(), Error> {
        let wire_pin = {
            let mut lock = self.data.write();
            let first_analog_pin = lock.first_analog_pin as u8;
            match mode {
                PinModeId::INPUT | PinModeId::PULLUP => {
                    let record = lock.digital_pin_mut(pin)?;
                    record.mode = mode;
                    record.pull_up = mode == PinModeId::PULLUP;
                    record.callback = callback;
                    pin
                }
                PinModeId::ANALOG => {
                    let record = lock.analog_pin_mut(pin)?;
                    record.mode = mode;
                    record.callback = callback;
                    record.differential = differential;
                    pin + first_analog_pin
                }
                _ => {
                    let record = lock.digital_pin_mut(pin)?;
                    record.mode = mode;
                    if callback.is_some() {
                        warn!("set_pin_mode: callback ignored for pin mode {}", mode);
                    }
                    pin
                }
            }
        };

        self.write(&codec::encode_set_pin_mode(wire_pin, mode))?;
        if mode == PinModeId::INPUT || mode == PinModeId::PULLUP {
            self.write(&codec::encode_report_digital(pin / 8, true))?;
        }
        // Let the firmware settle before the next command.
        pause!(50);
        Ok(())
    }

    // ########################################
    // Reporting toggles

    /// Enables digital reporting for the whole port containing `pin`.
    pub async fn enable_digital_reporting(&mut self, pin: u8) -> Result<(), Error> {
        self.data.read().digital_pin(pin)?;
        self.write(&codec::encode_report_digital(pin / 8, true))
    }

    /// Disables digital reporting for the whole port containing `pin`.
    pub async fn disable_digital_reporting(&mut self, pin: u8) -> Result<(), Error> {
        self.data.read().digital_pin(pin)?;
        self.write(&codec::encode_report_digital(pin / 8, false))
    }

    /// Enables analog reporting for a single channel.
    pub async fn enable_analog_reporting(&mut self, channel: u8) -> Result<(), Error> {
        self.data.read().analog_pin(channel)?;
        self.write(&codec::encode_report_analog(channel, true))
    }

    /// Disables analog reporting for a single channel.
    pub async fn disable_analog_reporting(&mut self, channel: u8) -> Result<(), Error> {
        self.data.read().analog_pin(channel)?;
        self.write(&codec::encode_report_analog(channel, false))
    }

    // ########################################
    // Writes

    /// Sets a digital output pin through its port: the client-side port shadow
    /// is updated and the whole port mask is transmitted.
    pub async fn digital_write(&mut self, pin: u8, level: bool) -> Result<(), Error> {
        let (port, bits) = {
            let mut lock = self.data.write();
            lock.digital_pin(pin)?;
            let port = pin / 8;
            let mask = 1u8 << (pin % 8);
            let shadow = &mut lock.port_shadow[port as usize];
            if level {
                *shadow |= mask;
            } else {
                *shadow &= !mask;
            }
            (port, *shadow as u16)
        };
        self.write(&codec::encode_digital_message(port, bits))
    }

    /// Sets a single digital pin directly, bypassing the port shadow.
    pub async fn digital_pin_write(&mut self, pin: u8, level: bool) -> Result<(), Error> {
        self.data.read().digital_pin(pin)?;
        self.write(&codec::encode_set_digital_pin_value(pin, level))
    }

    /// Writes a PWM value; pins 16 and above go through the extended analog
    /// message.
    pub async fn pwm_write(&mut self, pin: u8, value: u16) -> Result<(), Error> {
        self.data.read().digital_pin(pin)?;
        if pin < 16 {
            self.write(&codec::encode_analog_message(pin, value))
        } else {
            self.write(&codec::encode_extended_analog(pin, value))
        }
    }

    /// Alias for [`ExpressClient::pwm_write`].
    pub async fn analog_write(&mut self, pin: u8, value: u16) -> Result<(), Error> {
        self.pwm_write(pin, value).await
    }

    /// Positions a servo previously configured with
    /// [`ExpressClient::set_pin_mode_servo`].
    pub async fn servo_write(&mut self, pin: u8, position: u16) -> Result<(), Error> {
        self.pwm_write(pin, position).await
    }

    /// Moves the stepper motor the given number of steps at `motor_speed`
    /// (21 bits); negative steps reverse the direction (FirmataExpress).
    pub async fn stepper_write(
        &mut self,
        motor_speed: u32,
        number_of_steps: i32,
    ) -> Result<(), Error> {
        let steps = number_of_steps.unsigned_abs();
        if steps > 0x3FFF {
            return Err(InvalidArgument {
                context: format!("number of steps {} exceeds 14 bits", number_of_steps),
            });
        }
        self.write(&codec::encode_stepper_step(
            motor_speed,
            steps as u16,
            number_of_steps > 0,
        ))
    }

    /// Plays a tone on the pin for `duration_ms` milliseconds (FirmataExpress).
    pub async fn play_tone(
        &mut self,
        pin: u8,
        frequency: u16,
        duration_ms: u16,
    ) -> Result<(), Error> {
        self.write(&codec::encode_tone(pin, frequency, duration_ms))
    }

    /// Plays a tone until [`ExpressClient::play_tone_off`] is called
    /// (FirmataExpress).
    pub async fn play_tone_continuously(&mut self, pin: u8, frequency: u16) -> Result<(), Error> {
        self.write(&codec::encode_tone(pin, frequency, 0))
    }

    /// Turns tone off for the pin (FirmataExpress).
    pub async fn play_tone_off(&mut self, pin: u8) -> Result<(), Error> {
        self.write(&codec::encode_tone_off(pin))
    }

    // ########################################
    // Polling reads

    /// Last reported level and its timestamp for a digital pin.
    pub async fn digital_read(&mut self, pin: u8) -> Result<(u16, Option<SystemTime>), Error> {
        let lock = self.data.read();
        let record = lock.digital_pin(pin)?;
        Ok((record.value.level(), record.event_time))
    }

    /// Last reported value and its timestamp for an analog channel.
    pub async fn analog_read(&mut self, channel: u8) -> Result<(u16, Option<SystemTime>), Error> {
        let lock = self.data.read();
        let record = lock.analog_pin(channel)?;
        Ok((record.value.level(), record.event_time))
    }

    /// Last humidity/temperature pair and its timestamp for a DHT pin.
    pub async fn dht_read(
        &mut self,
        pin: u8,
    ) -> Result<(f32, f32, Option<SystemTime>), Error> {
        let lock = self.data.read();
        let record = lock.digital_pin(pin)?;
        let (humidity, temperature) = record.value.dht();
        Ok((humidity, temperature, record.event_time))
    }

    /// Last distance (centimeters) and its timestamp for a sonar trigger pin.
    pub async fn sonar_read(
        &mut self,
        trigger_pin: u8,
    ) -> Result<(u16, Option<SystemTime>), Error> {
        let lock = self.data.read();
        let entry = lock.sonar_map.get(&trigger_pin).ok_or(InvalidArgument {
            context: format!("no sonar device configured on trigger pin {}", trigger_pin),
        })?;
        Ok((entry.value, entry.time_stamp))
    }

    /// Cached data bytes from the last reply of an I2C device, if any.
    pub async fn i2c_read_saved_data(
        &mut self,
        address: u16,
    ) -> Option<(Vec<u16>, Option<SystemTime>)> {
        let lock = self.data.read();
        let entry = lock.i2c_map.get(&address)?;
        entry
            .value
            .clone()
            .map(|value| (value, entry.time_stamp))
    }

    // ########################################
    // I2C

    /// Writes bytes to an I2C device.
    pub async fn i2c_write(&mut self, address: u8, data: &[u16]) -> Result<(), Error> {
        self.write(&codec::encode_i2c_write(address, data))
    }

    /// Reads `number_of_bytes` from a device register (pass `None` when the
    /// device needs no register selection). The reply lands in the I2C cache and
    /// on the callback.
    pub async fn i2c_read(
        &mut self,
        address: u8,
        register: Option<u16>,
        number_of_bytes: u16,
        callback: Option<ReportCallback>,
    ) -> Result<(), Error> {
        self.i2c_read_request(address, register, number_of_bytes, I2C_READ, callback)
            .await
    }

    /// Enables the continuous-read mode of devices that support streaming output.
    pub async fn i2c_read_continuous(
        &mut self,
        address: u8,
        register: Option<u16>,
        number_of_bytes: u16,
        callback: Option<ReportCallback>,
    ) -> Result<(), Error> {
        self.i2c_read_request(
            address,
            register,
            number_of_bytes,
            I2C_READ_CONTINUOUSLY,
            callback,
        )
        .await
    }

    /// Like [`ExpressClient::i2c_read`] but restarts the transmission after the
    /// read, as devices such as the MMA8452Q require.
    pub async fn i2c_read_restart_transmission(
        &mut self,
        address: u8,
        register: Option<u16>,
        number_of_bytes: u16,
        callback: Option<ReportCallback>,
    ) -> Result<(), Error> {
        self.i2c_read_request(
            address,
            register,
            number_of_bytes,
            I2C_READ | I2C_END_TX_MASK,
            callback,
        )
        .await
    }

    /// The callback is stored per device address: the latest reader for an
    /// address wins.
    async fn i2c_read_request(
        &mut self,
        address: u8,
        register: Option<u16>,
        number_of_bytes: u16,
        mode: u8,
        callback: Option<ReportCallback>,
    ) -> Result<(), Error> {
        {
            let mut lock = self.data.write();
            let entry = lock.i2c_map.entry(address as u16).or_default();
            entry.callback = callback;
        }
        self.write(&codec::encode_i2c_read_request(
            address,
            mode,
            register,
            number_of_bytes,
        ))
    }

    // ########################################
    // SPI (FirmataExpress)

    /// Initializes the SPI bus for the given channel. Must be called before any
    /// other SPI command.
    pub async fn spi_begin(&mut self, channel: u8) -> Result<(), Error> {
        Self::check_spi_channel(channel)?;
        self.write(&codec::encode_sysex(SPI_DATA, &[SPI_BEGIN, channel]))
    }

    /// Configures an attached SPI device before use. See the SPI SysEx proposal
    /// for the packing of `data_mode` (CPOL/CPHA), `bit_order` and chip-select
    /// handling.
    #[allow(clippy::too_many_arguments)]
    pub async fn spi_device_config(
        &mut self,
        device_id: u8,
        channel: u8,
        data_mode: u8,
        bit_order: u8,
        max_speed: u32,
        word_size: u8,
        cs_pin_control: bool,
        cs_active_state: u8,
        cs_pin: u8,
    ) -> Result<(), Error> {
        Self::check_spi_channel(channel)?;
        if device_id > 15 {
            return Err(InvalidArgument {
                context: format!("spi device id {} outside 0..=15", device_id),
            });
        }
        if data_mode > 3 {
            return Err(InvalidArgument {
                context: format!("spi data mode {} outside 0..=3", data_mode),
            });
        }
        self.write(&codec::encode_spi_device_config(
            device_id,
            channel,
            data_mode,
            bit_order,
            max_speed,
            word_size,
            cs_pin_control,
            cs_active_state,
            cs_pin,
        ))
    }

    /// Reads `number_of_words` words from the device. When no request id is
    /// available, the read fails synchronously: the callback receives an empty
    /// data report and nothing is transmitted.
    pub async fn spi_read(
        &mut self,
        device_id: u8,
        channel: u8,
        deselect_cs_pin: bool,
        number_of_words: u8,
        callback: ReportCallback,
    ) -> Result<(), Error> {
        let payload = [
            SPI_READ,
            (device_id << 3) | (channel & 0x07),
            0, // request id, patched below
            u8::from(deselect_cs_pin),
            number_of_words & 0x7F,
        ];
        self.spi_request(payload.to_vec(), callback, false).await
    }

    /// Writes bytes to the device, ignoring anything the device returns. The
    /// callback reports completion (`false` synchronously when no request id is
    /// available).
    pub async fn spi_write(
        &mut self,
        device_id: u8,
        channel: u8,
        deselect_cs_pin: bool,
        data: &[u8],
        callback: ReportCallback,
    ) -> Result<(), Error> {
        let mut payload = vec![
            SPI_WRITE,
            (device_id << 3) | (channel & 0x07),
            0,
            u8::from(deselect_cs_pin),
            data.len() as u8 & 0x7F,
        ];
        payload.extend(codec::pack_7bit(data));
        self.spi_request(payload, callback, true).await
    }

    /// Writes bytes while simultaneously reading one word per word written - the
    /// normal SPI transfer mode.
    pub async fn spi_transfer(
        &mut self,
        device_id: u8,
        channel: u8,
        deselect_cs_pin: bool,
        data: &[u8],
        callback: ReportCallback,
    ) -> Result<(), Error> {
        let mut payload = vec![
            SPI_TRANSFER,
            (device_id << 3) | (channel & 0x07),
            0,
            u8::from(deselect_cs_pin),
            data.len() as u8 & 0x7F,
        ];
        payload.extend(codec::pack_7bit(data));
        self.spi_request(payload, callback, false).await
    }

    /// Disables the SPI bus.
    pub async fn spi_end(&mut self) -> Result<(), Error> {
        self.write(&codec::encode_sysex(SPI_DATA, &[SPI_END]))
    }

    fn check_spi_channel(channel: u8) -> Result<(), Error> {
        if channel > 7 {
            return Err(InvalidArgument {
                context: format!("spi channel {} outside 0..=7", channel),
            });
        }
        Ok(())
    }

    /// Allocates a request id (scanning forward from the cursor, breaking at the
    /// first free one), patches it into the payload and transmits. With all 128
    /// ids outstanding the request fails synchronously through the callback.
    async fn spi_request(
        &mut self,
        mut payload: Vec<u8>,
        callback: ReportCallback,
        skip_read: bool,
    ) -> Result<(), Error> {
        let request_id = {
            let mut lock = self.data.write();
            let start = lock.next_spi_request_id;
            let mut allocated = None;
            for offset in 0..128u16 {
                let id = ((start as u16 + offset) % 128) as u8;
                if !lock.spi_requests.contains_key(&id) {
                    lock.spi_requests.insert(
                        id,
                        SpiRequest {
                            callback: callback.clone(),
                            skip_read,
                        },
                    );
                    lock.next_spi_request_id = ((id as u16 + 1) % 128) as u8;
                    allocated = Some(id);
                    break;
                }
            }
            allocated
        };

        let request_id = match request_id {
            Some(id) => id,
            None => {
                // All ids outstanding: report the failure without transmitting.
                let now = SystemTime::now();
                let report = if skip_read {
                    Report::SpiWrite {
                        success: false,
                        time_stamp: now,
                    }
                } else {
                    Report::SpiData {
                        data: Vec::new(),
                        time_stamp: now,
                    }
                };
                invoke_callback(callback, report).await;
                return Ok(());
            }
        };

        payload[2] = request_id;
        if let Err(failure) = self.write(&codec::encode_sysex(SPI_DATA, &payload)) {
            self.data.write().spi_requests.remove(&request_id);
            return Err(failure);
        }
        Ok(())
    }

    // ########################################
    // One-shot queries

    /// Firmware name and version, e.g. "2.5 StandardFirmata.ino". Served from
    /// cache once the board reported it.
    pub async fn get_firmware_version(&mut self) -> Result<String, Error> {
        {
            let lock = self.data.read();
            if !lock.firmware_version.is_empty() {
                return Ok(lock.firmware_version.clone());
            }
        }
        let receiver = self.queries.lock().firmware.arm();
        self.write(&codec::encode_sysex(REPORT_FIRMWARE, &[]))?;
        Self::await_reply(receiver, "get_firmware_version").await
    }

    /// Protocol version, e.g. "2.5". Served from cache once reported.
    pub async fn get_protocol_version(&mut self) -> Result<String, Error> {
        {
            let lock = self.data.read();
            if !lock.protocol_version.is_empty() {
                return Ok(lock.protocol_version.clone());
            }
        }
        let receiver = self.queries.lock().protocol.arm();
        self.write(&[REPORT_VERSION])?;
        Self::await_reply(receiver, "get_protocol_version").await
    }

    /// Analog mapping report: one byte per digital pin, 0x7F for pins without an
    /// analog channel. Cached after the first retrieval.
    pub async fn get_analog_map(&mut self) -> Result<Vec<u8>, Error> {
        let receiver = {
            let mut queries = self.queries.lock();
            if let Some(map) = queries.analog_map.latest() {
                return Ok(map);
            }
            queries.analog_map.arm()
        };
        self.write(&codec::encode_sysex(ANALOG_MAPPING_QUERY, &[]))?;
        Self::await_reply(receiver, "get_analog_map").await
    }

    /// Capability report: per pin, (mode, resolution) pairs terminated by 0x7F.
    /// Cached after the first retrieval.
    pub async fn get_capability_report(&mut self) -> Result<Vec<u8>, Error> {
        let receiver = {
            let mut queries = self.queries.lock();
            if let Some(report) = queries.capability.latest() {
                return Ok(report);
            }
            queries.capability.arm()
        };
        self.write(&codec::encode_sysex(CAPABILITY_QUERY, &[]))?;
        Self::await_reply(receiver, "get_capability_report").await
    }

    /// Current mode and state of one pin: `[pin, mode, state..]`.
    pub async fn get_pin_state(&mut self, pin: u8) -> Result<Vec<u8>, Error> {
        let receiver = self.queries.lock().pin_state.arm();
        self.write(&codec::encode_sysex(PIN_STATE_QUERY, &[pin]))?;
        Self::await_reply(receiver, "get_pin_state").await
    }

    async fn await_reply<T>(
        receiver: oneshot::Receiver<T>,
        operation: &'static str,
    ) -> Result<T, Error> {
        match tokio::time::timeout(QUERY_TIMEOUT, receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => Err(Timeout { operation }),
        }
    }

    // ########################################
    // Housekeeping

    /// Sets how often the firmware reports analog and continuous I2C data.
    pub async fn set_sampling_interval(&mut self, interval_ms: u16) -> Result<(), Error> {
        self.write(&codec::encode_sampling_interval(interval_ms))
    }

    /// Sends a SYSTEM_RESET to the board.
    pub async fn send_reset(&mut self) -> Result<(), Error> {
        self.write(&codec::encode_system_reset())
    }

    /// Periodically reassures a FirmataExpress board so it does not reset itself.
    ///
    /// A keep-alive goes out every `period - margin` seconds; `period` is
    /// 0..=10 seconds (0 cancels the task), `margin` 0.1..=0.9.
    pub async fn keep_alive(&mut self, period: f32, margin: f32) -> Result<(), Error> {
        if !(0.0..=10.0).contains(&period) {
            return Err(InvalidArgument {
                context: format!("keep-alive period {} outside 0..=10 seconds", period),
            });
        }
        if !(0.1..=0.9).contains(&margin) {
            return Err(InvalidArgument {
                context: format!("keep-alive margin {} outside 0.1..=0.9", margin),
            });
        }
        if let Some(current) = self.keep_alive_task.write().take() {
            current.abort();
        }
        if period == 0.0 {
            return Ok(());
        }
        if period <= margin {
            return Err(InvalidArgument {
                context: String::from("keep-alive margin must be smaller than the period"),
            });
        }

        let frame = codec::encode_keep_alive(period as u16);
        let interval = Duration::from_secs_f32(period - margin);
        let mut client = self.clone();
        *self.keep_alive_task.write() = Some(task::run(async move {
            while !client.shutdown_flag.load(Ordering::SeqCst) {
                client.write(&frame)?;
                tokio::time::sleep(interval).await;
            }
            Ok(())
        }));
        Ok(())
    }

    /// Orderly shutdown: disables all reporting, resets the board, closes the
    /// transport and cancels the background tasks. Idempotent; failures along
    /// the way are swallowed.
    pub async fn shutdown(&mut self) {
        if self.shutdown_flag.swap(true, Ordering::SeqCst) {
            return;
        }

        let (digital_count, analog_count) = {
            let lock = self.data.read();
            (lock.digital_pins.len(), lock.analog_pins.len())
        };
        for channel in 0..analog_count.min(16) {
            let _ = self
                .transport
                .write_bytes(&codec::encode_report_analog(channel as u8, false));
        }
        for port in 0..((digital_count + 7) / 8).min(16) {
            let _ = self
                .transport
                .write_bytes(&codec::encode_report_digital(port as u8, false));
        }
        let _ = self.transport.write_bytes(&codec::encode_system_reset());
        let _ = self.transport.reset_input_buffer();
        let _ = self.transport.close();

        if let Some(keep_alive) = self.keep_alive_task.write().take() {
            keep_alive.abort();
        }
        if let Some(dispatcher) = self.dispatcher.write().take() {
            dispatcher.abort();
        }
        self.data.write().connected = false;
    }
}

impl Debug for ExpressClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressClient")
            .field("transport", &self.transport)
            .field("connected", &self.is_connected())
            .field("config", &self.config)
            .finish()
    }
}

impl Display for ExpressClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        write!(
            f,
            "ExpressClient [firmware={}, protocol={}, transport={}]",
            data.firmware_version, data.protocol_version, self.transport
        )
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::io::{report_callback, PinRecord};
    use crate::mocks::MockTransport;

    fn test_client(mock: &MockTransport) -> ExpressClient {
        let client = ExpressClient::from(mock.clone());
        {
            let mut lock = client.data.write();
            for _ in 0..20 {
                lock.digital_pins.push(PinRecord::default());
            }
            for _ in 0..6 {
                lock.analog_pins.push(PinRecord::default());
            }
            lock.first_analog_pin = 14;
            lock.connected = true;
        }
        client
    }

    fn recorder() -> (ReportCallback, Arc<Mutex<Vec<Report>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback = report_callback(move |report| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().push(report);
                Ok(())
            }
        });
        (callback, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_pin_mode_digital_input() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        let (callback, _) = recorder();

        let result = client.set_pin_mode_digital_input(13, Some(callback)).await;
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(
            mock.write_buf(),
            vec![0xF4, 13, 0x00, 0xD1, 0x01],
            "pin mode then digital reporting for port 1"
        );

        let lock = client.data.read();
        let record = lock.digital_pin(13).unwrap();
        assert_eq!(record.mode, PinModeId::INPUT);
        assert!(!record.pull_up);
        assert!(record.callback.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_pin_mode_pullup() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client
            .set_pin_mode_digital_input_pullup(13, None)
            .await
            .unwrap();
        assert_eq!(mock.write_buf(), vec![0xF4, 13, 0x0B, 0xD1, 0x01]);
        assert!(client.data.read().digital_pin(13).unwrap().pull_up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_pin_mode_analog_input_offsets_the_wire_pin() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        let (callback, _) = recorder();

        client
            .set_pin_mode_analog_input(2, Some(callback), 5)
            .await
            .unwrap();
        // Channel 2 is digital pin 16 on this board.
        assert_eq!(mock.write_buf(), vec![0xF4, 16, 0x02]);

        let lock = client.data.read();
        let record = lock.analog_pin(2).unwrap();
        assert_eq!(record.differential, 5.0);
        assert!(record.callback.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_pin_mode_rejects_unknown_pins() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        assert!(client.set_pin_mode_digital_input(66, None).await.is_err());
        assert!(client.set_pin_mode_analog_input(6, None, 1).await.is_err());
        assert!(
            mock.write_buf().is_empty(),
            "nothing transmitted for rejected calls"
        );
    }

    #[tokio::test]
    async fn test_digital_write_updates_the_port_shadow() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.digital_write(13, true).await.unwrap();
        client.digital_write(8, true).await.unwrap();
        client.digital_write(13, false).await.unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![
                0x91, 0x20, 0x00, // pin 13 high
                0x91, 0x21, 0x00, // pin 8 high keeps pin 13
                0x91, 0x01, 0x00, // pin 13 low keeps pin 8
            ]
        );
        assert_eq!(client.data.read().port_shadow[1], 0x01);

        assert!(client.digital_write(66, true).await.is_err());
    }

    #[tokio::test]
    async fn test_digital_pin_write_bypasses_the_shadow() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.digital_pin_write(13, true).await.unwrap();
        assert_eq!(mock.write_buf(), vec![0xF5, 13, 1]);
        assert_eq!(client.data.read().port_shadow[1], 0, "shadow untouched");
    }

    #[tokio::test]
    async fn test_pwm_write_switches_to_extended_analog() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.pwm_write(3, 170).await.unwrap();
        client.pwm_write(19, 170).await.unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![
                0xE3, 0x2A, 0x01, // short form
                0xF0, 0x6F, 19, 0x2A, 0x01, 0x00, 0xF7, // extended form
            ]
        );
    }

    #[tokio::test]
    async fn test_servo_config_and_write() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.set_pin_mode_servo(8, 500, 2500).await.unwrap();
        client.servo_write(8, 90).await.unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![
                0xF0, 0x70, 0x08, 0x74, 0x03, 0x44, 0x13, 0xF7, // servo config
                0xE8, 0x5A, 0x00, // position 90
            ]
        );
    }

    #[tokio::test]
    async fn test_play_tone_frames() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.play_tone(3, 1000, 500).await.unwrap();
        client.play_tone_continuously(3, 440).await.unwrap();
        client.play_tone_off(3).await.unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![
                0xF0, 0x5F, 0x00, 0x03, 0x68, 0x07, 0x74, 0x03, 0xF7, // 1000 Hz for 500 ms
                0xF0, 0x5F, 0x00, 0x03, 0x38, 0x03, 0x00, 0x00, 0xF7, // 440 Hz continuous
                0xF0, 0x5F, 0x01, 0x03, 0xF7, // off
            ]
        );
    }

    #[tokio::test]
    async fn test_stepper_verbs() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.set_pin_mode_stepper(512, &[8, 9, 10, 11]).await.unwrap();
        client.stepper_write(1000, -200).await.unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![
                0xF0, 0x72, 0x00, 0x00, 0x04, 0x08, 0x09, 0x0A, 0x0B, 0xF7,
                0xF0, 0x72, 0x01, 0x68, 0x07, 0x00, 0x48, 0x01, 0x00, 0xF7, // dir=0: reverse
            ]
        );

        let result = client.set_pin_mode_stepper(512, &[8, 9, 10]).await;
        assert!(result.is_err());
        let result = client.stepper_write(1000, 20_000).await;
        assert!(result.is_err(), "steps must fit 14 bits");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sonar_configuration_and_limit() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        let (callback, _) = recorder();

        client
            .set_pin_mode_sonar(12, 11, Some(callback), 1000)
            .await
            .unwrap();
        assert!(client.data.read().sonar_map.contains_key(&12));
        let written = mock.write_buf();
        assert!(
            written.ends_with(&[0xF0, 0x62, 12, 11, 0x68, 0x07, 0xF7]),
            "sonar config frame after the two pin modes: {:02X?}",
            written
        );

        // A duplicate trigger pin is silently ignored.
        client.set_pin_mode_sonar(12, 11, None, 1000).await.unwrap();
        assert_eq!(client.data.read().sonar_map.len(), 1);

        // Six devices maximum.
        for trigger in [0u8, 2, 4, 6, 8] {
            client
                .set_pin_mode_sonar(trigger, trigger + 1, None, 1000)
                .await
                .unwrap();
        }
        let result = client.set_pin_mode_sonar(14, 15, None, 1000).await;
        assert!(result.is_err(), "{:?}", result);
        assert_eq!(client.data.read().sonar_map.len(), 6);
    }

    #[tokio::test]
    async fn test_i2c_read_replaces_the_address_callback() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        let (first, _) = recorder();
        let (second, _) = recorder();

        client.i2c_read(83, Some(50), 6, Some(first)).await.unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![0xF0, 0x76, 0x53, 0x08, 0x32, 0x00, 0x06, 0x00, 0xF7]
        );
        assert!(client.data.read().i2c_map.get(&83).unwrap().callback.is_some());

        // The latest reader for the address wins; the cache entry survives.
        client.i2c_read(83, Some(50), 6, Some(second)).await.unwrap();
        assert_eq!(client.data.read().i2c_map.len(), 1);
    }

    #[tokio::test]
    async fn test_i2c_housekeeping_frames() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.set_pin_mode_i2c(100).await.unwrap();
        client.i2c_write(0x40, &[0x01, 0x02]).await.unwrap();
        client
            .i2c_read_continuous(0x40, None, 4, None)
            .await
            .unwrap();
        client
            .i2c_read_restart_transmission(0x40, None, 4, None)
            .await
            .unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![
                0xF0, 0x78, 0x64, 0x00, 0xF7, // i2c config
                0xF0, 0x76, 0x40, 0x00, 0x01, 0x00, 0x02, 0x00, 0xF7, // write
                0xF0, 0x76, 0x40, 0x10, 0x04, 0x00, 0xF7, // continuous read
                0xF0, 0x76, 0x40, 0x48, 0x04, 0x00, 0xF7, // read + restart
            ]
        );
    }

    #[tokio::test]
    async fn test_spi_request_id_exhaustion_fails_synchronously() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        let (callback, seen) = recorder();

        for _ in 0..128 {
            client
                .spi_transfer(1, 0, true, &[0xAA], callback.clone())
                .await
                .unwrap();
        }
        assert_eq!(client.data.read().spi_requests.len(), 128);
        assert!(seen.lock().is_empty());
        let transmitted = mock.write_buf().len();

        // The 129th request finds no free id: synchronous failure, no bytes out.
        client
            .spi_transfer(1, 0, true, &[0xAA], callback.clone())
            .await
            .unwrap();
        match seen.lock().as_slice() {
            [Report::SpiData { data, .. }] => assert!(data.is_empty()),
            other => panic!("unexpected reports: {:?}", other),
        }
        assert_eq!(mock.write_buf().len(), transmitted);
    }

    #[tokio::test]
    async fn test_spi_ids_are_unique_and_reusable() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        let (callback, seen) = recorder();

        client
            .spi_read(1, 0, true, 4, callback.clone())
            .await
            .unwrap();
        assert!(client.data.read().spi_requests.contains_key(&0));
        assert_eq!(client.data.read().next_spi_request_id, 1);

        // The reply frees id 0 for reuse.
        client
            .dispatch(crate::io::codec::Message::SpiReply {
                request_id: 0,
                data: vec![1, 2, 3, 4],
            })
            .await;
        assert!(client.data.read().spi_requests.is_empty());
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_spi_frames_and_validation() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        let (callback, _) = recorder();

        client.spi_begin(0).await.unwrap();
        client
            .spi_write(1, 0, true, &[0xAB], callback.clone())
            .await
            .unwrap();
        client.spi_end().await.unwrap();
        assert_eq!(
            mock.write_buf(),
            vec![
                0xF0, 0x68, 0x00, 0x00, 0xF7, // begin channel 0
                0xF0, 0x68, 0x03, 0x08, 0x00, 0x01, 0x01, 0x2B, 0x01, 0xF7, // write
                0xF0, 0x68, 0x06, 0xF7, // end
            ]
        );

        assert!(client.spi_begin(8).await.is_err());
        assert!(client
            .spi_device_config(16, 0, 0, 1, 1_000_000, 8, true, 0, 10)
            .await
            .is_err());
        assert!(client
            .spi_device_config(1, 0, 4, 1, 1_000_000, 8, true, 0, 10)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_get_firmware_version_prefers_the_cache() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        client.data.write().firmware_version = String::from("1.2 FirmataExpress.ino");

        let version = client.get_firmware_version().await.unwrap();
        assert_eq!(version, "1.2 FirmataExpress.ino");
        assert!(mock.write_buf().is_empty(), "cache hit transmits nothing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        client.start_dispatcher();

        let result = client.get_pin_state(3).await;
        assert!(result.is_err());
        assert_eq!(
            result.err().unwrap().to_string(),
            "'get_pin_state' received no reply within the query timeout"
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_full_handshake() {
        // Replies stay invisible until the first query goes out, then the
        // dispatcher consumes them as a board would produce them.
        let mut script: Vec<u8> = vec![0xF0, 0x79, 2, 5, b'S', 0x00, b'F', 0x00, 0xF7];
        script.extend_from_slice(&[0xF0, 0x6A]);
        script.extend_from_slice(&[0x7F; 14]);
        script.extend_from_slice(&[0, 1, 2, 3, 4, 5, 0xF7]);
        let mock = MockTransport::gated(&script);
        let mut client = ExpressClient::from(mock.clone());

        let result = client.initialize().await;
        assert!(result.is_ok(), "{:?}", result);

        {
            let lock = client.data.read();
            assert_eq!(lock.firmware_version, "2.5 SF");
            assert_eq!(lock.digital_pins.len(), 20);
            assert_eq!(lock.analog_pins.len(), 6);
            assert_eq!(lock.first_analog_pin, 14);
            assert!(lock.connected);
        }
        assert!(client.is_connected());

        // Startup ends by configuring the 19 ms sampling interval.
        assert!(mock
            .write_buf()
            .ends_with(&[0xF0, 0x7A, 0x13, 0x00, 0xF7]));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_rejects_wrong_express_version() {
        let mock = MockTransport::gated(&[0xF0, 0x79, 2, 5, b'S', 0x00, b'F', 0x00, 0xF7]);
        let mut client = ExpressClient::from(mock.clone());
        client.data.write().using_firmata_express = true;

        let result = client.initialize().await;
        assert!(result.is_err());
        assert!(matches!(
            result.err().unwrap(),
            Error::VersionMismatch { .. }
        ));

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_sends_periodically() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        client.keep_alive(2.0, 0.5).await.unwrap();
        assert!(client.keep_alive_task.read().is_some());
        crate::pause!(100);
        assert!(
            mock.write_buf().starts_with(&[0xF0, 0x50, 0x02, 0x00, 0xF7]),
            "first keep-alive goes out immediately: {:02X?}",
            mock.write_buf()
        );

        // Period 0 cancels the task.
        client.keep_alive(0.0, 0.5).await.unwrap();
        assert!(client.keep_alive_task.read().is_none());
    }

    #[tokio::test]
    async fn test_keep_alive_validation() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);

        assert!(client.keep_alive(11.0, 0.3).await.is_err());
        assert!(client.keep_alive(-1.0, 0.3).await.is_err());
        assert!(client.keep_alive(1.0, 0.05).await.is_err());
        assert!(client.keep_alive(1.0, 0.95).await.is_err());
        assert!(client.keep_alive(0.5, 0.9).await.is_err(), "margin >= period");
        assert!(mock.write_buf().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        client.start_dispatcher();

        client.shutdown().await;
        assert!(!client.is_connected());
        let written = mock.write_buf();
        assert!(written.contains(&0xFF), "system reset sent: {:02X?}", written);

        // Verbs refuse to transmit from now on.
        assert!(matches!(
            client.digital_write(13, true).await,
            Err(Error::Disconnected)
        ));

        // A second shutdown changes nothing.
        let length = mock.write_buf().len();
        client.shutdown().await;
        assert_eq!(mock.write_buf().len(), length);
    }

    #[tokio::test]
    async fn test_polling_reads() {
        let mock = MockTransport::default();
        let mut client = test_client(&mock);
        {
            let mut lock = client.data.write();
            lock.digital_pin_mut(13).unwrap().value = PinValue::Level(1);
            lock.analog_pin_mut(2).unwrap().value = PinValue::Level(512);
        }

        assert_eq!(client.digital_read(13).await.unwrap().0, 1);
        assert_eq!(client.analog_read(2).await.unwrap().0, 512);
        assert!(client.digital_read(66).await.is_err());
        assert!(client.sonar_read(12).await.is_err(), "no sonar configured");
        assert_eq!(client.i2c_read_saved_data(83).await, None);
    }

    #[test]
    fn test_debug_and_display() {
        let mock = MockTransport::default();
        let client = ExpressClient::from(mock);
        assert_eq!(
            format!("{}", client),
            "ExpressClient [firmware=, protocol=, transport=MockTransport]"
        );
        assert!(format!("{:?}", client).contains("ExpressClient"));
    }
}
