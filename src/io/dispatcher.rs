//! Framer and dispatcher: pulls bytes off the transport, reassembles whole
//! Firmata messages and routes each one to its handler.
//!
//! The dispatcher runs as a single long-lived task, so handlers never race each
//! other: state updates and user callbacks for one message complete before the
//! next byte is consumed. A slow callback therefore backpressures straight into
//! the transport buffer instead of an unbounded queue.

use std::sync::atomic::Ordering;
use std::time::SystemTime;

use log::{debug, error, info, trace};

use crate::client::ExpressClient;
use crate::errors::Error;
use crate::io::codec::{self, Classified, Message};
use crate::io::constants::*;
use crate::io::{invoke_callback, PinValue, Report, ReportCallback};
use crate::utils::task;

impl ExpressClient {
    /// Performs one framing step: classifies the next inbound byte, pulls the
    /// rest of its message and decodes it.
    ///
    /// Returns `Ok(None)` when the transport timed out without data (or shutdown
    /// was requested mid-frame), and for bytes that match no classifier - those
    /// are dropped so the stream re-synchronizes on the next command byte.
    pub(crate) fn read_and_decode(&mut self) -> Result<Option<Message>, Error> {
        let first = match self.transport.read_byte()? {
            Some(byte) => byte,
            None => return Ok(None),
        };

        match codec::classify(first) {
            Classified::SysexStart => {
                let mut frame = Vec::new();
                loop {
                    match self.next_data_byte()? {
                        Some(byte) => {
                            frame.push(byte);
                            if byte == END_SYSEX {
                                break;
                            }
                        }
                        None => return Ok(None),
                    }
                }
                Ok(codec::decode_sysex(&frame))
            }
            Classified::Analog(channel) => Ok(self.two_data_bytes()?.map(|(lsb, msb)| {
                Message::Analog {
                    channel,
                    value: codec::decode_u14(lsb, msb),
                }
            })),
            Classified::Digital(port) => Ok(self.two_data_bytes()?.map(|(lsb, msb)| {
                Message::Digital {
                    port,
                    bits: codec::decode_u14(lsb, msb),
                }
            })),
            Classified::ReportVersion => Ok(self
                .two_data_bytes()?
                .map(|(major, minor)| Message::ProtocolVersion { major, minor })),
            Classified::Unknown => {
                trace!("framer: discarding unexpected byte 0x{:02X}", first);
                Ok(None)
            }
        }
    }

    /// Blocks (bounded by the transport read timeout) until the next byte of the
    /// current message; bails out with `None` once shutdown is requested.
    fn next_data_byte(&mut self) -> Result<Option<u8>, Error> {
        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(byte) = self.transport.read_byte()? {
                return Ok(Some(byte));
            }
        }
    }

    fn two_data_bytes(&mut self) -> Result<Option<(u8, u8)>, Error> {
        let Some(lsb) = self.next_data_byte()? else {
            return Ok(None);
        };
        let Some(msb) = self.next_data_byte()? else {
            return Ok(None);
        };
        Ok(Some((lsb, msb)))
    }

    /// Routes one decoded message to its handler: updates the state store,
    /// resolves pending queries and awaits user callbacks.
    pub(crate) async fn dispatch(&self, message: Message) {
        match message {
            Message::Analog { channel, value } => self.handle_analog(channel, value).await,
            Message::Digital { port, bits } => self.handle_digital(port, bits).await,
            Message::ProtocolVersion { major, minor } => {
                let version = format!("{}.{}", major, minor);
                self.data.write().protocol_version = version.clone();
                self.queries.lock().protocol.resolve(version);
            }
            Message::FirmwareReport { version } => {
                self.data.write().firmware_version = version.clone();
                self.queries.lock().firmware.resolve(version);
            }
            Message::CapabilityResponse { payload } => {
                self.queries.lock().capability.resolve(payload);
            }
            Message::AnalogMappingResponse { map } => {
                self.queries.lock().analog_map.resolve(map);
            }
            Message::PinStateResponse { payload } => {
                self.queries.lock().pin_state.resolve(payload);
            }
            Message::I2cReply {
                address,
                register,
                data,
            } => self.handle_i2c_reply(address, register, data).await,
            Message::SonarData { pin, value } => self.handle_sonar_data(pin, value).await,
            Message::DhtData {
                pin,
                dht_type,
                validation,
                humidity,
                temperature,
            } => {
                self.handle_dht_data(pin, dht_type, validation, humidity, temperature)
                    .await
            }
            Message::SpiReply { request_id, data } => {
                self.handle_spi_reply(request_id, data).await
            }
            Message::StringData { text } => info!("board: {}", text),
            Message::IAmHere { instance_id } => {
                debug!("board announced instance id {}", instance_id)
            }
        }
    }

    /// A new analog value is stored (and its callback fired) only when it moved
    /// by at least the channel's differential.
    async fn handle_analog(&self, channel: u8, value: u16) {
        let mut fire: Option<(ReportCallback, Report)> = None;
        {
            let mut lock = self.data.write();
            // Traffic for channels outside the table (pre-discovery) is dropped.
            if let Ok(record) = lock.analog_pin_mut(channel) {
                let last = record.value.level();
                if (value as f64 - last as f64).abs() >= record.differential {
                    let now = SystemTime::now();
                    record.value = PinValue::Level(value);
                    record.event_time = Some(now);
                    if let Some(callback) = record.callback.clone() {
                        fire = Some((
                            callback,
                            Report::Analog {
                                channel,
                                value,
                                time_stamp: now,
                            },
                        ));
                    }
                }
            }
        }
        if let Some((callback, report)) = fire {
            invoke_callback(callback, report).await;
        }
    }

    /// Walks the up-to-8 pins of a digital port; every pin stores its level, a
    /// callback fires only for pins whose level actually changed.
    async fn handle_digital(&self, port: u8, bits: u16) {
        let mut fires: Vec<(ReportCallback, Report)> = Vec::new();
        {
            let mut lock = self.data.write();
            let start = port as usize * 8;
            let count = lock.digital_pins.len();
            let mut bits = bits;
            for offset in 0..8 {
                let pin = start + offset;
                if pin >= count {
                    break;
                }
                let level = bits & 0x01;
                let record = &mut lock.digital_pins[pin];
                let last = record.value.level();
                let now = SystemTime::now();
                record.value = PinValue::Level(level);
                record.event_time = Some(now);
                if last != level {
                    if let Some(callback) = record.callback.clone() {
                        let pin_type = if record.pull_up {
                            PinModeId::PULLUP
                        } else {
                            PinModeId::INPUT
                        };
                        fires.push((
                            callback,
                            Report::Digital {
                                pin_type,
                                pin: pin as u8,
                                level: level as u8,
                                time_stamp: now,
                            },
                        ));
                    }
                }
                bits >>= 1;
            }
        }
        for (callback, report) in fires {
            invoke_callback(callback, report).await;
        }
    }

    /// Caches the reply under its device address and forwards it to the
    /// registered callback. Replies for unconfigured addresses are dropped.
    async fn handle_i2c_reply(&self, address: u16, register: u16, data: Vec<u16>) {
        let mut fire: Option<(ReportCallback, Report)> = None;
        {
            let mut lock = self.data.write();
            if let Some(entry) = lock.i2c_map.get_mut(&address) {
                let now = SystemTime::now();
                entry.value = Some(data.clone());
                entry.time_stamp = Some(now);
                if let Some(callback) = entry.callback.clone() {
                    fire = Some((
                        callback,
                        Report::I2c {
                            address,
                            register,
                            data,
                            time_stamp: now,
                        },
                    ));
                }
            } else {
                debug!("i2c reply for unconfigured address {} dropped", address);
            }
        }
        if let Some((callback, report)) = fire {
            invoke_callback(callback, report).await;
        }
    }

    /// Sonar readings only propagate when the measured distance changed.
    async fn handle_sonar_data(&self, pin: u8, value: u16) {
        let mut fire: Option<(ReportCallback, Report)> = None;
        {
            let mut lock = self.data.write();
            if let Some(entry) = lock.sonar_map.get_mut(&pin) {
                if entry.value != value {
                    let now = SystemTime::now();
                    entry.value = value;
                    entry.time_stamp = Some(now);
                    if let Some(callback) = entry.callback.clone() {
                        fire = Some((
                            callback,
                            Report::Sonar {
                                trigger_pin: pin,
                                distance_cm: value,
                                time_stamp: now,
                            },
                        ));
                    }
                }
            } else {
                debug!("sonar data for unconfigured trigger pin {} dropped", pin);
            }
        }
        if let Some((callback, report)) = fire {
            invoke_callback(callback, report).await;
        }
    }

    /// Stores the humidity/temperature pair; `event_time` moves only for
    /// readings that passed the firmware's validation. The callback fires when
    /// either component moved by at least the pin's differential.
    async fn handle_dht_data(
        &self,
        pin: u8,
        dht_type: u8,
        validation: u8,
        humidity: f32,
        temperature: f32,
    ) {
        let mut fire: Option<(ReportCallback, Report)> = None;
        {
            let mut lock = self.data.write();
            if let Ok(record) = lock.digital_pin_mut(pin) {
                let (last_humidity, last_temperature) = record.value.dht();
                record.value = PinValue::Dht {
                    humidity,
                    temperature,
                };
                let now = SystemTime::now();
                if validation == 0 {
                    record.event_time = Some(now);
                }
                let moved = (humidity - last_humidity).abs() as f64 >= record.differential
                    || (temperature - last_temperature).abs() as f64 >= record.differential;
                if moved {
                    if let Some(callback) = record.callback.clone() {
                        fire = Some((
                            callback,
                            Report::Dht {
                                pin,
                                dht_type,
                                validation,
                                humidity,
                                temperature,
                                time_stamp: now,
                            },
                        ));
                    }
                }
            }
        }
        if let Some((callback, report)) = fire {
            invoke_callback(callback, report).await;
        }
    }

    /// Correlates the reply with its outstanding request; the request id becomes
    /// reusable as soon as the entry is removed, before the callback runs.
    async fn handle_spi_reply(&self, request_id: u8, data: Vec<u8>) {
        let request = self.data.write().spi_requests.remove(&request_id);
        match request {
            None => debug!("spi reply for unknown request id {} dropped", request_id),
            Some(request) => {
                let now = SystemTime::now();
                let report = if request.skip_read {
                    Report::SpiWrite {
                        success: true,
                        time_stamp: now,
                    }
                } else {
                    Report::SpiData {
                        data,
                        time_stamp: now,
                    }
                };
                invoke_callback(request.callback, report).await;
            }
        }
    }

    /// Spawns the long-lived dispatcher task. The task observes the shutdown
    /// flag at the top of each iteration; a transport failure is fatal and
    /// triggers shutdown when `shutdown_on_exception` is configured.
    pub(crate) fn start_dispatcher(&self) {
        if self.dispatcher.read().is_some() {
            return;
        }
        let mut client = self.clone();
        let idle = self.config.sleep_tune;
        *self.dispatcher.write() = Some(task::run(async move {
            loop {
                if client.shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
                match client.read_and_decode() {
                    Ok(Some(message)) => client.dispatch(message).await,
                    Ok(None) => tokio::time::sleep(idle).await,
                    Err(failure) => {
                        if client.shutdown_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        error!("dispatcher: transport failure: {}", failure);
                        if client.config.shutdown_on_exception {
                            client.shutdown().await;
                        }
                        return Err(failure);
                    }
                }
            }
            Ok(())
        }));
    }
}
