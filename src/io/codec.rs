//! Pure encode/decode functions for the Firmata wire format.
//!
//! Official Firmata documentation: <https://github.com/firmata/protocol>
//!
//! Everything here is stateless: encoders turn a command into the exact byte
//! sequence to put on the wire (a SysEx frame is always returned as one buffer so
//! it can be written atomically), [`classify`] buckets an inbound first byte, and
//! [`decode_sysex`] turns a complete SysEx frame into a typed [`Message`].

use log::trace;

use crate::io::constants::*;

/// A fully decoded inbound Firmata message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Analog value report for an analog channel.
    Analog { channel: u8, value: u16 },
    /// Digital value report for an 8-pin port.
    Digital { port: u8, bits: u16 },
    /// Protocol version report (0xF9).
    ProtocolVersion { major: u8, minor: u8 },
    /// Firmware name and version, e.g. "2.5 StandardFirmata.ino".
    FirmwareReport { version: String },
    /// Raw capability report payload (framing stripped).
    CapabilityResponse { payload: Vec<u8> },
    /// Raw analog mapping payload (framing stripped).
    AnalogMappingResponse { map: Vec<u8> },
    /// Raw pin state payload (framing stripped): `[pin, mode, state..]`.
    PinStateResponse { payload: Vec<u8> },
    /// Decoded I2C read reply.
    I2cReply {
        address: u16,
        register: u16,
        data: Vec<u16>,
    },
    /// Sonar distance report (centimeters) for a trigger pin.
    SonarData { pin: u8, value: u16 },
    /// DHT humidity/temperature report.
    DhtData {
        pin: u8,
        dht_type: u8,
        validation: u8,
        humidity: f32,
        temperature: f32,
    },
    /// SPI reply correlated by request id; `data` is the unpacked byte stream.
    SpiReply { request_id: u8, data: Vec<u8> },
    /// Console text sent by the firmware.
    StringData { text: String },
    /// Reply to an ARE_YOU_THERE probe.
    IAmHere { instance_id: u8 },
}

/// Classification of an inbound first byte.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Classified {
    /// Analog message for the given channel; two data bytes follow.
    Analog(u8),
    /// Digital message for the given port; two data bytes follow.
    Digital(u8),
    /// Protocol version report; two data bytes follow.
    ReportVersion,
    /// Beginning of a SysEx frame; collect up to and including END_SYSEX.
    SysexStart,
    /// Not a recognized command byte; discard.
    Unknown,
}

/// Buckets an inbound first byte into its message kind.
pub(crate) fn classify(byte: u8) -> Classified {
    match byte {
        ANALOG_MESSAGE..=ANALOG_MESSAGE_BOUND => Classified::Analog(byte & 0x0F),
        DIGITAL_MESSAGE..=DIGITAL_MESSAGE_BOUND => Classified::Digital(byte & 0x0F),
        REPORT_VERSION => Classified::ReportVersion,
        START_SYSEX => Classified::SysexStart,
        _ => Classified::Unknown,
    }
}

// ########################################
// 7-bit packing primitives

/// Splits a 14-bit value into little-endian 7-bit groups.
pub fn encode_u14(value: u16) -> [u8; 2] {
    [value as u8 & SYSEX_REALTIME, (value >> 7) as u8 & SYSEX_REALTIME]
}

/// Reassembles a 14-bit value from its little-endian 7-bit groups.
pub fn decode_u14(lsb: u8, msb: u8) -> u16 {
    ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F)
}

/// Packs raw bytes into 7-bit pairs suitable for a SysEx payload.
pub fn pack_7bit(data: &[u8]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(data.len() * 2);
    for &byte in data {
        packed.push(byte & SYSEX_REALTIME);
        packed.push((byte >> 7) & SYSEX_REALTIME);
    }
    packed
}

/// Unpacks 7-bit pairs back into raw bytes. A trailing unpaired byte is dropped.
pub fn unpack_7bit(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2)
        .map(|pair| (pair[0] & 0x7F) | (pair[1] << 7))
        .collect()
}

// ########################################
// Outbound encoders

/// Brackets a command and its payload into one SysEx frame.
pub fn encode_sysex(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(START_SYSEX);
    frame.push(command);
    frame.extend_from_slice(payload);
    frame.push(END_SYSEX);
    frame
}

/// `0x90+port, bits_0_6, bits_7_13`
pub fn encode_digital_message(port: u8, bits: u16) -> Vec<u8> {
    let [lsb, msb] = encode_u14(bits);
    vec![DIGITAL_MESSAGE | (port & 0x0F), lsb, msb]
}

/// `0xF5, pin, value`
pub fn encode_set_digital_pin_value(pin: u8, level: bool) -> Vec<u8> {
    vec![SET_DIGITAL_PIN_VALUE, pin, u8::from(level)]
}

/// `0xE0+pin, v_lsb, v_msb` - only valid for pins below 16.
pub fn encode_analog_message(pin: u8, value: u16) -> Vec<u8> {
    let [lsb, msb] = encode_u14(value);
    vec![ANALOG_MESSAGE | (pin & 0x0F), lsb, msb]
}

/// `0xF0, 0x6F, pin, b0, b1, b2, 0xF7`
pub fn encode_extended_analog(pin: u8, value: u16) -> Vec<u8> {
    encode_sysex(
        EXTENDED_ANALOG,
        &[
            pin,
            value as u8 & SYSEX_REALTIME,
            (value >> 7) as u8 & SYSEX_REALTIME,
            (value >> 14) as u8 & SYSEX_REALTIME,
        ],
    )
}

/// `0xD0+port, {0,1}`
pub fn encode_report_digital(port: u8, enable: bool) -> Vec<u8> {
    vec![
        REPORT_DIGITAL | (port & 0x0F),
        if enable { REPORTING_ENABLE } else { REPORTING_DISABLE },
    ]
}

/// `0xC0+channel, {0,1}`
pub fn encode_report_analog(channel: u8, enable: bool) -> Vec<u8> {
    vec![
        REPORT_ANALOG | (channel & 0x0F),
        if enable { REPORTING_ENABLE } else { REPORTING_DISABLE },
    ]
}

/// `0xF4, pin, mode`
pub fn encode_set_pin_mode(pin: u8, mode: PinModeId) -> Vec<u8> {
    vec![SET_PIN_MODE, pin, u8::from(mode)]
}

/// `0xF0, 0x70, pin, min_lsb, min_msb, max_lsb, max_msb, 0xF7`
pub fn encode_servo_config(pin: u8, min_pulse: u16, max_pulse: u16) -> Vec<u8> {
    let [min_lsb, min_msb] = encode_u14(min_pulse);
    let [max_lsb, max_msb] = encode_u14(max_pulse);
    encode_sysex(SERVO_CONFIG, &[pin, min_lsb, min_msb, max_lsb, max_msb])
}

/// `0xF0, 0x5F, 0, pin, f_lsb, f_msb, d_lsb, d_msb, 0xF7` - duration 0 plays continuously.
pub fn encode_tone(pin: u8, frequency: u16, duration: u16) -> Vec<u8> {
    let [f_lsb, f_msb] = encode_u14(frequency);
    let [d_lsb, d_msb] = encode_u14(duration);
    encode_sysex(TONE_DATA, &[TONE_TONE, pin, f_lsb, f_msb, d_lsb, d_msb])
}

/// `0xF0, 0x5F, 1, pin, 0xF7`
pub fn encode_tone_off(pin: u8) -> Vec<u8> {
    encode_sysex(TONE_DATA, &[TONE_NO_TONE, pin])
}

/// `0xF0, 0x72, 0, steps_lsb, steps_msb, pin1..pinN, 0xF7`
pub fn encode_stepper_config(steps_per_revolution: u16, pins: &[u8]) -> Vec<u8> {
    let [lsb, msb] = encode_u14(steps_per_revolution);
    let mut payload = vec![STEPPER_CONFIGURE, lsb, msb];
    payload.extend_from_slice(pins);
    encode_sysex(STEPPER_DATA, &payload)
}

/// `0xF0, 0x72, 1, sp0, sp1, sp2, n_lsb, n_msb, dir, 0xF7` - dir=1 is forward.
pub fn encode_stepper_step(motor_speed: u32, steps: u16, forward: bool) -> Vec<u8> {
    let [n_lsb, n_msb] = encode_u14(steps);
    encode_sysex(
        STEPPER_DATA,
        &[
            STEPPER_STEP,
            motor_speed as u8 & SYSEX_REALTIME,
            (motor_speed >> 7) as u8 & SYSEX_REALTIME,
            (motor_speed >> 14) as u8 & SYSEX_REALTIME,
            n_lsb,
            n_msb,
            u8::from(forward),
        ],
    )
}

/// `0xF0, 0x62, trigger, echo, timeout_lsb, timeout_msb, 0xF7`
pub fn encode_sonar_config(trigger_pin: u8, echo_pin: u8, timeout: u16) -> Vec<u8> {
    let [to_lsb, to_msb] = encode_u14(timeout);
    encode_sysex(SONAR_CONFIG, &[trigger_pin, echo_pin, to_lsb, to_msb])
}

/// `0xF0, 0x64, pin, sensor_type, 0xF7`
pub fn encode_dht_config(pin: u8, sensor_type: u8) -> Vec<u8> {
    encode_sysex(DHT_CONFIG, &[pin, sensor_type])
}

/// `0xF0, 0x78, delay_lsb, delay_msb, 0xF7`
pub fn encode_i2c_config(delay: u16) -> Vec<u8> {
    let [lsb, msb] = encode_u14(delay);
    encode_sysex(I2C_CONFIG, &[lsb, msb])
}

/// `0xF0, 0x76, addr, mode, [reg_lsb, reg_msb,] n_lsb, n_msb, 0xF7`
///
/// The register bytes are omitted when the device needs no register selection.
pub fn encode_i2c_read_request(
    address: u8,
    mode: u8,
    register: Option<u16>,
    number_of_bytes: u16,
) -> Vec<u8> {
    let [n_lsb, n_msb] = encode_u14(number_of_bytes);
    let payload = match register {
        Some(register) => {
            let [r_lsb, r_msb] = encode_u14(register);
            vec![address, mode, r_lsb, r_msb, n_lsb, n_msb]
        }
        None => vec![address, mode, n_lsb, n_msb],
    };
    encode_sysex(I2C_REQUEST, &payload)
}

/// `0xF0, 0x76, addr, I2C_WRITE, (item_lsb, item_msb)*, 0xF7`
pub fn encode_i2c_write(address: u8, data: &[u16]) -> Vec<u8> {
    let mut payload = vec![address, I2C_WRITE];
    for &item in data {
        let [lsb, msb] = encode_u14(item);
        payload.push(lsb);
        payload.push(msb);
    }
    encode_sysex(I2C_REQUEST, &payload)
}

/// `0xF0, 0x7A, interval_lsb, interval_msb, 0xF7`
pub fn encode_sampling_interval(interval_ms: u16) -> Vec<u8> {
    let [lsb, msb] = encode_u14(interval_ms);
    encode_sysex(SAMPLING_INTERVAL, &[lsb, msb])
}

/// `0xF0, 0x50, period_lsb, period_msb, 0xF7`
pub fn encode_keep_alive(period_secs: u16) -> Vec<u8> {
    let [lsb, msb] = encode_u14(period_secs);
    encode_sysex(KEEP_ALIVE, &[lsb, msb])
}

/// `0xF0, 0x51, 0xF7`
pub fn encode_are_you_there() -> Vec<u8> {
    encode_sysex(ARE_YOU_THERE, &[])
}

/// `0xFF`
pub fn encode_system_reset() -> Vec<u8> {
    vec![SYSTEM_RESET]
}

/// SPI device-config packing per the SPI SysEx proposal:
/// `(device_id<<3)|channel`, `(data_mode<<1)|bit_order`, five 7-bit max-speed
/// groups, word size, chip-select options (bit 0 cs_pin_control, bit 1
/// cs_active_state), then the CS pin.
#[allow(clippy::too_many_arguments)]
pub fn encode_spi_device_config(
    device_id: u8,
    channel: u8,
    data_mode: u8,
    bit_order: u8,
    max_speed: u32,
    word_size: u8,
    cs_pin_control: bool,
    cs_active_state: u8,
    cs_pin: u8,
) -> Vec<u8> {
    let mut cs_pin_options: u8 = 0;
    if cs_pin_control {
        cs_pin_options |= 1 << 0;
    }
    if cs_active_state != 0 {
        cs_pin_options |= 1 << 1;
    }
    encode_sysex(
        SPI_DATA,
        &[
            SPI_DEVICE_CONFIG,
            (device_id << 3) | (channel & 0x07),
            (data_mode << 1) | (bit_order & 0x01),
            max_speed as u8 & 0x7F,
            (max_speed >> 7) as u8 & 0x7F,
            (max_speed >> 14) as u8 & 0x7F,
            (max_speed >> 21) as u8 & 0x7F,
            (max_speed >> 28) as u8 & 0x0F,
            word_size,
            cs_pin_options,
            cs_pin,
        ],
    )
}

// ########################################
// Inbound SysEx decoding

/// Decodes a complete SysEx frame `[command, payload.., 0xF7]` into a [`Message`].
///
/// Unknown commands and payloads too short to carry their advertised content
/// decode to `None` and are dropped by the dispatcher.
pub(crate) fn decode_sysex(frame: &[u8]) -> Option<Message> {
    let (&command, rest) = frame.split_first()?;
    let payload = match rest.split_last() {
        Some((&END_SYSEX, body)) => body,
        _ => rest,
    };

    match command {
        REPORT_FIRMWARE => decode_firmware_report(payload),
        CAPABILITY_RESPONSE => Some(Message::CapabilityResponse {
            payload: payload.to_vec(),
        }),
        ANALOG_MAPPING_RESPONSE => Some(Message::AnalogMappingResponse {
            map: payload.to_vec(),
        }),
        PIN_STATE_RESPONSE => Some(Message::PinStateResponse {
            payload: payload.to_vec(),
        }),
        I2C_REPLY => decode_i2c_reply(payload),
        SONAR_DATA => decode_sonar_data(payload),
        DHT_DATA => decode_dht_data(payload),
        SPI_DATA => decode_spi_reply(payload),
        STRING_DATA => Some(Message::StringData {
            text: payload
                .iter()
                .filter(|&&byte| byte != 0)
                .map(|&byte| byte as char)
                .collect(),
        }),
        I_AM_HERE => payload.first().map(|&instance_id| Message::IAmHere { instance_id }),
        _ => {
            trace!("sysex: dropping unknown command 0x{:02X}", command);
            None
        }
    }
}

/// Bytes 0, 1 are major, minor; the remainder is the sketch name as 14-bit chars.
fn decode_firmware_report(payload: &[u8]) -> Option<Message> {
    if payload.len() < 2 {
        return None;
    }
    let mut version = format!("{}.{}", payload[0], payload[1]);
    let name: String = payload[2..]
        .chunks_exact(2)
        .filter_map(|pair| char::from_u32(decode_u14(pair[0], pair[1]) as u32))
        .collect();
    if !name.is_empty() {
        version.push(' ');
        version.push_str(&name);
    }
    Some(Message::FirmwareReport { version })
}

/// Address and register come first, then the returned bytes, all as 14-bit pairs.
fn decode_i2c_reply(payload: &[u8]) -> Option<Message> {
    if payload.len() < 4 {
        return None;
    }
    let decoded = unpack_7bit_u14(payload);
    Some(Message::I2cReply {
        address: decoded[0],
        register: decoded[1],
        data: decoded[2..].to_vec(),
    })
}

/// Reassembles 14-bit little-endian pairs, dropping a trailing unpaired byte.
fn unpack_7bit_u14(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| decode_u14(pair[0], pair[1]))
        .collect()
}

fn decode_sonar_data(payload: &[u8]) -> Option<Message> {
    if payload.len() < 3 {
        return None;
    }
    Some(Message::SonarData {
        pin: payload[0],
        value: decode_u14(payload[1], payload[2]),
    })
}

/// Payload layout: `[pin, dht_type, validation, negate_humidity, negate_temperature,
/// humidity_int, humidity_hundredths, temperature_int, temperature_hundredths]`.
///
/// An invalid reading (validation != 0) reports zeroed values; the validation flag
/// travels with the message so the consumer can tell the difference.
fn decode_dht_data(payload: &[u8]) -> Option<Message> {
    if payload.len() < 9 {
        return None;
    }
    let validation = payload[2];
    let (mut humidity, mut temperature) = (0.0f32, 0.0f32);
    if validation == 0 {
        humidity = payload[5] as f32 + payload[6] as f32 / 100.0;
        if payload[3] != 0 {
            humidity = -humidity;
        }
        temperature = payload[7] as f32 + payload[8] as f32 / 100.0;
        if payload[4] != 0 {
            temperature = -temperature;
        }
    }
    Some(Message::DhtData {
        pin: payload[0],
        dht_type: payload[1],
        validation,
        humidity,
        temperature,
    })
}

fn decode_spi_reply(payload: &[u8]) -> Option<Message> {
    let (&request_id, body) = payload.split_first()?;
    Some(Message::SpiReply {
        request_id,
        data: unpack_7bit(body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u14_round_trip() {
        for value in 0..=0x3FFF_u16 {
            let [lsb, msb] = encode_u14(value);
            assert!(lsb < 0x80 && msb < 0x80);
            assert_eq!(decode_u14(lsb, msb), value);
        }
    }

    #[test]
    fn test_pack_7bit_round_trip() {
        let data = [0x00, 0x01, 0x7F, 0x80, 0xAB, 0xFF];
        let packed = pack_7bit(&data);
        assert_eq!(packed.len(), data.len() * 2);
        assert!(packed.iter().all(|&byte| byte < 0x80));
        assert_eq!(unpack_7bit(&packed), data.to_vec());
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0xE2), Classified::Analog(2));
        assert_eq!(classify(0xEF), Classified::Analog(15));
        assert_eq!(classify(0x91), Classified::Digital(1));
        assert_eq!(classify(0x9F), Classified::Digital(15));
        assert_eq!(classify(0xF9), Classified::ReportVersion);
        assert_eq!(classify(0xF0), Classified::SysexStart);
        assert_eq!(classify(0x42), Classified::Unknown);
        assert_eq!(classify(0xF7), Classified::Unknown);
    }

    #[test]
    fn test_encode_digital_message() {
        assert_eq!(encode_digital_message(1, 0x20), vec![0x91, 0x20, 0x00]);
        assert_eq!(encode_digital_message(0, 0xFF), vec![0x90, 0x7F, 0x01]);
    }

    #[test]
    fn test_encode_analog_message() {
        assert_eq!(encode_analog_message(0, 170), vec![0xE0, 0x2A, 0x01]);
    }

    #[test]
    fn test_encode_extended_analog() {
        assert_eq!(
            encode_extended_analog(22, 17000),
            vec![0xF0, 0x6F, 0x16, 0x68, 0x04, 0x01, 0xF7]
        );
    }

    #[test]
    fn test_encode_reporting() {
        assert_eq!(encode_report_digital(1, true), vec![0xD1, 0x01]);
        assert_eq!(encode_report_digital(1, false), vec![0xD1, 0x00]);
        assert_eq!(encode_report_analog(2, true), vec![0xC2, 0x01]);
    }

    #[test]
    fn test_encode_set_pin_mode() {
        assert_eq!(
            encode_set_pin_mode(8, PinModeId::OUTPUT),
            vec![0xF4, 0x08, 0x01]
        );
        assert_eq!(
            encode_set_pin_mode(4, PinModeId::SPI),
            vec![0xF4, 0x04, 0x10]
        );
    }

    #[test]
    fn test_encode_servo_config() {
        assert_eq!(
            encode_servo_config(8, 500, 2500),
            vec![0xF0, 0x70, 0x08, 0x74, 0x03, 0x44, 0x13, 0xF7]
        );
    }

    #[test]
    fn test_encode_tone() {
        assert_eq!(
            encode_tone(3, 1000, 500),
            vec![0xF0, 0x5F, 0x00, 0x03, 0x68, 0x07, 0x74, 0x03, 0xF7]
        );
        assert_eq!(encode_tone_off(3), vec![0xF0, 0x5F, 0x01, 0x03, 0xF7]);
    }

    #[test]
    fn test_encode_stepper() {
        assert_eq!(
            encode_stepper_config(512, &[8, 9, 10, 11]),
            vec![0xF0, 0x72, 0x00, 0x00, 0x04, 0x08, 0x09, 0x0A, 0x0B, 0xF7]
        );
        assert_eq!(
            encode_stepper_step(1000, 200, true),
            vec![0xF0, 0x72, 0x01, 0x68, 0x07, 0x00, 0x48, 0x01, 0x01, 0xF7]
        );
    }

    #[test]
    fn test_encode_sonar_config() {
        assert_eq!(
            encode_sonar_config(12, 11, 1000),
            vec![0xF0, 0x62, 0x0C, 0x0B, 0x68, 0x07, 0xF7]
        );
    }

    #[test]
    fn test_encode_i2c() {
        assert_eq!(
            encode_i2c_config(100),
            vec![0xF0, 0x78, 0x64, 0x00, 0xF7]
        );
        assert_eq!(
            encode_i2c_read_request(0x40, I2C_READ, None, 4),
            vec![0xF0, 0x76, 0x40, 0x08, 0x04, 0x00, 0xF7]
        );
        assert_eq!(
            encode_i2c_read_request(83, I2C_READ, Some(50), 6),
            vec![0xF0, 0x76, 0x53, 0x08, 0x32, 0x00, 0x06, 0x00, 0xF7]
        );
        assert_eq!(
            encode_i2c_write(0x40, &[0x01, 0x02, 0x03]),
            vec![0xF0, 0x76, 0x40, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0xF7]
        );
    }

    #[test]
    fn test_encode_housekeeping() {
        assert_eq!(
            encode_sampling_interval(19),
            vec![0xF0, 0x7A, 0x13, 0x00, 0xF7]
        );
        assert_eq!(encode_keep_alive(2), vec![0xF0, 0x50, 0x02, 0x00, 0xF7]);
        assert_eq!(encode_are_you_there(), vec![0xF0, 0x51, 0xF7]);
        assert_eq!(encode_system_reset(), vec![0xFF]);
    }

    #[test]
    fn test_encode_spi_device_config() {
        let frame = encode_spi_device_config(1, 0, 0, 1, 5_000_000, 8, true, 0, 10);
        assert_eq!(frame[0], 0xF0);
        assert_eq!(frame[1], 0x68);
        assert_eq!(frame[2], 0x01, "SPI_DEVICE_CONFIG sub-command");
        assert_eq!(frame[3], 0x08, "device id 1 on channel 0");
        assert_eq!(frame[4], 0x01, "data mode 0, MSB first");
        // 5_000_000 split into five 7-bit groups, little-endian.
        assert_eq!(&frame[5..10], &[0x40, 0x16, 0x31, 0x02, 0x00]);
        assert_eq!(frame[10], 8, "word size");
        assert_eq!(frame[11], 0x01, "cs pin control only");
        assert_eq!(frame[12], 10, "cs pin");
        assert_eq!(frame[13], 0xF7);
    }

    #[test]
    fn test_decode_firmware_report() {
        let message = decode_sysex(&[0x79, 1, 2, b'F', 0x00, b'o', 0x00, 0xF7]);
        assert_eq!(
            message,
            Some(Message::FirmwareReport {
                version: String::from("1.2 Fo")
            })
        );

        // Name-less report has no trailing space.
        let message = decode_sysex(&[0x79, 2, 5, 0xF7]);
        assert_eq!(
            message,
            Some(Message::FirmwareReport {
                version: String::from("2.5")
            })
        );

        // Too short to carry a version.
        assert_eq!(decode_sysex(&[0x79, 2, 0xF7]), None);
    }

    #[test]
    fn test_decode_i2c_reply() {
        let message = decode_sysex(&[
            0x77, 83, 0, 50, 0, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x05, 0x00, 0x06,
            0x00, 0xF7,
        ]);
        assert_eq!(
            message,
            Some(Message::I2cReply {
                address: 83,
                register: 50,
                data: vec![1, 2, 3, 4, 5, 6],
            })
        );

        assert_eq!(decode_sysex(&[0x77, 83, 0, 0xF7]), None);
    }

    #[test]
    fn test_decode_sonar_data() {
        let message = decode_sysex(&[0x63, 12, 30, 0, 0xF7]);
        assert_eq!(message, Some(Message::SonarData { pin: 12, value: 30 }));
        // Distances above 127 cm span both bytes.
        let message = decode_sysex(&[0x63, 12, 0x48, 0x01, 0xF7]);
        assert_eq!(message, Some(Message::SonarData { pin: 12, value: 200 }));
    }

    #[test]
    fn test_decode_dht_data() {
        let message = decode_sysex(&[0x65, 6, 22, 0, 0, 0, 45, 50, 23, 70, 0xF7]);
        assert_eq!(
            message,
            Some(Message::DhtData {
                pin: 6,
                dht_type: 22,
                validation: 0,
                humidity: 45.5,
                temperature: 23.7,
            })
        );

        // Negative temperature flag.
        let message = decode_sysex(&[0x65, 6, 22, 0, 0, 1, 45, 50, 5, 25, 0xF7]);
        match message {
            Some(Message::DhtData { temperature, .. }) => {
                assert!((temperature + 5.25).abs() < f32::EPSILON)
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // Failed checksum zeroes the values but keeps the flag.
        let message = decode_sysex(&[0x65, 6, 22, 1, 0, 0, 45, 50, 23, 70, 0xF7]);
        assert_eq!(
            message,
            Some(Message::DhtData {
                pin: 6,
                dht_type: 22,
                validation: 1,
                humidity: 0.0,
                temperature: 0.0,
            })
        );
    }

    #[test]
    fn test_decode_spi_reply() {
        let message = decode_sysex(&[0x68, 5, 0x01, 0x00, 0x7F, 0x01, 0xF7]);
        assert_eq!(
            message,
            Some(Message::SpiReply {
                request_id: 5,
                data: vec![0x01, 0xFF],
            })
        );
    }

    #[test]
    fn test_decode_string_data() {
        let message = decode_sysex(&[0x71, b'h', 0, b'i', 0, 0xF7]);
        assert_eq!(
            message,
            Some(Message::StringData {
                text: String::from("hi")
            })
        );
    }

    #[test]
    fn test_decode_i_am_here() {
        let message = decode_sysex(&[0x52, 1, 0xF7]);
        assert_eq!(message, Some(Message::IAmHere { instance_id: 1 }));
    }

    #[test]
    fn test_decode_unknown_sysex() {
        assert_eq!(decode_sysex(&[0x42, 0x11, 0xF7]), None);
        assert_eq!(decode_sysex(&[]), None);
    }
}
