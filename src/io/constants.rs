//! Firmata wire protocol constants.
//!
//! Command values follow the FirmataExpress firmware header; the FirmataExpress-only
//! extensions (keep-alive, tone, sonar, DHT, SPI) are ignored by plain StandardFirmata.

use crate::errors::{Error, InvalidArgument};
use std::fmt::{Display, Formatter};

// ########################################
// Message command bytes (128-255/0x80-0xFF)

/// Send or receive data for a digital port (collection of 8 pins)
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Digital message input range upper byte bound
pub const DIGITAL_MESSAGE_BOUND: u8 = 0x9F;
/// Send or receive data for an analog pin (or PWM)
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Analog message input range upper byte bound
pub const ANALOG_MESSAGE_BOUND: u8 = 0xEF;
/// Enable analog input by pin #
pub const REPORT_ANALOG: u8 = 0xC0;
/// Enable digital input by port pair
pub const REPORT_DIGITAL: u8 = 0xD0;
/// Set a pin to INPUT/OUTPUT/PWM/etc
pub const SET_PIN_MODE: u8 = 0xF4;
/// Set value of an individual digital pin instead of an entire port
pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;
/// Report protocol version
pub const REPORT_VERSION: u8 = 0xF9;
/// Reset from MIDI
pub const SYSTEM_RESET: u8 = 0xFF;
/// Start a MIDI Sysex message
pub const START_SYSEX: u8 = 0xF0;
/// End a MIDI Sysex message
pub const END_SYSEX: u8 = 0xF7;

// ########################################
// FirmataExpress extended command set using sysex (0-127/0x00-0x7F)

/// Periodic message preventing the firmware watchdog reset
pub const KEEP_ALIVE: u8 = 0x50;
/// Poll for a board's existence
pub const ARE_YOU_THERE: u8 = 0x51;
/// Response to [`ARE_YOU_THERE`] carrying the instance id
pub const I_AM_HERE: u8 = 0x52;
/// Play a tone at a specified frequency and duration
pub const TONE_DATA: u8 = 0x5F;
/// Configure pins to control a sonar distance device
pub const SONAR_CONFIG: u8 = 0x62;
/// Sonar distance data returned
pub const SONAR_DATA: u8 = 0x63;
/// DHT sensor config command
pub const DHT_CONFIG: u8 = 0x64;
/// DHT sensor data returned
pub const DHT_DATA: u8 = 0x65;
/// SPI commands start with this byte
pub const SPI_DATA: u8 = 0x68;

// ########################################
// Standard extended command set using sysex (0-127/0x00-0x7F)

/// Ask for mapping of analog to pin numbers
pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
/// Reply with analog mapping data
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
/// Ask for supported modes of all pins
pub const CAPABILITY_QUERY: u8 = 0x6B;
/// Reply with supported modes and resolution
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
/// Ask for a pin's current mode and value
pub const PIN_STATE_QUERY: u8 = 0x6D;
/// Reply with a pin's current mode and value
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
/// Analog write (PWM, Servo, etc.) to any pin
pub const EXTENDED_ANALOG: u8 = 0x6F;
/// Set servo pin and max and min pulse
pub const SERVO_CONFIG: u8 = 0x70;
/// String message with 14-bits per char
pub const STRING_DATA: u8 = 0x71;
/// Stepper motor command
pub const STEPPER_DATA: u8 = 0x72;
/// Send an I2C read/write request
pub const I2C_REQUEST: u8 = 0x76;
/// Reply to an I2C read request
pub const I2C_REPLY: u8 = 0x77;
/// Config I2C settings such as delay times and power pins
pub const I2C_CONFIG: u8 = 0x78;
/// Report name and version of the firmware
pub const REPORT_FIRMWARE: u8 = 0x79;
/// Modify the sampling interval
pub const SAMPLING_INTERVAL: u8 = 0x7A;

/// MIDI reserved for realtime messages, doubles as the 7-bit payload mask
pub const SYSEX_REALTIME: u8 = 0x7F;

/// Analog-map marker for pins without an analog channel
pub const IGNORE: u8 = 0x7F;

/// Firmware version prefix required when talking to a FirmataExpress sketch
pub const FIRMATA_EXPRESS_VERSION: &str = "1.2";

// ########################################
// Sub-commands

/// Tone sub-command: play a tone
pub const TONE_TONE: u8 = 0;
/// Tone sub-command: turn off tone
pub const TONE_NO_TONE: u8 = 1;

/// Stepper sub-command: configure a stepper motor for operation
pub const STEPPER_CONFIGURE: u8 = 0;
/// Stepper sub-command: command a motor to move at the provided speed
pub const STEPPER_STEP: u8 = 1;

/// I2C operation mode: write to the device
pub const I2C_WRITE: u8 = 0b0000_0000;
/// I2C operation mode: single read
pub const I2C_READ: u8 = 0b0000_1000;
/// I2C operation mode: continuous streaming read
pub const I2C_READ_CONTINUOUSLY: u8 = 0b0001_0000;
/// I2C operation mode: stop a continuous read
pub const I2C_STOP_READING: u8 = 0b0001_1000;
/// I2C mode flag: restart transmission after the read
pub const I2C_END_TX_MASK: u8 = 0b0100_0000;

/// SPI sub-command: initialize the SPI bus for the given channel
pub const SPI_BEGIN: u8 = 0x00;
/// SPI sub-command: configure an attached SPI device
pub const SPI_DEVICE_CONFIG: u8 = 0x01;
/// SPI sub-command: simultaneous write/read transfer
pub const SPI_TRANSFER: u8 = 0x02;
/// SPI sub-command: write-only request
pub const SPI_WRITE: u8 = 0x03;
/// SPI sub-command: read-only request
pub const SPI_READ: u8 = 0x04;
/// SPI sub-command: reply to a transfer/read/write request
pub const SPI_REPLY: u8 = 0x05;
/// SPI sub-command: disable the SPI bus
pub const SPI_END: u8 = 0x06;

/// Enable value for a REPORT_ANALOG / REPORT_DIGITAL message
pub const REPORTING_ENABLE: u8 = 1;
/// Disable value for a REPORT_ANALOG / REPORT_DIGITAL message
pub const REPORTING_DISABLE: u8 = 0;

// ########################################

/// Enumerates the possible modes for a pin.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
#[repr(u8)]
pub enum PinModeId {
    /// Same as INPUT defined in Arduino.h
    #[default]
    INPUT = 0x00,
    /// Same as OUTPUT defined in Arduino.h
    OUTPUT = 0x01,
    /// Analog pin in analogInput mode
    ANALOG = 0x02,
    /// Digital pin in PWM output mode
    PWM = 0x03,
    /// Digital pin in Servo output mode
    SERVO = 0x04,
    /// Pin included in I2C setup
    I2C = 0x06,
    /// Pin configured for stepper motor
    STEPPER = 0x08,
    /// Pin configured for serial communication
    SERIAL = 0x0A,
    /// Enable internal pull-up resistor for pin
    PULLUP = 0x0B,
    /// Pin configured for a sonar distance sensor
    SONAR = 0x0C,
    /// Pin configured for piezo buzzer tone generation
    TONE = 0x0D,
    /// Pin configured for a DHT humidity and temperature sensor
    DHT = 0x0F,
    /// Pin configured for SPI
    SPI = 0x10,
    /// Pin ignored by digitalWrite and capabilityResponse
    IGNORE = 0x7F,
}

impl PinModeId {
    /// Converts a `u8` byte value into a `PinModeId`.
    ///
    /// # Errors
    /// * `InvalidArgument`: the value does not match any known pin mode.
    pub fn from_u8(value: u8) -> Result<PinModeId, Error> {
        match value {
            0x00 => Ok(PinModeId::INPUT),
            0x01 => Ok(PinModeId::OUTPUT),
            0x02 => Ok(PinModeId::ANALOG),
            0x03 => Ok(PinModeId::PWM),
            0x04 => Ok(PinModeId::SERVO),
            0x06 => Ok(PinModeId::I2C),
            0x08 => Ok(PinModeId::STEPPER),
            0x0A => Ok(PinModeId::SERIAL),
            0x0B => Ok(PinModeId::PULLUP),
            0x0C => Ok(PinModeId::SONAR),
            0x0D => Ok(PinModeId::TONE),
            0x0F => Ok(PinModeId::DHT),
            0x10 => Ok(PinModeId::SPI),
            0x7F => Ok(PinModeId::IGNORE),
            x => Err(InvalidArgument {
                context: format!("pin mode not found with value: {}", x),
            }),
        }
    }
}

impl From<PinModeId> for u8 {
    fn from(mode: PinModeId) -> u8 {
        mode as u8
    }
}

impl Display for PinModeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
