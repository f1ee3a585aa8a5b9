#![doc(html_root_url = "https://docs.rs/firmata-express/0.1.0")]

//! <h1 align="center">FIRMATA-EXPRESS - Asynchronous Firmata client</h1>
//! <div style="text-align:center;font-style:italic;">An asyncio-style client for Arduino-compatible boards running a Firmata sketch - written in Rust.</div>
//!
//! # Features
//!
//! **Firmata-Express** lets a host computer drive an Arduino (or compatible) board running
//! the [FirmataExpress](https://github.com/MrYsLab/FirmataExpress) or
//! [StandardFirmata](https://github.com/firmata/arduino) sketch, over either a serial
//! link or a raw TCP socket.
//!
//! - Auto-discovery of the attached board by `arduino_instance_id` ([`ExpressClient::connect`](client::ExpressClient::connect))
//! - Digital, analog, PWM, servo, tone, stepper, sonar (HC-SR04), DHT, I²C and SPI operations
//! - Async per-pin callbacks with change-differential filtering
//! - Keep-alive task preventing the firmware watchdog from resetting the board
//!
//! # Prerequisites
//!
//! - An Arduino board attached to a serial port of your computer (or reachable over TCP
//!   when running StandardFirmataWifi).
//! - The [FirmataExpress](https://github.com/MrYsLab/FirmataExpress) sketch uploaded to the
//!   board for the full feature set (sonar, DHT, tone, stepper, SPI); StandardFirmata covers
//!   the basic GPIO/I²C surface.
//!
//! # Getting started
//!
//! ```no_run
//! use firmata_express::client::{ExpressClient, ExpressConfig};
//! use firmata_express::io::{report_callback, Report};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), firmata_express::errors::Error> {
//!     // Auto-detects the serial port running FirmataExpress with instance id 1.
//!     let mut client = ExpressClient::connect(ExpressConfig::default()).await?;
//!
//!     // Report potentiometer changes on A2 whenever the value moves by 5 or more.
//!     let callback = report_callback(|report: Report| async move {
//!         println!("{:?}", report);
//!         Ok(())
//!     });
//!     client.set_pin_mode_analog_input(2, Some(callback), 5).await?;
//!
//!     firmata_express::pause!(5000);
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - **libudev** -- (enabled by default) Activates the `serialport` crate _libudev_ feature
//!   under-the-hood (required on Linux only for port listing).
//! - **mocks** -- Provides a scripted mock transport (useful for tests mostly).

pub mod client;
pub mod errors;
pub mod io;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod utils;

/// Suspends the current task for the given amount of milliseconds.
#[macro_export]
macro_rules! pause {
    ($ms:expr) => {
        $crate::utils::tokio::time::sleep(std::time::Duration::from_millis($ms)).await
    };
}

/// Blocks the current thread for the given amount of milliseconds.
///
/// Only for non-async contexts; use [`pause!`] inside tasks.
#[macro_export]
macro_rules! pause_sync {
    ($ms:expr) => {
        std::thread::sleep(std::time::Duration::from_millis($ms))
    };
}
