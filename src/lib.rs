//! A software USB device engine
//!
//! `soft-usbd` implements the device side of a USB 2.0 full / high speed
//! serial port without a USB peripheral. It's made of
//!
//! - a [`LineCodec`] that samples the differential pair, recovers the bit
//!   clock, and turns NRZI line states into bytes (and back),
//! - an [`EndpointEngine`] that answers IN, OUT and PING transactions for a
//!   CDC-ACM data endpoint and notify endpoint,
//! - a [`DescriptorTable`] that holds the device's descriptors,
//! - a [`SerialState`] that bridges the protocol and the application with
//!   lock-free ring buffers.
//!
//! Bus reset detection, packet CRCs, token decoding, and the default control
//! endpoint are up to the transaction layer that sits between the codec and
//! the engine. It talks to the engine through the types in [`transaction`].
//!
//! Everything is ticked. There's no blocking, no allocation, and no
//! interrupt handling; call `tick()` from whatever context owns the bus.
//!
//! # Example
//!
//! ```
//! use soft_usbd::{
//!     transaction::{Input, Response, Strobes},
//!     Config, DescriptorTable, EndpointEngine, SerialState,
//! };
//! use usb_device::device::UsbVidPid;
//!
//! static STATE: SerialState<256, 256> = SerialState::new();
//!
//! let config = Config::new(UsbVidPid(0x1d50, 0x6130))
//!     .strings("Acme", "Serial bridge", "0001");
//! let descriptors = DescriptorTable::new(&config).unwrap();
//!
//! let (mut serial, pipes) = STATE.split().unwrap();
//! let mut engine = EndpointEngine::new(pipes, &descriptors);
//!
//! // Application context
//! serial.write(b"hi").unwrap();
//!
//! // Protocol context, on an IN token for EP1
//! let output = engine.tick(&Input::idle().token(1, Strobes::IN));
//! assert_eq!(output.response, Response::SEND);
//! assert_eq!(output.tx, Some(b'h'));
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod log;

mod ral;

pub mod buffer;
pub mod config;
pub mod descriptor;
pub mod endpoint;
pub mod phy;
pub mod state;
pub mod status;
pub mod transaction;

pub use config::{Config, Speed};
pub use descriptor::DescriptorTable;
pub use endpoint::EndpointEngine;
pub use phy::LineCodec;
pub use state::{Pipes, Serial, SerialState};
pub use status::DeviceStatus;
