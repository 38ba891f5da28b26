//! Wire protocol layer for Alexa Gadgets accessory-side Bluetooth transports.
//!
//! This crate owns the hard, interesting part of the protocol: the
//! schema-driven byte codec, the Classic Bluetooth SPP framer, the BLE
//! packetizer/reassembler and its CONTROL-stream handler, and the
//! `Transport` trait both the BLE and Classic Bluetooth drivers implement.
//! It knows nothing about BlueZ, D-Bus, or process configuration — that
//! lives in the binary crate.

pub mod ble;
pub mod codec;
pub mod error;
pub mod spp;
pub mod transport;

pub use codec::{decode, decode_directive, encode, Directive};
pub use error::TransportError;
pub use transport::{BoxedTransport, LinkEvent, Transport, TransportKind};
