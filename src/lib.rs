//! Accessory-side Alexa Gadgets toolkit: BLE/Classic Bluetooth transport
//! drivers, connection lifecycle, and configuration/state persistence.
//!
//! The wire-protocol core (codec, SPP framer, BLE packetizer, control-stream
//! handler, `Transport` trait) lives in the `gadget-transport` crate; this
//! crate binds it to `bluer` and adds the gadget-level lifecycle on top.

pub mod cli;
pub mod config;
pub mod demos;
pub mod error;
pub mod gadget;
pub mod reconnect;
pub mod setup;
pub mod token;
pub mod transport;

pub use config::{GadgetConfig, PersistentState, ResolvedGadgetConfig, TransportMode};
pub use error::GadgetError;
pub use gadget::GadgetCore;
pub use gadget_transport::BoxedTransport;
