//! Transport-layer error types

use thiserror::Error;

/// Errors raised while framing, fragmenting, or decoding wire bytes.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device not connected")]
    Disconnected,

    #[error("communication timeout")]
    Timeout,

    #[error("invalid MTU {0}: must leave room for a packet header")]
    InvalidMtu(u16),

    #[error("host bluetooth stack error: {0}")]
    BluetoothError(String),

    #[error("GATT characteristic not found: {0}")]
    GattCharacteristicNotFound(String),

    #[error("bluetooth pairing required")]
    PairingRequired,

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Packetizer(#[from] PacketizerError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from the Classic Bluetooth SPP framer.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("packet truncated before ETX")]
    Truncated,

    #[error("escape byte at end of packet")]
    DanglingEscape,
}

/// Errors from the BLE packetizer/reassembler.
#[derive(Error, Debug)]
pub enum PacketizerError {
    #[error("packet shorter than minimum header size")]
    ShortHeader,

    #[error("declared length {declared} exceeds remaining bytes {available}")]
    LengthMismatch { declared: usize, available: usize },

    #[error("unknown tx_type bits 0b{0:02b}")]
    UnknownTxType(u8),
}

/// Errors from the schema-driven byte codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("prost decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("prost encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("directive payload did not match declared namespace/name schema")]
    SchemaMismatch,
}
