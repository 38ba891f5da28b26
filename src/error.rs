//! Top-level error type aggregating the config, transport, and protocol
//! failure kinds a running gadget can hit.

use thiserror::Error;

use crate::config::ConfigError;
use gadget_transport::error::TransportError;

#[derive(Error, Debug)]
pub enum GadgetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("operation not supported on the active transport")]
    NotSupported,
}
