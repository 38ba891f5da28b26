//! CONTROL-stream command handling: device-info/device-features queries
//! exchanged before the directive/event channel is used.

use tracing::warn;

const GET_DEVICE_INFORMATION: u8 = 0x01;
const GET_DEVICE_FEATURES: u8 = 0x02;

/// `0x01` marks an AGT-style gadget in the feature-response byte. The
/// original source documents this only implicitly ("offset 0 = AGT"); the
/// exact byte is preserved rather than re-derived (see SPEC_FULL.md §9).
const AGT_FEATURE_BIT: u8 = 0x01;

/// Transport kinds a gadget can report in `GET_DEVICE_INFORMATION`
/// responses. Only BLE is produced by this implementation; Classic
/// Bluetooth has no control stream of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedTransport {
    BluetoothLowEnergy,
}

/// Static device facts the control handler answers queries with. Supplied
/// by the gadget core from loaded configuration.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub name: String,
    pub device_type: String,
    pub supported_transports: Vec<SupportedTransport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformationResponse {
    pub serial_number: String,
    pub name: String,
    pub device_type: String,
    pub supported_transports: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFeaturesResponse {
    pub features: u8,
    pub device_attributes: u32,
}

/// A decoded CONTROL-stream command, and the driver's response to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    DeviceInformation(DeviceInformationResponse),
    DeviceFeatures(DeviceFeaturesResponse),
    Ignored,
}

/// Handle one CONTROL-stream command byte, producing the response payload
/// to write back (or `None` for a command this implementation ignores).
pub fn handle(command: u8, info: &DeviceInfo) -> ControlResponse {
    match command {
        GET_DEVICE_INFORMATION => ControlResponse::DeviceInformation(DeviceInformationResponse {
            serial_number: info.serial_number.clone(),
            name: info.name.clone(),
            device_type: info.device_type.clone(),
            supported_transports: info
                .supported_transports
                .iter()
                .map(|t| match t {
                    SupportedTransport::BluetoothLowEnergy => "BLUETOOTH_LOW_ENERGY",
                })
                .collect(),
        }),
        GET_DEVICE_FEATURES => ControlResponse::DeviceFeatures(DeviceFeaturesResponse {
            features: AGT_FEATURE_BIT,
            device_attributes: 0,
        }),
        other => {
            warn!(command = other, "ignoring unknown CONTROL-stream command");
            ControlResponse::Ignored
        }
    }
}
