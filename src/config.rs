//! Persistent JSON state and per-gadget INI configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ini::Ini;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Reserved vendor_id value the hub treats as "not a real device"; used by
/// configuration templates and rejected at load time.
const RESERVED_VENDOR_ID: &str = "0000";
/// Placeholder credential value shipped in configuration templates.
const PLACEHOLDER: &str = "MISSING";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, #[source] source: io::Error },

    #[error("failed to parse INI configuration at {path}: {source}")]
    IniParse { path: PathBuf, #[source] source: ini::Error },

    #[error("missing required [GadgetSettings] key: {0}")]
    MissingKey(&'static str),

    #[error("{0} must be set to a real value, not the placeholder default")]
    PlaceholderValue(&'static str),

    #[error("vendor_id is reserved (\"0000\"); set a real Bluetooth vendor ID")]
    ReservedVendorId,

    #[error("persistent state file at {path} is missing required key: {key}")]
    MissingState { path: PathBuf, key: &'static str },

    #[error("failed to serialize persistent state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// `{transport_mode: BLE|CLASSIC, paired_hub_address: optional MAC}`,
/// written atomically on change (I5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistentState {
    #[serde(rename = "transportMode")]
    pub transport_mode: TransportMode,
    #[serde(rename = "echoBluetoothAddress", skip_serializing_if = "Option::is_none")]
    pub paired_hub_address: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportMode {
    #[serde(rename = "BLE")]
    Ble,
    #[serde(rename = "BT")]
    Classic,
}

impl PersistentState {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let state: PersistentState = serde_json::from_slice(&bytes)?;
        Ok(state)
    }

    /// Write to a sibling temp file, then rename over the target, so a
    /// crash mid-write cannot corrupt or truncate existing state.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &json).map_err(|source| ConfigError::Io { path: tmp_path.clone(), source })?;
        fs::rename(&tmp_path, path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Ok(())
    }
}

/// One entry of `[GadgetCapabilities]`: `"<version>"` or
/// `"<version> - <comma-separated supported types>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub interface: String,
    pub version: String,
    pub supported_types: Vec<String>,
}

fn parse_capability_value(interface: &str, value: &str) -> Capability {
    match value.split_once(" - ") {
        Some((version, types)) => Capability {
            interface: interface.to_string(),
            version: version.trim().to_string(),
            supported_types: types.split(',').map(|t| t.trim().to_string()).collect(),
        },
        None => Capability {
            interface: interface.to_string(),
            version: value.trim().to_string(),
            supported_types: Vec::new(),
        },
    }
}

/// Per-gadget configuration, as loaded from the INI file's
/// `[GadgetSettings]`/`[GadgetCapabilities]` sections. `endpoint_id` and
/// `friendly_name` are resolved later once the adapter's radio address is
/// known (see `GadgetConfig::resolve`).
#[derive(Debug, Clone)]
pub struct GadgetConfig {
    pub amazon_id: String,
    pub gadget_secret: String,
    pub endpoint_id: Option<String>,
    pub friendly_name: Option<String>,
    pub model_name: String,
    pub firmware_version: String,
    pub manufacturer_name: String,
    pub description: String,
    pub vendor_id: String,
    pub product_id: String,
    pub capabilities: Vec<Capability>,
    pub compat_mode: bool,
}

fn required_with_alias(
    section: &ini::Properties,
    key: &'static str,
    deprecated_alias: &'static str,
) -> Result<String, ConfigError> {
    let modern = section.get(key).map(str::to_string);
    let deprecated = section.get(deprecated_alias).map(str::to_string);

    let value = match (modern, deprecated) {
        (Some(v), _) => v,
        (None, Some(v)) => {
            warn!(key = deprecated_alias, "using deprecated configuration key alias");
            v
        }
        (None, None) => return Err(ConfigError::MissingKey(key)),
    };

    if value == PLACEHOLDER {
        return Err(ConfigError::PlaceholderValue(key));
    }
    Ok(value)
}

impl GadgetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::IniParse { path: path.to_path_buf(), source })?;

        let settings = ini
            .section(Some("GadgetSettings"))
            .ok_or(ConfigError::MissingKey("GadgetSettings"))?;

        let amazon_id = required_with_alias(settings, "amazonId", "deviceType")?;
        let gadget_secret = required_with_alias(settings, "alexaGadgetSecret", "deviceTypeSecret")?;
        let vendor_id = settings.get("bluetoothVendorID").unwrap_or(RESERVED_VENDOR_ID).to_string();
        if vendor_id == RESERVED_VENDOR_ID {
            return Err(ConfigError::ReservedVendorId);
        }

        let capabilities = ini
            .section(Some("GadgetCapabilities"))
            .map(|section| {
                section
                    .iter()
                    .map(|(interface, value)| parse_capability_value(interface, value))
                    .collect()
            })
            .unwrap_or_default();

        Ok(GadgetConfig {
            amazon_id,
            gadget_secret,
            endpoint_id: settings.get("endpointID").map(str::to_string),
            friendly_name: settings.get("friendlyName").map(str::to_string),
            model_name: settings.get("modelName").unwrap_or("Gadget").to_string(),
            firmware_version: settings.get("firmwareVersion").unwrap_or("1.0.0").to_string(),
            manufacturer_name: settings.get("manufacturerName").unwrap_or("Unknown").to_string(),
            description: settings.get("description").unwrap_or("").to_string(),
            vendor_id,
            product_id: settings.get("bluetoothProductID").unwrap_or("0000").to_string(),
            capabilities,
            compat_mode: settings.get("compatMode").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
        })
    }

    /// Apply the `endpoint_id`/`friendly_name` default rules once the
    /// adapter's radio address is known.
    pub fn resolve(&self, radio_address: &str) -> ResolvedGadgetConfig {
        let endpoint_id = self.endpoint_id.clone().unwrap_or_else(|| {
            let stripped: String = radio_address.chars().filter(|c| *c != ':').collect();
            let mut id = format!("AGT{stripped}");
            id.truncate(16);
            id
        });

        let friendly_name = self.friendly_name.clone().unwrap_or_else(|| {
            let suffix: String = endpoint_id.chars().rev().take(3).collect::<String>().chars().rev().collect();
            format!("Gadget{suffix}")
        });

        ResolvedGadgetConfig {
            amazon_id: self.amazon_id.clone(),
            gadget_secret: self.gadget_secret.clone(),
            endpoint_id,
            friendly_name,
            model_name: self.model_name.clone(),
            firmware_version: self.firmware_version.clone(),
            manufacturer_name: self.manufacturer_name.clone(),
            description: self.description.clone(),
            vendor_id: self.vendor_id.clone(),
            product_id: self.product_id.clone(),
            capabilities: self.capabilities.clone(),
            compat_mode: self.compat_mode,
        }
    }
}

/// `GadgetConfig` with `endpoint_id`/`friendly_name` defaults applied.
#[derive(Debug, Clone)]
pub struct ResolvedGadgetConfig {
    pub amazon_id: String,
    pub gadget_secret: String,
    pub endpoint_id: String,
    pub friendly_name: String,
    pub model_name: String,
    pub firmware_version: String,
    pub manufacturer_name: String,
    pub description: String,
    pub vendor_id: String,
    pub product_id: String,
    pub capabilities: Vec<Capability>,
    /// Widens assumed MTU headroom for older hub firmware (§4.8). The
    /// packetizer itself always uses the link's negotiated MTU; this only
    /// changes the conservative default assumed before negotiation completes.
    pub compat_mode: bool,
}
