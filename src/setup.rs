//! Interactive first-run/reconfiguration wizard driven by `--setup` (§4.8).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{PersistentState, TransportMode};
use crate::error::GadgetError;

fn prompt(label: &str) -> io::Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_yes_no(label: &str, default_no: bool) -> io::Result<bool> {
    let hint = if default_no { "y/N" } else { "Y/n" };
    print!("{label} ({hint}) ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let answer = input.trim().to_lowercase();
    Ok(match answer.as_str() {
        "" => !default_no,
        "y" | "yes" => true,
        _ => false,
    })
}

/// Run the interactive wizard, writing both the INI configuration and the
/// persistent JSON state file. Creates parent directories as needed.
pub fn run(config_path: &Path, state_path: &Path) -> Result<(), GadgetError> {
    println!("Gadget first-run setup\n-----------------------");

    let stdin_err = |source: io::Error| io_err(PathBuf::from("<stdin>"), source);

    let amazon_id = prompt("Amazon device type ID (amazonId)").map_err(stdin_err)?;
    let gadget_secret = prompt("Gadget secret (alexaGadgetSecret)").map_err(stdin_err)?;
    let friendly_name = prompt("Friendly name (blank for default)").map_err(stdin_err)?;
    let vendor_id = prompt("Bluetooth vendor ID (4 hex digits)").map_err(stdin_err)?;
    let product_id = prompt("Bluetooth product ID (4 hex digits, blank for 0000)").map_err(stdin_err)?;

    let use_classic = prompt_yes_no("Use Classic Bluetooth (RFCOMM) instead of BLE?", true).map_err(stdin_err)?;
    let compat_mode = prompt_yes_no("Enable compatibility mode for older hub firmware?", true).map_err(stdin_err)?;

    let transport_mode = if use_classic { TransportMode::Classic } else { TransportMode::Ble };

    write_config_file(config_path, &amazon_id, &gadget_secret, &friendly_name, &vendor_id, &product_id, compat_mode)?;

    let state = PersistentState { transport_mode, paired_hub_address: None };
    state.save(state_path)?;

    info!(?transport_mode, "setup complete");
    println!("\nConfiguration written to {}", config_path.display());
    println!("State written to {}", state_path.display());
    Ok(())
}

fn write_config_file(
    path: &Path,
    amazon_id: &str,
    gadget_secret: &str,
    friendly_name: &str,
    vendor_id: &str,
    product_id: &str,
    compat_mode: bool,
) -> Result<(), GadgetError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| io_err(parent.to_path_buf(), source))?;
    }

    let mut ini = String::new();
    ini.push_str("[GadgetSettings]\n");
    ini.push_str(&format!("amazonId={amazon_id}\n"));
    ini.push_str(&format!("alexaGadgetSecret={gadget_secret}\n"));
    if !friendly_name.is_empty() {
        ini.push_str(&format!("friendlyName={friendly_name}\n"));
    }
    ini.push_str(&format!("bluetoothVendorID={vendor_id}\n"));
    ini.push_str(&format!("bluetoothProductID={}\n", if product_id.is_empty() { "0000" } else { product_id }));
    ini.push_str(&format!("compatMode={}\n", compat_mode));
    ini.push_str("\n[GadgetCapabilities]\n");

    fs::write(path, ini).map_err(|source| io_err(path.to_path_buf(), source))?;
    Ok(())
}

fn io_err(path: PathBuf, source: std::io::Error) -> GadgetError {
    GadgetError::Config(crate::config::ConfigError::Io { path, source })
}
