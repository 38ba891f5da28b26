//! Alexa Gadgets accessory-side toolkit: a single daemon binary that either
//! runs the `--setup` wizard or starts a bundled demo gadget.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agt_gadget::config::{GadgetConfig, PersistentState, TransportMode};
use agt_gadget::{cli, demos, setup, GadgetCore};
use bluer::Session;
use clap::Parser;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "/etc/agt-gadget/gadget.ini";
const DEFAULT_STATE_PATH: &str = "/var/lib/agt-gadget/state.json";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = cli::Cli::parse();
    let config_path = cli.config_file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let state_path = cli.state_file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));

    if cli.setup {
        return match setup::run(&config_path, &state_path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("setup failed: {err}");
                ExitCode::from(1)
            }
        };
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(run_gadget(cli, config_path, state_path))
}

async fn run_gadget(cli: cli::Cli, config_path: PathBuf, state_path: PathBuf) -> ExitCode {
    let config = match GadgetConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    let persistent = match PersistentState::load(&state_path) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("state error: {err}");
            return ExitCode::from(1);
        }
    };

    let session = match Session::new().await {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "failed to open BlueZ session");
            return ExitCode::from(2);
        }
    };
    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(err) => {
            error!(%err, "failed to open default Bluetooth adapter");
            return ExitCode::from(2);
        }
    };
    if let Err(err) = adapter.set_powered(true).await {
        error!(%err, "failed to power on Bluetooth adapter");
        return ExitCode::from(2);
    }
    let radio_address = match adapter.address().await {
        Ok(address) => address.to_string(),
        Err(err) => {
            error!(%err, "failed to read adapter address");
            return ExitCode::from(2);
        }
    };
    let resolved_config = config.resolve(&radio_address);
    let adapter_name = adapter.name().to_string();

    let transport: agt_gadget::BoxedTransport = match persistent.transport_mode {
        TransportMode::Ble => Arc::new(agt_gadget::transport::ble::BleTransport::new(
            adapter,
            resolved_config.friendly_name.clone(),
            resolved_config.compat_mode,
        )),
        TransportMode::Classic => Arc::new(agt_gadget::transport::classic::ClassicTransport::new(
            session,
            adapter_name,
            resolved_config.friendly_name.clone(),
        )),
    };

    let core = GadgetCore::new(resolved_config, state_path, persistent, transport);

    if let Some(name) = cli.example.as_deref() {
        if let Err(err) = demos::install(name, &core) {
            error!(%err, demo = name, "failed to install demo");
            return ExitCode::from(1);
        }
    }

    if cli.clear {
        if let Err(err) = core.clear() {
            error!(%err, "failed to clear stored bond");
            return ExitCode::from(1);
        }
    }

    if let Err(err) = core.start().await {
        error!(%err, "failed to start gadget core");
        return ExitCode::from(2);
    }

    if cli.pair {
        if let Err(err) = core.set_discoverable(true).await {
            warn!(%err, "failed to force pairing advertisement");
        }
    }

    info!("gadget running, press Ctrl+C to stop");
    await_shutdown().await;

    if let Err(err) = core.disconnect().await {
        warn!(%err, "error during shutdown disconnect");
    }

    ExitCode::SUCCESS
}

/// Two-SIGINT shutdown: the first signal requests a clean disconnect, the
/// second forces an immediate exit in case the transport is wedged.
async fn await_shutdown() {
    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupted.clone();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

    let result = ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            warn!("second interrupt received, forcing exit");
            std::process::exit(130);
        }
        let _ = tx.try_send(());
    });

    if let Err(err) = result {
        warn!(%err, "failed to install signal handler, running without graceful shutdown");
        std::future::pending::<()>().await;
    }

    rx.recv().await;
    info!("interrupt received, shutting down");
}
