//! Minimal demo gadget: logs every directive it receives and echoes
//! `Custom.Gadget/StateUpdate` back as an event. Useful for exercising a hub
//! pairing without writing a real accessory profile.

use std::sync::Arc;

use gadget_transport::Directive;
use tracing::info;

use crate::gadget::GadgetCore;

pub fn install(core: &Arc<GadgetCore>) {
    let log_core = core.clone();
    core.on(
        "Custom.Gadget",
        "StateUpdate",
        Box::new(move |directive| {
            let Directive::StateUpdate(update) = directive else { return };
            info!(state = %update.state, "echo demo received state update");

            let core = log_core.clone();
            let state = update.state;
            tokio::spawn(async move {
                let _ = core
                    .send_custom_event("Custom.Gadget", "StateUpdateAck", &format!("{{\"state\":\"{state}\"}}"))
                    .await;
            });
        }),
    );

    core.on(
        "Alexa.Presentation.APL",
        "SetIndicator",
        Box::new(|_directive| {
            info!("echo demo received SetIndicator directive");
        }),
    );
}
