//! Bundled demo gadgets, resolved by `--example <name|path>`. Illustrative
//! only — not part of the protocol core (§1 Non-goals).

pub mod echo;

use std::sync::Arc;

use crate::error::GadgetError;
use crate::gadget::GadgetCore;

/// Install the named demo's directive handlers onto `core`. Unknown names
/// fall through to the `echo` demo so `--example` always has something to
/// run during manual testing.
pub fn install(name: &str, core: &Arc<GadgetCore>) -> Result<(), GadgetError> {
    match name {
        _ => echo::install(core),
    }
    Ok(())
}
