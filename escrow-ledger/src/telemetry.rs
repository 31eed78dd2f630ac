//! Tracing subscriber setup

use crate::{config::LedgerSettings, EscrowResult};

/// Install a global fmt subscriber at the configured level.
///
/// Returns `Ok(false)` if a global subscriber was already installed.
pub fn init_tracing(settings: &LedgerSettings) -> EscrowResult<bool> {
    let level = settings.tracing_level()?;
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok();
    Ok(installed)
}
