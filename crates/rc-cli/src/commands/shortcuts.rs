//! Shortcut management commands

use anyhow::Result;

use rc_core::error::{NotFoundError, RcodeError};
use rc_core::time::current_time_millis;
use rc_core::RegistryStore;

use crate::output::{format_latest, format_shortcuts, print_info, print_success, print_warning};

/// Print saved shortcuts and the latest host
pub fn list_shortcuts_command(registry: &RegistryStore) -> Result<()> {
    let shortcuts = registry.shortcuts()?;
    println!("{}", format_shortcuts(&shortcuts));

    match registry.latest() {
        Ok(latest) => print_info(&format_latest(&latest, current_time_millis())),
        Err(RcodeError::NotFound(NotFoundError::Latest)) => {
            tracing::debug!("No latest session recorded");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Remove a saved shortcut
pub fn forget_command(registry: &RegistryStore, name: &str) -> Result<()> {
    match registry.forget(name) {
        Ok(entry) => {
            print_success(&format!(
                "Removed shortcut '{}' ({}:{})",
                entry.name, entry.host, entry.path
            ));
            Ok(())
        }
        Err(e @ RcodeError::NotFound(_)) => {
            print_warning(&format!("Saved shortcuts are in {:?}", registry.path()));
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
