//! CLI command implementations

mod open;
mod shortcuts;

pub use open::{open_command, run_editor, OpenContext, OpenRequest};
pub use shortcuts::{forget_command, list_shortcuts_command};
