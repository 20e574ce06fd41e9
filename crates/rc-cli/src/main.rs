//! rcode
//!
//! Opens paths in VS Code, locally or on an SSH host whose editor session is
//! connected from this machine.

use std::process::ExitCode;

fn main() -> ExitCode {
    rcode::run_main("rcode", None)
}
