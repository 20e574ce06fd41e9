//! rcursor: rcode with the Cursor editor profile as the default

use std::process::ExitCode;

fn main() -> ExitCode {
    rcode::run_main("rcursor", Some("cursor"))
}
