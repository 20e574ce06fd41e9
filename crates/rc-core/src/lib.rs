//! rc-core: discovery, tunnelling and persistence for rcode
//!
//! This crate finds the editor IPC socket behind an SSH alias, forwards it to
//! a local socket for the duration of one command, and keeps the shortcut
//! registry. The `rcode` binary orchestrates these pieces.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod locator;
pub mod process;
pub mod registry;
pub mod time;
pub mod tunnel;
pub mod types;

pub use error::{RcodeError, Result};
pub use locator::{Located, SessionLocator};
pub use registry::{LatestSessionPointer, RegistryStore, ShortcutEntry};
pub use tunnel::{TunnelHandle, TunnelSupervisor, WarmPool};
pub use types::{RemoteSession, Target, TunnelState};
