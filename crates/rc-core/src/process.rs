//! Process utilities for relay supervision
//!
//! Liveness checks and termination by PID for relays that outlive the
//! invocation that started them (warm tunnels), plus the spawn-time hooks that
//! tie a relay's lifetime to ours or detach it from the terminal.

use std::io;

use tokio::process::Command;

/// Check if a process with the given PID is still alive
///
/// On Unix, uses kill(pid, 0) to check if the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // kill(pid, 0) returns 0 if the process exists and we have permission to signal it
    // ESRCH (No such process) indicates the process doesn't exist
    // EPERM (Operation not permitted) indicates the process exists but we can't signal it
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Send SIGTERM to a process
///
/// Returns `Ok(())` if the process is already gone.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {}", pid),
        ));
    }
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Ok(())
}

/// Make the child receive SIGTERM when this process dies, so a relay can
/// never be orphaned by a crash or SIGKILL of the invocation.
#[cfg(target_os = "linux")]
pub fn tie_to_parent(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
pub fn tie_to_parent(_cmd: &mut Command) {}

/// Run the child in its own session so terminal signals and hangups aimed at
/// the invocation do not reach it.
#[cfg(unix)]
pub fn detach_from_terminal(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn detach_from_terminal(_cmd: &mut Command) {}
