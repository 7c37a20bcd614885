//! Process-group signal delivery.

use std::io;

/// Sends SIGTERM (or SIGKILL when `forceful`) to the process group led by
/// `pid`, falling back to the single process when no such group exists.
/// A process that is already gone counts as success.
#[cfg(unix)]
pub fn kill_process_group(pid: u32, forceful: bool) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))?;
    let pid = Pid::from_raw(raw);
    let signal = if forceful {
        Signal::SIGKILL
    } else {
        Signal::SIGTERM
    };

    // Only signal the group when the child leads it; otherwise the group
    // could be our own.
    let result = match getpgid(Some(pid)) {
        Ok(pgid) if pgid == pid => killpg(pgid, signal),
        _ => kill(pid, signal),
    };

    match result {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
    }
}

/// SIGKILLs whatever is left in the group led by an already reaped `pid`.
///
/// Signals the group only, never the bare pid, which may have been reused.
/// An empty group counts as success.
#[cfg(unix)]
pub fn kill_orphaned_group(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))?;
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
    }
}

/// Windows has no group left to address once the root process is gone.
#[cfg(windows)]
pub fn kill_orphaned_group(_pid: u32) -> io::Result<()> {
    Ok(())
}

/// Terminates the process tree rooted at `pid` with `taskkill`.
#[cfg(windows)]
pub fn kill_process_group(pid: u32, forceful: bool) -> io::Result<()> {
    use std::process::{Command, Stdio};

    let mut command = Command::new("taskkill");
    command.arg("/T");
    if forceful {
        command.arg("/F");
    }
    let status = command
        .args(["/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill exited with {status}"),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_process_is_not_an_error() {
        // Spawn and reap a short-lived child so its pid is known to be free.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        kill_process_group(pid, false).unwrap();
        kill_process_group(pid, true).unwrap();
    }

    #[test]
    fn test_orphaned_group_kill_tolerates_empty_group() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        kill_orphaned_group(pid).unwrap();
    }
}
