//! Encoder process handling: spawn, signal, pid file

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::encoder::EncoderCommand;

/// Spawn the encoder with both output streams piped
pub(super) fn spawn_encoder(program: &Path, command: &EncoderCommand) -> io::Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // SAFETY: pre_exec runs in the forked child before exec and only calls
    // prctl, which is async-signal-safe.
    #[cfg(target_os = "linux")]
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// SIGTERM, wait `grace`, then SIGKILL
pub(super) async fn graceful_kill(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        terminate(pid);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => return,
            Err(_) => debug!(pid, "Encoder ignored SIGTERM, sending SIGKILL"),
        }
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Send SIGTERM to `pid`
pub(super) fn terminate(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only
    // yields ESRCH.
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

pub(super) async fn write_pid_file(path: &Path, pid: u32) {
    if let Err(e) = tokio::fs::write(path, format!("{}\n", pid)).await {
        warn!(path = %path.display(), error = %e, "Failed to write pid file");
    }
}

pub(super) async fn remove_pid_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove pid file"),
    }
}

/// Terminate an encoder left behind by a previous run
///
/// Only the pid recorded in `pid_file` is considered, and only when its
/// process name still matches `program`. The pid file is removed either way.
pub(super) async fn sweep_orphan(pid_file: &Path, program: &Path) {
    let content = match tokio::fs::read_to_string(pid_file).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(path = %pid_file.display(), error = %e, "Failed to read pid file");
            return;
        }
    };

    match content.trim().parse::<u32>() {
        Ok(pid) if is_encoder_process(pid, program).await => {
            info!(pid, "Terminating encoder left over from a previous run");
            terminate(pid);
        }
        Ok(pid) => debug!(pid, "Stale pid file does not name a running encoder"),
        Err(_) => warn!(path = %pid_file.display(), "Ignoring malformed pid file"),
    }

    remove_pid_file(pid_file).await;
}

#[cfg(target_os = "linux")]
async fn is_encoder_process(pid: u32, program: &Path) -> bool {
    let Some(name) = program.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match tokio::fs::read_to_string(format!("/proc/{}/comm", pid)).await {
        // comm is truncated to 15 bytes
        Ok(comm) => comm_matches(comm.trim_end(), name),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
async fn is_encoder_process(_pid: u32, _program: &Path) -> bool {
    false
}

fn comm_matches(comm: &str, program_name: &str) -> bool {
    const TASK_COMM_LEN: usize = 15;
    let expected = program_name.as_bytes();
    let expected = &expected[..expected.len().min(TASK_COMM_LEN)];
    !comm.is_empty() && comm.as_bytes() == expected
}
