//! Small process-related helpers shared across the workspace.
//!
//! Besides the Windows `CREATE_NO_WINDOW` shims, this crate owns the
//! terminate-then-kill shutdown sequence used when an external tool has to
//! be stopped before it exits on its own.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// How a child process ended after [`terminate_gracefully`].
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The process exited within the grace period after the polite signal.
    Graceful(std::process::ExitStatus),
    /// The process ignored the polite signal and was force-killed.
    Forced(std::process::ExitStatus),
}

#[cfg(feature = "tokio")]
impl Shutdown {
    /// The exit status regardless of how shutdown was achieved.
    pub fn status(&self) -> std::process::ExitStatus {
        match self {
            Shutdown::Graceful(s) | Shutdown::Forced(s) => *s,
        }
    }
}

/// Send the polite termination signal to a child process.
///
/// SIGTERM on Unix; on Windows there is no equivalent, so this is a no-op
/// and callers fall through to the force-kill in [`terminate_gracefully`].
/// Returns `false` if the child has already exited (no pid available).
#[cfg(feature = "tokio")]
pub fn request_termination(child: &tokio::process::Child) -> bool {
    match child.id() {
        Some(_pid) => {
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(_pid as i32), Signal::SIGTERM);
            }
            true
        }
        None => false,
    }
}

/// Stop a child process: polite signal, bounded grace period, then SIGKILL.
///
/// Always reaps the child (no zombies); the returned [`Shutdown`] reports
/// whether the grace period was enough.
#[cfg(feature = "tokio")]
pub async fn terminate_gracefully(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> std::io::Result<Shutdown> {
    if request_termination(child) {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return Ok(Shutdown::Graceful(status?));
        }
    }

    child.kill().await?;
    Ok(Shutdown::Forced(child.wait().await?))
}

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sigterm_is_enough_for_a_cooperative_process() {
        let mut child = tokio_command("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");

        let shutdown = terminate_gracefully(&mut child, Duration::from_secs(5))
            .await
            .expect("terminate");

        assert!(matches!(shutdown, Shutdown::Graceful(_)));
        assert!(!shutdown.status().success());
    }

    #[tokio::test]
    async fn sigterm_ignorers_get_killed() {
        // A shell that traps SIGTERM and keeps sleeping.
        let mut child = tokio_command("sh")
            .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
            .spawn()
            .expect("spawn shell");

        let shutdown = terminate_gracefully(&mut child, Duration::from_millis(300))
            .await
            .expect("terminate");

        assert!(matches!(shutdown, Shutdown::Forced(_)));
    }

    #[tokio::test]
    async fn already_exited_child_is_reaped() {
        let mut child = tokio_command("true").spawn().expect("spawn true");
        // Let it finish on its own first.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let shutdown = terminate_gracefully(&mut child, Duration::from_secs(1))
            .await
            .expect("terminate");
        assert!(shutdown.status().success());
    }
}
