// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The operating system facilities the supervisors rely on

use std::path::Path;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use tracing::{debug, info};

use crate::config::Invocation;
use crate::fork::{self, ChildProcess, ProcessHandle};
use crate::program::ProgramSpec;
use crate::Error;

/// How a process is asked to stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// An interrupt the program can handle and clean up after
    Graceful,
    /// Cannot be caught
    Forceful,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// There was nothing left to signal
    AlreadyExited,
}

/// Process operations, resolved once for the target platform
pub trait Platform: Send + Sync + 'static {
    fn spawn(&self, spec: &ProgramSpec) -> Result<ChildProcess, Error>;

    fn terminate(
        &self,
        process: ProcessHandle,
        termination: Termination,
    ) -> Result<SignalOutcome, Error>;

    /// Starts a new instance of this binary as it was invoked, the caller is expected to exit afterwards
    fn re_execute_self(&self, invocation: &Invocation) -> Result<(), Error>;

    /// Opens a file or directory with the desktop's default handler
    fn open(&self, path: &Path) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnixPlatform;

#[cfg(target_os = "macos")]
const OPENER: &str = "open";
#[cfg(not(target_os = "macos"))]
const OPENER: &str = "xdg-open";

impl Platform for UnixPlatform {
    fn spawn(&self, spec: &ProgramSpec) -> Result<ChildProcess, Error> {
        fork::spawn_child(spec)
    }

    fn terminate(
        &self,
        process: ProcessHandle,
        termination: Termination,
    ) -> Result<SignalOutcome, Error> {
        let signal = match termination {
            Termination::Graceful => Signal::SIGINT,
            Termination::Forceful => Signal::SIGKILL,
        };

        match killpg(process.as_pid(), signal) {
            Ok(()) => {
                debug!(pid = process.pid(), signal = ?signal, "signaled process group");
                Ok(SignalOutcome::Delivered)
            }
            Err(Errno::ESRCH) => {
                debug!(pid = process.pid(), signal = ?signal, "process group already gone");
                Ok(SignalOutcome::AlreadyExited)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn re_execute_self(&self, invocation: &Invocation) -> Result<(), Error> {
        let exe = std::env::current_exe()?;
        info!(exe = %exe.display(), args = ?invocation.args, "starting new instance");

        let mut command = std::process::Command::new(exe);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.dir {
            command.current_dir(dir);
        }

        // the new instance outlives this one, so it is not waited on
        command.spawn()?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<(), Error> {
        debug!(path = %path.display(), opener = OPENER, "opening");

        tokio::process::Command::new(OPENER)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminating_an_exited_process_is_not_an_error() {
        let spec = ProgramSpec::new("exits", "/bin/sh").with_args(["-c", "exit 0"]);
        let child = UnixPlatform.spawn(&spec).expect("spawn sh");
        let handle = child.handle();

        let (exit, _) = child.wait_for_exit();
        exit.await.expect("waiter").expect("wait");

        let outcome = UnixPlatform
            .terminate(handle, Termination::Graceful)
            .expect("gone is fine");
        assert_eq!(outcome, SignalOutcome::AlreadyExited);
    }

    #[tokio::test]
    async fn forceful_termination_kills() {
        let spec = ProgramSpec::new("sleeps", "/bin/sh").with_args(["-c", "exec sleep 30"]);
        let child = UnixPlatform.spawn(&spec).expect("spawn sh");
        let handle = child.handle();
        let (exit, _) = child.wait_for_exit();

        let outcome = UnixPlatform
            .terminate(handle, Termination::Forceful)
            .expect("signal");
        assert_eq!(outcome, SignalOutcome::Delivered);

        let status = exit.await.expect("waiter").expect("wait");
        assert!(!status.success());
    }
}
