// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{ExitStatus, Stdio};

use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ErrorKind;
use crate::program::ProgramSpec;
use crate::Error;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

impl StdIoConf {
    /// Output is always captured, stdin only when there is a close command to send over it
    pub fn for_program(spec: &ProgramSpec) -> Self {
        Self {
            stdin: if spec.close_cmd().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            },
            stderr: Stdio::piped(),
            stdout: Stdio::piped(),
        }
    }
}

/// Identifies a spawned child, the child also leads its own process group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: Pid,
}

impl ProcessHandle {
    pub fn from_raw(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn as_pid(&self) -> Pid {
        self.pid
    }
}

/// One OS process and the pipes attached to it
#[derive(Debug)]
pub struct ChildProcess {
    handle: ProcessHandle,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ChildProcess {
    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Hands the child to a task that waits for it to exit.
    ///
    /// The receiver resolves exactly once, with the exit status or the error from waiting.
    pub fn wait_for_exit(self) -> (oneshot::Receiver<io::Result<ExitStatus>>, JoinHandle<()>) {
        let (tx, rx) = oneshot::channel();
        let ChildProcess {
            handle, mut child, ..
        } = self;

        let waiter = tokio::spawn(async move {
            let status = child.wait().await;
            debug!(pid = handle.pid(), ?status, "process exited");
            // the supervisor may already be gone, nothing to report to then
            tx.send(status).ok();
        });

        (rx, waiter)
    }
}

pub fn spawn_child(spec: &ProgramSpec) -> Result<ChildProcess, Error> {
    let stdio = StdIoConf::for_program(spec);

    let mut command = std::process::Command::new(&spec.program);
    command
        .args(&spec.arguments)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr)
        // signals go to the whole group, so helpers the program started stop with it
        .process_group(0);

    if let Some(dir) = spec.working_dir() {
        command.current_dir(dir);
    }

    let mut command = Command::from(command);
    command.kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ErrorKind::SpawnFailed {
        title: spec.title.clone(),
        source,
    })?;

    let pid = child.id().ok_or("spawned child has no pid")?;
    let handle = ProcessHandle::from_raw(pid as i32);
    debug!(title = %spec.title, pid, "spawned child in its own process group");

    Ok(ChildProcess {
        handle,
        stdin: child.stdin.take(),
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdin_is_only_piped_for_close_commands() {
        let spec = ProgramSpec::new("true", "/bin/sh").with_args(["-c", "exit 0"]);
        let mut child = spawn_child(&spec).expect("spawn sh");
        assert!(child.take_stdin().is_none());
        assert!(child.take_stdout().is_some());
        assert!(child.take_stderr().is_some());
        let (exit, _) = child.wait_for_exit();
        assert!(exit.await.expect("waiter").expect("wait").success());

        let spec = spec.with_close_cmd("quit");
        let mut child = spawn_child(&spec).expect("spawn sh");
        assert!(child.take_stdin().is_some());
        let (exit, _) = child.wait_for_exit();
        exit.await.expect("waiter").expect("wait");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let spec = ProgramSpec::new("missing", "/nonexistent/arbitray-test-program");
        let err = spawn_child(&spec).expect_err("nothing to run");
        assert!(matches!(err.kind(), ErrorKind::SpawnFailed { .. }));
    }
}
