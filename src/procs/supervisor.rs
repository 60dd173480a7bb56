// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::process::ExitStatus;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::control::{close_command_line, KillRequests, StdinWriter};
use crate::fork::ProcessHandle;
use crate::msg::ProgramEvent;
use crate::pipe::{IoPump, Stderr, Stdout};
use crate::platform::{Platform, SignalOutcome, Termination};
use crate::procs::{ActiveGuard, ProgramLog, SupervisorState};
use crate::program::ProgramSpec;
use crate::Error;

/// Lines buffered between a pump and the event loop
const LINE_BUFFER: usize = 64;

/// Launch and monitor one run of a program
///
/// Rules:
///   - owns the process and everything attached to it for the whole run
///   - logs every line of stdout and stderr, in the order each stream produced them
///   - stops the program on request, by close command or signal, and forces it after the grace period
///   - does not return before the process is reaped and its output drained
pub struct Supervisor<P: Platform> {
    index: usize,
    spec: Arc<ProgramSpec>,
    title: Arc<str>,
    platform: Arc<P>,
    settings: Arc<Settings>,
    state: Arc<watch::Sender<SupervisorState>>,
    events: broadcast::Sender<ProgramEvent>,
}

/// Publishes Idle when dropped, including when the run unwinds
struct IdleOnDrop(Arc<watch::Sender<SupervisorState>>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        self.0.send_replace(SupervisorState::Idle);
    }
}

/// Progress of a stop request
#[derive(Debug, Default)]
struct Stop {
    requested: bool,
    deadline: Option<Instant>,
}

impl<P: Platform> Supervisor<P> {
    pub fn new(
        index: usize,
        spec: Arc<ProgramSpec>,
        platform: Arc<P>,
        settings: Arc<Settings>,
        state: Arc<watch::Sender<SupervisorState>>,
        events: broadcast::Sender<ProgramEvent>,
    ) -> Self {
        let title = Arc::from(spec.title.as_str());

        Self {
            index,
            spec,
            title,
            platform,
            settings,
            state,
            events,
        }
    }

    /// Runs the program to completion.
    ///
    /// The state is back to Idle and the guard released when this returns, whatever the outcome.
    pub async fn run(
        self,
        kills: KillRequests,
        guard: ActiveGuard,
    ) -> Result<Option<ExitStatus>, Error> {
        let idle = IdleOnDrop(Arc::clone(&self.state));
        let result = self.supervise(kills).await;

        drop(idle);
        match &result {
            Ok(status) => {
                info!(title = %self.title, "{} finished.", self.title);
                self.emit(ProgramEvent::Finished {
                    index: self.index,
                    title: self.title.clone(),
                    code: status.and_then(|status| status.code()),
                });
            }
            Err(err) => {
                error!(title = %self.title, error = %err, "{} could not be started", self.title);
                self.emit(ProgramEvent::Failed {
                    index: self.index,
                    title: self.title.clone(),
                    reason: err.to_string(),
                });
            }
        }

        drop(guard);
        result
    }

    async fn supervise(&self, mut kills: KillRequests) -> Result<Option<ExitStatus>, Error> {
        let mut log = ProgramLog::open(&self.settings.log_dir, self.title.clone()).await?;

        info!(title = %self.title, "{} starting.", self.title);
        let mut process = match self.platform.spawn(&self.spec) {
            Ok(process) => process,
            Err(err) => {
                log.error(&err).await;
                return Err(err);
            }
        };

        let handle = process.handle();
        let stdout = process.take_stdout().ok_or("stdout was not captured")?;
        let stderr = process.take_stderr().ok_or("stderr was not captured")?;

        let (out_tx, mut out_rx) = mpsc::channel(LINE_BUFFER);
        let (err_tx, mut err_rx) = mpsc::channel(LINE_BUFFER);
        let out_pump = IoPump::<Stdout>::new(self.title.clone(), out_tx).spawn(stdout);
        let err_pump = IoPump::<Stderr>::new(self.title.clone(), err_tx).spawn(stderr);

        let stdin = process
            .take_stdin()
            .map(|stdin| StdinWriter::spawn(self.title.clone(), stdin).0);
        let (mut exit, _waiter) = process.wait_for_exit();

        self.state.send_replace(SupervisorState::Running);
        self.emit(ProgramEvent::Started {
            index: self.index,
            title: self.title.clone(),
            pid: handle.pid(),
        });

        let mut stop = Stop::default();
        let mut out_open = true;
        let mut err_open = true;
        let mut kills_open = true;

        let exited = loop {
            tokio::select! {
                line = out_rx.recv(), if out_open => match line {
                    Some(line) => log.stdout(&line).await,
                    None => out_open = false,
                },
                line = err_rx.recv(), if err_open => match line {
                    Some(line) => log.stderr(&line).await,
                    None => err_open = false,
                },
                request = kills.recv(), if kills_open => match request {
                    Some(()) => self.request_stop(handle, stdin.as_ref(), &mut stop),
                    None => kills_open = false,
                },
                () = sleep_until(stop.deadline.unwrap_or_else(Instant::now)), if stop.deadline.is_some() => {
                    warn!(title = %self.title, pid = handle.pid(), "still running after the grace period, killing");
                    stop.deadline = None;
                    self.signal(handle, Termination::Forceful);
                }
                exited = &mut exit => break exited,
            }
        };

        // the pipes close once the process is gone, read what is still in them
        let drain = async {
            loop {
                tokio::select! {
                    line = out_rx.recv(), if out_open => match line {
                        Some(line) => log.stdout(&line).await,
                        None => out_open = false,
                    },
                    line = err_rx.recv(), if err_open => match line {
                        Some(line) => log.stderr(&line).await,
                        None => err_open = false,
                    },
                    else => break,
                }
            }
        };
        if timeout(self.settings.drain_timeout, drain).await.is_err() {
            // something the program left behind still holds the pipes
            warn!(title = %self.title, "output still open after exit, abandoning it");
            out_pump.abort();
            err_pump.abort();
        }

        let status = match exited {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                error!(title = %self.title, error = %err, "failed to wait for process");
                log.error(&err).await;
                None
            }
            Err(_) => {
                error!(title = %self.title, "exit waiter went away");
                None
            }
        };

        if let Some(status) = status.filter(|status| !status.success()) {
            log.error(&status).await;
        }
        debug!(title = %self.title, ?status, "run complete");

        Ok(status)
    }

    /// Applies the termination policy.
    ///
    /// The first request sends the close command if there is one, otherwise a graceful signal. Any
    ///  further request forces the process down.
    fn request_stop(&self, handle: ProcessHandle, stdin: Option<&StdinWriter>, stop: &mut Stop) {
        if stop.requested {
            warn!(title = %self.title, pid = handle.pid(), "stop requested again, killing");
            stop.deadline = None;
            self.signal(handle, Termination::Forceful);
            return;
        }

        stop.requested = true;
        stop.deadline = self
            .settings
            .grace_period
            .map(|grace| Instant::now() + grace);
        self.state.send_replace(SupervisorState::Stopping);
        self.emit(ProgramEvent::Stopping {
            index: self.index,
            title: self.title.clone(),
        });

        let (cmd, stdin) = match (self.spec.close_cmd(), stdin) {
            (Some(cmd), Some(stdin)) => (cmd, stdin),
            _ => {
                self.signal(handle, Termination::Graceful);
                return;
            }
        };

        match stdin.write(close_command_line(cmd)) {
            Ok(()) => info!(title = %self.title, "sent close command"),
            Err(err) => {
                warn!(title = %self.title, error = %err, "could not send close command, signaling instead");
                self.signal(handle, Termination::Graceful);
            }
        }
    }

    fn signal(&self, handle: ProcessHandle, termination: Termination) {
        match self.platform.terminate(handle, termination) {
            Ok(SignalOutcome::Delivered) => {
                info!(title = %self.title, pid = handle.pid(), ?termination, "signaled")
            }
            Ok(SignalOutcome::AlreadyExited) => {
                debug!(title = %self.title, pid = handle.pid(), "already exited")
            }
            Err(err) => {
                error!(title = %self.title, pid = handle.pid(), error = %err, "failed to signal")
            }
        }
    }

    fn emit(&self, event: ProgramEvent) {
        // no listeners is fine
        self.events.send(event).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_returns_to_idle_when_a_run_panics() {
        let (state, states) = watch::channel(SupervisorState::Running);
        let state = Arc::new(state);

        let run = tokio::spawn(async move {
            let _idle = IdleOnDrop(state);
            let echo: Result<(), &str> = Err("console went away");
            echo.expect("echo");
        });

        assert!(run.await.is_err());
        assert_eq!(*states.borrow(), SupervisorState::Idle);
    }
}
