// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use arbitray::config::Invocation;
use arbitray::fork::{ChildProcess, ProcessHandle};
use arbitray::platform::{Platform, SignalOutcome, Termination, UnixPlatform};
use arbitray::procs::{ProgramHandle, SupervisorState};
use arbitray::program::ProgramSpec;
use arbitray::Error;

pub const WAIT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Spawn(String),
    Terminate(u32, Termination),
    ReExecute(Invocation),
    Open(PathBuf),
}

/// Real processes, but records every call and never starts a new instance of anything
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<Call>>,
}

impl RecordingPlatform {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("poisoned").clone()
    }

    pub fn spawns(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Spawn(_)))
            .count()
    }

    pub fn terminations(&self) -> Vec<Termination> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Terminate(_, termination) => Some(termination),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("poisoned").push(call);
    }
}

impl Platform for RecordingPlatform {
    fn spawn(&self, spec: &ProgramSpec) -> Result<ChildProcess, Error> {
        self.record(Call::Spawn(spec.title.clone()));
        UnixPlatform.spawn(spec)
    }

    fn terminate(
        &self,
        process: ProcessHandle,
        termination: Termination,
    ) -> Result<SignalOutcome, Error> {
        self.record(Call::Terminate(process.pid(), termination));
        UnixPlatform.terminate(process, termination)
    }

    fn re_execute_self(&self, invocation: &Invocation) -> Result<(), Error> {
        self.record(Call::ReExecute(invocation.clone()));
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<(), Error> {
        self.record(Call::Open(path.to_path_buf()));
        Ok(())
    }
}

/// A shell script as a program
pub fn shell(title: &str, script: &str) -> ProgramSpec {
    ProgramSpec::new(title, "/bin/sh").with_args(["-c", script])
}

pub async fn within<F: Future>(future: F) -> F::Output {
    timeout(WAIT, future).await.expect("timed out")
}

pub async fn wait_state(program: &ProgramHandle, state: SupervisorState) {
    let mut states = program.watch();
    within(states.wait_for(|current| *current == state))
        .await
        .expect("launcher gone");
}

/// Polls a file until it contains `needle`, returns the whole content
pub async fn wait_for_text(path: &Path, needle: &str) -> String {
    within(async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if text.contains(needle) {
                    return text;
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
}
