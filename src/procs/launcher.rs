// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::control::{kill_channel, Delivery, KillSwitch};
use crate::msg::ProgramEvent;
use crate::platform::Platform;
use crate::procs::{ShutdownCoordinator, Supervisor, SupervisorState};
use crate::program::ProgramSpec;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    /// Start when idle, stop otherwise
    Toggle,
    /// Stop a starting or running program, never starts one
    Kill,
}

/// Handle to the launcher of one configured program
#[derive(Clone, Debug)]
pub struct ProgramHandle {
    index: usize,
    spec: Arc<ProgramSpec>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SupervisorState>,
}

impl ProgramHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> &str {
        &self.spec.title
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn is_checked(&self) -> bool {
        self.state().is_checked()
    }

    /// Follows the state of the program across runs
    pub fn watch(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    pub async fn toggle(&self) -> Result<(), Error> {
        self.send(Command::Toggle).await
    }

    pub async fn kill(&self) -> Result<(), Error> {
        self.send(Command::Kill).await
    }

    async fn send(&self, command: Command) -> Result<(), Error> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::from(format!("launcher for {} is gone", self.title())))
    }
}

/// Launch programs
///
/// Rules:
/// - one launcher per configured program, living as long as the application
/// - the only place that decides between starting and stopping the program
/// - at most one run at a time, a toggle during a run is a stop request
/// - may not start anything once shutdown has begun
struct Launcher<P: Platform> {
    index: usize,
    spec: Arc<ProgramSpec>,
    platform: Arc<P>,
    coordinator: ShutdownCoordinator,
    settings: Arc<Settings>,
    events: broadcast::Sender<ProgramEvent>,
    state: Arc<watch::Sender<SupervisorState>>,
    current: Option<KillSwitch>,
}

pub(crate) fn spawn<P: Platform>(
    index: usize,
    spec: ProgramSpec,
    platform: Arc<P>,
    coordinator: ShutdownCoordinator,
    settings: Arc<Settings>,
    events: broadcast::Sender<ProgramEvent>,
) -> ProgramHandle {
    let spec = Arc::new(spec);
    let (commands, rx) = mpsc::channel(16);
    let (state, state_rx) = watch::channel(SupervisorState::Idle);

    let launcher = Launcher {
        index,
        spec: Arc::clone(&spec),
        platform,
        coordinator,
        settings,
        events,
        state: Arc::new(state),
        current: None,
    };
    tokio::spawn(launcher.run(rx));

    ProgramHandle {
        index,
        spec,
        commands,
        state: state_rx,
    }
}

impl<P: Platform> Launcher<P> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            let state = *self.state.borrow();

            match (command, state) {
                (Command::Toggle, SupervisorState::Idle) => self.start(),
                (Command::Toggle, _)
                | (Command::Kill, SupervisorState::Starting)
                | (Command::Kill, SupervisorState::Running) => self.kill(),
                (Command::Kill, _) => {
                    debug!(title = %self.spec.title, %state, "nothing to kill")
                }
            }
        }

        debug!(title = %self.spec.title, "launcher stopped");
    }

    fn start(&mut self) {
        let guard = match self.coordinator.acquire() {
            Some(guard) => guard,
            None => {
                warn!(title = %self.spec.title, "shutting down, not starting");
                return;
            }
        };

        // published before the run exists, so the next toggle is a stop
        self.state.send_replace(SupervisorState::Starting);

        let (switch, requests) = kill_channel();
        self.current = Some(switch);

        let supervisor = Supervisor::new(
            self.index,
            Arc::clone(&self.spec),
            Arc::clone(&self.platform),
            Arc::clone(&self.settings),
            Arc::clone(&self.state),
            self.events.clone(),
        );
        tokio::spawn(supervisor.run(requests, guard));
    }

    fn kill(&self) {
        let switch = match &self.current {
            Some(switch) => switch,
            None => return,
        };

        match switch.request() {
            Delivery::Queued => debug!(title = %self.spec.title, "kill requested"),
            Delivery::AlreadyPending => debug!(title = %self.spec.title, "kill already pending"),
            Delivery::AlreadyIdle => debug!(title = %self.spec.title, "run already finished"),
        }
    }
}
