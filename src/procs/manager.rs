// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::{Config, Controls, Settings};
use crate::msg::{event_channel, ProgramEvent};
use crate::platform::Platform;
use crate::procs::launcher;
use crate::procs::{print_lines, ProgramHandle, ShutdownCoordinator, ShutdownReason};
use crate::trigger::{Trigger, TriggerSource};
use crate::Error;

/// Binds the configured programs to their launchers and routes the user's triggers.
///
/// Rules:
///  - must be created inside the runtime, the launchers are started right away
///  - a hidden control does nothing, even if its trigger arrives
///  - quitting or reloading always waits for every program to be reaped
pub struct Manager<P: Platform> {
    programs: Vec<ProgramHandle>,
    coordinator: ShutdownCoordinator,
    platform: Arc<P>,
    settings: Arc<Settings>,
    controls: Controls,
    events: broadcast::Sender<ProgramEvent>,
}

impl<P: Platform> Manager<P> {
    pub fn new(config: Config, settings: Settings, platform: Arc<P>) -> Self {
        let controls = config.controls();
        let coordinator = ShutdownCoordinator::new();
        let settings = Arc::new(settings);
        let events = event_channel();

        let programs = config
            .programs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                launcher::spawn(
                    index,
                    spec,
                    Arc::clone(&platform),
                    coordinator.clone(),
                    Arc::clone(&settings),
                    events.clone(),
                )
            })
            .collect();

        Self {
            programs,
            coordinator,
            platform,
            settings,
            controls,
            events,
        }
    }

    pub fn programs(&self) -> &[ProgramHandle] {
        &self.programs
    }

    pub fn program(&self, index: usize) -> Option<&ProgramHandle> {
        self.programs.get(index)
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgramEvent> {
        self.events.subscribe()
    }

    /// The programs with their toggle state, and the exposed controls
    pub fn menu(&self) -> Vec<String> {
        let mut menu: Vec<String> = self
            .programs
            .iter()
            .map(|program| {
                let check = if program.is_checked() { 'x' } else { ' ' };
                format!("  {} [{}] {}", program.index() + 1, check, program.title())
            })
            .collect();

        let controls = [
            (self.controls.edit_config, "edit", "edit the configuration"),
            (self.controls.reload, "reload", "stop everything and restart"),
            (self.controls.open_logs, "logs", "open the log directory"),
            (self.controls.quit, "quit", "stop everything and exit"),
        ];
        menu.extend(
            controls
                .iter()
                .filter(|(exposed, _, _)| *exposed)
                .map(|(_, name, about)| format!("  {:<8} {}", name, about)),
        );

        menu
    }

    /// Acts on one trigger, returns the reason to shut down if it asks for that
    pub async fn handle(&self, trigger: Trigger) -> Result<Option<ShutdownReason>, Error> {
        match trigger {
            Trigger::Toggle(index) => match self.programs.get(index) {
                Some(program) => program.toggle().await?,
                None => warn!(index, "no program to toggle"),
            },
            Trigger::EditConfig if self.controls.edit_config => {
                self.open(&self.settings.config_path)
            }
            Trigger::OpenLogs if self.controls.open_logs => self.open(&self.settings.log_dir),
            Trigger::Reload if self.controls.reload => return Ok(Some(ShutdownReason::Reload)),
            Trigger::QuitAll if self.controls.quit => return Ok(Some(ShutdownReason::Quit)),
            Trigger::Interrupted => return Ok(Some(ShutdownReason::Quit)),
            Trigger::Status => print_lines(self.menu()).await,
            hidden => warn!(trigger = ?hidden, "control is hidden, ignoring"),
        }

        Ok(None)
    }

    /// Handles triggers until one asks to quit or reload, or the source runs dry, then shuts down
    pub async fn run<T>(&self, triggers: &mut T) -> Result<ShutdownReason, Error>
    where
        T: TriggerSource + ?Sized,
    {
        while let Some(trigger) = triggers.next_trigger().await {
            if let Some(reason) = self.handle(trigger).await? {
                return self.shutdown(reason).await;
            }
        }

        info!("no more triggers");
        self.shutdown(ShutdownReason::Quit).await
    }

    /// Stops and reaps every program, then finalizes for `reason`
    pub async fn shutdown(&self, reason: ShutdownReason) -> Result<ShutdownReason, Error> {
        self.coordinator.request_all(&self.programs).await;
        self.coordinator
            .finalize(reason, self.platform.as_ref(), &self.settings.invocation)
    }

    fn open(&self, path: &Path) {
        if let Err(err) = self.platform.open(path) {
            error!(path = %path.display(), error = %err, "failed to open");
        }
    }
}
