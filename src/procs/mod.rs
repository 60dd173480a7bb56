// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod launcher;
mod logger;
mod manager;
mod shutdown;
mod supervisor;

pub use launcher::ProgramHandle;
pub use logger::{print_lines, ProgramLog};
pub use manager::Manager;
pub use shutdown::{ActiveGuard, ShutdownCoordinator, ShutdownReason};
pub use supervisor::Supervisor;

use std::fmt;

/// Lifecycle of one program.
///
/// Idle -> Starting -> Running -> Stopping -> Idle, a failed spawn goes from Starting straight
///  back to Idle. Only Idle and "not Idle" are shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl SupervisorState {
    /// The toggle shown to the user is checked for every state but Idle
    pub fn is_checked(self) -> bool {
        self != Self::Idle
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}
