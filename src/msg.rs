// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

/// Capacity of the status broadcast, slow listeners miss the oldest events
pub const EVENT_CAPACITY: usize = 64;

/// Status changes of the managed programs, for whatever front end is listening
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgramEvent {
    Started {
        index: usize,
        title: Arc<str>,
        pid: u32,
    },
    Stopping {
        index: usize,
        title: Arc<str>,
    },
    /// The run is over and its output drained, `code` is `None` when killed by a signal
    Finished {
        index: usize,
        title: Arc<str>,
        code: Option<i32>,
    },
    /// The program could not be started
    Failed {
        index: usize,
        title: Arc<str>,
        reason: String,
    },
}

impl fmt::Display for ProgramEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { title, pid, .. } => write!(f, "{} started ({})", title, pid),
            Self::Stopping { title, .. } => write!(f, "{} stopping", title),
            Self::Finished {
                title,
                code: Some(code),
                ..
            } => write!(f, "{} finished with {}", title, code),
            Self::Finished { title, .. } => write!(f, "{} finished", title),
            Self::Failed { title, reason, .. } => write!(f, "{} failed: {}", title, reason),
        }
    }
}

pub fn event_channel() -> broadcast::Sender<ProgramEvent> {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_read_as_console_lines() {
        let title: Arc<str> = Arc::from("server");

        let failed = ProgramEvent::Failed {
            index: 0,
            title: title.clone(),
            reason: "no such file".to_string(),
        };
        assert_eq!(failed.to_string(), "server failed: no such file");

        let killed = ProgramEvent::Finished {
            index: 0,
            title,
            code: None,
        };
        assert_eq!(killed.to_string(), "server finished");
    }
}
