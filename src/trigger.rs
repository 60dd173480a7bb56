// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! User triggers and where they come from

use std::collections::VecDeque;
use std::io;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, warn};

use crate::procs::print_lines;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Start or stop the program at this index
    Toggle(usize),
    EditConfig,
    Reload,
    OpenLogs,
    QuitAll,
    /// The application itself was asked to terminate, this can not be hidden
    Interrupted,
    /// Show the programs and their state
    Status,
}

impl FromStr for Trigger {
    type Err = Error;

    /// Parses a console command, programs are numbered from 1 like the menu shows them
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut words = s.split_whitespace();
        let command = words.next().map(str::to_ascii_lowercase);

        let trigger = match (command.as_deref(), words.next(), words.next()) {
            (Some("toggle"), Some(number), None) | (Some("t"), Some(number), None) => {
                Trigger::Toggle(parse_position(number)?)
            }
            (Some("edit"), None, None) | (Some("e"), None, None) => Trigger::EditConfig,
            (Some("reload"), None, None) | (Some("r"), None, None) => Trigger::Reload,
            (Some("logs"), None, None) | (Some("l"), None, None) => Trigger::OpenLogs,
            (Some("quit"), None, None) | (Some("q"), None, None) => Trigger::QuitAll,
            (Some("status"), None, None) | (Some("list"), None, None) | (Some("s"), None, None) => {
                Trigger::Status
            }
            (Some(number), None, None) => Trigger::Toggle(parse_position(number)?),
            _ => return Err(format!("unknown command: {}", s.trim()).into()),
        };

        Ok(trigger)
    }
}

fn parse_position(number: &str) -> Result<usize, Error> {
    match number.parse::<usize>() {
        Ok(position) if position > 0 => Ok(position - 1),
        _ => Err(format!("not a program number: {}", number).into()),
    }
}

/// Produces the user's triggers, `None` once there will be no more
#[async_trait]
pub trait TriggerSource: Send {
    async fn next_trigger(&mut self) -> Option<Trigger>;
}

/// A fixed list of triggers
#[async_trait]
impl TriggerSource for VecDeque<Trigger> {
    async fn next_trigger(&mut self) -> Option<Trigger> {
        self.pop_front()
    }
}

/// Commands typed on stdin, SIGINT and SIGTERM quit
pub struct ConsoleTriggers {
    lines: Option<Lines<BufReader<Stdin>>>,
    interrupt: Signal,
    terminate: Signal,
}

enum Input {
    Line(io::Result<Option<String>>),
    Signal,
}

impl ConsoleTriggers {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            lines: Some(BufReader::new(tokio::io::stdin()).lines()),
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }
}

async fn next_line(lines: &mut Option<Lines<BufReader<Stdin>>>) -> io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => futures::future::pending().await,
    }
}

#[async_trait]
impl TriggerSource for ConsoleTriggers {
    async fn next_trigger(&mut self) -> Option<Trigger> {
        loop {
            let input = tokio::select! {
                _ = self.interrupt.recv() => Input::Signal,
                _ = self.terminate.recv() => Input::Signal,
                line = next_line(&mut self.lines) => Input::Line(line),
            };

            let line = match input {
                Input::Signal => return Some(Trigger::Interrupted),
                Input::Line(Ok(Some(line))) => line,
                Input::Line(Ok(None)) => {
                    // without a console the signals still work
                    debug!("stdin closed");
                    self.lines = None;
                    continue;
                }
                Input::Line(Err(err)) => {
                    warn!(error = %err, "failed to read stdin");
                    self.lines = None;
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match line.parse() {
                Ok(trigger) => return Some(trigger),
                Err(err) => print_lines(Some(err.to_string())).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("1".parse::<Trigger>().expect("toggle"), Trigger::Toggle(0));
        assert_eq!("toggle 3".parse::<Trigger>().expect("toggle"), Trigger::Toggle(2));
        assert_eq!(" Quit ".parse::<Trigger>().expect("quit"), Trigger::QuitAll);
        assert_eq!("r".parse::<Trigger>().expect("reload"), Trigger::Reload);
        assert_eq!("edit".parse::<Trigger>().expect("edit"), Trigger::EditConfig);
        assert_eq!("logs".parse::<Trigger>().expect("logs"), Trigger::OpenLogs);
        assert_eq!("list".parse::<Trigger>().expect("status"), Trigger::Status);
    }

    #[test]
    fn rejects_bad_commands() {
        assert!("0".parse::<Trigger>().is_err());
        assert!("toggle".parse::<Trigger>().is_err());
        assert!("quit now".parse::<Trigger>().is_err());
        assert!("launch".parse::<Trigger>().is_err());
        assert!("".parse::<Trigger>().is_err());
    }

    #[tokio::test]
    async fn queued_triggers_run_out() {
        let mut source: VecDeque<Trigger> = vec![Trigger::Toggle(0), Trigger::QuitAll].into();

        assert_eq!(source.next_trigger().await, Some(Trigger::Toggle(0)));
        assert_eq!(source.next_trigger().await, Some(Trigger::QuitAll));
        assert_eq!(source.next_trigger().await, None);
    }
}
