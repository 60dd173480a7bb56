// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::program::log_file_name;
use crate::Error;

const TIMESTAMP: &str = "%Y/%m/%d %H:%M:%S";

type Console = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-program log file, with every line echoed to the console.
///
/// Rules:
///  - one append-only file per program, named after its title
///  - console lines are tagged with the title, `[title] text` or `[title] Error: text`
///  - a failed write is reported but never ends the run, a console that fails once is dropped
pub struct ProgramLog {
    title: Arc<str>,
    file: File,
    console: Option<Console>,
}

impl ProgramLog {
    pub async fn open(dir: &Path, title: Arc<str>) -> Result<Self, Error> {
        let path = dir.join(log_file_name(&title));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o660)
            .open(&path)
            .await?;

        Ok(Self {
            title,
            file,
            console: Some(Box::new(tokio::io::stdout())),
        })
    }

    /// Echoes to `console` instead of stdout
    pub fn with_console<W>(mut self, console: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.console = Some(Box::new(console));
        self
    }

    pub async fn stdout(&mut self, line: &str) {
        self.echo(line).await;
        self.append(line).await;
    }

    pub async fn stderr(&mut self, line: &str) {
        let line = format!("Error: {}", line);
        self.echo(&line).await;
        self.append(&line).await;
    }

    /// Records a supervision error in the program's own log, the console sees it through tracing
    pub async fn error<E>(&mut self, err: &E)
    where
        E: Display + Sync + ?Sized,
    {
        self.append(&format!("Error: {}", err)).await;
    }

    async fn echo(&mut self, text: &str) {
        let console = match self.console.as_mut() {
            Some(console) => console,
            None => return,
        };

        let line = console_line(&self.title, text);
        let written = match console.write_all(line.as_bytes()).await {
            Ok(()) => console.flush().await,
            Err(err) => Err(err),
        };

        if let Err(err) = written {
            warn!(title = %self.title, error = %err, "console is gone, logging to file only");
            self.console = None;
        }
    }

    async fn append(&mut self, text: &str) {
        let line = format!("{} {}\n", Local::now().format(TIMESTAMP), text);

        let written = match self.file.write_all(line.as_bytes()).await {
            Ok(()) => self.file.flush().await,
            Err(err) => Err(err),
        };

        if let Err(err) = written {
            warn!(title = %self.title, error = %err, "failed to write program log");
        }
    }
}

/// Writes lines to stdout, a console that is gone is only reported
pub async fn print_lines<I>(lines: I)
where
    I: IntoIterator<Item = String>,
{
    let mut text = String::new();
    for line in lines {
        text.push_str(&line);
        text.push('\n');
    }

    let mut stdout = tokio::io::stdout();
    let written = match stdout.write_all(text.as_bytes()).await {
        Ok(()) => stdout.flush().await,
        Err(err) => Err(err),
    };

    if let Err(err) = written {
        warn!(error = %err, "failed to write to the console");
    }
}

/// `[title] text`, as shown on the console
pub fn console_line(title: &str, text: &str) -> String {
    format!("[{}] {}\n", title, text)
}
