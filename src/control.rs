// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Control channels into a running supervisor

use std::borrow::Cow;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Error;

/// Outcome of a kill request, none of these block the sender
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The supervisor will see the request
    Queued,
    /// An earlier request has not been picked up yet, this one is folded into it
    AlreadyPending,
    /// The run already finished
    AlreadyIdle,
}

/// Creates the kill-request channel for one run
pub fn kill_channel() -> (KillSwitch, KillRequests) {
    let (tx, rx) = mpsc::channel(1);
    (KillSwitch { tx }, KillRequests { rx })
}

#[derive(Clone, Debug)]
pub struct KillSwitch {
    tx: mpsc::Sender<()>,
}

impl KillSwitch {
    pub fn request(&self) -> Delivery {
        match self.tx.try_send(()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(())) => Delivery::AlreadyPending,
            Err(TrySendError::Closed(())) => Delivery::AlreadyIdle,
        }
    }
}

#[derive(Debug)]
pub struct KillRequests {
    rx: mpsc::Receiver<()>,
}

impl KillRequests {
    /// Resolves with `None` once every switch is dropped
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// Sends text to the child's stdin through a dedicated writer task
#[derive(Clone, Debug)]
pub struct StdinWriter {
    tx: mpsc::Sender<String>,
}

impl StdinWriter {
    pub fn spawn<W>(title: Arc<str>, stdin: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(4);

        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(text) = rx.recv().await {
                if let Err(err) = stdin.write_all(text.as_bytes()).await {
                    warn!(title = %title, error = %err, "failed to write to stdin");
                    break;
                }
                if let Err(err) = stdin.flush().await {
                    warn!(title = %title, error = %err, "failed to flush stdin");
                    break;
                }
                debug!(title = %title, bytes = text.len(), "wrote to stdin");
            }
        });

        (Self { tx }, writer)
    }

    /// Queues `text` to be written verbatim
    pub fn write(&self, text: impl Into<String>) -> Result<(), Error> {
        self.tx.try_send(text.into()).map_err(|err| match err {
            TrySendError::Full(_) => Error::from("stdin writer is backed up"),
            TrySendError::Closed(_) => Error::from("stdin is closed"),
        })
    }
}

/// The close command as written to stdin, terminated by a newline
pub fn close_command_line(cmd: &str) -> Cow<'_, str> {
    if cmd.ends_with('\n') {
        Cow::Borrowed(cmd)
    } else {
        Cow::Owned(format!("{}\n", cmd))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[test]
    fn close_command_gets_one_terminator() {
        assert_eq!(close_command_line("quit\n"), "quit\n");
        assert_eq!(close_command_line("quit"), "quit\n");
        assert_eq!(close_command_line("a\r\n"), "a\r\n");
    }

    #[tokio::test]
    async fn kill_requests_never_block() {
        let (switch, mut requests) = kill_channel();

        assert_eq!(switch.request(), Delivery::Queued);
        assert_eq!(switch.request(), Delivery::AlreadyPending);

        assert_eq!(requests.recv().await, Some(()));
        assert_eq!(switch.request(), Delivery::Queued);

        drop(requests);
        assert_eq!(switch.request(), Delivery::AlreadyIdle);
    }

    #[tokio::test]
    async fn stdin_writer_writes_verbatim() {
        let (ours, theirs) = tokio::io::duplex(64);
        let (writer, task) = StdinWriter::spawn(Arc::from("test"), ours);

        writer.write("bye\n").expect("writer open");
        drop(writer);
        task.await.expect("writer panicked");

        let mut received = String::new();
        let mut theirs = theirs;
        theirs
            .read_to_string(&mut received)
            .await
            .expect("read back");
        assert_eq!(received, "bye\n");
    }

    #[tokio::test]
    async fn stdin_writer_reports_closed_stdin() {
        let (ours, theirs) = tokio::io::duplex(64);
        drop(theirs);
        let (writer, task) = StdinWriter::spawn(Arc::from("test"), ours);

        writer.write("first").expect("queued before the failure");
        task.await.expect("writer panicked");

        assert!(writer.write("second").is_err());
    }
}
