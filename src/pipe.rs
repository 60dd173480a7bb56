// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug)]
pub struct Stdout;
#[derive(Clone, Copy, Debug)]
pub struct Stderr;

// A marker trait to designate which output stream of the child a pump reads
pub trait Stream: Clone + Copy + Debug + Send + Sync + 'static {
    fn display() -> &'static str;
}

impl Stream for Stdout {
    fn display() -> &'static str {
        "stdout"
    }
}

impl Stream for Stderr {
    fn display() -> &'static str {
        "stderr"
    }
}

/// Turns one output stream of a child into lines on a channel.
///
/// A pump serves exactly one stream of one run. It ends at end-of-stream, on a read error, or when
///  the receiving side is gone, and is never restarted.
#[derive(Debug)]
pub struct IoPump<S: Stream> {
    title: Arc<str>,
    lines: mpsc::Sender<String>,
    ghost: PhantomData<S>,
}

impl<S: Stream> IoPump<S> {
    pub fn new(title: Arc<str>, lines: mpsc::Sender<String>) -> Self {
        Self {
            title,
            lines,
            ghost: PhantomData,
        }
    }

    pub fn spawn<R>(self, reader: R) -> JoinHandle<usize>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(reader))
    }

    /// Forwards lines until the stream ends, returns how many were forwarded
    pub async fn run<R>(self, reader: R) -> usize
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        let mut forwarded = 0;

        loop {
            buf.clear();

            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    debug!(title = %self.title, stream = S::display(), forwarded, "end of stream");
                    break;
                }
                Ok(_) => {
                    if self.lines.send(decode_line(&buf)).await.is_err() {
                        debug!(title = %self.title, stream = S::display(), "line receiver closed");
                        break;
                    }
                    forwarded += 1;
                }
                Err(err) => {
                    warn!(title = %self.title, stream = S::display(), error = %err, "read failed, stopping");
                    break;
                }
            }
        }

        forwarded
    }
}

/// Strips the line terminator, `\n` or `\r\n`, invalid UTF-8 is replaced
pub fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    fn title() -> Arc<str> {
        Arc::from("test")
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn decode_strips_terminators() {
        assert_eq!(decode_line(b"ready\n"), "ready");
        assert_eq!(decode_line(b"ready\r\n"), "ready");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn forwards_lines_in_order() {
        let (tx, rx) = mpsc::channel(1);
        let pump = IoPump::<Stdout>::new(title(), tx).spawn(&b"one\ntwo\r\n\nlast"[..]);

        let lines = collect(rx).await;
        assert_eq!(lines, vec!["one", "two", "", "last"]);
        assert_eq!(pump.await.expect("pump panicked"), 4);
    }

    #[tokio::test]
    async fn stops_when_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let forwarded = IoPump::<Stderr>::new(title(), tx)
            .run(&b"one\ntwo\n"[..])
            .await;
        assert_eq!(forwarded, 0);
    }

    struct Failing {
        sent: bool,
    }

    impl AsyncRead for Failing {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "broken")));
            }
            self.sent = true;
            buf.put_slice(b"before error\n");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn read_error_ends_the_pump() {
        let (tx, rx) = mpsc::channel(4);
        let forwarded = IoPump::<Stdout>::new(title(), tx)
            .run(Failing { sent: false })
            .await;

        assert_eq!(forwarded, 1);
        assert_eq!(collect(rx).await, vec!["before error"]);
    }
}
