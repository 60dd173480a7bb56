// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::Invocation;
use crate::platform::Platform;
use crate::procs::ProgramHandle;
use crate::Error;

/// Why the application is shutting down
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    Quit,
    /// Start a fresh instance with the same arguments once everything is reaped
    Reload,
}

/// Counts active supervisors and gates the final exit on all of them finishing.
///
/// Rules:
///  - the count is raised before a supervisor task starts and lowered exactly once when it ends
///  - once shutdown begins no new supervisor may start
///  - nothing is finalized while any supervisor is still active
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    active: AtomicUsize,
    closing: AtomicBool,
    idle: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new active supervisor, `None` once shutdown has begun
    pub fn acquire(&self) -> Option<ActiveGuard> {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard {
            inner: Arc::clone(&self.inner),
        };

        if self.is_closing() {
            // dropping the guard gives the count back and wakes any waiter
            return None;
        }

        Some(guard)
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Stops new starts, asks every program to stop, and waits for all supervisors to finish
    pub async fn request_all(&self, programs: &[ProgramHandle]) {
        self.inner.closing.store(true, Ordering::SeqCst);

        let active = programs
            .iter()
            .filter(|program| program.state().is_checked())
            .count();
        info!(active, "stopping all programs");

        // launchers only act on this for a run that is starting or running
        let delivered = join_all(programs.iter().map(ProgramHandle::kill)).await;
        for (program, result) in programs.iter().zip(delivered) {
            if let Err(err) = result {
                debug!(title = program.title(), error = %err, "launcher already gone");
            }
        }

        self.wait_idle().await;
        info!("all programs stopped");
    }

    /// Resolves once no supervisor is active
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Final step of shutdown, to be called once `request_all` has returned.
    ///
    /// Starts the replacement instance for a reload, the caller exits afterwards.
    pub fn finalize<P>(
        &self,
        reason: ShutdownReason,
        platform: &P,
        invocation: &Invocation,
    ) -> Result<ShutdownReason, Error>
    where
        P: Platform + ?Sized,
    {
        debug_assert_eq!(self.active(), 0, "finalized with active supervisors");
        self.inner.closing.store(true, Ordering::SeqCst);

        match reason {
            ShutdownReason::Reload => {
                info!("reloading");
                platform.re_execute_self(invocation)?;
            }
            ShutdownReason::Quit => info!("quitting"),
        }

        Ok(reason)
    }
}

/// Held by a supervisor for the duration of its run
#[derive(Debug)]
pub struct ActiveGuard {
    inner: Arc<Inner>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn guards_count_active_supervisors() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.active(), 0);

        let first = coordinator.acquire().expect("open");
        let second = coordinator.acquire().expect("open");
        assert_eq!(coordinator.active(), 2);

        drop(first);
        assert_eq!(coordinator.active(), 1);
        drop(second);
        assert_eq!(coordinator.active(), 0);
    }

    #[tokio::test]
    async fn wait_idle_waits_for_the_last_guard() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.acquire().expect("open");

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        timeout(Duration::from_secs(5), waiter)
            .await
            .expect("woken")
            .expect("waiter panicked");
    }

    #[tokio::test]
    async fn no_starts_after_shutdown_begins() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_all(&[]).await;

        assert!(coordinator.is_closing());
        assert!(coordinator.acquire().is_none());
        assert_eq!(coordinator.active(), 0);
    }
}
