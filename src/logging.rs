// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Application wide logging

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::Error;

pub const APP_LOG: &str = "arbitray.log";

pub fn app_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(APP_LOG)
}

/// Sends everything to the application log in `log_dir` and to stderr
///
/// `filter` uses the `EnvFilter` syntax, e.g. `info` or `arbitray=debug`.
pub fn init(log_dir: &Path, filter: &str) -> Result<(), Error> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|err| Error::from(format!("bad log filter {}: {}", filter, err)))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o660)
        .open(app_log_path(log_dir))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file)),
        )
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| Error::from(format!("logging already initialized: {}", err)))
}
