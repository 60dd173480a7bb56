// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{value_parser, Arg, ArgMatches, Command};
use tokio::runtime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use arbitray::config::{self, Config, Invocation, Settings};
use arbitray::logging;
use arbitray::platform::UnixPlatform;
use arbitray::procs::{print_lines, Manager, ShutdownReason};
use arbitray::trigger::ConsoleTriggers;
use arbitray::Error;

const WORKING_DIR: &str = "working-dir";
const CONFIG: &str = "config";
const LOG_DIR: &str = "log-dir";
const GRACE_PERIOD: &str = "grace-period";
const LOG_LEVEL: &str = "log-level";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn default_opts(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn default_opts(self) -> Self {
        self.arg(
            Arg::new(WORKING_DIR)
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("directory to run from, relative paths in the configuration start here"),
        )
        .arg(
            Arg::new(CONFIG)
                .short('c')
                .long(CONFIG)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .default_value(config::DEFAULT_CONFIG)
                .help("programs to manage, created if missing"),
        )
        .arg(
            Arg::new(LOG_DIR)
                .short('l')
                .long(LOG_DIR)
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .default_value(config::DEFAULT_LOG_DIR)
                .help("where the application and program logs are written"),
        )
        .arg(
            Arg::new(GRACE_PERIOD)
                .short('g')
                .long(GRACE_PERIOD)
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .default_value("10")
                .help("time a program gets to exit after being asked before it is killed, 0 waits forever"),
        )
        .arg(
            Arg::new(LOG_LEVEL)
                .long(LOG_LEVEL)
                .value_name("FILTER")
                .env("ARBITRAY_LOG")
                .default_value("info")
                .help("log filter, e.g. info or arbitray=debug"),
        )
    }
}

fn main() -> Result<(), Error> {
    let args = Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .default_opts()
        .get_matches();

    let settings = setup(&args)?;
    let config = Config::load_or_default(&settings.config_path)?;

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let reason = runtime.block_on(async move {
        let manager = Manager::new(config, settings, Arc::new(UnixPlatform));
        let mut triggers = ConsoleTriggers::new()?;

        let mut events = manager.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => print_lines(Some(event.to_string())).await,
                    Err(RecvError::Lagged(missed)) => warn!(missed, "missed program events"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        print_lines(manager.menu()).await;

        manager.run(&mut triggers).await
    })?;

    // the console reader may still be blocked on stdin
    runtime.shutdown_timeout(Duration::from_secs(1));

    match reason {
        ShutdownReason::Quit => info!("arbitray exited"),
        ShutdownReason::Reload => info!("arbitray exited for reload"),
    }
    Ok(())
}

/// Working directory, log directory and logging, any failure here is fatal
fn setup(args: &ArgMatches) -> Result<Settings, Error> {
    // captured before changing directory, a reload starts over from the same place
    let invocation = Invocation::current();

    if let Some(dir) = args.get_one::<PathBuf>(WORKING_DIR) {
        std::env::set_current_dir(dir)
            .map_err(|err| Error::from(format!("cannot change to {}: {}", dir.display(), err)))?;
    }

    let log_dir = args
        .get_one::<PathBuf>(LOG_DIR)
        .cloned()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_LOG_DIR));
    std::fs::create_dir_all(&log_dir).map_err(|err| {
        Error::from(format!("cannot create {}: {}", log_dir.display(), err))
    })?;

    let filter = args
        .get_one::<String>(LOG_LEVEL)
        .map(String::as_str)
        .unwrap_or("info");
    logging::init(&log_dir, filter)?;

    let grace_period = match args.get_one::<u64>(GRACE_PERIOD).copied() {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(config::DEFAULT_GRACE_PERIOD),
    };

    Ok(Settings {
        config_path: args
            .get_one::<PathBuf>(CONFIG)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG)),
        log_dir,
        grace_period,
        drain_timeout: config::DEFAULT_DRAIN_TIMEOUT,
        invocation,
    })
}
