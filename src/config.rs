// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration file and runtime settings

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::program::ProgramSpec;
use crate::Error;

pub const DEFAULT_CONFIG: &str = "arbitray.json";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The programs to manage and which built-in controls to expose
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default)]
    pub programs: Vec<ProgramSpec>,
    #[serde(default)]
    pub hide_items: HideItems,
}

/// Built-in controls the user asked to hide
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HideItems {
    #[serde(default)]
    pub edit: bool,
    #[serde(default)]
    pub reload: bool,
    #[serde(default)]
    pub logs: bool,
    #[serde(default)]
    pub quit: bool,
}

/// Built-in controls that are exposed to the user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Controls {
    pub edit_config: bool,
    pub reload: bool,
    pub open_logs: bool,
    pub quit: bool,
}

impl Default for Controls {
    fn default() -> Self {
        HideItems::default().into()
    }
}

impl From<HideItems> for Controls {
    fn from(hide: HideItems) -> Self {
        Self {
            edit_config: !hide.edit,
            reload: !hide.reload,
            open_logs: !hide.logs,
            quit: !hide.quit,
        }
    }
}

impl Config {
    pub fn new(programs: Vec<ProgramSpec>) -> Self {
        Self {
            programs,
            hide_items: HideItems::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Loads the configuration, writing out an empty one if none exists yet
    pub fn load_or_default(path: &Path) -> Result<Self, Error> {
        match fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                fs::write(path, serde_json::to_string_pretty(&config)?)?;
                info!(path = %path.display(), "wrote default configuration");
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn controls(&self) -> Controls {
        self.hide_items.into()
    }

    /// Titles name the per-program log files, so they must be unique and usable as file names
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();

        for program in &self.programs {
            let title = program.title.as_str();
            if title.trim().is_empty() {
                return Err(Error::config("program title must not be empty"));
            }
            if title.contains('/') || title.contains('\\') || title == "." || title == ".." {
                return Err(Error::config(format!(
                    "program title is not a valid file name: {}",
                    title
                )));
            }
            if !seen.insert(title) {
                return Err(Error::config(format!("duplicate program title: {}", title)));
            }
            if program.program.as_os_str().is_empty() {
                return Err(Error::config(format!("{} has no program to run", title)));
            }
        }

        Ok(())
    }
}

/// Runtime settings, from the command line
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    /// Time allowed between a kill request and the forced kill, `None` waits forever
    pub grace_period: Option<Duration>,
    /// How long remaining output is read after the process exits
    pub drain_timeout: Duration,
    /// How this instance was started, repeated on reload
    pub invocation: Invocation,
}

/// Arguments and starting directory of this instance
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Everything after the program name
    pub args: Vec<OsString>,
    /// The directory the instance was started from, before any change of directory
    pub dir: Option<PathBuf>,
}

impl Invocation {
    pub fn current() -> Self {
        Self {
            args: std::env::args_os().skip(1).collect(),
            dir: std::env::current_dir().ok(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            grace_period: Some(DEFAULT_GRACE_PERIOD),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            invocation: Invocation::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_programs_and_hidden_items() {
        let config = Config::from_json(
            r#"{
                "Programs": [
                    { "Title": "One", "Program": "/bin/one" },
                    { "Title": "Two", "Program": "two", "Options": { "CloseCmd": "exit" } }
                ],
                "HideItems": { "Reload": true }
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.programs.len(), 2);
        assert_eq!(config.programs[1].close_cmd(), Some("exit"));

        let controls = config.controls();
        assert!(!controls.reload);
        assert!(controls.edit_config && controls.open_logs && controls.quit);
    }

    #[test]
    fn rejects_duplicate_titles() {
        let config = Config::new(vec![
            ProgramSpec::new("same", "/bin/a"),
            ProgramSpec::new("same", "/bin/b"),
        ]);

        let err = config.validate().expect_err("duplicate titles");
        assert!(matches!(err.kind(), ErrorKind::Config(_)));
    }

    #[test]
    fn rejects_titles_that_escape_the_log_dir() {
        let config = Config::new(vec![ProgramSpec::new("../etc/passwd", "/bin/a")]);
        assert!(config.validate().is_err());

        let config = Config::new(vec![ProgramSpec::new("  ", "/bin/a")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_is_written_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG);

        let config = Config::load_or_default(&path).expect("default config");
        assert!(config.programs.is_empty());
        assert!(path.exists());

        let reloaded = Config::load(&path).expect("written config loads");
        assert_eq!(reloaded, config);
    }
}
