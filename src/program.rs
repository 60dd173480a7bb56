// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Program specifications as read from the configuration file

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A single launchable program.
///
/// Field names follow the on-disk configuration, i.e. `Title`, `Program`, `Arguments`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgramSpec {
    /// Display name, unique across the configuration; also names the log file
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tooltip: String,
    /// Path to the executable
    pub program: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub options: ProgramOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgramOptions {
    /// Overrides the working directory of the child
    #[serde(rename = "CWD", default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Hide the program's window on launch, this has no effect on unix
    #[serde(default)]
    pub hide: bool,
    /// Written to stdin to ask the program to exit, instead of signaling it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_cmd: Option<String>,
}

impl ProgramSpec {
    pub fn new(title: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            tooltip: String::new(),
            program: program.into(),
            arguments: Vec::new(),
            options: ProgramOptions::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(cwd.into());
        self
    }

    pub fn with_close_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.options.close_cmd = Some(cmd.into());
        self
    }

    /// The graceful close command, an empty string counts as unset
    pub fn close_cmd(&self) -> Option<&str> {
        self.options
            .close_cmd
            .as_deref()
            .filter(|cmd| !cmd.is_empty())
    }

    /// Directory the child is started in.
    ///
    /// The configured override wins, otherwise the directory holding the executable. A bare
    ///  program name (looked up on the PATH) inherits the current directory.
    pub fn working_dir(&self) -> Option<&Path> {
        if let Some(cwd) = &self.options.cwd {
            return Some(cwd);
        }

        self.program
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

/// Each program logs to a file named after its title
pub fn log_file_name(title: &str) -> String {
    format!("{}.log", title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_close_cmd_is_unset() {
        let spec = ProgramSpec::new("a", "/bin/a").with_close_cmd("");
        assert_eq!(spec.close_cmd(), None);

        let spec = spec.with_close_cmd("quit\n");
        assert_eq!(spec.close_cmd(), Some("quit\n"));
    }

    #[test]
    fn working_dir_prefers_override() {
        let spec = ProgramSpec::new("a", "/opt/tools/a");
        assert_eq!(spec.working_dir(), Some(Path::new("/opt/tools")));

        let spec = spec.with_cwd("/tmp");
        assert_eq!(spec.working_dir(), Some(Path::new("/tmp")));
    }

    #[test]
    fn bare_program_inherits_working_dir() {
        let spec = ProgramSpec::new("a", "sleep");
        assert_eq!(spec.working_dir(), None);
    }

    #[test]
    fn deserializes_pascal_case_field_names() {
        let spec: ProgramSpec = serde_json::from_str(
            r#"{
                "Title": "Server",
                "Program": "/srv/server",
                "Arguments": ["-p", "8080"],
                "Options": { "CWD": "/srv", "Hide": true, "CloseCmd": "stop\n" }
            }"#,
        )
        .expect("valid spec");

        assert_eq!(spec.title, "Server");
        assert_eq!(spec.arguments, vec!["-p", "8080"]);
        assert_eq!(spec.options.cwd.as_deref(), Some(Path::new("/srv")));
        assert!(spec.options.hide);
        assert_eq!(spec.close_cmd(), Some("stop\n"));
    }
}
