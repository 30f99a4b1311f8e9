// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use georep_reconciler::ReconcilerConfig;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slog_error_chain::SlogInlineError;
use std::time::Duration;
use thiserror::Error;

/// Configuration for georep-cli
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Logging configuration.
    pub log: ConfigLogging,
    /// Reconciler tunables. Missing fields take the reconciler's defaults.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl Default for Config {
    /// Used when no configuration file is given: warnings and errors go to
    /// stderr, and the reconciler polls the simulator once a second.
    fn default() -> Self {
        Self {
            log: ConfigLogging::StderrTerminal {
                level: ConfigLoggingLevel::Warn,
            },
            reconciler: ReconcilerConfig {
                poll_interval_secs: Duration::from_secs(1),
                ..Default::default()
            },
        }
    }
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        load_toml(path)
    }
}

/// Read and parse a TOML file.
pub(crate) fn load_toml<T: DeserializeOwned>(
    path: &Utf8Path,
) -> Result<T, LoadError> {
    let file_contents = std::fs::read_to_string(path)
        .map_err(|err| LoadError::Io { path: path.into(), err })?;
    toml::from_str(&file_contents)
        .map_err(|err| LoadError::Parse { path: path.into(), err })
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\"")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\"")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}
