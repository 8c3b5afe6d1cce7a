//! Build settings lookup.
//!
//! Settings are a flat `KEY -> VALUE` map with a second, build-scoped map layered on top for the
//! few keys a build can override (`SMM_ENABLED`, `QEMU_CORE_NUM`). The map is assembled once and
//! never mutated during a run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, RunnerError};

pub const QEMU_PATH: &str = "QEMU_PATH";
pub const QEMU_DIR: &str = "QEMU_DIR";
pub const BUILD_OUTPUT_BASE: &str = "BUILD_OUTPUT_BASE";
pub const VERSION: &str = "VERSION";
pub const SMM_ENABLED: &str = "SMM_ENABLED";
pub const QEMU_ACCEL: &str = "QEMU_ACCEL";
pub const PATH_TO_OS: &str = "PATH_TO_OS";
pub const CPU_MODEL: &str = "CPU_MODEL";
pub const QEMU_CORE_NUM: &str = "QEMU_CORE_NUM";
pub const DFCI_VAR_STORE: &str = "DFCI_VAR_STORE";
pub const DFCI_FILES: &str = "DFCI_FILES";
pub const INSTALL_FILES: &str = "INSTALL_FILES";
pub const BOOT_TO_FRONT_PAGE: &str = "BOOT_TO_FRONT_PAGE";
pub const ALT_BOOT_ENABLE: &str = "ALT_BOOT_ENABLE";
pub const VIRTUAL_DRIVE_PATH: &str = "VIRTUAL_DRIVE_PATH";
pub const ENABLE_NETWORK: &str = "ENABLE_NETWORK";
pub const TPM_DEV: &str = "TPM_DEV";
pub const QEMU_HEADLESS: &str = "QEMU_HEADLESS";
pub const GDB_SERVER: &str = "GDB_SERVER";
pub const SERIAL_PORT: &str = "SERIAL_PORT";
pub const MONITOR_PORT: &str = "MONITOR_PORT";
pub const SHUTDOWN_AFTER_RUN: &str = "SHUTDOWN_AFTER_RUN";

/// Prefix marking a build-scoped key (`BLD_*_SMM_ENABLED=FALSE`).
const BUILD_PREFIX: &str = "BLD_";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
    build_values: BTreeMap<String, String>,
}

impl Settings {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_build(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_values.insert(key.into(), value.into());
        self
    }

    /// Build settings from `KEY=VALUE` strings, as given on the command line.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default().merge_pairs(pairs)
    }

    /// Layer `KEY=VALUE` strings over these settings. Later values win.
    pub fn merge_pairs<I, S>(mut self, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = split_pair(pair)
                .ok_or_else(|| RunnerError::InvalidSettingPair(pair.to_string()))?;
            self.insert(key, value);
        }
        Ok(self)
    }

    /// Read a settings file of `KEY=VALUE` lines. Blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| RunnerError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings = Self::default();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = split_pair(line) else {
                return Err(RunnerError::SettingsSyntax {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    message: format!("expected KEY=VALUE, got {line:?}"),
                });
            };
            settings.insert(key, value);
        }
        Ok(settings)
    }

    fn insert(&mut self, key: &str, value: &str) {
        match build_scoped_key(key) {
            Some(key) => self.build_values.insert(key.to_string(), value.to_string()),
            None => self.values.insert(key.to_string(), value.to_string()),
        };
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Build-scoped lookup: the build map first, then the general map.
    pub fn get_build(&self, key: &str) -> Option<&str> {
        self.build_values
            .get(key)
            .map(String::as_str)
            .or_else(|| self.get(key))
    }

    /// `true` when `key` is set to `true` in any letter case.
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// `true` when `key` is set to a non-empty value. `FALSE` and `0` count as set.
    pub fn is_truthy(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }
}

fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (key, value) = pair.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some((key, value.trim()))
}

/// `BLD_*_KEY` and `BLD_<TARGET>_KEY` name the build-scoped `KEY`.
fn build_scoped_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(BUILD_PREFIX)?;
    let (_target, key) = rest.split_once('_')?;
    (!key.is_empty()).then_some(key)
}
