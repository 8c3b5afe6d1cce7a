//! Emulator version probing.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, RunnerError};
use crate::runner::retry_text_busy;

/// Dotted version components reported by the emulator, e.g. `["8", "2", "1"]`.
///
/// Only the major component drives quirk decisions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulatorVersion {
    components: Vec<String>,
}

impl EmulatorVersion {
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn major(&self) -> Option<&str> {
        self.components.first().map(String::as_str)
    }

    pub fn major_number(&self) -> Option<u32> {
        self.major()?.parse().ok()
    }
}

impl fmt::Display for EmulatorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("."))
    }
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"version\s+(\d+(?:\.\d+)*)").expect("version regex"))
}

/// Extract the first `version <digits.dots>` token from `--version` output.
pub fn parse_version_output(output: &str) -> Result<EmulatorVersion> {
    let caps = version_regex()
        .captures(output)
        .ok_or_else(|| RunnerError::VersionParse(output.trim().to_string()))?;
    Ok(EmulatorVersion::new(caps[1].split('.')))
}

/// Ask the emulator for its version.
///
/// Returns `Ok(None)` when there is no executable, it cannot be started, or it exits non-zero;
/// the captured output is logged. Returns `Err` only when the emulator ran successfully but its
/// output had no recognizable version. Callers treat both the same way and skip version-gated
/// quirks.
pub fn query_version(executable: Option<&Path>) -> Result<Option<EmulatorVersion>> {
    let Some(executable) = executable else {
        return Ok(None);
    };

    let output = match retry_text_busy(|| Command::new(executable).arg("--version").output()) {
        Ok(output) => output,
        Err(err) => {
            tracing::error!("failed to run {} --version: {err}", executable.display());
            return Ok(None);
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        tracing::error!("{}", text.trim_end());
        tracing::error!("{} --version exited with {}", executable.display(), output.status);
        return Ok(None);
    }

    parse_version_output(&text).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qemu_banner() {
        let version = parse_version_output(
            "QEMU emulator version 8.2.1\nCopyright (c) 2003-2023 Fabrice Bellard and the QEMU Project developers\n",
        )
        .unwrap();
        assert_eq!(version.components(), ["8", "2", "1"]);
        assert_eq!(version.major(), Some("8"));
        assert_eq!(version.major_number(), Some(8));
        assert_eq!(version.to_string(), "8.2.1");
    }

    #[test]
    fn parses_distro_suffixed_banner() {
        let version =
            parse_version_output("QEMU emulator version 6.2.0 (Debian 1:6.2+dfsg-2ubuntu6.19)\n")
                .unwrap();
        assert_eq!(version.components(), ["6", "2", "0"]);
    }

    #[test]
    fn missing_version_is_a_parse_error() {
        let err = parse_version_output("qemu: unsupported option\n").unwrap_err();
        assert!(matches!(err, RunnerError::VersionParse(_)));
    }

    #[test]
    fn no_executable_means_no_version() {
        assert_eq!(query_version(None).unwrap(), None);
    }

    #[test]
    fn unstartable_executable_means_no_version() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("qemu-system-x86_64");
        assert_eq!(query_version(Some(&missing)).unwrap(), None);
    }
}
