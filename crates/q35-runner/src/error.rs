use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that stop a launch.
///
/// Degraded-but-recoverable conditions (no emulator version, missing virtual drive, console mode
/// capture failures) are logged where they happen and never surface here.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unknown OS storage type: {}", path.display())]
    UnknownOsImageType { path: PathBuf },

    #[error("settings file {}:{line}: {message}", path.display())]
    SettingsSyntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid setting `{0}`: expected KEY=VALUE")]
    InvalidSettingPair(String),

    #[error("failed to read settings file {}: {source}", path.display())]
    SettingsIo { path: PathBuf, source: io::Error },

    #[error("failed to read firmware image {}: {source}", path.display())]
    FirmwareImage { path: PathBuf, source: io::Error },

    #[error("failed to copy variable store {} to {}: {source}", from.display(), to.display())]
    VarStoreCopy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("no emulator executable configured (set QEMU_PATH or QEMU_DIR)")]
    MissingExecutable,

    #[error("missing required command: {}", program.display())]
    ExecutableNotFound { program: PathBuf },

    #[error("failed to run {}: {source}", program.display())]
    Spawn { program: PathBuf, source: io::Error },

    #[error("could not find a version number in emulator output: {0:?}")]
    VersionParse(String),

    #[error(transparent)]
    Smbios(#[from] q35_smbios::SmbiosError),
}
