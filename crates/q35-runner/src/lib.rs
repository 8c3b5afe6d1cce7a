//! Launches QEMU (Q35 machine) to boot a firmware build.
//!
//! A run is a straight line:
//!
//! 1. [`config::Settings`] supplies flat string-keyed build settings.
//! 2. [`rules::plan`] walks an ordered table of launch rules, each appending emulator flags to a
//!    [`cmdline::ArgumentList`], and produces a [`rules::LaunchPlan`].
//! 3. [`runner::run`] spawns the emulator, normalizes its exit code and restores the terminal.

pub mod cmdline;
pub mod config;
mod error;
pub mod rules;
pub mod runner;
pub mod terminal;
pub mod version;

pub use config::Settings;
pub use error::{Result, RunnerError};
pub use rules::{plan, LaunchPlan};
pub use runner::{normalize_exit_code, run};
pub use version::{query_version, EmulatorVersion};
