//! Emulator invocation and exit-code handling.

use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::time::Duration;

use crate::config::Settings;
use crate::error::{Result, RunnerError};
use crate::rules::{self, LaunchPlan};
use crate::terminal::{self, TerminalCapability};
use crate::version::EmulatorVersion;

/// `STATUS_ACCESS_VIOLATION`, reported on Windows when an assertion takes the emulator down.
pub const EXIT_ACCESS_VIOLATION: u32 = 0xC000_0005;

/// Exit status produced by firmware asserts through `isa-debug-exit`.
pub const EXIT_LEGACY_ASSERT: u32 = 33;

/// SIGSEGV as a shell-style exit status (128 + 11).
pub const EXIT_SEGFAULT: u32 = 0x8B;

/// Plan and run the emulator with the host's terminal handling.
pub fn run(settings: &Settings) -> Result<u32> {
    let plan = rules::plan(settings)?;
    let mut terminal = terminal::host();
    run_plan(&plan, terminal.as_mut())
}

/// Run an already assembled plan and return the normalized exit code.
pub fn run_plan(plan: &LaunchPlan, terminal: &mut dyn TerminalCapability) -> Result<u32> {
    let program = plan
        .executable
        .as_deref()
        .ok_or(RunnerError::MissingExecutable)?;

    tracing::info!("running {} {}", program.display(), plan.args);

    terminal.save(plan.version.as_ref());
    let status = spawn(program, plan.args.as_slice());
    let code = status.map(|status| {
        let raw = exit_code(status);
        let code = normalize_exit_code(raw, plan.version.as_ref());
        if code != raw {
            tracing::info!("treating emulator exit code {raw:#x} as success");
        }
        code
    });
    terminal.restore();

    code
}

/// Map known-benign emulator exit codes to success.
pub fn normalize_exit_code(code: u32, version: Option<&EmulatorVersion>) -> u32 {
    // TODO: drop once firmware asserts are reported through a dedicated exit path.
    if code == EXIT_ACCESS_VIOLATION || code == EXIT_LEGACY_ASSERT {
        return 0;
    }

    // QEMU 4.x segfaults while shutting down.
    if code == EXIT_SEGFAULT && version.and_then(EmulatorVersion::major) == Some("4") {
        return 0;
    }

    code
}

/// Exit status as a single integer: the process exit code, or `128 + signal` when a unix child
/// was killed by a signal.
pub fn exit_code(status: ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        // Windows NTSTATUS values arrive as negative i32s.
        return code as u32;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as u32;
        }
    }

    1
}

fn spawn(program: &Path, args: &[String]) -> Result<ExitStatus> {
    let mut cmd = Command::new(program);
    cmd.args(args);

    retry_text_busy(|| cmd.status()).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => RunnerError::ExecutableNotFound {
            program: program.to_path_buf(),
        },
        _ => RunnerError::Spawn {
            program: program.to_path_buf(),
            source: err,
        },
    })
}

/// Retry a process start that fails with ETXTBSY ("Text file busy"), which freshly written
/// executables can briefly hit while another thread forks.
pub(crate) fn retry_text_busy<T>(mut start: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempts = 0u32;
    loop {
        match start() {
            Ok(value) => return Ok(value),
            Err(err) => {
                #[cfg(unix)]
                let should_retry = err.raw_os_error() == Some(26);
                #[cfg(not(unix))]
                let should_retry = false;

                if should_retry && attempts < 3 {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(10 * u64::from(attempts)));
                    continue;
                }
                return Err(err);
            }
        }
    }
}
