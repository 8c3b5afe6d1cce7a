//! Host terminal state around an emulator run.
//!
//! QEMU can leave the controlling terminal in a bad state: on Windows, QEMU 8+ changes the
//! console input mode; on unix hosts a crashing QEMU leaves the tty in raw mode.

use crate::version::EmulatorVersion;

/// Save/restore hooks invoked around the emulator process. Both are best-effort.
pub trait TerminalCapability {
    /// Called just before the emulator starts.
    fn save(&mut self, version: Option<&EmulatorVersion>);

    /// Called after the emulator exits.
    fn restore(&mut self);
}

/// Leaves the terminal alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unmanaged;

impl TerminalCapability for Unmanaged {
    fn save(&mut self, _version: Option<&EmulatorVersion>) {}

    fn restore(&mut self) {}
}

/// The terminal handling for the current host.
#[cfg(windows)]
pub fn host() -> Box<dyn TerminalCapability> {
    Box::new(ConsoleMode::default())
}

/// The terminal handling for the current host.
#[cfg(unix)]
pub fn host() -> Box<dyn TerminalCapability> {
    Box::new(SttySane)
}

/// The terminal handling for the current host.
#[cfg(not(any(windows, unix)))]
pub fn host() -> Box<dyn TerminalCapability> {
    Box::new(Unmanaged)
}

/// Runs `stty sane` after every run.
#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SttySane;

#[cfg(unix)]
impl TerminalCapability for SttySane {
    fn save(&mut self, _version: Option<&EmulatorVersion>) {}

    fn restore(&mut self) {
        match std::process::Command::new("stty").arg("sane").status() {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::debug!("stty sane exited with {status}"),
            Err(err) => tracing::debug!("failed to run stty sane: {err}"),
        }
    }
}

#[cfg(windows)]
pub use console::ConsoleMode;

#[cfg(windows)]
mod console {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE, STD_INPUT_HANDLE,
    };

    use super::TerminalCapability;
    use crate::version::EmulatorVersion;

    /// First QEMU major version that changes the console input mode.
    const FIRST_AFFECTED_MAJOR: u32 = 8;

    /// Saves the console input mode before the run and puts it back afterwards.
    #[derive(Debug, Default)]
    pub struct ConsoleMode {
        saved: Option<(HANDLE, CONSOLE_MODE)>,
    }

    impl TerminalCapability for ConsoleMode {
        fn save(&mut self, version: Option<&EmulatorVersion>) {
            self.saved = None;
            let affected = version
                .and_then(EmulatorVersion::major_number)
                .is_some_and(|major| major >= FIRST_AFFECTED_MAJOR);
            if !affected {
                return;
            }

            // SAFETY: GetStdHandle has no preconditions.
            let handle = match unsafe { GetStdHandle(STD_INPUT_HANDLE) } {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::debug!("no console input handle: {err}");
                    return;
                }
            };

            let mut mode = CONSOLE_MODE::default();
            // SAFETY: `mode` is a valid, writable CONSOLE_MODE for the duration of the call.
            match unsafe { GetConsoleMode(handle, &mut mode) } {
                Ok(()) => self.saved = Some((handle, mode)),
                Err(err) => tracing::debug!("failed to read console mode: {err}"),
            }
        }

        fn restore(&mut self) {
            let Some((handle, mode)) = self.saved.take() else {
                return;
            };
            // SAFETY: `handle` came from GetStdHandle and stays valid for the process lifetime.
            if let Err(err) = unsafe { SetConsoleMode(handle, mode) } {
                tracing::warn!("failed to restore console mode: {err}");
            }
        }
    }
}
