//! Translation of build settings into a QEMU command line.
//!
//! [`plan`] runs [`RULES`] in order. Each rule reads settings and the derived [`LaunchState`]
//! left by earlier rules, and appends to the [`ArgumentList`]; no rule inspects arguments added
//! by another. The order of the table is the order of the emulator flags.

use std::fs;
use std::path::{Path, PathBuf};

use q35_smbios::SmbiosInputs;

use crate::cmdline::{escape_opt_value, ArgumentList};
use crate::config::{self, Settings};
use crate::error::{Result, RunnerError};
use crate::version::{query_version, EmulatorVersion};

pub const QEMU_BINARY: &str = "qemu-system-x86_64";
pub const CODE_FD: &str = "QEMUQ35_CODE.fd";
pub const VARS_FD: &str = "QEMUQ35_VARS.fd";

const DEFAULT_CPU_MODEL: &str = "qemu64";
const CPU_FEATURES: &str =
    "rdrand=on,umip=on,smep=on,pdpe1gb=on,popcnt=on,+sse,+sse2,+sse3,+ssse3,+sse4.2,+sse4.1";
const DEFAULT_MEMORY_MB: u32 = 2048;
const OS_IMAGE_MEMORY_MB: u32 = 8192;
const DEFAULT_SERIAL_PORT: &str = "50001";
const DFCI_FORWARDED_PORTS: [u16; 2] = [8270, 8271];
const DEFAULT_REPO_VERSION: &str = "Unknown";

/// Where the emulator executable came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutableSource {
    /// `QEMU_PATH` names the executable directly.
    Override(PathBuf),
    /// The executable lives in `QEMU_DIR`, which also holds the `share` ROM directory.
    QemuDir { dir: PathBuf, executable: PathBuf },
    None,
}

impl ExecutableSource {
    pub fn resolve(settings: &Settings) -> Self {
        if let Some(path) = non_empty(settings.get(config::QEMU_PATH)) {
            return Self::Override(PathBuf::from(path));
        }
        match non_empty(settings.get(config::QEMU_DIR)) {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                let executable = dir.join(QEMU_BINARY);
                Self::QemuDir { dir, executable }
            }
            None => Self::None,
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        match self {
            Self::Override(path) => Some(path),
            Self::QemuDir { executable, .. } => Some(executable),
            Self::None => None,
        }
    }
}

/// Accelerator selected by `QEMU_ACCEL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accelerator {
    Kvm,
    Tcg,
    Whpx,
}

impl Accelerator {
    pub fn from_setting(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kvm" => Some(Self::Kvm),
            "tcg" => Some(Self::Tcg),
            "whpx" => Some(Self::Whpx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kvm => "kvm",
            Self::Tcg => "tcg",
            Self::Whpx => "whpx",
        }
    }
}

/// Storage format of the OS image, chosen by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageFormat {
    Raw,
    Qcow2,
    Iso,
}

impl StorageFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.replace('"', "");
        match ext.to_ascii_lowercase().as_str() {
            "vhd" => Some(Self::Raw),
            "qcow2" => Some(Self::Qcow2),
            "iso" => Some(Self::Iso),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Qcow2 => "qcow2",
            Self::Iso => "iso",
        }
    }
}

/// Build-output firmware images.
pub fn code_fd_path(settings: &Settings) -> PathBuf {
    fv_dir(settings).join(CODE_FD)
}

pub fn vars_fd_path(settings: &Settings) -> PathBuf {
    fv_dir(settings).join(VARS_FD)
}

fn fv_dir(settings: &Settings) -> PathBuf {
    PathBuf::from(settings.get_or(config::BUILD_OUTPUT_BASE, "")).join("FV")
}

/// `,version=Vol+` to boot to the front page, then `,version=Vol-` for the alternate boot path.
pub fn boot_selection_suffix(settings: &Settings) -> String {
    let mut suffix = String::new();
    if settings.is_true(config::BOOT_TO_FRONT_PAGE) {
        suffix.push_str(",version=Vol+");
    }
    if settings.is_true(config::ALT_BOOT_ENABLE) {
        suffix.push_str(",version=Vol-");
    }
    suffix
}

/// SMBIOS identity inputs for this build: code image timestamp, repository version, emulator
/// version and boot selection.
pub fn smbios_inputs(
    settings: &Settings,
    version: Option<&EmulatorVersion>,
    boot_selection: String,
) -> Result<SmbiosInputs> {
    let code_fd = code_fd_path(settings);
    let firmware_timestamp =
        q35_smbios::firmware_timestamp(&code_fd).map_err(|source| RunnerError::FirmwareImage {
            path: code_fd.clone(),
            source,
        })?;
    Ok(SmbiosInputs {
        firmware_timestamp,
        repo_version: settings
            .get_or(config::VERSION, DEFAULT_REPO_VERSION)
            .to_string(),
        emulator_version: version
            .map(|v| v.components().to_vec())
            .unwrap_or_default(),
        boot_selection,
    })
}

/// State derived by earlier rules for later ones.
#[derive(Clone, Debug)]
pub struct LaunchState {
    pub executable: ExecutableSource,
    pub version: Option<EmulatorVersion>,
    pub smm_enabled: bool,
    pub accel: Option<Accelerator>,
    /// Set when `DFCI_VAR_STORE` replaces the build's variable store.
    pub dfci_var_store: Option<PathBuf>,
    pub boot_selection: String,
}

impl LaunchState {
    fn new() -> Self {
        Self {
            executable: ExecutableSource::None,
            version: None,
            smm_enabled: true,
            accel: None,
            dfci_var_store: None,
            boot_selection: String::new(),
        }
    }
}

/// Everything needed to start the emulator.
#[derive(Clone, Debug)]
pub struct LaunchPlan {
    pub executable: Option<PathBuf>,
    pub args: ArgumentList,
    pub version: Option<EmulatorVersion>,
}

pub type Rule = fn(&Settings, &mut LaunchState, &mut ArgumentList) -> Result<()>;

/// Launch rules in flag order.
pub const RULES: &[(&str, Rule)] = &[
    ("executable", resolve_executable),
    ("emulator-version", resolve_version),
    ("debug-console", debug_console),
    ("rom-path", rom_search_path),
    ("hardware-globals", hardware_globals),
    ("smm", resolve_smm),
    ("accelerator", resolve_accel),
    ("machine", machine),
    ("os-image", os_image),
    ("cpu", cpu),
    ("smp", smp),
    ("flash-security", flash_security),
    ("flash-drives", flash_drives),
    ("usb", usb),
    ("dfci-files", dfci_files),
    ("install-files", install_files),
    ("boot-selection", boot_selection),
    ("virtual-drive", virtual_drive),
    ("network", network),
    ("smbios", smbios),
    ("tpm", tpm),
    ("display", display),
    ("gdb", gdb),
    ("serial", serial),
    ("monitor", monitor),
    ("debug-exit", debug_exit),
];

/// Run every rule and return the resulting launch plan.
///
/// Fails before anything is launched if the OS image has an unknown extension, the code image
/// cannot be read, or the DFCI variable store cannot be created.
pub fn plan(settings: &Settings) -> Result<LaunchPlan> {
    let mut state = LaunchState::new();
    let mut args = ArgumentList::new();

    for (name, rule) in RULES {
        tracing::trace!(rule = *name, "applying launch rule");
        rule(settings, &mut state, &mut args)?;
    }

    Ok(LaunchPlan {
        executable: state.executable.executable().map(Path::to_path_buf),
        args,
        version: state.version,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn path_value(path: &Path) -> String {
    escape_opt_value(&path.to_string_lossy())
}

fn resolve_executable(
    settings: &Settings,
    state: &mut LaunchState,
    _: &mut ArgumentList,
) -> Result<()> {
    state.executable = ExecutableSource::resolve(settings);
    match state.executable.executable() {
        Some(path) => tracing::debug!("emulator: {}", path.display()),
        None => tracing::warn!("neither QEMU_PATH nor QEMU_DIR is set"),
    }
    Ok(())
}

fn resolve_version(_: &Settings, state: &mut LaunchState, _: &mut ArgumentList) -> Result<()> {
    state.version = match query_version(state.executable.executable()) {
        Ok(version) => version,
        Err(err) => {
            tracing::warn!("{err}; version-specific workarounds are disabled");
            None
        }
    };
    if let Some(version) = &state.version {
        tracing::info!("QEMU version: {version}");
    }
    Ok(())
}

fn debug_console(_: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    args.opt("-debugcon", "stdio");
    Ok(())
}

fn rom_search_path(_: &Settings, state: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if let ExecutableSource::QemuDir { dir, .. } = &state.executable {
        args.opt("-L", dir.join("share").to_string_lossy());
    }
    Ok(())
}

fn hardware_globals(_: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    args.opt("-global", "isa-debugcon.iobase=0x402");
    args.opt("-global", "ICH9-LPC.disable_s3=1");
    Ok(())
}

fn resolve_smm(settings: &Settings, state: &mut LaunchState, _: &mut ArgumentList) -> Result<()> {
    state.smm_enabled = !settings
        .get_build(config::SMM_ENABLED)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("false"));
    Ok(())
}

fn resolve_accel(settings: &Settings, state: &mut LaunchState, _: &mut ArgumentList) -> Result<()> {
    state.accel = settings
        .get(config::QEMU_ACCEL)
        .and_then(Accelerator::from_setting);
    Ok(())
}

fn machine(_: &Settings, state: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    let smm = if state.smm_enabled { "on" } else { "off" };
    let mut value = format!("q35,smm={smm}");
    if let Some(accel) = state.accel {
        value.push_str(",accel=");
        value.push_str(accel.as_str());
    }
    args.opt("-machine", value);
    Ok(())
}

fn os_image(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    let Some(os) = settings.get(config::PATH_TO_OS) else {
        args.opt("-m", DEFAULT_MEMORY_MB.to_string());
        return Ok(());
    };

    let os = PathBuf::from(os.trim().trim_matches('"'));
    let format = StorageFormat::from_path(&os)
        .ok_or_else(|| RunnerError::UnknownOsImageType { path: os.clone() })?;

    args.opt("-m", OS_IMAGE_MEMORY_MB.to_string());
    match format {
        StorageFormat::Iso => {
            args.opt("-cdrom", os.to_string_lossy());
        }
        StorageFormat::Raw | StorageFormat::Qcow2 => {
            args.opt(
                "-drive",
                format!(
                    "file={},format={},if=none,id=os_nvme",
                    path_value(&os),
                    format.as_str()
                ),
            );
            args.opt("-device", "nvme,serial=nvme-1,drive=os_nvme");
        }
    }
    Ok(())
}

fn cpu(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    let model = non_empty(settings.get(config::CPU_MODEL)).unwrap_or(DEFAULT_CPU_MODEL);
    tracing::info!("CPU model: {model}");
    args.opt("-cpu", format!("{model},{CPU_FEATURES}"));
    Ok(())
}

fn smp(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if let Some(cores) = non_empty(settings.get_build(config::QEMU_CORE_NUM)) {
        args.opt("-smp", cores);
    }
    Ok(())
}

fn flash_security(_: &Settings, state: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if state.smm_enabled {
        args.opt("-global", "driver=cfi.pflash01,property=secure,value=on");
    }
    Ok(())
}

fn flash_drives(
    settings: &Settings,
    state: &mut LaunchState,
    args: &mut ArgumentList,
) -> Result<()> {
    let code_fd = code_fd_path(settings);
    args.opt(
        "-drive",
        format!(
            "if=pflash,format=raw,unit=0,file={},readonly=on",
            path_value(&code_fd)
        ),
    );

    let orig_vars = vars_fd_path(settings);
    let vars = match non_empty(settings.get(config::DFCI_VAR_STORE)) {
        Some(dfci) => {
            let dfci = PathBuf::from(dfci);
            if !dfci.is_file() {
                tracing::info!(
                    "creating DFCI variable store {} from {}",
                    dfci.display(),
                    orig_vars.display()
                );
                fs::copy(&orig_vars, &dfci).map_err(|source| RunnerError::VarStoreCopy {
                    from: orig_vars.clone(),
                    to: dfci.clone(),
                    source,
                })?;
            }
            state.dfci_var_store = Some(dfci.clone());
            dfci
        }
        None => orig_vars,
    };
    args.opt(
        "-drive",
        format!("if=pflash,format=raw,unit=1,file={}", path_value(&vars)),
    );
    Ok(())
}

fn usb(_: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    args.opt("-device", "qemu-xhci,id=usb");
    args.opt("-device", "usb-tablet,id=input0,bus=usb.0,port=1");
    Ok(())
}

fn dfci_files(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if let Some(dir) = settings.get(config::DFCI_FILES) {
        args.opt(
            "-drive",
            format!(
                "file=fat:rw:{},format=raw,media=disk,if=none,id=dfci_disk",
                escape_opt_value(dir)
            ),
        );
        args.opt("-device", "usb-storage,bus=usb.0,drive=dfci_disk");
    }
    Ok(())
}

fn install_files(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if let Some(image) = settings.get(config::INSTALL_FILES) {
        args.opt(
            "-drive",
            format!(
                "file={},format=raw,media=disk,if=none,id=install_disk",
                escape_opt_value(image)
            ),
        );
        args.opt("-device", "usb-storage,bus=usb.0,drive=install_disk");
    }
    Ok(())
}

fn boot_selection(
    settings: &Settings,
    state: &mut LaunchState,
    _: &mut ArgumentList,
) -> Result<()> {
    state.boot_selection = boot_selection_suffix(settings);
    Ok(())
}

fn virtual_drive(
    settings: &Settings,
    state: &mut LaunchState,
    args: &mut ArgumentList,
) -> Result<()> {
    if state.dfci_var_store.is_some() {
        return Ok(());
    }

    let drive = non_empty(settings.get(config::VIRTUAL_DRIVE_PATH)).map(Path::new);
    match drive {
        Some(path) if path.is_file() => {
            args.opt("-drive", format!("file={},if=virtio", path_value(path)));
        }
        Some(path) if path.is_dir() => {
            args.opt(
                "-drive",
                format!("file=fat:rw:{},format=raw,media=disk", path_value(path)),
            );
        }
        Some(path) => tracing::error!("Virtual Drive Path Invalid: {}", path.display()),
        None => tracing::error!("Virtual Drive Path Invalid: VIRTUAL_DRIVE_PATH is not set"),
    }
    Ok(())
}

fn network(settings: &Settings, state: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    let dfci = state.dfci_var_store.is_some();
    if !settings.is_truthy(config::ENABLE_NETWORK) && !dfci {
        args.opt("-net", "none");
        return Ok(());
    }

    let mut netdev = "user,id=net0".to_string();
    if dfci {
        for port in DFCI_FORWARDED_PORTS {
            netdev.push_str(&format!(",hostfwd=tcp::{port}-:{port}"));
        }
    }
    args.opt("-netdev", netdev);

    // Windows guests get a PCI NIC; booting into the firmware UI uses virtio-net.
    if settings.get(config::BOOT_TO_FRONT_PAGE).is_none() {
        args.opt("-device", "e1000,netdev=net0");
    } else {
        args.opt("-device", "virtio-net-pci,netdev=net0");
    }
    Ok(())
}

fn smbios(settings: &Settings, state: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    let inputs = smbios_inputs(settings, state.version.as_ref(), state.boot_selection.clone())?;
    args.extend(q35_smbios::smbios_args(&inputs)?);
    Ok(())
}

fn tpm(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if let Some(socket) = settings.get(config::TPM_DEV) {
        args.opt(
            "-chardev",
            format!("socket,id=chrtpm,path={}", escape_opt_value(socket)),
        );
        args.opt("-tpmdev", "emulator,id=tpm0,chardev=chrtpm");
        args.opt("-device", "tpm-tis,tpmdev=tpm0");
    }
    Ok(())
}

fn display(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if settings.is_true(config::QEMU_HEADLESS) {
        args.opt("-display", "none");
    } else {
        args.opt("-vga", "cirrus");
    }
    Ok(())
}

fn gdb(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if let Some(port) = settings.get(config::GDB_SERVER) {
        tracing::info!("Enabling GDB server at port tcp::{port}.");
        args.opt("-gdb", format!("tcp::{port}"));
    }
    Ok(())
}

fn serial(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    let port = settings.get_or(config::SERIAL_PORT, DEFAULT_SERIAL_PORT);
    args.opt("-serial", format!("tcp:127.0.0.1:{port},server,nowait"));
    Ok(())
}

fn monitor(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if let Some(port) = settings.get(config::MONITOR_PORT) {
        args.opt("-monitor", format!("tcp:127.0.0.1:{port},server,nowait"));
    }
    Ok(())
}

fn debug_exit(settings: &Settings, _: &mut LaunchState, args: &mut ArgumentList) -> Result<()> {
    if settings.is_true(config::SHUTDOWN_AFTER_RUN) {
        args.opt("-device", "isa-debug-exit,iobase=0xf4,iosize=0x04");
    }
    Ok(())
}
