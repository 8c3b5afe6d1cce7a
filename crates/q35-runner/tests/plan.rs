use std::fs;
use std::path::{Path, PathBuf};

use q35_runner::{plan, RunnerError, Settings};

struct BuildTree {
    _tmp: tempfile::TempDir,
    root: PathBuf,
}

impl BuildTree {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let root = tmp.path().to_path_buf();
        let fv = root.join("Build").join("FV");
        fs::create_dir_all(&fv).unwrap();
        fs::write(fv.join("QEMUQ35_CODE.fd"), [0xffu8; 512]).unwrap();
        fs::write(fv.join("QEMUQ35_VARS.fd"), b"vars-template").unwrap();
        fs::create_dir_all(root.join("VirtualDrive")).unwrap();
        Self { _tmp: tmp, root }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn settings(&self) -> Settings {
        Settings::default()
            .with("BUILD_OUTPUT_BASE", self.path("Build").to_string_lossy())
            .with("VIRTUAL_DRIVE_PATH", self.path("VirtualDrive").to_string_lossy())
            .with("VERSION", "1.4.0")
    }
}

fn values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .collect()
}

fn position(args: &[String], token: &str) -> usize {
    args.iter()
        .position(|a| a == token)
        .unwrap_or_else(|| panic!("{token:?} missing from {args:?}"))
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn default_build_boots_from_virtual_drive() {
    let tree = BuildTree::new();
    let plan = plan(&tree.settings()).unwrap();
    let args = plan.args.as_slice();

    assert_eq!(plan.executable, None);
    assert_eq!(plan.version, None);
    assert_eq!(&args[..2], ["-debugcon", "stdio"]);
    assert!(!args.iter().any(|a| a == "-L"));
    assert_eq!(
        values(args, "-global"),
        [
            "isa-debugcon.iobase=0x402",
            "ICH9-LPC.disable_s3=1",
            "driver=cfi.pflash01,property=secure,value=on",
        ]
    );
    assert_eq!(values(args, "-machine"), ["q35,smm=on"]);
    assert_eq!(values(args, "-m"), ["2048"]);
    assert!(!args.iter().any(|a| a == "-cdrom" || a.starts_with("nvme")));
    assert_eq!(values(args, "-net"), ["none"]);
    assert_eq!(values(args, "-vga"), ["cirrus"]);
    assert_eq!(
        values(args, "-serial"),
        ["tcp:127.0.0.1:50001,server,nowait"]
    );

    let code = display(&tree.path("Build").join("FV").join("QEMUQ35_CODE.fd"));
    let vars = display(&tree.path("Build").join("FV").join("QEMUQ35_VARS.fd"));
    let drive = display(&tree.path("VirtualDrive"));
    assert_eq!(
        values(args, "-drive"),
        [
            format!("if=pflash,format=raw,unit=0,file={code},readonly=on"),
            format!("if=pflash,format=raw,unit=1,file={vars}"),
            format!("file=fat:rw:{drive},format=raw,media=disk"),
        ]
    );

    let smbios = values(args, "-smbios");
    assert_eq!(smbios.len(), 3);
    assert!(smbios[0].starts_with("type=0,vendor=Patina,version=patina-q35-1.4.0,date="));
    assert!(!smbios[1].contains("version="), "{}", smbios[1]);
    assert_eq!(smbios[2], "type=3,manufacturer=OpenDevicePartnership,serial=40-41-42-45");
}

#[test]
fn flag_groups_keep_their_order() {
    let tree = BuildTree::new();
    let settings = tree
        .settings()
        .with("GDB_SERVER", "1234")
        .with("MONITOR_PORT", "50002")
        .with("SHUTDOWN_AFTER_RUN", "TRUE")
        .with("TPM_DEV", "/tmp/swtpm-sock");
    let plan = plan(&settings).unwrap();
    let args = plan.args.as_slice();

    let order = [
        "-debugcon",
        "-machine",
        "-m",
        "-cpu",
        "-drive",
        "-device",
        "-net",
        "-smbios",
        "-chardev",
        "-vga",
        "-gdb",
        "-serial",
        "-monitor",
    ];
    let positions: Vec<usize> = order.iter().map(|flag| position(args, flag)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "unexpected flag order: {args:?}"
    );
    assert_eq!(
        args.last().map(String::as_str),
        Some("isa-debug-exit,iobase=0xf4,iosize=0x04")
    );
}

#[test]
fn iso_image_attaches_cdrom_with_more_memory() {
    let tree = BuildTree::new();
    let settings = tree.settings().with("PATH_TO_OS", "/images/Windows.ISO");
    let plan = plan(&settings).unwrap();
    let args = plan.args.as_slice();

    assert_eq!(values(args, "-m"), ["8192"]);
    assert_eq!(values(args, "-cdrom"), ["/images/Windows.ISO"]);
    assert!(!values(args, "-device").iter().any(|d| d.starts_with("nvme")));
}

#[test]
fn vhd_image_attaches_nvme() {
    let tree = BuildTree::new();
    let settings = tree.settings().with("PATH_TO_OS", "/images/os.vhd");
    let plan = plan(&settings).unwrap();
    let args = plan.args.as_slice();

    assert_eq!(values(args, "-m"), ["8192"]);
    assert!(!args.iter().any(|a| a == "-cdrom"));
    assert!(values(args, "-drive")
        .contains(&"file=/images/os.vhd,format=raw,if=none,id=os_nvme"));
    assert!(values(args, "-device").contains(&"nvme,serial=nvme-1,drive=os_nvme"));
}

#[test]
fn unknown_os_image_aborts_before_launch() {
    let tree = BuildTree::new();
    let settings = tree.settings().with("PATH_TO_OS", "/images/os.vmdk");
    let err = plan(&settings).unwrap_err();
    let RunnerError::UnknownOsImageType { path } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(path, Path::new("/images/os.vmdk"));
    assert_eq!(err.to_string(), "unknown OS storage type: /images/os.vmdk");
}

#[test]
fn dfci_var_store_is_seeded_and_replaces_virtual_drive() {
    let tree = BuildTree::new();
    let dfci = tree.path("dfci_vars.fd");
    let settings = tree
        .settings()
        .with("DFCI_VAR_STORE", dfci.to_string_lossy())
        .with("ENABLE_NETWORK", "false")
        .with("BOOT_TO_FRONT_PAGE", "TRUE");
    let plan = plan(&settings).unwrap();
    let args = plan.args.as_slice();

    assert_eq!(fs::read(&dfci).unwrap(), b"vars-template");

    let drives = values(args, "-drive");
    assert_eq!(drives.len(), 2, "{drives:?}");
    assert_eq!(
        drives[1],
        format!("if=pflash,format=raw,unit=1,file={}", display(&dfci))
    );
    assert!(!drives.iter().any(|d| d.contains("VirtualDrive")));

    assert_eq!(
        values(args, "-netdev"),
        ["user,id=net0,hostfwd=tcp::8270-:8270,hostfwd=tcp::8271-:8271"]
    );
    assert!(values(args, "-device").contains(&"virtio-net-pci,netdev=net0"));
    assert!(!args.iter().any(|a| a == "-net"));

    let smbios = values(args, "-smbios");
    assert!(smbios[2].ends_with(",version=Vol+"), "{}", smbios[2]);
}

#[test]
fn existing_dfci_var_store_is_kept() {
    let tree = BuildTree::new();
    let dfci = tree.path("dfci_vars.fd");
    fs::write(&dfci, b"persisted settings").unwrap();

    let settings = tree.settings().with("DFCI_VAR_STORE", dfci.to_string_lossy());
    plan(&settings).unwrap();

    assert_eq!(fs::read(&dfci).unwrap(), b"persisted settings");
}

#[test]
fn missing_var_store_template_is_an_error() {
    let tree = BuildTree::new();
    fs::remove_file(tree.path("Build").join("FV").join("QEMUQ35_VARS.fd")).unwrap();
    let settings = tree
        .settings()
        .with("DFCI_VAR_STORE", tree.path("dfci.fd").to_string_lossy());
    let err = plan(&settings).unwrap_err();
    assert!(matches!(err, RunnerError::VarStoreCopy { .. }), "{err}");
}

#[test]
fn missing_code_image_is_an_error() {
    let tree = BuildTree::new();
    fs::remove_file(tree.path("Build").join("FV").join("QEMUQ35_CODE.fd")).unwrap();
    let err = plan(&tree.settings()).unwrap_err();
    assert!(matches!(err, RunnerError::FirmwareImage { .. }), "{err}");
}

#[test]
fn build_settings_control_smm_and_cores() {
    let tree = BuildTree::new();
    let settings = tree
        .settings()
        .merge_pairs(["BLD_*_SMM_ENABLED=false", "BLD_*_QEMU_CORE_NUM=4"])
        .unwrap()
        .with("QEMU_ACCEL", "whpx");
    let plan = plan(&settings).unwrap();
    let args = plan.args.as_slice();

    assert_eq!(values(args, "-machine"), ["q35,smm=off,accel=whpx"]);
    assert_eq!(values(args, "-smp"), ["4"]);
    assert!(!values(args, "-global").iter().any(|g| g.contains("pflash")));
}

#[test]
fn usb_storage_for_dfci_and_install_files() {
    let tree = BuildTree::new();
    let settings = tree
        .settings()
        .with("DFCI_FILES", "/work/dfci")
        .with("INSTALL_FILES", "/work/install.img");
    let plan = plan(&settings).unwrap();
    let args = plan.args.as_slice();

    let drives = values(args, "-drive");
    assert!(drives.contains(&"file=fat:rw:/work/dfci,format=raw,media=disk,if=none,id=dfci_disk"));
    assert!(
        drives.contains(&"file=/work/install.img,format=raw,media=disk,if=none,id=install_disk")
    );

    let devices = values(args, "-device");
    let usb = devices.iter().position(|d| *d == "qemu-xhci,id=usb").unwrap();
    let dfci = devices
        .iter()
        .position(|d| *d == "usb-storage,bus=usb.0,drive=dfci_disk")
        .unwrap();
    let install = devices
        .iter()
        .position(|d| *d == "usb-storage,bus=usb.0,drive=install_disk")
        .unwrap();
    assert!(usb < dfci && dfci < install);
}

#[test]
fn any_network_setting_value_enables_networking() {
    let tree = BuildTree::new();
    for value in ["FALSE", "0", "TRUE"] {
        let settings = tree.settings().with("ENABLE_NETWORK", value);
        let plan = plan(&settings).unwrap();
        let args = plan.args.as_slice();

        assert_eq!(values(args, "-netdev"), ["user,id=net0"], "ENABLE_NETWORK={value}");
        assert!(values(args, "-device").contains(&"e1000,netdev=net0"));
        assert!(!args.iter().any(|a| a == "-net"), "ENABLE_NETWORK={value}");
    }

    let settings = tree.settings().with("ENABLE_NETWORK", "");
    let plan = plan(&settings).unwrap();
    assert_eq!(values(plan.args.as_slice(), "-net"), ["none"]);
}
