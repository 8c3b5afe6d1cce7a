//! SMBIOS (DMI) identity tables for the Q35 firmware runner.
//!
//! Guest firmware reads platform, system and enclosure identity from SMBIOS. This crate produces
//! that identity in two forms from the same inputs:
//!
//! - [`smbios_args`]: `-smbios type=N,...` command-line fragments that QEMU turns into tables.
//! - [`build_table`]: a complete SMBIOS 3.x entry point plus structure table, byte-exact for a
//!   given set of inputs.
//!
//! Both paths embed the constants from [`identity`], so the guest sees the same vendor,
//! manufacturer, serial numbers and UUID whichever one is used.

mod builder;
mod error;
pub mod identity;
pub mod scan;
mod structures;

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;

pub use builder::{build_entry_point, EPS_LENGTH, TABLE_ADDRESS};
pub use error::{Result, SmbiosError};
pub use scan::{
    parse_entry_point, parse_structures, validate_eps_checksum, EntryPoint, SmbiosStructure,
    SmbiosStructureHeader,
};
pub use structures::{BiosInformation, EndOfTable, Record, SystemEnclosure, SystemInformation};

/// Inputs shared by the inline and binary SMBIOS paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmbiosInputs {
    /// Timestamp of the firmware code image; becomes the BIOS release date.
    pub firmware_timestamp: SystemTime,

    /// Firmware repository version (the `VERSION` build setting).
    pub repo_version: String,

    /// Emulator version components, e.g. `["8", "2", "1"]`. Empty when the version query failed.
    pub emulator_version: Vec<String>,

    /// Boot-mode selection suffix, e.g. `,version=Vol+`. Empty for a normal boot.
    pub boot_selection: String,
}

impl SmbiosInputs {
    fn emulator_version_string(&self) -> Option<String> {
        (!self.emulator_version.is_empty()).then(|| self.emulator_version.join("."))
    }

    fn bios_version(&self) -> String {
        format!("{}{}", identity::BIOS_VERSION_PREFIX, self.repo_version)
    }

    /// The enclosure version the guest ends up with for this boot selection.
    ///
    /// QEMU keeps the last `version=` key of a repeated option, so `,version=Vol+,version=Vol-`
    /// resolves to `Vol-`.
    fn enclosure_version(&self) -> Option<&str> {
        self.boot_selection
            .split(',')
            .filter_map(|part| part.strip_prefix("version="))
            .last()
    }
}

/// Read the timestamp used for the BIOS release date of a firmware image.
///
/// Prefers the modification time and falls back to the creation time on filesystems that do not
/// record one.
pub fn firmware_timestamp(path: &Path) -> io::Result<SystemTime> {
    let meta = fs::metadata(path)?;
    meta.modified().or_else(|_| meta.created())
}

/// Format a timestamp as the `MM/DD/YYYY` BIOS release date (UTC).
pub fn firmware_date(timestamp: SystemTime) -> Result<String> {
    let secs = match timestamp.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).map_err(|_| SmbiosError::TimestampOutOfRange)?,
        Err(before) => i64::try_from(before.duration().as_secs())
            .map(|secs| -secs)
            .map_err(|_| SmbiosError::TimestampOutOfRange)?,
    };
    let dt = OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|_| SmbiosError::TimestampOutOfRange)?;
    Ok(format!(
        "{:02}/{:02}/{:04}",
        u8::from(dt.month()),
        dt.day(),
        dt.year()
    ))
}

/// Build the `-smbios` command-line fragments for QEMU.
///
/// Returns six tokens: three `-smbios` flags each followed by its option string.
pub fn smbios_args(inputs: &SmbiosInputs) -> Result<Vec<String>> {
    let date = firmware_date(inputs.firmware_timestamp)?;

    let type0 = format!(
        "type=0,vendor={},version={},date={},uefi=on",
        option_value(identity::BIOS_VENDOR)?,
        option_value(&inputs.bios_version())?,
        option_value(&date)?,
    );

    let mut type1 = format!(
        "type=1,manufacturer={},product={},family={}",
        option_value(identity::MANUFACTURER)?,
        option_value(identity::PRODUCT)?,
        option_value(identity::FAMILY)?,
    );
    if let Some(version) = inputs.emulator_version_string() {
        type1.push_str(&format!(",version={}", option_value(&version)?));
    }
    type1.push_str(&format!(
        ",serial={},uuid={}",
        identity::SYSTEM_SERIAL,
        identity::SYSTEM_UUID
    ));

    let type3 = format!(
        "type=3,manufacturer={},serial={}{}",
        option_value(identity::MANUFACTURER)?,
        identity::ENCLOSURE_SERIAL,
        inputs.boot_selection,
    );

    Ok(vec![
        "-smbios".to_string(),
        type0,
        "-smbios".to_string(),
        type1,
        "-smbios".to_string(),
        type3,
    ])
}

/// Build a complete SMBIOS 3.x blob: the 24-byte entry point followed by the structure table.
///
/// The output depends only on `inputs`; the system UUID is a fixed constant.
pub fn build_table(inputs: &SmbiosInputs) -> Result<Vec<u8>> {
    let date = firmware_date(inputs.firmware_timestamp)?;
    let bios_version = inputs.bios_version();
    let emulator_version = inputs.emulator_version_string();

    let records = [
        Record::Bios(BiosInformation {
            vendor: identity::BIOS_VENDOR,
            version: &bios_version,
            release_date: &date,
        }),
        Record::System(SystemInformation {
            manufacturer: identity::MANUFACTURER,
            product: identity::PRODUCT,
            version: emulator_version.as_deref(),
            serial: identity::SYSTEM_SERIAL,
            uuid: identity::system_uuid(),
            family: identity::FAMILY,
        }),
        Record::Enclosure(SystemEnclosure {
            manufacturer: identity::MANUFACTURER,
            version: inputs.enclosure_version(),
            serial: identity::ENCLOSURE_SERIAL,
        }),
        Record::EndOfTable(EndOfTable),
    ];

    let table = builder::build_structure_table(&records)?;
    let eps = build_entry_point(table.len(), TABLE_ADDRESS)?;

    let mut out = Vec::with_capacity(eps.len() + table.len());
    out.extend_from_slice(&eps);
    out.extend_from_slice(&table);
    Ok(out)
}

/// Escape a value for a comma-separated QEMU option list (`,` becomes `,,`).
fn option_value(value: &str) -> Result<String> {
    structures::check_string(value)?;
    Ok(value.replace(',', ",,"))
}
