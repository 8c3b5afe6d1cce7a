//! Fixed identity strings shared by the inline and binary SMBIOS paths.

use uuid::Uuid;

/// Type 0 BIOS vendor.
pub const BIOS_VENDOR: &str = "Patina";

/// Type 0 BIOS version prefix; the repository version is appended.
pub const BIOS_VERSION_PREFIX: &str = "patina-q35-";

/// Type 1 and Type 3 manufacturer.
pub const MANUFACTURER: &str = "OpenDevicePartnership";

/// Type 1 product name.
pub const PRODUCT: &str = "QEMU Q35";

/// Type 1 family.
pub const FAMILY: &str = "QEMU";

/// Type 1 serial number.
pub const SYSTEM_SERIAL: &str = "42-42-42-42";

/// Type 3 serial number.
pub const ENCLOSURE_SERIAL: &str = "40-41-42-45";

/// Type 1 system UUID, in its canonical text form.
pub const SYSTEM_UUID: &str = "99fb60e2-181c-413a-a3cf-0a5fea8d87b0";

const SYSTEM_UUID_VALUE: Uuid = Uuid::from_u128(0x99fb60e2_181c_413a_a3cf_0a5fea8d87b0);

/// Type 1 system UUID in SMBIOS wire order.
///
/// SMBIOS 2.6+ stores the first three UUID fields little-endian, which is also how QEMU encodes
/// `-smbios type=1,uuid=...`.
pub fn system_uuid() -> [u8; 16] {
    SYSTEM_UUID_VALUE.to_bytes_le()
}
