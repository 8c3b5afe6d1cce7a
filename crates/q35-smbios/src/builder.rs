use crate::error::{Result, SmbiosError};
use crate::structures::Record;

/// Length of the SMBIOS 3.x entry point structure.
pub const EPS_LENGTH: usize = 0x18;

/// Physical address the structure table is described at.
pub const TABLE_ADDRESS: u64 = 0x000F_1000;

const EPS_ANCHOR: &[u8; 5] = b"_SM3_";
const SMBIOS_MAJOR: u8 = 3;
const SMBIOS_MINOR: u8 = 9;
const SMBIOS_DOC_REV: u8 = 0;
const EPS_REVISION: u8 = 0x01;

/// Encode `records` back to back, numbering handles from 0 in table order.
pub(crate) fn build_structure_table(records: &[Record<'_>]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (handle, record) in records.iter().enumerate() {
        out.extend_from_slice(&record.encode(handle as u16)?);
    }
    Ok(out)
}

/// Build the 24-byte `_SM3_` entry point for a structure table of `table_len` bytes at
/// `table_addr`. The checksum byte makes the whole structure sum to zero.
pub fn build_entry_point(table_len: usize, table_addr: u64) -> Result<[u8; EPS_LENGTH]> {
    let table_max_size =
        u32::try_from(table_len).map_err(|_| SmbiosError::TableTooLarge(table_len))?;

    let mut eps = [0u8; EPS_LENGTH];
    eps[0..5].copy_from_slice(EPS_ANCHOR);
    eps[5] = 0; // checksum to be filled in
    eps[6] = EPS_LENGTH as u8;
    eps[7] = SMBIOS_MAJOR;
    eps[8] = SMBIOS_MINOR;
    eps[9] = SMBIOS_DOC_REV;
    eps[10] = EPS_REVISION;
    eps[11] = 0; // reserved
    eps[12..16].copy_from_slice(&table_max_size.to_le_bytes());
    eps[16..24].copy_from_slice(&table_addr.to_le_bytes());
    eps[5] = checksum(&eps);
    Ok(eps)
}

fn checksum(data: &[u8]) -> u8 {
    let sum: u8 = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (0u8).wrapping_sub(sum)
}
