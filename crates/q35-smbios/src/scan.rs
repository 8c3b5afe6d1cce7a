//! Parsing of SMBIOS 3.x blobs, used to check what the builder produced.

use crate::builder::EPS_LENGTH;

/// Fields of a `_SM3_` entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub major: u8,
    pub minor: u8,
    pub doc_rev: u8,
    pub table_max_size: u32,
    pub table_addr: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmbiosStructureHeader {
    pub ty: u8,
    pub len: u8,
    pub handle: u16,
}

/// One structure: its formatted area (header included) and its string-set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmbiosStructure {
    pub header: SmbiosStructureHeader,
    pub formatted: Vec<u8>,
    pub strings: Vec<String>,
}

impl SmbiosStructure {
    /// Resolve a 1-based string number from the formatted area.
    pub fn string(&self, number: u8) -> Option<&str> {
        let idx = usize::from(number).checked_sub(1)?;
        self.strings.get(idx).map(String::as_str)
    }
}

/// Whether `eps` starts with an entry point whose bytes sum to zero.
pub fn validate_eps_checksum(eps: &[u8]) -> bool {
    let Some(&len) = eps.get(6) else {
        return false;
    };
    let len = usize::from(len);
    if len < EPS_LENGTH || eps.len() < len {
        return false;
    }
    eps[..len].iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

pub fn parse_entry_point(blob: &[u8]) -> Option<EntryPoint> {
    if blob.len() < EPS_LENGTH || &blob[0..5] != b"_SM3_" || !validate_eps_checksum(blob) {
        return None;
    }
    Some(EntryPoint {
        major: blob[7],
        minor: blob[8],
        doc_rev: blob[9],
        table_max_size: u32::from_le_bytes(blob[12..16].try_into().ok()?),
        table_addr: u64::from_le_bytes(blob[16..24].try_into().ok()?),
    })
}

/// Walk a structure table, stopping after Type 127 or at the first malformed structure.
pub fn parse_structures(table: &[u8]) -> Vec<SmbiosStructure> {
    let mut out = Vec::new();
    let mut off = 0usize;

    while off + 4 <= table.len() {
        let header = SmbiosStructureHeader {
            ty: table[off],
            len: table[off + 1],
            handle: u16::from_le_bytes([table[off + 2], table[off + 3]]),
        };
        let formatted_end = off + usize::from(header.len);
        if header.len < 4 || formatted_end > table.len() {
            break;
        }

        // The string-set ends with a double NUL.
        let Some(end_rel) = table[formatted_end..]
            .windows(2)
            .position(|w| w == [0, 0])
        else {
            break;
        };
        let strings_area = &table[formatted_end..formatted_end + end_rel];
        let strings = strings_area
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();

        out.push(SmbiosStructure {
            header,
            formatted: table[off..formatted_end].to_vec(),
            strings,
        });
        off = formatted_end + end_rel + 2;

        if header.ty == 127 {
            break;
        }
    }

    out
}
