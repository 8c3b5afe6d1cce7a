use crate::error::{Result, SmbiosError};

const TYPE_BIOS_INFORMATION: u8 = 0;
const TYPE_SYSTEM_INFORMATION: u8 = 1;
const TYPE_SYSTEM_ENCLOSURE: u8 = 3;
const TYPE_END_OF_TABLE: u8 = 127;

/// BIOS starting address segment.
const BIOS_SEGMENT: u16 = 0xE800;

/// BIOS characteristics: PCI supported.
const BIOS_CHARACTERISTICS: u64 = 1 << 7;

/// Characteristics extension byte 2: UEFI specification supported.
const BIOS_CHARACTERISTICS_EXT2_UEFI: u8 = 1 << 3;

/// Wake-up type: power switch.
const WAKE_UP_POWER_SWITCH: u8 = 0x06;

/// Enclosure type: other.
const ENCLOSURE_TYPE_OTHER: u8 = 0x01;

/// Type 0: BIOS Information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BiosInformation<'a> {
    pub vendor: &'a str,
    pub version: &'a str,
    pub release_date: &'a str,
}

/// Type 1: System Information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemInformation<'a> {
    pub manufacturer: &'a str,
    pub product: &'a str,
    pub version: Option<&'a str>,
    pub serial: &'a str,
    /// UUID bytes in SMBIOS wire order.
    pub uuid: [u8; 16],
    pub family: &'a str,
}

/// Type 3: System Enclosure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemEnclosure<'a> {
    pub manufacturer: &'a str,
    pub version: Option<&'a str>,
    pub serial: &'a str,
}

/// Type 127: End-of-Table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndOfTable;

/// One SMBIOS structure, in table order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record<'a> {
    Bios(BiosInformation<'a>),
    System(SystemInformation<'a>),
    Enclosure(SystemEnclosure<'a>),
    EndOfTable(EndOfTable),
}

impl Record<'_> {
    pub fn ty(&self) -> u8 {
        match self {
            Record::Bios(_) => TYPE_BIOS_INFORMATION,
            Record::System(_) => TYPE_SYSTEM_INFORMATION,
            Record::Enclosure(_) => TYPE_SYSTEM_ENCLOSURE,
            Record::EndOfTable(_) => TYPE_END_OF_TABLE,
        }
    }

    /// Encode the formatted area followed by the string-set, with `handle` in the header.
    pub fn encode(&self, handle: u16) -> Result<Vec<u8>> {
        let ty = self.ty();
        let mut strings = StringSet::new(ty);
        let mut body = Vec::new();

        match self {
            Record::Bios(bios) => {
                body.push(strings.add(bios.vendor)?);
                body.push(strings.add(bios.version)?);
                body.extend_from_slice(&BIOS_SEGMENT.to_le_bytes());
                body.push(strings.add(bios.release_date)?);
                body.push(0); // ROM size: 64 KiB
                body.extend_from_slice(&BIOS_CHARACTERISTICS.to_le_bytes());
                body.push(0);
                body.push(BIOS_CHARACTERISTICS_EXT2_UEFI);
            }
            Record::System(sys) => {
                body.push(strings.add(sys.manufacturer)?);
                body.push(strings.add(sys.product)?);
                body.push(strings.add_opt(sys.version)?);
                body.push(strings.add(sys.serial)?);
                body.extend_from_slice(&sys.uuid);
                body.push(WAKE_UP_POWER_SWITCH);
                body.push(0); // SKU number
                body.push(strings.add(sys.family)?);
            }
            Record::Enclosure(enc) => {
                body.push(strings.add(enc.manufacturer)?);
                body.push(ENCLOSURE_TYPE_OTHER);
                body.push(strings.add_opt(enc.version)?);
                body.push(strings.add(enc.serial)?);
                body.push(0); // asset tag
            }
            Record::EndOfTable(_) => {}
        }

        let len = 4 + body.len();
        let mut out = Vec::with_capacity(len + strings.encoded_len());
        out.push(ty);
        out.push(len as u8);
        out.extend_from_slice(&handle.to_le_bytes());
        out.extend_from_slice(&body);
        strings.encode_into(&mut out);
        Ok(out)
    }
}

/// Reject strings SMBIOS cannot carry.
pub(crate) fn check_string(s: &str) -> Result<()> {
    if s.is_ascii() && !s.bytes().any(|b| b == 0) {
        Ok(())
    } else {
        Err(SmbiosError::InvalidString(s.to_string()))
    }
}

/// The unformatted string-set of one structure. String numbers are 1-based in insertion order.
struct StringSet {
    ty: u8,
    strings: Vec<Vec<u8>>,
}

impl StringSet {
    fn new(ty: u8) -> Self {
        Self {
            ty,
            strings: Vec::new(),
        }
    }

    fn add(&mut self, s: &str) -> Result<u8> {
        check_string(s)?;
        if s.is_empty() {
            // Empty strings are encoded as string number 0 ("no string").
            return Ok(0);
        }
        if self.strings.len() >= usize::from(u8::MAX) {
            return Err(SmbiosError::TooManyStrings { ty: self.ty });
        }
        self.strings.push(s.as_bytes().to_vec());
        Ok(self.strings.len() as u8)
    }

    fn add_opt(&mut self, s: Option<&str>) -> Result<u8> {
        match s {
            Some(s) => self.add(s),
            None => Ok(0),
        }
    }

    fn encoded_len(&self) -> usize {
        if self.strings.is_empty() {
            2
        } else {
            self.strings.iter().map(|s| s.len() + 1).sum::<usize>() + 1
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        if self.strings.is_empty() {
            out.extend_from_slice(&[0, 0]);
            return;
        }
        for s in &self.strings {
            out.extend_from_slice(s);
            out.push(0);
        }
        out.push(0);
    }
}
