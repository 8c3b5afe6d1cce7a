use thiserror::Error;

pub type Result<T> = std::result::Result<T, SmbiosError>;

/// Errors raised while encoding SMBIOS identity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SmbiosError {
    /// SMBIOS strings are NUL-terminated ASCII.
    #[error("SMBIOS string must be ASCII without NUL bytes: {0:?}")]
    InvalidString(String),

    #[error("too many strings in SMBIOS structure type {ty} (limit is 255)")]
    TooManyStrings { ty: u8 },

    #[error("SMBIOS structure table is too large: {0} bytes")]
    TableTooLarge(usize),

    #[error("firmware timestamp is outside the representable date range")]
    TimestampOutOfRange,
}
