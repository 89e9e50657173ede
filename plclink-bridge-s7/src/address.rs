//! Symbolic S7 point addresses (`%I0.2`, `%Q12.5`, `%E1.0`, `%A3.7`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors from [`translate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The string does not match `%<area><byte>.<bit>`.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    /// Well-formed, but the area character is not one of I, E, Q, A.
    #[error("unsupported area '{area}' in address '{address}'")]
    UnsupportedArea { address: String, area: char },
}

/// Controller memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// Process input image (`I` / German `E`).
    Input,
    /// Process output image (`Q` / German `A`).
    Output,
}

impl Area {
    /// S7 area code used in read requests.
    pub fn s7_code(self) -> u8 {
        match self {
            Area::Input => 0x81,
            Area::Output => 0x82,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Area::Input => 'I',
            Area::Output => 'Q',
        }
    }
}

/// A translated point address. `bit` is not range-checked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParsedAddress {
    pub area: Area,
    pub byte: u32,
    pub bit: u32,
}

impl fmt::Display for ParsedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}{}.{}", self.area.as_char(), self.byte, self.bit)
    }
}

impl FromStr for ParsedAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        translate(s)
    }
}

/// Parse `'%' AREA BYTE '.' BIT` into area, byte offset and bit offset.
///
/// The offsets are checked before the area, so `%X0` is an
/// [`AddressError::InvalidAddress`] while `%X0.1` is an
/// [`AddressError::UnsupportedArea`].
pub fn translate(address: &str) -> Result<ParsedAddress, AddressError> {
    let invalid = || AddressError::InvalidAddress(address.to_string());

    let body = address.trim().strip_prefix('%').ok_or_else(invalid)?;
    let mut chars = body.chars();
    let area_char = chars.next().ok_or_else(invalid)?;
    let (byte, bit) = chars.as_str().split_once('.').ok_or_else(invalid)?;

    let byte = parse_offset(byte).ok_or_else(invalid)?;
    let bit = parse_offset(bit).ok_or_else(invalid)?;

    let area = match area_char.to_ascii_uppercase() {
        'I' | 'E' => Area::Input,
        'Q' | 'A' => Area::Output,
        other => {
            return Err(AddressError::UnsupportedArea {
                address: address.to_string(),
                area: other,
            });
        }
    };

    Ok(ParsedAddress { area, byte, bit })
}

fn parse_offset(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
