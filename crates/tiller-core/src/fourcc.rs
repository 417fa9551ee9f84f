// Tiller FourCC
// Four-character type codes tagging event records and state formats

use std::fmt;

use serde::{Deserialize, Serialize};

/// A four-character code identifying an event type or a state format.
///
/// FourCC tags cross the native/managed boundary inside event records, so
/// the in-memory representation is exactly the four tag bytes in wire order.
/// The all-zero value is reserved as the null sentinel; a record carrying it
/// is padding, not a real event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCC([u8; 4]);

impl FourCC {
    /// The null sentinel tag.
    pub const NULL: FourCC = FourCC([0; 4]);

    /// Create a code from its four tag bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The four tag bytes in wire order.
    pub const fn bytes(self) -> [u8; 4] {
        self.0
    }

    /// Whether this is the null sentinel.
    pub const fn is_null(self) -> bool {
        u32::from_le_bytes(self.0) == 0
    }

    /// Read a code from the first four bytes of `bytes`.
    ///
    /// Returns `None` when fewer than four bytes are available.
    pub fn read(bytes: &[u8]) -> Option<Self> {
        let tag: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(Self(tag))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

impl TryFrom<String> for FourCC {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();
        if bytes.len() != 4 {
            return Err(format!(
                "four-character code must be exactly 4 bytes, got `{value}`"
            ));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl From<FourCC> for String {
    fn from(code: FourCC) -> Self {
        code.to_string()
    }
}
