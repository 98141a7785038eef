use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KdmCoreError, KdmCoreResult};

/**
    A 16-byte symmetric content key, zeroised on drop.
*/
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; 16]);

impl Key {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /** Parse a 32-character hex string (case-insensitive). */
    pub fn from_hex(s: &str) -> KdmCoreResult<Self> {
        if s.len() != 32 {
            return Err(KdmCoreError::InvalidHex(s.to_owned()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| KdmCoreError::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }

    /** The canonical lowercase 32-character hex representation. */
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Key").field(&"<redacted>").finish()
    }
}
