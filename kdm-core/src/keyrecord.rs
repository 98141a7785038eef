use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KdmCoreError, KdmCoreResult};
use crate::key::Key;
use crate::time::LocalTime;

/** Which of the two fixed binary layouts a [`KeyRecord`] was read from or should be written as. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRecordStandard {
    Interop,
    Smpte,
}

/** Marks an interop-layout record: sixteen zero bytes. */
const INTEROP_STRUCTURE_ID: [u8; 16] = [0u8; 16];

/**
    Marks an SMPTE-layout record. Distinguishes the layout on decode; not a
    cryptographic value, just a fixed tag.
*/
const SMPTE_STRUCTURE_ID: [u8; 16] = [
    0x4a, 0xe8, 0x1c, 0xae, 0x35, 0xea, 0xf6, 0x4c, 0xa9, 0x87, 0x9c, 0xcf, 0xbf, 0xd0, 0x2c, 0xae,
];

/** SMPTE records carry sixteen bytes of outer framing ahead of the common fields. */
const SMPTE_PREFIX: [u8; 16] = [
    0x53, 0x4d, 0x50, 0x54, 0x45, 0x2d, 0x4b, 0x44, 0x4d, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const THUMBPRINT_LEN: usize = 20;
const DATETIME_LEN: usize = 25;
const KEY_TYPE_TAG_LEN: usize = 4;

const COMMON_LEN: usize = 16 + THUMBPRINT_LEN + 16 + 16 + KEY_TYPE_TAG_LEN + DATETIME_LEN * 2 + 16;
const INTEROP_LEN: usize = COMMON_LEN;
const SMPTE_LEN: usize = SMPTE_PREFIX.len() + COMMON_LEN;

/**
    The plaintext sealed inside the RSA envelope for one content key: the key
    itself plus everything a projector needs to decide whether it may use it.

    Zeroised on drop, since the content key lives here before and after the
    RSA operation.
*/
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyRecord {
    #[zeroize(skip)]
    pub standard: KeyRecordStandard,
    #[zeroize(skip)]
    pub signer_thumbprint: [u8; THUMBPRINT_LEN],
    #[zeroize(skip)]
    pub cpl_id: Uuid,
    #[zeroize(skip)]
    pub key_id: Uuid,
    #[zeroize(skip)]
    pub key_type_tag: String,
    /// Overrides the `TypedKeyId@scope` URI written into the wrapping KDM's `KeyIdList`.
    /// Not part of the sealed binary record; `None` derives the scope from `key_type_tag`.
    #[zeroize(skip)]
    pub key_type_scope: Option<String>,
    #[zeroize(skip)]
    pub not_valid_before: LocalTime,
    #[zeroize(skip)]
    pub not_valid_after: LocalTime,
    pub content_key: Key,
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("standard", &self.standard)
            .field("key_id", &self.key_id)
            .field("key_type_tag", &self.key_type_tag)
            .finish()
    }
}

impl KeyRecord {
    pub fn encoded_len(standard: KeyRecordStandard) -> usize {
        match standard {
            KeyRecordStandard::Interop => INTEROP_LEN,
            KeyRecordStandard::Smpte => SMPTE_LEN,
        }
    }

    /** Serialise to the fixed binary layout for `self.standard`. */
    pub fn to_bytes(&self) -> KdmCoreResult<Vec<u8>> {
        if self.key_type_tag.len() > KEY_TYPE_TAG_LEN || !self.key_type_tag.is_ascii() {
            return Err(KdmCoreError::RsaOperation(format!(
                "key type tag '{}' does not fit in {KEY_TYPE_TAG_LEN} ASCII bytes",
                self.key_type_tag
            )));
        }

        let mut out = Vec::with_capacity(Self::encoded_len(self.standard));

        match self.standard {
            KeyRecordStandard::Interop => out.extend_from_slice(&INTEROP_STRUCTURE_ID),
            KeyRecordStandard::Smpte => {
                out.extend_from_slice(&SMPTE_PREFIX);
                out.extend_from_slice(&SMPTE_STRUCTURE_ID);
            }
        }

        out.extend_from_slice(&self.signer_thumbprint);
        out.extend_from_slice(self.cpl_id.as_bytes());
        out.extend_from_slice(self.key_id.as_bytes());

        let mut tag = [0u8; KEY_TYPE_TAG_LEN];
        tag[..self.key_type_tag.len()].copy_from_slice(self.key_type_tag.as_bytes());
        out.extend_from_slice(&tag);

        out.extend_from_slice(&encode_datetime(&self.not_valid_before));
        out.extend_from_slice(&encode_datetime(&self.not_valid_after));

        out.extend_from_slice(self.content_key.as_bytes());

        debug_assert_eq!(out.len(), Self::encoded_len(self.standard));
        Ok(out)
    }

    /** Parse a plaintext record, choosing the layout by its length. */
    pub fn from_bytes(bytes: &[u8]) -> KdmCoreResult<Self> {
        match bytes.len() {
            INTEROP_LEN => Self::from_bytes_with_standard(bytes, KeyRecordStandard::Interop, 0),
            SMPTE_LEN => Self::from_bytes_with_standard(bytes, KeyRecordStandard::Smpte, 16),
            other => Err(KdmCoreError::RsaOperation(format!(
                "key record has unrecognised length {other} (expected {INTEROP_LEN} or {SMPTE_LEN})"
            ))),
        }
    }

    fn from_bytes_with_standard(
        bytes: &[u8],
        standard: KeyRecordStandard,
        offset: usize,
    ) -> KdmCoreResult<Self> {
        let bad = |what: &str| KdmCoreError::RsaOperation(format!("truncated key record: {what}"));

        let mut p = offset + 16; // skip structure_id
        let signer_thumbprint: [u8; THUMBPRINT_LEN] = bytes
            .get(p..p + THUMBPRINT_LEN)
            .ok_or_else(|| bad("signer_thumbprint"))?
            .try_into()
            .unwrap();
        p += THUMBPRINT_LEN;

        let cpl_id = Uuid::from_slice(bytes.get(p..p + 16).ok_or_else(|| bad("cpl_id"))?)
            .map_err(|e| KdmCoreError::InvalidUuid(e.to_string()))?;
        p += 16;

        let key_id = Uuid::from_slice(bytes.get(p..p + 16).ok_or_else(|| bad("key_id"))?)
            .map_err(|e| KdmCoreError::InvalidUuid(e.to_string()))?;
        p += 16;

        let tag_bytes = bytes
            .get(p..p + KEY_TYPE_TAG_LEN)
            .ok_or_else(|| bad("key_type_tag"))?;
        let key_type_tag = std::str::from_utf8(tag_bytes)
            .map_err(|_| bad("key_type_tag not ASCII"))?
            .trim_end_matches('\0')
            .to_owned();
        p += KEY_TYPE_TAG_LEN;

        let not_valid_before = decode_datetime(
            bytes
                .get(p..p + DATETIME_LEN)
                .ok_or_else(|| bad("not_valid_before"))?,
        )?;
        p += DATETIME_LEN;

        let not_valid_after = decode_datetime(
            bytes
                .get(p..p + DATETIME_LEN)
                .ok_or_else(|| bad("not_valid_after"))?,
        )?;
        p += DATETIME_LEN;

        let content_key_bytes: [u8; 16] = bytes
            .get(p..p + 16)
            .ok_or_else(|| bad("content_key"))?
            .try_into()
            .unwrap();

        Ok(Self {
            standard,
            signer_thumbprint,
            cpl_id,
            key_id,
            key_type_tag,
            key_type_scope: None,
            not_valid_before,
            not_valid_after,
            content_key: Key::new(content_key_bytes),
        })
    }
}

/** `xs:dateTime`, NUL-padded to the fixed 25-byte field width. */
fn encode_datetime(t: &LocalTime) -> [u8; DATETIME_LEN] {
    let s = t.as_string(false);
    let mut out = [0u8; DATETIME_LEN];
    let bytes = s.as_bytes();
    let n = bytes.len().min(DATETIME_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn decode_datetime(bytes: &[u8]) -> KdmCoreResult<LocalTime> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let s = std::str::from_utf8(&bytes[..end])
        .map_err(|_| KdmCoreError::TimeFormat(String::new(), "not valid UTF-8"))?;
    LocalTime::parse(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(standard: KeyRecordStandard) -> KeyRecord {
        KeyRecord {
            standard,
            signer_thumbprint: [7u8; THUMBPRINT_LEN],
            cpl_id: Uuid::parse_str("2664ef6e-ff7a-4ef5-9c2c-4a4ab2f2cc4c").unwrap(),
            key_id: Uuid::parse_str("c3a9e5e0-8f5a-4e2f-9f8f-16b6e4a3d1a0").unwrap(),
            key_type_tag: "MDIK".to_owned(),
            key_type_scope: None,
            not_valid_before: LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            not_valid_after: LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
            content_key: Key::from_hex("00112233445566778899aabbccddeeff").unwrap(),
        }
    }

    #[test]
    fn interop_round_trip() {
        let record = sample(KeyRecordStandard::Interop);
        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes.len(), INTEROP_LEN);
        let parsed = KeyRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.standard, KeyRecordStandard::Interop);
        assert_eq!(parsed.key_id, record.key_id);
        assert_eq!(parsed.cpl_id, record.cpl_id);
        assert_eq!(parsed.key_type_tag, "MDIK");
        assert_eq!(parsed.content_key.hex(), record.content_key.hex());
        assert_eq!(parsed.not_valid_before, record.not_valid_before);
    }

    #[test]
    fn smpte_round_trip() {
        let record = sample(KeyRecordStandard::Smpte);
        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes.len(), SMPTE_LEN);
        let parsed = KeyRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.standard, KeyRecordStandard::Smpte);
        assert_eq!(parsed.key_id, record.key_id);
    }

    #[test]
    fn length_selects_standard() {
        let interop = sample(KeyRecordStandard::Interop).to_bytes().unwrap();
        let smpte = sample(KeyRecordStandard::Smpte).to_bytes().unwrap();
        assert_ne!(interop.len(), smpte.len());
    }

    #[test]
    fn unrecognised_length_rejected() {
        assert!(KeyRecord::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn oversized_key_type_tag_rejected() {
        let mut record = sample(KeyRecordStandard::Interop);
        record.key_type_tag = "TOOLONG".to_owned();
        assert!(record.to_bytes().is_err());
    }
}
