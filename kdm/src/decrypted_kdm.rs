use rsa::oaep::{DecryptingKey, EncryptingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::{Decryptor, RandomizedEncryptor};
use rsa::RsaPrivateKey;
use sha1::Sha1;
use uuid::Uuid;

use kdm_core::{Certificate, CertificateChain, KeyRecord, KeyRecordStandard, LocalTime};

use crate::encrypted_kdm::{
    AuthenticatedPublic, AuthorizedDeviceInfo, EncryptedKDM, IssuerSerial, Recipient,
    RequiredExtensions, TypedKeyId, SENTINEL_THUMBPRINT,
};
use crate::error::{KdmError, KdmResult};
use crate::formulation::Formulation;
use crate::xml::XmlWriter;

/**
    A KDM with its key records in the clear: either about to be encrypted for
    a recipient, or the result of decrypting one with a matching private key.
*/
#[derive(Debug, Clone)]
pub struct DecryptedKDM {
    pub cpl_id: Uuid,
    pub content_title_text: String,
    pub annotation_text: Option<String>,
    pub issue_date: LocalTime,
    pub not_valid_before: LocalTime,
    pub not_valid_after: LocalTime,
    keys: Vec<KeyRecord>,
}

impl DecryptedKDM {
    pub fn new(
        cpl_id: Uuid,
        content_title_text: impl Into<String>,
        issue_date: LocalTime,
        not_valid_before: LocalTime,
        not_valid_after: LocalTime,
    ) -> Self {
        Self {
            cpl_id,
            content_title_text: content_title_text.into(),
            annotation_text: None,
            issue_date,
            not_valid_before,
            not_valid_after,
            keys: Vec::new(),
        }
    }

    pub fn keys(&self) -> &[KeyRecord] {
        &self.keys
    }

    /**
        Add a key record. All records in one KDM must share the same standard, agree on
        the composition playlist, and have distinct key ids.
    */
    pub fn add_key(&mut self, key: KeyRecord) -> KdmResult<()> {
        if let Some(existing) = self.keys.first() {
            if existing.standard != key.standard {
                return Err(KdmError::Misc(
                    "all key records in a KDM must use the same standard".into(),
                ));
            }
        }
        if key.cpl_id != self.cpl_id {
            return Err(KdmError::Misc(format!(
                "key {} is for CPL {} but this KDM is for CPL {}",
                key.key_id, key.cpl_id, self.cpl_id
            )));
        }
        if self.keys.iter().any(|k| k.key_id == key.key_id) {
            return Err(KdmError::Misc(format!(
                "duplicate key id {}",
                key.key_id
            )));
        }
        self.keys.push(key);
        Ok(())
    }

    /**
        Check that `not_valid_before <= not_valid_after`. Construction itself permits any
        order, since a caller may be reconstructing a KDM someone else already issued;
        call this explicitly before issuing a fresh one rather than relying on `encrypt`
        to reject a backwards window silently.
    */
    pub fn check_window(&self) -> KdmResult<()> {
        if self.not_valid_before > self.not_valid_after {
            return Err(KdmError::Misc(format!(
                "validity window is backwards: {} is after {}",
                self.not_valid_before, self.not_valid_after
            )));
        }
        Ok(())
    }

    fn standard(&self) -> KdmResult<KeyRecordStandard> {
        self.keys
            .first()
            .map(|k| k.standard)
            .ok_or_else(|| KdmError::Misc("KDM has no keys".into()))
    }

    /** Decrypt each `EncryptedKey` ciphertext with `private_key_pem`, recovering the key records. */
    pub fn from_encrypted(encrypted: &EncryptedKDM, private_key_pem: &str) -> KdmResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| KdmError::Decryption(e.to_string()))?;
        let decrypting_key = DecryptingKey::<Sha1>::new(private_key);

        let mut kdm = Self::new(
            encrypted.cpl_id(),
            encrypted.content_title_text(),
            encrypted.issue_date(),
            encrypted.not_valid_before(),
            encrypted.not_valid_after(),
        );
        kdm.annotation_text = encrypted.annotation_text().map(str::to_owned);

        for ciphertext in encrypted.keys() {
            let ciphertext = data_encoding::BASE64
                .decode(ciphertext.as_bytes())
                .map_err(|e| KdmError::Decryption(format!("bad base64 ciphertext: {e}")))?;
            let plaintext = decrypting_key
                .decrypt(&ciphertext)
                .map_err(|e| KdmError::Decryption(e.to_string()))?;
            let record = KeyRecord::from_bytes(&plaintext)?;
            kdm.add_key(record)?;
        }

        Ok(kdm)
    }

    /**
        Build a signed, encrypted KDM for `recipient`, wrapping each content key with
        RSA-OAEP-SHA1 and signing the result with `signer`'s leaf key.

        `trusted_devices` is only consulted when `formulation` calls for an explicit
        device list (see [`Formulation::uses_trusted_device_list`]); otherwise the
        sentinel thumbprint meaning "any device" is used.

        `content_authenticator` overrides what's written into `ContentAuthenticator`
        when the formulation wants one at all; `None` defaults to the signer leaf's
        own thumbprint, which is what every formulation that sets this field expects
        in practice. ST 430-1 permits referencing an alternate authenticator, hence
        the override.
    */
    #[allow(clippy::too_many_arguments)]
    pub fn encrypt(
        &self,
        signer: &CertificateChain,
        recipient: &Certificate,
        trusted_devices: &[Certificate],
        formulation: Formulation,
        content_authenticator: Option<&str>,
        disable_forensic_marking_picture: bool,
        disable_forensic_marking_audio: Option<i32>,
    ) -> KdmResult<EncryptedKDM> {
        let standard = self.standard()?;
        let signer_leaf = signer.leaf()?;
        let signer_thumbprint_bytes = data_encoding::BASE64
            .decode(signer_leaf.thumbprint().as_bytes())
            .map_err(|e| KdmError::Misc(format!("bad signer thumbprint: {e}")))?;
        let signer_thumbprint: [u8; 20] = signer_thumbprint_bytes
            .as_slice()
            .try_into()
            .map_err(|_| KdmError::Misc("signer thumbprint is not 20 bytes".into()))?;

        let recipient_public_key = recipient.public_key().clone();
        let encrypting_key = EncryptingKey::<Sha1>::new(recipient_public_key);
        let mut rng = rsa::rand_core::OsRng;

        let mut encrypted_keys = Vec::with_capacity(self.keys.len());
        let mut key_id_list = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let mut record = key.clone();
            record.signer_thumbprint = signer_thumbprint;
            let plaintext = record.to_bytes()?;
            let ciphertext = encrypting_key
                .encrypt_with_rng(&mut rng, &plaintext)
                .map_err(|e| KdmError::Misc(format!("RSA-OAEP encryption failed: {e}")))?;
            encrypted_keys.push(data_encoding::BASE64.encode(&ciphertext));
            key_id_list.push(TypedKeyId {
                key_type: record.key_type_tag.clone(),
                key_id: record.key_id,
                key_type_scope: record.key_type_scope.clone(),
            });
        }

        let authorized_device_info = if formulation.wants_authorized_device_info() {
            let thumbprints = if formulation.uses_trusted_device_list() && !trusted_devices.is_empty() {
                trusted_devices
                    .iter()
                    .map(|c| c.thumbprint().to_owned())
                    .collect()
            } else {
                vec![SENTINEL_THUMBPRINT.to_owned()]
            };
            let device_list_description = recipient
                .subject_common_name()
                .map(|cn| match cn.split_once('.') {
                    Some((_, rest)) => rest.to_owned(),
                    None => cn.to_owned(),
                });
            Some(AuthorizedDeviceInfo {
                device_list_identifier: Uuid::new_v4(),
                device_list_description,
                certificate_thumbprints: thumbprints,
            })
        } else {
            None
        };

        let content_authenticator = formulation.wants_content_authenticator().then(|| {
            content_authenticator
                .map(str::to_owned)
                .unwrap_or_else(|| signer_leaf.thumbprint().to_owned())
        });

        let required_extensions = RequiredExtensions {
            recipient: Recipient {
                issuer_serial: IssuerSerial {
                    issuer: recipient.issuer().to_owned(),
                    serial: recipient.serial().to_owned(),
                },
                subject_name: recipient.subject().to_owned(),
            },
            composition_playlist_id: self.cpl_id,
            content_title_text: self.content_title_text.clone(),
            content_authenticator,
            not_valid_before: self.not_valid_before,
            not_valid_after: self.not_valid_after,
            authorized_device_info,
            key_id_list,
            disable_forensic_marking_picture,
            disable_forensic_marking_audio,
        };

        let authenticated_public = AuthenticatedPublic {
            message_id: Uuid::new_v4(),
            annotation_text: Some(
                self.annotation_text
                    .clone()
                    .unwrap_or_else(|| "none".to_owned()),
            ),
            issue_date: self.issue_date,
            signer: IssuerSerial {
                issuer: signer_leaf.issuer().to_owned(),
                serial: signer_leaf.serial().to_owned(),
            },
            required_extensions,
        };

        let mut encrypted = EncryptedKDM::new_unsigned(authenticated_public, encrypted_keys, standard);
        encrypted.sign(signer)?;
        Ok(encrypted)
    }

    /**
        Dump every field, including the raw content keys, as plain unencrypted XML.
        No projector reads this; it exists for local inspection of a KDM before it's
        sealed, or after decrypting one for debugging.
    */
    pub fn as_xml(&self) -> KdmResult<Vec<u8>> {
        let mut w = XmlWriter::new();
        w.start("DecryptedKDM", &[])?;
        w.text_element("CompositionPlaylistId", &[], &self.cpl_id.to_string())?;
        w.text_element("ContentTitleText", &[], &self.content_title_text)?;
        if let Some(annotation) = &self.annotation_text {
            w.text_element("AnnotationText", &[], annotation)?;
        }
        w.text_element("IssueDate", &[], &self.issue_date.as_string(false))?;
        w.text_element("NotValidBefore", &[], &self.not_valid_before.as_string(false))?;
        w.text_element("NotValidAfter", &[], &self.not_valid_after.as_string(false))?;
        w.start("KeyRecords", &[])?;
        for key in &self.keys {
            w.start("KeyRecord", &[])?;
            w.text_element("KeyType", &[], &key.key_type_tag)?;
            w.text_element("KeyId", &[], &key.key_id.to_string())?;
            w.text_element("NotValidBefore", &[], &key.not_valid_before.as_string(false))?;
            w.text_element("NotValidAfter", &[], &key.not_valid_after.as_string(false))?;
            w.text_element("ContentKey", &[], &key.content_key.hex())?;
            w.end("KeyRecord")?;
        }
        w.end("KeyRecords")?;
        w.end("DecryptedKDM")?;
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdm_core::Key;

    fn sample_record(standard: KeyRecordStandard, cpl_id: Uuid, key_id: Uuid) -> KeyRecord {
        KeyRecord {
            standard,
            signer_thumbprint: [0u8; 20],
            cpl_id,
            key_id,
            key_type_tag: "MDIK".to_owned(),
            key_type_scope: None,
            not_valid_before: LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            not_valid_after: LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
            content_key: Key::from_hex("00112233445566778899aabbccddeeff").unwrap(),
        }
    }

    fn sample_chain() -> CertificateChain {
        CertificateChain::generate_new(
            "Example Studio",
            "Key Delivery",
            "Example Studio Root CA",
            "Example Studio Intermediate CA",
            "Example Leaf Decryption",
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_standards() {
        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Test Content",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Interop, cpl_id, Uuid::new_v4()))
            .unwrap();
        let err = kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_duplicate_key_ids() {
        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Test Content",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        let id = Uuid::new_v4();
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, id))
            .unwrap();
        assert!(kdm
            .add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, id))
            .is_err());
    }

    #[test]
    fn rejects_foreign_cpl_id() {
        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Test Content",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        let foreign = sample_record(KeyRecordStandard::Smpte, Uuid::new_v4(), Uuid::new_v4());
        assert!(kdm.add_key(foreign).is_err());
    }

    #[test]
    fn check_window_rejects_backwards_validity() {
        let kdm = DecryptedKDM::new(
            Uuid::new_v4(),
            "Test Content",
            LocalTime::now(),
            LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
        );
        assert!(kdm.check_window().is_err());
    }

    #[test]
    fn check_window_accepts_forward_validity() {
        let kdm = DecryptedKDM::new(
            Uuid::new_v4(),
            "Test Content",
            LocalTime::now(),
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
        );
        assert!(kdm.check_window().is_ok());
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
        );
        let key = sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4());
        kdm.add_key(key.clone()).unwrap();

        let encrypted = kdm
            .encrypt(
                &signer,
                &recipient,
                &[],
                Formulation::ModifiedTransitional1,
                None,
                false,
                None,
            )
            .unwrap();

        assert_eq!(encrypted.keys().len(), 1);
        assert_eq!(encrypted.cpl_id(), kdm.cpl_id);

        let recipient_key_pem = recipient_chain.private_key_pem().unwrap();
        let decrypted = DecryptedKDM::from_encrypted(&encrypted, recipient_key_pem).unwrap();
        assert_eq!(decrypted.keys().len(), 1);
        assert_eq!(decrypted.keys()[0].key_id, key.key_id);
        assert_eq!(
            decrypted.keys()[0].content_key.hex(),
            key.content_key.hex()
        );
    }

    #[test]
    fn content_authenticator_defaults_to_signer_thumbprint() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::DciAny, None, false, None)
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains(&format!(
            "<ContentAuthenticator>{}</ContentAuthenticator>",
            signer.leaf().unwrap().thumbprint()
        )));
    }

    #[test]
    fn content_authenticator_override_is_used() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(
                &signer,
                &recipient,
                &[],
                Formulation::DciAny,
                Some("override-thumbprint"),
                false,
                None,
            )
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains("<ContentAuthenticator>override-thumbprint</ContentAuthenticator>"));
    }

    #[test]
    fn xml_round_trips_through_parse() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(
                &signer,
                &recipient,
                &[],
                Formulation::DciSpecific,
                None,
                true,
                Some(3),
            )
            .unwrap();

        let xml = encrypted.to_xml().unwrap();
        let reparsed = EncryptedKDM::parse(&xml).unwrap();
        assert_eq!(reparsed.id(), encrypted.id());
        assert_eq!(reparsed.keys(), encrypted.keys());
        assert_eq!(
            reparsed
                .signer_certificate_chain()
                .unwrap()
                .leaf()
                .unwrap(),
            signer.leaf().unwrap()
        );
    }

    #[test]
    fn forensic_flag_audio_above_channel() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::ModifiedTransitional1, None, false, Some(8))
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains("mrkflg-audio-disable-above-channel-8"));
        assert!(!xml.contains("mrkflg-picture-disable"));
    }

    #[test]
    fn forensic_flags_omitted_when_unset() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::ModifiedTransitional1, None, false, None)
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(!xml.contains("ForensicMarkFlagList"));
    }

    #[test]
    fn sentinel_thumbprint_used_without_trusted_devices() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::ModifiedTransitional1, None, false, None)
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains(SENTINEL_THUMBPRINT));
    }

    #[test]
    fn dci_specific_falls_back_to_sentinel_without_trusted_devices() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::DciSpecific, None, false, None)
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains(SENTINEL_THUMBPRINT));
    }

    #[test]
    fn dci_specific_uses_trusted_devices_when_given() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();
        let device_chain = sample_chain();
        let device = device_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(
                &signer,
                &recipient,
                std::slice::from_ref(&device),
                Formulation::DciSpecific,
                None,
                false,
                None,
            )
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains(device.thumbprint()));
        assert!(!xml.contains(SENTINEL_THUMBPRINT));
    }

    #[test]
    fn device_list_description_derived_from_recipient_common_name() {
        let signer = sample_chain();
        let recipient_chain = CertificateChain::generate_new(
            "Example Studio",
            "Key Delivery",
            "Example Studio Root CA",
            "Example Studio Intermediate CA",
            "SM12345.Auditorium 1",
        )
        .unwrap();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        kdm.add_key(sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4()))
            .unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::ModifiedTransitional1, None, false, None)
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains("<DeviceListDescription>Auditorium 1</DeviceListDescription>"));
    }

    #[test]
    fn mdek_key_uses_dolby_scope() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        let mut key = sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4());
        key.key_type_tag = "MDEK".to_owned();
        kdm.add_key(key).unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::ModifiedTransitional1, None, false, None)
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains("dolby.com/cp850/2012/KDM#kdm-key-type"));
        assert!(!xml.contains("smpte-ra.org/430-1/2006/KDM#kdm-key-type"));
    }

    #[test]
    fn explicit_key_type_scope_overrides_default() {
        let signer = sample_chain();
        let recipient_chain = sample_chain();
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        let mut key = sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4());
        key.key_type_scope = Some("https://example.com/custom-scope".to_owned());
        kdm.add_key(key).unwrap();

        let encrypted = kdm
            .encrypt(&signer, &recipient, &[], Formulation::ModifiedTransitional1, None, false, None)
            .unwrap();
        let xml = String::from_utf8(encrypted.to_xml().unwrap()).unwrap();
        assert!(xml.contains("https://example.com/custom-scope"));
        assert!(!xml.contains("smpte-ra.org/430-1/2006/KDM#kdm-key-type"));
    }

    #[test]
    fn as_xml_dump_contains_plaintext_key() {
        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::now(),
            LocalTime::now(),
            LocalTime::now(),
        );
        let key = sample_record(KeyRecordStandard::Smpte, cpl_id, Uuid::new_v4());
        kdm.add_key(key.clone()).unwrap();

        let dump = String::from_utf8(kdm.as_xml().unwrap()).unwrap();
        assert!(dump.contains(&key.content_key.hex()));
        assert!(dump.contains("Feature Presentation"));
    }
}
