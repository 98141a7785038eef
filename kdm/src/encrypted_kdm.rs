use kdm_core::{Certificate, CertificateChain, KeyRecordStandard, LocalTime};
use rsa::pkcs1v15;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use signature::Verifier;
use uuid::Uuid;

use crate::error::{KdmError, KdmResult};
use crate::xml::{Element, XmlWriter, parse};

const NS_ROOT: &str = "http://www.smpte-ra.org/schemas/430-3/2006/ETM";
const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";
const NS_ENC: &str = "http://www.w3.org/2001/04/xmlenc#";
const NS_KDM_REQUIRED_EXTENSIONS: &str = "http://www.smpte-ra.org/schemas/430-1/2006/KDM";

const MESSAGE_TYPE: &str = "http://www.smpte-ra.org/430-1/2006/KDM#kdm-key-type";
const KEY_TYPE_SCOPE_DOLBY: &str = "http://www.dolby.com/cp850/2012/KDM#kdm-key-type";
const KEY_TYPE_SCOPE_SMPTE: &str = "http://www.smpte-ra.org/430-1/2006/KDM#kdm-key-type";

const FLAG_PICTURE_DISABLE: &str = "http://www.smpte-ra.org/430-1/2006/KDM#mrkflg-picture-disable";
const FLAG_AUDIO_DISABLE: &str = "http://www.smpte-ra.org/430-1/2006/KDM#mrkflg-audio-disable";

/** The sentinel `AuthorizedDeviceInfo` thumbprint meaning "trust any device": base64(SHA-1("")). */
pub const SENTINEL_THUMBPRINT: &str = "2jmj7l5rSw0yVb/vlWAYkK/YBwk=";

/** An X.509 issuer DN plus serial number, as embedded in `Signer`, `Recipient`, and `X509Data`. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerSerial {
    pub issuer: String,
    pub serial: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub issuer_serial: IssuerSerial,
    pub subject_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedKeyId {
    pub key_type: String,
    pub key_id: Uuid,
    /// Overrides the `scope` attribute written on `TypedKeyId`; `None` derives it
    /// from `key_type` (`MDEK` scopes to Dolby, everything else to SMPTE).
    pub key_type_scope: Option<String>,
}

impl TypedKeyId {
    fn scope(&self) -> &str {
        if let Some(scope) = &self.key_type_scope {
            scope
        } else if self.key_type == "MDEK" {
            KEY_TYPE_SCOPE_DOLBY
        } else {
            KEY_TYPE_SCOPE_SMPTE
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedDeviceInfo {
    pub device_list_identifier: Uuid,
    pub device_list_description: Option<String>,
    pub certificate_thumbprints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredExtensions {
    pub recipient: Recipient,
    pub composition_playlist_id: Uuid,
    pub content_title_text: String,
    pub content_authenticator: Option<String>,
    pub not_valid_before: LocalTime,
    pub not_valid_after: LocalTime,
    pub authorized_device_info: Option<AuthorizedDeviceInfo>,
    pub key_id_list: Vec<TypedKeyId>,
    pub disable_forensic_marking_picture: bool,
    pub disable_forensic_marking_audio: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPublic {
    pub message_id: Uuid,
    pub annotation_text: Option<String>,
    pub issue_date: LocalTime,
    pub signer: IssuerSerial,
    pub required_extensions: RequiredExtensions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509Data {
    pub issuer_serial: IssuerSerial,
    /** Base64 certificate body, without `BEGIN/END` marker lines. */
    pub certificate_body: String,
}

/**
    A KDM, either freshly produced by [`crate::decrypted_kdm::DecryptedKDM::encrypt`] or
    read back from XML via [`EncryptedKDM::parse`].
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKDM {
    pub authenticated_public: AuthenticatedPublic,
    encrypted_keys: Vec<String>,
    standard: KeyRecordStandard,
    signature_value: String,
    x509_data: Vec<X509Data>,
    digest_public: String,
    digest_private: String,
}

impl EncryptedKDM {
    pub(crate) fn new_unsigned(
        authenticated_public: AuthenticatedPublic,
        encrypted_keys: Vec<String>,
        standard: KeyRecordStandard,
    ) -> Self {
        Self {
            authenticated_public,
            encrypted_keys,
            standard,
            signature_value: String::new(),
            x509_data: Vec::new(),
            digest_public: String::new(),
            digest_private: String::new(),
        }
    }

    /** Compute digests over `AuthenticatedPublic`/`AuthenticatedPrivate`, sign `SignedInfo`, and attach the signer's chain. */
    pub(crate) fn sign(&mut self, signer: &CertificateChain) -> KdmResult<()> {
        let public_bytes = self.authenticated_public_xml()?;
        let private_bytes = self.authenticated_private_xml()?;

        self.digest_public = digest(&public_bytes, self.standard);
        self.digest_private = digest(&private_bytes, self.standard);

        let signed_info_bytes = self.signed_info_xml(&self.digest_public, &self.digest_private)?;

        let signature = match self.standard {
            KeyRecordStandard::Interop => signer.sign_sha1(&signed_info_bytes)?,
            KeyRecordStandard::Smpte => signer.sign_sha256(&signed_info_bytes)?,
        };
        self.signature_value = data_encoding::BASE64.encode(&signature);

        self.x509_data = signer
            .leaf_to_root()?
            .into_iter()
            .map(|c| X509Data {
                issuer_serial: IssuerSerial {
                    issuer: c.issuer().to_owned(),
                    serial: c.serial().to_owned(),
                },
                certificate_body: c.to_pem(false),
            })
            .collect();

        Ok(())
    }

    /**
        Check that `AuthenticatedPublic`/`AuthenticatedPrivate` have not been altered since
        signing, that `SignatureValue` verifies against the embedded signer certificate, and
        that the signer's chain terminates at one of `trust_roots`.

        Parsing a KDM never performs this check on its own (see [`EncryptedKDM::parse`]);
        callers that need to gate acceptance on a valid signature must call this explicitly.
    */
    pub fn verify_signature(&self, trust_roots: &[Certificate]) -> KdmResult<()> {
        let current_digest_public = digest(&self.authenticated_public_xml()?, self.standard);
        let current_digest_private = digest(&self.authenticated_private_xml()?, self.standard);
        if current_digest_public != self.digest_public || current_digest_private != self.digest_private
        {
            return Err(KdmError::Misc(
                "AuthenticatedPublic or AuthenticatedPrivate digest does not match the signed value".into(),
            ));
        }

        let signed_info_bytes = self.signed_info_xml(&self.digest_public, &self.digest_private)?;
        let signature_bytes = data_encoding::BASE64
            .decode(self.signature_value.as_bytes())
            .map_err(|e| KdmError::Misc(format!("bad base64 signature: {e}")))?;

        let chain = self.signer_certificate_chain()?;
        let leaf = chain.leaf()?;

        let verifies = match pkcs1v15::Signature::try_from(signature_bytes.as_slice()) {
            Ok(sig) => match self.standard {
                KeyRecordStandard::Interop => {
                    let verifying_key = pkcs1v15::VerifyingKey::<Sha1>::new(leaf.public_key().clone());
                    verifying_key.verify(&signed_info_bytes, &sig).is_ok()
                }
                KeyRecordStandard::Smpte => {
                    let verifying_key = pkcs1v15::VerifyingKey::<Sha256>::new(leaf.public_key().clone());
                    verifying_key.verify(&signed_info_bytes, &sig).is_ok()
                }
            },
            Err(_) => false,
        };
        if !verifies {
            return Err(KdmError::Misc(
                "signature does not verify against the embedded signer certificate".into(),
            ));
        }

        let root = chain.root()?;
        if !trust_roots.iter().any(|r| *r == root) {
            return Err(KdmError::Misc(
                "signer chain does not terminate at a trusted root".into(),
            ));
        }

        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.authenticated_public.message_id
    }

    pub fn annotation_text(&self) -> Option<&str> {
        self.authenticated_public.annotation_text.as_deref()
    }

    pub fn content_title_text(&self) -> &str {
        &self.authenticated_public.required_extensions.content_title_text
    }

    pub fn issue_date(&self) -> LocalTime {
        self.authenticated_public.issue_date
    }

    pub fn cpl_id(&self) -> Uuid {
        self.authenticated_public
            .required_extensions
            .composition_playlist_id
    }

    pub fn not_valid_before(&self) -> LocalTime {
        self.authenticated_public.required_extensions.not_valid_before
    }

    pub fn not_valid_after(&self) -> LocalTime {
        self.authenticated_public.required_extensions.not_valid_after
    }

    pub fn recipient_x509_subject_name(&self) -> &str {
        &self.authenticated_public.required_extensions.recipient.subject_name
    }

    /** The base64-encoded RSA ciphertexts, in `KeyIdList` order. */
    pub fn keys(&self) -> &[String] {
        &self.encrypted_keys
    }

    /** Reconstruct the signer's certificate chain from the embedded `KeyInfo/X509Data`. */
    pub fn signer_certificate_chain(&self) -> KdmResult<CertificateChain> {
        let mut bundle = String::new();
        for data in self.x509_data.iter().rev() {
            bundle.push_str("-----BEGIN CERTIFICATE-----\n");
            bundle.push_str(&data.certificate_body);
            bundle.push_str("\n-----END CERTIFICATE-----\n");
        }
        Ok(CertificateChain::from_pem_bundle(&bundle)?)
    }

    /** Render the full `DCinemaSecurityMessage` document. */
    pub fn to_xml(&self) -> KdmResult<Vec<u8>> {
        let mut w = XmlWriter::new();
        w.start(
            "DCinemaSecurityMessage",
            &[
                ("xmlns", NS_ROOT),
                ("xmlns:ds", NS_DS),
                ("xmlns:enc", NS_ENC),
            ],
        )?;
        w.raw(&self.authenticated_public_xml()?)?;
        w.raw(&self.authenticated_private_xml()?)?;
        w.raw(&self.signature_xml()?)?;
        w.end("DCinemaSecurityMessage")?;
        Ok(w.into_bytes())
    }

    fn authenticated_public_xml(&self) -> KdmResult<Vec<u8>> {
        let ap = &self.authenticated_public;
        let mut w = XmlWriter::new();
        w.start("AuthenticatedPublic", &[("Id", "ID_AuthenticatedPublic")])?;
        w.text_element("MessageId", &[], &format!("urn:uuid:{}", ap.message_id))?;
        w.text_element("MessageType", &[], MESSAGE_TYPE)?;
        if let Some(text) = &ap.annotation_text {
            w.text_element("AnnotationText", &[], text)?;
        }
        w.text_element("IssueDate", &[], &ap.issue_date.as_string(false))?;

        w.start("Signer", &[])?;
        w.text_element("ds:X509IssuerName", &[], &ap.signer.issuer)?;
        w.text_element("ds:X509SerialNumber", &[], &ap.signer.serial)?;
        w.end("Signer")?;

        w.start("RequiredExtensions", &[])?;
        self.required_extensions_xml(&mut w)?;
        w.end("RequiredExtensions")?;

        w.start("NonCriticalExtensions", &[])?;
        w.end("NonCriticalExtensions")?;
        w.end("AuthenticatedPublic")?;
        Ok(w.into_bytes())
    }

    fn required_extensions_xml(&self, w: &mut XmlWriter) -> KdmResult<()> {
        let ext = &self.authenticated_public.required_extensions;
        w.start(
            "KDMRequiredExtensions",
            &[("xmlns", NS_KDM_REQUIRED_EXTENSIONS)],
        )?;

        w.start("Recipient", &[])?;
        w.start("X509IssuerSerial", &[])?;
        w.text_element("ds:X509IssuerName", &[], &ext.recipient.issuer_serial.issuer)?;
        w.text_element(
            "ds:X509SerialNumber",
            &[],
            &ext.recipient.issuer_serial.serial,
        )?;
        w.end("X509IssuerSerial")?;
        w.text_element("X509SubjectName", &[], &ext.recipient.subject_name)?;
        w.end("Recipient")?;

        w.text_element(
            "CompositionPlaylistId",
            &[],
            &format!("urn:uuid:{}", ext.composition_playlist_id),
        )?;
        w.text_element("ContentTitleText", &[], &ext.content_title_text)?;
        if let Some(authenticator) = &ext.content_authenticator {
            w.text_element("ContentAuthenticator", &[], authenticator)?;
        }
        w.text_element(
            "ContentKeysNotValidBefore",
            &[],
            &ext.not_valid_before.as_string(false),
        )?;
        w.text_element(
            "ContentKeysNotValidAfter",
            &[],
            &ext.not_valid_after.as_string(false),
        )?;

        if let Some(info) = &ext.authorized_device_info {
            w.start("AuthorizedDeviceInfo", &[])?;
            w.text_element(
                "DeviceListIdentifier",
                &[],
                &format!("urn:uuid:{}", info.device_list_identifier),
            )?;
            if let Some(description) = &info.device_list_description {
                w.text_element("DeviceListDescription", &[], description)?;
            }
            w.start("DeviceList", &[])?;
            for thumbprint in &info.certificate_thumbprints {
                w.text_element("CertificateThumbprint", &[], thumbprint)?;
            }
            w.end("DeviceList")?;
            w.end("AuthorizedDeviceInfo")?;
        }

        w.start("KeyIdList", &[])?;
        for typed_key_id in &ext.key_id_list {
            w.start("TypedKeyId", &[])?;
            w.text_element(
                "KeyType",
                &[("scope", typed_key_id.scope())],
                &typed_key_id.key_type,
            )?;
            w.text_element("KeyId", &[], &format!("urn:uuid:{}", typed_key_id.key_id))?;
            w.end("TypedKeyId")?;
        }
        w.end("KeyIdList")?;

        if ext.disable_forensic_marking_picture || ext.disable_forensic_marking_audio.is_some() {
            w.start("ForensicMarkFlagList", &[])?;
            if ext.disable_forensic_marking_picture {
                w.text_element("ForensicMarkFlag", &[], FLAG_PICTURE_DISABLE)?;
            }
            if let Some(above_channel) = ext.disable_forensic_marking_audio {
                let flag = if above_channel > 0 {
                    format!("{FLAG_AUDIO_DISABLE}-above-channel-{above_channel}")
                } else {
                    FLAG_AUDIO_DISABLE.to_owned()
                };
                w.text_element("ForensicMarkFlag", &[], &flag)?;
            }
            w.end("ForensicMarkFlagList")?;
        }

        w.end("KDMRequiredExtensions")
    }

    fn authenticated_private_xml(&self) -> KdmResult<Vec<u8>> {
        let mut w = XmlWriter::new();
        w.start(
            "AuthenticatedPrivate",
            &[("Id", "ID_AuthenticatedPrivate")],
        )?;
        for key in &self.encrypted_keys {
            w.start("enc:EncryptedKey", &[])?;
            w.start(
                "enc:EncryptionMethod",
                &[("Algorithm", "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p")],
            )?;
            w.start(
                "ds:DigestMethod",
                &[("Algorithm", "http://www.w3.org/2000/09/xmldsig#sha1")],
            )?;
            w.end("ds:DigestMethod")?;
            w.end("enc:EncryptionMethod")?;
            w.start("enc:CipherData", &[])?;
            w.text_element("enc:CipherValue", &[], key)?;
            w.end("enc:CipherData")?;
            w.end("enc:EncryptedKey")?;
        }
        w.end("AuthenticatedPrivate")?;
        Ok(w.into_bytes())
    }

    fn signed_info_xml(&self, digest_public: &str, digest_private: &str) -> KdmResult<Vec<u8>> {
        let (canonicalization, signature_method, digest_method) = algorithms(self.standard);
        let mut w = XmlWriter::new();
        w.start("ds:SignedInfo", &[])?;
        w.start("ds:CanonicalizationMethod", &[("Algorithm", canonicalization)])?;
        w.end("ds:CanonicalizationMethod")?;
        w.start("ds:SignatureMethod", &[("Algorithm", signature_method)])?;
        w.end("ds:SignatureMethod")?;
        reference_xml(&mut w, "#ID_AuthenticatedPublic", digest_method, digest_public)?;
        reference_xml(&mut w, "#ID_AuthenticatedPrivate", digest_method, digest_private)?;
        w.end("ds:SignedInfo")?;
        Ok(w.into_bytes())
    }

    fn signature_xml(&self) -> KdmResult<Vec<u8>> {
        let public_bytes = self.authenticated_public_xml()?;
        let private_bytes = self.authenticated_private_xml()?;
        let digest_public = digest(&public_bytes, self.standard);
        let digest_private = digest(&private_bytes, self.standard);

        let mut w = XmlWriter::new();
        w.start("ds:Signature", &[])?;
        w.raw(&self.signed_info_xml(&digest_public, &digest_private)?)?;
        w.text_element("ds:SignatureValue", &[], &self.signature_value)?;
        w.start("ds:KeyInfo", &[])?;
        for data in &self.x509_data {
            w.start("ds:X509Data", &[])?;
            w.start("ds:X509IssuerSerial", &[])?;
            w.text_element("ds:X509IssuerName", &[], &data.issuer_serial.issuer)?;
            w.text_element("ds:X509SerialNumber", &[], &data.issuer_serial.serial)?;
            w.end("ds:X509IssuerSerial")?;
            w.text_element("ds:X509Certificate", &[], &data.certificate_body)?;
            w.end("ds:X509Data")?;
        }
        w.end("ds:KeyInfo")?;
        w.end("ds:Signature")?;
        Ok(w.into_bytes())
    }

    pub fn parse(xml: &[u8]) -> KdmResult<Self> {
        let root = parse(xml)?;
        let authenticated_public = root.child("AuthenticatedPublic")?;
        let authenticated_private = root.child("AuthenticatedPrivate")?;
        let signature = root.child("Signature")?;

        let message_id = parse_urn_uuid(&authenticated_public.text_child("MessageId")?)?;
        let annotation_text = authenticated_public.optional_text_child("AnnotationText");
        let issue_date = LocalTime::parse(&authenticated_public.text_child("IssueDate")?)?;

        let signer_node = authenticated_public.child("Signer")?;
        let signer = IssuerSerial {
            issuer: signer_node.text_child("X509IssuerName")?,
            serial: signer_node.text_child("X509SerialNumber")?,
        };

        let kdm_required_extensions = authenticated_public
            .child("RequiredExtensions")?
            .child("KDMRequiredExtensions")?;

        let recipient_node = kdm_required_extensions.child("Recipient")?;
        let recipient_issuer_serial_node = recipient_node.child("X509IssuerSerial")?;
        let recipient = Recipient {
            issuer_serial: IssuerSerial {
                issuer: recipient_issuer_serial_node.text_child("X509IssuerName")?,
                serial: recipient_issuer_serial_node.text_child("X509SerialNumber")?,
            },
            subject_name: recipient_node.text_child("X509SubjectName")?,
        };

        let composition_playlist_id =
            parse_urn_uuid(&kdm_required_extensions.text_child("CompositionPlaylistId")?)?;
        let content_title_text = kdm_required_extensions.text_child("ContentTitleText")?;
        let content_authenticator =
            kdm_required_extensions.optional_text_child("ContentAuthenticator");
        let not_valid_before = LocalTime::parse(
            &kdm_required_extensions.text_child("ContentKeysNotValidBefore")?,
        )?;
        let not_valid_after = LocalTime::parse(
            &kdm_required_extensions.text_child("ContentKeysNotValidAfter")?,
        )?;

        let authorized_device_info = kdm_required_extensions
            .optional_child("AuthorizedDeviceInfo")
            .map(parse_authorized_device_info)
            .transpose()?;

        let key_id_list = kdm_required_extensions
            .child("KeyIdList")?
            .children_named("TypedKeyId")
            .map(parse_typed_key_id)
            .collect::<KdmResult<Vec<_>>>()?;

        let mut disable_forensic_marking_picture = false;
        let mut disable_forensic_marking_audio = None;
        if let Some(list) = kdm_required_extensions.optional_child("ForensicMarkFlagList") {
            for flag in list.children_named("ForensicMarkFlag") {
                let content = flag.text();
                if content == FLAG_PICTURE_DISABLE {
                    disable_forensic_marking_picture = true;
                } else if let Some(rest) = content.strip_prefix(FLAG_AUDIO_DISABLE) {
                    disable_forensic_marking_audio = Some(if rest.is_empty() {
                        0
                    } else {
                        rest.trim_start_matches("-above-channel-")
                            .parse()
                            .map_err(|_| KdmError::Format("bad ForensicMarkFlag".into()))?
                    });
                }
            }
        }

        let required_extensions = RequiredExtensions {
            recipient,
            composition_playlist_id,
            content_title_text,
            content_authenticator,
            not_valid_before,
            not_valid_after,
            authorized_device_info,
            key_id_list,
            disable_forensic_marking_picture,
            disable_forensic_marking_audio,
        };

        let authenticated_public = AuthenticatedPublic {
            message_id,
            annotation_text,
            issue_date,
            signer,
            required_extensions,
        };

        let encrypted_keys = authenticated_private
            .children_named("EncryptedKey")
            .map(|k| {
                k.child("CipherData")
                    .and_then(|c| c.text_child("CipherValue"))
            })
            .collect::<KdmResult<Vec<_>>>()?;

        let signed_info = signature.child("SignedInfo")?;
        let signature_method = signed_info
            .child("SignatureMethod")?
            .attribute("Algorithm")
            .unwrap_or_default();
        let standard = if signature_method.ends_with("rsa-sha1") {
            KeyRecordStandard::Interop
        } else {
            KeyRecordStandard::Smpte
        };

        let digest_public = digest_value_for(signed_info, "#ID_AuthenticatedPublic")?;
        let digest_private = digest_value_for(signed_info, "#ID_AuthenticatedPrivate")?;

        let signature_value = signature.text_child("SignatureValue")?;
        let x509_data = signature
            .child("KeyInfo")?
            .children_named("X509Data")
            .map(|d| {
                let issuer_serial_node = d.child("X509IssuerSerial")?;
                Ok(X509Data {
                    issuer_serial: IssuerSerial {
                        issuer: issuer_serial_node.text_child("X509IssuerName")?,
                        serial: issuer_serial_node.text_child("X509SerialNumber")?,
                    },
                    certificate_body: d.text_child("X509Certificate")?,
                })
            })
            .collect::<KdmResult<Vec<_>>>()?;

        Ok(Self {
            authenticated_public,
            encrypted_keys,
            standard,
            signature_value,
            x509_data,
            digest_public,
            digest_private,
        })
    }
}

fn digest_value_for(signed_info: &Element, uri: &str) -> KdmResult<String> {
    signed_info
        .children_named("Reference")
        .find(|r| r.attribute("URI") == Some(uri))
        .ok_or_else(|| KdmError::Format(format!("missing ds:Reference for {uri}")))?
        .text_child("DigestValue")
}

fn parse_authorized_device_info(node: &Element) -> KdmResult<AuthorizedDeviceInfo> {
    Ok(AuthorizedDeviceInfo {
        device_list_identifier: parse_urn_uuid(&node.text_child("DeviceListIdentifier")?)?,
        device_list_description: node.optional_text_child("DeviceListDescription"),
        certificate_thumbprints: node
            .child("DeviceList")?
            .children_named("CertificateThumbprint")
            .map(Element::text)
            .collect(),
    })
}

fn parse_typed_key_id(node: &Element) -> KdmResult<TypedKeyId> {
    let key_type_node = node.child("KeyType")?;
    let key_type = key_type_node.text();
    let default_scope = if key_type == "MDEK" {
        KEY_TYPE_SCOPE_DOLBY
    } else {
        KEY_TYPE_SCOPE_SMPTE
    };
    let key_type_scope = key_type_node
        .attribute("scope")
        .filter(|scope| *scope != default_scope)
        .map(str::to_owned);
    Ok(TypedKeyId {
        key_type,
        key_id: parse_urn_uuid(&node.text_child("KeyId")?)?,
        key_type_scope,
    })
}

fn parse_urn_uuid(s: &str) -> KdmResult<Uuid> {
    let s = s.strip_prefix("urn:uuid:").unwrap_or(s);
    Uuid::parse_str(s).map_err(|e| KdmError::Format(format!("invalid uuid '{s}': {e}")))
}

fn reference_xml(
    w: &mut XmlWriter,
    uri: &str,
    digest_method: &str,
    digest_value: &str,
) -> KdmResult<()> {
    w.start("ds:Reference", &[("URI", uri)])?;
    w.start("ds:DigestMethod", &[("Algorithm", digest_method)])?;
    w.end("ds:DigestMethod")?;
    w.text_element("ds:DigestValue", &[], digest_value)?;
    w.end("ds:Reference")
}

fn digest(bytes: &[u8], standard: KeyRecordStandard) -> String {
    match standard {
        KeyRecordStandard::Interop => data_encoding::BASE64.encode(&Sha1::digest(bytes)),
        KeyRecordStandard::Smpte => data_encoding::BASE64.encode(&Sha256::digest(bytes)),
    }
}

/** `(CanonicalizationMethod, SignatureMethod, Reference DigestMethod)` algorithm URIs. */
fn algorithms(standard: KeyRecordStandard) -> (&'static str, &'static str, &'static str) {
    match standard {
        KeyRecordStandard::Interop => (
            "http://www.w3.org/TR/2001/REC-xml-c14n-20010315",
            "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            "http://www.w3.org/2000/09/xmldsig#sha1",
        ),
        KeyRecordStandard::Smpte => (
            "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments",
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            "http://www.w3.org/2001/04/xmlenc#sha256",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdm_core::Key;

    use crate::decrypted_kdm::DecryptedKDM;
    use crate::formulation::Formulation;

    fn sample_chain(leaf_common_name: &str) -> CertificateChain {
        CertificateChain::generate_new(
            "Example Studio",
            "Key Delivery",
            "Example Studio Root CA",
            "Example Studio Intermediate CA",
            leaf_common_name,
        )
        .unwrap()
    }

    fn sample_signed_kdm() -> (EncryptedKDM, CertificateChain) {
        let signer = sample_chain("Example Leaf Decryption");
        let recipient_chain = sample_chain("Example Recipient");
        let recipient = recipient_chain.leaf().unwrap();

        let cpl_id = Uuid::new_v4();
        let mut kdm = DecryptedKDM::new(
            cpl_id,
            "Feature Presentation",
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
        );
        kdm.add_key(KeyRecord {
            standard: KeyRecordStandard::Smpte,
            signer_thumbprint: [0u8; 20],
            cpl_id,
            key_id: Uuid::new_v4(),
            key_type_tag: "MDIK".to_owned(),
            key_type_scope: None,
            not_valid_before: LocalTime::parse("2024-01-01T00:00:00Z").unwrap(),
            not_valid_after: LocalTime::parse("2024-02-01T00:00:00Z").unwrap(),
            content_key: Key::from_hex("00112233445566778899aabbccddeeff").unwrap(),
        })
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
        (encrypted, signer)
    }

    #[test]
    fn verify_signature_accepts_freshly_signed_kdm() {
        let (encrypted, signer) = sample_signed_kdm();
        let root = signer.root().unwrap();
        encrypted.verify_signature(&[root]).unwrap();
    }

    #[test]
    fn verify_signature_rejects_untrusted_root() {
        let (encrypted, _signer) = sample_signed_kdm();
        let other_root = sample_chain("Unrelated Leaf").root().unwrap();
        assert!(encrypted.verify_signature(&[other_root]).is_err());
    }

    #[test]
    fn verify_signature_detects_tampered_public_content() {
        let (encrypted, signer) = sample_signed_kdm();
        let root = signer.root().unwrap();

        let xml = encrypted.to_xml().unwrap();
        let tampered = String::from_utf8(xml)
            .unwrap()
            .replace("Feature Presentation", "Tampered Presentation");
        let reparsed = EncryptedKDM::parse(tampered.as_bytes()).unwrap();
        assert!(reparsed.verify_signature(&[root]).is_err());
    }

    #[test]
    fn verify_signature_detects_tampered_signature_value() {
        let (encrypted, signer) = sample_signed_kdm();
        let root = signer.root().unwrap();

        let xml = encrypted.to_xml().unwrap();
        let text = String::from_utf8(xml).unwrap();
        let start = text.find("<ds:SignatureValue>").unwrap() + "<ds:SignatureValue>".len();
        let end = text.find("</ds:SignatureValue>").unwrap();
        let mut tampered = text.clone();
        tampered.replace_range(start..end, "AAAA");
        let reparsed = EncryptedKDM::parse(tampered.as_bytes()).unwrap();
        assert!(reparsed.verify_signature(&[root]).is_err());
    }

    #[test]
    fn urn_uuid_parses_with_and_without_prefix() {
        let id = Uuid::new_v4();
        assert_eq!(parse_urn_uuid(&format!("urn:uuid:{id}")).unwrap(), id);
        assert_eq!(parse_urn_uuid(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn mdek_key_scopes_to_dolby() {
        let id = TypedKeyId {
            key_type: "MDEK".to_owned(),
            key_id: Uuid::new_v4(),
            key_type_scope: None,
        };
        assert_eq!(id.scope(), KEY_TYPE_SCOPE_DOLBY);
    }

    #[test]
    fn other_key_types_scope_to_smpte() {
        for tag in ["MDIK", "MDAK", "MDSK"] {
            let id = TypedKeyId {
                key_type: tag.to_owned(),
                key_id: Uuid::new_v4(),
                key_type_scope: None,
            };
            assert_eq!(id.scope(), KEY_TYPE_SCOPE_SMPTE);
        }
    }

    #[test]
    fn explicit_scope_overrides_default() {
        let id = TypedKeyId {
            key_type: "MDIK".to_owned(),
            key_id: Uuid::new_v4(),
            key_type_scope: Some("https://example.com/custom-scope".to_owned()),
        };
        assert_eq!(id.scope(), "https://example.com/custom-scope");
    }

    #[test]
    fn algorithms_differ_by_standard() {
        let (c14n_i, sig_i, digest_i) = algorithms(KeyRecordStandard::Interop);
        let (c14n_s, sig_s, digest_s) = algorithms(KeyRecordStandard::Smpte);
        assert_ne!(c14n_i, c14n_s);
        assert!(sig_i.ends_with("rsa-sha1"));
        assert!(sig_s.ends_with("rsa-sha256"));
        assert!(digest_i.ends_with("sha1"));
        assert!(digest_s.ends_with("sha256"));
    }
}
