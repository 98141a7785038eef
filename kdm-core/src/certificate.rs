use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use sha1::{Digest, Sha1};
use x509_parser::prelude::*;

use crate::error::{KdmCoreError, KdmCoreResult};
use crate::time::LocalTime;

const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/**
    A single parsed X.509 certificate, in canonical PEM form.

    Equality and cloning operate on the canonical PEM; accessors are cached at
    parse time so repeated calls don't re-walk the DER.
*/
#[derive(Clone)]
pub struct Certificate {
    pem: String,
    der: Vec<u8>,
    tbs_range: (usize, usize),
    signature: Vec<u8>,
    issuer: String,
    subject: String,
    subject_common_name: Option<String>,
    subject_organization_name: Option<String>,
    subject_organizational_unit_name: Option<String>,
    serial: String,
    thumbprint: String,
    not_before: LocalTime,
    not_after: LocalTime,
    has_utf8_strings: bool,
    public_key: RsaPublicKey,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("serial", &self.serial)
            .finish()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.pem == other.pem
    }
}

impl Eq for Certificate {}

impl Certificate {
    /** Parse a single PEM certificate. Any trailing data after END is rejected. */
    pub fn parse(pem: impl AsRef<str>) -> KdmCoreResult<Self> {
        let (cert, residual) = Self::parse_prefix(pem.as_ref())?;
        if !residual.trim().is_empty() {
            return Err(KdmCoreError::CertificateTrailingData);
        }
        Ok(cert)
    }

    /**
        Parse one certificate from the front of a string that may contain
        several concatenated PEM blocks, returning the unconsumed remainder.
    */
    pub fn parse_prefix(raw: &str) -> KdmCoreResult<(Self, String)> {
        let (fixed_pem, residual) = reformat_pem(raw)?;
        let der = decode_pem_body(&fixed_pem)?;

        let (_, cert) =
            X509Certificate::from_der(&der).map_err(|e| KdmCoreError::CertificateDecode(e.to_string()))?;

        let issuer = name_for_xml(cert.issuer());
        let subject = name_for_xml(cert.subject());

        let subject_common_name = attr_by_oid(cert.subject(), OID_COMMON_NAME);
        let subject_organization_name = attr_by_oid(cert.subject(), OID_ORGANIZATION_NAME);
        let subject_organizational_unit_name =
            attr_by_oid(cert.subject(), OID_ORGANIZATIONAL_UNIT_NAME);

        let serial = bytes_be_to_decimal(cert.raw_serial());

        let tbs_range = tbs_certificate_der_range(&der)?;
        let thumbprint =
            data_encoding::BASE64.encode(&Sha1::digest(&der[tbs_range.0..tbs_range.1]));
        let signature = cert.signature_value.as_ref().to_vec();

        let not_before = LocalTime::from_unix_timestamp(cert.validity().not_before.timestamp());
        let not_after = LocalTime::from_unix_timestamp(cert.validity().not_after.timestamp());

        let has_utf8_strings = cert
            .subject()
            .iter_attributes()
            .any(|a| a.attr_value().tag() == Tag::Utf8String);

        let public_key = match cert.public_key().parsed() {
            Ok(PublicKey::RSA(rsa_pk)) => {
                let n = rsa::BigUint::from_bytes_be(rsa_pk.modulus);
                let e = rsa::BigUint::from_bytes_be(rsa_pk.exponent);
                RsaPublicKey::new(n, e).map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))?
            }
            Ok(_) => return Err(KdmCoreError::RsaKeyParse("not an RSA public key".into())),
            Err(e) => return Err(KdmCoreError::RsaKeyParse(e.to_string())),
        };

        Ok((
            Self {
                pem: fixed_pem,
                der,
                tbs_range,
                signature,
                issuer,
                subject,
                subject_common_name,
                subject_organization_name,
                subject_organizational_unit_name,
                serial,
                thumbprint,
                not_before,
                not_after,
                has_utf8_strings,
                public_key,
            },
            residual,
        ))
    }

    pub fn from_rsa_public_key_der(public_key_der: &[u8]) -> KdmCoreResult<RsaPublicKey> {
        RsaPublicKey::from_pkcs1_der(public_key_der)
            .map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))
    }

    /** Canonical PEM, optionally without the BEGIN/END marker lines. */
    pub fn to_pem(&self, include_markers: bool) -> String {
        if include_markers {
            self.pem.clone()
        } else {
            self.pem
                .lines()
                .filter(|l| *l != BEGIN_CERTIFICATE && *l != END_CERTIFICATE)
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn subject_common_name(&self) -> Option<&str> {
        self.subject_common_name.as_deref()
    }

    pub fn subject_organization_name(&self) -> Option<&str> {
        self.subject_organization_name.as_deref()
    }

    pub fn subject_organizational_unit_name(&self) -> Option<&str> {
        self.subject_organizational_unit_name.as_deref()
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn not_before(&self) -> LocalTime {
        self.not_before
    }

    pub fn not_after(&self) -> LocalTime {
        self.not_after
    }

    pub fn has_utf8_strings(&self) -> bool {
        self.has_utf8_strings
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /**
        Whether this certificate's signature verifies against `issuer`'s public key.

        Tries RSA-PKCS1v15 with SHA-256 first (the signature algorithm used by
        certificates generated in-process) and falls back to SHA-1 so that
        older interop-format chains still verify.
    */
    pub fn verify_issued_by(&self, issuer: &Certificate) -> bool {
        let tbs = &self.der[self.tbs_range.0..self.tbs_range.1];

        if let Ok(sig) = rsa::pkcs1v15::Signature::try_from(self.signature.as_slice()) {
            let verifying_key =
                rsa::pkcs1v15::VerifyingKey::<sha2::Sha256>::new(issuer.public_key.clone());
            if signature::Verifier::verify(&verifying_key, tbs, &sig).is_ok() {
                return true;
            }
            let verifying_key_sha1 =
                rsa::pkcs1v15::VerifyingKey::<Sha1>::new(issuer.public_key.clone());
            if signature::Verifier::verify(&verifying_key_sha1, tbs, &sig).is_ok() {
                return true;
            }
        }
        false
    }
}

const OID_DN_QUALIFIER: &str = "2.5.4.46";
const OID_COMMON_NAME: &str = "2.5.4.3";
const OID_ORGANIZATIONAL_UNIT_NAME: &str = "2.5.4.11";
const OID_ORGANIZATION_NAME: &str = "2.5.4.10";

fn attr_by_oid(name: &X509Name<'_>, oid: &str) -> Option<String> {
    name.iter_attributes()
        .find(|a| a.attr_type().to_id_string() == oid)
        .and_then(|a| a.as_str().ok().map(str::to_owned))
}

/**
    Render a DN the way the wire format expects: `dnQualifier=..,CN=..,OU=..,O=..`,
    with `+` escaped to `\+`. Missing parts are skipped rather than rejected, so this
    also renders certificates that don't carry every attribute.
*/
fn name_for_xml(name: &X509Name<'_>) -> String {
    let parts = [
        ("dnQualifier", attr_by_oid(name, OID_DN_QUALIFIER)),
        ("CN", attr_by_oid(name, OID_COMMON_NAME)),
        ("OU", attr_by_oid(name, OID_ORGANIZATIONAL_UNIT_NAME)),
        ("O", attr_by_oid(name, OID_ORGANIZATION_NAME)),
    ];
    let rendered = parts
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| format!("{k}={v}")))
        .collect::<Vec<_>>()
        .join(",");
    rendered.replace('+', "\\+")
}

/**
    Reformat a certificate so that it has line breaks every 64 characters,
    tolerating whitespace and leading/trailing garbage around the markers.
    Returns the fixed PEM and any non-blank lines found after END.
*/
fn reformat_pem(cert: &str) -> KdmCoreResult<(String, String)> {
    let lines: Vec<&str> = cert
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let begin_idx = lines
        .iter()
        .position(|l| *l == BEGIN_CERTIFICATE)
        .ok_or(KdmCoreError::CertificateMissingBegin)?;

    let mut end_idx = None;
    let mut base64 = String::new();
    for (i, line) in lines.iter().enumerate().skip(begin_idx + 1) {
        if *line == END_CERTIFICATE {
            end_idx = Some(i);
            break;
        }
        base64.push_str(line);
    }
    let end_idx = end_idx.ok_or(KdmCoreError::CertificateMissingEnd)?;

    let mut fixed = String::from(BEGIN_CERTIFICATE);
    fixed.push('\n');
    let bytes = base64.as_bytes();
    for chunk in bytes.chunks(64) {
        fixed.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        fixed.push('\n');
    }
    fixed.push_str(END_CERTIFICATE);

    let residual = lines[end_idx + 1..].join("\n");

    Ok((fixed, residual))
}

fn decode_pem_body(fixed_pem: &str) -> KdmCoreResult<Vec<u8>> {
    let body: String = fixed_pem
        .lines()
        .filter(|l| *l != BEGIN_CERTIFICATE && *l != END_CERTIFICATE)
        .collect();
    data_encoding::BASE64
        .decode(body.as_bytes())
        .map_err(|e| KdmCoreError::CertificateDecode(format!("bad base64: {e}")))
}

fn parse_der_header(data: &[u8]) -> KdmCoreResult<(usize, usize)> {
    if data.len() < 2 {
        return Err(KdmCoreError::CertificateDecode("DER too short".into()));
    }
    let length_byte = data[1];
    if length_byte & 0x80 == 0 {
        Ok((2, length_byte as usize))
    } else {
        let n = (length_byte & 0x7f) as usize;
        if n == 0 || n > 4 || data.len() < 2 + n {
            return Err(KdmCoreError::CertificateDecode(
                "unsupported DER length encoding".into(),
            ));
        }
        let mut len = 0usize;
        for &b in &data[2..2 + n] {
            len = (len << 8) | b as usize;
        }
        Ok((2 + n, len))
    }
}

/**
    The byte range of the `tbsCertificate` field within the full certificate DER:
    the first element inside `Certificate ::= SEQUENCE`.
*/
fn tbs_certificate_der_range(cert_der: &[u8]) -> KdmCoreResult<(usize, usize)> {
    let (outer_header_len, _) = parse_der_header(cert_der)?;
    let tbs_slice = cert_der
        .get(outer_header_len..)
        .ok_or_else(|| KdmCoreError::CertificateDecode("truncated certificate".into()))?;
    let (tbs_header_len, tbs_content_len) = parse_der_header(tbs_slice)?;
    let total = tbs_header_len + tbs_content_len;
    if tbs_slice.get(..total).is_none() {
        return Err(KdmCoreError::CertificateDecode(
            "truncated tbsCertificate".into(),
        ));
    }
    let start = outer_header_len;
    Ok((start, start + total))
}

/** Big-endian byte string to a decimal string, without pulling in a bignum crate. */
fn bytes_be_to_decimal(bytes: &[u8]) -> String {
    let mut digits = vec![0u8];
    for &byte in bytes {
        let mut carry = byte as u32;
        for d in digits.iter_mut() {
            let v = (*d as u32) * 256 + carry;
            *d = (v % 10) as u8;
            carry = v / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    while digits.len() > 1 && *digits.last().unwrap() == 0 {
        digits.pop();
    }
    digits
        .iter()
        .rev()
        .map(|d| (b'0' + d) as char)
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_chain::test_support::sample_chain;

    #[test]
    fn parse_sample_certificate() {
        let chain = sample_chain();
        let cert = chain.leaf().expect("leaf");
        assert!(cert.subject().contains("CN="));
        assert!(!cert.thumbprint().is_empty());
        assert!(cert.not_before() < cert.not_after());
    }

    #[test]
    fn pem_round_trip() {
        let chain = sample_chain();
        let cert = chain.leaf().unwrap();
        let pem = cert.to_pem(true);
        let cert2 = Certificate::parse(&pem).unwrap();
        assert_eq!(*cert, cert2);
    }

    #[test]
    fn trailing_data_rejected() {
        let chain = sample_chain();
        let mut garbage = chain.leaf().unwrap().to_pem(true);
        garbage.push_str("\nnot a certificate\n");
        assert!(Certificate::parse(&garbage).is_err());
    }

    #[test]
    fn missing_begin_rejected() {
        let chain = sample_chain();
        let body = chain.leaf().unwrap().to_pem(true).replace(BEGIN_CERTIFICATE, "");
        assert!(Certificate::parse(&body).is_err());
    }

    #[test]
    fn decimal_serial_conversion() {
        assert_eq!(bytes_be_to_decimal(&[0x01]), "1");
        assert_eq!(bytes_be_to_decimal(&[0xff]), "255");
        assert_eq!(bytes_be_to_decimal(&[0x01, 0x00]), "256");
        assert_eq!(bytes_be_to_decimal(&[]), "0");
    }
}
