use std::str::FromStr;
use std::time::Duration;

use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use signature::SignatureEncoding;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{DecodePem, EncodePem};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

use crate::certificate::Certificate;
use crate::error::{KdmCoreError, KdmCoreResult};

/** Forty years, the validity period used for chains generated in-process. */
const CHAIN_VALIDITY_SECS: u64 = 60 * 60 * 24 * 365 * 40;

const ROOT_SERIAL: u64 = 5;
const INTERMEDIATE_SERIAL: u64 = 6;
const LEAF_SERIAL: u64 = 7;

/**
    A set of certificates that may or may not form a valid root-to-leaf
    chain, together with the private key matching the leaf (if known).

    Certificates are kept in whatever order they were added or parsed in;
    [`CertificateChain::root_to_leaf`] searches for the ordering that makes
    them a chain, rather than assuming the caller supplied one.
*/
#[derive(Clone)]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
    key: Option<String>,
}

impl CertificateChain {
    pub fn new() -> Self {
        Self {
            certificates: Vec::new(),
            key: None,
        }
    }

    /**
        Parse a bundle of concatenated PEM certificates, then check that the
        result is a valid chain.
    */
    pub fn from_pem_bundle(bundle: &str) -> KdmCoreResult<Self> {
        let mut certificates = Vec::new();
        let mut rest = bundle.to_owned();
        while let Ok((cert, residual)) = Certificate::parse_prefix(&rest) {
            certificates.push(cert);
            rest = residual;
        }
        let chain = Self {
            certificates,
            key: None,
        };
        chain.root_to_leaf()?;
        Ok(chain)
    }

    /**
        Generate a fresh three-tier chain (root, intermediate, leaf), each
        level holding its own RSA-2048 key, the leaf signed by the
        intermediate and the intermediate signed by the root.
    */
    pub fn generate_new(
        organisation: &str,
        organisational_unit: &str,
        root_common_name: &str,
        intermediate_common_name: &str,
        leaf_common_name: &str,
    ) -> KdmCoreResult<Self> {
        let root_key = generate_rsa_key()?;
        let intermediate_key = generate_rsa_key()?;
        let leaf_key = generate_rsa_key()?;

        let root_subject = build_subject(
            organisation,
            organisational_unit,
            root_common_name,
            &root_key.to_public_key(),
        )?;
        let intermediate_subject = build_subject(
            organisation,
            organisational_unit,
            intermediate_common_name,
            &intermediate_key.to_public_key(),
        )?;
        let leaf_subject = build_subject(
            organisation,
            organisational_unit,
            leaf_common_name,
            &leaf_key.to_public_key(),
        )?;

        let validity = Validity::from_now(Duration::from_secs(CHAIN_VALIDITY_SECS))
            .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?;

        let root_signer = SigningKey::<Sha256>::new(root_key.clone());
        let root_pem = {
            let spki = spki_of(&root_key)?;
            let mut builder = CertificateBuilder::new(
                Profile::Root,
                SerialNumber::from(ROOT_SERIAL),
                validity,
                root_subject.clone(),
                spki,
                &root_signer,
            )
            .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?;
            let cert = builder
                .build()
                .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?;
            cert.to_pem(LineEnding::LF)
                .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?
        };
        let root_cert = Certificate::parse(&root_pem)?;

        let intermediate_pem = {
            let spki = spki_of(&intermediate_key)?;
            let mut builder = CertificateBuilder::new(
                Profile::SubCA {
                    issuer: root_subject.clone(),
                    path_len_constraint: Some(2),
                },
                SerialNumber::from(INTERMEDIATE_SERIAL),
                validity,
                intermediate_subject.clone(),
                spki,
                &root_signer,
            )
            .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?;
            let cert = builder
                .build()
                .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?;
            cert.to_pem(LineEnding::LF)
                .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?
        };
        let intermediate_cert = Certificate::parse(&intermediate_pem)?;

        let intermediate_signer = SigningKey::<Sha256>::new(intermediate_key);
        let leaf_pem = {
            let spki = spki_of(&leaf_key)?;
            let mut builder = CertificateBuilder::new(
                Profile::Leaf {
                    issuer: intermediate_subject.clone(),
                    enable_key_agreement: false,
                    enable_key_encipherment: true,
                },
                SerialNumber::from(LEAF_SERIAL),
                validity,
                leaf_subject,
                spki,
                &intermediate_signer,
            )
            .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?;
            let cert = builder
                .build()
                .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?;
            cert.to_pem(LineEnding::LF)
                .map_err(|e| KdmCoreError::RsaOperation(e.to_string()))?
        };
        let leaf_cert = Certificate::parse(&leaf_pem)?;

        let leaf_key_pem = leaf_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))?
            .to_string();

        Ok(Self {
            certificates: vec![root_cert, intermediate_cert, leaf_cert],
            key: Some(leaf_key_pem),
        })
    }

    /** The certificates in whatever order they were added, unvalidated. */
    pub fn unordered(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn add(&mut self, certificate: Certificate) {
        self.certificates.push(certificate);
    }

    pub fn remove(&mut self, certificate: &Certificate) {
        self.certificates.retain(|c| c != certificate);
    }

    pub fn set_private_key_pem(&mut self, pem: String) {
        self.key = Some(pem);
    }

    pub fn private_key_pem(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /** The chain ordered root-first, found by searching permutations of the stored certificates. */
    pub fn root_to_leaf(&self) -> KdmCoreResult<Vec<&Certificate>> {
        if self.certificates.is_empty() || self.certificates.len() > 6 {
            return Err(KdmCoreError::ChainLength(self.certificates.len()));
        }

        let mut indices: Vec<usize> = (0..self.certificates.len()).collect();
        indices.sort_by(|&a, &b| {
            self.certificates[a]
                .subject()
                .cmp(self.certificates[b].subject())
        });

        loop {
            let ordered: Vec<&Certificate> =
                indices.iter().map(|&i| &self.certificates[i]).collect();
            if Self::chain_valid(&ordered) {
                return Ok(ordered);
            }
            if !next_permutation(&mut indices) {
                return Err(KdmCoreError::ChainUnorderable);
            }
        }
    }

    /** The chain ordered leaf-first. */
    pub fn leaf_to_root(&self) -> KdmCoreResult<Vec<&Certificate>> {
        let mut ordered = self.root_to_leaf()?;
        ordered.reverse();
        Ok(ordered)
    }

    pub fn root(&self) -> KdmCoreResult<Certificate> {
        Ok(self.root_to_leaf()?.first().copied().cloned().unwrap())
    }

    pub fn leaf(&self) -> KdmCoreResult<Certificate> {
        Ok(self.root_to_leaf()?.last().copied().cloned().unwrap())
    }

    /**
        Whether `chain` (in root-to-leaf order) is internally consistent:
        each certificate's issuer must name the previous certificate's
        subject, the two subjects must differ, and the signature must
        actually verify against the previous certificate's key. A plain
        string match on issuer/subject isn't enough on its own; without
        the signature check, two unrelated certificates that happen to
        share a subject string would be accepted as a link.
    */
    fn chain_valid(chain: &[&Certificate]) -> bool {
        chain.windows(2).all(|pair| {
            let (parent, child) = (pair[0], pair[1]);
            child.issuer() == parent.subject()
                && child.subject() != parent.subject()
                && child.verify_issued_by(parent)
        })
    }

    /** Whether the stored private key's modulus matches the leaf certificate's public key. */
    pub fn private_key_valid(&self) -> bool {
        if self.certificates.is_empty() {
            return true;
        }
        let Some(key_pem) = &self.key else {
            return false;
        };
        let Ok(private_key) = RsaPrivateKey::from_pkcs8_pem(key_pem) else {
            return false;
        };
        let Ok(leaf) = self.leaf() else {
            return false;
        };
        private_key.to_public_key().n() == leaf.public_key().n()
    }

    /** Checks chain ordering and private-key match, returning the reason for the first failure. */
    pub fn validate(&self) -> KdmCoreResult<()> {
        self.root_to_leaf()?;
        if !self.private_key_valid() {
            return Err(KdmCoreError::ChainKeyMismatch);
        }
        Ok(())
    }

    /** Sign `message` with the leaf private key, using RSA-PKCS1v15 with SHA-256. */
    pub fn sign_sha256(&self, message: &[u8]) -> KdmCoreResult<Vec<u8>> {
        let signing_key = SigningKey::<Sha256>::new(self.leaf_private_key()?);
        Ok(signature::Signer::sign(&signing_key, message).to_vec())
    }

    /** Sign `message` with the leaf private key, using RSA-PKCS1v15 with SHA-1 (interop KDMs). */
    pub fn sign_sha1(&self, message: &[u8]) -> KdmCoreResult<Vec<u8>> {
        let signing_key = SigningKey::<Sha1>::new(self.leaf_private_key()?);
        Ok(signature::Signer::sign(&signing_key, message).to_vec())
    }

    fn leaf_private_key(&self) -> KdmCoreResult<RsaPrivateKey> {
        let key_pem = self
            .key
            .as_ref()
            .ok_or_else(|| KdmCoreError::RsaOperation("chain has no private key".into()))?;
        RsaPrivateKey::from_pkcs8_pem(key_pem).map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))
    }
}

impl Default for CertificateChain {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_rsa_key() -> KdmCoreResult<RsaPrivateKey> {
    RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048)
        .map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))
}

fn spki_of(key: &RsaPrivateKey) -> KdmCoreResult<SubjectPublicKeyInfoOwned> {
    let pem = key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))?;
    SubjectPublicKeyInfoOwned::from_pem(pem.as_bytes())
        .map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))
}

/**
    The `dnQualifier` RDN value used throughout: the base64 encoding of the
    SHA-1 digest of the public key's SubjectPublicKeyInfo DER, skipping the
    fixed 24-byte ASN.1 header that precedes the key bits for a 2048-bit RSA key.
*/
fn dn_qualifier(public_key: &RsaPublicKey) -> KdmCoreResult<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))?;
    let bytes = der.as_bytes();
    let tail = bytes
        .get(24..)
        .ok_or_else(|| KdmCoreError::RsaKeyParse("public key DER too short".into()))?;
    Ok(data_encoding::BASE64.encode(&Sha1::digest(tail)))
}

fn build_subject(
    organisation: &str,
    organisational_unit: &str,
    common_name: &str,
    public_key: &RsaPublicKey,
) -> KdmCoreResult<Name> {
    let qualifier = dn_qualifier(public_key)?;
    let subject = format!(
        "O={},OU={},CN={},dnQualifier={}",
        escape_rfc4514_value(organisation),
        escape_rfc4514_value(organisational_unit),
        escape_rfc4514_value(common_name),
        escape_rfc4514_value(&qualifier),
    );
    Name::from_str(&subject).map_err(|e| KdmCoreError::RsaKeyParse(e.to_string()))
}

/** Escape the characters RFC 4514 reserves in a relative distinguished name value. */
fn escape_rfc4514_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &c) in chars.iter().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if i == 0 || i == chars.len() - 1 => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/** In-place `std::next_permutation` equivalent over a slice of indices. */
fn next_permutation(indices: &mut [usize]) -> bool {
    if indices.len() < 2 {
        return false;
    }
    let mut i = indices.len() - 1;
    while i > 0 && indices[i - 1] >= indices[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = indices.len() - 1;
    while indices[j] <= indices[i - 1] {
        j -= 1;
    }
    indices.swap(i - 1, j);
    indices[i..].reverse();
    true
}

/** A real, internally consistent chain for use in tests across the crate. */
pub(crate) mod test_support {
    use super::CertificateChain;

    pub fn sample_chain() -> CertificateChain {
        CertificateChain::generate_new(
            "Example Studio",
            "Key Delivery",
            "Example Studio Root CA",
            "Example Studio Intermediate CA",
            "Example Leaf Decryption",
        )
        .expect("in-process chain generation should always succeed")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_chain;
    use super::*;

    #[test]
    fn generated_chain_orders_and_validates() {
        let chain = sample_chain();
        let ordered = chain.root_to_leaf().unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(chain.root().unwrap(), *ordered[0]);
        assert_eq!(chain.leaf().unwrap(), *ordered[2]);
        chain.validate().unwrap();
    }

    #[test]
    fn unordered_input_is_still_resolved() {
        let chain = sample_chain();
        let shuffled = CertificateChain {
            certificates: vec![
                chain.leaf().unwrap(),
                chain.root().unwrap(),
                chain.certificates[1].clone(),
            ],
            key: chain.key.clone(),
        };
        let ordered = shuffled.root_to_leaf().unwrap();
        assert_eq!(*ordered[0], chain.root().unwrap());
        assert_eq!(*ordered[2], chain.leaf().unwrap());
    }

    #[test]
    fn pem_bundle_round_trip() {
        let chain = sample_chain();
        let leaf_to_root = chain.leaf_to_root().unwrap();
        let bundle = leaf_to_root
            .iter()
            .map(|c| c.to_pem(true))
            .collect::<Vec<_>>()
            .join("\n");
        let reloaded = CertificateChain::from_pem_bundle(&bundle).unwrap();
        assert_eq!(reloaded.leaf().unwrap(), chain.leaf().unwrap());
        assert_eq!(reloaded.root().unwrap(), chain.root().unwrap());
    }

    #[test]
    fn sign_and_verify_sha256() {
        let chain = sample_chain();
        let signature = chain.sign_sha256(b"hello kdm").unwrap();
        let leaf = chain.leaf().unwrap();
        let verifying_key =
            rsa::pkcs1v15::VerifyingKey::<Sha256>::new(leaf.public_key().clone());
        let sig = rsa::pkcs1v15::Signature::try_from(signature.as_slice()).unwrap();
        assert!(signature::Verifier::verify(&verifying_key, b"hello kdm", &sig).is_ok());
    }

    #[test]
    fn private_key_valid_detects_mismatch() {
        let mut chain = sample_chain();
        chain.key = Some(generate_rsa_key().unwrap().to_pkcs8_pem(LineEnding::LF).unwrap().to_string());
        assert!(!chain.private_key_valid());
    }
}
