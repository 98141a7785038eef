use thiserror::Error;

/**
    Errors from certificate, chain, and primitive handling.
*/
#[derive(Debug, Clone, Error)]
pub enum KdmCoreError {
    #[error("missing BEGIN line in certificate")]
    CertificateMissingBegin,
    #[error("missing END line in certificate")]
    CertificateMissingEnd,
    #[error("could not read X509 certificate: {0}")]
    CertificateDecode(String),
    #[error("unexpected data after certificate")]
    CertificateTrailingData,

    #[error("certificate chain has no valid root-to-leaf ordering")]
    ChainUnorderable,
    #[error("chain certificate count out of range: {0} (expected 1..=6)")]
    ChainLength(usize),
    #[error("private key does not match leaf certificate")]
    ChainKeyMismatch,
    #[error("chain signature verification failed: {0}")]
    ChainVerification(String),

    #[error("RSA key parse failed: {0}")]
    RsaKeyParse(String),
    #[error("RSA operation failed: {0}")]
    RsaOperation(String),

    #[error("invalid time string '{0}': {1}")]
    TimeFormat(String, &'static str),

    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid base64: {0}")]
    InvalidBase64(String),
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

/**
    Type alias for results that may return a [`KdmCoreError`].
*/
pub type KdmCoreResult<T> = std::result::Result<T, KdmCoreError>;

/**
    Error returned by `FromStr` implementations on enum types.
*/
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}
