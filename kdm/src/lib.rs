mod decrypted_kdm;
mod encrypted_kdm;
mod error;
mod formulation;
mod xml;

pub use self::decrypted_kdm::DecryptedKDM;
pub use self::encrypted_kdm::{
    AuthenticatedPublic, AuthorizedDeviceInfo, EncryptedKDM, IssuerSerial, Recipient,
    RequiredExtensions, TypedKeyId, X509Data, SENTINEL_THUMBPRINT,
};
pub use self::error::{KdmError, KdmResult};
pub use self::formulation::Formulation;

pub use kdm_core::{Certificate, CertificateChain, Key, KeyRecord, KeyRecordStandard, LocalTime};
