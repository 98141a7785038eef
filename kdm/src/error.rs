use thiserror::Error;

use kdm_core::KdmCoreError;

/**
    Errors from building, parsing, or validating a KDM.
*/
#[derive(Debug, Clone, Error)]
pub enum KdmError {
    #[error(transparent)]
    Core(#[from] KdmCoreError),

    #[error("{0}")]
    Misc(String),

    #[error("could not decrypt key record: {0}")]
    Decryption(String),

    #[error("malformed KDM XML: {0}")]
    Format(String),
}

pub type KdmResult<T> = std::result::Result<T, KdmError>;
