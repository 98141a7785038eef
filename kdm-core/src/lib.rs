mod certificate;
mod certificate_chain;
mod error;
mod key;
mod keyrecord;
mod time;

pub use self::certificate::Certificate;
pub use self::certificate_chain::CertificateChain;
pub use self::error::{KdmCoreError, KdmCoreResult, ParseError};
pub use self::key::Key;
pub use self::keyrecord::{KeyRecord, KeyRecordStandard};
pub use self::time::LocalTime;
