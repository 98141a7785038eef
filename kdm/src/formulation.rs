use core::fmt;
use core::str::FromStr;

use kdm_core::ParseError;

/**
    Which variant of the KDM profile is being produced. Controls the
    thumbprint list in `AuthorizedDeviceInfo` and whether a
    `ContentAuthenticator` (signer thumbprint) is included; see the
    thumbprint policy table this type is matched against.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formulation {
    ModifiedTransitional1,
    MultipleModifiedTransitional1,
    DciAny,
    DciSpecific,
    ModifiedTransitionalTest,
}

impl Formulation {
    pub const fn from_name(name: &str) -> Option<Self> {
        match name.as_bytes() {
            b"modified-transitional-1" => Some(Self::ModifiedTransitional1),
            b"multiple-modified-transitional-1" => Some(Self::MultipleModifiedTransitional1),
            b"dci-any" => Some(Self::DciAny),
            b"dci-specific" => Some(Self::DciSpecific),
            b"modified-transitional-test" => Some(Self::ModifiedTransitionalTest),
            _ => None,
        }
    }

    pub const fn to_name(self) -> &'static str {
        match self {
            Self::ModifiedTransitional1 => "modified-transitional-1",
            Self::MultipleModifiedTransitional1 => "multiple-modified-transitional-1",
            Self::DciAny => "dci-any",
            Self::DciSpecific => "dci-specific",
            Self::ModifiedTransitionalTest => "modified-transitional-test",
        }
    }

    /** Whether `AuthenticatedPublic` should carry a `ContentAuthenticator` (the signer thumbprint). */
    pub const fn wants_content_authenticator(self) -> bool {
        matches!(self, Self::DciAny | Self::DciSpecific)
    }

    /** Whether the encrypted KDM should include an `AuthorizedDeviceInfo` element at all. */
    pub const fn wants_authorized_device_info(self) -> bool {
        !matches!(self, Self::ModifiedTransitionalTest)
    }

    /** Whether `trusted_devices` should be used verbatim rather than falling back to the sentinel. */
    pub const fn uses_trusted_device_list(self) -> bool {
        matches!(
            self,
            Self::MultipleModifiedTransitional1 | Self::DciSpecific
        )
    }
}

impl fmt::Display for Formulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_name())
    }
}

impl FromStr for Formulation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ParseError {
            kind: "formulation",
            value: s.to_owned(),
        })
    }
}
