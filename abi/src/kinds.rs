//! Collection selectors for header and body ABI calls.

use crate::error::AbiError;

/// Which header map an ABI call targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderKind {
    Request = 0,
    Response = 1,
    RequestTrailers = 2,
    ResponseTrailers = 3,
}

impl HeaderKind {
    /// Decode the i32 discriminant the guest passed.
    pub fn from_i32(kind: i32) -> Result<HeaderKind, AbiError> {
        match kind {
            0 => Ok(HeaderKind::Request),
            1 => Ok(HeaderKind::Response),
            2 => Ok(HeaderKind::RequestTrailers),
            3 => Ok(HeaderKind::ResponseTrailers),
            other => Err(AbiError::UnknownHeaderKind(other)),
        }
    }

    /// True for the two trailer kinds, which are gated on the trailers
    /// feature.
    pub fn is_trailers(self) -> bool {
        matches!(self, HeaderKind::RequestTrailers | HeaderKind::ResponseTrailers)
    }
}

/// Which body an ABI call targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyKind {
    Request = 0,
    Response = 1,
}

impl BodyKind {
    pub fn from_i32(kind: i32) -> Result<BodyKind, AbiError> {
        match kind {
            0 => Ok(BodyKind::Request),
            1 => Ok(BodyKind::Response),
            other => Err(AbiError::UnknownBodyKind(other)),
        }
    }
}
