//! Feature bitmask negotiated by the guest via `enable_features`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask of features a guest requires from the host.
///
/// The mask is raised during guest init (middleware-scoped) or during
/// `handle_request` (request-scoped) and is never lowered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features(u32);

impl Features {
    /// No features enabled.
    pub const NONE: Features = Features(0);
    /// Pre-read and buffer the request body before `handle_request`.
    pub const BUFFER_REQUEST: Features = Features(1);
    /// Capture the downstream response so `handle_response` can rewrite it.
    pub const BUFFER_RESPONSE: Features = Features(2);
    /// Expose request/response trailers.
    pub const TRAILERS: Features = Features(4);

    /// Construct from the raw i32 the guest passed. Unknown bits are kept;
    /// the host reports back exactly what it will honor.
    pub const fn from_bits(bits: u32) -> Features {
        Features(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Features) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

impl BitOrAssign for Features {
    fn bitor_assign(&mut self, rhs: Features) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        let mut sep = "";
        for (flag, name) in [
            (Features::BUFFER_REQUEST, "buffer-request"),
            (Features::BUFFER_RESPONSE, "buffer-response"),
            (Features::TRAILERS, "trailers"),
        ] {
            if self.contains(flag) {
                write!(f, "{}{}", sep, name)?;
                sep = "|";
            }
        }
        Ok(())
    }
}
