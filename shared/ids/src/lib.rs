//! Numeric identifiers for the DMR domain.
//!
//! The hub stores only these ids, never a full `Repeater`/`Talkgroup`/
//! `User` row; the owning store resolves them on demand. See the
//! "cyclic references" design note in the core spec.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(value: u32) -> Self {
                Self(value)
            }

            pub fn get(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(RepeaterId);
numeric_id!(TalkgroupId);
numeric_id!(UserId);
numeric_id!(StreamId);
numeric_id!(PeerId);

/// The well-known destination ids the routing hub treats specially.
pub mod well_known {
    /// Parrot echo service, both as a talkgroup-shaped and user-shaped dst.
    pub const PARROT_USER: u32 = 9990;
    /// Dynamic-talkgroup unlink signal.
    pub const UNLINK: u32 = 4000;
}

/// Classification of a private-call destination id by digit count, per
/// spec.md §9's open question: the source does not document these
/// ranges normatively. Implemented as written in spec.md §4.G/§9:
/// 6-digit = repeater, 7-8-digit = user, 9-digit = hotspot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RepeaterIdKind {
    Repeater,
    User,
    Hotspot,
    Unrecognized,
}

impl RepeaterIdKind {
    pub fn classify(id: u32) -> Self {
        match id {
            100_000..=999_999 => RepeaterIdKind::Repeater,
            1_000_000..=99_999_999 => RepeaterIdKind::User,
            100_000_000..=999_999_999 => RepeaterIdKind::Hotspot,
            _ => RepeaterIdKind::Unrecognized,
        }
    }

    pub fn is_repeater(id: u32) -> bool {
        matches!(Self::classify(id), RepeaterIdKind::Repeater)
    }

    pub fn is_user(id: u32) -> bool {
        matches!(Self::classify(id), RepeaterIdKind::User)
    }

    pub fn is_hotspot(id: u32) -> bool {
        matches!(Self::classify(id), RepeaterIdKind::Hotspot)
    }
}

/// A repeater's own id, when encoded as a hotspot, carries the owning
/// user's id in its leading digits plus a 2-digit suffix. This is a
/// convenience accessor for the admin surface; the hub itself never
/// needs to decompose a hotspot id.
impl RepeaterId {
    pub fn owning_user_if_hotspot(self) -> Option<UserId> {
        if RepeaterIdKind::is_hotspot(self.0) {
            Some(UserId(self.0 / 100))
        } else {
            None
        }
    }
}
