//! Message identifiers and status codes.

use std::fmt;

/// Replies carry the request identifier plus this offset.
pub const MIG_REPLY_OFFSET: i32 = 100;

/// Requests understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// `bootstrap_check_in` (402).
    CheckIn,
    /// `bootstrap_register` (403).
    Register,
    /// `bootstrap_look_up` (404).
    LookUp,
    /// `bootstrap_parent` (406).
    Parent,
    /// `bootstrap_subset` (409).
    Subset,
    /// Broker extension: announce a port the sender created (700).
    RegisterPort,
    /// Broker extension: look up an announced port (701).
    LookupPort,
    /// Broker extension: ask the broker to spawn an application (702).
    SpawnApp,
    /// Broker-internal wake-up notification (799). Never replied to.
    Wake,
}

impl MessageId {
    /// Decodes a raw identifier.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            402 => Some(Self::CheckIn),
            403 => Some(Self::Register),
            404 => Some(Self::LookUp),
            406 => Some(Self::Parent),
            409 => Some(Self::Subset),
            700 => Some(Self::RegisterPort),
            701 => Some(Self::LookupPort),
            702 => Some(Self::SpawnApp),
            799 => Some(Self::Wake),
            _ => None,
        }
    }

    /// Raw identifier.
    #[must_use]
    pub const fn raw(self) -> i32 {
        match self {
            Self::CheckIn => 402,
            Self::Register => 403,
            Self::LookUp => 404,
            Self::Parent => 406,
            Self::Subset => 409,
            Self::RegisterPort => 700,
            Self::LookupPort => 701,
            Self::SpawnApp => 702,
            Self::Wake => 799,
        }
    }

    /// Identifier of the matching reply.
    #[must_use]
    pub const fn reply_id(self) -> i32 {
        self.raw() + MIG_REPLY_OFFSET
    }

    /// Whether the identifier belongs to the broker's extension range, which
    /// always uses length-prefixed names.
    #[must_use]
    pub const fn is_extension(self) -> bool {
        self.raw() >= 700
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckIn => "check_in",
            Self::Register => "register",
            Self::LookUp => "look_up",
            Self::Parent => "parent",
            Self::Subset => "subset",
            Self::RegisterPort => "register_port",
            Self::LookupPort => "lookup_port",
            Self::SpawnApp => "spawn_app",
            Self::Wake => "wake",
        };
        f.write_str(name)
    }
}

/// Return codes carried by status replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// `KERN_SUCCESS` / `BOOTSTRAP_SUCCESS`.
    Success,
    /// `KERN_INVALID_RIGHT`, the answer given to parent and subset requests.
    InvalidRight,
    /// `KERN_NOT_SUPPORTED`.
    NotSupported,
    /// `BOOTSTRAP_NOT_PRIVILEGED`.
    NotPrivileged,
    /// `BOOTSTRAP_NAME_IN_USE`.
    NameInUse,
    /// `BOOTSTRAP_UNKNOWN_SERVICE`.
    UnknownService,
    /// `BOOTSTRAP_SERVICE_ACTIVE`.
    ServiceActive,
    /// `BOOTSTRAP_BAD_COUNT`.
    BadCount,
    /// `BOOTSTRAP_NO_MEMORY`, also used when the registry is full.
    NoMemory,
    /// `MIG_BAD_ID`.
    BadId,
    /// Any other code.
    Other(i32),
}

impl Status {
    /// Decodes a raw return code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            17 => Self::InvalidRight,
            46 => Self::NotSupported,
            1100 => Self::NotPrivileged,
            1101 => Self::NameInUse,
            1102 => Self::UnknownService,
            1103 => Self::ServiceActive,
            1104 => Self::BadCount,
            1105 => Self::NoMemory,
            -303 => Self::BadId,
            other => Self::Other(other),
        }
    }

    /// Raw return code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidRight => 17,
            Self::NotSupported => 46,
            Self::NotPrivileged => 1100,
            Self::NameInUse => 1101,
            Self::UnknownService => 1102,
            Self::ServiceActive => 1103,
            Self::BadCount => 1104,
            Self::NoMemory => 1105,
            Self::BadId => -303,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}
