//! Identifiers and scopes.
//!
//! `CommandId`, `EventId` and `SessionId` are opaque newtypes over `String`
//! so callers can't accidentally compare a command id to an event id even
//! though both are UUID strings under the hood.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(CommandId);
opaque_id!(EventId);

/// Session identifier. Non-empty, caller-chosen, except for the reserved
/// bus-wide scope `"BUS"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// The reserved identifier denoting the process-lifetime scope.
    pub const BUS: &'static str = "BUS";

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn bus() -> Self {
        Self(Self::BUS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_bus(&self) -> bool {
        self.0 == Self::BUS
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Handler lifetime namespace. Exactly two shapes exist: the process-wide
/// `Bus` scope, and a `Session`-scoped namespace tied to a `SessionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Bus,
    Session(SessionId),
}

impl Scope {
    pub fn session(id: impl Into<SessionId>) -> Self {
        Scope::Session(id.into())
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Scope::Bus => None,
            Scope::Session(id) => Some(id),
        }
    }

    /// Resolve a scope from a caller-supplied session id, applying the
    /// `"BUS"`-is-reserved rule from the data model.
    pub fn from_session_id(session_id: &SessionId) -> Self {
        if session_id.is_bus() {
            Scope::Bus
        } else {
            Scope::Session(session_id.clone())
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Bus => f.write_str("BUS"),
            Scope::Session(id) => write!(f, "SESSION:{id}"),
        }
    }
}

/// A registration key handed back by the registry; opaque to callers beyond
/// being usable with `unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub(crate) scope: Scope,
    pub(crate) message_type: &'static str,
    pub(crate) registration_order: u64,
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}#{}",
            self.scope, self.message_type, self.registration_order
        )
    }
}
