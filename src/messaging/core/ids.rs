//! Identifier types for the messaging core.
//!
//! This module is intentionally **type-heavy** and **logic-light**.
//! It provides strongly-typed ID newtypes (compile-time safety) and
//! helpers for generation, parsing, and formatting.
//!
//! ## Cross-party continuity
//! Every party to a thread (client, agent, agency admin) is addressed by the
//! same `UserId` space the rest of the platform uses; the messaging core
//! never mints user identities, it only references them.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Generate a random UUID (v4).
#[inline]
#[must_use]
fn uuid_random() -> Uuid {
    Uuid::new_v4()
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }

            /// Wrap an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Extract the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn into_uuid(self) -> Uuid {
                self.0
            }

            /// Convert to 16 bytes for compact DB storage (e.g., `SQLite` `BLOB(16)`).
            #[inline]
            #[must_use]
            pub const fn to_bytes(self) -> [u8; 16] {
                self.0.into_bytes()
            }

            /// Build from 16 bytes (e.g., `SQLite` `BLOB(16)`).
            #[inline]
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<Uuid> for $name {
            #[inline]
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

// ===== Core IDs =============================================================

define_uuid_id!(
    /// User account identifier (client, agent, or agency administrator).
    ///
    /// Default strategy: `UUIDv4` (random) to reduce timestamp leakage when exposed.
    UserId,
    generator = uuid_random
);

define_uuid_id!(
    /// Identifier of an agency (the organization an agent belongs to).
    AgencyId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of a property listing a thread is about.
    ///
    /// Threads without a property are "general inquiries".
    PropertyId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier for a conversation thread.
    ConversationId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier for a persisted message within a conversation.
    MessageId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Locally-generated identifier for an optimistic, not-yet-persisted send.
    ///
    /// Never leaves the process; the server-assigned [`MessageId`] supersedes
    /// it once the persist call confirms.
    ProvisionalId,
    generator = uuid_time_ordered
);

// ===== Rusqlite integration ================================================

mod rusqlite_impl {
    use super::{AgencyId, ConversationId, MessageId, PropertyId, UserId};
    use std::fmt;

    use rusqlite::types::{
        FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef,
    };

    #[derive(Debug)]
    struct InvalidUuidBlobLen {
        got: usize,
    }

    impl fmt::Display for InvalidUuidBlobLen {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "invalid UUID blob length: got {}, expected 16", self.got)
        }
    }

    impl std::error::Error for InvalidUuidBlobLen {}

    fn uuid_from_blob(b: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let bytes: [u8; 16] = b
            .try_into()
            .map_err(|_| FromSqlError::Other(Box::new(InvalidUuidBlobLen { got: b.len() })))?;
        Ok(uuid::Uuid::from_bytes(bytes))
    }

    fn uuid_from_text(t: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
        uuid::Uuid::parse_str(s).map_err(|e| FromSqlError::Other(Box::new(e)))
    }

    macro_rules! impl_rusqlite_uuid_newtype {
        ($t:ty) => {
            impl ToSql for $t {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    // Store UUIDs as TEXT for compatibility
                    Ok(ToSqlOutput::Owned(Value::Text(self.0.to_string())))
                }
            }

            impl FromSql for $t {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    match value {
                        ValueRef::Blob(b) => uuid_from_blob(b).map(Self),
                        ValueRef::Text(t) => uuid_from_text(t).map(Self),
                        _ => Err(FromSqlError::InvalidType),
                    }
                }
            }
        };
    }

    impl_rusqlite_uuid_newtype!(UserId);
    impl_rusqlite_uuid_newtype!(AgencyId);
    impl_rusqlite_uuid_newtype!(PropertyId);
    impl_rusqlite_uuid_newtype!(ConversationId);
    impl_rusqlite_uuid_newtype!(MessageId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_through_string() {
        let id = ConversationId::new();
        let parsed: ConversationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_roundtrip_through_bytes() {
        let id = MessageId::new();
        assert_eq!(id, MessageId::from_bytes(id.to_bytes()));
    }

    #[test]
    fn test_serde_transparent() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
