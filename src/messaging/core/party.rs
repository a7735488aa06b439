//! Party roles, thread sides, and the authenticated viewer context.
//!
//! A conversation has exactly two *sides* — the client side and the agent
//! side — but three possible *roles*: the client, the assigned agent, and an
//! agency administrator acting on the agent's behalf. Admin activity is
//! always presented as the agent side of the thread.
//!
//! The [`Viewer`] struct is the session context decoded once at the boundary
//! and passed explicitly into every core operation; the core trusts it and
//! performs no authentication of its own.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::messaging::core::ids::{AgencyId, UserId};

/// Role of a message sender or operation caller.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    /// The inquiring client.
    Client,
    /// The currently-assigned agent.
    Agent,
    /// An administrator of the agent's agency.
    AgencyAdmin,
}

impl PartyRole {
    /// Stable string representation (for storage and logs).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Agent => "agent",
            Self::AgencyAdmin => "agency_admin",
        }
    }

    /// The side of the thread this role speaks for.
    ///
    /// Agency-admin messages are presented as if from the agent side.
    #[must_use]
    pub const fn side(self) -> PartySide {
        match self {
            Self::Client => PartySide::Client,
            Self::Agent | Self::AgencyAdmin => PartySide::Agent,
        }
    }
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PartyRole {
    type Err = UnknownParty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "agent" => Ok(Self::Agent),
            "agency_admin" => Ok(Self::AgencyAdmin),
            other => Err(UnknownParty(other.to_string())),
        }
    }
}

/// One of the two read-tracking sides of a thread.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartySide {
    /// The client side.
    Client,
    /// The agent side (agent and agency admin).
    Agent,
}

impl PartySide {
    /// Stable string representation (for storage and logs).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Agent => "agent",
        }
    }

    /// The other side of the thread.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Client => Self::Agent,
            Self::Agent => Self::Client,
        }
    }
}

impl fmt::Display for PartySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PartySide {
    type Err = UnknownParty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "agent" => Ok(Self::Agent),
            other => Err(UnknownParty(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown role or side string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownParty(pub String);

impl fmt::Display for UnknownParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown party designator: {:?}", self.0)
    }
}

impl std::error::Error for UnknownParty {}

impl ToSql for PartyRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PartyRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownParty| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for PartySide {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PartySide {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownParty| FromSqlError::Other(Box::new(e)))
    }
}

/// Authenticated session context for one core operation.
///
/// Produced by the identity collaborator at the boundary; never constructed
/// from untrusted input inside the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    /// The caller's user id.
    pub user_id: UserId,
    /// The caller's role.
    pub role: PartyRole,
    /// The caller's agency, when the role carries one.
    pub agency_id: Option<AgencyId>,
}

impl Viewer {
    /// Viewer context for a client.
    #[must_use]
    pub const fn client(user_id: UserId) -> Self {
        Self {
            user_id,
            role: PartyRole::Client,
            agency_id: None,
        }
    }

    /// Viewer context for an agent.
    #[must_use]
    pub const fn agent(user_id: UserId, agency_id: AgencyId) -> Self {
        Self {
            user_id,
            role: PartyRole::Agent,
            agency_id: Some(agency_id),
        }
    }

    /// Viewer context for an agency administrator.
    #[must_use]
    pub const fn agency_admin(user_id: UserId, agency_id: AgencyId) -> Self {
        Self {
            user_id,
            role: PartyRole::AgencyAdmin,
            agency_id: Some(agency_id),
        }
    }

    /// The thread side this viewer reads and writes as.
    #[must_use]
    pub const fn side(&self) -> PartySide {
        self.role.side()
    }
}
