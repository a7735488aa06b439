//! External collaborator lookups: agency membership and property display.
//!
//! The messaging core does not own users, agencies, or listings. It consults
//! them through these traits; the in-memory implementations back the server
//! binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::messaging::core::conversation::GENERAL_INQUIRY_LABEL;
use crate::messaging::core::errors::MessagingResult;
use crate::messaging::core::ids::{AgencyId, PropertyId, UserId};

/// Agency membership lookup.
#[async_trait]
pub trait AgencyDirectory: Send + Sync {
    /// The agency a user belongs to, if any.
    ///
    /// # Errors
    /// Returns an error if the lookup backend fails.
    async fn agency_of(&self, user: UserId) -> MessagingResult<Option<AgencyId>>;

    /// All agents belonging to an agency.
    ///
    /// # Errors
    /// Returns an error if the lookup backend fails.
    async fn agents_of(&self, agency: AgencyId) -> MessagingResult<Vec<UserId>>;

    /// Whether `admin` and `agent` belong to the same agency.
    ///
    /// Unassigned or agency-less parties never match.
    ///
    /// # Errors
    /// Returns an error if the lookup backend fails.
    async fn same_agency(&self, admin: UserId, agent: Option<UserId>) -> MessagingResult<bool> {
        let Some(agent) = agent else {
            return Ok(false);
        };
        let admin_agency = self.agency_of(admin).await?;
        let agent_agency = self.agency_of(agent).await?;
        Ok(matches!((admin_agency, agent_agency), (Some(a), Some(b)) if a == b))
    }
}

/// Property display lookup.
#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    /// Display title for a property, if it still exists.
    ///
    /// # Errors
    /// Returns an error if the lookup backend fails.
    async fn title_of(&self, property: PropertyId) -> MessagingResult<Option<String>>;

    /// Display label for an optional property reference.
    ///
    /// A missing or deleted property degrades to the general-inquiry label,
    /// never an error.
    ///
    /// # Errors
    /// Returns an error if the lookup backend fails.
    async fn label_for(&self, property: Option<PropertyId>) -> MessagingResult<String> {
        match property {
            Some(id) => Ok(self
                .title_of(id)
                .await?
                .unwrap_or_else(|| GENERAL_INQUIRY_LABEL.to_string())),
            None => Ok(GENERAL_INQUIRY_LABEL.to_string()),
        }
    }
}

/// In-memory agency directory.
#[derive(Debug, Default)]
pub struct InMemoryAgencyDirectory {
    members: DashMap<UserId, AgencyId>,
}

impl InMemoryAgencyDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user as a member of an agency.
    pub fn register(&self, user: UserId, agency: AgencyId) {
        self.members.insert(user, agency);
    }
}

#[async_trait]
impl AgencyDirectory for InMemoryAgencyDirectory {
    async fn agency_of(&self, user: UserId) -> MessagingResult<Option<AgencyId>> {
        Ok(self.members.get(&user).map(|entry| *entry.value()))
    }

    async fn agents_of(&self, agency: AgencyId) -> MessagingResult<Vec<UserId>> {
        Ok(self
            .members
            .iter()
            .filter(|entry| *entry.value() == agency)
            .map(|entry| *entry.key())
            .collect())
    }
}

/// In-memory property directory.
#[derive(Debug, Default)]
pub struct InMemoryPropertyDirectory {
    titles: DashMap<PropertyId, String>,
}

impl InMemoryPropertyDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated with property titles.
    #[must_use]
    pub fn with_titles(titles: HashMap<PropertyId, String>) -> Self {
        let directory = Self::new();
        for (id, title) in titles {
            directory.titles.insert(id, title);
        }
        directory
    }

    /// Register a property title.
    pub fn register(&self, property: PropertyId, title: impl Into<String>) {
        self.titles.insert(property, title.into());
    }
}

#[async_trait]
impl PropertyDirectory for InMemoryPropertyDirectory {
    async fn title_of(&self, property: PropertyId) -> MessagingResult<Option<String>> {
        Ok(self.titles.get(&property).map(|entry| entry.value().clone()))
    }
}
