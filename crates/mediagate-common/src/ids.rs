//! Typed ID wrappers for type safety across mediagate.
//!
//! Newtype wrappers around UUIDs prevent mixing different kinds of
//! identifiers (e.g. passing a plan ID where a media item ID is expected).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an uploaded media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaItemId(Uuid);

impl MediaItemId {
    /// Generate a new random media item ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MediaItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MediaItemId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<MediaItemId> for Uuid {
    fn from(id: MediaItemId) -> Self {
        id.0
    }
}

impl std::str::FromStr for MediaItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for MediaItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an issued conversion plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(Uuid);

impl PlanId {
    /// Generate a new random plan ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PlanId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for PlanId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an authenticated caller.
///
/// Identities are issued by an external identity provider, so this wraps the
/// opaque subject string rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    /// Subject used for requests when authentication is disabled.
    pub const ANONYMOUS: &'static str = "anonymous";

    /// Wrap an identity subject.
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// The anonymous caller.
    #[must_use]
    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    /// Borrow the subject string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
