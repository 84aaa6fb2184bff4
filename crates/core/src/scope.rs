//! Scopes — the three-tier visibility hierarchy.
//!
//! Every memory and graph record lives in exactly one scope:
//! - `global` — always visible
//! - `project:<name>` — visible while the project is active
//! - `session:<id>` — visible while the session lease is unexpired
//!
//! Each scope maps 1:1 onto a storage partition (a vector collection and a
//! graph scope key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScopeError;

/// Prefix shared by every partition name.
pub const PARTITION_PREFIX: &str = "temple";

/// The tier of a scope. Ordering follows precedence: session first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTier {
    Session,
    Project,
    Global,
}

impl ScopeTier {
    /// Precedence rank; lower wins.
    pub fn rank(self) -> u8 {
        match self {
            Self::Session => 0,
            Self::Project => 1,
            Self::Global => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Project => "project",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for ScopeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete scope: tier plus (for project/session) its name.
///
/// Serialized as its scope key (`"global"`, `"project:apollo"`, `"session:s1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Global,
    Project(String),
    Session(String),
}

impl Scope {
    pub fn project(name: impl Into<String>) -> Self {
        Self::Project(name.into())
    }

    pub fn session(id: impl Into<String>) -> Self {
        Self::Session(id.into())
    }

    pub fn tier(&self) -> ScopeTier {
        match self {
            Self::Global => ScopeTier::Global,
            Self::Project(_) => ScopeTier::Project,
            Self::Session(_) => ScopeTier::Session,
        }
    }

    /// The stable string key, e.g. `project:apollo`.
    pub fn key(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Project(name) => format!("project:{name}"),
            Self::Session(id) => format!("session:{id}"),
        }
    }

    /// The storage partition (vector collection) backing this scope.
    pub fn partition(&self) -> String {
        match self {
            Self::Global => format!("{PARTITION_PREFIX}_global"),
            Self::Project(name) => format!("{PARTITION_PREFIX}_project_{name}"),
            Self::Session(id) => format!("{PARTITION_PREFIX}_session_{id}"),
        }
    }

    /// Inverse of [`Scope::partition`].
    pub fn from_partition(partition: &str) -> Option<Self> {
        let rest = partition.strip_prefix(PARTITION_PREFIX)?.strip_prefix('_')?;
        if rest == "global" {
            return Some(Self::Global);
        }
        if let Some(name) = rest.strip_prefix("project_") {
            return (!name.is_empty()).then(|| Self::Project(name.to_string()));
        }
        if let Some(id) = rest.strip_prefix("session_") {
            return (!id.is_empty()).then(|| Self::Session(id.to_string()));
        }
        None
    }

    /// Filesystem-safe stem (`global`, `project_apollo`).
    pub fn file_stem(&self) -> String {
        self.key()
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' => '_',
                c => c,
            })
            .collect()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "global" {
            return Ok(Self::Global);
        }
        let (tier, name) = trimmed
            .split_once(':')
            .ok_or_else(|| ScopeError::Invalid(s.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ScopeError::Invalid(s.to_string()));
        }
        match tier.trim() {
            "project" => Ok(Self::Project(name.to_string())),
            "session" => Ok(Self::Session(name.to_string())),
            _ => Err(ScopeError::Invalid(s.to_string())),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.key()
    }
}

/// A session lease with an absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLease {
    pub id: String,

    /// `None` means the lease never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Per-tenant active context. Global is implicit and always active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionLease>,
}

impl ActiveContext {
    /// The session lease, if present and unexpired at `now`.
    pub fn live_session(&self, now: DateTime<Utc>) -> Option<&SessionLease> {
        self.session.as_ref().filter(|lease| !lease.is_expired(now))
    }

    /// Whether `scope` is currently visible under this context.
    pub fn is_active(&self, scope: &Scope, now: DateTime<Utc>) -> bool {
        match scope {
            Scope::Global => true,
            Scope::Project(name) => self.project.as_deref() == Some(name.as_str()),
            Scope::Session(id) => self
                .live_session(now)
                .is_some_and(|lease| lease.id == *id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn parse_round_trips_keys() {
        for key in ["global", "project:apollo", "session:s-42"] {
            let scope: Scope = key.parse().unwrap();
            assert_eq!(scope.key(), key);
        }
    }

    #[test]
    fn parse_rejects_unknown_and_empty() {
        assert!("team:x".parse::<Scope>().is_err());
        assert!("project:".parse::<Scope>().is_err());
        assert!("project:   ".parse::<Scope>().is_err());
        assert!("".parse::<Scope>().is_err());
    }

    #[test]
    fn partition_names() {
        assert_eq!(Scope::Global.partition(), "temple_global");
        assert_eq!(Scope::project("apollo").partition(), "temple_project_apollo");
        assert_eq!(Scope::session("s1").partition(), "temple_session_s1");
        assert_eq!(
            Scope::from_partition("temple_project_apollo"),
            Some(Scope::project("apollo"))
        );
        assert_eq!(Scope::from_partition("other_global"), None);
    }

    #[test]
    fn tier_ordering_is_precedence() {
        let mut tiers = vec![ScopeTier::Global, ScopeTier::Session, ScopeTier::Project];
        tiers.sort();
        assert_eq!(
            tiers,
            vec![ScopeTier::Session, ScopeTier::Project, ScopeTier::Global]
        );
    }

    #[test]
    fn scope_serializes_as_key() {
        let json = serde_json::to_string(&Scope::project("apollo")).unwrap();
        assert_eq!(json, "\"project:apollo\"");
        let back: Scope = serde_json::from_str("\"session:abc\"").unwrap();
        assert_eq!(back, Scope::session("abc"));
        assert!(serde_json::from_str::<Scope>("\"bogus\"").is_err());
    }

    #[test]
    fn file_stem_replaces_separators() {
        assert_eq!(Scope::project("a/b").file_stem(), "project_a_b");
    }

    #[test]
    fn expired_session_is_not_active() {
        let now = Utc::now();
        let ctx = ActiveContext {
            project: Some("apollo".into()),
            session: Some(SessionLease {
                id: "s1".into(),
                expires_at: Some(now - Duration::seconds(1)),
            }),
        };
        assert!(ctx.is_active(&Scope::Global, now));
        assert!(ctx.is_active(&Scope::project("apollo"), now));
        assert!(!ctx.is_active(&Scope::project("zeus"), now));
        assert!(!ctx.is_active(&Scope::session("s1"), now));
        assert!(ctx.live_session(now).is_none());
    }
}
