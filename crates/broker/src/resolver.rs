//! Context resolver — which partitions a call touches, and how their
//! results merge.
//!
//! Precedence is strict: a session hit always outranks a project hit, which
//! always outranks a global hit, whatever the similarity scores.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use temple_core::error::ScopeError;
use temple_core::memory::MemoryEntry;
use temple_core::scope::{ActiveContext, Scope, ScopeTier};

/// Partitions visible to a read, most specific first.
///
/// With no request: `[session?, project?, global]`. With an explicit scope:
/// that scope alone, which must be active.
pub fn resolve(
    context: &ActiveContext,
    requested: Option<&Scope>,
    now: DateTime<Utc>,
) -> Result<Vec<Scope>, ScopeError> {
    if let Some(scope) = requested {
        if context.is_active(scope, now) {
            return Ok(vec![scope.clone()]);
        }
        return Err(match (scope, &context.session) {
            (Scope::Session(id), Some(lease)) if lease.id == *id => ScopeError::Expired { id: id.clone() },
            _ => ScopeError::Inactive { scope: scope.key() },
        });
    }

    let mut scopes = Vec::with_capacity(3);
    if let Some(lease) = context.live_session(now) {
        scopes.push(Scope::session(&lease.id));
    }
    if let Some(project) = &context.project {
        scopes.push(Scope::project(project));
    }
    scopes.push(Scope::Global);
    Ok(scopes)
}

/// Where a write lands: the explicit scope (always allowed), otherwise the
/// most specific active tier.
pub fn store_destination(context: &ActiveContext, explicit: Option<Scope>, now: DateTime<Utc>) -> Scope {
    if let Some(scope) = explicit {
        return scope;
    }
    if let Some(lease) = context.live_session(now) {
        return Scope::session(&lease.id);
    }
    match &context.project {
        Some(project) => Scope::project(project),
        None => Scope::Global,
    }
}

/// One retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    pub entry: MemoryEntry,
    pub score: f32,
    pub tier: ScopeTier,
}

impl RankedHit {
    pub fn new(entry: MemoryEntry, score: f32) -> Self {
        Self {
            tier: entry.scope.tier(),
            entry,
            score,
        }
    }

    fn precedence(&self, other: &Self) -> Ordering {
        self.tier
            .rank()
            .cmp(&other.tier.rank())
            .then_with(|| other.score.total_cmp(&self.score))
            .then_with(|| other.entry.created_at.cmp(&self.entry.created_at))
    }
}

/// Concatenate per-partition results and order them by
/// (tier rank asc, score desc, created_at desc).
pub fn merge_and_rank(per_partition: impl IntoIterator<Item = Vec<RankedHit>>) -> Vec<RankedHit> {
    let mut merged: Vec<RankedHit> = per_partition.into_iter().flatten().collect();
    merged.sort_by(RankedHit::precedence);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use temple_core::scope::SessionLease;

    fn context(project: Option<&str>, session: Option<(&str, DateTime<Utc>)>) -> ActiveContext {
        ActiveContext {
            project: project.map(String::from),
            session: session.map(|(id, at)| SessionLease {
                id: id.into(),
                expires_at: Some(at),
            }),
        }
    }

    fn hit(scope: Scope, score: f32, age_secs: i64) -> RankedHit {
        let at = Utc::now() - Duration::seconds(age_secs);
        RankedHit::new(
            MemoryEntry {
                id: format!("{scope}-{score}-{age_secs}"),
                content: "c".into(),
                content_hash: "h".into(),
                scope,
                tags: vec![],
                metadata: Default::default(),
                created_at: at,
                updated_at: at,
                embedding: None,
            },
            score,
        )
    }

    #[test]
    fn resolve_orders_active_tiers() {
        let now = Utc::now();
        let ctx = context(Some("x"), Some(("s1", now + Duration::hours(1))));
        assert_eq!(
            resolve(&ctx, None, now).unwrap(),
            vec![Scope::session("s1"), Scope::project("x"), Scope::Global]
        );
        assert_eq!(resolve(&ActiveContext::default(), None, now).unwrap(), vec![Scope::Global]);
    }

    #[test]
    fn expired_session_is_dropped() {
        let now = Utc::now();
        let ctx = context(None, Some(("s1", now - Duration::seconds(1))));
        assert_eq!(resolve(&ctx, None, now).unwrap(), vec![Scope::Global]);
        assert!(matches!(
            resolve(&ctx, Some(&Scope::session("s1")), now),
            Err(ScopeError::Expired { .. })
        ));
    }

    #[test]
    fn explicit_scope_must_be_active() {
        let now = Utc::now();
        let ctx = context(Some("x"), None);
        assert_eq!(
            resolve(&ctx, Some(&Scope::project("x")), now).unwrap(),
            vec![Scope::project("x")]
        );
        assert_eq!(resolve(&ctx, Some(&Scope::Global), now).unwrap(), vec![Scope::Global]);
        assert!(matches!(
            resolve(&ctx, Some(&Scope::project("y")), now),
            Err(ScopeError::Inactive { .. })
        ));
        assert!(matches!(
            resolve(&ctx, Some(&Scope::session("s9")), now),
            Err(ScopeError::Inactive { .. })
        ));
    }

    #[test]
    fn store_destination_prefers_specific_tier() {
        let now = Utc::now();
        let ctx = context(Some("x"), Some(("s1", now + Duration::hours(1))));
        assert_eq!(store_destination(&ctx, None, now), Scope::session("s1"));
        assert_eq!(
            store_destination(&ctx, None, now + Duration::hours(2)),
            Scope::project("x")
        );
        assert_eq!(store_destination(&ActiveContext::default(), None, now), Scope::Global);
        // Explicit write scopes need not be active.
        assert_eq!(
            store_destination(&ActiveContext::default(), Some(Scope::project("other")), now),
            Scope::project("other")
        );
    }

    #[test]
    fn tier_beats_score() {
        let merged = merge_and_rank(vec![
            vec![hit(Scope::Global, 0.99, 0)],
            vec![hit(Scope::session("s"), 0.10, 0)],
            vec![hit(Scope::project("p"), 0.50, 0)],
        ]);
        let tiers: Vec<ScopeTier> = merged.iter().map(|h| h.tier).collect();
        assert_eq!(tiers, vec![ScopeTier::Session, ScopeTier::Project, ScopeTier::Global]);
    }

    #[test]
    fn score_then_recency_within_tier() {
        let merged = merge_and_rank(vec![vec![
            hit(Scope::Global, 0.5, 100),
            hit(Scope::Global, 0.9, 50),
            hit(Scope::Global, 0.5, 10),
        ]]);
        let scores: Vec<f32> = merged.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.5]);
        assert!(merged[1].entry.created_at > merged[2].entry.created_at);
    }
}
