//! Scope registry — per-tenant active context.
//!
//! Contexts are created on first use and dropped on an explicit clear.
//! Session leases expire lazily: a read past `expires_at` evicts the lease
//! and remembers the session so the next sweep can clean up its data.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use temple_core::error::ScopeError;
use temple_core::scope::{ActiveContext, Scope, SessionLease};
use tokio::sync::RwLock;
use tracing::debug;

/// Partial change to a tenant's context. Unset fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextUpdate {
    /// Activate this project, replacing the current one
    #[serde(default)]
    pub project: Option<String>,

    /// Start (or renew) this session
    #[serde(default)]
    pub session: Option<String>,

    /// Lease length for `session`; the configured TTL otherwise. `0` never expires.
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

/// An expired session awaiting cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    pub tenant: String,
    pub session_id: String,
}

#[derive(Default)]
struct RegistryState {
    contexts: HashMap<String, ActiveContext>,
    expired: Vec<ExpiredSession>,
}

pub struct ScopeRegistry {
    state: RwLock<RegistryState>,
    session_ttl_secs: u64,
}

fn lease(id: String, ttl_secs: u64, now: DateTime<Utc>) -> SessionLease {
    SessionLease {
        id,
        expires_at: i64::try_from(ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl)),
    }
}

fn live_lease(contexts: &HashMap<String, ActiveContext>, id: &str, now: DateTime<Utc>) -> bool {
    contexts
        .values()
        .filter_map(|ctx| ctx.session.as_ref())
        .any(|l| l.id == id && !l.is_expired(now))
}

/// Trimmed, non-empty, and valid inside a scope key.
fn checked_name(kind: &str, name: &str) -> Result<String, ScopeError> {
    let name = name.trim();
    let key = format!("{kind}:{name}");
    key.parse::<Scope>()?;
    Ok(name.to_string())
}

impl ScopeRegistry {
    pub fn new(session_ttl_secs: u64) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            session_ttl_secs,
        }
    }

    /// The tenant's context at `now`, evicting an expired session lease.
    pub async fn get(&self, tenant: &str, now: DateTime<Utc>) -> ActiveContext {
        {
            let state = self.state.read().await;
            match state.contexts.get(tenant) {
                None => return ActiveContext::default(),
                Some(ctx) if ctx.session.as_ref().is_none_or(|l| !l.is_expired(now)) => {
                    return ctx.clone();
                }
                Some(_) => {}
            }
        }

        let mut state = self.state.write().await;
        let RegistryState { contexts, expired } = &mut *state;
        let Some(ctx) = contexts.get_mut(tenant) else {
            return ActiveContext::default();
        };
        if let Some(lease) = ctx.session.take_if(|l| l.is_expired(now)) {
            debug!(tenant, session = %lease.id, "Session lease expired");
            expired.push(ExpiredSession {
                tenant: tenant.to_string(),
                session_id: lease.id,
            });
        }
        ctx.clone()
    }

    pub async fn set(
        &self,
        tenant: &str,
        update: ContextUpdate,
        now: DateTime<Utc>,
    ) -> Result<ActiveContext, ScopeError> {
        let project = update
            .project
            .map(|p| checked_name("project", &p))
            .transpose()?;
        let session = update
            .session
            .map(|s| checked_name("session", &s))
            .transpose()?;

        let mut state = self.state.write().await;
        let ctx = state.contexts.entry(tenant.to_string()).or_default();
        if let Some(project) = project {
            ctx.project = Some(project);
        }
        if let Some(id) = session {
            let ttl = update.session_ttl_secs.unwrap_or(self.session_ttl_secs);
            ctx.session = Some(lease(id, ttl, now));
        }
        let ctx = ctx.clone();
        if let Some(lease) = &ctx.session {
            // A renewed session is no longer awaiting cleanup.
            state
                .expired
                .retain(|e| !(e.tenant == tenant && e.session_id == lease.id));
        }
        Ok(ctx)
    }

    /// Drop the tenant's context. Returns whether one existed.
    pub async fn clear(&self, tenant: &str) -> bool {
        self.state.write().await.contexts.remove(tenant).is_some()
    }

    /// Evict every lease expired at `now` and return those plus any evicted
    /// lazily since the last call. Session data is shared by id across
    /// tenants, so ids some tenant still holds a live lease on are left out.
    pub async fn take_expired(&self, now: DateTime<Utc>) -> Vec<ExpiredSession> {
        let mut state = self.state.write().await;
        let RegistryState { contexts, expired } = &mut *state;
        for (tenant, ctx) in contexts.iter_mut() {
            if let Some(lease) = ctx.session.take_if(|l| l.is_expired(now)) {
                expired.push(ExpiredSession {
                    tenant: tenant.clone(),
                    session_id: lease.id,
                });
            }
        }
        let mut taken = std::mem::take(expired);
        taken.retain(|e| !live_lease(contexts, &e.session_id, now));
        taken
    }

    /// Whether any tenant holds an unexpired lease on session `id`.
    pub async fn is_session_live(&self, id: &str, now: DateTime<Utc>) -> bool {
        live_lease(&self.state.read().await.contexts, id, now)
    }

    pub async fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.state.read().await.contexts.keys().cloned().collect();
        tenants.sort();
        tenants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(project: Option<&str>, session: Option<&str>) -> ContextUpdate {
        ContextUpdate {
            project: project.map(String::from),
            session: session.map(String::from),
            session_ttl_secs: None,
        }
    }

    #[tokio::test]
    async fn unknown_tenant_has_global_only() {
        let registry = ScopeRegistry::new(60);
        let ctx = registry.get("nobody", Utc::now()).await;
        assert_eq!(ctx, ActiveContext::default());
    }

    #[tokio::test]
    async fn set_is_partial() {
        let registry = ScopeRegistry::new(60);
        let now = Utc::now();
        registry.set("t", update(Some("apollo"), None), now).await.unwrap();
        let ctx = registry.set("t", update(None, Some("s1")), now).await.unwrap();
        assert_eq!(ctx.project.as_deref(), Some("apollo"));
        assert_eq!(ctx.session.as_ref().unwrap().id, "s1");
        assert_eq!(ctx.session.unwrap().expires_at, Some(now + Duration::seconds(60)));
    }

    #[tokio::test]
    async fn invalid_names_rejected() {
        let registry = ScopeRegistry::new(60);
        let err = registry.set("t", update(Some("  "), None), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ScopeError::Invalid(_)));
        assert!(registry.tenants().await.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_is_evicted_lazily() {
        let registry = ScopeRegistry::new(10);
        let now = Utc::now();
        registry.set("t", update(Some("p"), Some("s1")), now).await.unwrap();

        let later = now + Duration::seconds(11);
        let ctx = registry.get("t", later).await;
        assert!(ctx.session.is_none());
        assert_eq!(ctx.project.as_deref(), Some("p"));

        let expired = registry.take_expired(later).await;
        assert_eq!(
            expired,
            vec![ExpiredSession {
                tenant: "t".into(),
                session_id: "s1".into()
            }]
        );
        assert!(registry.take_expired(later).await.is_empty());
    }

    #[tokio::test]
    async fn take_expired_sweeps_untouched_tenants() {
        let registry = ScopeRegistry::new(10);
        let now = Utc::now();
        registry.set("a", update(None, Some("s1")), now).await.unwrap();
        registry.set("b", update(None, Some("s2")), now).await.unwrap();
        let mut forever = update(None, Some("s3"));
        forever.session_ttl_secs = Some(0);
        registry.set("c", forever, now).await.unwrap();

        let expired = registry.take_expired(now + Duration::days(365)).await;
        let mut ids: Vec<String> = expired.into_iter().map(|e| e.session_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn renewed_session_is_not_handed_to_the_sweep() {
        let registry = ScopeRegistry::new(10);
        let now = Utc::now();
        registry.set("t", update(None, Some("s1")), now).await.unwrap();

        let later = now + Duration::seconds(11);
        assert!(registry.get("t", later).await.session.is_none());
        assert!(!registry.is_session_live("s1", later).await);

        registry.set("t", update(None, Some("s1")), later).await.unwrap();
        assert!(registry.is_session_live("s1", later).await);
        assert!(registry.take_expired(later).await.is_empty());
    }

    #[tokio::test]
    async fn shared_session_id_stays_while_any_tenant_holds_it() {
        let registry = ScopeRegistry::new(10);
        let now = Utc::now();
        registry.set("a", update(None, Some("s1")), now).await.unwrap();
        let mut long = update(None, Some("s1"));
        long.session_ttl_secs = Some(3600);
        registry.set("b", long, now).await.unwrap();

        let later = now + Duration::seconds(11);
        assert!(registry.take_expired(later).await.is_empty());
        assert!(registry.get("a", later).await.session.is_none());
        assert_eq!(registry.get("b", later).await.session.unwrap().id, "s1");
        assert!(registry.is_session_live("s1", later).await);

        let expired = registry.take_expired(later + Duration::hours(2)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].tenant, "b");
    }

    #[tokio::test]
    async fn clear_forgets_tenant() {
        let registry = ScopeRegistry::new(60);
        registry.set("t", update(Some("p"), None), Utc::now()).await.unwrap();
        assert!(registry.clear("t").await);
        assert!(!registry.clear("t").await);
        assert_eq!(registry.get("t", Utc::now()).await, ActiveContext::default());
    }
}
