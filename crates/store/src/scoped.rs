//! Generic tenant-scoped collection.
//!
//! Every read is filtered to the context tenant, every insert is stamped
//! with it, and every mutation re-checks row ownership before applying.
//! The only way around the filter is the explicit operator read API, which
//! requires the SuperAdmin bypass flag and annotates each row with its
//! effective tenant.

use crewhq_core::context::TenantContext;
use crewhq_core::error::{PlatformError, PlatformResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

/// Implemented by every row type owned by exactly one tenant.
pub trait TenantScoped: Clone {
    fn key(&self) -> Uuid;
    fn tenant_id(&self) -> &str;
    /// Set the owning tenant. Called only by the insert stamp.
    fn stamp_tenant(&mut self, tenant_id: &str);
}

/// A row returned from an operator cross-tenant read, annotated with the
/// tenant that owns it.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorRow<T> {
    pub effective_tenant_id: String,
    pub row: T,
}

/// DashMap-backed collection of one tenant-scoped row type.
pub struct ScopedCollection<T: TenantScoped> {
    name: &'static str,
    rows: DashMap<Uuid, T>,
    /// Serializes multi-row saves so validation and apply are atomic.
    commit_lock: Mutex<()>,
}

impl<T: TenantScoped> ScopedCollection<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: DashMap::new(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Insert a row, stamping `tenant_id` from the context. A caller-supplied
    /// tenant id is overridden, never trusted.
    pub fn insert(&self, ctx: &TenantContext, mut row: T) -> T {
        if row.tenant_id() != ctx.tenant_id && !row.tenant_id().is_empty() {
            warn!(
                collection = self.name,
                supplied = %row.tenant_id(),
                context = %ctx.tenant_id,
                "Overriding caller-supplied tenant id on insert"
            );
        }
        row.stamp_tenant(&ctx.tenant_id);
        self.rows.insert(row.key(), row.clone());
        row
    }

    /// Fetch a row by key. A row owned by another tenant is indistinguishable
    /// from a missing one.
    pub fn get(&self, ctx: &TenantContext, id: Uuid) -> PlatformResult<T> {
        self.try_get(ctx, id)
            .ok_or_else(|| PlatformError::NotFound(format!("{} {id}", self.name)))
    }

    pub fn try_get(&self, ctx: &TenantContext, id: Uuid) -> Option<T> {
        self.rows
            .get(&id)
            .filter(|e| e.value().tenant_id() == ctx.tenant_id)
            .map(|e| e.value().clone())
    }

    /// List the context tenant's rows.
    pub fn list(&self, ctx: &TenantContext) -> Vec<T> {
        self.rows
            .iter()
            .filter(|e| e.value().tenant_id() == ctx.tenant_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn count(&self, ctx: &TenantContext) -> usize {
        self.rows
            .iter()
            .filter(|e| e.value().tenant_id() == ctx.tenant_id)
            .count()
    }

    pub fn count_for_tenant(&self, tenant_id: &str) -> usize {
        self.rows
            .iter()
            .filter(|e| e.value().tenant_id() == tenant_id)
            .count()
    }

    /// Apply a mutation to an owned row. Fails with `CrossTenantAccess` when
    /// the row belongs to another tenant (unless the caller is SuperAdmin)
    /// and with `ImmutableField` when the mutation touched `tenant_id`,
    /// regardless of role. Nothing is written on failure.
    pub fn update<F>(&self, ctx: &TenantContext, id: Uuid, mutate: F) -> PlatformResult<T>
    where
        F: FnOnce(&mut T),
    {
        let mut entry = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| PlatformError::NotFound(format!("{} {id}", self.name)))?;

        let current = entry.value();
        if current.tenant_id() != ctx.tenant_id && !ctx.is_super_admin() {
            warn!(
                collection = self.name,
                row_tenant = %current.tenant_id(),
                context = %ctx.tenant_id,
                "Cross-tenant update refused"
            );
            return Err(PlatformError::CrossTenantAccess);
        }

        let mut staged = current.clone();
        mutate(&mut staged);
        if staged.tenant_id() != current.tenant_id() {
            return Err(PlatformError::ImmutableField("tenant_id"));
        }
        *entry.value_mut() = staged.clone();
        Ok(staged)
    }

    /// Delete an owned row. Same ownership rules as `update`.
    pub fn delete(&self, ctx: &TenantContext, id: Uuid) -> PlatformResult<()> {
        let owner = self
            .rows
            .get(&id)
            .map(|e| e.value().tenant_id().to_string())
            .ok_or_else(|| PlatformError::NotFound(format!("{} {id}", self.name)))?;
        if owner != ctx.tenant_id && !ctx.is_super_admin() {
            return Err(PlatformError::CrossTenantAccess);
        }
        self.rows.remove(&id);
        Ok(())
    }

    /// Save a batch of changed rows atomically: every row is validated
    /// (ownership, tenant id unchanged, new rows stamped) before any row is
    /// written. A single bad row rejects the whole batch.
    pub fn save_many(&self, ctx: &TenantContext, rows: Vec<T>) -> PlatformResult<Vec<T>> {
        let _commit = self.commit_lock.lock();

        let mut staged = Vec::with_capacity(rows.len());
        for mut row in rows {
            match self.rows.get(&row.key()) {
                Some(existing) => {
                    if existing.value().tenant_id() != ctx.tenant_id && !ctx.is_super_admin() {
                        return Err(PlatformError::CrossTenantAccess);
                    }
                    if row.tenant_id() != existing.value().tenant_id() {
                        return Err(PlatformError::ImmutableField("tenant_id"));
                    }
                }
                None => row.stamp_tenant(&ctx.tenant_id),
            }
            staged.push(row);
        }

        for row in &staged {
            self.rows.insert(row.key(), row.clone());
        }
        Ok(staged)
    }

    /// Operator escape hatch: read across tenants. Requires the SuperAdmin
    /// bypass flag; `tenant_filter` of `""` means all tenants. Rows come back
    /// annotated with their owning tenant.
    pub fn list_for_operator(
        &self,
        ctx: &TenantContext,
        tenant_filter: &str,
    ) -> PlatformResult<Vec<OperatorRow<T>>> {
        if !ctx.bypass_filter {
            return Err(PlatformError::PermissionDenied(
                "cross-tenant read requires SuperAdmin".into(),
            ));
        }
        Ok(self
            .rows
            .iter()
            .filter(|e| tenant_filter.is_empty() || e.value().tenant_id() == tenant_filter)
            .map(|e| OperatorRow {
                effective_tenant_id: e.value().tenant_id().to_string(),
                row: e.value().clone(),
            })
            .collect())
    }

    /// Remove every row owned by a tenant. Used by the deletion sweep.
    pub fn purge_tenant(&self, tenant_id: &str) -> usize {
        let keys: Vec<Uuid> = self
            .rows
            .iter()
            .filter(|e| e.value().tenant_id() == tenant_id)
            .map(|e| *e.key())
            .collect();
        for key in &keys {
            self.rows.remove(key);
        }
        keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewhq_core::context::{ResolutionSource, ROLE_SUPER_ADMIN};

    #[derive(Debug, Clone)]
    struct Note {
        id: Uuid,
        tenant_id: String,
        text: String,
    }

    impl TenantScoped for Note {
        fn key(&self) -> Uuid {
            self.id
        }
        fn tenant_id(&self) -> &str {
            &self.tenant_id
        }
        fn stamp_tenant(&mut self, tenant_id: &str) {
            self.tenant_id = tenant_id.to_string();
        }
    }

    fn note(text: &str) -> Note {
        Note {
            id: Uuid::new_v4(),
            tenant_id: String::new(),
            text: text.into(),
        }
    }

    fn ctx(tenant: &str) -> TenantContext {
        TenantContext::for_tenant(tenant, ResolutionSource::Claims)
    }

    fn super_admin() -> TenantContext {
        TenantContext::platform().with_actor(Uuid::new_v4(), "ops@crewhq.io", ROLE_SUPER_ADMIN)
    }

    #[test]
    fn test_insert_stamps_tenant() {
        let notes = ScopedCollection::new("notes");
        let mut row = note("hello");
        // Caller-supplied tenant id is overridden.
        row.tenant_id = "9".into();
        let saved = notes.insert(&ctx("1"), row);
        assert_eq!(saved.tenant_id, "1");
    }

    #[test]
    fn test_isolation_between_two_contexts() {
        let notes = ScopedCollection::new("notes");
        let a = ctx("1");
        let b = ctx("2");

        let row = notes.insert(&a, note("tenant 1 only"));
        let other = notes.insert(&b, note("tenant 2 only"));

        // Neither context observes the other's rows, even by primary key.
        assert_eq!(notes.list(&a).len(), 1);
        assert_eq!(notes.list(&b).len(), 1);
        assert!(notes.try_get(&b, row.id).is_none());
        assert!(matches!(
            notes.get(&b, row.id).unwrap_err(),
            PlatformError::NotFound(_)
        ));

        // Neither context can update or delete the other's rows.
        assert!(matches!(
            notes.update(&b, row.id, |n| n.text = "stolen".into()),
            Err(PlatformError::CrossTenantAccess)
        ));
        assert!(matches!(
            notes.delete(&a, other.id),
            Err(PlatformError::CrossTenantAccess)
        ));
        assert_eq!(notes.get(&a, row.id).unwrap().text, "tenant 1 only");
    }

    #[test]
    fn test_tenant_id_is_immutable() {
        let notes = ScopedCollection::new("notes");
        let a = ctx("1");
        let row = notes.insert(&a, note("pinned"));

        let err = notes
            .update(&a, row.id, |n| n.tenant_id = "2".into())
            .unwrap_err();
        assert!(matches!(err, PlatformError::ImmutableField("tenant_id")));

        // Even SuperAdmin cannot reassign ownership.
        let err = notes
            .update(&super_admin(), row.id, |n| n.tenant_id = "2".into())
            .unwrap_err();
        assert!(matches!(err, PlatformError::ImmutableField("tenant_id")));
        assert_eq!(notes.get(&a, row.id).unwrap().tenant_id, "1");
    }

    #[test]
    fn test_save_many_rejects_whole_batch() {
        let notes = ScopedCollection::new("notes");
        let a = ctx("1");
        let existing = notes.insert(&a, note("keep me"));
        let foreign = notes.insert(&ctx("2"), note("not yours"));

        let mut good = existing.clone();
        good.text = "edited".into();
        let mut bad = foreign.clone();
        bad.text = "hijacked".into();

        let err = notes.save_many(&a, vec![good, bad]).unwrap_err();
        assert!(matches!(err, PlatformError::CrossTenantAccess));
        // First row must not have been applied.
        assert_eq!(notes.get(&a, existing.id).unwrap().text, "keep me");
    }

    #[test]
    fn test_operator_reads_annotated() {
        let notes = ScopedCollection::new("notes");
        notes.insert(&ctx("1"), note("a"));
        notes.insert(&ctx("2"), note("b"));

        // Plain tenant context cannot opt out of the filter.
        assert!(notes.list_for_operator(&ctx("1"), "").is_err());

        let all = notes.list_for_operator(&super_admin(), "").unwrap();
        assert_eq!(all.len(), 2);
        let one = notes.list_for_operator(&super_admin(), "2").unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].effective_tenant_id, "2");
    }

    #[test]
    fn test_purge_tenant() {
        let notes = ScopedCollection::new("notes");
        notes.insert(&ctx("1"), note("a"));
        notes.insert(&ctx("1"), note("b"));
        notes.insert(&ctx("2"), note("c"));

        assert_eq!(notes.purge_tenant("1"), 2);
        assert_eq!(notes.count_for_tenant("1"), 0);
        assert_eq!(notes.count_for_tenant("2"), 1);
    }
}
