//! Three-way merge kernel
//!
//! Pure reconciliation of a local and a cloud replica of one entity
//! collection, using the snapshot taken at the last reconcile point as the
//! common ancestor. No I/O: wall-clock and the acting user arrive through
//! [`MergeContext`], so running the kernel twice on the same inputs yields
//! bit-for-bit identical output.
//!
//! # Algorithm
//!
//! For each id on either side:
//! 1. Present on one side only -> that side wins.
//! 2. Neither side changed since its sync point -> keep (higher version).
//! 3. Exactly one side changed -> fast-forward to it.
//! 4. Both changed, both deleted -> tombstone survives, version bumped.
//! 5. Both changed, one deleted -> deletion wins; the discarded edit is
//!    recorded as a conflict for user review.
//! 6. Both changed, neither deleted -> per-field merge against the
//!    ancestor: fields edited on one side keep that edit; fields edited
//!    on both sides diverge, default to the cloud value, and emit a
//!    conflict descriptor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::UserId;
use crate::models::{Book, Category, Entry, EntityKind, SyncMeta};

/// Inputs the kernel cannot compute for itself: who is merging and when.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub user: UserId,
    pub now: DateTime<Utc>,
}

/// A field both replicas edited since their common ancestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub entity_kind: EntityKind,
    pub id: String,
    pub field: String,
    pub local_value: Value,
    pub cloud_value: Value,
    pub local_version: u64,
    pub cloud_version: u64,
}

/// Kernel output: the reconciled collection plus every detected conflict.
#[derive(Debug, Clone)]
pub struct MergeOutcome<T> {
    pub merged: Vec<T>,
    pub conflicts: Vec<Conflict>,
}

/// Access to the replication envelope, implemented by every synced entity.
pub trait Versioned {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;
    fn meta(&self) -> &SyncMeta;
    fn meta_mut(&mut self) -> &mut SyncMeta;
}

/// A field that diverged during per-field merge.
pub struct FieldDivergence {
    pub field: &'static str,
    pub local_value: Value,
    pub cloud_value: Value,
}

/// Per-field domain merge. Implementations cover every user-editable
/// scalar; `id`, `user_id`, and `created_at` are taken from either side.
pub trait Mergeable: Sized {
    /// Merge domain fields of `local` and `cloud` against the ancestor.
    /// Returns the merged fields (envelope untouched) and the fields on
    /// which both sides diverged.
    fn merge_fields(local: &Self, cloud: &Self, base: Option<&Self>)
        -> (Self, Vec<FieldDivergence>);
}

/// Resolve one field: agreement wins, a one-sided edit wins, a two-sided
/// divergence defaults to the cloud value and is recorded.
fn pick<T>(
    field: &'static str,
    local: &T,
    cloud: &T,
    base: Option<&T>,
    diverged: &mut Vec<FieldDivergence>,
) -> T
where
    T: PartialEq + Clone + Serialize,
{
    if local == cloud {
        return cloud.clone();
    }
    if let Some(base) = base {
        if local == base {
            return cloud.clone();
        }
        if cloud == base {
            return local.clone();
        }
    }
    diverged.push(FieldDivergence {
        field,
        local_value: serde_json::to_value(local).unwrap_or(Value::Null),
        cloud_value: serde_json::to_value(cloud).unwrap_or(Value::Null),
    });
    cloud.clone()
}

/// Like [`pick`] but the chosen value drags companion fields with it, so a
/// flag and its timestamp (or an amount and its normalization) never split
/// across replicas.
fn pick_side<T: PartialEq>(
    field: &'static str,
    local: &T,
    cloud: &T,
    base: Option<&T>,
    diverged: &mut Vec<FieldDivergence>,
    to_value: impl Fn(&T) -> Value,
) -> Side
where
    T: Clone,
{
    if local == cloud {
        return Side::Cloud;
    }
    if let Some(base) = base {
        if local == base {
            return Side::Cloud;
        }
        if cloud == base {
            return Side::Local;
        }
    }
    diverged.push(FieldDivergence {
        field,
        local_value: to_value(local),
        cloud_value: to_value(cloud),
    });
    Side::Cloud
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Cloud,
}

impl Mergeable for Book {
    fn merge_fields(local: &Self, cloud: &Self, base: Option<&Self>)
        -> (Self, Vec<FieldDivergence>) {
        let mut diverged = Vec::new();
        let mut merged = cloud.clone();

        merged.name = pick(
            "name",
            &local.name,
            &cloud.name,
            base.map(|b| &b.name),
            &mut diverged,
        );
        merged.description = pick(
            "description",
            &local.description,
            &cloud.description,
            base.map(|b| &b.description),
            &mut diverged,
        );

        // The locked rate travels with its lock time and target currency.
        match pick_side(
            "locked_exchange_rate",
            &local.locked_exchange_rate,
            &cloud.locked_exchange_rate,
            base.map(|b| &b.locked_exchange_rate),
            &mut diverged,
            |r| serde_json::to_value(r).unwrap_or(Value::Null),
        ) {
            Side::Local => {
                merged.locked_exchange_rate = local.locked_exchange_rate;
                merged.rate_locked_at = local.rate_locked_at;
                merged.target_currency = local.target_currency.clone();
            }
            Side::Cloud => {}
        }

        // Same for the archive flag and its timestamp.
        match pick_side(
            "archived",
            &local.archived,
            &cloud.archived,
            base.map(|b| &b.archived),
            &mut diverged,
            |a| Value::Bool(*a),
        ) {
            Side::Local => {
                merged.archived = local.archived;
                merged.archived_at = local.archived_at;
            }
            Side::Cloud => {}
        }

        (merged, diverged)
    }
}

impl Mergeable for Entry {
    fn merge_fields(local: &Self, cloud: &Self, base: Option<&Self>)
        -> (Self, Vec<FieldDivergence>) {
        let mut diverged = Vec::new();
        let mut merged = cloud.clone();

        // The amount carries its normalization: whichever side's amount
        // wins also supplies normalized_amount and the rate used.
        match pick_side(
            "amount",
            &local.amount,
            &cloud.amount,
            base.map(|b| &b.amount),
            &mut diverged,
            |a| serde_json::to_value(a).unwrap_or(Value::Null),
        ) {
            Side::Local => {
                merged.amount = local.amount;
                merged.normalized_amount = local.normalized_amount;
                merged.normalized_currency = local.normalized_currency.clone();
                merged.conversion_rate = local.conversion_rate;
            }
            Side::Cloud => {}
        }

        // A move rewrote book_id and currency together.
        match pick_side(
            "book_id",
            &local.book_id,
            &cloud.book_id,
            base.map(|b| &b.book_id),
            &mut diverged,
            |b| Value::String(b.to_string()),
        ) {
            Side::Local => {
                merged.book_id = local.book_id.clone();
                merged.currency = local.currency.clone();
            }
            Side::Cloud => {}
        }

        merged.category = pick(
            "category",
            &local.category,
            &cloud.category,
            base.map(|b| &b.category),
            &mut diverged,
        );
        merged.party = pick(
            "party",
            &local.party,
            &cloud.party,
            base.map(|b| &b.party),
            &mut diverged,
        );
        merged.payment_mode = pick(
            "payment_mode",
            &local.payment_mode,
            &cloud.payment_mode,
            base.map(|b| &b.payment_mode),
            &mut diverged,
        );
        merged.date = pick(
            "date",
            &local.date,
            &cloud.date,
            base.map(|b| &b.date),
            &mut diverged,
        );
        merged.remarks = pick(
            "remarks",
            &local.remarks,
            &cloud.remarks,
            base.map(|b| &b.remarks),
            &mut diverged,
        );

        (merged, diverged)
    }
}

impl Mergeable for Category {
    fn merge_fields(local: &Self, cloud: &Self, base: Option<&Self>)
        -> (Self, Vec<FieldDivergence>) {
        let mut diverged = Vec::new();
        let mut merged = cloud.clone();

        merged.name = pick(
            "name",
            &local.name,
            &cloud.name,
            base.map(|b| &b.name),
            &mut diverged,
        );
        merged.description = pick(
            "description",
            &local.description,
            &cloud.description,
            base.map(|b| &b.description),
            &mut diverged,
        );
        merged.color = pick(
            "color",
            &local.color,
            &cloud.color,
            base.map(|b| &b.color),
            &mut diverged,
        );
        merged.icon = pick(
            "icon",
            &local.icon,
            &cloud.icon,
            base.map(|b| &b.icon),
            &mut diverged,
        );

        (merged, diverged)
    }
}

impl Versioned for Book {
    const KIND: EntityKind = EntityKind::Book;

    fn entity_id(&self) -> &str {
        self.id.as_str()
    }
    fn meta(&self) -> &SyncMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

impl Versioned for Entry {
    const KIND: EntityKind = EntityKind::Entry;

    fn entity_id(&self) -> &str {
        self.id.as_str()
    }
    fn meta(&self) -> &SyncMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

impl Versioned for Category {
    const KIND: EntityKind = EntityKind::Category;

    fn entity_id(&self) -> &str {
        self.id.as_str()
    }
    fn meta(&self) -> &SyncMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

/// Merge one collection. `base` is the snapshot captured at the last
/// reconcile point; entities missing from it fall back to cloud-wins
/// resolution on every diverging field.
pub fn merge_collection<T>(
    local: &[T],
    cloud: &[T],
    base: &[T],
    ctx: &MergeContext,
) -> MergeOutcome<T>
where
    T: Versioned + Mergeable + Clone,
{
    let local_by_id: BTreeMap<&str, &T> = local.iter().map(|e| (e.entity_id(), e)).collect();
    let cloud_by_id: BTreeMap<&str, &T> = cloud.iter().map(|e| (e.entity_id(), e)).collect();
    let base_by_id: BTreeMap<&str, &T> = base.iter().map(|e| (e.entity_id(), e)).collect();

    let mut ids: Vec<&str> = local_by_id.keys().copied().collect();
    for id in cloud_by_id.keys() {
        if !local_by_id.contains_key(id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();

    let mut merged = Vec::with_capacity(ids.len());
    let mut conflicts = Vec::new();

    for id in ids {
        match (local_by_id.get(id), cloud_by_id.get(id)) {
            (Some(l), None) => merged.push((*l).clone()),
            (None, Some(r)) => {
                let mut item = (*r).clone();
                item.meta_mut().last_synced_version = r.meta().version;
                merged.push(item);
            }
            (Some(l), Some(r)) => {
                let item = merge_pair(*l, *r, base_by_id.get(id).copied(), ctx, &mut conflicts);
                merged.push(item);
            }
            (None, None) => unreachable!("id came from one of the two maps"),
        }
    }

    MergeOutcome { merged, conflicts }
}

fn merge_pair<T>(
    local: &T,
    cloud: &T,
    base: Option<&T>,
    ctx: &MergeContext,
    conflicts: &mut Vec<Conflict>,
) -> T
where
    T: Versioned + Mergeable + Clone,
{
    let lm = local.meta();
    let rm = cloud.meta();
    let local_changed = lm.version > lm.last_synced_version;
    let cloud_changed = rm.version > rm.last_synced_version;

    match (local_changed, cloud_changed) {
        (false, false) => {
            // Identical histories; keep whichever carries the higher
            // version so a replayed merge can never regress.
            let mut item = if rm.version > lm.version {
                cloud.clone()
            } else {
                local.clone()
            };
            item.meta_mut().last_synced_version = rm.version;
            item
        }
        (false, true) => {
            // Fast-forward to the cloud.
            let mut item = cloud.clone();
            item.meta_mut().last_synced_version = rm.version;
            item
        }
        (true, false) => {
            // Keep the local edit; the push step will overwrite the cloud.
            // The recorded ancestor can never exceed the kept version.
            let mut item = local.clone();
            item.meta_mut().last_synced_version = rm.version.min(lm.version);
            item
        }
        (true, true) => merge_concurrent(local, cloud, base, ctx, conflicts),
    }
}

fn merge_concurrent<T>(
    local: &T,
    cloud: &T,
    base: Option<&T>,
    ctx: &MergeContext,
    conflicts: &mut Vec<Conflict>,
) -> T
where
    T: Versioned + Mergeable + Clone,
{
    let lm = local.meta();
    let rm = cloud.meta();
    let merged_version = lm.version.max(rm.version) + 1;

    match (lm.deleted, rm.deleted) {
        (true, true) => {
            // Both sides buried it; the tombstone survives.
            let mut item = cloud.clone();
            finish_meta(item.meta_mut(), merged_version, rm.version, ctx);
            item
        }
        (true, false) | (false, true) => {
            // Delete-edit conflict: deletion wins, the edit is discarded
            // and surfaced for user review.
            conflicts.push(Conflict {
                entity_kind: T::KIND,
                id: local.entity_id().to_string(),
                field: "deleted".to_string(),
                local_value: Value::Bool(lm.deleted),
                cloud_value: Value::Bool(rm.deleted),
                local_version: lm.version,
                cloud_version: rm.version,
            });
            let survivor = if lm.deleted { local } else { cloud };
            let mut item = survivor.clone();
            finish_meta(item.meta_mut(), merged_version, rm.version, ctx);
            item.meta_mut().deleted = true;
            if item.meta().deleted_at.is_none() {
                item.meta_mut().deleted_at = Some(ctx.now);
            }
            item
        }
        (false, false) => {
            let (mut item, diverged) = T::merge_fields(local, cloud, base);
            for d in diverged {
                conflicts.push(Conflict {
                    entity_kind: T::KIND,
                    id: local.entity_id().to_string(),
                    field: d.field.to_string(),
                    local_value: d.local_value,
                    cloud_value: d.cloud_value,
                    local_version: lm.version,
                    cloud_version: rm.version,
                });
            }
            // Envelope: id/user_id/created_at must match; keep local's.
            *item.meta_mut() = lm.clone();
            finish_meta(item.meta_mut(), merged_version, rm.version, ctx);
            item.meta_mut().deleted = false;
            item.meta_mut().deleted_at = None;
            item
        }
    }
}

fn finish_meta(meta: &mut SyncMeta, version: u64, cloud_version: u64, ctx: &MergeContext) {
    meta.version = version;
    meta.last_synced_version = cloud_version;
    meta.updated_at = ctx.now;
    meta.last_modified_by = ctx.user.clone();
}
