//! Category operations
//!
//! The system category "Others" (owned by the "default" user) is created
//! lazily on first read and can never be deleted; it is the classifier's
//! fallback and the guaranteed-valid target for every entry.

use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::ids::{CategoryId, UserId};
use crate::models::{Category, CategoryPatch, EntityKind, SyncMeta, OTHERS_CATEGORY_NAME};

use super::{ChangeOp, LedgerStore, State};

impl LedgerStore {
    pub fn create_category(
        &self,
        name: &str,
        description: &str,
        color: &str,
        icon: &str,
    ) -> Result<Category> {
        if name.trim().is_empty() {
            return Err(Error::Validation("category name must not be empty".into()));
        }

        let now = self.now();
        let category = Category {
            id: CategoryId::generate(),
            meta: SyncMeta::new(self.user(), now),
            name: name.trim().to_string(),
            description: description.to_string(),
            color: color.to_string(),
            icon: icon.to_string(),
        };

        let mut state = self.write();
        state
            .categories
            .insert(category.id.to_string(), category.clone());
        if let Err(e) = self.persist_categories(&state) {
            state.categories.remove(category.id.as_str());
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("categories");
        self.notify(EntityKind::Category, ChangeOp::Created, category.id.as_str());
        Ok(category)
    }

    pub fn update_category(&self, id: &CategoryId, patch: CategoryPatch) -> Result<Category> {
        let mut state = self.write();
        let category = state
            .categories
            .get(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("category {}", id)))?;
        if category.meta.deleted {
            return Err(Error::Validation(format!("category {} is deleted", id)));
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::Validation("category name must not be empty".into()));
        }

        let previous = category.clone();
        let now = self.now();
        let user = self.user().clone();
        let category = state
            .categories
            .get_mut(id.as_str())
            .expect("checked above");
        if let Some(name) = patch.name {
            category.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            category.description = description;
        }
        if let Some(color) = patch.color {
            category.color = color;
        }
        if let Some(icon) = patch.icon {
            category.icon = icon;
        }
        category.meta.touch(&user, now);
        let updated = category.clone();

        if let Err(e) = self.persist_categories(&state) {
            state.categories.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("categories");
        self.notify(EntityKind::Category, ChangeOp::Updated, id.as_str());
        Ok(updated)
    }

    /// Tombstone a category. Deleting the default "Others" always fails.
    pub fn delete_category(&self, id: &CategoryId) -> Result<()> {
        let mut state = self.write();
        let category = state
            .categories
            .get(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("category {}", id)))?;
        if category.is_default_others() {
            return Err(Error::Validation(
                "the default \"Others\" category cannot be deleted".into(),
            ));
        }
        if category.meta.deleted {
            return Ok(());
        }
        let previous = category.clone();
        let now = self.now();
        let user = self.user().clone();

        let category = state
            .categories
            .get_mut(id.as_str())
            .expect("checked above");
        category.meta.bury(&user, now);

        if let Err(e) = self.persist_categories(&state) {
            state.categories.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(state);

        self.cache.invalidate("categories");
        self.notify(EntityKind::Category, ChangeOp::Deleted, id.as_str());
        info!(category = %id, "Deleted category");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read views
    // ------------------------------------------------------------------

    /// Live categories, the default "Others" guaranteed present.
    pub fn live_categories(&self) -> Vec<Category> {
        self.ensure_default_category();

        let cache_key = format!("categories:userId:{}", self.user());
        if let Some(value) = self.cache.get(&cache_key) {
            if let Ok(categories) = serde_json::from_value::<Vec<Category>>(value) {
                return categories;
            }
        }

        let categories: Vec<Category> = self
            .read()
            .categories
            .values()
            .filter(|c| !c.meta.deleted)
            .cloned()
            .collect();
        self.cache.put(&cache_key, json!(categories));
        categories
    }

    /// Everything, tombstones included (sync path).
    pub fn all_categories(&self) -> Vec<Category> {
        self.ensure_default_category();
        self.read().categories.values().cloned().collect()
    }

    /// A live category by id.
    pub fn category(&self, id: &CategoryId) -> Option<Category> {
        self.read()
            .categories
            .get(id.as_str())
            .filter(|c| !c.meta.deleted)
            .cloned()
    }

    /// The default "Others", creating it if this is the first read.
    pub fn others_category(&self) -> Category {
        self.ensure_default_category();
        self.read()
            .categories
            .values()
            .find(|c| c.is_default_others())
            .cloned()
            .expect("ensured above")
    }

    fn ensure_default_category(&self) {
        {
            let state = self.read();
            if state.categories.values().any(|c| c.is_default_others()) {
                return;
            }
        }

        let now = self.now();
        let others = Category {
            id: CategoryId::generate(),
            meta: SyncMeta::new(&UserId::default_owner(), now),
            name: OTHERS_CATEGORY_NAME.to_string(),
            description: "Everything that fits nowhere else".to_string(),
            color: "#9e9e9e".to_string(),
            icon: "more_horiz".to_string(),
        };

        let mut state = self.write();
        // Lost the race to another reader.
        if state.categories.values().any(|c| c.is_default_others()) {
            return;
        }
        state
            .categories
            .insert(others.id.to_string(), others.clone());
        if let Err(e) = self.persist_categories(&state) {
            state.categories.remove(others.id.as_str());
            tracing::warn!(error = %e, "Could not persist default category");
            return;
        }
        drop(state);

        self.cache.invalidate("categories");
        self.notify(EntityKind::Category, ChangeOp::Created, others.id.as_str());
        info!("Created default \"Others\" category");
    }

    pub(crate) fn require_live_category(&self, state: &State, id: &CategoryId) -> Result<()> {
        match state.categories.get(id.as_str()) {
            Some(c) if !c.meta.deleted => Ok(()),
            Some(_) => Err(Error::Validation(format!("category {} is deleted", id))),
            None => Err(Error::Validation(format!("category {} does not exist", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::store;
    use super::*;

    #[test]
    fn others_is_created_on_first_read() {
        let s = store();
        let categories = s.live_categories();
        assert_eq!(categories.len(), 1);
        assert!(categories[0].is_default_others());
        assert_eq!(categories[0].meta.user_id, UserId::default_owner());
    }

    #[test]
    fn others_is_created_once() {
        let s = store();
        let first = s.others_category();
        let second = s.others_category();
        assert_eq!(first.id, second.id);
        assert_eq!(
            s.live_categories()
                .iter()
                .filter(|c| c.is_default_others())
                .count(),
            1
        );
    }

    #[test]
    fn others_cannot_be_deleted() {
        let s = store();
        let others = s.others_category();
        let err = s.delete_category(&others.id).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(s.category(&others.id).is_some());
    }

    #[test]
    fn user_category_crud() {
        let s = store();
        let cat = s
            .create_category("Food", "Meals and snacks", "#ff7043", "restaurant")
            .unwrap();
        assert_eq!(cat.meta.version, 1);

        let updated = s
            .update_category(
                &cat.id,
                CategoryPatch {
                    description: Some("Meals, snacks, delivery".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.meta.version, 2);

        s.delete_category(&cat.id).unwrap();
        assert!(s.category(&cat.id).is_none());
        // Tombstone retained for sync.
        assert!(s
            .all_categories()
            .iter()
            .any(|c| c.id == cat.id && c.meta.deleted));
    }

    #[test]
    fn empty_name_is_rejected() {
        let s = store();
        assert!(matches!(
            s.create_category("  ", "", "", ""),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn a_users_own_others_named_category_is_deletable() {
        let s = store();
        let cat = s.create_category("Others", "my own bucket", "", "").unwrap();
        // Same name, but owned by the user, not the "default" owner.
        s.delete_category(&cat.id).unwrap();
        assert!(s.category(&cat.id).is_none());
    }
}
