//! User and social identity storage
//!
//! The built-in pipeline steps only talk to storage through [`UserStorage`];
//! applications plug in their own persistence by implementing it.

use crate::models::{SocialIdentity, UserRecord};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persistence collaborator for users and their provider associations
///
/// Implementations are responsible for their own locking.
pub trait UserStorage: Send + Sync {
    /// # Errors
    /// Returns an error if the storage backend fails
    fn user_exists(&self, username: &str) -> Result<bool, StorageError>;

    /// # Errors
    /// Returns [`StorageError::Conflict`] if the username is taken
    fn create_user(&self, username: &str, email: Option<&str>) -> Result<UserRecord, StorageError>;

    /// # Errors
    /// Returns an error if the storage backend fails
    fn get_user(&self, id: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Association for `uid` at `provider`, if any
    ///
    /// # Errors
    /// Returns an error if the storage backend fails
    fn get_social_auth(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<SocialIdentity>, StorageError>;

    /// Associations of `user`, optionally narrowed to one provider or one id
    ///
    /// # Errors
    /// Returns an error if the storage backend fails
    fn get_social_auth_for_user(
        &self,
        user: &UserRecord,
        provider: Option<&str>,
        association_id: Option<Uuid>,
    ) -> Result<Vec<SocialIdentity>, StorageError>;

    /// # Errors
    /// Returns [`StorageError::Conflict`] if the identity is already linked
    fn create_social_auth(
        &self,
        user: &UserRecord,
        uid: &str,
        provider: &str,
    ) -> Result<SocialIdentity, StorageError>;

    /// Merge `extra` into the association's extra data
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the association does not exist
    fn set_extra_data(
        &self,
        association_id: Uuid,
        extra: Map<String, Value>,
    ) -> Result<SocialIdentity, StorageError>;

    /// # Errors
    /// Returns an error if the storage backend fails
    fn disconnect(&self, entry: &SocialIdentity) -> Result<(), StorageError>;

    /// Whether removing the association(s) still leaves the user a way to log in
    ///
    /// With `association_id` only that association is being removed, otherwise
    /// every association with `provider`. A usable password always counts.
    ///
    /// # Errors
    /// Returns an error if the storage backend fails
    fn allowed_to_disconnect(
        &self,
        user: &UserRecord,
        provider: &str,
        association_id: Option<Uuid>,
    ) -> Result<bool, StorageError> {
        if user.has_usable_password {
            return Ok(true);
        }
        let remaining = self
            .get_social_auth_for_user(user, None, None)?
            .into_iter()
            .filter(|social| match association_id {
                Some(id) => social.id != id,
                None => social.provider != provider,
            })
            .count();
        Ok(remaining > 0)
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, UserRecord>,
    identities: HashMap<Uuid, SocialIdentity>,
}

/// Process-local [`UserStorage`]
#[derive(Debug, Default)]
pub struct InMemoryUserStorage {
    tables: RwLock<Tables>,
}

impl InMemoryUserStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .len()
    }

    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identities
            .len()
    }
}

impl UserStorage for InMemoryUserStorage {
    fn user_exists(&self, username: &str) -> Result<bool, StorageError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.users.values().any(|user| user.username == username))
    }

    fn create_user(&self, username: &str, email: Option<&str>) -> Result<UserRecord, StorageError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.users.values().any(|user| user.username == username) {
            return Err(StorageError::Conflict(format!(
                "username '{username}' is taken"
            )));
        }
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.map(ToString::to_string),
            is_active: true,
            has_usable_password: false,
        };
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    fn get_user(&self, id: &str) -> Result<Option<UserRecord>, StorageError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.users.get(id).cloned())
    }

    fn get_social_auth(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<SocialIdentity>, StorageError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .identities
            .values()
            .find(|social| social.provider == provider && social.uid == uid)
            .cloned())
    }

    fn get_social_auth_for_user(
        &self,
        user: &UserRecord,
        provider: Option<&str>,
        association_id: Option<Uuid>,
    ) -> Result<Vec<SocialIdentity>, StorageError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<SocialIdentity> = tables
            .identities
            .values()
            .filter(|social| social.user_id == user.id)
            .filter(|social| provider.map_or(true, |name| social.provider == name))
            .filter(|social| association_id.map_or(true, |id| social.id == id))
            .cloned()
            .collect();
        found.sort_by_key(|social| social.created_at);
        Ok(found)
    }

    fn create_social_auth(
        &self,
        user: &UserRecord,
        uid: &str,
        provider: &str,
    ) -> Result<SocialIdentity, StorageError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables
            .identities
            .values()
            .any(|social| social.provider == provider && social.uid == uid)
        {
            return Err(StorageError::Conflict(format!(
                "{provider} identity '{uid}' is already linked"
            )));
        }
        let social = SocialIdentity::new(user, provider, uid);
        tables.identities.insert(social.id, social.clone());
        Ok(social)
    }

    fn set_extra_data(
        &self,
        association_id: Uuid,
        extra: Map<String, Value>,
    ) -> Result<SocialIdentity, StorageError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let social = tables
            .identities
            .get_mut(&association_id)
            .ok_or_else(|| StorageError::NotFound(format!("association {association_id}")))?;
        social.extra_data.extend(extra);
        social.updated_at = chrono::Utc::now();
        Ok(social.clone())
    }

    fn disconnect(&self, entry: &SocialIdentity) -> Result<(), StorageError> {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .identities
            .remove(&entry.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_user_rejects_duplicate_username() {
        let storage = InMemoryUserStorage::new();
        storage.create_user("alice", Some("alice@example.com")).unwrap();

        assert!(storage.user_exists("alice").unwrap());
        assert!(matches!(
            storage.create_user("alice", None),
            Err(StorageError::Conflict(_))
        ));
        assert_eq!(storage.user_count(), 1);
    }

    #[test]
    fn test_social_auth_lookup_and_extra_data() {
        let storage = InMemoryUserStorage::new();
        let user = storage.create_user("bob", None).unwrap();
        let social = storage.create_social_auth(&user, "42", "github").unwrap();

        let found = storage.get_social_auth("github", "42").unwrap().unwrap();
        assert_eq!(found.user_id, user.id);
        assert!(storage.get_social_auth("gitlab", "42").unwrap().is_none());

        let mut extra = Map::new();
        extra.insert("access_token".to_string(), json!("t0k3n"));
        let updated = storage.set_extra_data(social.id, extra).unwrap();
        assert_eq!(updated.extra_data["access_token"], json!("t0k3n"));
    }

    #[test]
    fn test_identity_cannot_be_linked_twice() {
        let storage = InMemoryUserStorage::new();
        let first = storage.create_user("carol", None).unwrap();
        let second = storage.create_user("dan", None).unwrap();
        storage.create_social_auth(&first, "7", "github").unwrap();

        assert!(matches!(
            storage.create_social_auth(&second, "7", "github"),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn test_allowed_to_disconnect() {
        let storage = InMemoryUserStorage::new();
        let mut user = storage.create_user("erin", None).unwrap();
        let github = storage.create_social_auth(&user, "1", "github").unwrap();

        // Only login method left
        assert!(!storage.allowed_to_disconnect(&user, "github", None).unwrap());

        storage.create_social_auth(&user, "2", "gitlab").unwrap();
        assert!(storage.allowed_to_disconnect(&user, "github", None).unwrap());
        assert!(storage
            .allowed_to_disconnect(&user, "github", Some(github.id))
            .unwrap());

        storage.disconnect(&github).unwrap();
        assert!(!storage.allowed_to_disconnect(&user, "gitlab", None).unwrap());

        user.has_usable_password = true;
        assert!(storage.allowed_to_disconnect(&user, "gitlab", None).unwrap());
    }

    #[test]
    fn test_get_social_auth_for_user_filters() {
        let storage = InMemoryUserStorage::new();
        let user = storage.create_user("frank", None).unwrap();
        let github = storage.create_social_auth(&user, "1", "github").unwrap();
        storage.create_social_auth(&user, "2", "gitlab").unwrap();

        assert_eq!(storage.get_social_auth_for_user(&user, None, None).unwrap().len(), 2);
        let only_github = storage
            .get_social_auth_for_user(&user, Some("github"), None)
            .unwrap();
        assert_eq!(only_github, vec![github.clone()]);
        let by_id = storage
            .get_social_auth_for_user(&user, None, Some(github.id))
            .unwrap();
        assert_eq!(by_id.len(), 1);
    }
}
