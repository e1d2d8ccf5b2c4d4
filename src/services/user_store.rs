//! Credential store and account provisioning.
//!
//! Accounts live in process memory (persistence engine internals are outside
//! this layer's contract); the operations mirror the identity lifecycle:
//! create, password change, role assignment, soft-disable. Accounts are never
//! deleted in place so audit events always reference a real user id.

use crate::error::AppError;
use crate::models::{Role, User};
use crate::security::password;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserStore {
    users: Arc<DashMap<Uuid, User>>,
    by_username: Arc<DashMap<String, Uuid>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            by_username: Arc::new(DashMap::new()),
        }
    }

    /// Provision a new account with an Argon2id-hashed password.
    pub fn create(
        &self,
        username: &str,
        plaintext_password: &str,
        roles: Vec<Role>,
    ) -> Result<User, AppError> {
        if username.trim().is_empty() {
            return Err(AppError::BadRequest("username must not be empty".to_string()));
        }
        if roles.is_empty() {
            return Err(AppError::BadRequest(
                "an account needs at least one role".to_string(),
            ));
        }
        if self.by_username.contains_key(username) {
            return Err(AppError::Conflict(format!(
                "username '{}' already exists",
                username
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password::hash_password(plaintext_password)?,
            roles,
            active: true,
        };

        self.insert(user.clone())?;
        Ok(user)
    }

    /// Insert a pre-built record, e.g. one migrated with a legacy bcrypt hash.
    pub fn insert(&self, user: User) -> Result<(), AppError> {
        if self.by_username.contains_key(&user.username) {
            return Err(AppError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        self.by_username.insert(user.username.clone(), user.id);
        self.users.insert(user.id, user);
        Ok(())
    }

    /// Verify a username/password pair.
    ///
    /// Disabled accounts and unknown usernames fail exactly like a wrong
    /// password. A matching legacy (bcrypt) hash is transparently re-hashed
    /// to Argon2id before returning. The plaintext is never logged.
    pub fn verify_credentials(&self, username: &str, plaintext: &str) -> Result<User, AppError> {
        let user_id = match self.by_username.get(username) {
            Some(id) => *id,
            None => {
                // Burn a hash anyway so unknown usernames cost the same as
                // wrong passwords.
                let _ = password::verify_password(
                    plaintext,
                    "$argon2id$v=19$m=65536,t=3,p=4$c29tZXNhbHRzb21lc2FsdA$\
                     GEtTeXVHZ25iV2RvY2tldFNpZ21hUGxhY2Vob2xkZXI",
                );
                return Err(AppError::InvalidCredentials);
            }
        };

        let (matches, stored_hash) = {
            let user = self
                .users
                .get(&user_id)
                .ok_or(AppError::InvalidCredentials)?;
            if !user.active {
                return Err(AppError::InvalidCredentials);
            }
            (
                password::verify_password(plaintext, &user.password_hash)?,
                user.password_hash.clone(),
            )
        };

        if !matches {
            return Err(AppError::InvalidCredentials);
        }

        if password::needs_rehash(&stored_hash) {
            debug!("Upgrading legacy password hash for '{}'", username);
            let upgraded = password::hash_password(plaintext)?;
            if let Some(mut user) = self.users.get_mut(&user_id) {
                user.password_hash = upgraded;
            }
        }

        self.users
            .get(&user_id)
            .map(|u| u.clone())
            .ok_or(AppError::InvalidCredentials)
    }

    pub fn get(&self, id: &Uuid) -> Result<User, AppError> {
        self.users
            .get(id)
            .map(|u| u.clone())
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))
    }

    pub fn set_password(&self, id: &Uuid, plaintext: &str) -> Result<(), AppError> {
        let hash = password::hash_password(plaintext)?;
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))?;
        user.password_hash = hash;
        Ok(())
    }

    pub fn set_roles(&self, id: &Uuid, roles: Vec<Role>) -> Result<(), AppError> {
        if roles.is_empty() {
            return Err(AppError::BadRequest(
                "an account needs at least one role".to_string(),
            ));
        }
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))?;
        user.roles = roles;
        Ok(())
    }

    /// Soft-disable. The record stays so existing audit events keep a valid
    /// referent; logins and new tokens stop immediately.
    pub fn deactivate(&self, id: &Uuid) -> Result<(), AppError> {
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))?;
        user.active = false;
        Ok(())
    }

    /// Provision the bootstrap admin account on first start.
    pub fn ensure_admin(&self, username: &str, plaintext: &str) -> Result<(), AppError> {
        if self.by_username.contains_key(username) {
            return Ok(());
        }
        let user = self.create(username, plaintext, vec![Role::Admin])?;
        info!("Provisioned bootstrap admin account '{}'", user.username);
        Ok(())
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn create_and_verify_roundtrip() {
        let store = UserStore::new();
        let user = store
            .create("alice", "s3cret-passphrase", vec![Role::User])
            .unwrap();

        let verified = store.verify_credentials("alice", "s3cret-passphrase").unwrap();
        assert_eq!(verified.id, user.id);
        assert_eq!(verified.roles, vec![Role::User]);
    }

    #[test]
    fn wrong_password_and_unknown_user_look_identical() {
        let store = UserStore::new();
        store
            .create("alice", "s3cret-passphrase", vec![Role::User])
            .unwrap();

        assert_eq!(
            store.verify_credentials("alice", "nope").unwrap_err(),
            AppError::InvalidCredentials
        );
        assert_eq!(
            store.verify_credentials("nobody", "nope").unwrap_err(),
            AppError::InvalidCredentials
        );
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let store = UserStore::new();
        store.create("alice", "pw-one-two-three", vec![Role::User]).unwrap();
        let err = store
            .create("alice", "other-password", vec![Role::User])
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn deactivated_account_cannot_log_in() {
        let store = UserStore::new();
        let user = store
            .create("alice", "s3cret-passphrase", vec![Role::User])
            .unwrap();

        store.deactivate(&user.id).unwrap();
        assert_eq!(
            store
                .verify_credentials("alice", "s3cret-passphrase")
                .unwrap_err(),
            AppError::InvalidCredentials
        );
        // Record still exists for audit referential integrity.
        assert!(!store.get(&user.id).unwrap().active);
    }

    #[test]
    fn legacy_bcrypt_hash_is_upgraded_on_login() {
        let store = UserStore::new();
        let legacy = User {
            id: Uuid::new_v4(),
            username: "bob".to_string(),
            password_hash: bcrypt::hash("old-password", 12).unwrap(),
            roles: vec![Role::ReadOnly],
            active: true,
        };
        store.insert(legacy.clone()).unwrap();

        store.verify_credentials("bob", "old-password").unwrap();

        let upgraded = store.get(&legacy.id).unwrap();
        assert!(upgraded.password_hash.starts_with("$argon2id$"));
        // And the upgraded hash still verifies.
        store.verify_credentials("bob", "old-password").unwrap();
    }

    #[test]
    fn role_assignment_requires_at_least_one_role() {
        let store = UserStore::new();
        let user = store
            .create("alice", "s3cret-passphrase", vec![Role::User])
            .unwrap();

        assert!(matches!(
            store.set_roles(&user.id, vec![]).unwrap_err(),
            AppError::BadRequest(_)
        ));

        store
            .set_roles(&user.id, vec![Role::Admin, Role::User])
            .unwrap();
        assert_eq!(
            store.get(&user.id).unwrap().roles,
            vec![Role::Admin, Role::User]
        );
    }

    #[test]
    fn password_change_takes_effect() {
        let store = UserStore::new();
        let user = store
            .create("alice", "first-password", vec![Role::User])
            .unwrap();

        store.set_password(&user.id, "second-password").unwrap();
        assert!(store.verify_credentials("alice", "first-password").is_err());
        assert!(store.verify_credentials("alice", "second-password").is_ok());
    }
}
