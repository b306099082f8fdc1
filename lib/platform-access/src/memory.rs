//! In-memory store implementations.
//!
//! Used by tests and local experimentation. Each store holds its records
//! behind a single `RwLock`, so every trait operation is atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gradebook_core::UserId;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StoreError;
use crate::role::Role;
use crate::session::{Session, SessionId};
use crate::store::{IdentityStore, LinkOutcome, ProfileStore, SessionStore, StudentProfile};
use crate::user::{InvitedUser, ProfileUpdate, normalize_email};

fn poisoned() -> StoreError {
    StoreError::Backend {
        reason: "lock poisoned".to_string(),
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read().map_err(|_| poisoned())
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write().map_err(|_| poisoned())
}

/// In-memory identity store.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    users: RwLock<HashMap<UserId, InvitedUser>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn invite(&self, email: &str, role: Role) -> Result<InvitedUser, StoreError> {
        let user = InvitedUser::invite(email, role);
        let mut users = write(&self.users)?;
        if users.values().any(|u| u.email() == user.email()) {
            return Err(StoreError::Conflict {
                email: user.email().to_string(),
            });
        }
        users.insert(user.id(), user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<InvitedUser>, StoreError> {
        let email = normalize_email(email);
        let users = read(&self.users)?;
        Ok(users.values().find(|u| u.email() == email).cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<InvitedUser>, StoreError> {
        Ok(read(&self.users)?.get(&id).cloned())
    }

    async fn activate(
        &self,
        email: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<InvitedUser>, StoreError> {
        let email = normalize_email(email);
        let mut users = write(&self.users)?;
        let Some(user) = users.values_mut().find(|u| u.email() == email) else {
            return Ok(None);
        };
        user.apply_login(update, Utc::now());
        Ok(Some(user.clone()))
    }

    async fn update(&self, user: &InvitedUser) -> Result<(), StoreError> {
        let mut users = write(&self.users)?;
        match users.get_mut(&user.id()) {
            Some(stored) => {
                *stored = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                id: user.id().to_string(),
            }),
        }
    }

    async fn delete(&self, id: UserId) -> Result<InvitedUser, StoreError> {
        write(&self.users)?
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn list(&self) -> Result<Vec<InvitedUser>, StoreError> {
        let mut users: Vec<InvitedUser> = read(&self.users)?.values().cloned().collect();
        users.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        Ok(users)
    }
}

/// In-memory student profile store.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<Vec<StudentProfile>>,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn create(&self, profile: StudentProfile) -> Result<StudentProfile, StoreError> {
        let mut profiles = write(&self.profiles)?;
        if profiles.iter().any(|p| p.student_number == profile.student_number) {
            return Err(StoreError::DuplicateProfile {
                field: "student number",
                value: profile.student_number,
            });
        }
        if profiles.iter().any(|p| p.email == profile.email) {
            return Err(StoreError::DuplicateProfile {
                field: "email",
                value: profile.email,
            });
        }
        profiles.push(profile.clone());
        Ok(profile)
    }

    async fn link_by_email(
        &self,
        email: &str,
        user_id: UserId,
    ) -> Result<LinkOutcome, StoreError> {
        let email = normalize_email(email);
        let mut profiles = write(&self.profiles)?;

        if let Some(existing) = profiles.iter().find(|p| p.user_id == Some(user_id)) {
            return Ok(LinkOutcome::AlreadyLinked(existing.id));
        }
        let Some(profile) = profiles.iter_mut().find(|p| p.email == email) else {
            return Ok(LinkOutcome::NoProfile);
        };
        if profile.user_id.is_some() {
            return Ok(LinkOutcome::AlreadyLinked(profile.id));
        }
        profile.user_id = Some(user_id);
        Ok(LinkOutcome::Linked(profile.id))
    }

    async fn unlink_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let mut profiles = write(&self.profiles)?;
        let mut cleared = 0;
        for profile in profiles.iter_mut().filter(|p| p.user_id == Some(user_id)) {
            profile.user_id = None;
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Option<StudentProfile>, StoreError> {
        let profiles = read(&self.profiles)?;
        Ok(profiles.iter().find(|p| p.user_id == Some(user_id)).cloned())
    }

    async fn list(&self) -> Result<Vec<StudentProfile>, StoreError> {
        Ok(read(&self.profiles)?.clone())
    }
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(read(&self.sessions)?.len())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(read(&self.sessions)?.get(id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        write(&self.sessions)?.insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), StoreError> {
        write(&self.sessions)?.remove(id);
        Ok(())
    }

    async fn destroy_for_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let mut sessions = write(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id() != Some(user_id));
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = write(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::UserStatus;
    use chrono::Duration;

    fn login() -> ProfileUpdate {
        ProfileUpdate {
            provider: "google".to_string(),
            provider_subject_id: Some("sub".to_string()),
            display_name: Some("A".to_string()),
            picture: None,
            access_token: "access".to_string(),
            refresh_token_encrypted: Some("iv:ct:tag".to_string()),
            token_expiry: 42,
        }
    }

    #[tokio::test]
    async fn duplicate_invite_conflicts_and_keeps_first_record() {
        let store = MemoryIdentityStore::new();
        let first = store.invite("a@x.com", Role::Student).await.unwrap();

        let err = store.invite("A@X.COM", Role::Admin).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                email: "a@x.com".to_string()
            }
        );

        let stored = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(stored.role(), Role::Student);
    }

    #[tokio::test]
    async fn activate_unknown_email_returns_none() {
        let store = MemoryIdentityStore::new();
        assert!(store.activate("nobody@x.com", &login()).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activate_merges_login() {
        let store = MemoryIdentityStore::new();
        let invited = store.invite("a@x.com", Role::Student).await.unwrap();

        let active = store.activate("a@x.com", &login()).await.unwrap().unwrap();
        assert_eq!(active.id(), invited.id());
        assert_eq!(active.status(), UserStatus::Active);
        assert_eq!(active.refresh_token_encrypted(), Some("iv:ct:tag"));
    }

    #[tokio::test]
    async fn delete_missing_user_is_not_found() {
        let store = MemoryIdentityStore::new();
        let id = UserId::new();
        assert_eq!(
            store.delete(id).await.unwrap_err(),
            StoreError::NotFound { id: id.to_string() }
        );
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = MemoryIdentityStore::new();
        let first = store.invite("a@x.com", Role::Student).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.invite("b@x.com", Role::Admin).await.unwrap();

        let ids: Vec<UserId> = store.list().await.unwrap().iter().map(InvitedUser::id).collect();
        assert_eq!(ids, vec![second.id(), first.id()]);
    }

    #[tokio::test]
    async fn link_is_first_match_wins() {
        let store = MemoryProfileStore::new();
        let profile = store
            .create(StudentProfile::new("S001", "Ada", "Lovelace", "a@x.com"))
            .await
            .unwrap();
        let first = UserId::new();
        let second = UserId::new();

        assert_eq!(
            store.link_by_email("a@x.com", first).await.unwrap(),
            LinkOutcome::Linked(profile.id)
        );
        assert_eq!(
            store.link_by_email("a@x.com", second).await.unwrap(),
            LinkOutcome::AlreadyLinked(profile.id)
        );
        assert_eq!(
            store.find_by_user(first).await.unwrap().map(|p| p.id),
            Some(profile.id)
        );
        assert!(store.find_by_user(second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_links_at_most_one_profile() {
        let store = MemoryProfileStore::new();
        let mut other = StudentProfile::new("S002", "Bob", "B", "b@x.com");
        let user = UserId::new();
        other.user_id = Some(user);
        let other = store.create(other).await.unwrap();
        store
            .create(StudentProfile::new("S001", "Ada", "L", "a@x.com"))
            .await
            .unwrap();

        assert_eq!(
            store.link_by_email("a@x.com", user).await.unwrap(),
            LinkOutcome::AlreadyLinked(other.id)
        );
    }

    #[tokio::test]
    async fn duplicate_profile_names_the_colliding_field() {
        let store = MemoryProfileStore::new();
        store
            .create(StudentProfile::new("S001", "Ada", "L", "a@x.com"))
            .await
            .unwrap();

        let err = store
            .create(StudentProfile::new("S001", "Bob", "B", "b@x.com"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateProfile {
                field: "student number",
                value: "S001".to_string()
            }
        );

        let err = store
            .create(StudentProfile::new("S002", "Ada", "L", "a@x.com"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateProfile {
                field: "email",
                value: "a@x.com".to_string()
            }
        );
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unlink_clears_back_reference() {
        let store = MemoryProfileStore::new();
        store
            .create(StudentProfile::new("S001", "Ada", "L", "a@x.com"))
            .await
            .unwrap();
        let user = UserId::new();
        store.link_by_email("a@x.com", user).await.unwrap();

        assert_eq!(store.unlink_user(user).await.unwrap(), 1);
        assert!(store.find_by_user(user).await.unwrap().is_none());
        assert_eq!(store.unlink_user(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn session_store_destroy_is_idempotent() {
        let store = MemorySessionStore::new();
        let session = Session::anonymous(Duration::hours(1));
        store.save(&session).await.unwrap();

        store.destroy(session.id()).await.unwrap();
        store.destroy(session.id()).await.unwrap();
        assert!(store.load(session.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn destroy_for_user_only_touches_that_user() {
        let store = MemorySessionStore::new();
        let a = InvitedUser::invite("a@x.com", Role::Student);
        let b = InvitedUser::invite("b@x.com", Role::Student);
        store.save(&Session::authenticated(&a, Duration::hours(1))).await.unwrap();
        store.save(&Session::authenticated(&a, Duration::hours(1))).await.unwrap();
        store.save(&Session::authenticated(&b, Duration::hours(1))).await.unwrap();

        assert_eq!(store.destroy_for_user(a.id()).await.unwrap(), 2);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_expired_removes_only_expired() {
        let store = MemorySessionStore::new();
        let live = Session::anonymous(Duration::hours(1));
        let expired = Session::anonymous(Duration::seconds(-1));
        store.save(&live).await.unwrap();
        store.save(&expired).await.unwrap();

        assert_eq!(store.delete_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.load(live.id()).await.unwrap().is_some());
    }
}
