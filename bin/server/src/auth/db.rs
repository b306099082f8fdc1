//! PostgreSQL stores for invited users, student profiles, and sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gradebook_core::{StudentId, UserId};
use gradebook_platform_access::{
    IdentityStore, InvitedUser, LinkOutcome, ProfileStore, ProfileUpdate, Role, Session,
    SessionId, SessionStore, StoreError, StudentProfile, UserStatus, normalize_email,
};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

const USER_COLUMNS: &str = "id, email, role, status, provider, provider_subject_id, display_name, \
     picture, refresh_token_encrypted, token_expiry, created_at, updated_at";

const STUDENT_COLUMNS: &str =
    "id, student_number, first_name, last_name, email, user_id, created_at";

const SESSION_COLUMNS: &str =
    "id, user_id, email, role, name, authenticated, oauth_used, created_at, expires_at";

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend {
        reason: err.to_string(),
    }
}

fn invalid(what: &str, value: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidRecord {
        reason: format!("invalid {what} '{value}': {err}"),
    }
}

fn parse_user_id(value: &str) -> Result<UserId, StoreError> {
    UserId::from_str(value).map_err(|e| invalid("user id", value, e))
}

fn parse_role(value: &str) -> Result<Role, StoreError> {
    Role::from_str(value).map_err(|e| invalid("role", value, e))
}

/// Row type for invited user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    role: String,
    status: String,
    provider: Option<String>,
    provider_subject_id: Option<String>,
    display_name: Option<String>,
    picture: Option<String>,
    refresh_token_encrypted: Option<String>,
    token_expiry: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> Result<InvitedUser, StoreError> {
        let id = parse_user_id(&self.id)?;
        let role = parse_role(&self.role)?;
        let status =
            UserStatus::from_str(&self.status).map_err(|e| invalid("status", &self.status, e))?;
        Ok(InvitedUser::with_all_fields(
            id,
            self.email,
            role,
            status,
            self.provider,
            self.provider_subject_id,
            self.display_name,
            self.picture,
            self.refresh_token_encrypted,
            self.token_expiry,
            self.created_at,
            self.updated_at,
        ))
    }
}

/// Identity store backed by the `invited_users` table.
///
/// Access tokens are never written to the database; they live in a
/// process-local cache keyed by user id.
pub struct PgIdentityStore {
    pool: PgPool,
    access_tokens: RwLock<HashMap<UserId, String>>,
}

impl PgIdentityStore {
    /// Creates a new identity store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            access_tokens: RwLock::new(HashMap::new()),
        }
    }

    fn cache_token(&self, id: UserId, token: Option<&str>) -> Result<(), StoreError> {
        let mut cache = self.access_tokens.write().map_err(|_| StoreError::Backend {
            reason: "access token cache poisoned".to_string(),
        })?;
        match token {
            Some(token) => cache.insert(id, token.to_string()),
            None => cache.remove(&id),
        };
        Ok(())
    }

    fn hydrate(&self, row: UserRow) -> Result<InvitedUser, StoreError> {
        let mut user = row.try_into_user()?;
        let cache = self.access_tokens.read().map_err(|_| StoreError::Backend {
            reason: "access token cache poisoned".to_string(),
        })?;
        user.set_cached_access_token(cache.get(&user.id()).cloned());
        Ok(user)
    }

    fn hydrate_optional(&self, row: Option<UserRow>) -> Result<Option<InvitedUser>, StoreError> {
        row.map(|r| self.hydrate(r)).transpose()
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn invite(&self, email: &str, role: Role) -> Result<InvitedUser, StoreError> {
        let user = InvitedUser::invite(email, role);
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO invited_users (id, email, role, status, token_expiry, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $6)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id().to_string())
        .bind(user.email())
        .bind(user.role().as_str())
        .bind(user.status().as_str())
        .bind(user.created_at())
        .bind(user.updated_at())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(r) => self.hydrate(r),
            None => Err(StoreError::Conflict {
                email: user.email().to_string(),
            }),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<InvitedUser>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM invited_users WHERE email = $1"))
                .bind(normalize_email(email))
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        self.hydrate_optional(row)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<InvitedUser>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM invited_users WHERE id = $1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        self.hydrate_optional(row)
    }

    async fn activate(
        &self,
        email: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<InvitedUser>, StoreError> {
        // One statement, so concurrent callbacks for the same email serialize
        // on the row lock and the last writer's fields win.
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            UPDATE invited_users
            SET provider = $2,
                provider_subject_id = COALESCE($3, provider_subject_id),
                display_name = COALESCE($4, display_name),
                picture = COALESCE($5, picture),
                refresh_token_encrypted = COALESCE($6, refresh_token_encrypted),
                token_expiry = $7,
                status = 'ACTIVE',
                updated_at = $8
            WHERE email = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(normalize_email(email))
        .bind(&update.provider)
        .bind(update.provider_subject_id.as_deref())
        .bind(update.display_name.as_deref())
        .bind(update.picture.as_deref())
        .bind(update.refresh_token_encrypted.as_deref())
        .bind(update.token_expiry)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut user = row.try_into_user()?;
        self.cache_token(user.id(), Some(&update.access_token))?;
        user.set_cached_access_token(Some(update.access_token.clone()));
        Ok(Some(user))
    }

    async fn update(&self, user: &InvitedUser) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invited_users
            SET role = $2, status = $3, provider = $4, provider_subject_id = $5,
                display_name = $6, picture = $7, refresh_token_encrypted = $8,
                token_expiry = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(user.id().to_string())
        .bind(user.role().as_str())
        .bind(user.status().as_str())
        .bind(user.provider())
        .bind(user.provider_subject_id())
        .bind(user.display_name())
        .bind(user.picture())
        .bind(user.refresh_token_encrypted())
        .bind(user.token_expiry())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                id: user.id().to_string(),
            });
        }
        self.cache_token(user.id(), user.access_token())
    }

    async fn delete(&self, id: UserId) -> Result<InvitedUser, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "DELETE FROM invited_users WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let user = self
            .hydrate_optional(row)?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        self.cache_token(id, None)?;
        Ok(user)
    }

    async fn list(&self) -> Result<Vec<InvitedUser>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM invited_users ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(|r| self.hydrate(r)).collect()
    }
}

/// Row type for student queries.
#[derive(FromRow)]
struct StudentRow {
    id: String,
    student_number: String,
    first_name: String,
    last_name: String,
    email: String,
    user_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl StudentRow {
    fn try_into_profile(self) -> Result<StudentProfile, StoreError> {
        let id = parse_student_id(&self.id)?;
        let user_id = self.user_id.as_deref().map(parse_user_id).transpose()?;
        Ok(StudentProfile {
            id,
            student_number: self.student_number,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            user_id,
            created_at: self.created_at,
        })
    }
}

fn parse_student_id(value: &str) -> Result<StudentId, StoreError> {
    StudentId::from_str(value).map_err(|e| invalid("student id", value, e))
}

/// Names the unique column a rejected profile insert collided on.
fn profile_conflict(profile: StudentProfile, number_taken: bool) -> StoreError {
    if number_taken {
        StoreError::DuplicateProfile {
            field: "student number",
            value: profile.student_number,
        }
    } else {
        StoreError::DuplicateProfile {
            field: "email",
            value: normalize_email(&profile.email),
        }
    }
}

/// Profile store backed by the `students` table.
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    /// Creates a new profile store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn create(&self, profile: StudentProfile) -> Result<StudentProfile, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO students (id, student_number, first_name, last_name, email, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(profile.id.to_string())
        .bind(&profile.student_number)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(normalize_email(&profile.email))
        .bind(profile.user_id.map(|id| id.to_string()))
        .bind(profile.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let (number_taken,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM students WHERE student_number = $1)",
            )
            .bind(&profile.student_number)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
            return Err(profile_conflict(profile, number_taken));
        }
        Ok(profile)
    }

    async fn link_by_email(
        &self,
        email: &str,
        user_id: UserId,
    ) -> Result<LinkOutcome, StoreError> {
        let email = normalize_email(email);

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM students WHERE user_id = $1")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        if let Some((id,)) = existing {
            return Ok(LinkOutcome::AlreadyLinked(parse_student_id(&id)?));
        }

        let linked: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE students
            SET user_id = $1
            WHERE email = $2 AND user_id IS NULL
            RETURNING id
            "#,
        )
        .bind(user_id.to_string())
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        if let Some((id,)) = linked {
            return Ok(LinkOutcome::Linked(parse_student_id(&id)?));
        }

        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM students WHERE email = $1")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match taken {
            Some((id,)) => Ok(LinkOutcome::AlreadyLinked(parse_student_id(&id)?)),
            None => Ok(LinkOutcome::NoProfile),
        }
    }

    async fn unlink_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE students SET user_id = NULL WHERE user_id = $1")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Option<StudentProfile>, StoreError> {
        let row: Option<StudentRow> =
            sqlx::query_as(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE user_id = $1"))
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.map(StudentRow::try_into_profile).transpose()
    }

    async fn list(&self) -> Result<Vec<StudentProfile>, StoreError> {
        let rows: Vec<StudentRow> = sqlx::query_as(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students ORDER BY last_name, first_name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(StudentRow::try_into_profile).collect()
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: Option<String>,
    email: Option<String>,
    role: Option<String>,
    name: Option<String>,
    authenticated: bool,
    oauth_used: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<Session, StoreError> {
        let user_id = self.user_id.as_deref().map(parse_user_id).transpose()?;
        let role = self.role.as_deref().map(parse_role).transpose()?;
        Ok(Session::with_all_fields(
            SessionId::from(self.id),
            user_id,
            self.email,
            role,
            self.name,
            self.authenticated,
            self.oauth_used,
            self.created_at,
            self.expires_at,
        ))
    }
}

/// Session store backed by the `sessions` table.
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Creates a new session store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.map(SessionRow::try_into_session).transpose()
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, email, role, name, authenticated, oauth_used, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                email = EXCLUDED.email,
                role = EXCLUDED.role,
                name = EXCLUDED.name,
                authenticated = EXCLUDED.authenticated,
                oauth_used = EXCLUDED.oauth_used,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id().map(|id| id.to_string()))
        .bind(session.email())
        .bind(session.role().map(|r| r.as_str()))
        .bind(session.name())
        .bind(session.is_authenticated())
        .bind(session.oauth_used())
        .bind(session.created_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn destroy_for_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected())
    }
}
