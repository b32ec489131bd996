// ABOUTME: Storage layer for user records and their embedded sandbox handles
// ABOUTME: Provides CRUD operations over SQLite with round-trip fidelity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("User not found: {0}")]
    NotFound(String),
    #[error("User already exists: {0}")]
    Conflict(String),
    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),
    #[error("Corrupt record for user {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Lifecycle state of a user's sandbox.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unprovisioned,
    Created,
    Running,
    Stopped,
    Removed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "unprovisioned" => Ok(Self::Unprovisioned),
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "removed" => Ok(Self::Removed),
            _ => Err(StorageError::InvalidState(s.to_string())),
        }
    }
}

/// The record binding a user to at most one backing container.
///
/// Invariant: `container_id` is `Some` exactly while the state is
/// `Created`, `Running` or `Stopped`; both `Unprovisioned` and `Removed`
/// carry `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxHandle {
    pub owner_id: String,
    pub container_id: Option<String>,
    pub state: LifecycleState,
}

impl SandboxHandle {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            container_id: None,
            state: LifecycleState::Unprovisioned,
        }
    }

    /// Whether a backing container is currently recorded.
    pub fn is_provisioned(&self) -> bool {
        self.container_id.is_some()
    }

    /// Drop the backing container reference and fall back to
    /// `Unprovisioned`, e.g. after the instance vanished externally.
    pub fn reset(&mut self) {
        self.container_id = None;
        self.state = LifecycleState::Unprovisioned;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub course_progress: i64,
    pub sandbox: SandboxHandle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            sandbox: SandboxHandle::new(id.clone()),
            id,
            password_hash: password_hash.into(),
            course_progress: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

pub struct UserStorage {
    pool: SqlitePool,
}

impl UserStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                id, password_hash, course_progress,
                container_id, sandbox_state,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&user.id)
        .bind(&user.password_hash)
        .bind(user.course_progress)
        .bind(&user.sandbox.container_id)
        .bind(user.sandbox.state.as_str())
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StorageError::Conflict(user.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        self.find_user(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, password_hash, course_progress,
                   container_id, sandbox_state,
                   created_at, updated_at
            FROM users
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_user).transpose()
    }

    /// Persist the sandbox handle columns for `handle.owner_id`.
    pub async fn update_handle(&self, handle: &SandboxHandle) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET container_id = ?1, sandbox_state = ?2, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(&handle.container_id)
        .bind(handle.state.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(&handle.owner_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(handle.owner_id.clone()));
        }
        Ok(())
    }

    pub async fn set_course_progress(&self, id: &str, progress: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET course_progress = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(progress)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let parse_ts = |column: &str| -> Result<DateTime<Utc>> {
        let raw: String = row.get(column);
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| StorageError::Corrupt(id.clone()))
    };

    let created_at = parse_ts("created_at")?;
    let updated_at = parse_ts("updated_at")?;

    Ok(User {
        sandbox: SandboxHandle {
            owner_id: id.clone(),
            container_id: row.get("container_id"),
            state: LifecycleState::from_str(&row.get::<String, _>("sandbox_state"))?,
        },
        id,
        password_hash: row.get("password_hash"),
        course_progress: row.get("course_progress"),
        created_at,
        updated_at,
    })
}
