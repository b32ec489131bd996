// ABOUTME: User record and sandbox handle persistence for Chainlab
// ABOUTME: Provides CRUD operations for users in SQLite database

pub mod storage;

pub use storage::{
    LifecycleState, SandboxHandle, StorageError, User, UserStorage,
};

/// Embedded schema migrations (`migrations/`). Run against every pool
/// before constructing a [`UserStorage`].
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
