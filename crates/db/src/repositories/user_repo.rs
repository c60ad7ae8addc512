//! Repository for the remote `users` table.

use spray_core::types::DbId;

use crate::models::user::{CreateUser, UserRow};
use crate::DbPool;

/// Column list for users queries.
const COLUMNS: &str = "id, username, password_hash, email, full_name, role, \
    created_at, updated_at, last_login, is_active";

pub struct UserRepo;

impl UserRepo {
    /// Insert a new user, returning its id.
    pub async fn create(pool: &DbPool, input: &CreateUser, at: i64) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO users \
                (username, password_hash, email, full_name, role, created_at, updated_at, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1) \
             RETURNING id",
        )
        .bind(input.username.as_str())
        .bind(input.password_hash.as_str())
        .bind(input.email.as_str())
        .bind(input.full_name.as_str())
        .bind(input.role.as_str())
        .bind(at)
        .bind(at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_username(
        pool: &DbPool,
        username: &str,
    ) -> Result<Option<UserRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    pub async fn count_active(pool: &DbPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(pool)
            .await
    }

    /// Active users, alphabetical.
    pub async fn list_active(pool: &DbPool) -> Result<Vec<UserRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM users WHERE is_active = 1 ORDER BY username ASC");
        sqlx::query_as::<_, UserRow>(&query).fetch_all(pool).await
    }
}
