use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{AppErr, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id:   i64,
    pub name: String,
}

pub async fn create_user(pool: &SqlitePool, name: &str) -> AppResult<User> {
    if user_by_name(pool, name).await?.is_some() {
        return Err(AppErr::Conflict(format!("user '{name}' already exists")));
    }

    let id = sqlx::query("INSERT INTO users (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?
        .last_insert_rowid();

    tracing::info!(user_id = id, name, "user created");
    Ok(User { id, name: name.to_string() })
}

pub async fn user_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<User>> {
    let row: Option<(i64, String)> = sqlx::query_as("SELECT id, name FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id, name)| User { id, name }))
}

pub async fn user_by_name(pool: &SqlitePool, name: &str) -> AppResult<Option<User>> {
    let row: Option<(i64, String)> = sqlx::query_as("SELECT id, name FROM users WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id, name)| User { id, name }))
}

/// Drop the user and every room membership it holds.
pub async fn delete_user(pool: &SqlitePool, id: i64) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM users_in_room WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let gone = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if gone == 0 {
        return Err(AppErr::NotFound(format!("user {id}")));
    }

    tx.commit().await?;
    tracing::info!(user_id = id, "user deleted");
    Ok(())
}
