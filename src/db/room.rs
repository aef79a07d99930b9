use serde::Serialize;
use sqlx::SqlitePool;

use super::user::{user_by_id, User};
use crate::error::{AppErr, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomRecord {
    pub id:    i64,
    pub key:   String,
    pub video: Option<String>,
    pub users: Vec<User>,
}

pub async fn create_room(pool: &SqlitePool) -> AppResult<RoomRecord> {
    let key = nanoid::nanoid!();
    let id = sqlx::query("INSERT INTO rooms (key) VALUES (?)")
        .bind(&key)
        .execute(pool)
        .await?
        .last_insert_rowid();

    tracing::info!(room = %key, room_id = id, "room created");
    Ok(RoomRecord { id, key, video: None, users: Vec::new() })
}

pub async fn room_by_key(pool: &SqlitePool, key: &str) -> AppResult<Option<RoomRecord>> {
    let row: Option<(i64, String, Option<String>)> =
        sqlx::query_as("SELECT id, key, video FROM rooms WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    let Some((id, key, video)) = row else { return Ok(None) };

    let users = users_in_room(pool, id).await?;
    Ok(Some(RoomRecord { id, key, video, users }))
}

pub async fn users_in_room(pool: &SqlitePool, room_id: i64) -> AppResult<Vec<User>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT u.id, u.name FROM users_in_room r JOIN users u ON u.id = r.user_id
         WHERE r.room_id = ? ORDER BY r.id",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id, name)| User { id, name }).collect())
}

pub async fn set_room_video(pool: &SqlitePool, key: &str, video: &str) -> AppResult<()> {
    let n = sqlx::query("UPDATE rooms SET video = ? WHERE key = ?")
        .bind(video)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();
    if n == 0 {
        return Err(AppErr::NotFound(format!("room '{key}'")));
    }
    tracing::info!(room = key, video, "video set");
    Ok(())
}

async fn room_id(pool: &SqlitePool, key: &str) -> AppResult<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM rooms WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    row.map(|(id,)| id).ok_or_else(|| AppErr::NotFound(format!("room '{key}'")))
}

pub async fn add_user_to_room(pool: &SqlitePool, key: &str, user_id: i64) -> AppResult<()> {
    let room_id = room_id(pool, key).await?;
    if user_by_id(pool, user_id).await?.is_none() {
        return Err(AppErr::NotFound(format!("user {user_id}")));
    }

    sqlx::query("INSERT INTO users_in_room (room_id, user_id) VALUES (?, ?)")
        .bind(room_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn remove_user_from_room(pool: &SqlitePool, key: &str, user_id: i64) -> AppResult<()> {
    let room_id = room_id(pool, key).await?;
    let n = sqlx::query("DELETE FROM users_in_room WHERE user_id = ? AND room_id = ?")
        .bind(user_id)
        .bind(room_id)
        .execute(pool)
        .await?
        .rows_affected();
    if n == 0 {
        return Err(AppErr::NotFound(format!("user {user_id} in room '{key}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory_pool, user::create_user};

    #[tokio::test]
    async fn create_lookup_and_set_video() {
        let pool = memory_pool().await;
        let r = create_room(&pool).await.unwrap();
        assert!(!r.key.is_empty());

        set_room_video(&pool, &r.key, "movie.mp4").await.unwrap();
        let got = room_by_key(&pool, &r.key).await.unwrap().unwrap();
        assert_eq!(got.video.as_deref(), Some("movie.mp4"));

        assert!(room_by_key(&pool, "nope").await.unwrap().is_none());
        assert!(matches!(set_room_video(&pool, "nope", "x").await, Err(AppErr::NotFound(_))));
    }

    #[tokio::test]
    async fn membership_roundtrip() {
        let pool = memory_pool().await;
        let r = create_room(&pool).await.unwrap();
        let u = create_user(&pool, "cid").await.unwrap();

        add_user_to_room(&pool, &r.key, u.id).await.unwrap();
        assert_eq!(users_in_room(&pool, r.id).await.unwrap(), vec![u.clone()]);

        remove_user_from_room(&pool, &r.key, u.id).await.unwrap();
        assert!(matches!(
            remove_user_from_room(&pool, &r.key, u.id).await,
            Err(AppErr::NotFound(_))
        ));
        assert!(matches!(add_user_to_room(&pool, &r.key, 999).await, Err(AppErr::NotFound(_))));
    }
}
