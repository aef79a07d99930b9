//! sqlite persistence for rooms and users.
use sqlx::SqlitePool;

pub mod room;
pub mod user;

pub use room::RoomRecord;
pub use user::User;

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS users (
        id   INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id    INTEGER PRIMARY KEY AUTOINCREMENT,
        key   TEXT UNIQUE,
        video TEXT NULL
    )",
    "CREATE TABLE IF NOT EXISTS users_in_room (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        room_id INTEGER NOT NULL
    )",
];

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    tracing::info!("tables ready");
    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // one connection: every :memory: connection is its own database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}
