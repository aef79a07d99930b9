use axum::{extract::{Extension, Query}, routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use super::user::parse_id;
use crate::{
    db::{room, RoomRecord},
    error::{bad, AppErr, AppResult},
    sync::Hub,
};

#[derive(Deserialize)]
struct RoomQuery {
    key:       Option<String>,
    file_name: Option<String>,
    user_id:   Option<String>,
}

impl RoomQuery {
    fn key(&self) -> AppResult<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
            .ok_or_else(|| bad("Missing required parameter: key"))
    }
}

pub fn router() -> Router {
    Router::new()
        .route("/room",        get(get_room))
        .route("/room/create", get(create_room))
        .route("/room/video",  get(set_video))
        .route("/room/stats",  get(stats))
        .route("/room/join",   get(join))
        .route("/room/leave",  get(leave))
}

async fn get_room(
    Extension(pool): Extension<SqlitePool>,
    Query(q): Query<RoomQuery>,
) -> AppResult<Json<RoomRecord>> {
    let key = q.key()?;
    room::room_by_key(&pool, key).await?
        .map(Json)
        .ok_or_else(|| AppErr::NotFound(format!("room '{key}'")))
}

async fn create_room(Extension(pool): Extension<SqlitePool>) -> AppResult<Json<Value>> {
    let room = room::create_room(&pool).await?;
    Ok(Json(json!({"status": "success", "message": "Room created successfully", "room": room})))
}

async fn set_video(
    Extension(pool): Extension<SqlitePool>,
    Query(q): Query<RoomQuery>,
) -> AppResult<Json<String>> {
    let key = q.key()?;
    let file = q.file_name.as_deref().filter(|f| !f.is_empty())
        .ok_or_else(|| bad("Missing required parameter: file_name"))?;
    room::set_room_video(&pool, key, file).await?;
    Ok(Json(file.to_string()))
}

/* 即時人數：只查，不建房 */
async fn stats(
    Extension(hub): Extension<Hub>,
    Query(q): Query<RoomQuery>,
) -> AppResult<Json<Value>> {
    let key = q.key()?;
    let clients = hub.get(key).await.map(|r| r.client_count()).unwrap_or(0);
    Ok(Json(json!({"key": key, "clients": clients})))
}

async fn join(
    Extension(pool): Extension<SqlitePool>,
    Query(q): Query<RoomQuery>,
) -> AppResult<Json<Value>> {
    let (key, uid) = (q.key()?, parse_id(q.user_id.as_deref())?);
    room::add_user_to_room(&pool, key, uid).await?;
    Ok(Json(json!({"status": "success", "key": key, "user_id": uid})))
}

async fn leave(
    Extension(pool): Extension<SqlitePool>,
    Query(q): Query<RoomQuery>,
) -> AppResult<Json<Value>> {
    let (key, uid) = (q.key()?, parse_id(q.user_id.as_deref())?);
    room::remove_user_from_room(&pool, key, uid).await?;
    Ok(Json(json!({"status": "success", "key": key, "user_id": uid})))
}
