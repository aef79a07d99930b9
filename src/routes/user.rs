use axum::{extract::{Extension, Query}, routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{
    db::user,
    error::{bad, AppResult},
};

#[derive(Deserialize)] struct NameQuery { name: Option<String> }
#[derive(Deserialize)] struct IdQuery { id: Option<String> }

pub fn router() -> Router {
    Router::new()
        .route("/create", get(create_user))
        .route("/delete", get(delete_user))
}

/* ---------------- Create ---------------- */
async fn create_user(
    Extension(pool): Extension<SqlitePool>,
    Query(q): Query<NameQuery>,
) -> AppResult<Json<Value>> {
    let name = q.name.filter(|n| !n.is_empty())
        .ok_or_else(|| bad("Missing required parameter: name"))?;
    let user = user::create_user(&pool, &name).await?;

    Ok(Json(json!({"status": "success", "message": "User created successfully", "user": user})))
}

/* ---------------- Delete ---------------- */
async fn delete_user(
    Extension(pool): Extension<SqlitePool>,
    Query(q): Query<IdQuery>,
) -> AppResult<Json<Value>> {
    let id = parse_id(q.id.as_deref())?;
    user::delete_user(&pool, id).await?;

    Ok(Json(json!({"status": "success", "message": "User deleted successfully", "id": id})))
}

pub(crate) fn parse_id(raw: Option<&str>) -> AppResult<i64> {
    let raw = raw.filter(|s| !s.is_empty()).ok_or_else(|| bad("Missing required parameter: id"))?;
    let id: i64 = raw.parse().map_err(|_| bad("Invalid id parameter"))?;
    if id <= 0 {
        return Err(bad("Invalid id: must be positive"));
    }
    Ok(id)
}
