use axum::Router;

pub mod room;
pub mod user;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .merge(room::router())
        .merge(ws::router())
        .nest("/user", user::router())
}
