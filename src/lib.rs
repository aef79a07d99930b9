//! Watch-party server: rooms of viewers kept in sync over WebSockets.
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod sync;
