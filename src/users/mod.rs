use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod media;
pub mod repo;
pub mod views;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::account_routes())
        .merge(handlers::upload_routes())
}
