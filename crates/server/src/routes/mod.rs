mod index;
mod scene;
mod search;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(scene::router())
        .merge(search::router())
        .merge(index::router())
}
