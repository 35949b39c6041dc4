use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/v1/reaper/sweep", post(routes::sweep))
        .route("/v1/payments/mismatches", get(routes::amount_mismatches))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
