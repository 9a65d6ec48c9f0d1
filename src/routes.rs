//! The routes for the JSON API and the functions to build the router.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::{
    AppState,
    auth::{get_current_user_endpoint, sign_in_endpoint},
    summary::get_summary_endpoint,
    transaction::{
        create_transaction_endpoint, delete_transaction_endpoint, get_transactions_endpoint,
        update_transaction_endpoint,
    },
    user::{
        list_users_endpoint, register_endpoint, remove_user_endpoint, set_user_role_endpoint,
    },
};

/// Return the router for the JSON API with all the routes for the
/// application.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/register", post(register_endpoint))
        .route("/api/sign_in", post(sign_in_endpoint))
        .route("/api/me", get(get_current_user_endpoint))
        .route(
            "/api/transactions",
            get(get_transactions_endpoint).post(create_transaction_endpoint),
        )
        .route(
            "/api/transactions/{transaction_id}",
            put(update_transaction_endpoint).delete(delete_transaction_endpoint),
        )
        .route("/api/summary", get(get_summary_endpoint))
        .route("/api/users", get(list_users_endpoint))
        .route("/api/users/{user_id}/role", put(set_user_role_endpoint))
        .route("/api/users/{user_id}", delete(remove_user_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
