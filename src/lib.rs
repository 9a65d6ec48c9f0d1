//! Fluxo is a small multi-user cash-flow ledger.
//!
//! This library provides a JSON REST API for recording income and expense
//! transactions into a shared ledger. Access is controlled by a handful of
//! roles: administrators manage the user directory, editors can change
//! anything in the ledger, and the insert roles grant recording a single
//! direction of cash flow.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;

mod app_state;
pub mod auth;
mod db;
mod error;
pub mod password;
pub mod role;
mod routes;
pub mod summary;
pub mod transaction;
pub mod user;

pub use app_state::AppState;
pub use db::{DatabaseID, initialize as initialize_db};
pub use error::Error;
pub use password::{PasswordHash, ValidatedPassword};
pub use routes::build_router;

/// An async task that waits for either the ctrl+c or terminate signal,
/// whichever comes first, and then signals the server to shut down
/// gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}
