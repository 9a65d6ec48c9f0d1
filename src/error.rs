//! Defines the app level error type and its conversion to JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The acting user's role set does not permit the attempted operation.
    ///
    /// This must never be downgraded to an empty result: a caller without view
    /// rights gets this error, not an empty list.
    #[error("the current user is not permitted to perform this action")]
    Unauthorized,

    /// The request payload failed validation. The message explains which field
    /// was rejected and why.
    #[error("{0}")]
    Validation(String),

    /// The requested resource was not found.
    ///
    /// The client should check that the parameters (e.g., ID) are correct and
    /// that the resource has not already been deleted.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The email address is already taken by a registered user.
    #[error("a user with this email address is already registered")]
    AlreadyRegistered,

    /// The email and password combination did not match a registered user.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    TooWeak(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    /// Clients receive a generic internal error instead.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// A JSON Web Token could not be created.
    #[error("could not create auth token")]
    TokenCreation,

    /// The bearer token in the request is missing, malformed or expired.
    #[error("invalid or expired auth token")]
    InvalidToken,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl Error {
    /// The machine-readable error kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthorized => "unauthorized",
            Error::Validation(_) | Error::TooWeak(_) => "validation_error",
            Error::NotFound => "not_found",
            Error::AlreadyRegistered => "already_registered",
            Error::InvalidCredentials | Error::InvalidToken => "invalid_credentials",
            Error::HashingError(_)
            | Error::TokenCreation
            | Error::SqlError(_)
            | Error::DatabaseLockError => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::FORBIDDEN,
            Error::Validation(_) | Error::TooWeak(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::AlreadyRegistered => StatusCode::CONFLICT,
            Error::InvalidCredentials | Error::InvalidToken => StatusCode::UNAUTHORIZED,
            Error::HashingError(_)
            | Error::TokenCreation
            | Error::SqlError(_)
            | Error::DatabaseLockError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("user.email") =>
            {
                Error::AlreadyRegistered
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {error}");
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the server logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("an unexpected error occurred: {self}");
            "an internal error occurred".to_owned()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
