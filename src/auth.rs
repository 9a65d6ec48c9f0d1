//! Authentication for the JSON API: signing in with credentials, issuing JSON
//! Web Tokens, and extracting the caller's identity from the bearer header.
//!
//! The token only carries the user's identity. Roles are deliberately not
//! embedded: every request re-resolves the role set from the database, so a
//! demotion takes effect immediately even for tokens issued earlier.

use axum::{
    Json, RequestPartsExt,
    extract::{FromRef, FromRequestParts, State},
    http::request::Parts,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use email_address::EmailAddress;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{
    AppState, Error,
    user::{UserID, UserProfile, get_user_by_email, get_user_by_id, get_user_roles},
};

/// How long an auth token stays valid after being issued.
const TOKEN_DURATION: Duration = Duration::hours(8);

/// The contents of a JSON Web Token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The expiry time of the token as a unix timestamp.
    pub exp: usize,
    /// The time the token was issued as a unix timestamp.
    pub iat: usize,
    /// The ID of the user the token was issued to.
    pub user_id: UserID,
}

impl<S> FromRequestParts<S> for Claims
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::InvalidToken)?;

        let state = AppState::from_ref(state);
        let token_data = decode_jwt(bearer.token(), state.decoding_key())?;

        Ok(token_data.claims)
    }
}

/// The credentials entered during sign-in.
#[derive(Debug, Serialize, Deserialize)]
pub struct Credentials {
    /// Email entered during sign-in.
    pub email: EmailAddress,
    /// Password entered during sign-in.
    pub password: String,
}

/// Encode a signed auth token for `user_id`.
///
/// # Errors
/// Returns [Error::TokenCreation] if the token could not be signed.
pub fn encode_jwt(user_id: UserID, encoding_key: &EncodingKey) -> Result<String, Error> {
    let now = OffsetDateTime::now_utc();
    let claims = Claims {
        exp: (now + TOKEN_DURATION).unix_timestamp() as usize,
        iat: now.unix_timestamp() as usize,
        user_id,
    };

    encode(&Header::default(), &claims, encoding_key).map_err(|error| {
        tracing::error!("could not create auth token: {error}");
        Error::TokenCreation
    })
}

/// Decode and verify an auth token.
///
/// # Errors
/// Returns [Error::InvalidToken] if the token is malformed, has a bad
/// signature, or has expired.
pub fn decode_jwt(token: &str, decoding_key: &DecodingKey) -> Result<TokenData<Claims>, Error> {
    decode(token, decoding_key, &Validation::default()).map_err(|_| Error::InvalidToken)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// A route handler for signing in with email and password.
///
/// Returns a signed bearer token on success.
///
/// # Errors
/// This function will return [Error::InvalidCredentials] if:
/// - the email does not belong to a registered user,
/// - the password is not correct.
///
/// An unknown email and a wrong password are indistinguishable to the caller.
pub async fn sign_in_endpoint(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<String>, Error> {
    let connection = state.lock_db()?;

    let user = get_user_by_email(&credentials.email, &connection).map_err(|error| match error {
        Error::NotFound => Error::InvalidCredentials,
        other => other,
    })?;

    let password_is_correct = user
        .password_hash
        .verify(&credentials.password)
        .map_err(|error| Error::HashingError(error.to_string()))?;

    if !password_is_correct {
        return Err(Error::InvalidCredentials);
    }

    encode_jwt(user.id, state.encoding_key()).map(Json)
}

/// A route handler for getting the signed-in user's profile and roles.
pub async fn get_current_user_endpoint(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UserProfile>, Error> {
    let connection = state.lock_db()?;

    let user = get_user_by_id(claims.user_id, &connection)?;
    let roles = get_user_roles(user.id, &connection)?;

    Ok(Json(UserProfile {
        id: user.id,
        email: user.email.to_string(),
        full_name: user.full_name,
        created_at: user.created_at,
        roles: roles.roles().to_vec(),
    }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod jwt_tests {
    use rusqlite::Connection;

    use crate::{AppState, Error, user::UserID};

    use super::{decode_jwt, encode_jwt};

    fn get_test_state() -> AppState {
        let connection =
            Connection::open_in_memory().expect("Could not open database in memory");

        AppState::new(connection, "foobar").expect("Could not create app state")
    }

    #[test]
    fn decode_jwt_gives_back_user_id() {
        let state = get_test_state();
        let user_id = UserID::new(42);

        let token = encode_jwt(user_id, state.encoding_key()).unwrap();
        let claims = decode_jwt(&token, state.decoding_key()).unwrap().claims;

        assert_eq!(claims.user_id, user_id);
    }

    #[test]
    fn decode_jwt_fails_on_garbage() {
        let state = get_test_state();

        let result = decode_jwt("not.a.token", state.decoding_key());

        assert!(matches!(result, Err(Error::InvalidToken)));
    }

    #[test]
    fn decode_jwt_fails_with_wrong_key() {
        let state = get_test_state();
        let other_state = {
            let connection = Connection::open_in_memory().unwrap();
            AppState::new(connection, "a different secret").unwrap()
        };

        let token = encode_jwt(UserID::new(1), state.encoding_key()).unwrap();
        let result = decode_jwt(&token, other_state.decoding_key());

        assert!(matches!(result, Err(Error::InvalidToken)));
    }
}
