//! The user and role directory.
//!
//! This module contains everything related to users:
//! - The `User` model and user table functions
//! - Registration with the first-user-becomes-admin bootstrap rule
//! - The administrator-only surface for listing users, replacing a user's
//!   role assignment and removing users
//!
//! Role checks are evaluated in the route handlers and again inside the
//! directory functions so that no caller can reach the database with a role
//! set that was never inspected.

use std::fmt::Display;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use email_address::EmailAddress;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    AppState, Error, PasswordHash,
    auth::Claims,
    db::DatabaseID,
    role::{Role, RoleSet},
};

/// The maximum length of a user's full name in characters.
const FULL_NAME_MAX_CHARS: usize = 100;

// ============================================================================
// MODELS
// ============================================================================

/// A newtype wrapper for integer user IDs.
///
/// This helps disambiguate user IDs from other types of IDs, leading to better
/// compile time errors, and more flexible generics that can have distinct
/// implementations for multiple ID types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserID(i64);

impl UserID {
    /// Create a new user ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the user ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A user of the application.
///
/// The caller should ensure that `id` is unique.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// The user's ID in the application database.
    pub id: UserID,
    /// The user's unique email address.
    pub email: EmailAddress,
    /// The user's password hash.
    pub password_hash: PasswordHash,
    /// The user's display name, if they provided one.
    pub full_name: Option<String>,
    /// When the user registered.
    pub created_at: OffsetDateTime,
}

/// The data needed to create a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// The new user's email address.
    pub email: EmailAddress,
    /// The new user's password hash.
    pub password_hash: PasswordHash,
    /// The new user's display name, if provided.
    pub full_name: Option<String>,
}

/// A user and their assigned role, as reported to administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWithRole {
    /// The user's ID.
    pub id: UserID,
    /// The user's email address.
    pub email: String,
    /// The user's display name, if provided.
    pub full_name: Option<String>,
    /// When the user registered.
    pub created_at: OffsetDateTime,
    /// The user's assigned role.
    pub role: Role,
}

/// A user's own view of their account, returned by registration and `/api/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The user's ID.
    pub id: UserID,
    /// The user's email address.
    pub email: String,
    /// The user's display name, if provided.
    pub full_name: Option<String>,
    /// When the user registered.
    pub created_at: OffsetDateTime,
    /// The roles assigned to the user.
    pub roles: Vec<Role>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create and insert a new user along with their initial role assignment.
///
/// The very first user ever registered receives [Role::Admin]; every
/// subsequent registration receives [Role::ViewOnly]. The user count is read
/// inside the same SQL transaction that inserts the new rows, so two
/// concurrent registrations cannot both observe an empty directory and both
/// become the bootstrap admin.
///
/// # Errors
/// This function will return:
/// - [Error::AlreadyRegistered] if the email is taken,
/// - [Error::SqlError] if an SQL related error occurred.
pub fn register_user(new_user: NewUser, connection: &Connection) -> Result<(User, Role), Error> {
    let tx = connection.unchecked_transaction()?;

    let user_count: i64 = tx.query_row("SELECT COUNT(id) FROM user", [], |row| row.get(0))?;
    let role = if user_count == 0 {
        Role::Admin
    } else {
        Role::ViewOnly
    };

    let created_at = OffsetDateTime::now_utc();
    tx.execute(
        "INSERT INTO user (email, password, full_name, created_at) VALUES (?1, ?2, ?3, ?4)",
        (
            new_user.email.to_string(),
            new_user.password_hash.as_str(),
            &new_user.full_name,
            created_at,
        ),
    )?;
    let id = UserID::new(tx.last_insert_rowid());

    tx.execute(
        "INSERT INTO user_role (user_id, role, created_at) VALUES (?1, ?2, ?3)",
        (id.as_i64(), role, created_at),
    )?;

    tx.commit()?;

    if role == Role::Admin {
        tracing::info!("first user {id} registered, granting the admin role");
    }

    Ok((
        User {
            id,
            email: new_user.email,
            password_hash: new_user.password_hash,
            full_name: new_user.full_name,
            created_at,
        },
        role,
    ))
}

fn map_user_row(row: &Row) -> Result<User, rusqlite::Error> {
    let raw_id = row.get(0)?;
    let raw_email: String = row.get(1)?;
    let raw_password_hash: String = row.get(2)?;
    let full_name = row.get(3)?;
    let created_at = row.get(4)?;

    Ok(User {
        id: UserID::new(raw_id),
        email: EmailAddress::new_unchecked(raw_email),
        password_hash: PasswordHash::new_unchecked(&raw_password_hash),
        full_name,
        created_at,
    })
}

/// Get the user from the database with an ID equal to `user_id`.
///
/// # Errors
/// This function will return an error if:
/// - `user_id` does not belong to a registered user,
/// - there was an error trying to access the store.
pub fn get_user_by_id(user_id: UserID, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare(
            "SELECT id, email, password, full_name, created_at FROM user WHERE id = :id",
        )?
        .query_row(&[(":id", &user_id.as_i64())], map_user_row)
        .map_err(|error| error.into())
}

/// Get the user from the database with an email equal to `email`.
///
/// # Errors
/// This function will return an error if:
/// - `email` does not belong to a registered user,
/// - there was an error trying to access the store.
pub fn get_user_by_email(email: &EmailAddress, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare(
            "SELECT id, email, password, full_name, created_at FROM user WHERE email = :email",
        )?
        .query_row(&[(":email", &email.to_string())], map_user_row)
        .map_err(|error| error.into())
}

/// Get the number of users in the database.
///
/// # Errors
/// Returns a [Error::SqlError] if an SQL related error occurred.
pub fn count_users(connection: &Connection) -> Result<i64, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM user", [], |row| row.get(0))
        .map_err(|error| error.into())
}

/// Resolve the set of roles assigned to `user_id`.
///
/// A user with no role rows yields an empty set, which grants nothing. This
/// is resolved from the database on every request so that role changes take
/// effect immediately, regardless of any token the user still holds.
///
/// # Errors
/// Returns a [Error::SqlError] if an SQL related error occurred.
pub fn get_user_roles(user_id: UserID, connection: &Connection) -> Result<RoleSet, Error> {
    connection
        .prepare("SELECT role FROM user_role WHERE user_id = :user_id")?
        .query_map(&[(":user_id", &user_id.as_i64())], |row| row.get(0))?
        .collect::<Result<RoleSet, _>>()
        .map_err(|error| error.into())
}

/// List all users and their roles, ordered by registration time, most recent
/// first.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not include the admin role,
/// - [Error::SqlError] if an SQL related error occurred.
pub fn list_users(roles: &RoleSet, connection: &Connection) -> Result<Vec<UserWithRole>, Error> {
    if !roles.is_admin() {
        return Err(Error::Unauthorized);
    }

    connection
        .prepare(
            "SELECT u.id, u.email, u.full_name, u.created_at, r.role
             FROM user u
             INNER JOIN user_role r ON r.user_id = u.id
             ORDER BY u.created_at DESC, u.id DESC",
        )?
        .query_map([], |row| {
            Ok(UserWithRole {
                id: UserID::new(row.get(0)?),
                email: row.get(1)?,
                full_name: row.get(2)?,
                created_at: row.get(3)?,
                role: row.get(4)?,
            })
        })?
        .map(|result| result.map_err(Error::SqlError))
        .collect()
}

/// Replace `target`'s role assignment(s) with exactly one row for `new_role`.
///
/// The replacement is a delete-then-insert inside one SQL transaction, so no
/// stale secondary roles can linger. Administrators cannot change their own
/// role through this path: self-targeting is rejected here at the directory
/// layer, not left to the presentation layer, so it cannot be bypassed by a
/// raw API call.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not include the admin role,
/// - [Error::Validation] if `target` is the acting user,
/// - [Error::NotFound] if `target` does not belong to a registered user,
/// - [Error::SqlError] if an SQL related error occurred.
pub fn set_user_role(
    target: UserID,
    new_role: Role,
    acting_user: UserID,
    roles: &RoleSet,
    connection: &Connection,
) -> Result<(), Error> {
    if !roles.is_admin() {
        return Err(Error::Unauthorized);
    }

    if target == acting_user {
        return Err(Error::Validation(
            "administrators cannot change their own role".to_owned(),
        ));
    }

    let tx = connection.unchecked_transaction()?;

    // Confirm the target exists so an unknown ID is reported as NotFound
    // rather than silently inserting an orphaned role row.
    tx.query_row(
        "SELECT id FROM user WHERE id = :id",
        &[(":id", &target.as_i64())],
        |row| row.get::<_, i64>(0),
    )
    .map_err(Error::from)?;

    tx.execute(
        "DELETE FROM user_role WHERE user_id = ?1",
        (target.as_i64(),),
    )?;
    tx.execute(
        "INSERT INTO user_role (user_id, role, created_at) VALUES (?1, ?2, ?3)",
        (target.as_i64(), new_role, OffsetDateTime::now_utc()),
    )?;

    tx.commit()?;

    tracing::info!("user {acting_user} set the role of user {target} to {new_role}");

    Ok(())
}

/// Remove `target` from the directory.
///
/// The user's role assignments and owned transactions are deleted with them
/// via the schema's foreign key cascades. Administrators cannot remove
/// themselves; like [set_user_role], the restriction lives here rather than in
/// the presentation layer.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not include the admin role,
/// - [Error::Validation] if `target` is the acting user,
/// - [Error::NotFound] if `target` does not belong to a registered user,
/// - [Error::SqlError] if an SQL related error occurred.
pub fn remove_user(
    target: UserID,
    acting_user: UserID,
    roles: &RoleSet,
    connection: &Connection,
) -> Result<(), Error> {
    if !roles.is_admin() {
        return Err(Error::Unauthorized);
    }

    if target == acting_user {
        return Err(Error::Validation(
            "administrators cannot remove their own account".to_owned(),
        ));
    }

    let rows_deleted = connection.execute("DELETE FROM user WHERE id = ?1", (target.as_i64(),))?;

    if rows_deleted == 0 {
        return Err(Error::NotFound);
    }

    tracing::info!("user {acting_user} removed user {target}");

    Ok(())
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The request payload for registering a new user.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterForm {
    /// The new user's email address.
    pub email: EmailAddress,
    /// The new user's password.
    pub password: String,
    /// The new user's display name.
    #[serde(default)]
    pub full_name: Option<String>,
}

/// A route handler for registering a new user.
///
/// The first registration ever receives the admin role, every later one
/// starts as view-only.
pub async fn register_endpoint(
    State(state): State<AppState>,
    Json(form): Json<RegisterForm>,
) -> Result<(StatusCode, Json<UserProfile>), Error> {
    if let Some(full_name) = &form.full_name
        && full_name.chars().count() > FULL_NAME_MAX_CHARS
    {
        return Err(Error::Validation(format!(
            "full_name must be at most {FULL_NAME_MAX_CHARS} characters"
        )));
    }

    let password_hash = PasswordHash::from_raw_password(&form.password, PasswordHash::DEFAULT_COST)?;

    let connection = state.lock_db()?;
    let (user, role) = register_user(
        NewUser {
            email: form.email,
            password_hash,
            full_name: form.full_name,
        },
        &connection,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(UserProfile {
            id: user.id,
            email: user.email.to_string(),
            full_name: user.full_name,
            created_at: user.created_at,
            roles: vec![role],
        }),
    ))
}

/// A route handler for listing all users and their roles.
///
/// Requires the admin role.
pub async fn list_users_endpoint(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UserWithRole>>, Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    if !roles.is_admin() {
        return Err(Error::Unauthorized);
    }

    list_users(&roles, &connection).map(Json)
}

/// The request payload for replacing a user's role.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetRoleForm {
    /// The role to assign.
    pub role: Role,
}

/// A route handler for replacing a user's role assignment.
///
/// Requires the admin role. Administrators cannot target themselves.
pub async fn set_user_role_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<DatabaseID>,
    Json(form): Json<SetRoleForm>,
) -> Result<StatusCode, Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    if !roles.is_admin() {
        return Err(Error::Unauthorized);
    }

    set_user_role(
        UserID::new(user_id),
        form.role,
        claims.user_id,
        &roles,
        &connection,
    )?;

    Ok(StatusCode::NO_CONTENT)
}

/// A route handler for removing a user and everything they own.
///
/// Requires the admin role. Administrators cannot target themselves.
pub async fn remove_user_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<DatabaseID>,
) -> Result<StatusCode, Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    if !roles.is_admin() {
        return Err(Error::Unauthorized);
    }

    remove_user(UserID::new(user_id), claims.user_id, &roles, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod directory_tests {
    use email_address::EmailAddress;
    use rusqlite::Connection;

    use crate::{
        Error, PasswordHash,
        db::initialize,
        role::{Role, RoleSet},
    };

    use super::{
        NewUser, UserID, count_users, get_user_by_email, get_user_by_id, get_user_roles,
        list_users, register_user, remove_user, set_user_role,
    };

    fn get_test_connection() -> Connection {
        let connection =
            Connection::open_in_memory().expect("Could not create in-memory SQLite database");
        initialize(&connection).expect("Could not initialize database");

        connection
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: EmailAddress::new_unchecked(email),
            password_hash: PasswordHash::new_unchecked("hunter2"),
            full_name: None,
        }
    }

    #[test]
    fn first_user_becomes_admin() {
        let connection = get_test_connection();

        let (user, role) = register_user(new_user("first@test.com"), &connection).unwrap();

        assert_eq!(role, Role::Admin);
        assert_eq!(
            get_user_roles(user.id, &connection).unwrap(),
            RoleSet::from(Role::Admin)
        );
    }

    #[test]
    fn later_users_become_view_only() {
        let connection = get_test_connection();
        register_user(new_user("first@test.com"), &connection).unwrap();

        let (second, second_role) =
            register_user(new_user("second@test.com"), &connection).unwrap();
        let (third, third_role) = register_user(new_user("third@test.com"), &connection).unwrap();

        assert_eq!(second_role, Role::ViewOnly);
        assert_eq!(third_role, Role::ViewOnly);
        assert_eq!(
            get_user_roles(second.id, &connection).unwrap(),
            RoleSet::from(Role::ViewOnly)
        );
        assert_eq!(
            get_user_roles(third.id, &connection).unwrap(),
            RoleSet::from(Role::ViewOnly)
        );
    }

    #[test]
    fn register_creates_exactly_one_role_row() {
        let connection = get_test_connection();

        let (user, _) = register_user(new_user("first@test.com"), &connection).unwrap();

        let role_rows: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM user_role WHERE user_id = ?1",
                (user.id.as_i64(),),
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(role_rows, 1);
    }

    #[test]
    fn register_fails_on_duplicate_email() {
        let connection = get_test_connection();
        register_user(new_user("taken@test.com"), &connection).unwrap();

        let result = register_user(new_user("taken@test.com"), &connection);

        assert_eq!(result.unwrap_err(), Error::AlreadyRegistered);
        // The failed registration must not leave a partial row behind.
        assert_eq!(count_users(&connection).unwrap(), 1);
    }

    #[test]
    fn count_users_tracks_registrations() {
        let connection = get_test_connection();

        assert_eq!(count_users(&connection).unwrap(), 0);

        register_user(new_user("first@test.com"), &connection).unwrap();
        register_user(new_user("second@test.com"), &connection).unwrap();

        assert_eq!(count_users(&connection).unwrap(), 2);
    }

    #[test]
    fn get_user_by_id_round_trips() {
        let connection = get_test_connection();
        let (want, _) = register_user(new_user("first@test.com"), &connection).unwrap();

        let got = get_user_by_id(want.id, &connection).unwrap();

        assert_eq!(got, want);
    }

    #[test]
    fn get_user_by_email_round_trips() {
        let connection = get_test_connection();
        let (want, _) = register_user(new_user("first@test.com"), &connection).unwrap();

        let got = get_user_by_email(&want.email, &connection).unwrap();

        assert_eq!(got, want);
    }

    #[test]
    fn get_user_fails_with_non_existent_id() {
        let connection = get_test_connection();

        let result = get_user_by_id(UserID::new(42), &connection);

        assert_eq!(result.unwrap_err(), Error::NotFound);
    }

    #[test]
    fn roles_are_empty_for_user_without_assignments() {
        let connection = get_test_connection();
        let (user, _) = register_user(new_user("first@test.com"), &connection).unwrap();
        connection
            .execute("DELETE FROM user_role WHERE user_id = ?1", (user.id.as_i64(),))
            .unwrap();

        let roles = get_user_roles(user.id, &connection).unwrap();

        assert!(!roles.can_view());
    }

    #[test]
    fn list_users_requires_admin() {
        let connection = get_test_connection();
        register_user(new_user("admin@test.com"), &connection).unwrap();

        let result = list_users(&RoleSet::from(Role::Edit), &connection);

        assert_eq!(result.unwrap_err(), Error::Unauthorized);
    }

    #[test]
    fn list_users_orders_most_recent_first() {
        let connection = get_test_connection();
        let (first, _) = register_user(new_user("first@test.com"), &connection).unwrap();
        let (second, _) = register_user(new_user("second@test.com"), &connection).unwrap();
        let (third, _) = register_user(new_user("third@test.com"), &connection).unwrap();

        let listing = list_users(&RoleSet::from(Role::Admin), &connection).unwrap();

        let got_ids: Vec<_> = listing.iter().map(|entry| entry.id).collect();
        assert_eq!(got_ids, vec![third.id, second.id, first.id]);
        assert_eq!(listing[0].role, Role::ViewOnly);
        assert_eq!(listing[2].role, Role::Admin);
    }

    #[test]
    fn set_user_role_replaces_assignment() {
        let connection = get_test_connection();
        let (admin, _) = register_user(new_user("admin@test.com"), &connection).unwrap();
        let (member, _) = register_user(new_user("member@test.com"), &connection).unwrap();

        set_user_role(
            member.id,
            Role::InsertIncome,
            admin.id,
            &RoleSet::from(Role::Admin),
            &connection,
        )
        .unwrap();

        assert_eq!(
            get_user_roles(member.id, &connection).unwrap(),
            RoleSet::from(Role::InsertIncome)
        );

        let role_rows: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM user_role WHERE user_id = ?1",
                (member.id.as_i64(),),
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(role_rows, 1, "replacing a role must not leave stale rows");
    }

    #[test]
    fn set_user_role_requires_admin() {
        let connection = get_test_connection();
        let (admin, _) = register_user(new_user("admin@test.com"), &connection).unwrap();
        let (member, _) = register_user(new_user("member@test.com"), &connection).unwrap();

        let result = set_user_role(
            admin.id,
            Role::ViewOnly,
            member.id,
            &RoleSet::from(Role::Edit),
            &connection,
        );

        assert_eq!(result.unwrap_err(), Error::Unauthorized);
    }

    #[test]
    fn set_user_role_rejects_self_targeting() {
        let connection = get_test_connection();
        let (admin, _) = register_user(new_user("admin@test.com"), &connection).unwrap();

        let result = set_user_role(
            admin.id,
            Role::ViewOnly,
            admin.id,
            &RoleSet::from(Role::Admin),
            &connection,
        );

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(
            get_user_roles(admin.id, &connection).unwrap(),
            RoleSet::from(Role::Admin),
            "a rejected self-demotion must leave the role unchanged"
        );
    }

    #[test]
    fn set_user_role_fails_on_unknown_target() {
        let connection = get_test_connection();
        let (admin, _) = register_user(new_user("admin@test.com"), &connection).unwrap();

        let result = set_user_role(
            UserID::new(999),
            Role::Edit,
            admin.id,
            &RoleSet::from(Role::Admin),
            &connection,
        );

        assert_eq!(result.unwrap_err(), Error::NotFound);
    }

    #[test]
    fn remove_user_cascades_to_roles_and_transactions() {
        let connection = get_test_connection();
        let (admin, _) = register_user(new_user("admin@test.com"), &connection).unwrap();
        let (member, _) = register_user(new_user("member@test.com"), &connection).unwrap();
        connection
            .execute(
                "INSERT INTO transactions
                    (user_id, date, kind, client_supplier, amount, payment_method,
                     created_at, updated_at)
                 VALUES (?1, '2025-01-15', 'income', 'Acme', 100.0, 'cash', 't', 't')",
                (member.id.as_i64(),),
            )
            .unwrap();

        remove_user(member.id, admin.id, &RoleSet::from(Role::Admin), &connection).unwrap();

        assert_eq!(
            get_user_by_id(member.id, &connection).unwrap_err(),
            Error::NotFound
        );
        let role_rows: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM user_role WHERE user_id = ?1",
                (member.id.as_i64(),),
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(role_rows, 0, "role assignments should be deleted with the user");
        let transaction_rows: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
                (member.id.as_i64(),),
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(
            transaction_rows, 0,
            "owned transactions should be deleted with the user"
        );
    }

    #[test]
    fn remove_user_rejects_self_removal() {
        let connection = get_test_connection();
        let (admin, _) = register_user(new_user("admin@test.com"), &connection).unwrap();

        let result = remove_user(admin.id, admin.id, &RoleSet::from(Role::Admin), &connection);

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(count_users(&connection).unwrap(), 1);
    }

    #[test]
    fn remove_user_fails_on_unknown_target() {
        let connection = get_test_connection();
        let (admin, _) = register_user(new_user("admin@test.com"), &connection).unwrap();

        let result = remove_user(
            UserID::new(999),
            admin.id,
            &RoleSet::from(Role::Admin),
            &connection,
        );

        assert_eq!(result.unwrap_err(), Error::NotFound);
    }
}
