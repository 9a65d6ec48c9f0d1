//! The application roles and the permission predicates derived from them.
//!
//! This module is pure: given the set of roles assigned to a user it answers
//! whether an action is allowed. The same predicates are evaluated twice for
//! every request, once in the route handler and once inside the store
//! functions, so a bug in one layer cannot silently widen access.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

/// One of the five roles a user can be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access to transactions and user management.
    Admin,
    /// Read-only access to the ledger.
    ViewOnly,
    /// Can view, insert, edit and delete transactions, but not manage users.
    Edit,
    /// Can view the ledger and insert expense transactions.
    InsertExpenses,
    /// Can view the ledger and insert income transactions.
    InsertIncome,
}

impl Role {
    /// All roles, in the order they are presented to administrators.
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::ViewOnly,
        Role::Edit,
        Role::InsertExpenses,
        Role::InsertIncome,
    ];

    /// The name of the role as stored in the database and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::ViewOnly => "view_only",
            Role::Edit => "edit",
            Role::InsertExpenses => "insert_expenses",
            Role::InsertIncome => "insert_income",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The error returned when a string is not a recognized role name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError(pub String);

impl Display for ParseRoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\" is not a recognized role", self.0)
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "view_only" => Ok(Role::ViewOnly),
            "edit" => Ok(Role::Edit),
            "insert_expenses" => Ok(Role::InsertExpenses),
            "insert_income" => Ok(Role::InsertIncome),
            other => Err(ParseRoleError(other.to_owned())),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

/// The set of roles assigned to a user.
///
/// In practice the directory maintains exactly one role per user, but the
/// predicates are defined over a set so that they stay correct if that ever
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleSet(Vec<Role>);

impl RoleSet {
    /// Create a role set from the given roles, ignoring duplicates.
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut set = Vec::new();

        for role in roles {
            if !set.contains(&role) {
                set.push(role);
            }
        }

        Self(set)
    }

    /// A role set with no roles, which grants nothing.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Whether `role` is in the set.
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// The roles in the set.
    pub fn roles(&self) -> &[Role] {
        &self.0
    }

    /// Any assigned role grants view access to the shared ledger.
    pub fn can_view(&self) -> bool {
        !self.0.is_empty()
    }

    /// Whether the user may modify existing transactions.
    pub fn can_edit(&self) -> bool {
        self.contains(Role::Admin) || self.contains(Role::Edit)
    }

    /// Whether the user may insert expense transactions.
    pub fn can_insert_expense(&self) -> bool {
        self.can_edit() || self.contains(Role::InsertExpenses)
    }

    /// Whether the user may insert income transactions.
    pub fn can_insert_income(&self) -> bool {
        self.can_edit() || self.contains(Role::InsertIncome)
    }

    /// Whether the user may delete transactions.
    pub fn can_delete(&self) -> bool {
        self.can_edit()
    }

    /// Whether the user may manage other users and their roles.
    pub fn is_admin(&self) -> bool {
        self.contains(Role::Admin)
    }
}

impl From<Role> for RoleSet {
    fn from(role: Role) -> Self {
        Self(vec![role])
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod role_tests {
    use super::{Role, RoleSet};

    #[test]
    fn role_names_round_trip() {
        for role in Role::ALL {
            let parsed: Role = role.as_str().parse().expect("Could not parse role name");
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn unknown_role_name_fails_to_parse() {
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn empty_set_grants_nothing() {
        let roles = RoleSet::empty();

        assert!(!roles.can_view());
        assert!(!roles.can_edit());
        assert!(!roles.can_insert_expense());
        assert!(!roles.can_insert_income());
        assert!(!roles.can_delete());
        assert!(!roles.is_admin());
    }

    #[test]
    fn any_role_grants_view() {
        for role in Role::ALL {
            assert!(
                RoleSet::from(role).can_view(),
                "{role} should grant view access"
            );
        }
    }

    #[test]
    fn view_only_grants_nothing_else() {
        let roles = RoleSet::from(Role::ViewOnly);

        assert!(!roles.can_edit());
        assert!(!roles.can_insert_expense());
        assert!(!roles.can_insert_income());
        assert!(!roles.can_delete());
        assert!(!roles.is_admin());
    }

    #[test]
    fn insert_roles_are_direction_specific() {
        let income_only = RoleSet::from(Role::InsertIncome);
        assert!(income_only.can_insert_income());
        assert!(!income_only.can_insert_expense());
        assert!(!income_only.can_edit());

        let expenses_only = RoleSet::from(Role::InsertExpenses);
        assert!(expenses_only.can_insert_expense());
        assert!(!expenses_only.can_insert_income());
        assert!(!expenses_only.can_delete());
    }

    // For all role sets, edit implies delete and both insert directions.
    #[test]
    fn edit_implies_lesser_rights() {
        let mut all_sets = vec![RoleSet::empty()];
        for role in Role::ALL {
            all_sets.push(RoleSet::from(role));
            for other in Role::ALL {
                all_sets.push(RoleSet::new([role, other]));
            }
        }

        for roles in all_sets {
            if roles.can_edit() {
                assert!(roles.can_delete(), "{roles:?} can edit but not delete");
                assert!(
                    roles.can_insert_expense() && roles.can_insert_income(),
                    "{roles:?} can edit but not insert"
                );
            }
        }
    }

    #[test]
    fn admin_grants_everything() {
        let roles = RoleSet::from(Role::Admin);

        assert!(roles.can_view());
        assert!(roles.can_edit());
        assert!(roles.can_insert_expense());
        assert!(roles.can_insert_income());
        assert!(roles.can_delete());
        assert!(roles.is_admin());
    }

    #[test]
    fn duplicate_roles_are_ignored() {
        let roles = RoleSet::new([Role::Edit, Role::Edit, Role::Edit]);

        assert_eq!(roles.roles(), &[Role::Edit]);
    }
}
