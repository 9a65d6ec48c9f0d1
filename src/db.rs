//! Database initialization for the application's SQLite schema.

use rusqlite::Connection;

use crate::Error;

/// An alias for the integer type used for database row IDs.
pub type DatabaseID = i64;

/// Initialize the database with the tables for the domain models.
///
/// The schema repeats the core invariants as CHECK constraints so that the
/// database rejects rows that the application layer should already have
/// refused: amounts must be positive and enum columns only accept their
/// closed set of values.
///
/// # Errors
/// Returns an [Error::SqlError] if the tables could not be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    // Foreign keys drive the delete cascades from user to role assignments
    // and owned transactions.
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT UNIQUE NOT NULL,
                password TEXT NOT NULL,
                full_name TEXT,
                created_at TEXT NOT NULL
                )",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS user_role (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN
                    ('admin', 'view_only', 'edit', 'insert_expenses', 'insert_income')),
                created_at TEXT NOT NULL,
                UNIQUE (user_id, role)
                )",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
                date TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
                client_supplier TEXT NOT NULL,
                amount REAL NOT NULL CHECK (amount > 0),
                description TEXT NOT NULL DEFAULT '',
                payment_method TEXT NOT NULL CHECK (payment_method IN
                    ('cash', 'instant_transfer', 'credit_card', 'debit_card',
                     'wire_transfer', 'bill_of_exchange', 'check', 'other')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}
