//! The ledger itself: cash-flow transactions and the operations on them.
//!
//! This file defines the transaction model, its validation rules, the SQL
//! functions for creating, listing, updating and deleting transactions, and
//! the route handlers for the transactions API.
//!
//! Every store function takes the caller's [RoleSet] and re-checks the
//! relevant permission predicate even though the route handlers already gate
//! on it. A caller that bypasses the HTTP layer still cannot bypass the
//! access rules.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rusqlite::{
    Connection, Row, params, params_from_iter,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    AppState, Error,
    auth::Claims,
    db::DatabaseID,
    role::RoleSet,
    summary::{KindFilter, TransactionFilter, filter_transactions},
    user::{UserID, get_user_roles},
};

/// The maximum length of a transaction's counterparty name in characters.
pub const CLIENT_SUPPLIER_MAX_CHARS: usize = 100;

/// The maximum length of a transaction's description in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 500;

// ============================================================================
// MODELS
// ============================================================================

/// Whether a transaction is money coming in or going out.
///
/// The direction is encoded solely by this field. Amounts are always
/// positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money coming in.
    Income,
    /// Money going out.
    Expense,
}

impl TransactionKind {
    /// The name stored in the database and used in the JSON API.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }
}

impl ToSql for TransactionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "income" => Ok(TransactionKind::Income),
            "expense" => Ok(TransactionKind::Expense),
            other => Err(FromSqlError::Other(
                format!("invalid transaction kind {other:?}").into(),
            )),
        }
    }
}

/// How a transaction was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Paid in cash.
    Cash,
    /// Paid by instant bank transfer.
    InstantTransfer,
    /// Paid by credit card.
    CreditCard,
    /// Paid by debit card.
    DebitCard,
    /// Paid by ordinary wire transfer.
    WireTransfer,
    /// Paid by bill of exchange.
    BillOfExchange,
    /// Paid by cheque.
    Check,
    /// Paid some other way.
    Other,
}

impl PaymentMethod {
    /// The name stored in the database and used in the JSON API.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::InstantTransfer => "instant_transfer",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::WireTransfer => "wire_transfer",
            PaymentMethod::BillOfExchange => "bill_of_exchange",
            PaymentMethod::Check => "check",
            PaymentMethod::Other => "other",
        }
    }
}

impl ToSql for PaymentMethod {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PaymentMethod {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "cash" => Ok(PaymentMethod::Cash),
            "instant_transfer" => Ok(PaymentMethod::InstantTransfer),
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "debit_card" => Ok(PaymentMethod::DebitCard),
            "wire_transfer" => Ok(PaymentMethod::WireTransfer),
            "bill_of_exchange" => Ok(PaymentMethod::BillOfExchange),
            "check" => Ok(PaymentMethod::Check),
            "other" => Ok(PaymentMethod::Other),
            other => Err(FromSqlError::Other(
                format!("invalid payment method {other:?}").into(),
            )),
        }
    }
}

/// A cash-flow transaction recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: DatabaseID,
    /// The ID of the user who recorded the transaction.
    pub user_id: UserID,
    /// The date the transaction took place. This is a calendar date with no
    /// time component.
    pub date: Date,
    /// Whether the transaction is an income or an expense.
    pub kind: TransactionKind,
    /// The counterparty: the client paying or the supplier being paid.
    pub client_supplier: String,
    /// The amount of money involved. Always positive, the direction comes
    /// from `kind`.
    pub amount: f64,
    /// A free-text note about the transaction. May be empty.
    pub description: String,
    /// How the transaction was paid.
    pub payment_method: PaymentMethod,
    /// When the record was created.
    pub created_at: OffsetDateTime,
    /// When the record was last modified.
    pub updated_at: OffsetDateTime,
}

/// The data for a new transaction before it has been recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionData {
    /// The date the transaction took place.
    pub date: Date,
    /// Whether the transaction is an income or an expense.
    pub kind: TransactionKind,
    /// The counterparty: the client paying or the supplier being paid.
    pub client_supplier: String,
    /// The amount of money involved.
    pub amount: f64,
    /// A free-text note about the transaction.
    #[serde(default)]
    pub description: String,
    /// How the transaction was paid.
    pub payment_method: PaymentMethod,
}

/// A partial update to an existing transaction.
///
/// Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateTransaction {
    /// The new date, if it should change.
    pub date: Option<Date>,
    /// The new direction, if it should change.
    pub kind: Option<TransactionKind>,
    /// The new counterparty, if it should change.
    pub client_supplier: Option<String>,
    /// The new amount, if it should change.
    pub amount: Option<f64>,
    /// The new description, if it should change.
    pub description: Option<String>,
    /// The new payment method, if it should change.
    pub payment_method: Option<PaymentMethod>,
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Check that `amount` is positive and has at most two decimal places.
fn validate_amount(amount: f64) -> Result<(), Error> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::Validation(
            "amount must be greater than zero".to_owned(),
        ));
    }

    // Two decimal places, allowing for the noise of float arithmetic.
    let cents = amount * 100.0;
    if (cents - cents.round()).abs() > 1e-6 {
        return Err(Error::Validation(
            "amount must have at most two decimal places".to_owned(),
        ));
    }

    Ok(())
}

/// Check that the counterparty name is between 1 and 100 characters.
fn validate_client_supplier(client_supplier: &str) -> Result<(), Error> {
    let char_count = client_supplier.chars().count();

    if char_count == 0 {
        return Err(Error::Validation(
            "client_supplier must not be empty".to_owned(),
        ));
    }

    if char_count > CLIENT_SUPPLIER_MAX_CHARS {
        return Err(Error::Validation(format!(
            "client_supplier must be at most {CLIENT_SUPPLIER_MAX_CHARS} characters"
        )));
    }

    Ok(())
}

/// Check that the description is at most 500 characters.
fn validate_description(description: &str) -> Result<(), Error> {
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(Error::Validation(format!(
            "description must be at most {DESCRIPTION_MAX_CHARS} characters"
        )));
    }

    Ok(())
}

fn validate_transaction_data(data: &TransactionData) -> Result<(), Error> {
    validate_amount(data.amount)?;
    validate_client_supplier(&data.client_supplier)?;
    validate_description(&data.description)
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get("id")?,
        user_id: UserID::new(row.get("user_id")?),
        date: row.get("date")?,
        kind: row.get("kind")?,
        client_supplier: row.get("client_supplier")?,
        amount: row.get("amount")?,
        description: row.get("description")?,
        payment_method: row.get("payment_method")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Record a new transaction owned by `user_id`.
///
/// The caller needs the insert right matching the transaction's direction.
/// [RoleSet::can_edit] implies both directions.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not grant inserting `data.kind`,
/// - [Error::Validation] if the amount, counterparty or description is
///   invalid,
/// - [Error::SqlError] if there is an SQL error.
pub fn create_transaction(
    data: TransactionData,
    user_id: UserID,
    roles: &RoleSet,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let authorized = match data.kind {
        TransactionKind::Income => roles.can_insert_income(),
        TransactionKind::Expense => roles.can_insert_expense(),
    };

    if !authorized {
        return Err(Error::Unauthorized);
    }

    validate_transaction_data(&data)?;

    let now = OffsetDateTime::now_utc();

    connection.execute(
        "INSERT INTO transactions
            (user_id, date, kind, client_supplier, amount, description,
             payment_method, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user_id.as_i64(),
            data.date,
            data.kind,
            data.client_supplier,
            data.amount,
            data.description,
            data.payment_method,
            now,
            now,
        ],
    )?;

    let id = connection.last_insert_rowid();

    Ok(Transaction {
        id,
        user_id,
        date: data.date,
        kind: data.kind,
        client_supplier: data.client_supplier,
        amount: data.amount,
        description: data.description,
        payment_method: data.payment_method,
        created_at: now,
        updated_at: now,
    })
}

/// Retrieve the transaction with the given `id`.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not grant view access,
/// - [Error::NotFound] if there is no transaction with that ID,
/// - [Error::SqlError] if there is an SQL error.
pub fn get_transaction(
    id: DatabaseID,
    roles: &RoleSet,
    connection: &Connection,
) -> Result<Transaction, Error> {
    if !roles.can_view() {
        return Err(Error::Unauthorized);
    }

    let transaction = connection.query_row(
        "SELECT id, user_id, date, kind, client_supplier, amount, description,
                payment_method, created_at, updated_at
         FROM transactions
         WHERE id = ?1",
        params![id],
        map_transaction_row,
    )?;

    Ok(transaction)
}

/// Retrieve the transactions that pass `filter`, most recent first.
///
/// The ledger is shared: every viewer sees all users' transactions. The
/// result is ordered by date, then creation time, then ID, all descending.
/// The date bounds and direction are narrowed in SQL; the search text is
/// applied through [crate::summary::transaction_matches] afterwards, so a
/// listing and the pure filter always select the same transactions. SQL
/// string matching (LIKE wildcards, ASCII-only LOWER) must not leak into
/// the search semantics.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not grant view access,
/// - [Error::SqlError] if there is an SQL error.
pub fn list_transactions(
    filter: &TransactionFilter,
    roles: &RoleSet,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    if !roles.can_view() {
        return Err(Error::Unauthorized);
    }

    let mut clauses = Vec::new();
    let mut parameters: Vec<Value> = Vec::new();

    if let Some(start_date) = filter.start_date {
        clauses.push("date >= ?");
        parameters.push(Value::Text(start_date.to_string()));
    }

    if let Some(end_date) = filter.end_date {
        clauses.push("date <= ?");
        parameters.push(Value::Text(end_date.to_string()));
    }

    match filter.kind {
        KindFilter::All => {}
        KindFilter::Income => {
            clauses.push("kind = ?");
            parameters.push(Value::Text(TransactionKind::Income.as_str().to_owned()));
        }
        KindFilter::Expense => {
            clauses.push("kind = ?");
            parameters.push(Value::Text(TransactionKind::Expense.as_str().to_owned()));
        }
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut statement = connection.prepare(&format!(
        "SELECT id, user_id, date, kind, client_supplier, amount, description,
                payment_method, created_at, updated_at
         FROM transactions
         {where_clause}
         ORDER BY date DESC, created_at DESC, id DESC"
    ))?;

    let transactions = statement
        .query_map(params_from_iter(parameters), map_transaction_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(filter_transactions(transactions, filter))
}

/// Apply a partial update to the transaction with the given `id`.
///
/// Requires edit access. Changing the direction does not require the
/// matching insert right, since edit access already implies both.
///
/// Fields that are present are validated before anything is written, so a
/// rejected update leaves the stored transaction untouched.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not grant edit access,
/// - [Error::NotFound] if there is no transaction with that ID,
/// - [Error::Validation] if a present field is invalid,
/// - [Error::SqlError] if there is an SQL error.
pub fn update_transaction(
    id: DatabaseID,
    changes: UpdateTransaction,
    roles: &RoleSet,
    connection: &Connection,
) -> Result<Transaction, Error> {
    if !roles.can_edit() {
        return Err(Error::Unauthorized);
    }

    let mut transaction = connection.query_row(
        "SELECT id, user_id, date, kind, client_supplier, amount, description,
                payment_method, created_at, updated_at
         FROM transactions
         WHERE id = ?1",
        params![id],
        map_transaction_row,
    )?;

    if let Some(amount) = changes.amount {
        validate_amount(amount)?;
        transaction.amount = amount;
    }

    if let Some(client_supplier) = changes.client_supplier {
        validate_client_supplier(&client_supplier)?;
        transaction.client_supplier = client_supplier;
    }

    if let Some(description) = changes.description {
        validate_description(&description)?;
        transaction.description = description;
    }

    if let Some(date) = changes.date {
        transaction.date = date;
    }

    if let Some(kind) = changes.kind {
        transaction.kind = kind;
    }

    if let Some(payment_method) = changes.payment_method {
        transaction.payment_method = payment_method;
    }

    transaction.updated_at = OffsetDateTime::now_utc();

    connection.execute(
        "UPDATE transactions
         SET date = ?1, kind = ?2, client_supplier = ?3, amount = ?4,
             description = ?5, payment_method = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            transaction.date,
            transaction.kind,
            transaction.client_supplier,
            transaction.amount,
            transaction.description,
            transaction.payment_method,
            transaction.updated_at,
            id,
        ],
    )?;

    Ok(transaction)
}

/// Delete the transaction with the given `id`.
///
/// # Errors
/// This function will return:
/// - [Error::Unauthorized] if `roles` does not grant delete access,
/// - [Error::NotFound] if there is no transaction with that ID,
/// - [Error::SqlError] if there is an SQL error.
pub fn delete_transaction(
    id: DatabaseID,
    roles: &RoleSet,
    connection: &Connection,
) -> Result<(), Error> {
    if !roles.can_delete() {
        return Err(Error::Unauthorized);
    }

    let rows_deleted =
        connection.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;

    if rows_deleted == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// A route handler for listing transactions, most recent first.
///
/// Filter dimensions are passed as query parameters. Requires view access.
pub async fn get_transactions_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<Vec<Transaction>>, Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    if !roles.can_view() {
        return Err(Error::Unauthorized);
    }

    list_transactions(&filter, &roles, &connection).map(Json)
}

/// A route handler for recording a new transaction.
///
/// Requires the insert right matching the transaction's direction.
pub async fn create_transaction_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Json(data): Json<TransactionData>,
) -> Result<(StatusCode, Json<Transaction>), Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    let authorized = match data.kind {
        TransactionKind::Income => roles.can_insert_income(),
        TransactionKind::Expense => roles.can_insert_expense(),
    };

    if !authorized {
        return Err(Error::Unauthorized);
    }

    let transaction = create_transaction(data, claims.user_id, &roles, &connection)?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// A route handler for modifying an existing transaction.
///
/// Requires edit access.
pub async fn update_transaction_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(transaction_id): Path<DatabaseID>,
    Json(changes): Json<UpdateTransaction>,
) -> Result<Json<Transaction>, Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    if !roles.can_edit() {
        return Err(Error::Unauthorized);
    }

    update_transaction(transaction_id, changes, &roles, &connection).map(Json)
}

/// A route handler for deleting a transaction.
///
/// Requires delete access.
pub async fn delete_transaction_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(transaction_id): Path<DatabaseID>,
) -> Result<StatusCode, Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    if !roles.can_delete() {
        return Err(Error::Unauthorized);
    }

    delete_transaction(transaction_id, &roles, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// TESTS
// ============================================================================
