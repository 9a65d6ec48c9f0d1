//! Filtered views and income/expense/balance totals derived from the ledger.
//!
//! The filtering and summing here are pure: they can be applied to any
//! sequence of transactions and always produce the same result regardless of
//! input order. The transaction store narrows its SQL query by date and
//! direction and then applies [transaction_matches] for the search text, so
//! the predicate defined here is the single source of truth for what a
//! filter selects.

use axum::{Json, extract::{Query, State}};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    AppState, Error,
    auth::Claims,
    transaction::{Transaction, TransactionKind, list_transactions},
    user::get_user_roles,
};

/// Which transaction directions a filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindFilter {
    /// Match both incomes and expenses.
    #[default]
    All,
    /// Match income transactions only.
    Income,
    /// Match expense transactions only.
    Expense,
}

impl KindFilter {
    /// Whether a transaction of `kind` passes this filter.
    pub fn matches(&self, kind: TransactionKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Income => kind == TransactionKind::Income,
            KindFilter::Expense => kind == TransactionKind::Expense,
        }
    }
}

/// Defines which transactions to include in a listing or summary.
///
/// All present dimensions combine with logical AND. Date bounds are
/// inclusive. The search text matches case-insensitively against either the
/// counterparty or the description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Include transactions on or after this date.
    pub start_date: Option<Date>,
    /// Include transactions on or before this date.
    pub end_date: Option<Date>,
    /// Include transactions of this direction.
    #[serde(default)]
    pub kind: KindFilter,
    /// Include transactions whose counterparty or description contains this
    /// text, ignoring case.
    pub search: Option<String>,
}

/// Whether `transaction` passes every dimension of `filter`.
pub fn transaction_matches(transaction: &Transaction, filter: &TransactionFilter) -> bool {
    if let Some(start_date) = filter.start_date
        && transaction.date < start_date
    {
        return false;
    }

    if let Some(end_date) = filter.end_date
        && transaction.date > end_date
    {
        return false;
    }

    if !filter.kind.matches(transaction.kind) {
        return false;
    }

    if let Some(search) = &filter.search
        && !search.is_empty()
    {
        let needle = search.to_lowercase();
        let in_client_supplier = transaction
            .client_supplier
            .to_lowercase()
            .contains(&needle);
        let in_description = transaction.description.to_lowercase().contains(&needle);

        if !in_client_supplier && !in_description {
            return false;
        }
    }

    true
}

/// Keep the transactions that pass `filter`, preserving their order.
pub fn filter_transactions(
    transactions: Vec<Transaction>,
    filter: &TransactionFilter,
) -> Vec<Transaction> {
    transactions
        .into_iter()
        .filter(|transaction| transaction_matches(transaction, filter))
        .collect()
}

/// Income, expense and balance totals over a set of transactions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    /// The sum of all income amounts.
    pub income: f64,
    /// The sum of all expense amounts.
    pub expense: f64,
    /// `income - expense`.
    pub balance: f64,
}

/// Sum a sequence of transactions into income, expense and balance totals.
///
/// This is a pure fold: the result does not depend on the order of the input,
/// and an empty input yields an all-zero summary.
pub fn summarize<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Summary {
    let mut summary = Summary::default();

    for transaction in transactions {
        match transaction.kind {
            TransactionKind::Income => summary.income += transaction.amount,
            TransactionKind::Expense => summary.expense += transaction.amount,
        }
    }

    summary.balance = summary.income - summary.expense;

    summary
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// A route handler for the income/expense/balance totals over the filtered
/// ledger.
///
/// Requires view access.
pub async fn get_summary_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<Summary>, Error> {
    let connection = state.lock_db()?;
    let roles = get_user_roles(claims.user_id, &connection)?;

    if !roles.can_view() {
        return Err(Error::Unauthorized);
    }

    let transactions = list_transactions(&filter, &roles, &connection)?;

    Ok(Json(summarize(&transactions)))
}

// ============================================================================
// TESTS
// ============================================================================
