//! Error types for the back-office core.
//!
//! Every fallible operation returns `Result<T, StoreError>`. Errors are
//! scoped to the single requested operation; nothing here is fatal to the
//! process and the core never retries on the caller's behalf.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad input: missing customer, empty line items, non-positive payment
    /// amount, fewer than two invoices to merge, quantity over stock.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced id does not resolve to a stored record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Delete blocked by a dependent record (product referenced by an
    /// invoice item, customer with existing invoices).
    #[error("cannot delete: {0}")]
    ReferentialIntegrity(String),

    /// Wallet payment exceeds the customer's balance.
    #[error("insufficient wallet balance: available {available:.2}, requested {requested:.2}")]
    InsufficientBalance { available: f64, requested: f64 },

    /// A multi-step sequence failed after earlier steps already committed.
    /// The completed steps are not rolled back; `completed` reports how many
    /// succeeded before the failure.
    #[error("{operation} failed after {completed} completed step(s): {source}")]
    PartialWrite {
        operation: &'static str,
        completed: usize,
        source: Box<StoreError>,
    },

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem failure while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Wrap a lookup that returned no rows as a `NotFound` with context.
    pub(crate) fn not_found(what: &str, id: &str) -> Self {
        StoreError::NotFound(format!("{what} {id}"))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_failing_record() {
        let err = StoreError::not_found("customer", "cus-42");
        assert_eq!(err.to_string(), "not found: customer cus-42");

        let err = StoreError::InsufficientBalance {
            available: 12.5,
            requested: 40.0,
        };
        assert!(err.to_string().contains("12.50"));
        assert!(err.to_string().contains("40.00"));
    }

    #[test]
    fn test_partial_write_reports_completed_steps() {
        let err = StoreError::PartialWrite {
            operation: "seed demo invoices",
            completed: 2,
            source: Box::new(StoreError::Validation("empty line items".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("seed demo invoices"));
        assert!(msg.contains("2 completed step(s)"));
        assert!(msg.contains("empty line items"));
    }
}
