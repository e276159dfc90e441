//! Payment recorder.
//!
//! Appends payments to an invoice, debiting the customer's wallet when that
//! method is chosen, and flips the invoice to paid once the recorded
//! payments cover its amount. Payments are append-only; there is no edit,
//! refund or void path.

use rusqlite::params;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{ChangeEvent, ChangeKind, Collection};
use crate::models::{NewPayment, Payment, PaymentMethod};
use crate::reconcile;
use crate::store::{now, Store};

/// Record a payment against an invoice.
///
/// Wallet payments check and debit the customer's balance in the same
/// transaction as the payment insert, so a failed debit leaves no trace.
/// When the running total reaches the invoice amount the invoice flips to
/// paid with `paid_date` set to this payment's date.
pub fn add_payment(store: &Store, new: NewPayment) -> Result<Payment, StoreError> {
    if new.amount <= 0.0 {
        return Err(StoreError::Validation(
            "payment amount must be positive".into(),
        ));
    }

    let conn = store.conn()?;
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(Payment, bool, Vec<ChangeEvent>), StoreError> {
        let customer_id: String = conn
            .query_row(
                "SELECT customer_id FROM invoices WHERE id = ?1",
                params![new.invoice_id],
                |row| row.get(0),
            )
            .map_err(|_| StoreError::not_found("invoice", &new.invoice_id))?;

        let mut events = Vec::new();

        if new.method == PaymentMethod::Wallet {
            reconcile::wallet_debit(&conn, &customer_id, new.amount)?;
            events.push(ChangeEvent::new(
                Collection::Customers,
                customer_id.clone(),
                ChangeKind::Updated,
            ));
        }

        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            invoice_id: new.invoice_id.clone(),
            amount: new.amount,
            method: new.method,
            reference: new.reference.clone(),
            notes: new.notes.clone(),
            date: new.date.clone(),
            created_at: now(),
        };

        conn.execute(
            "INSERT INTO payments (id, invoice_id, amount, method, reference, notes, date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                payment.id,
                payment.invoice_id,
                payment.amount,
                payment.method.as_str(),
                payment.reference,
                payment.notes,
                payment.date,
                payment.created_at,
            ],
        )?;
        events.push(ChangeEvent::new(
            Collection::Payments,
            payment.id.clone(),
            ChangeKind::Created,
        ));

        let settled =
            reconcile::settle_invoice_if_covered(&conn, &new.invoice_id, &payment.date)?;
        if settled {
            events.push(ChangeEvent::new(
                Collection::Invoices,
                new.invoice_id.clone(),
                ChangeKind::Updated,
            ));
        }

        Ok((payment, settled, events))
    })();

    match result {
        Ok((payment, settled, events)) => {
            conn.execute_batch("COMMIT")?;
            drop(conn);
            info!(
                payment_id = %payment.id,
                invoice_id = %payment.invoice_id,
                method = %payment.method.as_str(),
                amount = %payment.amount,
                settled = settled,
                "Payment recorded"
            );
            store.publish_all(events);
            Ok(payment)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Sum of all payments recorded against an invoice.
pub fn total_paid(store: &Store, invoice_id: &str) -> Result<f64, StoreError> {
    let conn = store.conn()?;
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0.0) FROM payments WHERE invoice_id = ?1",
        params![invoice_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

// ===========================================================================
// Tests
// ===========================================================================
