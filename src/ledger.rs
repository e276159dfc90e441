//! Invoice ledger: the only component that creates or deletes invoices, and
//! the only writer of product stock and customer `orders`/`total_spent`.
//!
//! Every operation runs in a single `BEGIN IMMEDIATE` transaction, so the
//! multi-document sequences (invoice + items + stock + customer) commit or
//! roll back as one unit. Aggregate arithmetic is delegated to `reconcile`.

use rusqlite::params;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::StoreError;
use crate::events::{ChangeEvent, ChangeKind, Collection};
use crate::models::{Invoice, InvoiceItem, InvoiceStatus, LineRequest};
use crate::reconcile;
use crate::store::{now, today, Store};

/// Build the human-readable invoice code from the monotonic counter.
/// Merged invoices carry an `INV-M` prefix like the dashboard always showed.
fn invoice_code(seq: i64, merged: bool) -> String {
    if merged {
        format!("INV-M{seq:04}")
    } else {
        format!("INV-{seq:04}")
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Create an invoice for `customer_id` from the requested lines.
///
/// Unit prices are snapshotted from the products at call time; stock is
/// decremented per line and the customer's `orders`/`total_spent` advance,
/// all in one transaction. The generated code is unique by construction
/// (counter row advanced inside the same transaction).
pub fn create_invoice(
    store: &Store,
    customer_id: &str,
    lines: &[LineRequest],
) -> Result<Invoice, StoreError> {
    if lines.is_empty() {
        return Err(StoreError::Validation(
            "an invoice needs at least one line item".into(),
        ));
    }
    for line in lines {
        if line.quantity < 1 {
            return Err(StoreError::Validation(format!(
                "quantity must be at least 1 for product {}",
                line.product_id
            )));
        }
    }

    let conn = store.conn()?;
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(Invoice, Vec<ChangeEvent>), StoreError> {
        let customer_name: String = conn
            .query_row(
                "SELECT first_name || ' ' || last_name FROM customers WHERE id = ?1",
                params![customer_id],
                |row| row.get(0),
            )
            .map_err(|_| StoreError::not_found("customer", customer_id))?;

        // Snapshot name/price per line from the current product rows
        let mut items: Vec<InvoiceItem> = Vec::with_capacity(lines.len());
        let mut amount = 0.0;
        for line in lines {
            let (product_name, price): (String, f64) = conn
                .query_row(
                    "SELECT name, price FROM products WHERE id = ?1",
                    params![line.product_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|_| StoreError::not_found("product", &line.product_id))?;
            let subtotal = price * line.quantity as f64;
            amount += subtotal;
            items.push(InvoiceItem {
                id: Uuid::new_v4().to_string(),
                invoice_id: String::new(), // filled below
                product_id: line.product_id.clone(),
                product_name,
                quantity: line.quantity,
                price,
                subtotal,
                created_at: now(),
            });
        }

        let seq = db::next_counter(&conn, "invoice")?;
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            code: invoice_code(seq, false),
            customer_id: customer_id.to_string(),
            customer_name,
            amount,
            status: InvoiceStatus::Unpaid,
            date: today(),
            paid_date: String::new(),
            created_at: now(),
        };

        conn.execute(
            "INSERT INTO invoices (id, code, customer_id, customer_name, amount, status, date, paid_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'unpaid', ?6, '', ?7)",
            params![
                invoice.id,
                invoice.code,
                invoice.customer_id,
                invoice.customer_name,
                invoice.amount,
                invoice.date,
                invoice.created_at,
            ],
        )?;

        let mut events = vec![ChangeEvent::new(
            Collection::Invoices,
            invoice.id.clone(),
            ChangeKind::Created,
        )];

        for item in &mut items {
            item.invoice_id = invoice.id.clone();
            conn.execute(
                "INSERT INTO invoice_items (id, invoice_id, product_id, product_name, quantity, price, subtotal, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    item.id,
                    item.invoice_id,
                    item.product_id,
                    item.product_name,
                    item.quantity,
                    item.price,
                    item.subtotal,
                    item.created_at,
                ],
            )?;
            reconcile::stock_decrement(&conn, &item.product_id, item.quantity)?;

            events.push(ChangeEvent::new(
                Collection::InvoiceItems,
                item.id.clone(),
                ChangeKind::Created,
            ));
            events.push(ChangeEvent::new(
                Collection::Products,
                item.product_id.clone(),
                ChangeKind::Updated,
            ));
        }

        reconcile::customer_invoice_added(&conn, customer_id, amount)?;
        events.push(ChangeEvent::new(
            Collection::Customers,
            customer_id.to_string(),
            ChangeKind::Updated,
        ));

        Ok((invoice, events))
    })();

    match result {
        Ok((invoice, events)) => {
            conn.execute_batch("COMMIT")?;
            drop(conn);
            info!(
                invoice_id = %invoice.id,
                code = %invoice.code,
                customer_id = %customer_id,
                amount = %invoice.amount,
                "Invoice created"
            );
            store.publish_all(events);
            Ok(invoice)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Delete an invoice, restoring each line's stock and reversing the
/// customer's aggregates. Items and stock are settled before the invoice
/// row goes away.
pub fn delete_invoice(store: &Store, invoice_id: &str) -> Result<(), StoreError> {
    let conn = store.conn()?;
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<Vec<ChangeEvent>, StoreError> {
        let (customer_id, amount): (String, f64) = conn
            .query_row(
                "SELECT customer_id, amount FROM invoices WHERE id = ?1",
                params![invoice_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StoreError::not_found("invoice", invoice_id))?;

        let mut item_stmt = conn.prepare(
            "SELECT id, product_id, quantity FROM invoice_items WHERE invoice_id = ?1",
        )?;
        let item_rows: Vec<(String, String, i64)> = item_stmt
            .query_map(params![invoice_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;
        drop(item_stmt);

        let mut events = Vec::new();
        for (item_id, product_id, quantity) in &item_rows {
            reconcile::stock_restore(&conn, product_id, *quantity)?;
            conn.execute("DELETE FROM invoice_items WHERE id = ?1", params![item_id])?;

            events.push(ChangeEvent::new(
                Collection::Products,
                product_id.clone(),
                ChangeKind::Updated,
            ));
            events.push(ChangeEvent::new(
                Collection::InvoiceItems,
                item_id.clone(),
                ChangeKind::Deleted,
            ));
        }

        reconcile::customer_invoice_removed(&conn, &customer_id, amount)?;
        events.push(ChangeEvent::new(
            Collection::Customers,
            customer_id,
            ChangeKind::Updated,
        ));

        conn.execute("DELETE FROM invoices WHERE id = ?1", params![invoice_id])?;
        events.push(ChangeEvent::new(
            Collection::Invoices,
            invoice_id.to_string(),
            ChangeKind::Deleted,
        ));

        Ok(events)
    })();

    match result {
        Ok(events) => {
            conn.execute_batch("COMMIT")?;
            drop(conn);
            info!(invoice_id = %invoice_id, "Invoice deleted");
            store.publish_all(events);
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Mark paid
// ---------------------------------------------------------------------------

/// Administrative override: set the invoice paid with the given date. Does
/// not require payments to cover the amount — that automatic transition
/// belongs to the payment recorder.
pub fn mark_invoice_paid(
    store: &Store,
    invoice_id: &str,
    paid_date: &str,
) -> Result<(), StoreError> {
    {
        let conn = store.conn()?;
        let changed = conn.execute(
            "UPDATE invoices SET status = 'paid', paid_date = ?1 WHERE id = ?2",
            params![paid_date, invoice_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("invoice", invoice_id));
        }
    }

    info!(invoice_id = %invoice_id, paid_date = %paid_date, "Invoice marked paid");
    store.publish(ChangeEvent::new(
        Collection::Invoices,
        invoice_id.to_string(),
        ChangeKind::Updated,
    ));
    Ok(())
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge at least two unpaid invoices of one customer into a single new
/// unpaid invoice carrying the union of their line items.
///
/// The merged invoice takes over the stock its sources already held, so no
/// stock moves in either direction; the customer's `total_spent` is
/// unchanged and `orders` drops by N−1. Item rows are copied (fresh ids)
/// rather than re-requested, which also keeps the original price snapshots.
pub fn merge_invoices(
    store: &Store,
    customer_id: &str,
    invoice_ids: &[String],
) -> Result<Invoice, StoreError> {
    if invoice_ids.len() < 2 {
        return Err(StoreError::Validation(
            "select at least two invoices to merge".into(),
        ));
    }
    let unique: HashSet<&str> = invoice_ids.iter().map(String::as_str).collect();
    if unique.len() != invoice_ids.len() {
        return Err(StoreError::Validation(
            "duplicate invoice ids in merge request".into(),
        ));
    }

    let conn = store.conn()?;
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(Invoice, Vec<ChangeEvent>), StoreError> {
        let customer_name: String = conn
            .query_row(
                "SELECT first_name || ' ' || last_name FROM customers WHERE id = ?1",
                params![customer_id],
                |row| row.get(0),
            )
            .map_err(|_| StoreError::not_found("customer", customer_id))?;

        // Validate every source: exists, owned by the customer, unpaid
        let mut amount = 0.0;
        for id in invoice_ids {
            let (owner, status, code): (String, String, String) = conn
                .query_row(
                    "SELECT customer_id, status, code FROM invoices WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|_| StoreError::not_found("invoice", id))?;
            if owner != customer_id {
                return Err(StoreError::Validation(format!(
                    "invoice {code} belongs to another customer"
                )));
            }
            if status != "unpaid" {
                return Err(StoreError::Validation(format!(
                    "invoice {code} is already paid"
                )));
            }
            let source_amount: f64 = conn.query_row(
                "SELECT amount FROM invoices WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            amount += source_amount;
        }

        // Union of line items, in source order. No aggregation by product:
        // two entries for the same product stay two entries.
        let mut source_items: Vec<InvoiceItem> = Vec::new();
        for id in invoice_ids {
            let mut stmt = conn.prepare(
                "SELECT id, invoice_id, product_id, product_name, quantity, price, subtotal, created_at
                 FROM invoice_items WHERE invoice_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![id], InvoiceItem::from_row)?;
            for row in rows {
                source_items.push(row?);
            }
        }

        let seq = db::next_counter(&conn, "invoice")?;
        let merged = Invoice {
            id: Uuid::new_v4().to_string(),
            code: invoice_code(seq, true),
            customer_id: customer_id.to_string(),
            customer_name,
            amount,
            status: InvoiceStatus::Unpaid,
            date: today(),
            paid_date: String::new(),
            created_at: now(),
        };

        conn.execute(
            "INSERT INTO invoices (id, code, customer_id, customer_name, amount, status, date, paid_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'unpaid', ?6, '', ?7)",
            params![
                merged.id,
                merged.code,
                merged.customer_id,
                merged.customer_name,
                merged.amount,
                merged.date,
                merged.created_at,
            ],
        )?;

        let mut events = vec![ChangeEvent::new(
            Collection::Invoices,
            merged.id.clone(),
            ChangeKind::Created,
        )];

        for item in &source_items {
            let new_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO invoice_items (id, invoice_id, product_id, product_name, quantity, price, subtotal, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new_id,
                    merged.id,
                    item.product_id,
                    item.product_name,
                    item.quantity,
                    item.price,
                    item.subtotal,
                    now(),
                ],
            )?;
            events.push(ChangeEvent::new(
                Collection::InvoiceItems,
                new_id,
                ChangeKind::Created,
            ));
        }

        // Drop the sources without touching stock: the merged invoice now
        // owns the units the sources had already taken.
        for id in invoice_ids {
            conn.execute(
                "DELETE FROM invoice_items WHERE invoice_id = ?1",
                params![id],
            )?;
            conn.execute("DELETE FROM invoices WHERE id = ?1", params![id])?;
            events.push(ChangeEvent::new(
                Collection::Invoices,
                id.clone(),
                ChangeKind::Deleted,
            ));
        }

        reconcile::customer_invoices_merged(&conn, customer_id, invoice_ids.len())?;
        events.push(ChangeEvent::new(
            Collection::Customers,
            customer_id.to_string(),
            ChangeKind::Updated,
        ));

        Ok((merged, events))
    })();

    match result {
        Ok((merged, events)) => {
            conn.execute_batch("COMMIT")?;
            drop(conn);
            info!(
                merged_id = %merged.id,
                code = %merged.code,
                customer_id = %customer_id,
                sources = invoice_ids.len(),
                amount = %merged.amount,
                "Invoices merged"
            );
            store.publish_all(events);
            Ok(merged)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
