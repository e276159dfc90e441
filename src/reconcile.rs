//! Aggregate reconciliation rules.
//!
//! The derived figures — `products.stock` and `status`, `customers.orders`
//! and `total_spent`, `wallet_balance`, `invoices.status` — move only
//! through the functions here, called from inside a ledger or payment
//! transaction. Nothing else in the crate does aggregate arithmetic, which
//! is what keeps a merge's net stock effect at exactly zero.

use rusqlite::{params, Connection};

use crate::error::StoreError;
use crate::models::LOW_STOCK_THRESHOLD;

/// Tolerance when comparing money sums (REAL columns).
pub(crate) const AMOUNT_EPSILON: f64 = 0.001;

// ---------------------------------------------------------------------------
// Product stock
// ---------------------------------------------------------------------------

/// Take `quantity` units of a product out of stock.
///
/// Re-reads the current stock and fails with `Validation` when the request
/// exceeds it; the stock CHECK constraint backstops the same rule.
pub(crate) fn stock_decrement(
    conn: &Connection,
    product_id: &str,
    quantity: i64,
) -> Result<(), StoreError> {
    let (name, stock): (String, i64) = conn
        .query_row(
            "SELECT name, stock FROM products WHERE id = ?1",
            params![product_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| StoreError::not_found("product", product_id))?;

    if quantity > stock {
        return Err(StoreError::Validation(format!(
            "requested quantity {quantity} exceeds stock {stock} for {name}"
        )));
    }

    conn.execute(
        "UPDATE products SET stock = stock - ?1 WHERE id = ?2",
        params![quantity, product_id],
    )?;
    refresh_product_status(conn, product_id)?;
    Ok(())
}

/// Put `quantity` units of a product back into stock.
pub(crate) fn stock_restore(
    conn: &Connection,
    product_id: &str,
    quantity: i64,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE products SET stock = stock + ?1 WHERE id = ?2",
        params![quantity, product_id],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("product", product_id));
    }
    refresh_product_status(conn, product_id)?;
    Ok(())
}

/// Recompute the derived availability tier from the current stock.
pub(crate) fn refresh_product_status(
    conn: &Connection,
    product_id: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE products SET status = CASE
            WHEN stock <= 0 THEN 'Out of Stock'
            WHEN stock <= ?1 THEN 'Low Stock'
            ELSE 'In Stock'
         END
         WHERE id = ?2",
        params![LOW_STOCK_THRESHOLD, product_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Customer aggregates
// ---------------------------------------------------------------------------

/// Account for a newly created invoice: orders +1, total_spent +amount.
pub(crate) fn customer_invoice_added(
    conn: &Connection,
    customer_id: &str,
    amount: f64,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE customers SET orders = orders + 1, total_spent = total_spent + ?1
         WHERE id = ?2",
        params![amount, customer_id],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("customer", customer_id));
    }
    Ok(())
}

/// Reverse a deleted invoice: orders −1, total_spent −amount.
pub(crate) fn customer_invoice_removed(
    conn: &Connection,
    customer_id: &str,
    amount: f64,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE customers SET orders = orders - 1, total_spent = total_spent - ?1
         WHERE id = ?2",
        params![amount, customer_id],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("customer", customer_id));
    }
    Ok(())
}

/// Account for N invoices collapsing into one: orders −(N−1), total_spent
/// and stock untouched. The merged invoice inherits the stock the source
/// invoices already held, so neither direction of stock movement applies.
pub(crate) fn customer_invoices_merged(
    conn: &Connection,
    customer_id: &str,
    merged_count: usize,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE customers SET orders = orders - ?1 WHERE id = ?2",
        params![(merged_count as i64) - 1, customer_id],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("customer", customer_id));
    }
    Ok(())
}

/// Debit a wallet payment from the customer's balance.
///
/// Fails with `InsufficientBalance` — leaving the balance untouched — when
/// the balance does not cover the amount. Direct adjustments elsewhere may
/// still drive the balance negative (recorded debt); only the payment path
/// is guarded.
pub(crate) fn wallet_debit(
    conn: &Connection,
    customer_id: &str,
    amount: f64,
) -> Result<(), StoreError> {
    let balance: f64 = conn
        .query_row(
            "SELECT wallet_balance FROM customers WHERE id = ?1",
            params![customer_id],
            |row| row.get(0),
        )
        .map_err(|_| StoreError::not_found("customer", customer_id))?;

    if balance < amount {
        return Err(StoreError::InsufficientBalance {
            available: balance,
            requested: amount,
        });
    }

    conn.execute(
        "UPDATE customers SET wallet_balance = wallet_balance - ?1 WHERE id = ?2",
        params![amount, customer_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Invoice status
// ---------------------------------------------------------------------------

/// Flip the invoice to paid when its payments now cover the amount.
///
/// Returns `true` when the status changed. An already-paid invoice stays
/// paid with its original paid date.
pub(crate) fn settle_invoice_if_covered(
    conn: &Connection,
    invoice_id: &str,
    paid_date: &str,
) -> Result<bool, StoreError> {
    let (amount, status): (f64, String) = conn
        .query_row(
            "SELECT amount, status FROM invoices WHERE id = ?1",
            params![invoice_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| StoreError::not_found("invoice", invoice_id))?;

    if status == "paid" {
        return Ok(false);
    }

    let total_paid: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0.0) FROM payments WHERE invoice_id = ?1",
        params![invoice_id],
        |row| row.get(0),
    )?;

    if total_paid + AMOUNT_EPSILON < amount {
        return Ok(false);
    }

    conn.execute(
        "UPDATE invoices SET status = 'paid', paid_date = ?1 WHERE id = ?2",
        params![paid_date, invoice_id],
    )?;
    Ok(true)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        conn
    }

    fn insert_product(conn: &Connection, id: &str, stock: i64) {
        conn.execute(
            "INSERT INTO products (id, name, price, stock, status, created_at)
             VALUES (?1, 'Widget', 10.0, ?2, 'In Stock', datetime('now'))",
            params![id, stock],
        )
        .expect("insert product");
    }

    fn insert_customer(conn: &Connection, id: &str, wallet: f64) {
        conn.execute(
            "INSERT INTO customers (id, first_name, last_name, email, wallet_balance, created_at)
             VALUES (?1, 'Jane', 'Smith', 'jane@example.com', ?2, datetime('now'))",
            params![id, wallet],
        )
        .expect("insert customer");
    }

    fn product_stock_status(conn: &Connection, id: &str) -> (i64, String) {
        conn.query_row(
            "SELECT stock, status FROM products WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("read product")
    }

    #[test]
    fn test_stock_decrement_and_status_tiers() {
        let conn = test_conn();
        insert_product(&conn, "prd-1", 15);

        stock_decrement(&conn, "prd-1", 4).expect("decrement to 11");
        assert_eq!(product_stock_status(&conn, "prd-1"), (11, "In Stock".into()));

        stock_decrement(&conn, "prd-1", 5).expect("decrement to 6");
        assert_eq!(
            product_stock_status(&conn, "prd-1"),
            (6, "Low Stock".into())
        );

        stock_decrement(&conn, "prd-1", 6).expect("decrement to 0");
        assert_eq!(
            product_stock_status(&conn, "prd-1"),
            (0, "Out of Stock".into())
        );
    }

    #[test]
    fn test_stock_decrement_over_stock_fails_and_leaves_stock() {
        let conn = test_conn();
        insert_product(&conn, "prd-1", 5);

        let err = stock_decrement(&conn, "prd-1", 6).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(product_stock_status(&conn, "prd-1").0, 5);
    }

    #[test]
    fn test_stock_restore_refreshes_status() {
        let conn = test_conn();
        insert_product(&conn, "prd-1", 0);
        refresh_product_status(&conn, "prd-1").unwrap();
        assert_eq!(product_stock_status(&conn, "prd-1").1, "Out of Stock");

        stock_restore(&conn, "prd-1", 30).expect("restore");
        assert_eq!(
            product_stock_status(&conn, "prd-1"),
            (30, "In Stock".into())
        );
    }

    #[test]
    fn test_unknown_product_is_not_found() {
        let conn = test_conn();
        assert!(matches!(
            stock_decrement(&conn, "missing", 1).unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            stock_restore(&conn, "missing", 1).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_customer_aggregates_round_trip() {
        let conn = test_conn();
        insert_customer(&conn, "cus-1", 0.0);

        customer_invoice_added(&conn, "cus-1", 120.0).unwrap();
        customer_invoice_added(&conn, "cus-1", 30.0).unwrap();
        customer_invoice_removed(&conn, "cus-1", 30.0).unwrap();

        let (orders, spent): (i64, f64) = conn
            .query_row(
                "SELECT orders, total_spent FROM customers WHERE id = 'cus-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(orders, 1);
        assert!((spent - 120.0).abs() < AMOUNT_EPSILON);
    }

    #[test]
    fn test_merge_adjustment_reduces_orders_only() {
        let conn = test_conn();
        insert_customer(&conn, "cus-1", 0.0);
        customer_invoice_added(&conn, "cus-1", 100.0).unwrap();
        customer_invoice_added(&conn, "cus-1", 50.0).unwrap();
        customer_invoice_added(&conn, "cus-1", 25.0).unwrap();

        customer_invoices_merged(&conn, "cus-1", 3).unwrap();

        let (orders, spent): (i64, f64) = conn
            .query_row(
                "SELECT orders, total_spent FROM customers WHERE id = 'cus-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(orders, 1, "3 invoices merged into 1");
        assert!((spent - 175.0).abs() < AMOUNT_EPSILON, "total_spent unchanged");
    }

    #[test]
    fn test_wallet_debit_guard() {
        let conn = test_conn();
        insert_customer(&conn, "cus-1", 25.0);

        let err = wallet_debit(&conn, "cus-1", 40.0).unwrap_err();
        match err {
            StoreError::InsufficientBalance {
                available,
                requested,
            } => {
                assert!((available - 25.0).abs() < AMOUNT_EPSILON);
                assert!((requested - 40.0).abs() < AMOUNT_EPSILON);
            }
            other => panic!("expected InsufficientBalance, got {other:?}"),
        }

        // Balance untouched after the failed debit
        let balance: f64 = conn
            .query_row(
                "SELECT wallet_balance FROM customers WHERE id = 'cus-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!((balance - 25.0).abs() < AMOUNT_EPSILON);

        wallet_debit(&conn, "cus-1", 25.0).expect("exact-balance debit");
        let balance: f64 = conn
            .query_row(
                "SELECT wallet_balance FROM customers WHERE id = 'cus-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(balance.abs() < AMOUNT_EPSILON);
    }

    #[test]
    fn test_settle_invoice_only_when_covered() {
        let conn = test_conn();
        insert_customer(&conn, "cus-1", 0.0);
        conn.execute(
            "INSERT INTO invoices (id, code, customer_id, customer_name, amount, date, created_at)
             VALUES ('inv-1', 'INV-0001', 'cus-1', 'Jane Smith', 200.0, '2026-08-06', datetime('now'))",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO payments (id, invoice_id, amount, method, date, created_at)
             VALUES ('pay-1', 'inv-1', 150.0, 'cash', '2026-08-06', datetime('now'))",
            [],
        )
        .unwrap();
        assert!(!settle_invoice_if_covered(&conn, "inv-1", "2026-08-06").unwrap());

        conn.execute(
            "INSERT INTO payments (id, invoice_id, amount, method, date, created_at)
             VALUES ('pay-2', 'inv-1', 50.0, 'cash', '2026-08-07', datetime('now'))",
            [],
        )
        .unwrap();
        assert!(settle_invoice_if_covered(&conn, "inv-1", "2026-08-07").unwrap());

        let (status, paid_date): (String, String) = conn
            .query_row(
                "SELECT status, paid_date FROM invoices WHERE id = 'inv-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "paid");
        assert_eq!(paid_date, "2026-08-07");

        // Settling again is a no-op and keeps the original paid date
        assert!(!settle_invoice_if_covered(&conn, "inv-1", "2026-09-01").unwrap());
        let paid_date: String = conn
            .query_row("SELECT paid_date FROM invoices WHERE id = 'inv-1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(paid_date, "2026-08-07");
    }
}
