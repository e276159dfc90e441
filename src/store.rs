//! Entity store: typed accessors over the five collections plus the demo
//! bootstrap.
//!
//! [`Store`] owns the SQLite connection and the change-event bus and is
//! injected into the ledger and payment recorder. Purely storage: the
//! business rules for stock, customer aggregates and invoice status live in
//! `ledger`, `payments` and `reconcile`, never here. The two delete guards
//! (product referenced by a line item, customer with invoices) are the one
//! piece of cross-collection knowledge this module carries.

use std::path::Path;
use std::sync::MutexGuard;

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::StoreError;
use crate::events::{ChangeEvent, ChangeKind, Collection, EventBus};
use crate::ledger;
use crate::models::{
    Customer, CustomerPatch, Invoice, InvoiceItem, LineRequest, NewCustomer, NewProduct, Payment,
    Product, ProductPatch, ProductStatus,
};

/// Shared handle over the database and event bus.
pub struct Store {
    pub(crate) db: DbState,
    pub(crate) events: EventBus,
}

/// Current UTC instant as an RFC 3339 string (the `created_at` format).
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Today's date as YYYY-MM-DD (the invoice/payment date format).
pub(crate) fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

impl Store {
    /// Open (or create) the database under `data_dir` and run migrations.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        Ok(Store {
            db: db::init(data_dir)?,
            events: EventBus::new(),
        })
    }

    /// Open an in-memory store (tests, demos).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Store {
            db: db::init_in_memory()?,
            events: EventBus::new(),
        })
    }

    /// Subscribe to entity-change events. See [`crate::events`] for the
    /// delivery contract.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        self.events.publish(event);
    }

    pub(crate) fn publish_all(&self, events: Vec<ChangeEvent>) {
        self.events.publish_all(events);
    }

    // -----------------------------------------------------------------------
    // Products
    // -----------------------------------------------------------------------

    pub fn add_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        if new.name.trim().is_empty() {
            return Err(StoreError::Validation("product name is required".into()));
        }
        if new.price < 0.0 {
            return Err(StoreError::Validation("price must not be negative".into()));
        }
        if new.stock < 0 {
            return Err(StoreError::Validation("stock must not be negative".into()));
        }

        let product = Product {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            price: new.price,
            stock: new.stock,
            status: ProductStatus::from_stock(new.stock),
            description: new.description,
            image: new.image,
            created_at: now(),
        };

        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO products (id, name, price, stock, status, description, image, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    product.id,
                    product.name,
                    product.price,
                    product.stock,
                    product.status.as_str(),
                    product.description,
                    product.image,
                    product.created_at,
                ],
            )?;
        }

        info!(product_id = %product.id, name = %product.name, "Product added");
        self.publish(ChangeEvent::new(
            Collection::Products,
            product.id.clone(),
            ChangeKind::Created,
        ));
        Ok(product)
    }

    pub fn get_product(&self, id: &str) -> Result<Product, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, price, stock, status, description, image, created_at
             FROM products WHERE id = ?1",
            params![id],
            Product::from_row,
        )
        .map_err(|_| StoreError::not_found("product", id))
    }

    pub fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, price, stock, status, description, image, created_at
             FROM products ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], Product::from_row)?;
        collect_rows(rows, "product")
    }

    /// Products running low: stock in (0, threshold], lowest first.
    pub fn low_stock_products(&self, threshold: i64) -> Result<Vec<Product>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, price, stock, status, description, image, created_at
             FROM products WHERE stock > 0 AND stock <= ?1 ORDER BY stock",
        )?;
        let rows = stmt.query_map(params![threshold], Product::from_row)?;
        collect_rows(rows, "product")
    }

    /// Merge the provided fields into the product. Stock edits re-derive the
    /// availability status.
    pub fn update_product(&self, id: &str, patch: &ProductPatch) -> Result<Product, StoreError> {
        if let Some(price) = patch.price {
            if price < 0.0 {
                return Err(StoreError::Validation("price must not be negative".into()));
            }
        }
        if let Some(stock) = patch.stock {
            if stock < 0 {
                return Err(StoreError::Validation("stock must not be negative".into()));
            }
        }

        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE products SET
                    name = COALESCE(?1, name),
                    price = COALESCE(?2, price),
                    stock = COALESCE(?3, stock),
                    description = COALESCE(?4, description),
                    image = COALESCE(?5, image)
                 WHERE id = ?6",
                params![
                    patch.name,
                    patch.price,
                    patch.stock,
                    patch.description,
                    patch.image,
                    id
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("product", id));
            }
            if patch.stock.is_some() {
                crate::reconcile::refresh_product_status(&conn, id)?;
            }
        }

        self.publish(ChangeEvent::new(
            Collection::Products,
            id.to_string(),
            ChangeKind::Updated,
        ));
        self.get_product(id)
    }

    /// Delete a product, refusing while any invoice line item references it.
    pub fn delete_product(&self, id: &str) -> Result<(), StoreError> {
        {
            let conn = self.conn()?;
            let references: i64 = conn.query_row(
                "SELECT COUNT(*) FROM invoice_items WHERE product_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if references > 0 {
                return Err(StoreError::ReferentialIntegrity(format!(
                    "product {id} is used by {references} invoice item(s)"
                )));
            }
            let changed = conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::not_found("product", id));
            }
        }

        info!(product_id = %id, "Product deleted");
        self.publish(ChangeEvent::new(
            Collection::Products,
            id.to_string(),
            ChangeKind::Deleted,
        ));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Customers
    // -----------------------------------------------------------------------

    /// Add a customer. The `orders`/`total_spent` counters always start at
    /// zero regardless of input; only the ledger moves them afterwards.
    pub fn add_customer(&self, new: NewCustomer) -> Result<Customer, StoreError> {
        if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
            return Err(StoreError::Validation("customer name is required".into()));
        }
        if new.email.trim().is_empty() {
            return Err(StoreError::Validation("customer email is required".into()));
        }

        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
            email: new.email.trim().to_string(),
            phone: new.phone,
            address: new.address,
            orders: 0,
            total_spent: 0.0,
            wallet_balance: new.wallet_balance,
            created_at: now(),
        };

        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO customers (id, first_name, last_name, email, phone, address,
                                        orders, total_spent, wallet_balance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?8)",
                params![
                    customer.id,
                    customer.first_name,
                    customer.last_name,
                    customer.email,
                    customer.phone,
                    customer.address,
                    customer.wallet_balance,
                    customer.created_at,
                ],
            )?;
        }

        info!(customer_id = %customer.id, email = %customer.email, "Customer added");
        self.publish(ChangeEvent::new(
            Collection::Customers,
            customer.id.clone(),
            ChangeKind::Created,
        ));
        Ok(customer)
    }

    pub fn get_customer(&self, id: &str) -> Result<Customer, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, first_name, last_name, email, phone, address,
                    orders, total_spent, wallet_balance, created_at
             FROM customers WHERE id = ?1",
            params![id],
            Customer::from_row,
        )
        .map_err(|_| StoreError::not_found("customer", id))
    }

    pub fn list_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, first_name, last_name, email, phone, address,
                    orders, total_spent, wallet_balance, created_at
             FROM customers ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], Customer::from_row)?;
        collect_rows(rows, "customer")
    }

    /// Merge the provided contact fields into the customer. The aggregate
    /// counters and wallet balance are not reachable from here.
    pub fn update_customer(&self, id: &str, patch: &CustomerPatch) -> Result<Customer, StoreError> {
        {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE customers SET
                    first_name = COALESCE(?1, first_name),
                    last_name = COALESCE(?2, last_name),
                    email = COALESCE(?3, email),
                    phone = COALESCE(?4, phone),
                    address = COALESCE(?5, address)
                 WHERE id = ?6",
                params![
                    patch.first_name,
                    patch.last_name,
                    patch.email,
                    patch.phone,
                    patch.address,
                    id
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("customer", id));
            }
        }

        self.publish(ChangeEvent::new(
            Collection::Customers,
            id.to_string(),
            ChangeKind::Updated,
        ));
        self.get_customer(id)
    }

    /// Delete a customer, refusing while any invoice belongs to them.
    pub fn delete_customer(&self, id: &str) -> Result<(), StoreError> {
        {
            let conn = self.conn()?;
            let references: i64 = conn.query_row(
                "SELECT COUNT(*) FROM invoices WHERE customer_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if references > 0 {
                return Err(StoreError::ReferentialIntegrity(format!(
                    "customer {id} has {references} existing invoice(s)"
                )));
            }
            let changed = conn.execute("DELETE FROM customers WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::not_found("customer", id));
            }
        }

        info!(customer_id = %id, "Customer deleted");
        self.publish(ChangeEvent::new(
            Collection::Customers,
            id.to_string(),
            ChangeKind::Deleted,
        ));
        Ok(())
    }

    /// Apply a signed adjustment to the customer's wallet and return the new
    /// balance. A negative result is recorded debt; only the wallet payment
    /// path enforces sufficiency.
    pub fn adjust_wallet_balance(&self, id: &str, delta: f64) -> Result<f64, StoreError> {
        let balance = {
            let conn = self.conn()?;
            let changed = conn.execute(
                "UPDATE customers SET wallet_balance = wallet_balance + ?1 WHERE id = ?2",
                params![delta, id],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("customer", id));
            }
            conn.query_row(
                "SELECT wallet_balance FROM customers WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?
        };

        info!(customer_id = %id, delta = %delta, balance = %balance, "Wallet adjusted");
        self.publish(ChangeEvent::new(
            Collection::Customers,
            id.to_string(),
            ChangeKind::Updated,
        ));
        Ok(balance)
    }

    // -----------------------------------------------------------------------
    // Invoices, items, payments (reads; writes go through the ledger)
    // -----------------------------------------------------------------------

    pub fn get_invoice(&self, id: &str) -> Result<Invoice, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, code, customer_id, customer_name, amount, status, date, paid_date, created_at
             FROM invoices WHERE id = ?1",
            params![id],
            Invoice::from_row,
        )
        .map_err(|_| StoreError::not_found("invoice", id))
    }

    /// All invoices, newest first.
    pub fn list_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, customer_id, customer_name, amount, status, date, paid_date, created_at
             FROM invoices ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], Invoice::from_row)?;
        collect_rows(rows, "invoice")
    }

    pub fn invoices_for_customer(&self, customer_id: &str) -> Result<Vec<Invoice>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, customer_id, customer_name, amount, status, date, paid_date, created_at
             FROM invoices WHERE customer_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![customer_id], Invoice::from_row)?;
        collect_rows(rows, "invoice")
    }

    pub fn recent_invoices(&self, limit: usize) -> Result<Vec<Invoice>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, customer_id, customer_name, amount, status, date, paid_date, created_at
             FROM invoices ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Invoice::from_row)?;
        collect_rows(rows, "invoice")
    }

    pub fn unpaid_invoices(&self, limit: usize) -> Result<Vec<Invoice>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, customer_id, customer_name, amount, status, date, paid_date, created_at
             FROM invoices WHERE status = 'unpaid' ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Invoice::from_row)?;
        collect_rows(rows, "invoice")
    }

    pub fn items_for_invoice(&self, invoice_id: &str) -> Result<Vec<InvoiceItem>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, invoice_id, product_id, product_name, quantity, price, subtotal, created_at
             FROM invoice_items WHERE invoice_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![invoice_id], InvoiceItem::from_row)?;
        collect_rows(rows, "invoice item")
    }

    /// Payments for one invoice, newest first.
    pub fn payments_for_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, invoice_id, amount, method, reference, notes, date, created_at
             FROM payments WHERE invoice_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![invoice_id], Payment::from_row)?;
        collect_rows(rows, "payment")
    }

    // -----------------------------------------------------------------------
    // Demo bootstrap
    // -----------------------------------------------------------------------

    /// Seed demo rows into empty collections. Safe to call on every start:
    /// a collection that already has data is left alone.
    ///
    /// Demo invoices are created through the ledger so stock and customer
    /// aggregates stay consistent; that loop is a sequence of independent
    /// transactions, so a mid-sequence failure surfaces as `PartialWrite`
    /// and the completed invoices remain.
    pub fn seed_demo_data(&self) -> Result<(), StoreError> {
        let seed_products = self.collection_is_empty("products")?;
        if seed_products {
            self.seed_demo_products()?;
        }

        let seed_customers = self.collection_is_empty("customers")?;
        if !seed_customers {
            return Ok(());
        }
        let customers = self.seed_demo_customers()?;

        if self.collection_is_empty("invoices")? {
            self.seed_demo_invoices(&customers)?;
        }
        Ok(())
    }

    fn collection_is_empty(&self, table: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count == 0)
    }

    fn seed_demo_products(&self) -> Result<(), StoreError> {
        let demo: [(&str, f64, i64, &str); 5] = [
            (
                "Wireless Headphones",
                129.99,
                45,
                "Premium wireless headphones with noise cancellation",
            ),
            (
                "Smart Watch",
                199.99,
                12,
                "Fitness tracker with heart rate monitoring",
            ),
            (
                "Bluetooth Speaker",
                79.99,
                0,
                "Portable waterproof speaker with 20-hour battery life",
            ),
            (
                "Laptop Stand",
                49.99,
                35,
                "Adjustable aluminum laptop stand for better ergonomics",
            ),
            (
                "Wireless Charger",
                29.99,
                8,
                "Fast wireless charging pad compatible with all Qi devices",
            ),
        ];

        for (name, price, stock, description) in demo {
            self.add_product(NewProduct {
                name: name.to_string(),
                price,
                stock,
                description: Some(description.to_string()),
                image: Some("/placeholder.svg?height=40&width=40".to_string()),
            })?;
        }
        info!("Seeded demo products");
        Ok(())
    }

    fn seed_demo_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let demo: [(&str, &str, &str, &str, &str, f64); 3] = [
            (
                "John",
                "Doe",
                "john.doe@example.com",
                "+1 (555) 123-4567",
                "123 Main St, Anytown, CA 12345",
                100.0,
            ),
            (
                "Jane",
                "Smith",
                "jane.smith@example.com",
                "+1 (555) 987-6543",
                "456 Oak Ave, Somewhere, NY 67890",
                50.0,
            ),
            (
                "Robert",
                "Johnson",
                "robert.j@example.com",
                "+1 (555) 456-7890",
                "789 Pine Rd, Nowhere, TX 54321",
                25.0,
            ),
        ];

        let mut customers = Vec::with_capacity(demo.len());
        for (first, last, email, phone, address, wallet) in demo {
            customers.push(self.add_customer(NewCustomer {
                first_name: first.to_string(),
                last_name: last.to_string(),
                email: email.to_string(),
                phone: Some(phone.to_string()),
                address: Some(address.to_string()),
                wallet_balance: wallet,
            })?);
        }
        info!("Seeded demo customers");
        Ok(customers)
    }

    fn seed_demo_invoices(&self, customers: &[Customer]) -> Result<(), StoreError> {
        let products = self.list_products()?;
        if customers.is_empty() || products.is_empty() {
            warn!("Skipping demo invoices: no customers or products to bill");
            return Ok(());
        }

        // Fixed line selections per customer; quantities stay well inside
        // the demo stock levels. The zero-stock speaker is never billed.
        let line_picks: [&[(&str, i64)]; 3] = [
            &[("Wireless Headphones", 1), ("Laptop Stand", 1)],
            &[("Smart Watch", 1)],
            &[("Wireless Charger", 2), ("Laptop Stand", 1)],
        ];

        let mut completed = 0usize;
        for (customer, picks) in customers.iter().zip(line_picks.iter()) {
            let lines: Vec<LineRequest> = picks
                .iter()
                .filter_map(|&(product_name, quantity)| {
                    products
                        .iter()
                        .find(|p| p.name == product_name)
                        .map(|p| LineRequest {
                            product_id: p.id.clone(),
                            quantity,
                        })
                })
                .collect();

            let invoice =
                ledger::create_invoice(self, &customer.id, &lines).map_err(|e| {
                    StoreError::PartialWrite {
                        operation: "seed demo invoices",
                        completed,
                        source: Box::new(e),
                    }
                })?;
            // Alternate paid/unpaid so the dashboard has both states to show
            if completed % 2 == 0 {
                ledger::mark_invoice_paid(self, &invoice.id, &today()).map_err(|e| {
                    StoreError::PartialWrite {
                        operation: "seed demo invoices",
                        completed,
                        source: Box::new(e),
                    }
                })?;
            }
            completed += 1;
        }

        info!(count = completed, "Seeded demo invoices");
        Ok(())
    }
}

/// Drain a rusqlite row iterator, skipping malformed rows with a warning.
fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &str,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(v) => out.push(v),
            Err(e) => warn!("skipping malformed {what} row: {e}"),
        }
    }
    Ok(out)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeKind, Collection};
    use crate::models::{CustomerPatch, ProductPatch};

    fn test_store() -> Store {
        Store::open_in_memory().expect("open in-memory store")
    }

    fn demo_product(store: &Store, stock: i64) -> Product {
        store
            .add_product(NewProduct {
                name: "Widget".into(),
                price: 10.0,
                stock,
                description: None,
                image: None,
            })
            .expect("add product")
    }

    fn demo_customer(store: &Store) -> Customer {
        store
            .add_customer(NewCustomer {
                first_name: "John".into(),
                last_name: "Doe".into(),
                email: "john@example.com".into(),
                phone: None,
                address: None,
                wallet_balance: 0.0,
            })
            .expect("add customer")
    }

    #[test]
    fn test_add_product_derives_status() {
        let store = test_store();
        assert_eq!(demo_product(&store, 45).status, ProductStatus::InStock);
        let p = store
            .add_product(NewProduct {
                name: "Gadget".into(),
                price: 5.0,
                stock: 0,
                description: None,
                image: None,
            })
            .unwrap();
        assert_eq!(p.status, ProductStatus::OutOfStock);
    }

    #[test]
    fn test_add_product_rejects_bad_input() {
        let store = test_store();
        assert!(matches!(
            store
                .add_product(NewProduct {
                    name: "  ".into(),
                    price: 1.0,
                    stock: 1,
                    description: None,
                    image: None,
                })
                .unwrap_err(),
            StoreError::Validation(_)
        ));
        assert!(matches!(
            store
                .add_product(NewProduct {
                    name: "Widget".into(),
                    price: -1.0,
                    stock: 1,
                    description: None,
                    image: None,
                })
                .unwrap_err(),
            StoreError::Validation(_)
        ));
    }

    #[test]
    fn test_update_product_patch_merges_fields() {
        let store = test_store();
        let p = demo_product(&store, 45);

        let updated = store
            .update_product(
                &p.id,
                &ProductPatch {
                    price: Some(12.5),
                    stock: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Widget", "unpatched field kept");
        assert_eq!(updated.price, 12.5);
        assert_eq!(updated.stock, 3);
        assert_eq!(
            updated.status,
            ProductStatus::LowStock,
            "status re-derived from patched stock"
        );
    }

    #[test]
    fn test_update_missing_product_is_not_found() {
        let store = test_store();
        assert!(matches!(
            store
                .update_product("nope", &ProductPatch::default())
                .unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_customer_counters_start_at_zero() {
        let store = test_store();
        let c = store
            .add_customer(NewCustomer {
                first_name: "Jane".into(),
                last_name: "Smith".into(),
                email: "jane@example.com".into(),
                phone: None,
                address: None,
                wallet_balance: 50.0,
            })
            .unwrap();
        assert_eq!(c.orders, 0);
        assert_eq!(c.total_spent, 0.0);
        assert_eq!(c.wallet_balance, 50.0);
    }

    #[test]
    fn test_update_customer_cannot_touch_aggregates() {
        let store = test_store();
        let c = demo_customer(&store);
        let updated = store
            .update_customer(
                &c.id,
                &CustomerPatch {
                    first_name: Some("Johnny".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.first_name, "Johnny");
        assert_eq!(updated.orders, 0);
        assert_eq!(updated.total_spent, 0.0);
    }

    #[test]
    fn test_adjust_wallet_balance_may_go_negative() {
        let store = test_store();
        let c = demo_customer(&store);
        assert_eq!(store.adjust_wallet_balance(&c.id, 30.0).unwrap(), 30.0);
        let balance = store.adjust_wallet_balance(&c.id, -45.0).unwrap();
        assert!((balance + 15.0).abs() < 0.001, "debt is representable");
    }

    #[test]
    fn test_delete_guards() {
        let store = test_store();
        let product = demo_product(&store, 10);
        let customer = demo_customer(&store);
        ledger::create_invoice(
            &store,
            &customer.id,
            &[LineRequest {
                product_id: product.id.clone(),
                quantity: 1,
            }],
        )
        .expect("create invoice");

        // P5: both deletes blocked while the invoice exists
        assert!(matches!(
            store.delete_product(&product.id).unwrap_err(),
            StoreError::ReferentialIntegrity(_)
        ));
        assert!(matches!(
            store.delete_customer(&customer.id).unwrap_err(),
            StoreError::ReferentialIntegrity(_)
        ));

        // Removing the invoice unblocks both
        let invoice = &store.invoices_for_customer(&customer.id).unwrap()[0];
        ledger::delete_invoice(&store, &invoice.id).expect("delete invoice");
        store.delete_product(&product.id).expect("delete product");
        store.delete_customer(&customer.id).expect("delete customer");
    }

    #[test]
    fn test_delete_missing_rows_are_not_found() {
        let store = test_store();
        assert!(matches!(
            store.delete_product("nope").unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.delete_customer("nope").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_crud_publishes_change_events() {
        let store = test_store();
        let mut rx = store.subscribe();

        let p = demo_product(&store, 5);
        store
            .update_product(
                &p.id,
                &ProductPatch {
                    price: Some(11.0),
                    ..Default::default()
                },
            )
            .unwrap();
        store.delete_product(&p.id).unwrap();

        let created = rx.try_recv().unwrap();
        assert_eq!(created.collection, Collection::Products);
        assert_eq!(created.kind, ChangeKind::Created);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Updated);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_seed_demo_data_is_idempotent() {
        let store = test_store();
        store.seed_demo_data().expect("first seed");

        let products = store.list_products().unwrap();
        let customers = store.list_customers().unwrap();
        let invoices = store.list_invoices().unwrap();
        assert_eq!(products.len(), 5);
        assert_eq!(customers.len(), 3);
        assert_eq!(invoices.len(), 3);

        store.seed_demo_data().expect("second seed");
        assert_eq!(store.list_products().unwrap().len(), 5);
        assert_eq!(store.list_customers().unwrap().len(), 3);
        assert_eq!(store.list_invoices().unwrap().len(), 3);
    }

    #[test]
    fn test_seeded_invoices_keep_aggregates_consistent() {
        let store = test_store();
        store.seed_demo_data().expect("seed");

        for invoice in store.list_invoices().unwrap() {
            let items = store.items_for_invoice(&invoice.id).unwrap();
            assert!(!items.is_empty());
            let total: f64 = items.iter().map(|i| i.subtotal).sum();
            assert!(
                (total - invoice.amount).abs() < 0.001,
                "invoice amount equals item subtotal sum"
            );
        }

        // Each customer's orders counter matches their invoice count
        for customer in store.list_customers().unwrap() {
            let invoices = store.invoices_for_customer(&customer.id).unwrap();
            assert_eq!(customer.orders as usize, invoices.len());
        }
    }

    #[test]
    fn test_low_stock_products_ordering() {
        let store = test_store();
        demo_product(&store, 8);
        store
            .add_product(NewProduct {
                name: "Gizmo".into(),
                price: 2.0,
                stock: 3,
                description: None,
                image: None,
            })
            .unwrap();
        store
            .add_product(NewProduct {
                name: "Doohickey".into(),
                price: 2.0,
                stock: 0,
                description: None,
                image: None,
            })
            .unwrap();
        store
            .add_product(NewProduct {
                name: "Contraption".into(),
                price: 2.0,
                stock: 40,
                description: None,
                image: None,
            })
            .unwrap();

        let low = store.low_stock_products(10).unwrap();
        let stocks: Vec<i64> = low.iter().map(|p| p.stock).collect();
        assert_eq!(stocks, vec![3, 8], "zero and healthy stock excluded");
    }

    #[test]
    fn test_invoice_lists_are_newest_first() {
        let store = test_store();
        let product = demo_product(&store, 50);
        let customer = demo_customer(&store);

        let mut ids = Vec::new();
        for _ in 0..3 {
            // created_at has second precision; space the rows apart
            std::thread::sleep(std::time::Duration::from_millis(5));
            let inv = ledger::create_invoice(
                &store,
                &customer.id,
                &[LineRequest {
                    product_id: product.id.clone(),
                    quantity: 1,
                }],
            )
            .unwrap();
            ids.push(inv.id);
        }

        let listed = store.list_invoices().unwrap();
        let listed_ids: Vec<&str> = listed.iter().map(|i| i.id.as_str()).collect();
        let mut expected: Vec<&str> = ids.iter().map(String::as_str).collect();
        expected.reverse();
        assert_eq!(listed_ids, expected);

        assert_eq!(store.recent_invoices(2).unwrap().len(), 2);
    }
}
