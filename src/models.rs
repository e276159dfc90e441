//! Typed records for the five store collections plus users/devices.
//!
//! The hosted-store documents these replace were schemaless; here every
//! record is validated at the storage boundary and malformed rows are
//! rejected instead of propagating missing fields. JSON field names use
//! camelCase to match the document shapes the dashboard frontend consumes.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Stock level at or below which a product counts as "Low Stock".
pub const LOW_STOCK_THRESHOLD: i64 = 10;

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// Derived availability tier. Never set directly; recomputed from `stock`
/// after every mutation that touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    #[serde(rename = "In Stock")]
    InStock,
    #[serde(rename = "Low Stock")]
    LowStock,
    #[serde(rename = "Out of Stock")]
    OutOfStock,
}

impl ProductStatus {
    pub fn from_stock(stock: i64) -> Self {
        if stock <= 0 {
            ProductStatus::OutOfStock
        } else if stock <= LOW_STOCK_THRESHOLD {
            ProductStatus::LowStock
        } else {
            ProductStatus::InStock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::InStock => "In Stock",
            ProductStatus::LowStock => "Low Stock",
            ProductStatus::OutOfStock => "Out of Stock",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "In Stock" => Ok(ProductStatus::InStock),
            "Low Stock" => Ok(ProductStatus::LowStock),
            "Out of Stock" => Ok(ProductStatus::OutOfStock),
            other => Err(StoreError::Validation(format!(
                "unknown product status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub stock: i64,
    pub status: ProductStatus,
    pub description: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
}

impl Product {
    /// Column order: id, name, price, stock, status, description, image, created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status_raw: String = row.get(4)?;
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            price: row.get(2)?,
            stock: row.get(3)?,
            status: ProductStatus::parse(&status_raw).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("bad product status: {status_raw}").into(),
                )
            })?,
            description: row.get(5)?,
            image: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

/// Input for `add_product`. Status is derived, never supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
    pub stock: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Partial update for `update_product`. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub description: Option<String>,
    pub image: Option<String>,
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Count of invoices currently on record. Ledger-owned.
    pub orders: i64,
    /// Running total of invoice amounts. Ledger-owned.
    pub total_spent: f64,
    /// Prepaid credit usable as a payment method. May go negative through
    /// direct adjustment (debt); wallet payments themselves are guarded.
    pub wallet_balance: f64,
    pub created_at: String,
}

impl Customer {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Column order: id, first_name, last_name, email, phone, address,
    /// orders, total_spent, wallet_balance, created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            address: row.get(5)?,
            orders: row.get(6)?,
            total_spent: row.get(7)?,
            wallet_balance: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Opening wallet credit, if any.
    #[serde(default)]
    pub wallet_balance: f64,
}

/// Partial update for `update_customer`. Deliberately excludes `orders`,
/// `total_spent` and `wallet_balance`: the first two are ledger-owned and
/// the wallet moves only through `adjust_wallet_balance` or a wallet payment.
#[derive(Debug, Clone, Default)]
pub struct CustomerPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "unpaid" => Ok(InvoiceStatus::Unpaid),
            "paid" => Ok(InvoiceStatus::Paid),
            other => Err(StoreError::Validation(format!(
                "unknown invoice status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    /// Human-readable code, e.g. "INV-0042" ("INV-M0042" for merges).
    pub code: String,
    pub customer_id: String,
    /// Display name snapshot taken at creation; not re-synced on renames.
    pub customer_name: String,
    pub amount: f64,
    pub status: InvoiceStatus,
    /// Invoice date as YYYY-MM-DD.
    pub date: String,
    /// Empty until the invoice is paid.
    pub paid_date: String,
    pub created_at: String,
}

impl Invoice {
    /// Column order: id, code, customer_id, customer_name, amount, status,
    /// date, paid_date, created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status_raw: String = row.get(5)?;
        Ok(Invoice {
            id: row.get(0)?,
            code: row.get(1)?,
            customer_id: row.get(2)?,
            customer_name: row.get(3)?,
            amount: row.get(4)?,
            status: InvoiceStatus::parse(&status_raw).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    format!("bad invoice status: {status_raw}").into(),
                )
            })?,
            date: row.get(6)?,
            paid_date: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub product_id: String,
    /// Name snapshot taken at invoice time.
    pub product_name: String,
    pub quantity: i64,
    /// Unit-price snapshot taken at invoice time; immutable thereafter.
    pub price: f64,
    pub subtotal: f64,
    pub created_at: String,
}

impl InvoiceItem {
    /// Column order: id, invoice_id, product_id, product_name, quantity,
    /// price, subtotal, created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(InvoiceItem {
            id: row.get(0)?,
            invoice_id: row.get(1)?,
            product_id: row.get(2)?,
            product_name: row.get(3)?,
            quantity: row.get(4)?,
            price: row.get(5)?,
            subtotal: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

/// One requested line of a new invoice: which product, how many.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub product_id: String,
    pub quantity: i64,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    CreditCard,
    Upi,
    Cheque,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Wallet => "wallet",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "upi" => Ok(PaymentMethod::Upi),
            "cheque" => Ok(PaymentMethod::Cheque),
            "wallet" => Ok(PaymentMethod::Wallet),
            other => Err(StoreError::Validation(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub amount: f64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// Payment date as YYYY-MM-DD.
    pub date: String,
    pub created_at: String,
}

impl Payment {
    /// Column order: id, invoice_id, amount, method, reference, notes, date,
    /// created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let method_raw: String = row.get(3)?;
        Ok(Payment {
            id: row.get(0)?,
            invoice_id: row.get(1)?,
            amount: row.get(2)?,
            method: PaymentMethod::parse(&method_raw).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("bad payment method: {method_raw}").into(),
                )
            })?,
            reference: row.get(4)?,
            notes: row.get(5)?,
            date: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub invoice_id: String,
    pub amount: f64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub date: String,
}

// ---------------------------------------------------------------------------
// Users & devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "sub-admin")]
    SubAdmin,
    #[serde(rename = "user")]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::SubAdmin => "sub-admin",
            Role::User => "user",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "admin" => Ok(Role::Admin),
            "sub-admin" => Ok(Role::SubAdmin),
            "user" => Ok(Role::User),
            other => Err(StoreError::Validation(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            other => Err(StoreError::Validation(format!(
                "unknown user status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: String,
}

impl User {
    /// Column order: id, email, display_name, role, status, created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let role_raw: String = row.get(3)?;
        let status_raw: String = row.get(4)?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            role: Role::parse(&role_raw).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("bad role: {role_raw}").into(),
                )
            })?,
            status: UserStatus::parse(&status_raw).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("bad user status: {status_raw}").into(),
                )
            })?,
            created_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDevice {
    pub device_id: String,
    pub user_id: String,
    pub name: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub last_active: String,
    pub created_at: String,
}

impl UserDevice {
    /// Column order: device_id, user_id, name, browser, os, last_active,
    /// created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(UserDevice {
            device_id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            browser: row.get(3)?,
            os: row.get(4)?,
            last_active: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_status_tiers() {
        assert_eq!(ProductStatus::from_stock(0), ProductStatus::OutOfStock);
        assert_eq!(ProductStatus::from_stock(1), ProductStatus::LowStock);
        assert_eq!(
            ProductStatus::from_stock(LOW_STOCK_THRESHOLD),
            ProductStatus::LowStock
        );
        assert_eq!(
            ProductStatus::from_stock(LOW_STOCK_THRESHOLD + 1),
            ProductStatus::InStock
        );
    }

    #[test]
    fn test_payment_method_round_trip() {
        for method in [
            PaymentMethod::Cash,
            PaymentMethod::BankTransfer,
            PaymentMethod::CreditCard,
            PaymentMethod::Upi,
            PaymentMethod::Cheque,
            PaymentMethod::Wallet,
        ] {
            assert_eq!(PaymentMethod::parse(method.as_str()).unwrap(), method);
        }
        assert!(PaymentMethod::parse("barter").is_err());
    }

    #[test]
    fn test_role_serde_uses_dashboard_spelling() {
        let json = serde_json::to_string(&Role::SubAdmin).unwrap();
        assert_eq!(json, "\"sub-admin\"");
        let back: Role = serde_json::from_str("\"sub-admin\"").unwrap();
        assert_eq!(back, Role::SubAdmin);
    }

    #[test]
    fn test_invoice_json_shape_is_camel_case() {
        let invoice = Invoice {
            id: "inv-1".into(),
            code: "INV-0001".into(),
            customer_id: "cus-1".into(),
            customer_name: "John Doe".into(),
            amount: 249.99,
            status: InvoiceStatus::Unpaid,
            date: "2026-08-06".into(),
            paid_date: String::new(),
            created_at: "2026-08-06T00:00:00Z".into(),
        };
        let v = serde_json::to_value(&invoice).unwrap();
        assert_eq!(v["customerId"], "cus-1");
        assert_eq!(v["customerName"], "John Doe");
        assert_eq!(v["paidDate"], "");
        assert_eq!(v["status"], "unpaid");
    }
}
