//! The Small Back Office - embedded business core
//!
//! Customer records, product inventory, invoices with line items, payments
//! (including wallet credit), and user/device management for the dashboard
//! frontend. All access is via in-process calls against an injected
//! [`Store`]; there is no network surface here.
//!
//! The ledger and payment recorder run every multi-document sequence inside
//! a single SQLite transaction, so stock, customer aggregates and invoice
//! status can never drift out of step with the documents that drive them.
//! UI layers subscribe to [`events::ChangeEvent`]s to stay current.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod db;
mod error;
mod events;
mod ledger;
mod models;
mod payments;
mod reconcile;
mod store;
mod users;

pub use error::StoreError;
pub use events::{ChangeEvent, ChangeKind, Collection, EVENT_BUFFER};
pub use ledger::{create_invoice, delete_invoice, mark_invoice_paid, merge_invoices};
pub use models::{
    Customer, CustomerPatch, Invoice, InvoiceItem, InvoiceStatus, LineRequest, NewCustomer,
    NewDevice, NewPayment, NewProduct, NewUser, Payment, PaymentMethod, Product, ProductPatch,
    ProductStatus, Role, User, UserDevice, UserStatus, LOW_STOCK_THRESHOLD,
};
pub use payments::{add_payment, total_paid};
pub use store::Store;
pub use users::{
    add_user, ensure_active, get_user, list_devices, list_users, permissions_for,
    register_device, remove_device, touch_device, update_user_email, update_user_role,
    update_user_status, DeviceRegistration, MAX_DEVICES,
};

/// Install the global tracing subscriber. Honors `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
