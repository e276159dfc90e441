//! Dashboard users, roles, and login-device limiting.
//!
//! Credentials and the sign-in handshake belong to the hosted auth
//! provider; this module owns what the core stores about a user — email,
//! role, active/inactive status — and the per-user device registry that
//! caps simultaneous logins. Inactive users are gated by `ensure_active`
//! after the provider accepts them.

use rusqlite::params;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{ChangeEvent, ChangeKind, Collection};
use crate::models::{NewDevice, NewUser, Role, User, UserDevice, UserStatus};
use crate::store::{now, Store};

/// Maximum simultaneous login devices per user.
pub const MAX_DEVICES: usize = 2;

/// Permissions granted to administrators.
const ADMIN_PERMISSIONS: &[&str] = &[
    "view_dashboard",
    "manage_products",
    "manage_customers",
    "manage_invoices",
    "record_payments",
    "manage_users",
    "system_settings",
];

/// Permissions granted to sub-admins (everything but user management).
const SUB_ADMIN_PERMISSIONS: &[&str] = &[
    "view_dashboard",
    "manage_products",
    "manage_customers",
    "manage_invoices",
    "record_payments",
];

/// Permissions granted to regular users.
const USER_PERMISSIONS: &[&str] = &["view_dashboard", "view_own_purchases"];

/// Static permission set for a role.
pub fn permissions_for(role: Role) -> &'static [&'static str] {
    match role {
        Role::Admin => ADMIN_PERMISSIONS,
        Role::SubAdmin => SUB_ADMIN_PERMISSIONS,
        Role::User => USER_PERMISSIONS,
    }
}

/// Outcome of a device registration attempt.
#[derive(Debug)]
pub enum DeviceRegistration {
    /// The device was registered (or was already known and got its
    /// `last_active` refreshed).
    Registered(UserDevice),
    /// The cap is reached; the caller shows the existing devices so one can
    /// be removed.
    LimitReached(Vec<UserDevice>),
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub fn add_user(store: &Store, new: NewUser) -> Result<User, StoreError> {
    if new.email.trim().is_empty() {
        return Err(StoreError::Validation("user email is required".into()));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: new.email.trim().to_lowercase(),
        display_name: new.display_name,
        role: new.role,
        status: UserStatus::Active,
        created_at: now(),
    };

    {
        let conn = store.conn()?;
        conn.execute(
            "INSERT INTO users (id, email, display_name, role, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
            params![
                user.id,
                user.email,
                user.display_name,
                user.role.as_str(),
                user.created_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Validation(format!("email {} is already registered", user.email))
            }
            other => StoreError::Storage(other),
        })?;
    }

    info!(user_id = %user.id, email = %user.email, role = %user.role.as_str(), "User added");
    store.publish(ChangeEvent::new(
        Collection::Users,
        user.id.clone(),
        ChangeKind::Created,
    ));
    Ok(user)
}

pub fn get_user(store: &Store, id: &str) -> Result<User, StoreError> {
    let conn = store.conn()?;
    conn.query_row(
        "SELECT id, email, display_name, role, status, created_at FROM users WHERE id = ?1",
        params![id],
        User::from_row,
    )
    .map_err(|_| StoreError::not_found("user", id))
}

pub fn list_users(store: &Store) -> Result<Vec<User>, StoreError> {
    let conn = store.conn()?;
    let mut stmt = conn.prepare(
        "SELECT id, email, display_name, role, status, created_at
         FROM users ORDER BY email",
    )?;
    let rows = stmt.query_map([], User::from_row)?;
    let mut users = Vec::new();
    for row in rows {
        match row {
            Ok(u) => users.push(u),
            Err(e) => warn!("skipping malformed user row: {e}"),
        }
    }
    Ok(users)
}

pub fn update_user_status(
    store: &Store,
    id: &str,
    status: UserStatus,
) -> Result<(), StoreError> {
    {
        let conn = store.conn()?;
        let changed = conn.execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("user", id));
        }
    }

    info!(user_id = %id, status = %status.as_str(), "User status updated");
    store.publish(ChangeEvent::new(
        Collection::Users,
        id.to_string(),
        ChangeKind::Updated,
    ));
    Ok(())
}

pub fn update_user_role(store: &Store, id: &str, role: Role) -> Result<(), StoreError> {
    {
        let conn = store.conn()?;
        let changed = conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("user", id));
        }
    }

    info!(user_id = %id, role = %role.as_str(), "User role updated");
    store.publish(ChangeEvent::new(
        Collection::Users,
        id.to_string(),
        ChangeKind::Updated,
    ));
    Ok(())
}

pub fn update_user_email(store: &Store, id: &str, email: &str) -> Result<(), StoreError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(StoreError::Validation("user email is required".into()));
    }

    {
        let conn = store.conn()?;
        let changed = conn
            .execute(
                "UPDATE users SET email = ?1 WHERE id = ?2",
                params![email, id],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Validation(format!("email {email} is already registered"))
                }
                other => StoreError::Storage(other),
            })?;
        if changed == 0 {
            return Err(StoreError::not_found("user", id));
        }
    }

    info!(user_id = %id, "User email updated");
    store.publish(ChangeEvent::new(
        Collection::Users,
        id.to_string(),
        ChangeKind::Updated,
    ));
    Ok(())
}

/// Gate applied after the hosted provider accepts a sign-in: inactive
/// accounts are refused.
pub fn ensure_active(store: &Store, id: &str) -> Result<User, StoreError> {
    let user = get_user(store, id)?;
    if user.status == UserStatus::Inactive {
        return Err(StoreError::Validation(format!(
            "account {} is inactive",
            user.email
        )));
    }
    Ok(user)
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Register the current login device for a user.
///
/// A device id the user already registered just refreshes `last_active`.
/// Past [`MAX_DEVICES`] distinct devices, returns `LimitReached` with the
/// existing registry so the caller can offer removal.
pub fn register_device(
    store: &Store,
    user_id: &str,
    device_id: Option<&str>,
    new: NewDevice,
) -> Result<DeviceRegistration, StoreError> {
    // Known device: refresh and return it
    if let Some(device_id) = device_id {
        let existing = {
            let conn = store.conn()?;
            conn.query_row(
                "SELECT device_id, user_id, name, browser, os, last_active, created_at
                 FROM user_devices WHERE device_id = ?1 AND user_id = ?2",
                params![device_id, user_id],
                UserDevice::from_row,
            )
            .ok()
        };
        if let Some(mut device) = existing {
            touch_device(store, user_id, device_id)?;
            device.last_active = now();
            return Ok(DeviceRegistration::Registered(device));
        }
    }

    // Make sure the user exists before registering anything
    get_user(store, user_id)?;

    let devices = list_devices(store, user_id)?;
    if devices.len() >= MAX_DEVICES {
        warn!(user_id = %user_id, devices = devices.len(), "Device limit reached");
        return Ok(DeviceRegistration::LimitReached(devices));
    }

    let device = UserDevice {
        device_id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: new.name,
        browser: new.browser,
        os: new.os,
        last_active: now(),
        created_at: now(),
    };

    {
        let conn = store.conn()?;
        conn.execute(
            "INSERT INTO user_devices (device_id, user_id, name, browser, os, last_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                device.device_id,
                device.user_id,
                device.name,
                device.browser,
                device.os,
                device.last_active,
                device.created_at,
            ],
        )?;
    }

    info!(user_id = %user_id, device_id = %device.device_id, "Device registered");
    store.publish(ChangeEvent::new(
        Collection::Users,
        user_id.to_string(),
        ChangeKind::Updated,
    ));
    Ok(DeviceRegistration::Registered(device))
}

pub fn list_devices(store: &Store, user_id: &str) -> Result<Vec<UserDevice>, StoreError> {
    let conn = store.conn()?;
    let mut stmt = conn.prepare(
        "SELECT device_id, user_id, name, browser, os, last_active, created_at
         FROM user_devices WHERE user_id = ?1 ORDER BY last_active DESC",
    )?;
    let rows = stmt.query_map(params![user_id], UserDevice::from_row)?;
    let mut devices = Vec::new();
    for row in rows {
        match row {
            Ok(d) => devices.push(d),
            Err(e) => warn!("skipping malformed device row: {e}"),
        }
    }
    Ok(devices)
}

pub fn remove_device(store: &Store, user_id: &str, device_id: &str) -> Result<(), StoreError> {
    {
        let conn = store.conn()?;
        let changed = conn.execute(
            "DELETE FROM user_devices WHERE device_id = ?1 AND user_id = ?2",
            params![device_id, user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("device", device_id));
        }
    }

    info!(user_id = %user_id, device_id = %device_id, "Device removed");
    store.publish(ChangeEvent::new(
        Collection::Users,
        user_id.to_string(),
        ChangeKind::Updated,
    ));
    Ok(())
}

/// Refresh a device's `last_active` stamp (called on each session resume).
pub fn touch_device(store: &Store, user_id: &str, device_id: &str) -> Result<(), StoreError> {
    let conn = store.conn()?;
    let changed = conn.execute(
        "UPDATE user_devices SET last_active = ?1 WHERE device_id = ?2 AND user_id = ?3",
        params![now(), device_id, user_id],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("device", device_id));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::open_in_memory().expect("open in-memory store")
    }

    fn admin(store: &Store) -> User {
        add_user(
            store,
            NewUser {
                email: "admin@example.com".into(),
                display_name: Some("Admin".into()),
                role: Role::Admin,
            },
        )
        .expect("add admin")
    }

    #[test]
    fn test_add_user_defaults_active_and_normalizes_email() {
        let store = test_store();
        let user = add_user(
            &store,
            NewUser {
                email: "  Mixed.Case@Example.COM ".into(),
                display_name: None,
                role: Role::User,
            },
        )
        .unwrap();
        assert_eq!(user.email, "mixed.case@example.com");
        assert_eq!(user.status, UserStatus::Active);
    }

    #[test]
    fn test_duplicate_email_is_rejected() {
        let store = test_store();
        admin(&store);
        let err = add_user(
            &store,
            NewUser {
                email: "admin@example.com".into(),
                display_name: None,
                role: Role::User,
            },
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_inactive_user_is_gated() {
        let store = test_store();
        let user = admin(&store);

        assert!(ensure_active(&store, &user.id).is_ok());

        update_user_status(&store, &user.id, UserStatus::Inactive).unwrap();
        assert!(matches!(
            ensure_active(&store, &user.id).unwrap_err(),
            StoreError::Validation(_)
        ));

        update_user_status(&store, &user.id, UserStatus::Active).unwrap();
        assert!(ensure_active(&store, &user.id).is_ok());
    }

    #[test]
    fn test_role_permissions_nest() {
        let admin_perms = permissions_for(Role::Admin);
        let sub_perms = permissions_for(Role::SubAdmin);

        assert!(admin_perms.contains(&"manage_users"));
        assert!(!sub_perms.contains(&"manage_users"));
        for perm in sub_perms {
            assert!(admin_perms.contains(perm), "admin should hold {perm}");
        }
        assert!(permissions_for(Role::User).contains(&"view_own_purchases"));
    }

    #[test]
    fn test_device_limit_and_removal_flow() {
        let store = test_store();
        let user = admin(&store);

        let first = match register_device(&store, &user.id, None, NewDevice::default_named("Laptop"))
            .unwrap()
        {
            DeviceRegistration::Registered(d) => d,
            other => panic!("expected Registered, got {other:?}"),
        };
        match register_device(&store, &user.id, None, NewDevice::default_named("Phone")).unwrap() {
            DeviceRegistration::Registered(_) => {}
            other => panic!("expected Registered, got {other:?}"),
        }

        // Third distinct device hits the cap and reports the registry
        match register_device(&store, &user.id, None, NewDevice::default_named("Tablet")).unwrap()
        {
            DeviceRegistration::LimitReached(devices) => assert_eq!(devices.len(), MAX_DEVICES),
            other => panic!("expected LimitReached, got {other:?}"),
        }

        // A known device slips through the cap (it is a re-login)
        match register_device(
            &store,
            &user.id,
            Some(&first.device_id),
            NewDevice::default_named("Laptop"),
        )
        .unwrap()
        {
            DeviceRegistration::Registered(d) => assert_eq!(d.device_id, first.device_id),
            other => panic!("expected Registered, got {other:?}"),
        }

        // Removing one frees a slot
        remove_device(&store, &user.id, &first.device_id).unwrap();
        match register_device(&store, &user.id, None, NewDevice::default_named("Tablet")).unwrap()
        {
            DeviceRegistration::Registered(_) => {}
            other => panic!("expected Registered after removal, got {other:?}"),
        }
        assert_eq!(list_devices(&store, &user.id).unwrap().len(), MAX_DEVICES);
    }

    #[test]
    fn test_devices_cascade_with_user_delete() {
        let store = test_store();
        let user = admin(&store);
        register_device(&store, &user.id, None, NewDevice::default_named("Laptop")).unwrap();

        {
            let conn = store.conn().unwrap();
            conn.execute("DELETE FROM users WHERE id = ?1", params![user.id])
                .unwrap();
        }
        assert!(list_devices(&store, &user.id).unwrap().is_empty());
    }

    #[test]
    fn test_remove_unknown_device_is_not_found() {
        let store = test_store();
        let user = admin(&store);
        assert!(matches!(
            remove_device(&store, &user.id, "nothing").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }
}

#[cfg(test)]
impl NewDevice {
    fn default_named(name: &str) -> Self {
        NewDevice {
            name: Some(name.to_string()),
            browser: Some("Chrome".to_string()),
            os: Some("macOS".to_string()),
        }
    }
}
