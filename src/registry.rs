//! Process-wide driver registry.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use crate::driver::Driver;
use crate::error::DbError;

static DRIVERS: LazyLock<Mutex<HashMap<String, Arc<dyn Driver>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn drivers() -> std::sync::MutexGuard<'static, HashMap<String, Arc<dyn Driver>>> {
    match DRIVERS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Make a driver available under `name`.
///
/// Registration is one-shot per name; there is no unregister.
///
/// # Panics
///
/// Panics if `name` is already registered. Duplicate registration is a
/// programmer error, not a recoverable condition.
pub fn register(name: &str, driver: Arc<dyn Driver>) {
    let mut map = drivers();
    if map.contains_key(name) {
        panic!("register called twice for driver {name}");
    }
    map.insert(name.to_string(), driver);
}

/// Look up a previously registered driver.
pub(crate) fn lookup(name: &str) -> Result<Arc<dyn Driver>, DbError> {
    drivers()
        .get(name)
        .cloned()
        .ok_or_else(|| DbError::UnknownDriver(name.to_string()))
}
