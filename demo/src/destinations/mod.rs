pub mod crm;
pub mod postgres;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
