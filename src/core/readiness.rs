//! Write-once slot for an expensive shared resource.
//!
//! The bootstrap owns the cell and publishes the resource exactly once after it
//! has been built. Request handlers only ever read it.

use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("resource slot is already initialized")]
pub struct AlreadyInitialized;

pub struct ReadinessCell<T: ?Sized> {
    slot: OnceLock<Arc<T>>,
}

impl<T: ?Sized> ReadinessCell<T> {
    pub const fn empty() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Publishes the handle. The first successful call wins; later calls fail
    /// and leave the published handle untouched.
    pub fn set(&self, handle: Arc<T>) -> Result<(), AlreadyInitialized> {
        self.slot.set(handle).map_err(|_| AlreadyInitialized)
    }

    /// Reads the slot once. The returned `Arc` points at the published
    /// allocation, never a copy of it.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl<T: ?Sized> Default for ReadinessCell<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> fmt::Debug for ReadinessCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessCell")
            .field("ready", &self.is_ready())
            .finish()
    }
}
