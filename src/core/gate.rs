//! Readiness gate in front of a shared resource.
//!
//! Request handlers go through [`ResourceGate::acquire`] instead of poking at the
//! slot directly, so an absent resource always turns into the same typed
//! [`ResourceUnavailable`] outcome instead of a panic somewhere in business logic.

use crate::core::readiness::ReadinessCell;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub const UNAVAILABLE_REASON: &str =
    "LLM model is not loaded or unavailable. Check /v1/health endpoint.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ResourceUnavailable {
    reason: &'static str,
}

impl ResourceUnavailable {
    pub fn new() -> Self {
        Self {
            reason: UNAVAILABLE_REASON,
        }
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

impl Default for ResourceUnavailable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct Detail {
    detail: &'static str,
}

impl IntoResponse for ResourceUnavailable {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(Detail {
                detail: self.reason,
            }),
        )
            .into_response()
    }
}

/// Outcome of a single [`ResourceGate::acquire`] call.
#[derive(Debug)]
pub enum AccessResult<T: ?Sized> {
    Ready(Arc<T>),
    Unavailable(ResourceUnavailable),
}

impl<T: ?Sized> AccessResult<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, AccessResult::Ready(_))
    }

    pub fn into_result(self) -> Result<Arc<T>, ResourceUnavailable> {
        match self {
            AccessResult::Ready(handle) => Ok(handle),
            AccessResult::Unavailable(unavailable) => Err(unavailable),
        }
    }
}

pub struct ResourceGate<T: ?Sized> {
    cell: Arc<ReadinessCell<T>>,
    resource_name: &'static str,
}

impl<T: ?Sized> ResourceGate<T> {
    pub fn new(cell: Arc<ReadinessCell<T>>, resource_name: &'static str) -> Self {
        Self {
            cell,
            resource_name,
        }
    }

    /// Reads the slot once and never waits for it to be populated.
    pub fn acquire(&self) -> AccessResult<T> {
        match self.cell.get() {
            Some(handle) => AccessResult::Ready(handle),
            None => {
                error!(
                    "{} instance not found in application state. It might not have loaded correctly.",
                    self.resource_name
                );
                AccessResult::Unavailable(ResourceUnavailable::new())
            }
        }
    }

    /// Same check as [`acquire`](Self::acquire) without logging, for health probes.
    pub fn is_ready(&self) -> bool {
        self.cell.is_ready()
    }

    pub fn peek(&self) -> Option<Arc<T>> {
        self.cell.get()
    }
}

impl<T: ?Sized> Clone for ResourceGate<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            resource_name: self.resource_name,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_logger {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::{Mutex, Once};

    static RECORDS: Mutex<Vec<(Level, String)>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();

    struct CapturingLogger;

    impl Log for CapturingLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            RECORDS
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    pub fn install() {
        INSTALL.call_once(|| {
            log::set_logger(&CapturingLogger).unwrap();
            log::set_max_level(LevelFilter::Trace);
        });
    }

    /// Records at `level` whose message mentions `needle`.
    pub fn count(level: Level, needle: &str) -> usize {
        RECORDS
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, message)| *l == level && message.contains(needle))
            .count()
    }
}
