mod availability;
mod error;
mod locks;
mod mutations;
mod queries;
mod validate;

pub use availability::{Outcome, check_availability};
pub use error::{ConflictReason, EngineError, NOT_FOUND_REASON};

use std::sync::Arc;

use crate::repository::Repository;

use locks::LockTable;

/// The booking engine: decides whether a stay is admissible and turns admitted
/// requests into repository writes. Owns no reservation state.
///
/// Each create or extend runs its read-check-write sequence under the guest and
/// unit locks, so concurrent requests cannot both pass the same availability read.
pub struct Engine {
    repo: Arc<dyn Repository>,
    locks: LockTable,
}

impl Engine {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            locks: LockTable::new(),
        }
    }
}
