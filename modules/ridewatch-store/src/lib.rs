pub mod pg;
pub mod reconcile;
pub mod repository;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use pg::PgEventRepository;
pub use reconcile::{deep_merge, reconcile, MergePrecedence, Reconciled};
pub use repository::{EventRepository, UpsertOutcome};
