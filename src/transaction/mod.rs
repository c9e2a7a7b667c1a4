// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Opens, commits and rolls back store transactions and propagates an open
// transaction to nested calls through the `Context` they receive.
//
// - `manager`: the `Transaction` unit of work and the begin/commit/rollback
//   sequence around a closure
// - `propagation`: join-or-open semantics for `Context`-taking closures
//
// ============================================================================

pub mod manager;
pub mod propagation;

pub(crate) use manager::execute;
pub use manager::Transaction;
pub use propagation::transactional;
