//! Resume/dedupe persistence for the binaries.
//!
//! Two pieces of state survive a restart: attestation submission records
//! (so an interrupted run can reconcile an ambiguous broadcast instead of
//! double-paying the fee) and the relay replay cursor.

mod sqlite;

pub use sqlite::SqliteDb;
