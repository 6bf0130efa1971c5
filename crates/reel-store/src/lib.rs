pub mod database;
pub mod error;
pub mod ledger;
pub mod row_helpers;
pub mod schema;
pub mod tasks;
pub mod usage;

pub use database::Database;
pub use error::StoreError;
pub use ledger::{LedgerSnapshot, LedgerStore, SqliteLedgerStore};
pub use tasks::TaskRepo;
pub use usage::UsageRepo;
