pub mod errors;
pub mod ids;
pub mod provider;
pub mod stream;
pub mod task;
pub mod usage;
