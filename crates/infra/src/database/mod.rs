//! Database implementations

mod columns;
pub mod manager;
pub mod mapping_repository;
pub mod sync_config_repository;
pub mod sync_run_repository;

pub use manager::*;
pub use mapping_repository::*;
pub use sync_config_repository::*;
pub use sync_run_repository::*;
