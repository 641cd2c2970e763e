//! Calendar synchronization domain

pub mod orchestrator;
pub mod ports;
pub mod service;
pub mod transform;

pub use orchestrator::*;
pub use ports::*;
pub use service::*;
