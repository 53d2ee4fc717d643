pub mod backend;
pub mod classify;
pub mod error;
pub mod metrics;
pub mod registry;
