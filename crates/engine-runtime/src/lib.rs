pub mod actor;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;

pub use actor::mapping::{MappingManagerHandle, SynonymMappingManager};
pub use dispatcher::{SynonymManager, TaskHandle};
pub use lifecycle::LifecycleState;

#[cfg(test)]
mod tests;
