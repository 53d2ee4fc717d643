pub mod env;
pub mod error;
pub mod file;
pub mod validated;

pub use error::SettingsError;
pub use validated::{SyncSettings, SyncSettingsBuilder};
