pub mod actor;
pub mod mapping;
pub mod messages;
pub mod spawn;

pub use actor::{Actor, ActorContext, ActorRef};
pub use spawn::spawn_actor;
