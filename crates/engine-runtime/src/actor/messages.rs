use crate::{actor::ActorRef, dispatcher::TaskOutcome};
use engine_processing::task::TaskKind;
use futures::future::BoxFuture;
use std::fmt;
use tokio::sync::oneshot;

/// Messages for a synonym mapping manager.
pub enum MappingMsg {
    /// Initialize the actor with its own reference for scheduling.
    SetActorRef(ActorRef<MappingMsg>),

    /// Start managing the mapping with a first collection scan.
    Init,

    /// The dispatcher picked up a scan. The scan waits for `ack`.
    SyncStarted { ack: oneshot::Sender<()> },

    /// A dispatched sync finished.
    SyncCompleted {
        kind: TaskKind,
        outcome: TaskOutcome,
    },

    /// Delayed request to queue a collection scan.
    EnqueueScan,

    /// Delayed request to queue a change stream poll.
    EnqueueChangeStream,

    /// Stop managing the mapping. `reply` receives a future that resolves
    /// once the mapping's in-flight sync is gone.
    Shutdown {
        reply: oneshot::Sender<BoxFuture<'static, ()>>,
    },
}

impl fmt::Debug for MappingMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingMsg::SetActorRef(actor_ref) => {
                f.debug_tuple("SetActorRef").field(&actor_ref.name()).finish()
            }
            MappingMsg::Init => f.write_str("Init"),
            MappingMsg::SyncStarted { .. } => f.write_str("SyncStarted"),
            MappingMsg::SyncCompleted { kind, outcome } => f
                .debug_struct("SyncCompleted")
                .field("kind", kind)
                .field("outcome", outcome)
                .finish(),
            MappingMsg::EnqueueScan => f.write_str("EnqueueScan"),
            MappingMsg::EnqueueChangeStream => f.write_str("EnqueueChangeStream"),
            MappingMsg::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}
