use crate::actor::{Actor, ActorContext, ActorRef};
use std::fmt::Debug;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error};

/// Spawns the actor's event loop and returns a reference to its mailbox
/// together with the loop's `JoinHandle`.
pub fn spawn_actor<M, A>(
    name: impl Into<String>,
    mailbox_capacity: usize,
    mut actor: A,
) -> (ActorRef<M>, JoinHandle<()>)
where
    A: Actor<M>,
    M: Send + Debug + 'static,
{
    let name = name.into();
    let ctx = ActorContext::new(name.clone());
    let (tx, mut rx) = mpsc::channel::<M>(mailbox_capacity);
    let actor_ref = ActorRef::new(name, tx);

    let handle = tokio::spawn(async move {
        if let Err(e) = actor.on_start(&ctx).await {
            error!(actor = %ctx.name(), ?e, "actor on_start failed");
            return;
        }

        while !ctx.is_stopped() {
            let msg = tokio::select! {
                biased;
                _ = ctx.stopped() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(e) = actor.handle(msg, &ctx).await {
                error!(actor = %ctx.name(), ?e, "actor handle failed");
            }
        }

        rx.close();
        debug!(actor = %ctx.name(), "actor mailbox closed");

        if let Err(e) = actor.on_stop(&ctx).await {
            error!(actor = %ctx.name(), ?e, "actor on_stop failed");
        }
    });

    (actor_ref, handle)
}
