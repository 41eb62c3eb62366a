//! Bridges the server's `TurnCompleted` broadcasts to the game runner.
//!
//! The runner cannot await actor messages directly, so this actor forwards
//! each broadcast into an mpsc channel the runner reads between turns.

use acton_reactive::prelude::*;
use tokio::sync::mpsc;

use crate::server::TurnCompleted;

/// State for the turn observer actor.
#[derive(Default, Clone)]
pub struct TurnObserverState {
    pub tx: Option<mpsc::Sender<TurnCompleted>>,
}

impl std::fmt::Debug for TurnObserverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnObserverState")
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Actor that forwards every `TurnCompleted` to a channel.
pub struct TurnObserver {
    tx: mpsc::Sender<TurnCompleted>,
}

impl TurnObserver {
    pub fn new(tx: mpsc::Sender<TurnCompleted>) -> Self {
        Self { tx }
    }

    /// Spawn the observer. It subscribes before starting so no broadcast
    /// sent after this returns is missed.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor = runtime.new_actor_with_name::<TurnObserverState>("TurnObserver".to_string());
        actor.model.tx = Some(self.tx);

        actor.handle().subscribe::<TurnCompleted>().await;

        actor.act_on::<TurnCompleted>(|actor, context| {
            let msg = context.message().clone();
            let tx = actor.model.tx.clone();

            Reply::pending(async move {
                if let Some(tx) = tx {
                    // Runner may already have stopped listening
                    let _ = tx.send(msg).await;
                }
            })
        });

        actor.start().await
    }
}
