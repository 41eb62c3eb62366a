//! TurnServer: the authoritative game actor.
//!
//! Owns the [`World`] and serializes every rule check through its mailbox.
//!
//! ```text
//! GameRunner ── AdvanceTurn ──> TurnServer ── TurnUpdate ──> each worker
//! worker ── ActionRequest (new_envelope) ──> TurnServer
//! worker <── ActionResponse (reply_envelope) ── TurnServer
//! worker ── TransferMaterial ──> TurnServer ── TransferInform ──> giver, receiver
//! GameRunner ── CloseTurn ──> TurnServer ── TurnCompleted (broadcast) ──> observer
//! ```

use std::collections::HashMap;

use acton_reactive::prelude::*;
use cnp_kernel::messages::{
    ActionFlag, ActionRequest, ActionResponse, AgentId, TransferMaterial, TurnUpdate,
};
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use crate::world::{GameOutcome, TurnSummary, World};

/// Directory of worker handles, sent once before the first turn.
#[derive(Debug, Clone)]
pub struct RegisterWorkers {
    pub workers: HashMap<AgentId, ActorHandle>,
}

/// Open the next turn and push a [`TurnUpdate`] to every worker.
#[derive(Debug, Clone)]
pub struct AdvanceTurn;

/// Close the current turn and broadcast [`TurnCompleted`].
#[derive(Debug, Clone)]
pub struct CloseTurn;

/// Broadcast when a turn closes.
#[derive(Debug, Clone)]
pub struct TurnCompleted {
    pub summary: TurnSummary,
    /// Set once the game has ended
    pub outcome: Option<GameOutcome>,
    /// Repair points closed so far
    pub repaired: usize,
}

/// Actor state for TurnServer.
#[derive(Default, Clone)]
pub struct TurnServerState {
    world: Option<World>,
    max_turns: u64,
    workers: DashMap<AgentId, ActorHandle>,
}

impl std::fmt::Debug for TurnServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnServerState")
            .field("turn", &self.world.as_ref().map(World::turn))
            .field("max_turns", &self.max_turns)
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Authoritative game server.
pub struct TurnServer {
    pub world: World,
    pub max_turns: u64,
}

impl TurnServer {
    pub fn new(world: World, max_turns: u64) -> Self {
        Self { world, max_turns }
    }

    /// Spawn the server. Workers reach it by handle; only `TurnCompleted`
    /// goes out over the broker.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor = runtime.new_actor_with_name::<TurnServerState>("TurnServer".to_string());

        actor.model.world = Some(self.world);
        actor.model.max_turns = self.max_turns;

        actor.handle().subscribe::<ActionRequest>().await;
        actor.handle().subscribe::<TransferMaterial>().await;

        configure_handlers(&mut actor);

        actor.start().await
    }
}

fn configure_handlers(actor: &mut ManagedActor<Idle, TurnServerState>) {
    actor.mutate_on::<RegisterWorkers>(|actor, context| {
        for (id, handle) in &context.message().workers {
            actor.model.workers.insert(id.clone(), handle.clone());
        }
        debug!(workers = actor.model.workers.len(), "Workers registered");
        Reply::ready()
    });

    actor.mutate_on::<AdvanceTurn>(|actor, _context| {
        let Some(world) = actor.model.world.as_mut() else {
            return Reply::ready();
        };
        world.advance_turn();
        let turn = world.turn();

        let updates: Vec<(ActorHandle, TurnUpdate)> = actor
            .model
            .workers
            .iter()
            .filter_map(|entry| {
                let update = world.turn_update(entry.key())?;
                Some((entry.value().clone(), update))
            })
            .collect();
        trace!(turn, workers = updates.len(), "Turn opened");

        Reply::pending(async move {
            for (handle, update) in updates {
                handle.send(update).await;
            }
        })
    });

    actor.mutate_on::<CloseTurn>(|actor, _context| {
        let Some(world) = actor.model.world.as_ref() else {
            return Reply::ready();
        };
        let summary = world.snapshot();
        let outcome = world.outcome(actor.model.max_turns);
        let repaired = world.repaired();
        if let Some(outcome) = outcome {
            info!(turn = summary.turn, ?outcome, repaired, "Game over");
        }

        let broker = actor.broker().clone();
        Reply::pending(async move {
            broker
                .broadcast(TurnCompleted {
                    summary,
                    outcome,
                    repaired,
                })
                .await;
        })
    });

    actor.mutate_on::<ActionRequest>(|actor, context| {
        let msg = context.message().clone();
        let reply_envelope = context.reply_envelope();

        let response = match actor.model.world.as_mut() {
            Some(world) => world.apply(&msg),
            None => ActionResponse {
                action: msg.action,
                success: false,
                flag: ActionFlag::NotAllowed,
                request_id: msg.request_id,
            },
        };

        Reply::pending(async move {
            reply_envelope.send(response).await;
        })
    });

    actor.mutate_on::<TransferMaterial>(|actor, context| {
        let msg = context.message();
        let Some(inform) = actor.model.world.as_mut().and_then(|w| w.transfer(msg)) else {
            return Reply::ready();
        };

        let parties: Vec<ActorHandle> = [&inform.from_id, &inform.to_id]
            .into_iter()
            .filter_map(|id| {
                let handle = actor.model.workers.get(id).map(|h| h.value().clone());
                if handle.is_none() {
                    warn!(agent = %id, "No handle for transfer party");
                }
                handle
            })
            .collect();

        Reply::pending(async move {
            for handle in parties {
                handle.send(inform.clone()).await;
            }
        })
    });
}
