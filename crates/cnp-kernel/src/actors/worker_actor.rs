//! WorkerActor: hosts a collector or repairer state machine.
//!
//! The actor owns nothing but the worker, the server handle, and the peer
//! directory. Every inbound message is converted to an [`Inbound`], handed to
//! the worker, and the returned effects are routed:
//!
//! - `RequestAction` goes to the server via `new_envelope`, so the
//!   `ActionResponse` comes back through the server's `reply_envelope()`
//! - `RequestTransfer` goes straight to the server
//! - `Broadcast` goes through the broker (only repairers subscribe)
//! - `Direct` goes to the addressed peer's handle

use std::collections::HashMap;

use acton_reactive::prelude::*;
use tracing::{debug, warn};

use crate::messages::{
    AcceptProposal, ActionRequest, ActionResponse, AgentId, CallForProposals, GameSetupInfo,
    HandoffComplete, Propose, RegisterPeers, RejectProposal, RepairPointCompleted,
    TransferInform, TransferMaterial, TurnUpdate,
};
use crate::worker::{BroadcastMessage, DirectMessage, Inbound, Outbound, Worker, WorkerRole};

/// Actor state for WorkerActor.
#[derive(Clone)]
pub struct WorkerActorState<W> {
    worker: Option<W>,
    server: Option<ActorHandle>,
    peers: HashMap<AgentId, ActorHandle>,
}

impl<W> Default for WorkerActorState<W> {
    fn default() -> Self {
        Self {
            worker: None,
            server: None,
            peers: HashMap::new(),
        }
    }
}

impl<W: Worker> std::fmt::Debug for WorkerActorState<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerActorState")
            .field("worker", &self.worker.as_ref().map(|w| w.id()))
            .field("server", &self.server.is_some())
            .field("peers", &self.peers.len())
            .finish()
    }
}

/// Effects resolved against the peer directory, ready to send.
#[derive(Debug, Default)]
struct Dispatch {
    action: Option<ActionRequest>,
    transfers: Vec<TransferMaterial>,
    broadcasts: Vec<BroadcastMessage>,
    direct: Vec<(ActorHandle, DirectMessage)>,
}

impl<W: Worker> WorkerActorState<W> {
    fn react(&mut self, message: Inbound) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let Some(worker) = self.worker.as_mut() else {
            return dispatch;
        };

        for effect in worker.handle(message) {
            match effect {
                Outbound::RequestAction { action, request_id } => {
                    dispatch.action = Some(ActionRequest {
                        agent_id: worker.id().to_string(),
                        action,
                        request_id,
                    });
                }
                Outbound::RequestTransfer(transfer) => dispatch.transfers.push(transfer),
                Outbound::Broadcast(message) => dispatch.broadcasts.push(message),
                Outbound::Direct { to, message } => match self.peers.get(&to) {
                    Some(handle) => dispatch.direct.push((handle.clone(), message)),
                    None => warn!(agent = %worker.id(), peer = %to, "No handle for peer, message dropped"),
                },
            }
        }

        if dispatch.action.is_some() && self.server.is_none() {
            warn!(agent = %worker.id(), "No server registered, action dropped");
        }
        dispatch
    }
}

impl Dispatch {
    /// Send everything that needs only plain handles.
    async fn deliver(self, server: Option<ActorHandle>) {
        if let Some(server) = server {
            for transfer in self.transfers {
                server.send(transfer).await;
            }
        }
        for (peer, message) in self.direct {
            match message {
                DirectMessage::Propose(m) => peer.send(m).await,
                DirectMessage::Accept(m) => peer.send(m).await,
                DirectMessage::Reject(m) => peer.send(m).await,
                DirectMessage::HandoffComplete(m) => peer.send(m).await,
            }
        }
    }
}

/// Actor wrapper for a [`Worker`].
pub struct WorkerActor<W> {
    pub worker: W,
}

impl<W: Worker + Clone> WorkerActor<W> {
    pub fn new(worker: W) -> Self {
        Self { worker }
    }

    /// Spawn this worker in the given runtime.
    ///
    /// Repairers subscribe to `CallForProposals` and `RepairPointCompleted`
    /// broadcasts. Everything else arrives by direct send.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let role = self.worker.role();
        let mut actor = runtime
            .new_actor_with_name::<WorkerActorState<W>>(format!("Worker:{}", self.worker.id()));

        actor.model.worker = Some(self.worker);

        if role == WorkerRole::Repairer {
            actor.handle().subscribe::<CallForProposals>().await;
            actor.handle().subscribe::<RepairPointCompleted>().await;
        }
        actor.handle().subscribe::<ActionResponse>().await;

        configure_worker_actor(&mut actor);

        actor.start().await
    }
}

/// Register a handler that feeds `$msg` to the worker and routes its effects.
macro_rules! relay {
    ($actor:expr, $msg:ty) => {
        $actor.mutate_on::<$msg>(|actor, context| {
            let mut dispatch = actor.model.react(context.message().clone().into());

            let request = dispatch.action.take().and_then(|request| {
                actor
                    .model
                    .server
                    .as_ref()
                    .map(|server| (context.new_envelope(&server.reply_address()), request))
            });
            let server = actor.model.server.clone();
            let broker = actor.broker().clone();
            let broadcasts = std::mem::take(&mut dispatch.broadcasts);

            Reply::pending(async move {
                if let Some((envelope, request)) = request {
                    envelope.send(request).await;
                }
                for message in broadcasts {
                    match message {
                        BroadcastMessage::CallForProposals(m) => broker.broadcast(m).await,
                        BroadcastMessage::RepairPointCompleted(m) => broker.broadcast(m).await,
                    }
                }
                dispatch.deliver(server).await;
            })
        });
    };
}

fn configure_worker_actor<W: Worker + Clone>(actor: &mut ManagedActor<Idle, WorkerActorState<W>>) {
    actor.mutate_on::<RegisterPeers>(|actor, context| {
        let msg = context.message();
        actor.model.server = Some(msg.server.clone());
        actor.model.peers = msg.peers.clone();
        debug!(
            agent = ?actor.model.worker.as_ref().map(|w| w.id().to_string()),
            peers = actor.model.peers.len(),
            "Registered peers"
        );
        Reply::ready()
    });

    relay!(actor, GameSetupInfo);
    relay!(actor, TurnUpdate);
    relay!(actor, ActionResponse);
    relay!(actor, CallForProposals);
    relay!(actor, Propose);
    relay!(actor, AcceptProposal);
    relay!(actor, RejectProposal);
    relay!(actor, TransferInform);
    relay!(actor, HandoffComplete);
    relay!(actor, RepairPointCompleted);
}
