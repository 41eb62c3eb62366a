//! The contract shared by collector and repairer state machines.
//!
//! A worker is a plain struct. Every message it can receive is an
//! [`Inbound`] variant; handling one returns the [`Outbound`] effects the
//! hosting actor must carry out. Workers never touch handles, brokers, or
//! clocks, which keeps every decision reproducible in unit tests and in the
//! lock-step simulation.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collector::Collector;
use crate::config::WorkerConfig;
use crate::grid::WorkerAction;
use crate::messages::{
    AcceptProposal, ActionResponse, AgentId, CallForProposals, GameSetupInfo, HandoffComplete,
    Propose, RejectProposal, RepairPointCompleted, TransferInform, TransferMaterial, TurnUpdate,
};
use crate::repairer::Repairer;

/// Which side of the contract net a worker plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Collector,
    Repairer,
}

/// Every message a worker reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Setup(GameSetupInfo),
    Turn(TurnUpdate),
    ActionResult(ActionResponse),
    CallForProposals(CallForProposals),
    Propose(Propose),
    Accept(AcceptProposal),
    Reject(RejectProposal),
    TransferInform(TransferInform),
    HandoffComplete(HandoffComplete),
    RepairPointCompleted(RepairPointCompleted),
}

/// Messages published on the shared broadcast topic.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastMessage {
    CallForProposals(CallForProposals),
    RepairPointCompleted(RepairPointCompleted),
}

/// Messages addressed to a single peer.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectMessage {
    Propose(Propose),
    Accept(AcceptProposal),
    Reject(RejectProposal),
    HandoffComplete(HandoffComplete),
}

/// An effect requested by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Ask the server to perform this turn's action
    RequestAction { action: WorkerAction, request_id: u64 },
    /// Ask the server to move material between two agents
    RequestTransfer(TransferMaterial),
    Broadcast(BroadcastMessage),
    Direct { to: AgentId, message: DirectMessage },
}

impl Outbound {
    pub fn direct(to: impl Into<AgentId>, message: DirectMessage) -> Self {
        Outbound::Direct {
            to: to.into(),
            message,
        }
    }

    /// The action of a `RequestAction` effect.
    pub fn requested_action(&self) -> Option<WorkerAction> {
        match self {
            Outbound::RequestAction { action, .. } => Some(*action),
            _ => None,
        }
    }
}

macro_rules! inbound_from {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Inbound {
            fn from(msg: $ty) -> Self {
                Inbound::$variant(msg)
            }
        })*
    };
}

inbound_from! {
    GameSetupInfo => Setup,
    TurnUpdate => Turn,
    ActionResponse => ActionResult,
    CallForProposals => CallForProposals,
    Propose => Propose,
    AcceptProposal => Accept,
    RejectProposal => Reject,
    TransferInform => TransferInform,
    HandoffComplete => HandoffComplete,
    RepairPointCompleted => RepairPointCompleted,
}

impl From<BroadcastMessage> for Inbound {
    fn from(msg: BroadcastMessage) -> Self {
        match msg {
            BroadcastMessage::CallForProposals(m) => Inbound::CallForProposals(m),
            BroadcastMessage::RepairPointCompleted(m) => Inbound::RepairPointCompleted(m),
        }
    }
}

impl From<DirectMessage> for Inbound {
    fn from(msg: DirectMessage) -> Self {
        match msg {
            DirectMessage::Propose(m) => Inbound::Propose(m),
            DirectMessage::Accept(m) => Inbound::Accept(m),
            DirectMessage::Reject(m) => Inbound::Reject(m),
            DirectMessage::HandoffComplete(m) => Inbound::HandoffComplete(m),
        }
    }
}

/// A turn-driven agent.
pub trait Worker: Send + Sync + std::fmt::Debug + 'static {
    fn id(&self) -> &str;

    fn role(&self) -> WorkerRole;

    /// Process one message to completion and return the effects to execute.
    fn handle(&mut self, message: Inbound) -> Vec<Outbound>;

    /// Whether the worker currently carries material, by its own account.
    fn has_material(&self) -> bool;
}

/// Build a worker for `role`.
pub fn new_worker(role: WorkerRole, id: impl Into<AgentId>, config: WorkerConfig) -> Box<dyn Worker> {
    match role {
        WorkerRole::Collector => Box::new(Collector::new(id, config)),
        WorkerRole::Repairer => Box::new(Repairer::new(id, config)),
    }
}

/// Where a worker is in its server round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// Free to decide and issue an action
    #[default]
    Ready,
    /// An action is in flight; new turns are dropped until it resolves
    AwaitingServer {
        action: WorkerAction,
        issued_turn: u64,
        request_id: u64,
    },
}

/// One-outstanding-request guard around the server round-trip.
#[derive(Debug, Clone)]
pub struct TurnGate {
    phase: TurnPhase,
    response_timeout_turns: u64,
    next_request_id: u64,
}

impl TurnGate {
    pub fn new(response_timeout_turns: u64) -> Self {
        Self {
            phase: TurnPhase::Ready,
            response_timeout_turns,
            next_request_id: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, TurnPhase::AwaitingServer { .. })
    }

    /// The outstanding request, if any.
    pub fn pending(&self) -> Option<(WorkerAction, u64)> {
        match self.phase {
            TurnPhase::AwaitingServer {
                action, request_id, ..
            } => Some((action, request_id)),
            TurnPhase::Ready => None,
        }
    }

    /// Enter `AwaitingServer` and produce the request effect.
    pub fn issue(&mut self, action: WorkerAction, turn: u64) -> Outbound {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.phase = TurnPhase::AwaitingServer {
            action,
            issued_turn: turn,
            request_id,
        };
        Outbound::RequestAction { action, request_id }
    }

    /// Accept a server response. Returns false unless it answers the
    /// outstanding request; answers to expired requests are dropped here.
    pub fn resolve(&mut self, response: &ActionResponse) -> bool {
        match self.phase {
            TurnPhase::AwaitingServer {
                action, request_id, ..
            } if request_id == response.request_id && action == response.action => {
                self.phase = TurnPhase::Ready;
                true
            }
            _ => false,
        }
    }

    /// Give up on a request that has gone unanswered for too long. The
    /// abandoned action is returned so the caller can treat it as failed.
    pub fn expire(&mut self, turn: u64, agent: &str) -> Option<WorkerAction> {
        match self.phase {
            TurnPhase::AwaitingServer {
                action,
                issued_turn,
                ..
            } if turn >= issued_turn.saturating_add(self.response_timeout_turns) => {
                warn!(
                    agent,
                    turn,
                    issued_turn,
                    action = %action,
                    "Server response timed out, treating action as failed"
                );
                self.phase = TurnPhase::Ready;
                Some(action)
            }
            _ => None,
        }
    }
}
