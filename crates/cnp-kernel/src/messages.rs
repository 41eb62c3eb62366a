//! Message types exchanged between workers, the turn server, and setup glue.
//!
//! Every protocol message that belongs to a contract-net conversation carries
//! the conversation id so receivers can drop stale or foreign traffic.

use std::collections::{HashMap, HashSet};

use acton_reactive::prelude::ActorHandle;
use serde::{Deserialize, Serialize};

use crate::grid::{GridSize, Position, WorkerAction};

/// Agent identifier, unique within a game.
pub type AgentId = String;

/// Contract-net conversation identifier.
pub type ConversationId = String;

/// Static game description, delivered once to every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSetupInfo {
    pub size: GridSize,
    pub obstacles: HashSet<Position>,
    pub repair_points: Vec<Position>,
    pub collector_ids: Vec<AgentId>,
    pub repairer_ids: Vec<AgentId>,
}

/// Per-turn state pushed by the server to each worker.
///
/// `vision` lists visible material positions, nearest first.
/// `has_material` is the server's view of whether this worker carries material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnUpdate {
    pub position: Position,
    pub game_turn: u64,
    pub vision: Vec<Position>,
    pub has_material: bool,
}

/// Outcome flag attached to every action response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionFlag {
    /// Action applied
    Ok,
    /// Move left the board or hit an obstacle
    Blocked,
    /// TAKE on a cell without material, or DROP without carrying
    NoMaterial,
    /// DROP on a cell that is not an open repair point
    NoRepairPoint,
    /// The worker already acted this turn
    MaxActions,
    /// The action is not available to this worker's role or state
    NotAllowed,
}

/// Worker → server: perform one action this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub agent_id: AgentId,
    pub action: WorkerAction,
    /// Per-worker sequence number, echoed in the response
    pub request_id: u64,
}

/// Server → worker: result of an [`ActionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: WorkerAction,
    pub success: bool,
    pub flag: ActionFlag,
    /// `request_id` of the request this answers
    pub request_id: u64,
}

impl ActionResponse {
    /// Failed for a reason other than the per-turn action limit.
    pub fn is_hard_failure(&self) -> bool {
        !self.success && self.flag != ActionFlag::MaxActions
    }
}

/// Worker → server: move material from `from_id` to `to_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMaterial {
    pub from_id: AgentId,
    pub to_id: AgentId,
}

/// Server → both parties: a transfer went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInform {
    pub from_id: AgentId,
    pub to_id: AgentId,
}

// ============================================================================
// Contract-net protocol
// ============================================================================

/// Broadcast by a collector holding material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallForProposals {
    pub collector_id: AgentId,
    pub material_position: Position,
    pub conversation_id: ConversationId,
}

/// Repairer → collector. `bid` is the repairer's path length to the material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Propose {
    pub repairer_id: AgentId,
    pub bid: u32,
    pub conversation_id: ConversationId,
}

/// Collector → winning repairer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptProposal {
    pub meeting_position: Position,
    pub conversation_id: ConversationId,
}

/// Collector → losing repairer, or to a winner whose handoff timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectProposal {
    pub conversation_id: ConversationId,
}

/// Repairer → collector once the transfer has been requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffComplete {
    pub conversation_id: ConversationId,
}

/// Broadcast by a repairer after a successful DROP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairPointCompleted {
    pub position: Position,
}

// ============================================================================
// Setup glue
// ============================================================================

/// Directory of actor handles, sent to each worker before the first turn.
#[derive(Debug, Clone)]
pub struct RegisterPeers {
    /// Handle of the authoritative turn server
    pub server: ActorHandle,
    /// Every worker in the game, including the recipient
    pub peers: HashMap<AgentId, ActorHandle>,
}
