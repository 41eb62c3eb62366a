//! Repairer: bids on calls for proposals, meets the collector, and carries
//! the material to an open repair point.
//!
//! Arrival at a meeting point or repair point is noticed when the last move
//! of a path succeeds. The transfer or DROP that follows is deferred to the
//! next turn, after the server has confirmed the new position.

use tracing::{debug, info, warn};

use crate::config::{TransferConfig, WorkerConfig};
use crate::grid::{Position, WorkerAction};
use crate::messages::{
    AcceptProposal, ActionFlag, ActionResponse, AgentId, CallForProposals, ConversationId,
    GameSetupInfo, HandoffComplete, Propose, RejectProposal, RepairPointCompleted,
    TransferInform, TransferMaterial, TurnUpdate,
};
use crate::pathfinder::{find_path_with, Heuristic, Path};
use crate::worker::{
    BroadcastMessage, DirectMessage, Inbound, Outbound, TurnGate, Worker, WorkerRole,
};

/// The repairer's side of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engagement {
    pub conversation_id: ConversationId,
    pub initiator_id: AgentId,
    pub bid: u32,
    /// Turn the proposal was sent
    pub bid_turn: u64,
    /// Set once the collector accepts
    pub meeting_position: Option<Position>,
    pub transfer_attempts: u32,
    pub last_transfer_turn: Option<u64>,
}

/// Work held over from the previous turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    Transfer,
    Drop,
}

/// Coarse repairer state, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairerState {
    Idle,
    /// Proposal sent, waiting for accept or reject
    Bidding,
    /// Accepted, travelling to or waiting at the meeting point
    Handoff,
    /// Carrying material towards a repair point
    Delivering,
}

#[derive(Debug, Clone)]
pub struct Repairer {
    id: AgentId,
    heuristic: Heuristic,
    transfer: TransferConfig,
    answer_timeout_turns: u64,
    setup: Option<GameSetupInfo>,
    position: Option<Position>,
    turn: u64,
    has_material: bool,
    path: Path,
    path_target: Option<Position>,
    gate: TurnGate,
    engagement: Option<Engagement>,
    deferred: Option<Deferred>,
    repair_points: Vec<Position>,
    repairs_completed: u32,
}

impl Repairer {
    pub fn new(id: impl Into<AgentId>, config: WorkerConfig) -> Self {
        Self {
            id: id.into(),
            heuristic: config.exploration.heuristic,
            answer_timeout_turns: config.proposal_answer_turns(),
            transfer: config.transfer,
            setup: None,
            position: None,
            turn: 0,
            has_material: false,
            path: Path::new(),
            path_target: None,
            gate: TurnGate::new(config.turn.response_timeout_turns),
            engagement: None,
            deferred: None,
            repair_points: Vec::new(),
            repairs_completed: 0,
        }
    }

    pub fn state(&self) -> RepairerState {
        match &self.engagement {
            _ if self.has_material => RepairerState::Delivering,
            Some(e) if e.meeting_position.is_some() => RepairerState::Handoff,
            Some(_) => RepairerState::Bidding,
            None => RepairerState::Idle,
        }
    }

    pub fn engagement(&self) -> Option<&Engagement> {
        self.engagement.as_ref()
    }

    pub fn gate(&self) -> &TurnGate {
        &self.gate
    }

    pub fn deferred(&self) -> Option<Deferred> {
        self.deferred
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_target(&self) -> Option<Position> {
        self.path_target
    }

    /// Repair points this repairer still believes are open.
    pub fn repair_points(&self) -> &[Position] {
        &self.repair_points
    }

    pub fn repairs_completed(&self) -> u32 {
        self.repairs_completed
    }

    fn plan(&self, from: Position, to: Position) -> Option<Path> {
        let setup = self.setup.as_ref()?;
        find_path_with(self.heuristic, from, to, &setup.obstacles, setup.size)
    }

    fn clear_path(&mut self) {
        self.path.clear();
        self.path_target = None;
    }

    fn on_setup(&mut self, setup: GameSetupInfo) {
        debug!(
            agent = %self.id,
            repair_points = setup.repair_points.len(),
            "Setup received"
        );
        self.repair_points = setup.repair_points.clone();
        self.setup = Some(setup);
    }

    /// Forget a proposal that has gone unanswered past the bidding window.
    fn expire_unanswered_bid(&mut self) {
        let expired = self.engagement.as_ref().filter(|e| {
            e.meeting_position.is_none()
                && self.turn >= e.bid_turn.saturating_add(self.answer_timeout_turns)
        });
        if let Some(stale) = expired {
            warn!(
                agent = %self.id,
                turn = self.turn,
                conversation_id = %stale.conversation_id,
                collector = %stale.initiator_id,
                bid_turn = stale.bid_turn,
                "Proposal never answered, withdrawing"
            );
            self.engagement = None;
        }
    }

    fn on_call_for_proposals(&mut self, cfp: CallForProposals) -> Vec<Outbound> {
        if self.has_material {
            return Vec::new();
        }
        self.expire_unanswered_bid();
        if let Some(current) = &self.engagement {
            debug!(
                agent = %self.id,
                busy_with = %current.conversation_id,
                ignored = %cfp.conversation_id,
                "Already engaged, not bidding"
            );
            return Vec::new();
        }
        let Some(position) = self.position else {
            return Vec::new();
        };
        let Some(path) = self.plan(position, cfp.material_position) else {
            debug!(
                agent = %self.id,
                conversation_id = %cfp.conversation_id,
                material = %cfp.material_position,
                "No path to material, not bidding"
            );
            return Vec::new();
        };

        let bid = path.len() as u32;
        debug!(
            agent = %self.id,
            conversation_id = %cfp.conversation_id,
            collector = %cfp.collector_id,
            bid,
            "Bidding"
        );
        self.engagement = Some(Engagement {
            conversation_id: cfp.conversation_id.clone(),
            initiator_id: cfp.collector_id.clone(),
            bid,
            bid_turn: self.turn,
            meeting_position: None,
            transfer_attempts: 0,
            last_transfer_turn: None,
        });
        vec![Outbound::direct(
            cfp.collector_id,
            DirectMessage::Propose(Propose {
                repairer_id: self.id.clone(),
                bid,
                conversation_id: cfp.conversation_id,
            }),
        )]
    }

    fn on_accept(&mut self, accept: AcceptProposal) {
        let Some(engagement) = self
            .engagement
            .as_mut()
            .filter(|e| e.conversation_id == accept.conversation_id && e.meeting_position.is_none())
        else {
            debug!(agent = %self.id, conversation_id = %accept.conversation_id, "Stale accept dropped");
            return;
        };
        engagement.meeting_position = Some(accept.meeting_position);
        info!(
            agent = %self.id,
            conversation_id = %accept.conversation_id,
            meeting = %accept.meeting_position,
            "Proposal accepted, heading to meeting point"
        );

        self.clear_path();
        if self.position == Some(accept.meeting_position) {
            self.deferred = Some(Deferred::Transfer);
        } else if let Some(path) = self
            .position
            .and_then(|from| self.plan(from, accept.meeting_position))
        {
            self.path = path;
            self.path_target = Some(accept.meeting_position);
        }
    }

    fn on_reject(&mut self, reject: RejectProposal) {
        let matches = self
            .engagement
            .as_ref()
            .is_some_and(|e| e.conversation_id == reject.conversation_id);
        if matches {
            debug!(agent = %self.id, conversation_id = %reject.conversation_id, "Proposal rejected");
            self.abandon();
        } else {
            debug!(agent = %self.id, conversation_id = %reject.conversation_id, "Stale reject dropped");
        }
    }

    /// Forget the current conversation and anything travelling with it.
    fn abandon(&mut self) {
        let heading_to_meeting = self
            .engagement
            .take()
            .and_then(|e| e.meeting_position)
            .is_some_and(|meeting| self.path_target == Some(meeting));
        if heading_to_meeting {
            self.clear_path();
        }
        if self.deferred == Some(Deferred::Transfer) {
            self.deferred = None;
        }
    }

    fn on_transfer_inform(&mut self, inform: TransferInform) {
        if inform.to_id != self.id {
            return;
        }
        info!(agent = %self.id, from = %inform.from_id, "Material received");
        self.has_material = true;
        self.abandon();
    }

    fn on_repair_point_completed(&mut self, done: RepairPointCompleted) {
        self.repair_points.retain(|p| *p != done.position);
        if self.path_target == Some(done.position) {
            debug!(agent = %self.id, position = %done.position, "Target repair point closed, replanning");
            self.clear_path();
        }
        if self.deferred == Some(Deferred::Drop) && self.position == Some(done.position) {
            self.deferred = None;
        }
    }

    fn on_turn(&mut self, update: TurnUpdate) -> Vec<Outbound> {
        self.position = Some(update.position);
        self.turn = update.game_turn;
        if update.has_material && !self.has_material {
            info!(agent = %self.id, turn = self.turn, "Carrying material");
        }
        self.has_material = update.has_material;
        if self.has_material && self.engagement.is_some() {
            self.abandon();
        }
        self.expire_unanswered_bid();

        if self.gate.is_busy() {
            match self.gate.expire(self.turn, &self.id) {
                Some(_) => self.clear_path(),
                None => return Vec::new(),
            }
        }

        let Some(position) = self.position.filter(|_| self.setup.is_some()) else {
            return Vec::new();
        };

        match self.deferred.take() {
            Some(Deferred::Transfer) => return self.request_transfer(),
            Some(Deferred::Drop) if self.has_material => {
                return vec![self.gate.issue(WorkerAction::Drop, self.turn)];
            }
            _ => {}
        }

        if let Some(action) = self.path.pop_front() {
            return vec![self.gate.issue(action, self.turn)];
        }

        if self.has_material {
            return self.deliver(position);
        }

        let Some(meeting) = self.engagement.as_ref().and_then(|e| e.meeting_position) else {
            return Vec::new();
        };
        if position == meeting {
            return self.retry_transfer();
        }
        match self.plan(position, meeting) {
            Some(mut path) => {
                debug!(agent = %self.id, turn = self.turn, %meeting, "Replanning to meeting point");
                self.path_target = Some(meeting);
                match path.pop_front() {
                    Some(first) => {
                        self.path = path;
                        vec![self.gate.issue(first, self.turn)]
                    }
                    None => Vec::new(),
                }
            }
            None => {
                warn!(agent = %self.id, turn = self.turn, %meeting, "Meeting point unreachable, abandoning");
                self.abandon();
                Vec::new()
            }
        }
    }

    /// Ask the server for the material and tell the collector.
    fn request_transfer(&mut self) -> Vec<Outbound> {
        let Some(engagement) = self.engagement.as_mut() else {
            return Vec::new();
        };
        engagement.transfer_attempts += 1;
        engagement.last_transfer_turn = Some(self.turn);
        info!(
            agent = %self.id,
            turn = self.turn,
            conversation_id = %engagement.conversation_id,
            collector = %engagement.initiator_id,
            attempt = engagement.transfer_attempts,
            "Requesting transfer"
        );
        vec![
            Outbound::RequestTransfer(TransferMaterial {
                from_id: engagement.initiator_id.clone(),
                to_id: self.id.clone(),
            }),
            Outbound::direct(
                engagement.initiator_id.clone(),
                DirectMessage::HandoffComplete(HandoffComplete {
                    conversation_id: engagement.conversation_id.clone(),
                }),
            ),
        ]
    }

    /// At the meeting point without material: ask again, or give up.
    fn retry_transfer(&mut self) -> Vec<Outbound> {
        let Some(engagement) = self.engagement.as_ref() else {
            return Vec::new();
        };
        let due = engagement
            .last_transfer_turn
            .map_or(true, |last| {
                self.turn >= last.saturating_add(self.transfer.retry_after_turns)
            });
        if !due {
            return Vec::new();
        }
        if engagement.transfer_attempts >= self.transfer.max_attempts {
            warn!(
                agent = %self.id,
                turn = self.turn,
                conversation_id = %engagement.conversation_id,
                attempts = engagement.transfer_attempts,
                "Transfer never arrived, abandoning"
            );
            self.abandon();
            return Vec::new();
        }
        self.request_transfer()
    }

    /// Head for the closest open repair point, or drop if already on one.
    fn deliver(&mut self, position: Position) -> Vec<Outbound> {
        if self.repair_points.contains(&position) {
            return vec![self.gate.issue(WorkerAction::Drop, self.turn)];
        }

        let closest = self
            .repair_points
            .iter()
            .filter_map(|target| self.plan(position, *target).map(|path| (*target, path)))
            .min_by_key(|(target, path)| (path.len(), *target));
        let Some((target, mut path)) = closest else {
            debug!(agent = %self.id, turn = self.turn, "No reachable repair point");
            return Vec::new();
        };

        debug!(agent = %self.id, turn = self.turn, goal = %target, steps = path.len(), "Heading to repair point");
        self.path_target = Some(target);
        match path.pop_front() {
            Some(first) => {
                self.path = path;
                vec![self.gate.issue(first, self.turn)]
            }
            None => Vec::new(),
        }
    }

    fn on_action_response(&mut self, response: ActionResponse) -> Vec<Outbound> {
        if !self.gate.resolve(&response) {
            debug!(agent = %self.id, action = %response.action, "Unexpected action response");
            return Vec::new();
        }

        match response.action {
            WorkerAction::Drop => self.on_drop_response(&response),
            WorkerAction::Take => Vec::new(),
            action if response.success => {
                if let Some(position) = self.position.and_then(|p| {
                    self.setup
                        .as_ref()
                        .and_then(|setup| p.apply_move(action, setup.size))
                }) {
                    self.position = Some(position);
                }
                if self.path.is_empty() {
                    self.arrive();
                }
                Vec::new()
            }
            action if response.flag == ActionFlag::MaxActions => {
                self.path.push_front(action);
                Vec::new()
            }
            action => {
                debug!(
                    agent = %self.id,
                    turn = self.turn,
                    action = %action,
                    flag = ?response.flag,
                    "Move failed, dropping path"
                );
                self.clear_path();
                Vec::new()
            }
        }
    }

    fn arrive(&mut self) {
        let Some(target) = self.path_target.take() else {
            return;
        };
        let meeting = self.engagement.as_ref().and_then(|e| e.meeting_position);
        if !self.has_material && meeting == Some(target) {
            debug!(agent = %self.id, turn = self.turn, goal = %target, "At meeting point");
            self.deferred = Some(Deferred::Transfer);
        } else if self.has_material && self.repair_points.contains(&target) {
            debug!(agent = %self.id, turn = self.turn, goal = %target, "At repair point");
            self.deferred = Some(Deferred::Drop);
        }
    }

    fn on_drop_response(&mut self, response: &ActionResponse) -> Vec<Outbound> {
        let Some(position) = self.position else {
            return Vec::new();
        };
        if response.success {
            self.has_material = false;
            self.repairs_completed += 1;
            self.repair_points.retain(|p| *p != position);
            info!(
                agent = %self.id,
                turn = self.turn,
                %position,
                repairs = self.repairs_completed,
                "Repair complete"
            );
            return vec![Outbound::Broadcast(BroadcastMessage::RepairPointCompleted(
                RepairPointCompleted { position },
            ))];
        }
        if response.flag == ActionFlag::NoRepairPoint {
            debug!(agent = %self.id, %position, "Repair point already closed");
            self.repair_points.retain(|p| *p != position);
        } else {
            debug!(agent = %self.id, %position, flag = ?response.flag, "DROP failed");
        }
        Vec::new()
    }
}

impl Worker for Repairer {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> WorkerRole {
        WorkerRole::Repairer
    }

    fn has_material(&self) -> bool {
        self.has_material
    }

    fn handle(&mut self, message: Inbound) -> Vec<Outbound> {
        match message {
            Inbound::Setup(setup) => {
                self.on_setup(setup);
                Vec::new()
            }
            Inbound::Turn(update) => self.on_turn(update),
            Inbound::ActionResult(response) => self.on_action_response(response),
            Inbound::CallForProposals(cfp) => self.on_call_for_proposals(cfp),
            Inbound::Accept(accept) => {
                self.on_accept(accept);
                Vec::new()
            }
            Inbound::Reject(reject) => {
                self.on_reject(reject);
                Vec::new()
            }
            Inbound::TransferInform(inform) => {
                self.on_transfer_inform(inform);
                Vec::new()
            }
            Inbound::RepairPointCompleted(done) => {
                self.on_repair_point_completed(done);
                Vec::new()
            }
            Inbound::Propose(_) | Inbound::HandoffComplete(_) => Vec::new(),
        }
    }
}
