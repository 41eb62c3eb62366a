//! Collector: finds material, auctions it, and waits for a repairer to take
//! it off its hands.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::exploration::{ExplorationStep, Explorer};
use crate::grid::{Position, WorkerAction};
use crate::messages::{
    ActionFlag, ActionResponse, AgentId, GameSetupInfo, HandoffComplete, Propose, RejectProposal,
    TransferInform, TurnUpdate,
};
use crate::negotiation::{ContractNet, Evaluation, NegotiationPhase};
use crate::pathfinder::Path;
use crate::worker::{
    BroadcastMessage, DirectMessage, Inbound, Outbound, TurnGate, Worker, WorkerRole,
};

/// Coarse collector state, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// No setup or position yet
    Idle,
    Exploring,
    HoldingNoCommitment,
    BiddingOpen,
    AwaitingHandoff,
}

#[derive(Debug, Clone)]
pub struct Collector {
    id: AgentId,
    setup: Option<GameSetupInfo>,
    position: Option<Position>,
    turn: u64,
    has_material: bool,
    path: Path,
    gate: TurnGate,
    explorer: Explorer,
    cnp: ContractNet,
    rng: StdRng,
    collected: u32,
}

impl Collector {
    pub fn new(id: impl Into<AgentId>, config: WorkerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            id: id.into(),
            setup: None,
            position: None,
            turn: 0,
            has_material: false,
            path: Path::new(),
            gate: TurnGate::new(config.turn.response_timeout_turns),
            explorer: Explorer::new(&config.exploration),
            cnp: ContractNet::new(config.negotiation),
            rng,
            collected: 0,
        }
    }

    pub fn state(&self) -> CollectorState {
        match self.cnp.phase() {
            NegotiationPhase::AwaitingHandoff => CollectorState::AwaitingHandoff,
            NegotiationPhase::BiddingOpen => CollectorState::BiddingOpen,
            NegotiationPhase::Idle if self.has_material => CollectorState::HoldingNoCommitment,
            NegotiationPhase::Idle if self.setup.is_some() && self.position.is_some() => {
                CollectorState::Exploring
            }
            NegotiationPhase::Idle => CollectorState::Idle,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn negotiation(&self) -> &ContractNet {
        &self.cnp
    }

    pub fn explorer(&self) -> &Explorer {
        &self.explorer
    }

    pub fn gate(&self) -> &TurnGate {
        &self.gate
    }

    /// Materials picked up so far.
    pub fn collected(&self) -> u32 {
        self.collected
    }

    fn on_turn(&mut self, update: TurnUpdate) -> Vec<Outbound> {
        let mut out = Vec::new();
        self.position = Some(update.position);
        self.turn = update.game_turn;
        self.has_material = update.has_material;
        if self.setup.is_some() {
            self.explorer
                .observe(update.position, update.game_turn, &update.vision);
        }

        if !self.has_material {
            if let Some(commitment) = self.cnp.release() {
                info!(
                    agent = %self.id,
                    turn = self.turn,
                    conversation_id = %commitment.conversation_id,
                    repairer = %commitment.winner_id,
                    "Handoff complete, material released"
                );
            }
        }
        if let Some(stale) = self.cnp.expire_handoff(self.turn) {
            warn!(
                agent = %self.id,
                turn = self.turn,
                conversation_id = %stale.conversation_id,
                repairer = %stale.winner_id,
                "Handoff timed out, withdrawing award"
            );
            out.push(Outbound::direct(
                stale.winner_id,
                DirectMessage::Reject(RejectProposal {
                    conversation_id: stale.conversation_id,
                }),
            ));
        }

        if self.gate.is_busy() {
            match self.gate.expire(self.turn, &self.id) {
                Some(_) => self.path.clear(),
                None => {
                    debug!(agent = %self.id, turn = self.turn, "Action in flight, skipping turn");
                    return out;
                }
            }
        }

        let Some(position) = self.position.filter(|_| self.setup.is_some()) else {
            debug!(agent = %self.id, turn = self.turn, "No setup yet, skipping turn");
            return out;
        };

        if self.cnp.is_due(self.turn) {
            out.extend(self.close_bidding(position));
            return out;
        }

        if let Some(action) = self.path.pop_front() {
            out.push(self.gate.issue(action, self.turn));
            return out;
        }

        if self.has_material {
            match self.cnp.phase() {
                NegotiationPhase::Idle if self.cnp.retry_cooldown() > 0 => {
                    let left = self.cnp.cool_down();
                    debug!(agent = %self.id, turn = self.turn, left, "CNP retry cooling down");
                }
                NegotiationPhase::Idle => out.extend(self.open_bidding(position)),
                _ => {}
            }
            return out;
        }

        let Some(setup) = self.setup.as_ref() else {
            return out;
        };
        let step = self.explorer.next_step(
            position,
            self.turn,
            &update.vision,
            &setup.obstacles,
            setup.size,
            &mut self.rng,
        );
        match step {
            ExplorationStep::Take => out.push(self.gate.issue(WorkerAction::Take, self.turn)),
            ExplorationStep::Travel { target, mut path } => {
                debug!(agent = %self.id, turn = self.turn, goal = %target, steps = path.len(), "Heading to target");
                if let Some(first) = path.pop_front() {
                    self.path = path;
                    out.push(self.gate.issue(first, self.turn));
                }
            }
            ExplorationStep::Wander(action) => out.push(self.gate.issue(action, self.turn)),
            ExplorationStep::Stay => {
                debug!(agent = %self.id, turn = self.turn, "Nowhere to go");
            }
        }
        out
    }

    fn open_bidding(&mut self, position: Position) -> Vec<Outbound> {
        match self.cnp.start(&self.id, position, self.turn) {
            Some(cfp) => {
                info!(
                    agent = %self.id,
                    turn = self.turn,
                    conversation_id = %cfp.conversation_id,
                    position = %position,
                    "Call for proposals"
                );
                vec![Outbound::Broadcast(BroadcastMessage::CallForProposals(cfp))]
            }
            None => Vec::new(),
        }
    }

    fn close_bidding(&mut self, meeting_position: Position) -> Vec<Outbound> {
        match self.cnp.evaluate(meeting_position, self.turn, &mut self.rng) {
            Some(Evaluation::Awarded {
                commitment,
                accept,
                rejected,
            }) => {
                info!(
                    agent = %self.id,
                    turn = self.turn,
                    conversation_id = %commitment.conversation_id,
                    winner = %commitment.winner_id,
                    bid = commitment.winning_bid,
                    rejected = rejected.len(),
                    "Proposal accepted"
                );
                let mut out = vec![Outbound::direct(
                    commitment.winner_id,
                    DirectMessage::Accept(accept),
                )];
                out.extend(
                    rejected
                        .into_iter()
                        .map(|(id, reject)| Outbound::direct(id, DirectMessage::Reject(reject))),
                );
                out
            }
            Some(Evaluation::NoBids {
                conversation_id,
                retry_in,
            }) => {
                info!(
                    agent = %self.id,
                    turn = self.turn,
                    %conversation_id,
                    retry_in,
                    "No proposals received"
                );
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn on_action_response(&mut self, response: ActionResponse) -> Vec<Outbound> {
        if !self.gate.resolve(&response) {
            debug!(agent = %self.id, action = %response.action, "Unexpected action response");
            return Vec::new();
        }

        if response.flag == ActionFlag::MaxActions {
            debug!(agent = %self.id, turn = self.turn, action = %response.action, "Action limit reached, retrying next turn");
            self.path.push_front(response.action);
            return Vec::new();
        }

        if response.action == WorkerAction::Take {
            let Some(position) = self.position else {
                return Vec::new();
            };
            if response.success {
                self.has_material = true;
                self.collected += 1;
                self.explorer.record_take(position);
                self.path.clear();
                info!(agent = %self.id, turn = self.turn, %position, "Material taken");
                if self.cnp.can_start() {
                    return self.open_bidding(position);
                }
            } else {
                debug!(agent = %self.id, turn = self.turn, %position, flag = ?response.flag, "TAKE failed");
                self.explorer.record_failed_take(position, self.turn);
                self.path.clear();
            }
            return Vec::new();
        }

        if response.is_hard_failure() {
            debug!(
                agent = %self.id,
                turn = self.turn,
                action = %response.action,
                flag = ?response.flag,
                "Action failed, dropping path"
            );
            self.path.clear();
        }
        Vec::new()
    }

    fn on_proposal(&mut self, proposal: Propose) {
        if self.cnp.receive(&proposal) {
            debug!(
                agent = %self.id,
                repairer = %proposal.repairer_id,
                bid = proposal.bid,
                "Proposal received"
            );
        } else {
            debug!(
                agent = %self.id,
                repairer = %proposal.repairer_id,
                conversation_id = %proposal.conversation_id,
                "Stale proposal dropped"
            );
        }
    }

    fn on_handoff_complete(&self, done: HandoffComplete) {
        match self.cnp.commitment() {
            Some(c) if c.conversation_id == done.conversation_id => {
                debug!(agent = %self.id, conversation_id = %done.conversation_id, "Repairer reports handoff");
            }
            _ => {
                debug!(agent = %self.id, conversation_id = %done.conversation_id, "Stale handoff notice");
            }
        }
    }

    fn on_transfer_inform(&self, inform: TransferInform) {
        if inform.from_id == self.id {
            debug!(agent = %self.id, to = %inform.to_id, "Server confirmed transfer");
        }
    }
}

impl Worker for Collector {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> WorkerRole {
        WorkerRole::Collector
    }

    fn has_material(&self) -> bool {
        self.has_material
    }

    fn handle(&mut self, message: Inbound) -> Vec<Outbound> {
        match message {
            Inbound::Setup(setup) => {
                debug!(agent = %self.id, width = setup.size.width, height = setup.size.height, "Setup received");
                self.setup = Some(setup);
                Vec::new()
            }
            Inbound::Turn(update) => self.on_turn(update),
            Inbound::ActionResult(response) => self.on_action_response(response),
            Inbound::Propose(proposal) => {
                self.on_proposal(proposal);
                Vec::new()
            }
            Inbound::HandoffComplete(done) => {
                self.on_handoff_complete(done);
                Vec::new()
            }
            Inbound::TransferInform(inform) => {
                self.on_transfer_inform(inform);
                Vec::new()
            }
            Inbound::CallForProposals(_)
            | Inbound::Accept(_)
            | Inbound::Reject(_)
            | Inbound::RepairPointCompleted(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::config::NegotiationConfig;
    use crate::grid::GridSize;
    use crate::messages::{AcceptProposal, CallForProposals};

    fn setup(size: GridSize, obstacles: HashSet<Position>) -> GameSetupInfo {
        GameSetupInfo {
            size,
            obstacles,
            repair_points: vec![],
            collector_ids: vec!["c1".into()],
            repairer_ids: vec!["r1".into(), "r2".into()],
        }
    }

    fn turn(position: Position, game_turn: u64, vision: Vec<Position>, has_material: bool) -> Inbound {
        Inbound::Turn(TurnUpdate {
            position,
            game_turn,
            vision,
            has_material,
        })
    }

    /// Answer the collector's outstanding request.
    fn answer(c: &Collector, action: WorkerAction, success: bool, flag: ActionFlag) -> Inbound {
        let request_id = c.gate().pending().map_or(u64::MAX, |(_, id)| id);
        Inbound::ActionResult(ActionResponse {
            action,
            success,
            flag,
            request_id,
        })
    }

    fn ok(c: &Collector, action: WorkerAction) -> Inbound {
        answer(c, action, true, ActionFlag::Ok)
    }

    fn failed(c: &Collector, action: WorkerAction, flag: ActionFlag) -> Inbound {
        answer(c, action, false, flag)
    }

    fn only_action(out: &[Outbound]) -> Option<WorkerAction> {
        match out {
            [effect] => effect.requested_action(),
            _ => None,
        }
    }

    fn collector() -> Collector {
        let mut c = Collector::new("c1", WorkerConfig::default().with_seed(Some(42)));
        c.handle(Inbound::Setup(setup(GridSize::new(5, 5), HashSet::new())));
        c
    }

    /// Take material at `at` and return the call-for-proposals that followed.
    fn take_material(c: &mut Collector, at: Position, game_turn: u64) -> CallForProposals {
        let out = c.handle(turn(at, game_turn, vec![at], false));
        assert_eq!(only_action(&out), Some(WorkerAction::Take));
        let response = ok(c, WorkerAction::Take);
        let out = c.handle(response);
        match out.as_slice() {
            [Outbound::Broadcast(BroadcastMessage::CallForProposals(cfp))] => cfp.clone(),
            other => panic!("expected a call for proposals, got {other:?}"),
        }
    }

    fn propose(id: &str, bid: u32, cfp: &CallForProposals) -> Inbound {
        Inbound::Propose(Propose {
            repairer_id: id.into(),
            bid,
            conversation_id: cfp.conversation_id.clone(),
        })
    }

    #[test]
    fn test_heads_diagonally_to_visible_material() {
        let mut c = collector();
        let out = c.handle(turn(Position::new(0, 0), 1, vec![Position::new(2, 2)], false));
        assert_eq!(only_action(&out), Some(WorkerAction::SouthEast));
        assert_eq!(c.path(), &Path::from([WorkerAction::SouthEast]));
        assert_eq!(c.state(), CollectorState::Exploring);
    }

    #[test]
    fn test_turn_ignored_while_action_in_flight() {
        let mut c = collector();
        c.handle(turn(Position::new(0, 0), 1, vec![Position::new(3, 3)], false));
        let out = c.handle(turn(Position::new(0, 0), 2, vec![Position::new(3, 3)], false));
        assert!(out.is_empty());
        assert!(c.gate().is_busy());
    }

    #[test]
    fn test_blocked_move_clears_path() {
        let mut c = collector();
        c.handle(turn(Position::new(0, 0), 1, vec![Position::new(4, 4)], false));
        assert_eq!(c.path().len(), 3);
        c.handle(failed(&c, WorkerAction::SouthEast, ActionFlag::Blocked));
        assert!(c.path().is_empty());
        assert!(!c.gate().is_busy());

        // Still alive and deciding on the next turn.
        let out = c.handle(turn(Position::new(0, 0), 2, vec![Position::new(4, 4)], false));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_max_actions_requeues_move() {
        let mut c = collector();
        c.handle(turn(Position::new(0, 0), 1, vec![Position::new(2, 2)], false));
        c.handle(failed(&c, WorkerAction::SouthEast, ActionFlag::MaxActions));
        assert_eq!(
            c.path(),
            &Path::from([WorkerAction::SouthEast, WorkerAction::SouthEast])
        );
    }

    #[test]
    fn test_take_success_opens_bidding() {
        let mut c = collector();
        let here = Position::new(1, 1);
        let cfp = take_material(&mut c, here, 3);
        assert_eq!(cfp.collector_id, "c1");
        assert_eq!(cfp.material_position, here);
        assert!(c.has_material());
        assert_eq!(c.collected(), 1);
        assert_eq!(c.state(), CollectorState::BiddingOpen);
        assert_eq!(c.negotiation().open_conversation().unwrap().deadline_turn, 8);
    }

    #[test]
    fn test_take_failure_puts_source_on_cooldown() {
        let mut c = collector();
        let here = Position::new(1, 1);
        c.handle(turn(here, 3, vec![here], false));
        c.handle(failed(&c, WorkerAction::Take, ActionFlag::NoMaterial));
        assert!(c.explorer().is_cooling_down(here));
        assert!(!c.has_material());
        // Does not immediately retry the same cell.
        let out = c.handle(turn(here, 4, vec![here], false));
        assert_ne!(only_action(&out), Some(WorkerAction::Take));
    }

    #[test]
    fn test_take_over_action_limit_retried_without_cooldown() {
        let mut c = collector();
        let here = Position::new(1, 1);
        let out = c.handle(turn(here, 3, vec![here], false));
        assert_eq!(only_action(&out), Some(WorkerAction::Take));
        c.handle(failed(&c, WorkerAction::Take, ActionFlag::MaxActions));
        assert!(!c.explorer().is_cooling_down(here));
        assert!(!c.gate().is_busy());

        let out = c.handle(turn(here, 4, vec![here], false));
        assert_eq!(only_action(&out), Some(WorkerAction::Take));
        let out = c.handle(ok(&c, WorkerAction::Take));
        assert!(c.has_material());
        assert!(matches!(
            out.as_slice(),
            [Outbound::Broadcast(BroadcastMessage::CallForProposals(_))]
        ));
    }

    #[test]
    fn test_late_answer_to_timed_out_request_ignored() {
        let mut c = collector();
        c.handle(turn(Position::new(0, 0), 1, vec![Position::new(4, 4)], false));
        let (_, abandoned) = c.gate().pending().unwrap();
        c.handle(turn(Position::new(0, 0), 4, vec![Position::new(4, 4)], false));
        assert!(c.gate().is_busy());

        c.handle(Inbound::ActionResult(ActionResponse {
            action: WorkerAction::SouthEast,
            success: false,
            flag: ActionFlag::Blocked,
            request_id: abandoned,
        }));
        assert!(c.gate().is_busy());
        assert_eq!(c.path().len(), 3);
    }

    #[test]
    fn test_lowest_bidder_accepted_other_rejected() {
        let mut c = collector();
        let here = Position::new(2, 2);
        let cfp = take_material(&mut c, here, 1);
        c.handle(propose("r1", 3, &cfp));
        c.handle(propose("r2", 5, &cfp));

        // Before the deadline the collector just waits.
        assert!(c.handle(turn(here, 5, vec![], true)).is_empty());

        let out = c.handle(turn(here, 6, vec![], true));
        assert_eq!(
            out,
            vec![
                Outbound::direct(
                    "r1",
                    DirectMessage::Accept(AcceptProposal {
                        meeting_position: here,
                        conversation_id: cfp.conversation_id.clone(),
                    })
                ),
                Outbound::direct(
                    "r2",
                    DirectMessage::Reject(RejectProposal {
                        conversation_id: cfp.conversation_id.clone(),
                    })
                ),
            ]
        );
        assert_eq!(c.state(), CollectorState::AwaitingHandoff);
    }

    #[test]
    fn test_no_bids_then_retry_after_cooldown() {
        let mut c = collector();
        let here = Position::new(0, 0);
        let cfp = take_material(&mut c, here, 1);
        assert!(c.handle(turn(here, 6, vec![], true)).is_empty());
        let cooldown = c.negotiation().retry_cooldown();
        assert!((3..=8).contains(&cooldown));
        assert!(c.negotiation().open_conversation().is_none());
        assert_eq!(c.state(), CollectorState::HoldingNoCommitment);

        let mut game_turn = 7;
        let mut reopened = None;
        while reopened.is_none() {
            let out = c.handle(turn(here, game_turn, vec![], true));
            if let [Outbound::Broadcast(BroadcastMessage::CallForProposals(next))] = out.as_slice() {
                reopened = Some((game_turn, next.clone()));
            }
            game_turn += 1;
            assert!(game_turn < 30);
        }
        let (at, next) = reopened.unwrap();
        assert_eq!(at, 7 + u64::from(cooldown));
        assert_ne!(next.conversation_id, cfp.conversation_id);
    }

    #[test]
    fn test_awaiting_handoff_released_when_material_leaves() {
        let mut c = collector();
        let here = Position::new(2, 2);
        let cfp = take_material(&mut c, here, 1);
        c.handle(propose("r1", 2, &cfp));
        c.handle(turn(here, 6, vec![], true));

        // Stays put, and never opens a second conversation.
        for t in 7..40 {
            assert!(c.handle(turn(here, t, vec![], true)).is_empty());
            assert_eq!(c.state(), CollectorState::AwaitingHandoff);
        }
        c.handle(Inbound::HandoffComplete(HandoffComplete {
            conversation_id: cfp.conversation_id.clone(),
        }));
        assert_eq!(c.state(), CollectorState::AwaitingHandoff);

        c.handle(turn(here, 40, vec![], false));
        assert!(c.negotiation().commitment().is_none());
        assert!(!c.has_material());
    }

    #[test]
    fn test_stale_proposal_does_not_mutate_state() {
        let mut c = collector();
        let cfp = take_material(&mut c, Position::new(0, 0), 1);
        c.handle(Inbound::Propose(Propose {
            repairer_id: "r1".into(),
            bid: 1,
            conversation_id: "cnp-elsewhere".into(),
        }));
        assert!(c.negotiation().open_conversation().unwrap().proposals().is_empty());
        assert_eq!(
            c.negotiation().open_conversation().unwrap().id,
            cfp.conversation_id
        );
    }

    #[test]
    fn test_handoff_timeout_rejects_winner() {
        let config = WorkerConfig {
            negotiation: NegotiationConfig {
                handoff_timeout_turns: Some(10),
                ..NegotiationConfig::default()
            },
            ..WorkerConfig::default()
        }
        .with_seed(Some(1));
        let mut c = Collector::new("c1", config);
        c.handle(Inbound::Setup(setup(GridSize::new(5, 5), HashSet::new())));
        let here = Position::new(1, 1);
        let cfp = take_material(&mut c, here, 1);
        c.handle(propose("r1", 2, &cfp));
        c.handle(turn(here, 6, vec![], true));

        assert!(c.handle(turn(here, 15, vec![], true)).is_empty());
        let out = c.handle(turn(here, 16, vec![], true));
        assert_eq!(
            out[0],
            Outbound::direct(
                "r1",
                DirectMessage::Reject(RejectProposal {
                    conversation_id: cfp.conversation_id.clone(),
                })
            )
        );
        // The freed collector opens a fresh conversation in the same turn.
        assert!(matches!(
            out.get(1),
            Some(Outbound::Broadcast(BroadcastMessage::CallForProposals(next)))
                if next.conversation_id != cfp.conversation_id
        ));
    }

    #[test]
    fn test_unanswered_action_times_out() {
        let mut c = collector();
        c.handle(turn(Position::new(0, 0), 1, vec![Position::new(4, 4)], false));
        assert!(c.handle(turn(Position::new(0, 0), 2, vec![], false)).is_empty());
        assert!(c.handle(turn(Position::new(0, 0), 3, vec![], false)).is_empty());
        let out = c.handle(turn(Position::new(0, 0), 4, vec![Position::new(4, 4)], false));
        assert_eq!(only_action(&out), Some(WorkerAction::SouthEast));
    }

    #[test]
    fn test_no_decision_without_setup() {
        let mut c = Collector::new("c1", WorkerConfig::default().with_seed(Some(3)));
        let out = c.handle(turn(Position::new(0, 0), 1, vec![Position::new(1, 1)], false));
        assert!(out.is_empty());
        assert_eq!(c.state(), CollectorState::Idle);
    }
}
