//! Initiator side of the contract-net protocol.
//!
//! A collector holding material runs one conversation at a time:
//!
//! ```text
//! Idle ──start──▶ BiddingOpen ──evaluate (deadline)──┬─▶ AwaitingHandoff ──release──▶ Idle
//!                     │                              │      (winner accepted)
//!                     │ receive(Propose)             └─▶ Idle + retry cooldown
//!                     ▼                                     (no bids)
//!               proposals[bidder] = bid  (last write wins)
//! ```
//!
//! Proposals are single-writer state owned by the collector and cleared in
//! one step when the conversation closes. Messages with any other
//! conversation id are ignored.

use std::collections::BTreeMap;

use mti::prelude::*;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::NegotiationConfig;
use crate::grid::Position;
use crate::messages::{
    AcceptProposal, AgentId, CallForProposals, ConversationId, Propose, RejectProposal,
};

/// Fresh, opaque conversation id.
pub fn new_conversation_id() -> ConversationId {
    "cnp".create_type_id::<V7>().to_string()
}

/// Coarse negotiation state of a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    BiddingOpen,
    AwaitingHandoff,
}

/// A call-for-proposals that is still collecting bids.
#[derive(Debug, Clone)]
pub struct OpenConversation {
    pub id: ConversationId,
    pub material_position: Position,
    pub deadline_turn: u64,
    proposals: BTreeMap<AgentId, u32>,
}

impl OpenConversation {
    pub fn proposals(&self) -> &BTreeMap<AgentId, u32> {
        &self.proposals
    }
}

/// The collector's promise to hand its material to a winning bidder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub conversation_id: ConversationId,
    pub winner_id: AgentId,
    pub winning_bid: u32,
    pub since_turn: u64,
}

/// Outcome of closing the bidding window.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Nobody bid; no new conversation for `retry_in` turns.
    NoBids {
        conversation_id: ConversationId,
        retry_in: u32,
    },
    /// Lowest bidder wins; everybody else is rejected.
    Awarded {
        commitment: Commitment,
        accept: AcceptProposal,
        rejected: Vec<(AgentId, RejectProposal)>,
    },
}

/// Initiator-side negotiation engine for one collector.
#[derive(Debug, Clone)]
pub struct ContractNet {
    config: NegotiationConfig,
    open: Option<OpenConversation>,
    awaiting_handoff: Option<Commitment>,
    retry_cooldown: u32,
}

impl ContractNet {
    pub fn new(config: NegotiationConfig) -> Self {
        Self {
            config,
            open: None,
            awaiting_handoff: None,
            retry_cooldown: 0,
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        if self.awaiting_handoff.is_some() {
            NegotiationPhase::AwaitingHandoff
        } else if self.open.is_some() {
            NegotiationPhase::BiddingOpen
        } else {
            NegotiationPhase::Idle
        }
    }

    pub fn open_conversation(&self) -> Option<&OpenConversation> {
        self.open.as_ref()
    }

    pub fn commitment(&self) -> Option<&Commitment> {
        self.awaiting_handoff.as_ref()
    }

    pub fn retry_cooldown(&self) -> u32 {
        self.retry_cooldown
    }

    /// True when a new call-for-proposals may be issued.
    pub fn can_start(&self) -> bool {
        self.open.is_none() && self.awaiting_handoff.is_none() && self.retry_cooldown == 0
    }

    /// Open a new conversation for material held at `material_position`.
    ///
    /// Refused while a conversation is open or a handoff is pending.
    pub fn start(
        &mut self,
        initiator_id: &str,
        material_position: Position,
        turn: u64,
    ) -> Option<CallForProposals> {
        if let Some(commitment) = &self.awaiting_handoff {
            warn!(
                agent = initiator_id,
                pending = %commitment.conversation_id,
                "Refusing new CNP while awaiting handoff"
            );
            return None;
        }
        if let Some(open) = &self.open {
            debug!(
                agent = initiator_id,
                open = %open.id,
                "Refusing new CNP while bidding is open"
            );
            return None;
        }

        let conversation = OpenConversation {
            id: new_conversation_id(),
            material_position,
            deadline_turn: turn.saturating_add(self.config.bidding_window_turns),
            proposals: BTreeMap::new(),
        };
        self.retry_cooldown = 0;

        let cfp = CallForProposals {
            collector_id: initiator_id.to_string(),
            material_position,
            conversation_id: conversation.id.clone(),
        };
        debug!(
            agent = initiator_id,
            conversation_id = %conversation.id,
            deadline = conversation.deadline_turn,
            "CNP opened"
        );
        self.open = Some(conversation);
        Some(cfp)
    }

    /// Record a bid. Returns false if the proposal is stale or foreign.
    pub fn receive(&mut self, proposal: &Propose) -> bool {
        match self.open.as_mut() {
            Some(open) if open.id == proposal.conversation_id => {
                open.proposals
                    .insert(proposal.repairer_id.clone(), proposal.bid);
                true
            }
            _ => false,
        }
    }

    /// Bidding is open and its deadline has been reached.
    pub fn is_due(&self, turn: u64) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| turn >= open.deadline_turn)
    }

    /// Close the bidding window and pick a winner.
    ///
    /// Returns `None` if no conversation is open. The proposal set is cleared
    /// whether or not anyone won.
    pub fn evaluate(
        &mut self,
        meeting_position: Position,
        turn: u64,
        rng: &mut impl Rng,
    ) -> Option<Evaluation> {
        let open = self.open.take()?;

        let winner = open
            .proposals
            .iter()
            .min_by_key(|(_, bid)| **bid)
            .map(|(id, bid)| (id.clone(), *bid));

        let Some((winner_id, winning_bid)) = winner else {
            self.retry_cooldown = rng
                .random_range(self.config.retry_cooldown_min..=self.config.retry_cooldown_max);
            return Some(Evaluation::NoBids {
                conversation_id: open.id,
                retry_in: self.retry_cooldown,
            });
        };

        let rejected = open
            .proposals
            .keys()
            .filter(|id| **id != winner_id)
            .map(|id| {
                (
                    id.clone(),
                    RejectProposal {
                        conversation_id: open.id.clone(),
                    },
                )
            })
            .collect();

        let commitment = Commitment {
            conversation_id: open.id.clone(),
            winner_id,
            winning_bid,
            since_turn: turn,
        };
        self.awaiting_handoff = Some(commitment.clone());

        Some(Evaluation::Awarded {
            commitment,
            accept: AcceptProposal {
                meeting_position,
                conversation_id: open.id,
            },
            rejected,
        })
    }

    /// Count down the no-bids cooldown by one turn. Returns what is left.
    pub fn cool_down(&mut self) -> u32 {
        self.retry_cooldown = self.retry_cooldown.saturating_sub(1);
        self.retry_cooldown
    }

    /// The material has left the collector: the handoff is done.
    pub fn release(&mut self) -> Option<Commitment> {
        self.awaiting_handoff.take()
    }

    /// Drop a handoff that has been pending longer than the configured
    /// timeout. Never fires when no timeout is configured.
    pub fn expire_handoff(&mut self, turn: u64) -> Option<Commitment> {
        let timeout = self.config.handoff_timeout_turns?;
        let expired = self
            .awaiting_handoff
            .as_ref()
            .is_some_and(|c| turn >= c.since_turn.saturating_add(timeout));
        if expired {
            self.awaiting_handoff.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn propose(id: &str, bid: u32, conversation_id: &str) -> Propose {
        Propose {
            repairer_id: id.to_string(),
            bid,
            conversation_id: conversation_id.to_string(),
        }
    }

    fn engine() -> ContractNet {
        ContractNet::new(NegotiationConfig::default())
    }

    #[test]
    fn test_conversation_ids_are_unique() {
        let a = new_conversation_id();
        let b = new_conversation_id();
        assert_ne!(a, b);
        assert!(a.starts_with("cnp"));
    }

    #[test]
    fn test_start_sets_deadline_and_opens_bidding() {
        let mut cnp = engine();
        let cfp = cnp.start("c1", Position::new(1, 2), 10).unwrap();
        assert_eq!(cfp.collector_id, "c1");
        assert_eq!(cfp.material_position, Position::new(1, 2));
        assert_eq!(cnp.phase(), NegotiationPhase::BiddingOpen);
        assert_eq!(cnp.open_conversation().unwrap().deadline_turn, 15);
        assert!(!cnp.is_due(14));
        assert!(cnp.is_due(15));
    }

    #[test]
    fn test_lowest_bid_wins_and_others_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut cnp = engine();
        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        assert!(cnp.receive(&propose("r1", 3, &cfp.conversation_id)));
        assert!(cnp.receive(&propose("r2", 5, &cfp.conversation_id)));

        let evaluation = cnp.evaluate(Position::new(0, 0), 5, &mut rng).unwrap();
        let Evaluation::Awarded {
            commitment,
            accept,
            rejected,
        } = evaluation
        else {
            panic!("expected a winner");
        };
        assert_eq!(commitment.winner_id, "r1");
        assert_eq!(commitment.winning_bid, 3);
        assert_eq!(accept.conversation_id, cfp.conversation_id);
        assert_eq!(accept.meeting_position, Position::new(0, 0));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "r2");
        assert_eq!(rejected[0].1.conversation_id, cfp.conversation_id);
        assert_eq!(cnp.phase(), NegotiationPhase::AwaitingHandoff);
        assert!(cnp.open_conversation().is_none());
    }

    #[test]
    fn test_single_winner_among_many_distinct_bids() {
        let mut rng = StdRng::seed_from_u64(2);
        for n in 1..10u32 {
            let mut cnp = engine();
            let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
            // Bidder i bids 10 + 7 * bids[i]; bids is a shuffled 0..n, so
            // every bid is distinct and bidder ids arrive in scrambled order.
            let mut bids: Vec<u32> = (0..n).collect();
            bids.shuffle(&mut rng);
            let mut arrival: Vec<usize> = (0..n as usize).collect();
            arrival.shuffle(&mut rng);
            for i in arrival {
                let bid = 10 + 7 * bids[i];
                assert!(cnp.receive(&propose(&format!("r{i}"), bid, &cfp.conversation_id)));
            }
            assert_eq!(cnp.open_conversation().unwrap().proposals().len() as u32, n);

            let lowest = bids.iter().position(|b| *b == 0).unwrap();
            let Some(Evaluation::Awarded {
                commitment,
                rejected,
                ..
            }) = cnp.evaluate(Position::new(0, 0), 5, &mut rng)
            else {
                panic!("expected a winner for n={n}");
            };
            assert_eq!(commitment.winner_id, format!("r{lowest}"));
            assert_eq!(commitment.winning_bid, 10);
            assert_eq!(rejected.len() as u32, n - 1);
            assert!(rejected.iter().all(|(id, _)| *id != commitment.winner_id));
        }
    }

    #[test]
    fn test_no_bids_arms_cooldown() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut cnp = engine();
        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        let evaluation = cnp.evaluate(Position::new(0, 0), 5, &mut rng).unwrap();
        match evaluation {
            Evaluation::NoBids {
                conversation_id,
                retry_in,
            } => {
                assert_eq!(conversation_id, cfp.conversation_id);
                assert!((3..=8).contains(&retry_in));
            }
            other => panic!("expected no bids, got {other:?}"),
        }
        assert!(cnp.retry_cooldown() > 0);
        assert!(cnp.open_conversation().is_none());
        assert_eq!(cnp.phase(), NegotiationPhase::Idle);
        assert!(!cnp.can_start());

        while cnp.cool_down() > 0 {}
        assert!(cnp.can_start());
    }

    #[test]
    fn test_stale_and_foreign_proposals_ignored() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut cnp = engine();
        assert!(!cnp.receive(&propose("r1", 1, "cnp-unknown")));

        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        assert!(!cnp.receive(&propose("r1", 1, "cnp-other")));
        assert!(cnp.open_conversation().unwrap().proposals().is_empty());

        cnp.receive(&propose("r1", 4, &cfp.conversation_id));
        cnp.evaluate(Position::new(0, 0), 5, &mut rng);
        // Late proposal after the window closed.
        assert!(!cnp.receive(&propose("r2", 1, &cfp.conversation_id)));
        assert_eq!(cnp.commitment().unwrap().winner_id, "r1");
    }

    #[test]
    fn test_later_proposal_from_same_bidder_replaces_earlier() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut cnp = engine();
        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        cnp.receive(&propose("r1", 2, &cfp.conversation_id));
        cnp.receive(&propose("r2", 4, &cfp.conversation_id));
        cnp.receive(&propose("r1", 9, &cfp.conversation_id));
        assert_eq!(cnp.open_conversation().unwrap().proposals().len(), 2);
        let Some(Evaluation::Awarded { commitment, .. }) =
            cnp.evaluate(Position::new(0, 0), 5, &mut rng)
        else {
            panic!("expected a winner");
        };
        assert_eq!(commitment.winner_id, "r2");
    }

    #[test]
    fn test_no_second_conversation_while_awaiting_handoff() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut cnp = engine();
        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        cnp.receive(&propose("r1", 2, &cfp.conversation_id));
        cnp.evaluate(Position::new(0, 0), 5, &mut rng);

        assert!(!cnp.can_start());
        assert!(cnp.start("c1", Position::new(0, 0), 6).is_none());
        assert!(cnp.start("c1", Position::new(0, 0), 600).is_none());

        let released = cnp.release().unwrap();
        assert_eq!(released.conversation_id, cfp.conversation_id);
        assert!(cnp.start("c1", Position::new(0, 0), 601).is_some());
    }

    #[test]
    fn test_handoff_timeout_only_when_configured() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut cnp = engine();
        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        cnp.receive(&propose("r1", 2, &cfp.conversation_id));
        cnp.evaluate(Position::new(0, 0), 5, &mut rng);
        assert!(cnp.expire_handoff(10_000).is_none());

        let mut cnp = ContractNet::new(NegotiationConfig {
            handoff_timeout_turns: Some(20),
            ..NegotiationConfig::default()
        });
        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        cnp.receive(&propose("r1", 2, &cfp.conversation_id));
        cnp.evaluate(Position::new(0, 0), 5, &mut rng);
        assert!(cnp.expire_handoff(24).is_none());
        let expired = cnp.expire_handoff(25).unwrap();
        assert_eq!(expired.winner_id, "r1");
        assert!(cnp.can_start());
    }

    #[test]
    fn test_equal_bids_go_to_lowest_bidder_id() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut cnp = engine();
        let cfp = cnp.start("c1", Position::new(0, 0), 0).unwrap();
        cnp.receive(&propose("r3", 4, &cfp.conversation_id));
        cnp.receive(&propose("r1", 4, &cfp.conversation_id));
        cnp.receive(&propose("r2", 6, &cfp.conversation_id));
        let Some(Evaluation::Awarded { commitment, .. }) =
            cnp.evaluate(Position::new(0, 0), 5, &mut rng)
        else {
            panic!("expected a winner");
        };
        assert_eq!(commitment.winner_id, "r1");
    }

    #[test]
    fn test_huge_timeouts_do_not_overflow() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut cnp = ContractNet::new(NegotiationConfig {
            bidding_window_turns: u64::MAX,
            handoff_timeout_turns: Some(u64::MAX),
            ..NegotiationConfig::default()
        });
        let cfp = cnp.start("c1", Position::new(0, 0), 7).unwrap();
        assert_eq!(cnp.open_conversation().unwrap().deadline_turn, u64::MAX);
        cnp.receive(&propose("r1", 2, &cfp.conversation_id));
        cnp.evaluate(Position::new(0, 0), 9, &mut rng);
        assert!(cnp.expire_handoff(u64::MAX - 1).is_none());
        assert!(cnp.commitment().is_some());
    }

    #[test]
    fn test_evaluate_without_open_conversation_is_noop() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut cnp = engine();
        assert!(cnp.evaluate(Position::new(0, 0), 0, &mut rng).is_none());
        assert_eq!(cnp.retry_cooldown(), 0);
    }
}
