//! Configuration types for collector and repairer agents.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::exploration::ExplorationPolicy;
use crate::pathfinder::Heuristic;

/// Top-level worker configuration.
///
/// Shared by both roles; each role reads the sections it needs.
/// Loaded from JSON at runtime, every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Contract-net timing
    pub negotiation: NegotiationConfig,

    /// Exploration policy and failed-source bookkeeping
    pub exploration: ExplorationConfig,

    /// Server round-trip handling
    pub turn: TurnConfig,

    /// Handoff transfer retries (repairer side)
    pub transfer: TransferConfig,

    /// Waiting for an answer to a proposal (repairer side)
    pub proposal: ProposalConfig,

    /// Seed for the agent's random walk and cooldown draws
    pub seed: Option<u64>,
}

/// Contract-net timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Turns between a call-for-proposals and its evaluation
    pub bidding_window_turns: u64,

    /// Lower bound of the randomized no-bids retry cooldown (turns)
    pub retry_cooldown_min: u32,

    /// Upper bound of the randomized no-bids retry cooldown (turns, inclusive)
    pub retry_cooldown_max: u32,

    /// Give up on an accepted handoff after this many turns.
    /// `None` waits until the material actually leaves the collector.
    pub handoff_timeout_turns: Option<u64>,
}

/// Exploration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// How collectors search for material
    pub policy: ExplorationPolicy,

    /// Turns a material position is ignored after a failed TAKE there
    pub failed_source_cooldown_turns: u64,

    /// A* ordering heuristic
    pub heuristic: Heuristic,
}

/// Server round-trip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// An action still unanswered after this many turns counts as failed
    pub response_timeout_turns: u64,
}

/// Transfer retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Turns to wait for material before asking the server again
    pub retry_after_turns: u64,

    /// Transfer requests before the handoff is abandoned
    pub max_attempts: u32,
}

/// Proposal answer configuration.
///
/// A collector drops proposals that reach it after its bidding window has
/// closed, so a late bidder never hears back. The bidder gives up once the
/// window plus this slack has passed since it bid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    /// Turns past `bidding_window_turns` to wait for an accept or reject
    pub answer_slack_turns: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            bidding_window_turns: 5,
            retry_cooldown_min: 3,
            retry_cooldown_max: 8,
            handoff_timeout_turns: None,
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            policy: ExplorationPolicy::Frontier,
            failed_source_cooldown_turns: 15,
            heuristic: Heuristic::Chebyshev,
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            response_timeout_turns: 3,
        }
    }
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            answer_slack_turns: 3,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry_after_turns: 2,
            max_attempts: 3,
        }
    }
}

impl WorkerConfig {
    /// Reject settings the agents cannot run with.
    pub fn validate(&self) -> Result<()> {
        let n = &self.negotiation;
        if n.bidding_window_turns == 0 {
            bail!("negotiation.bidding_window_turns must be at least 1");
        }
        if n.retry_cooldown_min == 0 || n.retry_cooldown_min > n.retry_cooldown_max {
            bail!(
                "negotiation retry cooldown range {}..={} is invalid",
                n.retry_cooldown_min,
                n.retry_cooldown_max
            );
        }
        if n.handoff_timeout_turns == Some(0) {
            bail!("negotiation.handoff_timeout_turns must be positive when set");
        }
        if self.turn.response_timeout_turns == 0 {
            bail!("turn.response_timeout_turns must be at least 1");
        }
        if self.transfer.max_attempts == 0 {
            bail!("transfer.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Turns a repairer waits for an answer to a proposal.
    pub fn proposal_answer_turns(&self) -> u64 {
        self.negotiation
            .bidding_window_turns
            .saturating_add(self.proposal.answer_slack_turns)
    }

    /// Same configuration with a different seed, for giving each agent its
    /// own random stream.
    pub fn with_seed(&self, seed: Option<u64>) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }
}
