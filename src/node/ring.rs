//! Token handling for a single ring member.
//!
//! The quiet-round counter lives in the token and counts how many holders in
//! a row chose not to fire. The fire probability `p` lives here, per node,
//! and halves every time this node hands the token on, whether it fired or
//! not. Nodes that see the token less often therefore decay more slowly.

use crate::cluster::NodeId;

/// What the holder does with the token after deciding whether to fire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenAction {
    /// Hand the token to the successor with this counter
    Forward { consecutive_quiet_rounds: u32 },
    /// Threshold reached: announce termination and keep the token
    Terminate { consecutive_quiet_rounds: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenDecision {
    pub fired: bool,
    /// Probability the draw was compared against
    pub probability: f64,
    pub action: TokenAction,
}

#[derive(Clone, Debug)]
pub struct RingState {
    node_id: NodeId,
    p: f64,
    quiet_threshold: u32,
    tokens_processed: u64,
    rockets_fired: u64,
}

impl RingState {
    pub fn new(node_id: NodeId, fire_probability: f64, quiet_threshold: u32) -> Self {
        Self {
            node_id,
            p: fire_probability,
            quiet_threshold,
            tokens_processed: 0,
            rockets_fired: 0,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Current local fire probability
    pub fn probability(&self) -> f64 {
        self.p
    }

    pub fn quiet_threshold(&self) -> u32 {
        self.quiet_threshold
    }

    pub fn tokens_processed(&self) -> u64 {
        self.tokens_processed
    }

    pub fn rockets_fired(&self) -> u64 {
        self.rockets_fired
    }

    /// Adopt ring-wide parameters from a directory received before the ring starts
    pub fn reconfigure(&mut self, node_id: NodeId, fire_probability: f64, quiet_threshold: u32) {
        self.node_id = node_id;
        self.p = fire_probability;
        self.quiet_threshold = quiet_threshold;
    }

    /// Decide what to do with a received token.
    ///
    /// `draw` is a uniform sample from `[0, 1)`; the node fires when it is
    /// below the current `p`.
    pub fn process_token(&mut self, consecutive_quiet_rounds: u32, draw: f64) -> TokenDecision {
        self.tokens_processed += 1;
        let probability = self.p;
        let fired = draw < probability;

        let counter = if fired {
            self.rockets_fired += 1;
            0
        } else {
            consecutive_quiet_rounds.saturating_add(1)
        };

        if counter >= self.quiet_threshold {
            return TokenDecision {
                fired,
                probability,
                action: TokenAction::Terminate {
                    consecutive_quiet_rounds: counter,
                },
            };
        }

        self.p /= 2.0;
        TokenDecision {
            fired,
            probability,
            action: TokenAction::Forward {
                consecutive_quiet_rounds: counter,
            },
        }
    }
}
