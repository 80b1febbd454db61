use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tickreel_data::tick::TickIndex;

/// Outcome of a settled [`SideBet`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum SideBetOutcome {
    #[display("won")]
    Won,
    #[display("lost")]
    Lost,
}

/// Wager that the current round ends within `window` ticks of `tick_placed`.
///
/// Immutable: settling produces a new value via [`SideBet::settle`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct SideBet {
    pub amount: Decimal,
    pub tick_placed: TickIndex,
    pub window: u64,
    pub outcome: Option<SideBetOutcome>,
}

impl SideBet {
    pub fn new(amount: Decimal, tick_placed: TickIndex, window: u64) -> Self {
        Self {
            amount,
            tick_placed,
            window,
            outcome: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Last tick index at which the round ending still wins the bet.
    pub fn expires_at(&self) -> TickIndex {
        self.tick_placed.saturating_add(self.window)
    }

    /// Determine if observing tick `index` resolves this bet.
    ///
    /// `terminal_unhandled` is true only for the first terminal tick of a round; a repeated
    /// terminal tick never wins a bet twice.
    pub fn resolution(&self, index: TickIndex, terminal_unhandled: bool) -> Option<SideBetOutcome> {
        if self.is_resolved() {
            None
        } else if terminal_unhandled && index <= self.expires_at() {
            Some(SideBetOutcome::Won)
        } else if index > self.expires_at() {
            Some(SideBetOutcome::Lost)
        } else {
            None
        }
    }

    pub fn settle(self, outcome: SideBetOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..self
        }
    }

    /// Cash credited when this bet settles: `amount × multiplier` if won, otherwise zero.
    ///
    /// `None` if the winning payout overflows.
    pub fn payout(&self, multiplier: Decimal) -> Option<Decimal> {
        match self.outcome {
            Some(SideBetOutcome::Won) => self.amount.checked_mul(multiplier),
            _ => Some(Decimal::ZERO),
        }
    }
}
