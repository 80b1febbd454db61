use crate::state::{position::PositionReduced, sidebet::SideBetOutcome};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tickreel_data::tick::{Phase, TickIndex};

/// Notable change produced by a [`StateContainer`](super::StateContainer) mutation.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateEvent {
    RoundStarted {
        tick_index: TickIndex,
    },
    PhaseChanged {
        tick_index: TickIndex,
        from: Phase,
        to: Phase,
    },
    PositionOpened {
        units: Decimal,
        price: Decimal,
        cost: Decimal,
    },
    PositionReduced(PositionReduced),
    PositionClosed(PositionReduced),
    SideBetPlaced {
        amount: Decimal,
        tick_placed: TickIndex,
        expires_at: TickIndex,
    },
    SideBetSettled {
        outcome: SideBetOutcome,
        payout: Decimal,
    },
    SourceError {
        message: String,
    },
    SessionReset,
}

/// [`StateEvent`] stamped with the time & aggregate version it was produced at.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct LoggedEvent {
    pub time: DateTime<Utc>,
    pub version: u64,
    pub event: StateEvent,
}
