use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures of [`StateContainer`](super::StateContainer) mutators.
///
/// A rejected mutation leaves the aggregate untouched.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum StateError {
    #[error("position is flat")]
    PositionFlat,

    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash {
        required: Decimal,
        available: Decimal,
    },

    #[error("invalid units {units}: held {held}")]
    InvalidUnits { units: Decimal, held: Decimal },

    #[error("invalid price {0}")]
    InvalidPrice(Decimal),

    #[error("invalid sidebet amount {0}")]
    InvalidAmount(Decimal),

    #[error("invalid sidebet window: must be at least one tick")]
    InvalidWindow,

    #[error("no active sidebet")]
    NoActiveSideBet,

    #[error("a sidebet is already active")]
    SideBetAlreadyActive,

    #[error("no tick has been applied yet")]
    NoTick,

    #[error("arithmetic overflow computing {0}")]
    Overflow(String),
}

impl StateError {
    pub fn overflow(operation: &str) -> Self {
        Self::Overflow(operation.to_string())
    }
}
