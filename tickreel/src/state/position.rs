use super::error::StateError;
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Units held in the current round, plus the PnL they have produced.
///
/// Units are never negative: the game only supports buying into a round & selling back out, so
/// a zero quantity means flat.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
pub struct Position {
    pub units: Decimal,
    pub price_entry_average: Decimal,
    pub pnl_realised: Decimal,
    pub pnl_unrealised: Decimal,
}

/// Result of reducing a [`Position`] by some quantity of units.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct PositionReduced {
    pub units: Decimal,
    pub price: Decimal,
    pub proceeds: Decimal,
    pub pnl_realised: Decimal,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.units.is_zero()
    }

    /// Cost of entering the currently held units: `units × price_entry_average`, or `None` on
    /// overflow.
    pub fn cost(&self) -> Option<Decimal> {
        self.units.checked_mul(self.price_entry_average)
    }

    /// Add `units` bought at `price`, averaging the entry price.
    ///
    /// On overflow the position is left unchanged.
    pub fn increase(&mut self, units: Decimal, price: Decimal) -> Result<(), StateError> {
        let price_entry_average =
            calculate_price_entry_average(self.price_entry_average, self.units, price, units)
                .ok_or_else(|| StateError::overflow("entry price average"))?;
        let units = self
            .units
            .checked_add(units)
            .ok_or_else(|| StateError::overflow("position units"))?;
        let pnl_unrealised = calculate_pnl_unrealised(price_entry_average, units, price)
            .ok_or_else(|| StateError::overflow("unrealised pnl"))?;

        self.units = units;
        self.price_entry_average = price_entry_average;
        self.pnl_unrealised = pnl_unrealised;
        Ok(())
    }

    /// Remove `units` sold at `price`, realising their PnL against the average entry price.
    ///
    /// Callers validate `0 < units <= self.units` beforehand. On overflow the position is left
    /// unchanged.
    pub fn reduce(&mut self, units: Decimal, price: Decimal) -> Result<PositionReduced, StateError> {
        let pnl_realised = calculate_pnl_realised(self.price_entry_average, units, price)
            .ok_or_else(|| StateError::overflow("realised pnl"))?;
        let pnl_realised_total = self
            .pnl_realised
            .checked_add(pnl_realised)
            .ok_or_else(|| StateError::overflow("realised pnl"))?;
        let proceeds = units
            .checked_mul(price)
            .ok_or_else(|| StateError::overflow("position proceeds"))?;

        let remaining = self.units - units;
        let price_entry_average = if remaining.is_zero() {
            Decimal::ZERO
        } else {
            self.price_entry_average
        };
        let pnl_unrealised = calculate_pnl_unrealised(price_entry_average, remaining, price)
            .ok_or_else(|| StateError::overflow("unrealised pnl"))?;

        self.units = remaining;
        self.price_entry_average = price_entry_average;
        self.pnl_realised = pnl_realised_total;
        self.pnl_unrealised = pnl_unrealised;

        Ok(PositionReduced::new(units, price, proceeds, pnl_realised))
    }

    /// Mark the held units to `price`.
    pub fn update_unrealised(&mut self, price: Decimal) -> Result<(), StateError> {
        self.pnl_unrealised = calculate_pnl_unrealised(self.price_entry_average, self.units, price)
            .ok_or_else(|| StateError::overflow("unrealised pnl"))?;
        Ok(())
    }
}

fn calculate_price_entry_average(
    current_price_entry_average: Decimal,
    current_units: Decimal,
    trade_price: Decimal,
    trade_units: Decimal,
) -> Option<Decimal> {
    if current_units.is_zero() && trade_units.is_zero() {
        return Some(Decimal::ZERO);
    }

    let current_value = current_price_entry_average.checked_mul(current_units)?;
    let trade_value = trade_price.checked_mul(trade_units)?;

    current_value
        .checked_add(trade_value)?
        .checked_div(current_units.checked_add(trade_units)?)
}

/// Calculate the unrealised PnL of holding `units` entered at `price_entry_average` if they were
/// sold at `price`. `None` on overflow.
pub fn calculate_pnl_unrealised(
    price_entry_average: Decimal,
    units: Decimal,
    price: Decimal,
) -> Option<Decimal> {
    units
        .checked_mul(price)?
        .checked_sub(units.checked_mul(price_entry_average)?)
}

/// Calculate the PnL realised by selling `closed_units` at `closed_price`. `None` on overflow.
pub fn calculate_pnl_realised(
    price_entry_average: Decimal,
    closed_units: Decimal,
    closed_price: Decimal,
) -> Option<Decimal> {
    closed_units
        .checked_mul(closed_price)?
        .checked_sub(closed_units.checked_mul(price_entry_average)?)
}
