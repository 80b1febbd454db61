use derive_more::Constructor;
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tickreel_data::tick::{Tick, TickIndex};

/// Features derived for one [`Tick`] of an episode.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct FeatureRow {
    pub tick_index: TickIndex,
    pub price: Decimal,

    /// Simple return versus the previous tick. Zero for the first tick, or if the previous price
    /// was zero.
    pub simple_return: Decimal,

    /// Population standard deviation of the most recent `window` simple returns.
    pub rolling_volatility: Decimal,

    /// Highest price observed so far in the episode.
    pub running_max: Decimal,

    /// Fractional decline from `running_max`: `(running_max - price) / running_max`.
    pub drawdown: Decimal,
}

/// Compute one [`FeatureRow`] per tick via windowed aggregation over the ordered ticks.
///
/// `window` must be at least 1. The first tick has no return, so it contributes nothing to the
/// volatility window.
pub fn compute_features(ticks: &[Tick], window: usize) -> Vec<FeatureRow> {
    let mut returns = RollingWindow::new(window.max(1));
    let mut running_max: Option<Decimal> = None;
    let mut previous: Option<Decimal> = None;

    ticks
        .iter()
        .map(|tick| {
            let price = tick.price();

            let simple_return = match previous {
                Some(previous) if !previous.is_zero() => {
                    let simple_return = (price - previous) / previous;
                    returns.push(simple_return);
                    simple_return
                }
                Some(_) => {
                    returns.push(Decimal::ZERO);
                    Decimal::ZERO
                }
                None => Decimal::ZERO,
            };
            previous = Some(price);

            let peak = running_max.map_or(price, |peak| peak.max(price));
            running_max = Some(peak);

            let drawdown = if peak.is_sign_positive() && !peak.is_zero() {
                (peak - price) / peak
            } else {
                Decimal::ZERO
            };

            FeatureRow::new(
                tick.index(),
                price,
                simple_return,
                returns.population_std_dev(),
                peak,
                drawdown,
            )
        })
        .collect()
}

/// Fixed capacity window of the most recent values.
#[derive(Debug, Clone)]
struct RollingWindow {
    capacity: usize,
    values: VecDeque<Decimal>,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, value: Decimal) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn population_std_dev(&self) -> Decimal {
        if self.values.is_empty() {
            return Decimal::ZERO;
        }

        let count = Decimal::from(self.values.len());
        let mean = self.values.iter().sum::<Decimal>() / count;
        let variance = self
            .values
            .iter()
            .map(|value| (*value - mean) * (*value - mean))
            .sum::<Decimal>()
            / count;

        variance.sqrt().unwrap_or(Decimal::ZERO)
    }
}
