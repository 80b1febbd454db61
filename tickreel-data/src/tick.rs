use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tickreel_integration::Terminal;

/// Monotonic index of a [`Tick`] within a round.
pub type TickIndex = u64;

/// Authoritative lifecycle signals attached to every tick by the feed adapter.
///
/// These are inputs only. Nothing downstream reads them to decide the lifecycle of a round; the
/// single derived [`Phase`] is the source of truth.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
pub struct PhaseSignals {
    /// The round has ended.
    pub terminal: bool,

    /// Pre-round buys are accepted.
    pub presale_eligible: bool,

    /// Milliseconds remaining on the between-rounds cooldown timer.
    pub cooldown_remaining: u64,

    /// The round is live.
    #[serde(default)]
    pub active: bool,
}

impl PhaseSignals {
    pub fn round_active() -> Self {
        Self {
            active: true,
            ..Self::default()
        }
    }

    pub fn round_terminal() -> Self {
        Self {
            terminal: true,
            ..Self::default()
        }
    }

    pub fn presale() -> Self {
        Self {
            presale_eligible: true,
            ..Self::default()
        }
    }

    pub fn cooldown(remaining_ms: u64) -> Self {
        Self {
            cooldown_remaining: remaining_ms,
            ..Self::default()
        }
    }
}

/// Lifecycle phase of a round, derived once per [`Tick`] from its [`PhaseSignals`].
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[display("cooldown")]
    Cooldown,
    #[display("presale")]
    Presale,
    #[display("active")]
    Active,
    #[display("terminal")]
    Terminal,
    #[default]
    #[display("unknown")]
    Unknown,
}

impl Phase {
    /// Derive the [`Phase`] from authoritative [`PhaseSignals`].
    ///
    /// Priority: terminal signal > cooldown timer > active flag > presale eligibility > unknown.
    pub fn derive(signals: &PhaseSignals) -> Self {
        if signals.terminal {
            Phase::Terminal
        } else if signals.cooldown_remaining > 0 {
            Phase::Cooldown
        } else if signals.active {
            Phase::Active
        } else if signals.presale_eligible {
            Phase::Presale
        } else {
            Phase::Unknown
        }
    }
}

impl Terminal for Phase {
    fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminal)
    }
}

/// One discrete, immutable observation of a round.
///
/// The [`Phase`] is derived at construction and is never serialised: a persisted [`Tick`] only
/// carries its authoritative inputs, so loading one always re-derives the same phase.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(from = "TickRecord", into = "TickRecord")]
pub struct Tick {
    index: TickIndex,
    price: Decimal,
    signals: PhaseSignals,
    phase: Phase,
}

impl Tick {
    pub fn new(index: TickIndex, price: Decimal, signals: PhaseSignals) -> Self {
        Self {
            index,
            price,
            signals,
            phase: Phase::derive(&signals),
        }
    }

    pub fn index(&self) -> TickIndex {
        self.index
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn signals(&self) -> &PhaseSignals {
        &self.signals
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl Terminal for Tick {
    fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Normalised wire shape of a [`Tick`] as produced by the feed adapter.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct TickRecord {
    pub tick_index: TickIndex,
    pub price: Decimal,
    pub phase_signals: PhaseSignals,
}

impl From<TickRecord> for Tick {
    fn from(value: TickRecord) -> Self {
        Self::new(value.tick_index, value.price, value.phase_signals)
    }
}

impl From<Tick> for TickRecord {
    fn from(value: Tick) -> Self {
        Self {
            tick_index: value.index,
            price: value.price,
            phase_signals: value.signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_phase_derive_priority() {
        struct TestCase {
            signals: PhaseSignals,
            expected: Phase,
        }

        let cases = vec![
            // TC0: nothing set
            TestCase {
                signals: PhaseSignals::default(),
                expected: Phase::Unknown,
            },
            // TC1: presale only
            TestCase {
                signals: PhaseSignals::presale(),
                expected: Phase::Presale,
            },
            // TC2: active outranks presale
            TestCase {
                signals: PhaseSignals {
                    active: true,
                    presale_eligible: true,
                    ..PhaseSignals::default()
                },
                expected: Phase::Active,
            },
            // TC3: cooldown timer outranks presale
            TestCase {
                signals: PhaseSignals {
                    presale_eligible: true,
                    cooldown_remaining: 5_000,
                    ..PhaseSignals::default()
                },
                expected: Phase::Cooldown,
            },
            // TC4: terminal outranks presale
            TestCase {
                signals: PhaseSignals {
                    terminal: true,
                    presale_eligible: true,
                    ..PhaseSignals::default()
                },
                expected: Phase::Terminal,
            },
            // TC5: terminal outranks everything
            TestCase {
                signals: PhaseSignals {
                    terminal: true,
                    presale_eligible: true,
                    cooldown_remaining: 1,
                    active: true,
                },
                expected: Phase::Terminal,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(Phase::derive(&test.signals), test.expected, "TC{index} failed");
        }
    }

    #[test]
    fn test_terminal_signal_always_wins_for_every_signal_combination() {
        for presale_eligible in [false, true] {
            for active in [false, true] {
                for cooldown_remaining in [0, 1, 15_000] {
                    let signals = PhaseSignals {
                        terminal: true,
                        presale_eligible,
                        cooldown_remaining,
                        active,
                    };
                    let tick = Tick::new(1, dec!(1.0), signals);
                    assert_eq!(tick.phase(), Phase::Terminal);
                    assert!(tick.is_terminal());
                }
            }
        }
    }

    #[test]
    fn test_tick_serde_round_trip_rederives_phase() {
        let tick = Tick::new(7, dec!(1.2345), PhaseSignals::round_terminal());

        let json = serde_json::to_string(&tick).unwrap();
        assert!(!json.contains("\"phase\""));
        assert!(json.contains("\"tick_index\":7"));

        let loaded: Tick = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, tick);
        assert_eq!(loaded.phase(), Phase::Terminal);
        assert_eq!(loaded.price(), dec!(1.2345));
    }

    #[test]
    fn test_tick_deserialise_defaults_missing_active_signal() {
        let json = r#"{"tick_index":3,"price":"1.5","phase_signals":{"terminal":false,"presale_eligible":true,"cooldown_remaining":0}}"#;
        let tick: Tick = serde_json::from_str(json).unwrap();
        assert_eq!(tick.phase(), Phase::Presale);
    }
}
