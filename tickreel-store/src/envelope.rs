use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use derive_more::{Constructor, Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::borrow::Borrow;
use tickreel_data::{
    identifier::{sanitise_identifier, validate_identifier},
    tick::{Phase, Tick, TickIndex},
};

/// Identifier of an episode (one session/round).
///
/// Always satisfies [`validate_identifier`], so it is safe to use in a path. Construction and
/// deserialisation both reject anything else.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Display)]
pub struct EpisodeId(SmolStr);

impl EpisodeId {
    pub fn new<S>(id: S) -> Result<Self, StoreError>
    where
        S: AsRef<str>,
    {
        let id = validate_identifier(id.as_ref())?;
        Ok(Self(SmolStr::new(id)))
    }

    /// Construct an [`EpisodeId`] from an untrusted identifier by mapping it onto the
    /// allow-listed character set.
    pub fn sanitised(raw: &str) -> Self {
        Self(SmolStr::new(sanitise_identifier(raw)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<&str> for EpisodeId {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Borrow<str> for EpisodeId {
    fn borrow(&self) -> &str {
        self.0.borrow()
    }
}

impl AsRef<str> for EpisodeId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl<'de> Deserialize<'de> for EpisodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let id = SmolStr::deserialize(deserializer)?;
        EpisodeId::new(id).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a [`Recorder`](crate::recorder::Recorder) instance, used to name its partition
/// files. Always sanitised.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Display)]
pub struct WriterId(SmolStr);

impl WriterId {
    pub fn new<S>(id: S) -> Self
    where
        S: AsRef<str>,
    {
        let id = id.as_ref();
        match validate_identifier(id) {
            Ok(id) => Self(SmolStr::new(id)),
            Err(_) => Self(SmolStr::new(sanitise_identifier(id))),
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for WriterId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for WriterId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let id = SmolStr::deserialize(deserializer)?;
        Ok(WriterId::new(id))
    }
}

/// Per-episode monotonic sequence number of an [`EventEnvelope`].
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
    Constructor,
)]
pub struct Sequence(pub u64);

impl Sequence {
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The [`Sequence`] directly following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Kind tag of an [`EventEnvelope`], used as the top level partition key.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[display("tick")]
    Tick,
    #[display("player_action")]
    PlayerAction,
    #[display("state_snapshot")]
    StateSnapshot,
    #[display("system_event")]
    SystemEvent,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Tick,
        EventKind::PlayerAction,
        EventKind::StateSnapshot,
        EventKind::SystemEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tick => "tick",
            EventKind::PlayerAction => "player_action",
            EventKind::StateSnapshot => "state_snapshot",
            EventKind::SystemEvent => "system_event",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// Durable, immutable unit of record.
///
/// The `kind` is derived from the `payload` on construction. The [`Recorder`](crate::recorder::Recorder)
/// rejects an envelope whose `kind` has since been set to disagree with its payload.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct EventEnvelope {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
    pub episode: EpisodeId,
    pub sequence: Sequence,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub fn new(
        time: DateTime<Utc>,
        episode: EpisodeId,
        sequence: Sequence,
        payload: EventPayload,
    ) -> Self {
        Self {
            time,
            kind: payload.kind(),
            episode,
            sequence,
            payload,
        }
    }

    /// Date partition this envelope belongs to.
    pub fn date(&self) -> NaiveDate {
        self.time.date_naive()
    }
}

/// Typed payload of an [`EventEnvelope`].
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, From)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Tick(Tick),
    PlayerAction(PlayerAction),
    StateSnapshot(StateSnapshotPayload),
    SystemEvent(SystemEvent),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Tick(_) => EventKind::Tick,
            EventPayload::PlayerAction(_) => EventKind::PlayerAction,
            EventPayload::StateSnapshot(_) => EventKind::StateSnapshot,
            EventPayload::SystemEvent(_) => EventKind::SystemEvent,
        }
    }

    pub fn as_tick(&self) -> Option<&Tick> {
        match self {
            EventPayload::Tick(tick) => Some(tick),
            _ => None,
        }
    }

    pub fn as_player_action_mut(&mut self) -> Option<&mut PlayerAction> {
        match self {
            EventPayload::PlayerAction(action) => Some(action),
            _ => None,
        }
    }
}

/// Discrete player action taken during an episode.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct PlayerAction {
    pub kind: ActionKind,
    pub tick_index: Option<TickIndex>,
    pub price: Option<Decimal>,
    /// Units for buys & sells, cash amount for sidebets.
    pub quantity: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ActionConfirmation>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Buy,
    Sell,
    SideBet,
}

/// Late-arriving confirmation of a [`PlayerAction`], applied as an amendment.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct ActionConfirmation {
    pub time: DateTime<Utc>,
    pub accepted: bool,
}

/// Point-in-time copy of the state aggregate, flattened for persistence.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct StateSnapshotPayload {
    pub version: u64,
    pub tick_index: Option<TickIndex>,
    pub price: Option<Decimal>,
    pub phase: Phase,
    pub cash: Decimal,
    pub position_units: Decimal,
    pub entry_price: Decimal,
    pub realised_pnl: Decimal,
    pub unrealised_pnl: Decimal,
    pub sidebet_active: bool,
}

/// Episode lifecycle & diagnostic events.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    EpisodeStarted,
    EpisodeFinished { ticks: u64 },
    SourceError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tickreel_data::tick::PhaseSignals;

    #[test]
    fn test_episode_id_rejects_unsafe_identifiers() {
        struct TestCase {
            input: &'static str,
            expected_ok: bool,
        }

        let cases = vec![
            // TC0: valid
            TestCase {
                input: "round-42",
                expected_ok: true,
            },
            // TC1: traversal
            TestCase {
                input: "../round-42",
                expected_ok: false,
            },
            // TC2: absolute
            TestCase {
                input: "/tmp/round",
                expected_ok: false,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(
                EpisodeId::new(test.input).is_ok(),
                test.expected_ok,
                "TC{index} failed"
            );
        }

        assert!(serde_json::from_str::<EpisodeId>(r#""../x""#).is_err());
        assert_eq!(EpisodeId::sanitised("../x").as_str(), "_.._x");
    }

    #[test]
    fn test_writer_id_is_always_sanitised() {
        assert_eq!(WriterId::new("capture 1/a").as_str(), "capture_1_a");
        assert_eq!(WriterId::new("capture-1").as_str(), "capture-1");
    }

    #[test]
    fn test_envelope_kind_derived_from_payload() {
        let envelope = EventEnvelope::new(
            Utc::now(),
            EpisodeId::new("e").unwrap(),
            Sequence(0),
            EventPayload::Tick(Tick::new(1, dec!(1.5), PhaseSignals::round_active())),
        );
        assert_eq!(envelope.kind, EventKind::Tick);

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""kind":"tick""#));
        assert!(json.contains(r#""payload":{"type":"tick","data":{"tick_index":1"#));
    }

    #[test]
    fn test_player_action_confirmation_omitted_until_amended() {
        let mut action = PlayerAction::new(ActionKind::Buy, Some(3), Some(dec!(1.1)), dec!(2), None);
        assert!(!serde_json::to_string(&action).unwrap().contains("confirmation"));

        action.confirmation = Some(ActionConfirmation::new(Utc::now(), true));
        assert!(serde_json::to_string(&action).unwrap().contains("confirmation"));
    }
}
