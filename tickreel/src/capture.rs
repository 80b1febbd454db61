use crate::{
    error::TickreelError,
    state::{StateAggregate, StateContainer, StateSnapshot},
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tickreel_data::{Feed, source::TickSource, tick::Tick};
use tickreel_store::{
    envelope::{
        ActionConfirmation, ActionKind, EpisodeId, EventPayload, PlayerAction, Sequence,
        StateSnapshotPayload, SystemEvent,
    },
    recorder::Recorder,
};
use tracing::{info, warn};

/// Wires one live episode into both a [`StateContainer`] and a [`Recorder`].
///
/// Every state mutation is performed first; only a successful mutation is published, so the
/// event store never records an action the state rejected.
#[derive(Debug)]
pub struct CaptureSession {
    episode: EpisodeId,
    state: Arc<StateContainer>,
    recorder: Arc<Recorder>,
    ticks: u64,
}

impl CaptureSession {
    pub fn new(episode: EpisodeId, state: Arc<StateContainer>, recorder: Arc<Recorder>) -> Self {
        Self {
            episode,
            state,
            recorder,
            ticks: 0,
        }
    }

    pub fn episode(&self) -> &EpisodeId {
        &self.episode
    }

    /// Number of ticks captured so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Publish [`SystemEvent::EpisodeStarted`].
    pub fn start(&self) -> Result<Sequence, TickreelError> {
        info!(episode = %self.episode, "CaptureSession started");
        self.publish(EventPayload::SystemEvent(SystemEvent::EpisodeStarted))
    }

    /// Apply a live tick to the state, then publish it.
    pub fn on_tick(&mut self, tick: Tick) -> Result<StateSnapshot, TickreelError> {
        let snapshot = self.state.apply(tick.clone());
        self.publish(EventPayload::Tick(tick))?;
        self.ticks += 1;
        Ok(snapshot)
    }

    /// Buy `units` at `price`, publishing the resulting [`PlayerAction`].
    pub fn buy(
        &self,
        units: Decimal,
        price: Decimal,
    ) -> Result<(StateSnapshot, Sequence), TickreelError> {
        let snapshot = self.state.open_position(units, price)?;
        let sequence = self.publish_action(&snapshot, ActionKind::Buy, Some(price), units)?;
        Ok((snapshot, sequence))
    }

    /// Sell `units` at `price`, publishing the resulting [`PlayerAction`].
    pub fn sell(
        &self,
        units: Decimal,
        price: Decimal,
    ) -> Result<(StateSnapshot, Sequence), TickreelError> {
        let snapshot = self.state.reduce_position(units, price)?;
        let sequence = self.publish_action(&snapshot, ActionKind::Sell, Some(price), units)?;
        Ok((snapshot, sequence))
    }

    /// Place a sidebet, using the configured default window when `window` is `None`.
    pub fn place_sidebet(
        &self,
        amount: Decimal,
        window: Option<u64>,
    ) -> Result<(StateSnapshot, Sequence), TickreelError> {
        let window = window.unwrap_or(self.state.config().default_sidebet_window);
        let snapshot = self.state.place_sidebet(amount, window)?;
        let sequence = self.publish_action(&snapshot, ActionKind::SideBet, None, amount)?;
        Ok((snapshot, sequence))
    }

    /// Attach the venue's confirmation to a previously published, still buffered, action.
    pub fn confirm_action(&self, sequence: Sequence, accepted: bool) -> Result<(), TickreelError> {
        let mut confirmed = false;
        self.recorder.amend(&self.episode, sequence, |payload| {
            if let Some(action) = payload.as_player_action_mut() {
                action.confirmation = Some(ActionConfirmation::new(Utc::now(), accepted));
                confirmed = true;
            }
        })?;

        if confirmed {
            Ok(())
        } else {
            Err(TickreelError::NotPlayerAction {
                episode: self.episode.clone(),
                sequence,
            })
        }
    }

    /// Publish the current state as a [`StateSnapshotPayload`].
    pub fn snapshot(&self) -> Result<Sequence, TickreelError> {
        let snapshot = self.state.current();
        self.publish(EventPayload::StateSnapshot(StateSnapshotPayload::from(
            snapshot.as_ref(),
        )))
    }

    /// Report a feed failure to both the state error channel & the event store.
    pub fn report_source_error(&self, message: impl Into<String>) -> Result<Sequence, TickreelError> {
        let message = message.into();
        self.state.report_error(message.clone());
        self.publish(EventPayload::SystemEvent(SystemEvent::SourceError { message }))
    }

    /// Capture every tick of `source` until it finishes, returning the number captured.
    ///
    /// A source error is reported via [`Self::report_source_error`] before being returned.
    pub fn capture<Source>(&mut self, source: &mut Source) -> Result<u64, TickreelError>
    where
        Source: TickSource + ?Sized,
    {
        let mut captured = 0;
        loop {
            match source.next() {
                Ok(Feed::Next(tick)) => {
                    self.on_tick(tick)?;
                    captured += 1;
                }
                Ok(Feed::Unhealthy) => {
                    warn!(episode = %self.episode, "CaptureSession tick source unhealthy");
                }
                Ok(Feed::Finished) => break Ok(captured),
                Err(error) => {
                    self.report_source_error(error.to_string())?;
                    break Err(error.into());
                }
            }
        }
    }

    /// Publish [`SystemEvent::EpisodeFinished`] with the number of ticks captured.
    pub fn finish(&self) -> Result<Sequence, TickreelError> {
        info!(episode = %self.episode, ticks = self.ticks, "CaptureSession finished");
        self.publish(EventPayload::SystemEvent(SystemEvent::EpisodeFinished {
            ticks: self.ticks,
        }))
    }

    fn publish_action(
        &self,
        snapshot: &StateAggregate,
        kind: ActionKind,
        price: Option<Decimal>,
        quantity: Decimal,
    ) -> Result<Sequence, TickreelError> {
        let tick_index = snapshot.tick.as_ref().map(Tick::index);
        self.publish(EventPayload::PlayerAction(PlayerAction::new(
            kind, tick_index, price, quantity, None,
        )))
    }

    fn publish(&self, payload: EventPayload) -> Result<Sequence, TickreelError> {
        self.recorder
            .publish(&self.episode, payload)
            .map_err(TickreelError::from)
    }
}

impl From<&StateAggregate> for StateSnapshotPayload {
    fn from(value: &StateAggregate) -> Self {
        Self {
            version: value.version,
            tick_index: value.tick.as_ref().map(Tick::index),
            price: value.tick.as_ref().map(Tick::price),
            phase: value.phase(),
            cash: value.cash,
            position_units: value.position.units,
            entry_price: value.position.price_entry_average,
            realised_pnl: value.position.pnl_realised,
            unrealised_pnl: value.position.pnl_unrealised,
            sidebet_active: value.sidebet.is_some(),
        }
    }
}
