use crate::state::{
    error::StateError,
    event::{LoggedEvent, StateEvent},
    history::RingBuffer,
    position::Position,
    sidebet::{SideBet, SideBetOutcome},
};
use chrono::Utc;
use derive_more::Display;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tickreel_data::tick::{Phase, Tick};
use tickreel_integration::{
    Terminal,
    channel::{ChannelTxDroppable, UnboundedRx, UnboundedTx, mpsc_unbounded},
    snapshot::SnapUpdates,
};
use tracing::{debug, info, warn};

pub mod error;
pub mod event;
pub mod history;
pub mod position;
pub mod sidebet;

/// Immutable view of the [`StateAggregate`] at one version.
///
/// Cheap to clone & safe to hold across threads; later mutations never change it.
pub type StateSnapshot = Arc<StateAggregate>;

/// Configuration of a [`StateContainer`] session.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// Cash available at session start.
    pub initial_cash: Decimal,

    /// Number of recent ticks retained in [`StateAggregate::history`].
    pub history_capacity: usize,

    /// Number of recent events retained in [`StateAggregate::events`].
    pub event_log_capacity: usize,

    /// A won sidebet credits `amount × sidebet_payout_multiplier`.
    pub sidebet_payout_multiplier: Decimal,

    /// Window in ticks used when a sidebet is placed without an explicit window.
    pub default_sidebet_window: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::ONE,
            history_capacity: 500,
            event_log_capacity: 256,
            sidebet_payout_multiplier: Decimal::from(5),
            default_sidebet_window: 40,
        }
    }
}

/// Everything known about the current session.
///
/// Only ever mutated through the [`StateContainer`] that owns it.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct StateAggregate {
    /// Incremented by every successful mutation.
    pub version: u64,

    /// Most recently applied tick.
    pub tick: Option<Tick>,

    /// Local latch: the terminal tick of the current round has already been processed.
    ///
    /// Distinct from the tick's own terminal signal, which is the truth of whether the round
    /// has ended.
    pub terminal_handled: bool,

    pub cash: Decimal,
    pub position: Position,

    /// At most one unresolved sidebet.
    pub sidebet: Option<SideBet>,

    pub history: RingBuffer<Tick>,
    pub events: RingBuffer<LoggedEvent>,
}

impl StateAggregate {
    pub fn new(config: &StateConfig) -> Self {
        Self {
            version: 0,
            tick: None,
            terminal_handled: false,
            cash: config.initial_cash,
            position: Position::default(),
            sidebet: None,
            history: RingBuffer::with_capacity(config.history_capacity),
            events: RingBuffer::with_capacity(config.event_log_capacity),
        }
    }

    /// [`Phase`] of the most recent tick, or [`Phase::Unknown`] before the first one.
    pub fn phase(&self) -> Phase {
        self.tick.as_ref().map(Tick::phase).unwrap_or_default()
    }

    /// Determine if the current round has ended, per the most recent tick.
    pub fn is_terminal(&self) -> bool {
        self.tick.as_ref().is_some_and(Terminal::is_terminal)
    }

    /// Cash plus the marked value of held units.
    pub fn equity(&self) -> Option<Decimal> {
        self.cash
            .checked_add(self.position.cost()?)?
            .checked_add(self.position.pnl_unrealised)
    }

    fn current_price(&self) -> Result<Decimal, StateError> {
        self.tick
            .as_ref()
            .map(Tick::price)
            .ok_or(StateError::NoTick)
    }
}

/// Notification delivered to every [`StateObserver`] after a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub snapshot: StateSnapshot,
    pub events: Vec<LoggedEvent>,
}

impl StateUpdate {
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }
}

/// Receives a [`StateUpdate`] after each mutation of a [`StateContainer`].
///
/// Invoked on the mutating thread once the container's lock has been released, so an observer
/// may call back into the container.
pub trait StateObserver: Send + Sync {
    fn on_update(&self, update: &StateUpdate);
}

impl<F> StateObserver for F
where
    F: Fn(&StateUpdate) + Send + Sync,
{
    fn on_update(&self, update: &StateUpdate) {
        self(update)
    }
}

/// [`StateObserver`] forwarding every update into a channel, eg/ to hand off to a UI thread.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: Mutex<ChannelTxDroppable<UnboundedTx<StateUpdate>>>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedTx<StateUpdate>) -> Self {
        Self {
            tx: Mutex::new(ChannelTxDroppable::new(tx)),
        }
    }
}

impl StateObserver for ChannelObserver {
    fn on_update(&self, update: &StateUpdate) {
        self.tx.lock().send(update.clone())
    }
}

/// Handle used to [`StateContainer::unsubscribe`] an observer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
pub struct ObserverId(pub u64);

/// Owner of the session [`StateAggregate`].
///
/// Every mutator runs atomically under an internal lock and returns the resulting
/// [`StateSnapshot`]. Observers are notified after that lock is released. Concurrent mutators may
/// therefore notify out of order; use [`StateUpdate::version`] to discard stale updates.
pub struct StateContainer {
    config: StateConfig,
    aggregate: Mutex<StateSnapshot>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn StateObserver>)>>,
    observer_sequence: AtomicU64,
}

impl Debug for StateContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateContainer")
            .field("config", &self.config)
            .field("aggregate", &self.aggregate)
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl Default for StateContainer {
    fn default() -> Self {
        Self::new(StateConfig::default())
    }
}

impl StateContainer {
    pub fn new(config: StateConfig) -> Self {
        Self {
            aggregate: Mutex::new(Arc::new(StateAggregate::new(&config))),
            config,
            observers: RwLock::new(Vec::new()),
            observer_sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// Current [`StateSnapshot`]; never reflects a partially applied mutation.
    pub fn current(&self) -> StateSnapshot {
        Arc::clone(&self.aggregate.lock())
    }

    pub fn subscribe<Observer>(&self, observer: Observer) -> ObserverId
    where
        Observer: StateObserver + 'static,
    {
        self.subscribe_arc(Arc::new(observer))
    }

    pub fn subscribe_arc(&self, observer: Arc<dyn StateObserver>) -> ObserverId {
        let id = ObserverId(self.observer_sequence.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        debug!(%id, "StateContainer observer subscribed");
        id
    }

    /// Returns true if the observer was subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(subscribed, _)| *subscribed != id);
        let removed = observers.len() != before;
        if removed {
            debug!(%id, "StateContainer observer unsubscribed");
        }
        removed
    }

    /// Subscribe a channel, returning the current snapshot plus every later [`StateUpdate`].
    ///
    /// The channel is registered before the snapshot is taken, so no mutation is missed. Updates
    /// whose version is not greater than the snapshot's may still arrive and can be skipped.
    pub fn subscribe_channel(
        &self,
    ) -> (
        ObserverId,
        SnapUpdates<StateSnapshot, UnboundedRx<StateUpdate>>,
    ) {
        let (tx, rx) = mpsc_unbounded();
        let id = self.subscribe(ChannelObserver::new(tx));
        (id, SnapUpdates::new(self.current(), rx))
    }

    /// Apply the next [`Tick`] of the session.
    ///
    /// Marks the position to the tick price, records the tick in the bounded history and
    /// settles an active sidebet the tick resolves. A non-terminal tick following a terminal one
    /// starts a new round and clears [`StateAggregate::terminal_handled`].
    pub fn apply(&self, tick: Tick) -> StateSnapshot {
        let index = tick.index();
        let result = self.mutate(|aggregate, config| {
            let mut events = Vec::new();

            let new_round = match &aggregate.tick {
                None => !tick.is_terminal(),
                Some(previous) => previous.is_terminal() && !tick.is_terminal(),
            };
            if new_round {
                aggregate.terminal_handled = false;
                events.push(StateEvent::RoundStarted { tick_index: index });
            }

            let phase_previous = aggregate.phase();
            if phase_previous != tick.phase() {
                events.push(StateEvent::PhaseChanged {
                    tick_index: index,
                    from: phase_previous,
                    to: tick.phase(),
                });
            }

            aggregate.position.update_unrealised(tick.price())?;

            let terminal_unhandled = tick.is_terminal() && !aggregate.terminal_handled;
            if let Some(bet) = aggregate.sidebet
                && let Some(outcome) = bet.resolution(index, terminal_unhandled)
            {
                events.push(settle(aggregate, config, bet, outcome)?);
            }

            if tick.is_terminal() {
                aggregate.terminal_handled = true;
            }

            debug!(tick_index = index, price = %tick.price(), phase = %tick.phase(), "StateContainer applied tick");
            aggregate.history.push(tick.clone());
            aggregate.tick = Some(tick);

            Ok(events)
        });

        match result {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, tick_index = index, "StateContainer failed to apply tick");
                self.report_error(format!("tick {index} rejected: {error}"))
            }
        }
    }

    /// Buy `units` at `price`, debiting `units × price` from cash.
    pub fn open_position(&self, units: Decimal, price: Decimal) -> Result<StateSnapshot, StateError> {
        self.mutate(|aggregate, _| {
            if units <= Decimal::ZERO {
                return Err(StateError::InvalidUnits {
                    units,
                    held: aggregate.position.units,
                });
            }
            if price <= Decimal::ZERO {
                return Err(StateError::InvalidPrice(price));
            }

            let cost = units
                .checked_mul(price)
                .ok_or_else(|| StateError::overflow("position cost"))?;
            if cost > aggregate.cash {
                return Err(StateError::InsufficientCash {
                    required: cost,
                    available: aggregate.cash,
                });
            }

            aggregate.position.increase(units, price)?;
            aggregate.cash -= cost;
            info!(%units, %price, %cost, "StateContainer opened position");

            Ok(vec![StateEvent::PositionOpened { units, price, cost }])
        })
    }

    /// Sell `units` of the held position at `price`, crediting `units × price` to cash.
    pub fn reduce_position(
        &self,
        units: Decimal,
        price: Decimal,
    ) -> Result<StateSnapshot, StateError> {
        self.mutate(|aggregate, _| reduce(aggregate, units, price))
    }

    /// Sell every held unit at `price`.
    pub fn close_position(&self, price: Decimal) -> Result<StateSnapshot, StateError> {
        self.mutate(|aggregate, _| {
            let units = aggregate.position.units;
            reduce(aggregate, units, price)
        })
    }

    /// Place a sidebet of `amount` at the current tick, resolving within `window` ticks.
    pub fn place_sidebet(&self, amount: Decimal, window: u64) -> Result<StateSnapshot, StateError> {
        self.mutate(|aggregate, _| {
            if amount <= Decimal::ZERO {
                return Err(StateError::InvalidAmount(amount));
            }
            if window == 0 {
                return Err(StateError::InvalidWindow);
            }
            if aggregate.sidebet.is_some() {
                return Err(StateError::SideBetAlreadyActive);
            }
            let tick_placed = aggregate
                .tick
                .as_ref()
                .map(Tick::index)
                .ok_or(StateError::NoTick)?;
            if amount > aggregate.cash {
                return Err(StateError::InsufficientCash {
                    required: amount,
                    available: aggregate.cash,
                });
            }

            let bet = SideBet::new(amount, tick_placed, window);
            aggregate.cash -= amount;
            aggregate.sidebet = Some(bet);
            info!(%amount, tick_placed, expires_at = bet.expires_at(), "StateContainer placed sidebet");

            Ok(vec![StateEvent::SideBetPlaced {
                amount,
                tick_placed,
                expires_at: bet.expires_at(),
            }])
        })
    }

    /// Settle the active sidebet with an externally determined outcome.
    pub fn settle_sidebet(&self, outcome: SideBetOutcome) -> Result<StateSnapshot, StateError> {
        self.mutate(|aggregate, config| {
            let bet = aggregate.sidebet.ok_or(StateError::NoActiveSideBet)?;
            Ok(vec![settle(aggregate, config, bet, outcome)?])
        })
    }

    /// Append a [`StateEvent::SourceError`] to the event log & notify observers.
    pub fn report_error(&self, message: impl Into<String>) -> StateSnapshot {
        let message = message.into();
        warn!(%message, "StateContainer received source error");
        let result = self.mutate(|_, _| Ok(vec![StateEvent::SourceError { message }]));

        result.unwrap_or_else(|_| self.current())
    }

    /// Start a new session from the configured initial state, keeping the version counter.
    pub fn reset(&self) -> StateSnapshot {
        let result = self.mutate(|aggregate, config| {
            let version = aggregate.version;
            *aggregate = StateAggregate::new(config);
            aggregate.version = version;
            info!("StateContainer reset session");
            Ok(vec![StateEvent::SessionReset])
        });

        result.unwrap_or_else(|_| self.current())
    }

    /// Run `op` against the aggregate under the lock, then notify observers with the lock
    /// released.
    ///
    /// `op` must validate before mutating: an `Err` leaves the aggregate as it was.
    fn mutate<Op>(&self, op: Op) -> Result<StateSnapshot, StateError>
    where
        Op: FnOnce(&mut StateAggregate, &StateConfig) -> Result<Vec<StateEvent>, StateError>,
    {
        let update = {
            let mut guard = self.aggregate.lock();
            let mut next = StateAggregate::clone(&guard);

            let events = op(&mut next, &self.config)?;

            next.version += 1;
            let time = Utc::now();
            let events = events
                .into_iter()
                .map(|event| LoggedEvent::new(time, next.version, event))
                .collect::<Vec<_>>();
            for event in &events {
                next.events.push(event.clone());
            }

            *guard = Arc::new(next);
            StateUpdate {
                snapshot: Arc::clone(&guard),
                events,
            }
        };

        self.notify(&update);
        Ok(update.snapshot)
    }

    fn notify(&self, update: &StateUpdate) {
        let observers = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect::<Vec<_>>();

        for observer in observers {
            observer.on_update(update);
        }
    }
}

fn reduce(
    aggregate: &mut StateAggregate,
    units: Decimal,
    price: Decimal,
) -> Result<Vec<StateEvent>, StateError> {
    if aggregate.position.is_flat() {
        return Err(StateError::PositionFlat);
    }
    if units <= Decimal::ZERO || units > aggregate.position.units {
        return Err(StateError::InvalidUnits {
            units,
            held: aggregate.position.units,
        });
    }
    if price <= Decimal::ZERO {
        return Err(StateError::InvalidPrice(price));
    }

    let reduced = aggregate.position.reduce(units, price)?;
    aggregate.cash = aggregate
        .cash
        .checked_add(reduced.proceeds)
        .ok_or_else(|| StateError::overflow("cash"))?;

    if aggregate.position.is_flat() {
        info!(%units, %price, pnl_realised = %reduced.pnl_realised, "StateContainer closed position");
        Ok(vec![StateEvent::PositionClosed(reduced)])
    } else {
        info!(%units, %price, pnl_realised = %reduced.pnl_realised, "StateContainer reduced position");
        Ok(vec![StateEvent::PositionReduced(reduced)])
    }
}

fn settle(
    aggregate: &mut StateAggregate,
    config: &StateConfig,
    bet: SideBet,
    outcome: SideBetOutcome,
) -> Result<StateEvent, StateError> {
    let payout = bet
        .settle(outcome)
        .payout(config.sidebet_payout_multiplier)
        .ok_or_else(|| StateError::overflow("sidebet payout"))?;
    aggregate.cash = aggregate
        .cash
        .checked_add(payout)
        .ok_or_else(|| StateError::overflow("cash"))?;
    aggregate.sidebet = None;
    info!(%outcome, %payout, tick_placed = bet.tick_placed, "StateContainer settled sidebet");
    Ok(StateEvent::SideBetSettled { outcome, payout })
}
