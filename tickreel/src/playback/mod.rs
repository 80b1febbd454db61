use crate::{
    logging::PLAYBACK_TICK_SPAN_NAME, playback::error::PlaybackError, shutdown::SyncShutdown,
    state::StateContainer,
};
use derive_more::Display;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    thread::{JoinHandle, ThreadId},
    time::{Duration, Instant},
};
use tickreel_data::{
    Feed,
    source::{TickSource, recording::FileRecordingSource},
    tick::TickIndex,
};
use tickreel_store::{error::StoreError, query::QueryLayer};
use tracing::{debug, error, info, info_span, warn};

pub mod error;

/// Configuration of a [`PlaybackController`].
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Interval between ticks at speed `1.0`.
    pub base_interval_ms: u64,

    /// Slowest permitted speed multiplier.
    pub min_speed: f64,

    /// Fastest permitted speed multiplier.
    pub max_speed: f64,

    /// Upper bound [`PlaybackController::cleanup`] waits for the playback thread to exit.
    pub join_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 250,
            min_speed: 0.1,
            max_speed: 20.0,
            join_timeout_ms: 2_000,
        }
    }
}

impl PlaybackConfig {
    /// Wait between two ticks at the provided speed multiplier: `base_interval / speed`.
    pub fn interval(&self, speed: f64) -> Duration {
        let base = Duration::from_millis(self.base_interval_ms);
        Duration::try_from_secs_f64(base.as_secs_f64() / speed).unwrap_or(base)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// State of a [`PlaybackController`]: `Stopped → Playing ⇄ Paused → Stopped`.
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
pub enum PlaybackState {
    #[default]
    #[display("stopped")]
    Stopped,
    #[display("playing")]
    Playing,
    #[display("paused")]
    Paused,
}

/// Direction of a single [`PlaybackController::step`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// Drives a loaded [`TickSource`] into a [`StateContainer`] on a background thread.
///
/// At most one playback thread is alive at a time. `pause` & `cleanup` interrupt the wait
/// between ticks, so they take effect without waiting out the remaining interval. Operations that
/// would deadlock if invoked while a tick is being delivered on the calling thread (eg/ from a
/// [`StateObserver`](crate::state::StateObserver) running on the playback thread) are rejected
/// with a typed error instead.
#[derive(Debug)]
pub struct PlaybackController {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Arc<StateContainer>,
    config: PlaybackConfig,
    control: Mutex<Control>,
    wake: Condvar,
    source: Mutex<Option<Box<dyn TickSource>>>,
}

#[derive(Debug)]
struct Control {
    state: PlaybackState,
    speed: f64,
    loaded: bool,
    position: usize,
    length: Option<usize>,
    /// Playback thread whose loop is still alive.
    running: Option<ThreadId>,
    /// Thread currently fetching & applying a tick.
    delivering: Option<ThreadId>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Cue {
    Play,
    Step(Direction),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Delivery {
    Delivered(TickIndex),
    Unhealthy,
    Exhausted,
    AtStart,
    Skipped,
}

/// Build a replayable source from an episode previously captured into the event store.
pub fn episode_source(query: &QueryLayer, episode: &str) -> Result<FileRecordingSource, StoreError> {
    let ticks = query.episode_ticks(episode)?;
    Ok(FileRecordingSource::from_ticks(episode, ticks))
}

fn current_thread() -> ThreadId {
    std::thread::current().id()
}

impl PlaybackController {
    pub fn new(state: Arc<StateContainer>, config: PlaybackConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state,
                config,
                control: Mutex::new(Control {
                    state: PlaybackState::Stopped,
                    speed: 1.0,
                    loaded: false,
                    position: 0,
                    length: None,
                    running: None,
                    delivering: None,
                    handle: None,
                }),
                wake: Condvar::new(),
                source: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.control.lock().state
    }

    pub fn speed(&self) -> f64 {
        self.shared.control.lock().speed
    }

    /// Zero-based index of the next tick the loaded source will deliver.
    pub fn position(&self) -> usize {
        self.shared.control.lock().position
    }

    /// Number of ticks in the loaded source, if known.
    pub fn length(&self) -> Option<usize> {
        self.shared.control.lock().length
    }

    /// Determine if a playback thread is still alive.
    pub fn is_running(&self) -> bool {
        self.shared.control.lock().running.is_some()
    }

    pub fn state_container(&self) -> &Arc<StateContainer> {
        &self.shared.state
    }

    /// Bind a [`TickSource`] to play. Only valid while `Stopped`.
    pub fn load<Source>(&self, source: Source) -> Result<(), PlaybackError>
    where
        Source: TickSource + 'static,
    {
        self.shared.ensure_not_delivering("load")?;

        let mut slot = self.shared.source.lock();
        let mut control = self.shared.control.lock();
        if control.state != PlaybackState::Stopped || control.running.is_some() {
            return Err(PlaybackError::InvalidState {
                operation: "load",
                state: control.state,
            });
        }

        control.loaded = true;
        control.position = source.position();
        control.length = source.length();
        info!(length = ?control.length, "PlaybackController loaded tick source");
        *slot = Some(Box::new(source));

        Ok(())
    }

    /// Start (or resume) playback.
    ///
    /// A no-op while already playing. Resuming from `Paused` reuses the playback thread if its
    /// loop has not yet exited, otherwise the finished thread is joined before a new one starts.
    pub fn play(&self) -> Result<(), PlaybackError> {
        let mut control = self.shared.control.lock();

        if let Some(running) = control.running {
            return match control.state {
                PlaybackState::Playing => Ok(()),
                PlaybackState::Paused => {
                    control.state = PlaybackState::Playing;
                    info!("PlaybackController resumed");
                    Ok(())
                }
                PlaybackState::Stopped => {
                    warn!(?running, "PlaybackController cannot play while previous thread is alive");
                    Err(PlaybackError::PreviousRunActive)
                }
            };
        }

        if !control.loaded {
            return Err(PlaybackError::NoSource);
        }

        if let Some(handle) = control.handle.take() {
            if handle.thread().id() == current_thread() {
                control.handle = Some(handle);
                return Err(PlaybackError::SelfJoin);
            }
            if handle.join().is_err() {
                warn!("PlaybackController previous playback thread panicked");
            }
        }

        let previous = control.state;
        control.state = PlaybackState::Playing;

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || shared.run());

        match handle {
            Ok(handle) => {
                control.running = Some(handle.thread().id());
                control.handle = Some(handle);
                info!(speed = control.speed, position = control.position, "PlaybackController playing");
                Ok(())
            }
            Err(error) => {
                control.state = previous;
                error!(%error, "PlaybackController failed to spawn playback thread");
                Err(PlaybackError::Spawn(error.to_string()))
            }
        }
    }

    /// Pause playback, interrupting the wait between ticks. Idempotent.
    ///
    /// Safe to call from the playback thread. A tick whose delivery is already underway
    /// completes; no further tick is fetched.
    pub fn pause(&self) -> Result<(), PlaybackError> {
        let mut control = self.shared.control.lock();
        match control.state {
            PlaybackState::Playing => {
                control.state = PlaybackState::Paused;
                self.shared.wake.notify_all();
                info!(position = control.position, "PlaybackController paused");
                Ok(())
            }
            PlaybackState::Paused => Ok(()),
            PlaybackState::Stopped => Err(PlaybackError::InvalidState {
                operation: "pause",
                state: PlaybackState::Stopped,
            }),
        }
    }

    /// Deliver exactly one tick synchronously. Only valid while `Paused`.
    ///
    /// Returns the index of the delivered tick, or `None` if the source has no tick in that
    /// direction.
    pub fn step(&self, direction: Direction) -> Result<Option<TickIndex>, PlaybackError> {
        self.shared.ensure_paused("step")?;

        match self.shared.deliver(Cue::Step(direction))? {
            Delivery::Delivered(index) => Ok(Some(index)),
            Delivery::Unhealthy | Delivery::Exhausted | Delivery::AtStart => Ok(None),
            Delivery::Skipped => Err(PlaybackError::InvalidState {
                operation: "step",
                state: self.state(),
            }),
        }
    }

    /// Reposition the loaded source so the next tick delivered is `index`. Only valid while
    /// `Paused`.
    pub fn seek(&self, index: usize) -> Result<(), PlaybackError> {
        self.shared.ensure_paused("seek")?;

        let mut slot = self.shared.source.lock();
        let source = slot.as_mut().ok_or(PlaybackError::NoSource)?;
        source.seek(index)?;

        let position = source.position();
        self.shared.control.lock().position = position;
        info!(position, "PlaybackController seeked");
        Ok(())
    }

    /// Change the speed multiplier used from the next wait onwards.
    pub fn set_speed(&self, speed: f64) -> Result<(), PlaybackError> {
        let config = &self.shared.config;
        let valid = speed.is_finite()
            && speed > 0.0
            && speed >= config.min_speed
            && speed <= config.max_speed;

        if !valid {
            return Err(PlaybackError::InvalidSpeed {
                speed,
                min: config.min_speed,
                max: config.max_speed,
            });
        }

        self.shared.control.lock().speed = speed;
        debug!(speed, "PlaybackController speed updated");
        Ok(())
    }

    /// Stop playback, join the playback thread within the configured timeout & release the
    /// loaded source.
    ///
    /// Rejected with [`PlaybackError::SelfJoin`] when called from the playback thread.
    pub fn cleanup(&self) -> Result<(), PlaybackError> {
        let handle = {
            let mut control = self.shared.control.lock();
            let me = current_thread();
            if control.running == Some(me) {
                return Err(PlaybackError::SelfJoin);
            }
            if control.delivering == Some(me) {
                return Err(PlaybackError::ReentrantCall {
                    operation: "cleanup",
                });
            }

            control.state = PlaybackState::Stopped;
            self.shared.wake.notify_all();

            let timeout = self.shared.config.join_timeout();
            let deadline = Instant::now() + timeout;
            while control.running.is_some() {
                if self
                    .shared
                    .wake
                    .wait_until(&mut control, deadline)
                    .timed_out()
                {
                    break;
                }
            }

            if control.running.is_some() {
                warn!(?timeout, "PlaybackController playback thread did not exit in time");
                return Err(PlaybackError::JoinTimeout {
                    timeout_ms: self.shared.config.join_timeout_ms,
                });
            }

            control.handle.take()
        };

        let joined = match handle {
            Some(handle) => handle.join().map_err(|_| PlaybackError::ThreadPanicked),
            None => Ok(()),
        };

        let released = self.shared.source.lock().take();
        {
            let mut control = self.shared.control.lock();
            control.loaded = false;
            control.position = 0;
            control.length = None;
        }
        info!(released = released.is_some(), "PlaybackController cleaned up");

        joined
    }

    /// Block until the playback thread has exited, or `timeout` elapses.
    ///
    /// Returns true if no playback thread is alive. Always false on the playback thread itself.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.shared.control.lock();
        if control.running == Some(current_thread()) {
            return false;
        }

        while control.running.is_some() {
            if self
                .shared
                .wake
                .wait_until(&mut control, deadline)
                .timed_out()
            {
                break;
            }
        }

        control.running.is_none()
    }
}

impl SyncShutdown for PlaybackController {
    type Result = Result<(), PlaybackError>;

    fn shutdown(&mut self) -> Self::Result {
        self.cleanup()
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if !self.is_running() {
            return;
        }

        if let Err(error) = self.cleanup() {
            warn!(%error, "PlaybackController failed to clean up on drop");
        }
    }
}

impl Shared {
    fn ensure_not_delivering(&self, operation: &'static str) -> Result<(), PlaybackError> {
        let control = self.control.lock();
        let me = Some(current_thread());
        if control.delivering == me || control.running == me {
            Err(PlaybackError::ReentrantCall { operation })
        } else {
            Ok(())
        }
    }

    fn ensure_paused(&self, operation: &'static str) -> Result<(), PlaybackError> {
        self.ensure_not_delivering(operation)?;

        let state = self.control.lock().state;
        if state == PlaybackState::Paused {
            Ok(())
        } else {
            Err(PlaybackError::InvalidState { operation, state })
        }
    }

    fn run(self: Arc<Self>) {
        let mut running = RunningGuard::new(&self);
        debug!("PlaybackController thread started");

        loop {
            if !self.keep_playing(&mut running) {
                debug!("PlaybackController thread exiting");
                return;
            }

            let delivery = {
                let _span = info_span!(PLAYBACK_TICK_SPAN_NAME).entered();
                self.deliver(Cue::Play)
            };

            match delivery {
                Ok(Delivery::Exhausted) => {
                    info!("PlaybackController tick source exhausted");
                    running.release(&mut self.control.lock());
                    return;
                }
                Ok(Delivery::Unhealthy) => {
                    warn!("PlaybackController tick source unhealthy");
                }
                Ok(_) => {}
                Err(error) => {
                    error!(%error, "PlaybackController stopping after tick source failure");
                    self.state.report_error(error.to_string());
                    running.release(&mut self.control.lock());
                    return;
                }
            }

            self.wait_interval();
        }
    }

    /// Decide under the control lock whether the loop runs another iteration.
    ///
    /// Once the loop decides to exit it is marked as no longer running in the same critical
    /// section, so a concurrent [`PlaybackController::play`] either resumes a loop that will
    /// keep running or starts a new one.
    fn keep_playing(&self, running: &mut RunningGuard<'_>) -> bool {
        let mut control = self.control.lock();
        if control.state == PlaybackState::Playing {
            true
        } else {
            running.release(&mut control);
            false
        }
    }

    /// Interruptible wait of `base_interval / speed`, cut short by any state change.
    fn wait_interval(&self) {
        let mut control = self.control.lock();
        let deadline = Instant::now() + self.config.interval(control.speed);

        while control.state == PlaybackState::Playing {
            if self.wake.wait_until(&mut control, deadline).timed_out() {
                break;
            }
        }
    }

    /// Fetch the next tick for `cue` from the loaded source & apply it to the state.
    ///
    /// The playback state is re-checked once the source is held, so a tick is never fetched
    /// after a pause or stop has been observed.
    fn deliver(&self, cue: Cue) -> Result<Delivery, PlaybackError> {
        let mut slot = self.source.lock();
        let source = slot.as_mut().ok_or(PlaybackError::NoSource)?;

        {
            let mut control = self.control.lock();
            let permitted = match cue {
                Cue::Play => control.state == PlaybackState::Playing,
                Cue::Step(_) => control.state == PlaybackState::Paused,
            };
            if !permitted {
                return Ok(Delivery::Skipped);
            }
            control.delivering = Some(current_thread());
        }

        let delivery = self.fetch_apply(source.as_mut(), cue);

        let mut control = self.control.lock();
        control.delivering = None;
        control.position = source.position();
        delivery
    }

    fn fetch_apply(&self, source: &mut dyn TickSource, cue: Cue) -> Result<Delivery, PlaybackError> {
        if cue == Cue::Step(Direction::Backward) {
            let position = source.position();
            if position < 2 {
                return Ok(Delivery::AtStart);
            }
            source.seek(position - 2)?;
        }

        match source.next()? {
            Feed::Next(tick) => {
                let index = tick.index();
                debug!(tick_index = index, ?cue, "PlaybackController delivering tick");
                self.state.apply(tick);
                Ok(Delivery::Delivered(index))
            }
            Feed::Unhealthy => Ok(Delivery::Unhealthy),
            Feed::Finished => Ok(Delivery::Exhausted),
        }
    }
}

/// Marks the playback loop as exited when the playback thread leaves [`Shared::run`], including
/// by panic.
///
/// The loop normally releases explicitly while holding the control lock. Dropping an unreleased
/// guard releases it then.
struct RunningGuard<'a> {
    shared: &'a Shared,
    released: bool,
}

impl<'a> RunningGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    /// Record that the loop has exited. A `Playing` state it leaves behind becomes `Stopped`.
    fn release(&mut self, control: &mut Control) {
        if self.released {
            return;
        }
        if control.state == PlaybackState::Playing {
            control.state = PlaybackState::Stopped;
            info!(position = control.position, "PlaybackController stopped");
        }
        control.running = None;
        control.delivering = None;
        self.released = true;
        self.shared.wake.notify_all();
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let shared = self.shared;
            self.release(&mut shared.control.lock());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateConfig;
    use rust_decimal::Decimal;
    use tickreel_data::tick::{PhaseSignals, Tick};

    fn recording(length: u64) -> FileRecordingSource {
        let ticks = (1..=length)
            .map(|index| Tick::new(index, Decimal::from(index), PhaseSignals::round_active()))
            .collect();
        FileRecordingSource::from_ticks("test", ticks)
    }

    fn controller(base_interval_ms: u64) -> PlaybackController {
        PlaybackController::new(
            Arc::new(StateContainer::new(StateConfig::default())),
            PlaybackConfig {
                base_interval_ms,
                ..PlaybackConfig::default()
            },
        )
    }

    fn current_index(controller: &PlaybackController) -> Option<TickIndex> {
        controller
            .state_container()
            .current()
            .tick
            .as_ref()
            .map(Tick::index)
    }

    #[test]
    fn test_interval_scales_with_speed() {
        let config = PlaybackConfig {
            base_interval_ms: 200,
            ..PlaybackConfig::default()
        };
        assert_eq!(config.interval(1.0), Duration::from_millis(200));
        assert_eq!(config.interval(2.0), Duration::from_millis(100));
        assert_eq!(config.interval(0.5), Duration::from_millis(400));
    }

    #[test]
    fn test_operations_rejected_in_wrong_state() {
        let controller = controller(1);

        assert_eq!(controller.play(), Err(PlaybackError::NoSource));
        assert_eq!(
            controller.pause(),
            Err(PlaybackError::InvalidState {
                operation: "pause",
                state: PlaybackState::Stopped
            })
        );
        assert_eq!(
            controller.step(Direction::Forward),
            Err(PlaybackError::InvalidState {
                operation: "step",
                state: PlaybackState::Stopped
            })
        );
        assert_eq!(
            controller.seek(3),
            Err(PlaybackError::InvalidState {
                operation: "seek",
                state: PlaybackState::Stopped
            })
        );
    }

    #[test]
    fn test_set_speed_bounds() {
        let controller = controller(1);

        assert_eq!(controller.set_speed(2.5), Ok(()));
        assert_eq!(controller.speed(), 2.5);

        for speed in [0.0, -1.0, 0.01, 100.0, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(
                    controller.set_speed(speed),
                    Err(PlaybackError::InvalidSpeed { .. })
                ),
                "speed {speed} accepted"
            );
        }
        assert_eq!(controller.speed(), 2.5);
    }

    #[test]
    fn test_play_until_exhausted_stops() {
        let controller = controller(0);
        controller.load(recording(25)).unwrap();
        assert_eq!(controller.length(), Some(25));

        controller.play().unwrap();
        assert!(controller.wait_idle(Duration::from_secs(5)));

        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert_eq!(controller.position(), 25);
        assert_eq!(current_index(&controller), Some(25));
        assert_eq!(controller.state_container().current().version, 25);
    }

    #[test]
    fn test_step_forward_and_backward_while_paused() {
        let controller = controller(60_000);
        controller.load(recording(10)).unwrap();

        // The first tick is delivered immediately, then the long interval wait is interrupted
        controller.play().unwrap();
        controller.pause().unwrap();
        assert!(controller.wait_idle(Duration::from_secs(5)));
        assert_eq!(controller.state(), PlaybackState::Paused);

        let position = controller.position();
        assert!(position <= 1);

        controller.seek(4).unwrap();
        assert_eq!(controller.step(Direction::Forward), Ok(Some(5)));
        assert_eq!(controller.step(Direction::Forward), Ok(Some(6)));
        assert_eq!(controller.step(Direction::Backward), Ok(Some(5)));
        assert_eq!(controller.position(), 5);
        assert_eq!(current_index(&controller), Some(5));

        controller.seek(0).unwrap();
        assert_eq!(controller.step(Direction::Backward), Ok(None));

        controller.seek(10).unwrap();
        assert_eq!(controller.step(Direction::Forward), Ok(None));
        assert_eq!(controller.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_cleanup_releases_source_and_returns_to_stopped() {
        let mut controller = controller(60_000);
        controller.load(recording(10)).unwrap();
        controller.play().unwrap();

        let started = Instant::now();
        controller.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert!(!controller.is_running());
        assert_eq!(controller.length(), None);
        assert_eq!(controller.play(), Err(PlaybackError::NoSource));
    }

    #[test]
    fn test_load_rejected_while_playing() {
        let controller = controller(60_000);
        controller.load(recording(3)).unwrap();
        controller.play().unwrap();

        assert!(matches!(
            controller.load(recording(3)),
            Err(PlaybackError::InvalidState {
                operation: "load",
                ..
            })
        ));

        controller.cleanup().unwrap();
    }

    #[test]
    fn test_exiting_loop_never_swallows_a_resume() {
        let controller = controller(0);
        controller.load(recording(5)).unwrap();
        let shared = controller.shared.as_ref();

        // Playback loop observing a pause while running on this thread
        {
            let mut control = shared.control.lock();
            control.state = PlaybackState::Paused;
            control.running = Some(current_thread());
        }
        let mut running = RunningGuard::new(shared);
        assert!(!shared.keep_playing(&mut running));
        assert!(!controller.is_running());

        // Resuming after the exit decision starts a fresh thread
        controller.play().unwrap();
        assert!(controller.is_running() || controller.state() == PlaybackState::Stopped);

        // Exiting loop finishing its teardown must leave the new run untouched
        drop(running);
        assert!(controller.wait_idle(Duration::from_secs(10)));
        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert_eq!(current_index(&controller), Some(5));
        assert_eq!(controller.state_container().current().version, 5);

        controller.cleanup().unwrap();
    }
}
