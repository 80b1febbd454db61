use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use tickreel::{
    playback::{Direction, PlaybackConfig, PlaybackController, PlaybackState, error::PlaybackError},
    state::{StateConfig, StateContainer, StateUpdate, event::StateEvent},
};
use tickreel_data::{
    Feed,
    error::DataError,
    source::{TickSource, live::live_feed, recording::FileRecordingSource},
    tick::{PhaseSignals, Tick, TickIndex},
};
use tickreel_integration::channel::Tx;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

fn recording(length: u64) -> FileRecordingSource {
    let ticks = (1..=length)
        .map(|index| {
            Tick::new(
                index,
                dec!(1.0) + Decimal::from(index) * dec!(0.01),
                PhaseSignals::round_active(),
            )
        })
        .collect();
    FileRecordingSource::from_ticks("recording", ticks)
}

fn setup(base_interval_ms: u64) -> (Arc<StateContainer>, Arc<PlaybackController>) {
    let state = Arc::new(StateContainer::new(StateConfig::default()));
    let controller = Arc::new(PlaybackController::new(
        Arc::clone(&state),
        PlaybackConfig {
            base_interval_ms,
            join_timeout_ms: 200,
            ..PlaybackConfig::default()
        },
    ));
    (state, controller)
}

fn wait_for_version(state: &StateContainer, version: u64) {
    let deadline = Instant::now() + IDLE_TIMEOUT;
    while state.current().version < version {
        assert!(Instant::now() < deadline, "state never reached version {version}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn tick_index(update: &StateUpdate) -> Option<TickIndex> {
    update.snapshot.tick.as_ref().map(Tick::index)
}

#[test]
fn test_pause_step_resume_delivers_every_tick_exactly_once() {
    let (state, controller) = setup(2);
    let source = recording(100);
    let expected = source.ticks().to_vec();
    controller.load(source).unwrap();

    let delivered = Arc::new(Mutex::new(Vec::<Tick>::new()));
    let observer_delivered = Arc::clone(&delivered);
    let observer_controller: Weak<PlaybackController> = Arc::downgrade(&controller);
    state.subscribe(move |update: &StateUpdate| {
        let Some(tick) = update.snapshot.tick.clone() else {
            return;
        };
        let index = tick.index();
        observer_delivered.lock().push(tick);

        if index == 40
            && let Some(controller) = observer_controller.upgrade()
            && controller.state() == PlaybackState::Playing
        {
            controller.pause().unwrap();
        }
    });

    controller.set_speed(1.0).unwrap();
    controller.play().unwrap();
    assert!(controller.wait_idle(IDLE_TIMEOUT));
    assert_eq!(controller.state(), PlaybackState::Paused);
    assert_eq!(delivered.lock().len(), 40);

    assert_eq!(controller.step(Direction::Forward), Ok(Some(41)));
    assert_eq!(controller.step(Direction::Forward), Ok(Some(42)));

    controller.play().unwrap();
    assert!(controller.wait_idle(IDLE_TIMEOUT));

    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(state.current().tick.as_ref().map(Tick::index), Some(100));
    assert_eq!(*delivered.lock(), expected);

    controller.cleanup().unwrap();
}

#[test]
fn test_pause_interrupts_wait_without_waiting_out_interval() {
    // One minute between ticks at speed 1.0, ten minutes at the slowest speed
    for speed in [1.0, 0.1] {
        let (state, controller) = setup(60_000);
        controller.load(recording(10)).unwrap();
        controller.set_speed(speed).unwrap();

        controller.play().unwrap();
        wait_for_version(&state, 1);

        let started = Instant::now();
        controller.pause().unwrap();
        assert!(controller.wait_idle(IDLE_TIMEOUT));

        assert!(
            started.elapsed() < Duration::from_secs(5),
            "pause took {:?} at speed {speed}",
            started.elapsed()
        );
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(controller.position(), 1);

        // Pause is idempotent
        assert_eq!(controller.pause(), Ok(()));
        controller.cleanup().unwrap();
    }
}

#[test]
fn test_resume_after_pause_never_runs_two_playback_threads() {
    let (state, controller) = setup(1);
    controller.load(recording(500)).unwrap();

    let applied = Arc::new(Mutex::new(Vec::<TickIndex>::new()));
    let observer_applied = Arc::clone(&applied);
    state.subscribe(move |update: &StateUpdate| {
        if let Some(index) = tick_index(update) {
            observer_applied.lock().push(index);
        }
    });

    for _ in 0..20 {
        controller.play().unwrap();
        controller.pause().unwrap();
        controller.play().unwrap();
    }
    assert!(controller.wait_idle(IDLE_TIMEOUT));

    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(*applied.lock(), (1..=500).collect::<Vec<_>>());
}

#[test]
fn test_resume_racing_loop_exit_plays_to_the_end() {
    for _ in 0..10 {
        let (state, controller) = setup(1);
        controller.load(recording(200)).unwrap();

        controller.play().unwrap();
        // Pause fails once the recording has been exhausted & playback stopped
        while controller.pause().is_ok() {
            std::thread::sleep(Duration::from_millis(1));
            controller.play().unwrap();
            if !controller.is_running() {
                break;
            }
        }
        assert!(controller.wait_idle(IDLE_TIMEOUT));

        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert_eq!(state.current().tick.as_ref().map(Tick::index), Some(200));
        controller.cleanup().unwrap();
    }
}

#[test]
fn test_cleanup_from_playback_thread_is_rejected() {
    let (state, controller) = setup(1);
    controller.load(recording(10)).unwrap();

    let result = Arc::new(Mutex::new(None));
    let observer_result = Arc::clone(&result);
    let observer_controller = Arc::downgrade(&controller);
    state.subscribe(move |update: &StateUpdate| {
        if tick_index(update) == Some(3)
            && let Some(controller) = observer_controller.upgrade()
        {
            *observer_result.lock() = Some(controller.cleanup());
            controller.pause().unwrap();
        }
    });

    controller.play().unwrap();
    assert!(controller.wait_idle(IDLE_TIMEOUT));

    assert_eq!(*result.lock(), Some(Err(PlaybackError::SelfJoin)));
    assert_eq!(controller.state(), PlaybackState::Paused);
    assert_eq!(controller.cleanup(), Ok(()));
    assert_eq!(controller.state(), PlaybackState::Stopped);
}

#[test]
fn test_step_from_observer_is_rejected_instead_of_deadlocking() {
    let (state, controller) = setup(1);
    controller.load(recording(10)).unwrap();

    let result = Arc::new(Mutex::new(None));
    let observer_result = Arc::clone(&result);
    let observer_controller = Arc::downgrade(&controller);
    state.subscribe(move |update: &StateUpdate| {
        if tick_index(update) == Some(2)
            && let Some(controller) = observer_controller.upgrade()
        {
            controller.pause().unwrap();
            *observer_result.lock() = Some(controller.step(Direction::Forward));
        }
    });

    controller.play().unwrap();
    assert!(controller.wait_idle(IDLE_TIMEOUT));

    assert_eq!(
        *result.lock(),
        Some(Err(PlaybackError::ReentrantCall { operation: "step" }))
    );
    controller.cleanup().unwrap();
}

#[test]
fn test_play_rejected_while_previous_thread_is_still_shutting_down() {
    let (state, controller) = setup(1);
    let (feed_tx, source) = live_feed();
    controller.load(source).unwrap();

    feed_tx
        .send(Tick::new(1, dec!(1.0), PhaseSignals::round_active()))
        .unwrap();
    controller.play().unwrap();
    wait_for_version(&state, 1);

    // Playback thread is now blocked waiting on the live feed
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(
        controller.cleanup(),
        Err(PlaybackError::JoinTimeout { timeout_ms: 200 })
    );
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert!(controller.is_running());
    assert_eq!(controller.play(), Err(PlaybackError::PreviousRunActive));

    // Disconnecting the feed ends the blocked fetch
    drop(feed_tx);
    assert!(controller.wait_idle(IDLE_TIMEOUT));
    assert_eq!(controller.cleanup(), Ok(()));
    assert_eq!(state.current().tick.as_ref().map(Tick::index), Some(1));
}

#[derive(Debug)]
struct FailingSource {
    inner: FileRecordingSource,
    fail_at: usize,
}

impl TickSource for FailingSource {
    fn next(&mut self) -> Result<Feed<Tick>, DataError> {
        if self.inner.position() == self.fail_at {
            return Err(DataError::Io {
                path: "recordings/failing.jsonl".into(),
                error: "unexpected end of file".to_string(),
            });
        }
        self.inner.next()
    }

    fn seek(&mut self, index: usize) -> Result<(), DataError> {
        self.inner.seek(index)
    }

    fn length(&self) -> Option<usize> {
        self.inner.length()
    }

    fn position(&self) -> usize {
        self.inner.position()
    }
}

#[test]
fn test_source_failure_is_reported_and_stops_playback() {
    let (state, controller) = setup(1);
    controller
        .load(FailingSource {
            inner: recording(10),
            fail_at: 4,
        })
        .unwrap();

    controller.play().unwrap();
    assert!(controller.wait_idle(IDLE_TIMEOUT));

    assert_eq!(controller.state(), PlaybackState::Stopped);

    let snapshot = state.current();
    assert_eq!(snapshot.tick.as_ref().map(Tick::index), Some(4));
    assert!(matches!(
        snapshot.events.latest().map(|logged| &logged.event),
        Some(StateEvent::SourceError { message }) if message.contains("unexpected end of file")
    ));

    controller.cleanup().unwrap();
}

#[test]
fn test_replay_recording_from_disk() {
    let root = tempfile::tempdir().unwrap();
    let ticks = recording(30).ticks().to_vec();
    tickreel_data::source::recording::write_recording(root.path(), "round-7", &ticks).unwrap();

    let (state, controller) = setup(0);
    controller
        .load(FileRecordingSource::open(root.path(), "round-7").unwrap())
        .unwrap();
    controller.play().unwrap();
    assert!(controller.wait_idle(IDLE_TIMEOUT));

    let snapshot = state.current();
    assert_eq!(snapshot.tick.as_ref(), ticks.last());
    assert_eq!(snapshot.version, 30);
}
