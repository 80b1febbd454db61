use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tickreel_data::{
    Feed,
    error::DataError,
    source::{
        TickSource,
        recording::{FileRecordingSource, list_recordings, write_recording},
    },
    tick::{Phase, PhaseSignals, Tick},
};

fn round(ticks: u64) -> Vec<Tick> {
    let mut round = vec![Tick::new(0, dec!(1.0), PhaseSignals::presale())];
    round.extend((1..ticks).map(|index| {
        Tick::new(
            index,
            dec!(1.0) + Decimal::from(index) * dec!(0.01),
            PhaseSignals::round_active(),
        )
    }));
    round.push(Tick::new(ticks, dec!(0), PhaseSignals::round_terminal()));
    round
}

#[test]
fn test_recording_replays_every_tick_with_rederived_phase() {
    let root = tempfile::tempdir().unwrap();
    let recorded = round(50);
    write_recording(root.path(), "round-1", &recorded).unwrap();

    let mut source = FileRecordingSource::open(root.path(), "round-1").unwrap();
    let mut phases = Vec::new();
    let mut replayed = Vec::new();
    loop {
        match source.next().unwrap() {
            Feed::Next(tick) => {
                phases.push(tick.phase());
                replayed.push(tick);
            }
            Feed::Finished => break,
            Feed::Unhealthy => unreachable!("recordings are never unhealthy"),
        }
    }

    assert_eq!(replayed, recorded);
    assert_eq!(phases.first(), Some(&Phase::Presale));
    assert_eq!(phases.last(), Some(&Phase::Terminal));
    assert_eq!(
        phases.iter().filter(|phase| **phase == Phase::Active).count(),
        49
    );
}

#[test]
fn test_rewind_one_tick_by_seeking_two_back() {
    let mut source = FileRecordingSource::from_ticks("memory", round(10));

    for _ in 0..5 {
        source.next().unwrap();
    }
    assert_eq!(source.position(), 5);

    // Last delivered tick has index 4, rewinding one delivers index 3
    source.seek(source.position() - 2).unwrap();
    let Feed::Next(tick) = source.next().unwrap() else {
        panic!("expected a tick");
    };
    assert_eq!(tick.index(), 3);
}

#[test]
fn test_traversal_identifiers_are_rejected_by_every_entry_point() {
    let root = tempfile::tempdir().unwrap();
    let inner = root.path().join("recordings");
    std::fs::create_dir_all(&inner).unwrap();
    write_recording(root.path(), "secret", &round(2)).unwrap();

    assert!(matches!(
        FileRecordingSource::open(&inner, "../secret"),
        Err(DataError::InvalidIdentifier { .. })
    ));
    assert!(matches!(
        write_recording(&inner, "../escape", &round(2)),
        Err(DataError::InvalidIdentifier { .. })
    ));
    assert!(list_recordings(&inner).unwrap().is_empty());
}
