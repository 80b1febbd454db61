use crate::{error::TickreelError, playback::PlaybackConfig, state::StateConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tickreel_store::recorder::RecorderConfig;

/// Top-level configuration of a Tickreel system.
///
/// Every field has a default, so a partial (or empty) JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Session state configuration (initial cash, history & event log capacity, sidebets).
    pub state: StateConfig,

    /// Playback speed & timing configuration.
    pub playback: PlaybackConfig,

    /// Event store writer configuration.
    pub recorder: RecorderConfig,

    /// Directory holding `<session_id>.jsonl` tick recordings available for playback.
    pub recordings_root: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            playback: PlaybackConfig::default(),
            recorder: RecorderConfig::default(),
            recordings_root: PathBuf::from("data/recordings"),
        }
    }
}

impl SystemConfig {
    /// Read & parse a JSON [`SystemConfig`] file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TickreelError> {
        let path = path.as_ref();
        let config_error = |error: String| TickreelError::Config {
            path: path.to_path_buf(),
            error,
        };

        let contents = std::fs::read_to_string(path).map_err(|error| config_error(error.to_string()))?;
        serde_json::from_str(&contents).map_err(|error| config_error(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        struct TestCase {
            input: &'static str,
            expected: SystemConfig,
        }

        let cases = vec![
            // TC0: empty object
            TestCase {
                input: "{}",
                expected: SystemConfig::default(),
            },
            // TC1: nested partial sections
            TestCase {
                input: r#"{
                    "state": { "initial_cash": "2.5" },
                    "playback": { "base_interval_ms": 100 },
                    "recorder": { "writer_id": "capture-1" }
                }"#,
                expected: SystemConfig {
                    state: StateConfig {
                        initial_cash: dec!(2.5),
                        ..StateConfig::default()
                    },
                    playback: PlaybackConfig {
                        base_interval_ms: 100,
                        ..PlaybackConfig::default()
                    },
                    recorder: RecorderConfig {
                        writer_id: "capture-1".to_string(),
                        ..RecorderConfig::default()
                    },
                    ..SystemConfig::default()
                },
            },
            // TC2: recordings root only
            TestCase {
                input: r#"{ "recordings_root": "/var/lib/tickreel/recordings" }"#,
                expected: SystemConfig {
                    recordings_root: PathBuf::from("/var/lib/tickreel/recordings"),
                    ..SystemConfig::default()
                },
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let actual = serde_json::from_str::<SystemConfig>(test.input).unwrap();
            assert_eq!(actual, test.expected, "TC{index} failed");
        }
    }

    #[test]
    fn test_from_path_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            SystemConfig::from_path(&missing),
            Err(TickreelError::Config { path, .. }) if path == missing
        ));

        let malformed = dir.path().join("malformed.json");
        std::fs::write(&malformed, "{ not json").unwrap();
        assert!(matches!(
            SystemConfig::from_path(&malformed),
            Err(TickreelError::Config { .. })
        ));

        let valid = dir.path().join("config.json");
        std::fs::write(&valid, r#"{ "playback": { "max_speed": 8.0 } }"#).unwrap();
        assert_eq!(SystemConfig::from_path(&valid).unwrap().playback.max_speed, 8.0);
    }
}
